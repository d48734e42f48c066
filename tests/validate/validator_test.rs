#[cfg(test)]
mod tests {
    use serde_json::json;
    use starling::validate::{validate_answer, ToolResult};

    fn aggregate_result(rows: serde_json::Value) -> ToolResult {
        ToolResult {
            tool_name: "aggregate_group".to_string(),
            success: true,
            result: Some(rows),
            error: None,
            metric_name: None,
        }
    }

    #[test]
    fn test_spec_scenario_invented_versus_traceable() {
        let tools = [ToolResult {
            tool_name: "query_metric".to_string(),
            success: true,
            result: Some(json!([{ "total": 1234.56 }])),
            error: None,
            metric_name: None,
        }];

        // 1.300,00 € is not 1234.56, not any rounding of it, and sits above
        // the 5% partial-total ceiling: invented.
        let invented = validate_answer("Il totale del periodo è 1.300,00 €", &tools);
        assert!(!invented.valid);
        assert_eq!(invented.invented_numbers, vec![1300.0]);

        // The exact figure in European formatting passes untouched.
        let exact = validate_answer("Il totale del periodo è 1.234,56 €", &tools);
        assert!(exact.valid, "errors: {:?}", exact.errors);
        assert!(exact.invented_numbers.is_empty());
    }

    #[test]
    fn test_partial_total_heuristic_bounds() {
        let tools = [aggregate_result(json!([
            { "categoria": "cibo", "totale": 600.0 },
            { "categoria": "bevande", "totale": 400.0 },
            { "categoria": "dolci", "totale": 300.0 },
        ]))];

        // 1.000 is food plus drinks: above the max single value, below the
        // grand total, so it reads as a partial total.
        let partial = validate_answer("cibo e bevande insieme fanno 1.000 €", &tools);
        assert!(partial.valid, "errors: {:?}", partial.errors);

        // 1.400 overshoots the grand total (1300) past the 5% ceiling.
        let overshoot = validate_answer("le vendite superano 1.400 €", &tools);
        assert!(!overshoot.valid);
        assert_eq!(overshoot.invented_numbers, vec![1400.0]);
    }

    #[test]
    fn test_failed_tools_contribute_no_numbers() {
        let tools = [ToolResult {
            tool_name: "query_metric".to_string(),
            success: false,
            result: Some(json!([{ "result": 847.30 }])),
            error: Some("statement timeout".to_string()),
            metric_name: None,
        }];
        let report = validate_answer("il totale è 847,30 €", &tools);
        assert!(report.numbers_from_tools.is_empty());
        assert!(!report.valid);
        assert_eq!(report.invented_numbers, vec![847.30]);
    }

    #[test]
    fn test_date_ranges_in_the_answer_are_ignored() {
        let tools = [aggregate_result(json!([{ "totale": 512.40 }]))];
        let report = validate_answer(
            "tra il 01/03/2024 e il 31/03/2024 hai incassato 512,40 €",
            &tools,
        );
        assert!(report.valid, "errors: {:?}", report.errors);
        assert_eq!(report.numbers_in_answer, vec![512.40]);
    }

    #[test]
    fn test_comparison_payload_numbers_are_all_traceable() {
        // A compare_periods result carries both period values, the delta and
        // the percent change; an answer quoting any of them must pass.
        let tools = [ToolResult {
            tool_name: "compare_periods".to_string(),
            success: true,
            result: Some(json!([{
                "period1": { "value": 820.0 },
                "period2": { "value": 902.0 },
                "delta": 82.0,
                "percentChange": 10.0,
            }])),
            error: None,
            metric_name: None,
        }];
        let report = validate_answer(
            "sei passato da 820 € a 902 €, cioè 82 € in più (+10%)",
            &tools,
        );
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_range_violation_blocks_but_keeps_the_evidence() {
        let tools = [ToolResult {
            tool_name: "query_metric".to_string(),
            success: true,
            result: Some(json!({ "rows": [{ "result": 130.0 }], "rowCount": 1 })),
            error: None,
            metric_name: Some("gross_margin_percent".to_string()),
        }];
        // 130 is quoted faithfully, but a margin percentage cannot exceed
        // 100: the range rule blocks the answer anyway.
        let report = validate_answer("il margine lordo è al 130%", &tools);
        assert!(!report.valid);
        assert!(report.invented_numbers.is_empty());
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("gross_margin_percent")));
        assert!(report.numbers_from_tools.contains(&130.0));
    }
}
