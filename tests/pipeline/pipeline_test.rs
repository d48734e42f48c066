//! Full pipeline over one uploaded file, without a database: sampled rows
//! are classified, roles are detected and promoted to mappings, a metric is
//! compiled against the resulting schema, and the narrated answer is checked
//! against the numbers the tools produced.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use starling::classify::ColumnClassifier;
    use starling::dsl::{translate, validate_metric};
    use starling::model::{DataType, DistributedSample, LogicalRole};
    use starling::semantic::{auto_detect_all_columns, new_proposal, MappingStatus};
    use starling::validate::{validate_answer, ToolResult};

    fn uploaded_sample() -> DistributedSample {
        DistributedSample {
            columns: vec![
                "data".to_string(),
                "prezzo".to_string(),
                "qta".to_string(),
                "categoria".to_string(),
            ],
            rows: vec![
                vec![json!("05/03/2024"), json!("12,50"), json!(2), json!("Cibo")],
                vec![json!("05/03/2024"), json!("4,00"), json!(3), json!("Bevande")],
                vec![json!("06/03/2024"), json!("8,00"), json!(1), json!("Cibo")],
                vec![json!("07/03/2024"), json!("6,50"), json!(2), json!("Dolci")],
            ],
            total_row_count: 8_000,
        }
    }

    #[tokio::test]
    async fn test_sample_to_compiled_metric() {
        // Classification decides the physical types.
        let discovered = ColumnClassifier::new()
            .discover_columns(&uploaded_sample(), "vendite_marzo.csv", &HashMap::new())
            .await;
        let type_of = |name: &str| {
            discovered
                .columns
                .iter()
                .find(|c| c.original_name == name)
                .map(|c| c.data_type)
        };
        assert_eq!(type_of("data"), Some(DataType::Date));
        assert_eq!(type_of("prezzo"), Some(DataType::Numeric));
        assert_eq!(type_of("qta"), Some(DataType::Integer));
        assert_eq!(type_of("categoria"), Some(DataType::Text));

        // Role detection binds the headers to the business vocabulary.
        let headers: Vec<String> = uploaded_sample().columns;
        let proposals = auto_detect_all_columns(&headers, &[]);
        let column_for = |role: LogicalRole| {
            proposals
                .iter()
                .find(|p| p.role == role)
                .map(|p| p.physical_column.clone())
        };
        assert_eq!(column_for(LogicalRole::Price), Some("prezzo".to_string()));
        assert_eq!(column_for(LogicalRole::Quantity), Some("qta".to_string()));
        assert_eq!(
            column_for(LogicalRole::Category),
            Some("categoria".to_string())
        );

        // Proposals become mappings; each clears or misses its own bar.
        for proposal in &proposals {
            let mapping = new_proposal(
                1,
                proposal.physical_column.as_str(),
                proposal.role,
                proposal.confidence,
            );
            if proposal.confidence >= mapping.auto_approve_threshold() {
                assert_eq!(mapping.status, MappingStatus::Confirmed);
                assert!(mapping.auto_approved);
            } else {
                assert_eq!(mapping.status, MappingStatus::Pending);
            }
        }

        // The metric compiles against the confirmed physical columns.
        let metric = validate_metric("SUM(prezzo) * SUM(qta)");
        assert!(metric.is_valid, "errors: {:?}", metric.errors);
        assert!(metric.validate_against_schema(&headers).is_empty());
        let compiled = translate(&metric, "ds_1_vendite_marzo").unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT (SUM(\"prezzo\") * SUM(\"qta\")) AS result FROM \"ds_1_vendite_marzo\""
        );
        assert!(compiled.parameters.is_empty());
    }

    #[tokio::test]
    async fn test_answer_is_grounded_in_tool_output() {
        let tools = [
            ToolResult {
                tool_name: "query_metric".to_string(),
                success: true,
                result: Some(json!({ "rows": [{ "result": 248.0 }], "rowCount": 1 })),
                error: None,
                metric_name: None,
            },
            ToolResult {
                tool_name: "aggregate_group".to_string(),
                success: true,
                result: Some(json!([
                    { "categoria": "Cibo", "sum_importo": 156.0 },
                    { "categoria": "Bevande", "sum_importo": 92.0 },
                ])),
                error: None,
                metric_name: None,
            },
        ];

        // Every figure traces back: the scalar metric, a group row, and the
        // sum of the grouped rows.
        let grounded = validate_answer(
            "Hai incassato 248,00 €: 156 € di cibo e 92 € di bevande.",
            &tools,
        );
        assert!(grounded.valid, "errors: {:?}", grounded.errors);
        assert!(grounded.invented_numbers.is_empty());

        // The same tools cannot back a figure nobody computed: 200 matches
        // no tool value, no rounding, and sits below the partial-total band.
        let fabricated = validate_answer("Hai incassato 200,00 € questo mese.", &tools);
        assert!(!fabricated.valid);
        assert_eq!(fabricated.invented_numbers, vec![200.0]);
    }
}
