#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use starling::exec::{
        gate_cardinality, gate_group_cardinality, limits, template, CardinalityDecision,
        DatasetTable, ExecError,
        StaticCatalog, TableCatalogExt, ToolCall,
    };
    use starling::model::{DataType, LogicalRole};

    fn sales_table() -> DatasetTable {
        DatasetTable {
            dataset_id: 42,
            table_name: "ds_42_vendite".to_string(),
            columns: vec![
                "data".to_string(),
                "prezzo".to_string(),
                "qta".to_string(),
                "categoria".to_string(),
            ],
            column_types: HashMap::from([
                ("data".to_string(), DataType::Date),
                ("prezzo".to_string(), DataType::Numeric),
                ("qta".to_string(), DataType::Integer),
                ("categoria".to_string(), DataType::Text),
            ]),
            row_count: 25_000,
        }
    }

    #[tokio::test]
    async fn test_tool_arguments_are_checked_against_the_live_schema() {
        let catalog = StaticCatalog::new();
        catalog.register(sales_table()).await;

        // The planner asked to filter on a column the dataset never had.
        let call: ToolCall = serde_json::from_value(json!({
            "tool": "filter_data",
            "args": {
                "dataset_id": 42,
                "filters": [
                    { "column": "sconto", "operator": "=", "value": 10.0 }
                ]
            }
        }))
        .unwrap();

        let referenced = match &call {
            ToolCall::FilterData { filters, .. } => {
                filters.iter().map(|f| f.column.clone()).collect::<Vec<_>>()
            }
            other => panic!("unexpected call: {other:?}"),
        };
        let err = catalog.resolve_checked(42, &referenced).await.unwrap_err();
        match err {
            ExecError::UnknownColumn { column } => assert_eq!(column, "sconto"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cardinality_gate_reports_the_probe_result() {
        // Grouping by a 10,000-distinct column against the 500-row cap must
        // come back as a confirmation request, not an executed query.
        let decision = gate_cardinality(10_000, limits::MAX_GROUP_BY_ROWS);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "needs_confirmation");
        assert_eq!(json["needsConfirmation"], true);
        assert_eq!(json["distinctCount"], 10_000);
        assert_eq!(json["rowCap"], 500);
        assert_eq!(json["options"].as_array().unwrap().len(), 4);

        assert!(matches!(
            gate_cardinality(499, limits::MAX_GROUP_BY_ROWS),
            CardinalityDecision::Proceed { distinct_count: 499 }
        ));
    }

    #[test]
    fn test_multi_column_group_by_gates_on_the_widest_column() {
        // A 12-distinct category in front must not hide a 10,000-distinct
        // product id behind it.
        let decision = gate_group_cardinality(&[12, 10_000], limits::MAX_GROUP_BY_ROWS);
        match decision {
            CardinalityDecision::NeedsConfirmation(warning) => {
                assert_eq!(warning.distinct_count, 10_000);
                assert_eq!(warning.row_cap, 500);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }

        assert!(matches!(
            gate_group_cardinality(&[12, 40, 7], limits::MAX_GROUP_BY_ROWS),
            CardinalityDecision::Proceed { distinct_count: 40 }
        ));
    }

    #[test]
    fn test_malformed_planner_arguments_fail_deserialization() {
        // Aggregate function outside the whitelist.
        let bad_function: Result<ToolCall, _> = serde_json::from_value(json!({
            "tool": "aggregate_group",
            "args": {
                "dataset_id": 42,
                "group_by": ["categoria"],
                "aggregations": [
                    { "column": "prezzo", "function": "MEDIAN", "alias": null }
                ]
            }
        }));
        assert!(bad_function.is_err());

        // Time grain outside day/week/month/quarter/year.
        let bad_grain: Result<ToolCall, _> = serde_json::from_value(json!({
            "tool": "aggregate_group",
            "args": {
                "dataset_id": 42,
                "group_by": [],
                "aggregations": [
                    { "column": "prezzo", "function": "SUM", "alias": null }
                ],
                "time_bucket": { "column": "data", "grain": "fortnight" }
            }
        }));
        assert!(bad_grain.is_err());
    }

    #[test]
    fn test_role_templates_resolve_over_confirmed_mappings() {
        // Once price and quantity are bound, the gross-revenue template
        // becomes plain SQL over the physical columns.
        let bindings = vec![
            (LogicalRole::Price, "prezzo".to_string()),
            (LogicalRole::Quantity, "qta".to_string()),
        ];
        let sql = template("revenue_gross").unwrap().resolve(&bindings).unwrap();
        assert_eq!(
            sql,
            "SUM(CAST(\"prezzo\" AS NUMERIC) * CAST(\"qta\" AS NUMERIC))"
        );

        // With quantity still unmapped the template refuses to resolve.
        let partial = vec![(LogicalRole::Price, "prezzo".to_string())];
        assert!(matches!(
            template("revenue_gross").unwrap().resolve(&partial),
            Err(ExecError::MissingRole {
                role: LogicalRole::Quantity
            })
        ));
    }

    #[test]
    fn test_hard_caps_match_the_declared_contract() {
        assert_eq!(limits::MAX_GROUP_BY_ROWS, 500);
        assert_eq!(limits::MAX_FILTER_ROWS, 1000);
        assert_eq!(limits::MAX_GROUP_BY_COLUMNS, 3);
        assert_eq!(limits::STATEMENT_TIMEOUT_MS, 3000);
    }
}
