#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::json;
    use starling::classify::{
        thresholds, ColumnClassifier, ColumnIntel, IntelError, IntelQuery, IntelSuggestion,
        SavedColumn,
    };
    use starling::model::{DataType, DistributedSample};

    fn pos_export_sample() -> DistributedSample {
        DistributedSample {
            columns: vec![
                "Data".to_string(),
                "Descrizione".to_string(),
                "Quantita".to_string(),
                "PrezzoUnitario".to_string(),
                "Totale".to_string(),
            ],
            rows: vec![
                vec![
                    json!("01/03/2024"),
                    json!("Pizza Margherita"),
                    json!(2),
                    json!("8,50"),
                    json!("17,00"),
                ],
                vec![
                    json!("01/03/2024"),
                    json!("Birra Media"),
                    json!(3),
                    json!("5,00"),
                    json!("15,00"),
                ],
                vec![
                    json!("02/03/2024"),
                    json!("Tiramisu"),
                    json!(1),
                    json!("6,00"),
                    json!("6,00"),
                ],
            ],
            total_row_count: 12_000,
        }
    }

    #[tokio::test]
    async fn test_pos_export_classifies_and_auto_confirms() {
        let sample = pos_export_sample();
        let result = ColumnClassifier::new()
            .discover_columns(&sample, "vendite_marzo.csv", &HashMap::new())
            .await;

        assert_eq!(result.columns.len(), 5);
        let by_name: HashMap<&str, DataType> = result
            .columns
            .iter()
            .map(|c| (c.original_name.as_str(), c.data_type))
            .collect();
        assert_eq!(by_name["Data"], DataType::Date);
        assert_eq!(by_name["Descrizione"], DataType::Text);
        assert_eq!(by_name["Quantita"], DataType::Integer);
        assert_eq!(by_name["PrezzoUnitario"], DataType::Numeric);
        assert_eq!(by_name["Totale"], DataType::Numeric);

        assert!(result.overall_confidence >= thresholds::AUTO_CONFIRM_MEAN);
        assert!(result.auto_confirmed);
        assert!(!result.intel_used);
    }

    #[tokio::test]
    async fn test_classification_is_pure() {
        let sample = pos_export_sample();
        let classifier = ColumnClassifier::new();
        let first = classifier
            .discover_columns(&sample, "vendite.csv", &HashMap::new())
            .await;
        let second = classifier
            .discover_columns(&sample, "vendite.csv", &HashMap::new())
            .await;
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_saved_mappings_win_over_heuristics() {
        let sample = pos_export_sample();
        let mut saved = HashMap::new();
        saved.insert(
            "Descrizione".to_string(),
            SavedColumn {
                suggested_name: "nome_prodotto".to_string(),
                data_type: DataType::Text,
            },
        );
        let result = ColumnClassifier::new()
            .discover_columns(&sample, "vendite.csv", &saved)
            .await;
        let col = result
            .columns
            .iter()
            .find(|c| c.original_name == "Descrizione")
            .unwrap();
        assert_eq!(col.suggested_name, "nome_prodotto");
        assert_eq!(col.confidence, thresholds::SAVED_MAPPING);
        assert_eq!(col.evidence.as_deref(), Some("SAVED_MAPPING"));
    }

    struct FailingIntel;

    #[async_trait::async_trait]
    impl ColumnIntel for FailingIntel {
        async fn classify_batch(
            &self,
            _filename: &str,
            _queries: &[IntelQuery],
        ) -> Result<Vec<IntelSuggestion>, IntelError> {
            Err(IntelError::Provider("model endpoint offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_intel_failure_keeps_heuristic_result() {
        let sample = DistributedSample {
            columns: vec!["prezzo".to_string(), "boh".to_string()],
            rows: vec![
                vec![json!("12,50"), json!("x1")],
                vec![json!("9,90"), json!("y2")],
            ],
            total_row_count: 100,
        };
        let with_intel = ColumnClassifier::with_intel(Arc::new(FailingIntel))
            .discover_columns(&sample, "misto.csv", &HashMap::new())
            .await;
        let without = ColumnClassifier::new()
            .discover_columns(&sample, "misto.csv", &HashMap::new())
            .await;

        assert!(!with_intel.intel_used);
        assert_eq!(
            serde_json::to_value(&with_intel.columns).unwrap(),
            serde_json::to_value(&without.columns).unwrap()
        );
    }
}
