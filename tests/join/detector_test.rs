#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use starling::join::{FileProfile, JoinDetector};

    fn values(prefix: &str, count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("{prefix}{i}")).collect()
    }

    fn samples(pairs: Vec<(&str, Vec<String>)>) -> HashMap<String, Vec<String>> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn order_lines() -> FileProfile {
        // Fact file: FK columns reference subsets of both dimensions.
        FileProfile::new(
            "righe.csv",
            "stg_righe",
            vec![
                "id_riga".to_string(),
                "cliente_id".to_string(),
                "codice_prodotto".to_string(),
                "quantita".to_string(),
                "importo".to_string(),
            ],
            samples(vec![
                ("id_riga", values("R", 200)),
                ("cliente_id", values("C", 80)),
                ("codice_prodotto", values("P", 40)),
                ("quantita", (1..=200).map(|i| (i % 7 + 1).to_string()).collect()),
                ("importo", (1..=200).map(|i| format!("{}.50", i)).collect()),
            ]),
            10_000,
        )
    }

    fn customers() -> FileProfile {
        FileProfile::new(
            "clienti.csv",
            "stg_clienti",
            vec!["cliente_id".to_string(), "ragione_sociale".to_string()],
            samples(vec![
                ("cliente_id", values("C", 100)),
                ("ragione_sociale", values("Azienda ", 100)),
            ]),
            100,
        )
    }

    fn products() -> FileProfile {
        FileProfile::new(
            "prodotti.csv",
            "stg_prodotti",
            vec!["codice_prodotto".to_string(), "descrizione".to_string()],
            samples(vec![
                ("codice_prodotto", values("P", 50)),
                ("descrizione", values("Prodotto ", 50)),
            ]),
            50,
        )
    }

    #[test]
    fn test_two_dimension_star_assembles() {
        let files = vec![order_lines(), customers(), products()];
        let plan = JoinDetector::detect(&files);

        assert_eq!(plan.fact_file, "righe.csv");
        assert_eq!(plan.joins.len(), 2);
        assert!(plan.orphans.is_empty());
        assert!(plan.overall_confidence > 0.5);

        let attached: Vec<&str> = plan.joins.iter().map(|j| j.attached_file.as_str()).collect();
        assert!(attached.contains(&"clienti.csv"));
        assert!(attached.contains(&"prodotti.csv"));
    }

    #[test]
    fn test_subset_fk_scores_above_confidence_floor() {
        let files = vec![order_lines(), customers()];
        let plan = JoinDetector::detect(&files);
        assert_eq!(plan.joins.len(), 1);
        let join = &plan.joins[0];
        let c = &join.candidate;
        // 80 FK values, all present among the 100 unique PK values.
        assert!((c.coverage - 1.0).abs() < 1e-9);
        assert!(c.confidence > 0.5);
        assert_eq!(c.source_column, "cliente_id");
        assert_eq!(c.target_column, "cliente_id");
    }

    #[test]
    fn test_category_column_never_joins_a_line_id() {
        // tipologia holds 3 repeated labels that numerically overlap the
        // dimension's line_id values; the guard must kill it.
        let fact = FileProfile::new(
            "vendite.csv",
            "stg_vendite",
            vec!["tipologia".to_string(), "importo".to_string()],
            samples(vec![
                (
                    "tipologia",
                    (0..300).map(|i| ((i % 3) + 1).to_string()).collect(),
                ),
                ("importo", (1..=300).map(|i| format!("{i}.00")).collect()),
            ]),
            10_000,
        );
        let dimension = FileProfile::new(
            "dettagli.csv",
            "stg_dettagli",
            vec!["line_id".to_string(), "nota".to_string()],
            samples(vec![
                ("line_id", (1..=50).map(|i| i.to_string()).collect()),
                ("nota", values("nota ", 50)),
            ]),
            50,
        );

        let plan = JoinDetector::detect(&[fact, dimension]);
        assert!(plan.joins.is_empty());
        assert_eq!(plan.orphans, vec!["dettagli.csv".to_string()]);
    }

    #[test]
    fn test_join_sql_is_left_join_only() {
        let files = vec![order_lines(), customers()];
        let plan = JoinDetector::detect(&files);
        let staging: HashMap<String, String> = files
            .iter()
            .map(|f| (f.filename.clone(), f.table_name.clone()))
            .collect();
        let sql = JoinDetector::build_join_sql(&files, &plan, &staging);

        assert!(sql.sql.starts_with("SELECT "));
        assert!(sql.sql.contains("LEFT JOIN \"stg_clienti\""));
        assert!(!sql.sql.contains("CROSS JOIN"));
        assert!(!sql.sql.contains("INNER JOIN"));

        // The duplicated cliente_id header must come out under a unique name.
        let output_names: Vec<&str> = sql.columns.iter().map(|c| c.name.as_str()).collect();
        let mut deduped = output_names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), output_names.len());
    }

    #[test]
    fn test_single_file_has_no_joins() {
        let plan = JoinDetector::detect(&[order_lines()]);
        assert_eq!(plan.fact_file, "righe.csv");
        assert!(plan.joins.is_empty());
        assert!(plan.orphans.is_empty());
    }
}
