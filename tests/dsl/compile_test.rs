#[cfg(test)]
mod tests {
    use starling::dsl::{
        compute_query_hash, translate, validate_metric, AggregateFn, BinaryOp, ColumnArg,
        ComparisonOp, FilterValue, MetricExpr, SqlParam,
    };

    fn schema(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filtered_grouped_metric_round_trip() {
        let metric = validate_metric("SUM(importo) WHERE categoria = \"cibo\" GROUP BY categoria");
        assert!(metric.is_valid, "errors: {:?}", metric.errors);
        assert_eq!(
            metric.referenced_columns,
            vec!["categoria".to_string(), "importo".to_string()]
        );
        assert_eq!(metric.group_by, Some(vec!["categoria".to_string()]));
        assert_eq!(metric.filters.len(), 1);
        assert_eq!(metric.filters[0].operator, ComparisonOp::Eq);
        assert_eq!(metric.filters[0].value, FilterValue::Text("cibo".into()));
    }

    #[test]
    fn test_unknown_column_is_named_in_the_schema_check() {
        let metric = validate_metric("SUM(unknown_col)");
        assert!(metric.is_valid);
        let missing = metric.validate_against_schema(&schema(&["price", "qty"]));
        assert_eq!(missing, vec!["unknown_col".to_string()]);
    }

    #[test]
    fn test_product_of_sums_end_to_end() {
        // The canonical two-aggregate metric: gross revenue as price times
        // quantity, no filters, no bind parameters.
        let metric = validate_metric("SUM(prezzo) * SUM(qta)");
        assert!(metric.is_valid);
        assert!(metric
            .validate_against_schema(&schema(&["prezzo", "qta", "categoria"]))
            .is_empty());

        let compiled = translate(&metric, "stg_dataset_42").unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT (SUM(\"prezzo\") * SUM(\"qta\")) AS result FROM \"stg_dataset_42\""
        );
        assert!(compiled.parameters.is_empty());
    }

    #[test]
    fn test_star_is_wildcard_inside_count_and_multiplies_outside() {
        let metric = validate_metric("COUNT(*) * 2");
        assert!(metric.is_valid, "errors: {:?}", metric.errors);
        match metric.expression {
            MetricExpr::Binary {
                operator,
                ref left,
                ..
            } => {
                assert_eq!(operator, BinaryOp::Mul);
                assert_eq!(
                    **left,
                    MetricExpr::Aggregate {
                        function: AggregateFn::Count,
                        column: ColumnArg::Star,
                    }
                );
            }
            ref other => panic!("unexpected expression: {other:?}"),
        }
        // COUNT(*) references no columns, so any schema passes.
        assert!(metric.validate_against_schema(&schema(&[])).is_empty());
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let grouped = validate_metric("(SUM(a) + SUM(b)) / COUNT(c)");
        assert!(grouped.is_valid);
        let compiled = translate(&grouped, "t").unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT ((SUM(\"a\") + SUM(\"b\")) / COUNT(\"c\")) AS result FROM \"t\""
        );
    }

    #[test]
    fn test_mixed_filters_number_parameters_keep_their_type() {
        let metric = validate_metric(
            "AVG(importo) WHERE qta >= 3 AND categoria != 'omaggio'",
        );
        assert!(metric.is_valid);
        let compiled = translate(&metric, "vendite_q1").unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT AVG(\"importo\") AS result FROM \"vendite_q1\" \
             WHERE \"qta\" >= $1::float8 AND \"categoria\"::text != $2::text"
        );
        assert_eq!(
            compiled.parameters,
            vec![
                SqlParam::Number(3.0),
                SqlParam::Text("omaggio".to_string())
            ]
        );
    }

    #[test]
    fn test_invalid_expressions_never_reach_sql() {
        for source in [
            "SUM(",
            "importo + 1",
            "SUM(a) WHERE categoria",
            "GROUP BY x",
            "",
            "SUM(importo) WHERE",
            "SUM(importo) GROUP BY",
            "SUM(importo) WHERE AND qta >= 2",
        ] {
            let metric = validate_metric(source);
            assert!(!metric.is_valid, "{source:?} should not parse");
            assert!(!metric.errors.is_empty(), "{source:?} must carry errors");
            assert!(
                translate(&metric, "t").is_err(),
                "{source:?} must refuse translation"
            );
        }
    }

    #[test]
    fn test_count_distinct_survives_the_full_pipeline() {
        let metric = validate_metric("COUNT(DISTINCT numero_scontrino)");
        assert!(metric.is_valid);
        assert_eq!(
            metric.referenced_columns,
            vec!["numero_scontrino".to_string()]
        );
        let compiled = translate(&metric, "corrispettivi").unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT COUNT(DISTINCT \"numero_scontrino\") AS result FROM \"corrispettivi\""
        );
    }

    #[test]
    fn test_identical_compilations_share_a_cache_key() {
        let compile = || {
            let metric =
                validate_metric("SUM(importo) WHERE categoria = \"cibo\"");
            translate(&metric, "vendite").unwrap()
        };
        let first = compile();
        let second = compile();
        assert_eq!(
            compute_query_hash(&first.sql, &first.parameters),
            compute_query_hash(&second.sql, &second.parameters)
        );

        let metric = validate_metric("SUM(importo) WHERE categoria = \"bar\"");
        let other = translate(&metric, "vendite").unwrap();
        assert_ne!(
            compute_query_hash(&first.sql, &first.parameters),
            compute_query_hash(&other.sql, &other.parameters)
        );
    }
}
