#[cfg(test)]
mod tests {
    use starling::model::LogicalRole;
    use starling::semantic::detect::{
        analyze_columns, auto_detect_all_columns, ColumnObservation, ColumnStatistics, CustomRule,
        RuleMatch, CUSTOM_RULE_CONFIDENCE,
    };
    use starling::semantic::{
        new_proposal, resolve_with_aliases, thresholds, MappingStatus,
    };

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_role_uniqueness_across_competing_columns() {
        // Both names match the price role; exactly one may claim it.
        let proposals = auto_detect_all_columns(&cols(&["prezzo", "prezzo_unitario"]), &[]);
        let price: Vec<_> = proposals
            .iter()
            .filter(|p| p.role == LogicalRole::Price)
            .collect();
        assert_eq!(price.len(), 1);

        let loser = if price[0].physical_column == "prezzo" {
            "prezzo_unitario"
        } else {
            "prezzo"
        };
        assert!(!proposals.iter().any(|p| p.physical_column == loser));
    }

    #[test]
    fn test_typical_pos_header_maps_multiple_roles() {
        let proposals = auto_detect_all_columns(
            &cols(&["data_ordine", "prezzo", "quantita", "categoria", "totale_netto"]),
            &[],
        );
        let role_of = |name: &str| {
            proposals
                .iter()
                .find(|p| p.physical_column == name)
                .map(|p| p.role)
        };
        assert_eq!(role_of("prezzo"), Some(LogicalRole::Price));
        assert_eq!(role_of("quantita"), Some(LogicalRole::Quantity));
        assert_eq!(role_of("categoria"), Some(LogicalRole::Category));
        for p in &proposals {
            assert!(p.confidence >= thresholds::DETECT_FLOOR);
        }
    }

    #[test]
    fn test_custom_rule_beats_builtin_registry() {
        let rules = vec![CustomRule {
            match_type: RuleMatch::Contains,
            pattern: "reparto".to_string(),
            role: LogicalRole::Category,
            priority: 0,
        }];
        let proposals = auto_detect_all_columns(&cols(&["reparto_vendita"]), &rules);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].role, LogicalRole::Category);
        assert_eq!(proposals[0].confidence, CUSTOM_RULE_CONFIDENCE);
    }

    #[test]
    fn test_proposal_lifecycle_thresholds() {
        // Critical role below the strict bar stays pending.
        let pending = new_proposal(7, "prezzo_listino", LogicalRole::Price, 0.92);
        assert_eq!(pending.status, MappingStatus::Pending);
        assert!(!pending.auto_approved);
        assert!(pending.is_critical);

        // Same confidence on a non-critical role auto-approves.
        let approved = new_proposal(7, "canale", LogicalRole::SalesChannel, 0.92);
        assert_eq!(approved.status, MappingStatus::Confirmed);
        assert!(approved.auto_approved);
    }

    #[test]
    fn test_alias_resolution() {
        let confirmed = vec![(LogicalRole::OrderId, "numero_ordine".to_string())];
        assert_eq!(
            resolve_with_aliases(LogicalRole::DocumentId, &confirmed),
            Some("numero_ordine")
        );
        assert_eq!(resolve_with_aliases(LogicalRole::Quantity, &confirmed), None);
    }

    #[test]
    fn test_data_evidence_agreement_and_conflict() {
        let agreeing = ColumnObservation {
            physical_column: "prezzo".to_string(),
            sample_values: vec!["12.5".to_string(), "9.9".to_string(), "22.0".to_string()],
            statistics: Some(ColumnStatistics {
                min: Some(5.0),
                max: Some(40.0),
                avg: Some(15.0),
                null_count: 0,
                distinct_count: 50,
                total_count: 300,
            }),
        };
        let suggestions = analyze_columns(&[agreeing]);
        let p = &suggestions.proposals[0];
        assert_eq!(p.role, LogicalRole::Price);
        assert_eq!(p.confidence, thresholds::AUTO_CAP);
        assert!(suggestions.warnings.is_empty());
    }

    #[test]
    fn test_unmapped_is_a_valid_terminal_state() {
        let opaque = ColumnObservation {
            physical_column: "colonna_17".to_string(),
            sample_values: vec!["abc".to_string(), "def".to_string()],
            statistics: None,
        };
        let suggestions = analyze_columns(&[opaque]);
        assert!(suggestions.proposals.is_empty());
        assert_eq!(suggestions.unmapped_columns, vec!["colonna_17".to_string()]);
    }
}
