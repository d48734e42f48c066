//! Cross-file join detection.
//!
//! Independently uploaded spreadsheets rarely declare their relationships.
//! The detector profiles each file's columns, proposes (FK → PK) candidates
//! from value overlap plus name evidence, rejects anything a safety guard
//! objects to, and assembles a star schema around the largest file. Zero
//! joins is a perfectly valid outcome; a wrong join never is.

pub mod guards;
pub mod profile;
pub mod scoring;

pub use guards::{GuardContext, GuardRejection};
pub use profile::{ColumnProfile, ColumnRole, FileProfile};
pub use scoring::ScoringFactors;

use std::collections::HashMap;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classify::hints::sanitize_column_name;
use scoring::{coverage as coverage_limits, weights};

// ============================================================================
// Candidate types
// ============================================================================

/// Which evidence family carried a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    ExactName,
    IdRoot,
    SemanticRoot,
    ValueOverlap,
}

/// A scored (FK → PK) join proposal between two files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCandidate {
    /// File holding the foreign key.
    pub source_file: String,
    pub source_column: String,
    /// File holding the referenced key.
    pub target_file: String,
    pub target_column: String,
    pub coverage: f64,
    pub raw_score: f64,
    pub confidence: f64,
    pub match_type: MatchType,
}

/// One join accepted into the star.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedJoin {
    /// The file this join attaches to the star.
    pub attached_file: String,
    pub candidate: JoinCandidate,
    /// True when the relaxed fallback pass accepted it.
    pub relaxed: bool,
}

/// The assembled star schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPlan {
    /// The fact table: the file with the most rows.
    pub fact_file: String,
    /// Attachment order, fact first.
    pub join_order: Vec<String>,
    pub joins: Vec<PlannedJoin>,
    /// Files no acceptable join could attach. Excluded from the SQL.
    pub orphans: Vec<String>,
    pub overall_confidence: f64,
}

/// Generated join view.
#[derive(Debug, Clone)]
pub struct JoinSql {
    pub sql: String,
    /// Output columns with their provenance.
    pub columns: Vec<OutputColumn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputColumn {
    pub name: String,
    pub source_file: String,
    pub original_name: String,
}

// ============================================================================
// Detector
// ============================================================================

/// Stateless join detection over a batch of file profiles.
pub struct JoinDetector;

struct ProfiledFile<'a> {
    file: &'a FileProfile,
    columns: Vec<ColumnProfile>,
}

impl JoinDetector {
    /// Detect candidates and assemble the star schema.
    ///
    /// Never fails: an ambiguous pair is skipped, an unattachable file
    /// becomes an orphan.
    pub fn detect(files: &[FileProfile]) -> JoinPlan {
        if files.is_empty() {
            return JoinPlan {
                fact_file: String::new(),
                join_order: Vec::new(),
                joins: Vec::new(),
                orphans: Vec::new(),
                overall_confidence: 0.0,
            };
        }

        let profiled: Vec<ProfiledFile<'_>> = files
            .iter()
            .map(|f| ProfiledFile {
                file: f,
                columns: f.profile_columns(),
            })
            .collect();

        let fact_idx = profiled
            .iter()
            .enumerate()
            .max_by_key(|(_, p)| p.file.row_count)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let fact_file = profiled[fact_idx].file.filename.clone();
        debug!(fact = %fact_file, files = files.len(), "join detection started");

        let candidates = generate_candidates(&profiled, fact_idx);
        let plan = assemble_star(&profiled, fact_idx, candidates);
        info!(
            fact = %plan.fact_file,
            joins = plan.joins.len(),
            orphans = plan.orphans.len(),
            confidence = plan.overall_confidence,
            "join plan assembled"
        );
        plan
    }

    /// Render the plan as one LEFT JOIN SELECT with collision-safe aliases.
    /// Orphans are left out entirely; no partial or cross joins.
    pub fn build_join_sql(
        files: &[FileProfile],
        plan: &JoinPlan,
        staging_tables: &HashMap<String, String>,
    ) -> JoinSql {
        let by_name: HashMap<&str, &FileProfile> =
            files.iter().map(|f| (f.filename.as_str(), f)).collect();

        let mut select_parts: Vec<String> = Vec::new();
        let mut columns: Vec<OutputColumn> = Vec::new();
        let mut used_names: Vec<String> = Vec::new();
        let mut aliases: HashMap<&str, String> = HashMap::new();

        let mut push_columns =
            |file: &FileProfile,
             alias: &str,
             select_parts: &mut Vec<String>,
             columns: &mut Vec<OutputColumn>,
             used_names: &mut Vec<String>| {
                for col in &file.columns {
                    let sanitized = sanitize_column_name(col);
                    let unique = if used_names.contains(&sanitized) {
                        format!("{alias}_{sanitized}")
                    } else {
                        sanitized.clone()
                    };
                    used_names.push(unique.clone());
                    select_parts.push(format!("\"{alias}\".\"{sanitized}\" AS \"{unique}\""));
                    columns.push(OutputColumn {
                        name: unique,
                        source_file: file.filename.clone(),
                        original_name: col.clone(),
                    });
                }
            };

        let Some(fact) = by_name.get(plan.fact_file.as_str()) else {
            return JoinSql {
                sql: String::new(),
                columns,
            };
        };
        let fact_alias = fact.table_name.clone();
        aliases.insert(fact.filename.as_str(), fact_alias.clone());
        push_columns(fact, &fact_alias, &mut select_parts, &mut columns, &mut used_names);

        let fact_staging = staging_tables
            .get(&plan.fact_file)
            .cloned()
            .unwrap_or_else(|| fact.table_name.clone());
        let mut from_clause = format!("\"{fact_staging}\" AS \"{fact_alias}\"");

        for (i, planned) in plan.joins.iter().enumerate() {
            let Some(file) = by_name.get(planned.attached_file.as_str()) else {
                continue;
            };
            let mut alias = file.table_name.clone();
            if aliases.values().any(|a| *a == alias) {
                alias = format!("{}_{}", alias, i + 1);
            }
            aliases.insert(file.filename.as_str(), alias.clone());
            push_columns(file, &alias, &mut select_parts, &mut columns, &mut used_names);

            let c = &planned.candidate;
            // The attached file sits on one side of the candidate; the other
            // side is already in the star and has an alias.
            let (other_file, other_col, own_col) = if c.source_file == planned.attached_file {
                (c.target_file.as_str(), &c.target_column, &c.source_column)
            } else {
                (c.source_file.as_str(), &c.source_column, &c.target_column)
            };
            let other_alias = aliases
                .get(other_file)
                .cloned()
                .unwrap_or_else(|| other_file.to_string());
            let staging = staging_tables
                .get(&planned.attached_file)
                .cloned()
                .unwrap_or_else(|| file.table_name.clone());
            from_clause.push_str(&format!(
                "\nLEFT JOIN \"{}\" AS \"{}\" ON \"{}\".\"{}\" = \"{}\".\"{}\"",
                staging,
                alias,
                other_alias,
                sanitize_column_name(other_col),
                alias,
                sanitize_column_name(own_col),
            ));
        }

        JoinSql {
            sql: format!("SELECT {}\nFROM {}", select_parts.join(",\n  "), from_clause),
            columns,
        }
    }
}

// ============================================================================
// Candidate generation
// ============================================================================

fn coverage_of(fk_values: &[String], pk_values: &[String]) -> f64 {
    use std::collections::HashSet;
    let fk_distinct: HashSet<&str> = fk_values.iter().map(String::as_str).collect();
    if fk_distinct.is_empty() {
        return 0.0;
    }
    let pk_set: HashSet<&str> = pk_values.iter().map(String::as_str).collect();
    let hits = fk_distinct.iter().filter(|v| pk_set.contains(**v)).count();
    hits as f64 / fk_distinct.len() as f64
}

fn match_type_of(factors: &ScoringFactors) -> MatchType {
    if factors.exact_name {
        MatchType::ExactName
    } else if factors.shared_id_root {
        MatchType::IdRoot
    } else if factors.shared_semantic_root {
        MatchType::SemanticRoot
    } else {
        MatchType::ValueOverlap
    }
}

fn generate_candidates(profiled: &[ProfiledFile<'_>], fact_idx: usize) -> Vec<JoinCandidate> {
    let mut candidates = Vec::new();

    for (si, source) in profiled.iter().enumerate() {
        for (ti, target) in profiled.iter().enumerate() {
            if si == ti {
                continue;
            }
            for pk in target.columns.iter().filter(|c| c.is_pk_candidate()) {
                let pk_values = target
                    .file
                    .sample_values
                    .get(&pk.name)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);

                for fk in &source.columns {
                    if fk.role == ColumnRole::Measure {
                        continue;
                    }
                    let fk_values = source
                        .file
                        .sample_values
                        .get(&fk.name)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    let coverage = coverage_of(fk_values, pk_values);
                    let factors = ScoringFactors::extract(fk, pk, coverage);

                    let proposable = coverage >= coverage_limits::MIN
                        || (factors.exact_name && coverage >= coverage_limits::MIN_EXACT_NAME);
                    if !proposable {
                        continue;
                    }

                    let ctx = GuardContext {
                        fk_is_fact: si == fact_idx,
                        fk_rows: source.file.row_count,
                        pk_rows: target.file.row_count,
                    };
                    if let Some(rejection) = guards::check(fk, pk, &factors, ctx) {
                        debug!(
                            source = %source.file.filename,
                            fk = %fk.name,
                            target = %target.file.filename,
                            pk = %pk.name,
                            reason = rejection.as_str(),
                            "join candidate rejected by guard"
                        );
                        continue;
                    }

                    candidates.push(JoinCandidate {
                        source_file: source.file.filename.clone(),
                        source_column: fk.name.clone(),
                        target_file: target.file.filename.clone(),
                        target_column: pk.name.clone(),
                        coverage,
                        raw_score: factors.score(),
                        confidence: factors.confidence(),
                        match_type: match_type_of(&factors),
                    });
                }
            }
        }
    }

    candidates
}

// ============================================================================
// Star assembly
// ============================================================================

fn assemble_star(
    profiled: &[ProfiledFile<'_>],
    fact_idx: usize,
    candidates: Vec<JoinCandidate>,
) -> JoinPlan {
    let n = profiled.len();
    let index_of: HashMap<&str, usize> = profiled
        .iter()
        .enumerate()
        .map(|(i, p)| (p.file.filename.as_str(), i))
        .collect();

    // Best candidate per unordered file pair becomes a graph edge.
    let mut graph: UnGraph<usize, JoinCandidate> = UnGraph::new_undirected();
    let nodes: Vec<NodeIndex> = (0..n).map(|i| graph.add_node(i)).collect();
    let mut best_per_pair: HashMap<(usize, usize), JoinCandidate> = HashMap::new();
    for c in candidates {
        let a = index_of[c.source_file.as_str()];
        let b = index_of[c.target_file.as_str()];
        let key = (a.min(b), a.max(b));
        match best_per_pair.get(&key) {
            Some(existing) if existing.raw_score >= c.raw_score => {}
            _ => {
                best_per_pair.insert(key, c);
            }
        }
    }
    for ((a, b), c) in best_per_pair {
        graph.add_edge(nodes[a], nodes[b], c);
    }

    let mut connected = vec![false; n];
    connected[fact_idx] = true;
    let mut join_order = vec![profiled[fact_idx].file.filename.clone()];
    let mut joins: Vec<PlannedJoin> = Vec::new();

    // Pass 1: normal floor, direct-to-fact preferred, then transitive.
    // Pass 2: relaxed floor, overlap still required.
    for (floor, relaxed) in [
        (weights::ACCEPT_FLOOR, false),
        (weights::ACCEPT_FLOOR - weights::RELAXED_FLOOR_DROP, true),
    ] {
        loop {
            let mut best: Option<(usize, JoinCandidate)> = None;
            for i in 0..n {
                if connected[i] {
                    continue;
                }
                for edge in graph.edges(nodes[i]) {
                    let other = if edge.source() == nodes[i] {
                        edge.target()
                    } else {
                        edge.source()
                    };
                    if !connected[graph[other]] {
                        continue;
                    }
                    let c = edge.weight();
                    if c.raw_score < floor {
                        continue;
                    }
                    if relaxed && c.coverage < coverage_limits::RELAXED_MIN {
                        continue;
                    }
                    // Prefer edges straight into the fact table at equal
                    // score.
                    let direct = graph[other] == fact_idx;
                    let better = match &best {
                        None => true,
                        Some((_, b)) => {
                            c.raw_score > b.raw_score
                                || (c.raw_score == b.raw_score && direct)
                        }
                    };
                    if better {
                        best = Some((i, c.clone()));
                    }
                }
            }
            match best {
                Some((i, candidate)) => {
                    connected[i] = true;
                    join_order.push(profiled[i].file.filename.clone());
                    joins.push(PlannedJoin {
                        attached_file: profiled[i].file.filename.clone(),
                        candidate,
                        relaxed,
                    });
                }
                None => break,
            }
        }
    }

    let orphans: Vec<String> = (0..n)
        .filter(|&i| !connected[i])
        .map(|i| profiled[i].file.filename.clone())
        .collect();

    let overall_confidence = if joins.is_empty() {
        0.0
    } else {
        joins.iter().map(|j| j.candidate.confidence).sum::<f64>() / joins.len() as f64
    };

    JoinPlan {
        fact_file: profiled[fact_idx].file.filename.clone(),
        join_order,
        joins,
        orphans,
        overall_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(
        name: &str,
        table: &str,
        rows: u64,
        cols: &[(&str, Vec<String>)],
    ) -> FileProfile {
        FileProfile::new(
            name,
            table,
            cols.iter().map(|(n, _)| n.to_string()).collect(),
            cols.iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
            rows,
        )
    }

    fn ints(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| i.to_string()).collect()
    }

    #[test]
    fn subset_fk_into_unique_pk_is_proposed() {
        let vendite = file(
            "vendite.csv",
            "vendite",
            10_000,
            &[
                ("cliente_id", ints(0..80)),
                ("importo", (0..80).map(|i| format!("{i}.50")).collect()),
            ],
        );
        let clienti = file(
            "clienti.csv",
            "clienti",
            100,
            &[("id", ints(0..100)), ("nominativo", ints(0..100))],
        );
        let plan = JoinDetector::detect(&[vendite, clienti]);
        assert_eq!(plan.fact_file, "vendite.csv");
        assert_eq!(plan.joins.len(), 1);
        let j = &plan.joins[0].candidate;
        assert_eq!(j.source_column, "cliente_id");
        assert_eq!(j.target_column, "id");
        assert!(j.confidence > 0.5);
        assert!(plan.orphans.is_empty());
    }

    #[test]
    fn tipologia_never_joins_line_id() {
        // Category values 0..3 numerically overlap the id space completely.
        let fact = file(
            "vendite.csv",
            "vendite",
            10_000,
            &[("tipologia", (0..400).map(|i| (i % 4).to_string()).collect())],
        );
        let righe = file(
            "righe.csv",
            "righe",
            400,
            &[("line_id", ints(0..400))],
        );
        let plan = JoinDetector::detect(&[fact, righe]);
        assert!(plan.joins.is_empty());
        assert_eq!(plan.orphans, vec!["righe.csv".to_string()]);
    }

    #[test]
    fn single_file_yields_zero_joins() {
        let only = file("unico.csv", "unico", 50, &[("id", ints(0..50))]);
        let plan = JoinDetector::detect(&[only]);
        assert!(plan.joins.is_empty());
        assert!(plan.orphans.is_empty());
        assert_eq!(plan.join_order, vec!["unico.csv".to_string()]);
    }

    #[test]
    fn join_sql_uses_left_joins_and_safe_aliases() {
        let vendite = file(
            "vendite.csv",
            "vendite",
            10_000,
            &[("cliente_id", ints(0..80)), ("qta", ints(0..80))],
        );
        let clienti = file(
            "clienti.csv",
            "clienti",
            100,
            &[("cliente_id", ints(0..100)), ("nominativo", ints(0..100))],
        );
        let plan = JoinDetector::detect(&[vendite.clone(), clienti.clone()]);
        let staging: HashMap<String, String> = [
            ("vendite.csv".to_string(), "stg_vendite".to_string()),
            ("clienti.csv".to_string(), "stg_clienti".to_string()),
        ]
        .into();
        let built = JoinDetector::build_join_sql(&[vendite, clienti], &plan, &staging);
        assert!(built.sql.contains("LEFT JOIN \"stg_clienti\""));
        assert!(built.sql.contains("\"vendite\".\"cliente_id\" = \"clienti\".\"cliente_id\""));
        // Duplicate column name from the joined file gets a prefixed alias.
        assert!(built
            .columns
            .iter()
            .any(|c| c.name == "clienti_cliente_id"));
        assert!(!built.sql.contains("CROSS JOIN"));
    }
}
