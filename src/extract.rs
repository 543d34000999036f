//! Feature extraction: plan tree and query text to typed features.
//!
//! Walks the plan depth-first and applies independent detectors per node.
//! Detectors never fail; a malformed or missing field simply suppresses that
//! feature for that node. Patterns that the planner can optimize out of the
//! plan entirely (modulo filters, ORDER BY random()) are additionally
//! searched for in the raw query text, anchored to the principal relation
//! from the FROM clause.

use std::sync::OnceLock;

use chrono::{Duration, NaiveDate};
use regex::Regex;

use crate::catalog::FeatureKind;
use crate::feature::{Feature, FeatureDetail};
use crate::plan::{Plan, PlanNode};

/// Row estimate above which a filterless sequential scan is worth flagging.
pub const DEFAULT_LARGE_TABLE_ROWS: i64 = 100_000;

/// Statistics older than this many days count as stale.
pub const DEFAULT_STATS_STALE_DAYS: i64 = 30;

/// Sorts and hash aggregates below this estimate are not worth a feature.
const MIN_SPILL_EST_MB: f64 = 1.0;

/// Extraction thresholds, overridable from `pgadvise.toml`.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub large_table_rows: i64,
    pub stats_stale_days: i64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            large_table_rows: DEFAULT_LARGE_TABLE_ROWS,
            stats_stale_days: DEFAULT_STATS_STALE_DAYS,
        }
    }
}

/// Side inputs beyond the plan: session settings and statistics age.
#[derive(Debug, Clone, Default)]
pub struct ExtractContext {
    /// `work_mem` in megabytes, when the session settings were fetched
    pub work_mem_mb: Option<f64>,
    /// Per-relation statistics freshness
    pub stats: Vec<RelationStats>,
}

/// Statistics freshness for one relation.
#[derive(Debug, Clone)]
pub struct RelationStats {
    pub relation: String,
    /// Days since last ANALYZE; `None` means never analyzed
    pub days_since_analyze: Option<i64>,
}

/// Extract all features from a plan and the original query text.
pub fn extract_features(
    plan: Option<&Plan>,
    sql: &str,
    ctx: &ExtractContext,
    cfg: &ExtractorConfig,
) -> Vec<Feature> {
    let mut features = Vec::new();
    let mut next_node_id: i64 = 0;

    if let Some(plan) = plan {
        for node in plan.walk() {
            next_node_id += 1;
            detect_node(node, next_node_id, ctx, cfg, &mut features);
        }
    }

    scan_query_text(sql, &mut next_node_id, &mut features);
    detect_stale_stats(ctx, cfg, &mut next_node_id, &mut features);

    features
}

fn detect_node(
    node: &PlanNode,
    node_id: i64,
    ctx: &ExtractContext,
    cfg: &ExtractorConfig,
    out: &mut Vec<Feature>,
) {
    let relation = node.qualified_relation();

    match node.node_type.as_str() {
        "Seq Scan" => {
            let est_rows = node.plan_rows.unwrap_or(0);
            let has_filter = node.filter.is_some();
            if has_filter || est_rows >= cfg.large_table_rows {
                out.push(Feature {
                    node_id,
                    relation: relation.clone(),
                    detail: FeatureDetail::SeqScanBigTable {
                        est_rows,
                        // unknown with a filter, full read without one
                        selectivity: if has_filter { None } else { Some(1.0) },
                    },
                });
            }
            if let Some(filter) = node.filter.as_deref() {
                detect_wrapped_time_column(filter, node_id, relation.as_deref(), out);
            }
        }
        "Sort" => {
            if let Some(keys) = &node.sort_key {
                if let Some(expr) = keys.iter().find(|k| random_re().is_match(k)) {
                    out.push(Feature {
                        node_id,
                        relation: relation.clone(),
                        detail: FeatureDetail::OrderByNondeterministic { expr: expr.clone() },
                    });
                }
            }
            if let Some(mem_est_mb) = node_memory_estimate_mb(node) {
                if mem_est_mb >= MIN_SPILL_EST_MB {
                    out.push(Feature {
                        node_id,
                        relation: relation.clone(),
                        detail: FeatureDetail::SortSpillRisk {
                            mem_est_mb,
                            work_mem_mb: ctx.work_mem_mb,
                        },
                    });
                }
            }
        }
        "Aggregate" | "HashAggregate" => {
            let hashed = node.node_type == "HashAggregate"
                || node.strategy.as_deref() == Some("Hashed");
            if hashed {
                if let Some(mem_est_mb) = node_memory_estimate_mb(node) {
                    if mem_est_mb >= MIN_SPILL_EST_MB {
                        out.push(Feature {
                            node_id,
                            relation: relation.clone(),
                            detail: FeatureDetail::HashaggSpillRisk {
                                mem_est_mb,
                                work_mem_mb: ctx.work_mem_mb,
                            },
                        });
                    }
                }
            }
        }
        _ => {}
    }

    for text in node.condition_texts() {
        if let Some((col, modulus, remainder)) = match_modulo(text) {
            out.push(Feature {
                node_id,
                relation: relation.clone(),
                detail: FeatureDetail::ModuloFilter {
                    col,
                    modulus,
                    remainder,
                },
            });
            break;
        }
    }
}

/// Cast and range detection over one filter text.
///
/// `to_char(col, 'fmt')` on a column compared to string literals is the
/// reference pattern for an index-defeating wrapped column; when both a
/// lower and upper date bound exist on the same column it is also a
/// rewritable time-range query.
fn detect_wrapped_time_column(
    filter: &str,
    node_id: i64,
    relation: Option<&str>,
    out: &mut Vec<Feature>,
) {
    if let Some(caps) = cast_re().captures(filter) {
        out.push(Feature {
            node_id,
            relation: relation.map(|r| r.to_string()),
            detail: FeatureDetail::CastPreventsIndex {
                col: caps[1].to_string(),
                func: "to_char".to_string(),
                format: caps.get(2).map(|m| m.as_str().to_string()),
            },
        });
    }

    let ge = range_ge_re().captures(filter);
    let le = range_le_re().captures(filter);
    if let (Some(ge), Some(le)) = (ge, le) {
        if ge[1] == le[1] {
            let from_date = date_part(&ge[2]);
            let to_date = date_part(&le[2]);
            if from_date.is_empty() || to_date.is_empty() {
                return;
            }
            out.push(Feature {
                node_id,
                relation: relation.map(|r| r.to_string()),
                detail: FeatureDetail::RangeTimeQuery {
                    time_col: ge[1].to_string(),
                    to_date_next: next_day(&to_date),
                    from_date,
                    to_date,
                },
            });
        }
    }
}

/// Fallback scan over the raw query text for patterns the planner may have
/// optimized away. Only emits kinds not already found in the plan.
fn scan_query_text(sql: &str, next_node_id: &mut i64, out: &mut Vec<Feature>) {
    if sql.trim().is_empty() {
        return;
    }
    let relation = principal_relation(sql);

    let have_modulo = out.iter().any(|f| f.kind() == FeatureKind::ModuloFilter);
    if !have_modulo {
        if let Some((col, modulus, remainder)) = match_modulo(sql) {
            *next_node_id += 1;
            out.push(Feature {
                node_id: *next_node_id,
                relation: relation.clone(),
                detail: FeatureDetail::ModuloFilter {
                    col,
                    modulus,
                    remainder,
                },
            });
        }
    }

    let have_nondet = out
        .iter()
        .any(|f| f.kind() == FeatureKind::OrderByNondeterministic);
    if !have_nondet && order_by_random_re().is_match(sql) {
        *next_node_id += 1;
        out.push(Feature {
            node_id: *next_node_id,
            relation,
            detail: FeatureDetail::OrderByNondeterministic {
                expr: "random()".to_string(),
            },
        });
    }
}

fn detect_stale_stats(
    ctx: &ExtractContext,
    cfg: &ExtractorConfig,
    next_node_id: &mut i64,
    out: &mut Vec<Feature>,
) {
    for stat in &ctx.stats {
        let stale = match stat.days_since_analyze {
            Some(days) => days >= cfg.stats_stale_days,
            None => true, // never analyzed
        };
        if stale {
            *next_node_id += 1;
            out.push(Feature {
                node_id: *next_node_id,
                relation: Some(stat.relation.clone()),
                detail: FeatureDetail::OutdatedStats {
                    days_since_analyze: stat.days_since_analyze,
                },
            });
        }
    }
}

/// Estimated working memory of a node in MB, from rows x width.
fn node_memory_estimate_mb(node: &PlanNode) -> Option<f64> {
    let rows = node.plan_rows?;
    let width = node.plan_width?;
    if rows < 0 || width < 0 {
        return None;
    }
    Some(rows as f64 * width as f64 / (1024.0 * 1024.0))
}

fn match_modulo(text: &str) -> Option<(String, i64, i64)> {
    let caps = modulo_re().captures(text)?;
    let col = caps[1].to_string();
    let modulus: i64 = caps[2].parse().ok()?;
    let remainder: i64 = caps[3].parse().ok()?;
    Some((col, modulus, remainder))
}

/// Principal relation from the FROM clause, if the query has one.
fn principal_relation(sql: &str) -> Option<String> {
    let caps = from_re().captures(sql)?;
    let raw = caps[1].trim_end_matches(|c| c == ';' || c == ',');
    if raw.is_empty() {
        None
    } else {
        Some(raw.trim_matches('"').to_string())
    }
}

/// First date-shaped token of a matched literal (`2024-01-31 00:00:00` → date part).
fn date_part(literal: &str) -> String {
    literal
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string()
}

/// Half-open upper bound: the day after `date`, or `None` if unparseable.
pub fn next_day(date: &str) -> Option<String> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some((parsed + Duration::days(1)).format("%Y-%m-%d").to_string())
}

fn cast_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)to_char\(\s*"?(\w+)"?\s*,\s*'([^']+)'"#).expect("valid regex")
    })
}

fn range_ge_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)to_char\(\s*"?(\w+)"?\s*,\s*'[^']+'(?:\s*::text)?\s*\)\s*>=\s*'([\d\-: ]+)'"#)
            .expect("valid regex")
    })
}

fn range_le_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)to_char\(\s*"?(\w+)"?\s*,\s*'[^']+'(?:\s*::text)?\s*\)\s*<=?\s*'([\d\-: ]+)'"#)
            .expect("valid regex")
    })
}

fn modulo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)"?(\w+)"?\s*%\s*(\d+)\s*\)?\s*=\s*(\d+)"#).expect("valid regex")
    })
}

fn random_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\brandom\s*\(\s*\)").expect("valid regex"))
}

fn order_by_random_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\border\s+by\s+random\s*\(\s*\)").expect("valid regex"))
}

fn from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\bfrom\s+("?[\w.]+"?(?:\."?[\w]+"?)?)"#).expect("valid regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_from(value: serde_json::Value) -> Plan {
        Plan::from_json(&value).unwrap()
    }

    #[test]
    fn test_seq_scan_with_filter_unknown_selectivity() {
        let plan = plan_from(serde_json::json!({
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "order_items",
                "Plan Rows": 250000,
                "Filter": "(status = 'open'::text)"
            }
        }));
        let feats = extract_features(
            Some(&plan),
            "",
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        assert_eq!(feats.len(), 1);
        assert_eq!(feats[0].kind(), FeatureKind::SeqScanBigTable);
        assert_eq!(feats[0].selectivity(), None);
        assert_eq!(feats[0].est_rows(), Some(250000));
    }

    #[test]
    fn test_seq_scan_no_filter_below_threshold_not_emitted() {
        let plan = plan_from(serde_json::json!({
            "Plan": {"Node Type": "Seq Scan", "Relation Name": "tiny", "Plan Rows": 50}
        }));
        let feats = extract_features(
            Some(&plan),
            "",
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        assert!(feats.is_empty());
    }

    #[test]
    fn test_seq_scan_no_filter_big_table_full_selectivity() {
        let plan = plan_from(serde_json::json!({
            "Plan": {"Node Type": "Seq Scan", "Relation Name": "events", "Plan Rows": 500000}
        }));
        let feats = extract_features(
            Some(&plan),
            "",
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        assert_eq!(feats[0].selectivity(), Some(1.0));
    }

    #[test]
    fn test_cast_and_range_detected_together() {
        let filter = "to_char(created_at,'YYYY-MM-DD') >= '2024-01-01' AND \
                      to_char(created_at,'YYYY-MM-DD') <= '2024-01-31'";
        let plan = plan_from(serde_json::json!({
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "orders",
                "Plan Rows": 10,
                "Filter": filter
            }
        }));
        let feats = extract_features(
            Some(&plan),
            "",
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        let kinds: Vec<_> = feats.iter().map(|f| f.kind()).collect();
        assert!(kinds.contains(&FeatureKind::SeqScanBigTable));
        assert!(kinds.contains(&FeatureKind::CastPreventsIndex));
        assert!(kinds.contains(&FeatureKind::RangeTimeQuery));

        let range = feats
            .iter()
            .find(|f| f.kind() == FeatureKind::RangeTimeQuery)
            .unwrap();
        match &range.detail {
            FeatureDetail::RangeTimeQuery {
                time_col,
                from_date,
                to_date,
                to_date_next,
            } => {
                assert_eq!(time_col, "created_at");
                assert_eq!(from_date, "2024-01-01");
                assert_eq!(to_date, "2024-01-31");
                assert_eq!(to_date_next.as_deref(), Some("2024-02-01"));
            }
            other => panic!("unexpected detail: {:?}", other),
        }
    }

    #[test]
    fn test_range_with_cast_text_form() {
        // EXPLAIN renders the filter with ::text casts and outer parens
        let filter = "((to_char(created_at, 'YYYY-MM-DD'::text) >= '2024-03-01'::text) AND \
                      (to_char(created_at, 'YYYY-MM-DD'::text) < '2024-04-01'::text))";
        let mut out = Vec::new();
        detect_wrapped_time_column(filter, 1, Some("orders"), &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].kind(), FeatureKind::RangeTimeQuery);
    }

    #[test]
    fn test_range_different_columns_not_a_range() {
        let filter = "to_char(created_at,'YYYY-MM-DD') >= '2024-01-01' AND \
                      to_char(updated_at,'YYYY-MM-DD') <= '2024-01-31'";
        let mut out = Vec::new();
        detect_wrapped_time_column(filter, 1, None, &mut out);
        assert!(out.iter().all(|f| f.kind() != FeatureKind::RangeTimeQuery));
    }

    #[test]
    fn test_unparseable_to_date_leaves_next_unset() {
        assert_eq!(next_day("2024-01-31"), Some("2024-02-01".to_string()));
        assert_eq!(next_day("not-a-date"), None);
        assert_eq!(next_day("2024-02-28"), Some("2024-02-29".to_string())); // leap year
    }

    #[test]
    fn test_sort_random_order_detected() {
        let plan = plan_from(serde_json::json!({
            "Plan": {
                "Node Type": "Sort",
                "Sort Key": ["random()"],
                "Plan Rows": 100,
                "Plan Width": 16
            }
        }));
        let feats = extract_features(
            Some(&plan),
            "",
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        assert!(feats
            .iter()
            .any(|f| f.kind() == FeatureKind::OrderByNondeterministic));
    }

    #[test]
    fn test_modulo_filter_in_condition() {
        let plan = plan_from(serde_json::json!({
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "events",
                "Plan Rows": 10,
                "Filter": "((id % 10) = 3)"
            }
        }));
        let feats = extract_features(
            Some(&plan),
            "",
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        let modulo = feats
            .iter()
            .find(|f| f.kind() == FeatureKind::ModuloFilter)
            .unwrap();
        match &modulo.detail {
            FeatureDetail::ModuloFilter {
                col,
                modulus,
                remainder,
            } => {
                assert_eq!(col, "id");
                assert_eq!(*modulus, 10);
                assert_eq!(*remainder, 3);
            }
            other => panic!("unexpected detail: {:?}", other),
        }
    }

    #[test]
    fn test_fallback_text_scan_when_plan_silent() {
        let sql = "SELECT * FROM sales.orders WHERE id % 4 = 1 ORDER BY random()";
        let feats = extract_features(
            None,
            sql,
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        let kinds: Vec<_> = feats.iter().map(|f| f.kind()).collect();
        assert!(kinds.contains(&FeatureKind::ModuloFilter));
        assert!(kinds.contains(&FeatureKind::OrderByNondeterministic));
        assert_eq!(feats[0].relation.as_deref(), Some("sales.orders"));
    }

    #[test]
    fn test_fallback_does_not_duplicate_plan_findings() {
        let plan = plan_from(serde_json::json!({
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "events",
                "Plan Rows": 10,
                "Filter": "((id % 10) = 3)"
            }
        }));
        let sql = "SELECT * FROM events WHERE id % 10 = 3";
        let feats = extract_features(
            Some(&plan),
            sql,
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        let modulo_count = feats
            .iter()
            .filter(|f| f.kind() == FeatureKind::ModuloFilter)
            .count();
        assert_eq!(modulo_count, 1);
    }

    #[test]
    fn test_sort_spill_risk_with_work_mem_context() {
        let plan = plan_from(serde_json::json!({
            "Plan": {
                "Node Type": "Sort",
                "Sort Key": ["created_at"],
                "Plan Rows": 2000000,
                "Plan Width": 120
            }
        }));
        let ctx = ExtractContext {
            work_mem_mb: Some(4.0),
            stats: vec![],
        };
        let feats = extract_features(Some(&plan), "", &ctx, &ExtractorConfig::default());
        let spill = feats
            .iter()
            .find(|f| f.kind() == FeatureKind::SortSpillRisk)
            .unwrap();
        assert!(spill.mem_est_mb().unwrap() > 200.0);
        assert_eq!(spill.work_mem_mb(), Some(4.0));
    }

    #[test]
    fn test_hashagg_strategy_detected() {
        let plan = plan_from(serde_json::json!({
            "Plan": {
                "Node Type": "Aggregate",
                "Strategy": "Hashed",
                "Plan Rows": 1000000,
                "Plan Width": 64
            }
        }));
        let feats = extract_features(
            Some(&plan),
            "",
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        assert!(feats
            .iter()
            .any(|f| f.kind() == FeatureKind::HashaggSpillRisk));
    }

    #[test]
    fn test_stale_stats_emitted_from_context() {
        let ctx = ExtractContext {
            work_mem_mb: None,
            stats: vec![
                RelationStats {
                    relation: "public.orders".into(),
                    days_since_analyze: Some(45),
                },
                RelationStats {
                    relation: "public.fresh".into(),
                    days_since_analyze: Some(2),
                },
            ],
        };
        let feats = extract_features(None, "", &ctx, &ExtractorConfig::default());
        assert_eq!(feats.len(), 1);
        assert_eq!(feats[0].kind(), FeatureKind::OutdatedStats);
        assert_eq!(feats[0].relation.as_deref(), Some("public.orders"));
    }

    #[test]
    fn test_empty_inputs_yield_no_features() {
        let feats = extract_features(
            None,
            "",
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        assert!(feats.is_empty());
    }

    #[test]
    fn test_node_ids_unique_per_node() {
        let plan = plan_from(serde_json::json!({
            "Plan": {
                "Node Type": "Sort",
                "Sort Key": ["random()"],
                "Plan Rows": 2000000,
                "Plan Width": 64,
                "Plans": [{
                    "Node Type": "Seq Scan",
                    "Relation Name": "events",
                    "Plan Rows": 2000000,
                    "Filter": "(id % 2 = 0)"
                }]
            }
        }));
        let feats = extract_features(
            Some(&plan),
            "",
            &ExtractContext::default(),
            &ExtractorConfig::default(),
        );
        // sort node features share an id; seq scan features share a different one
        let sort_ids: Vec<_> = feats
            .iter()
            .filter(|f| f.relation.is_none())
            .map(|f| f.node_id)
            .collect();
        let scan_ids: Vec<_> = feats
            .iter()
            .filter(|f| f.relation.is_some())
            .map(|f| f.node_id)
            .collect();
        assert!(!sort_ids.is_empty() && !scan_ids.is_empty());
        assert!(sort_ids.iter().all(|id| *id == sort_ids[0]));
        assert!(scan_ids.iter().all(|id| *id == scan_ids[0]));
        assert_ne!(sort_ids[0], scan_ids[0]);
    }
}
