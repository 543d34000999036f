//! Feature normalization and deduplication.
//!
//! Canonicalizes relation names to `schema.table`, clamps numeric fields to
//! their valid ranges, fills in derived fields, and drops duplicate features
//! by fingerprint. Normalization is idempotent: running it twice is the same
//! as running it once.

use std::collections::HashSet;

use crate::catalog::FeatureKind;
use crate::extract::next_day;
use crate::feature::{Feature, FeatureDetail};
use crate::sql::split_relation;

/// Normalize a single feature. Idempotent.
pub fn normalize_feature(mut feature: Feature) -> Feature {
    if let Some(rel) = &feature.relation {
        let (schema, table) = split_relation(rel);
        if table.is_empty() {
            feature.relation = None;
        } else {
            feature.relation = Some(format!("{}.{}", schema, table));
        }
    }

    match &mut feature.detail {
        FeatureDetail::SeqScanBigTable { selectivity, .. } => {
            *selectivity = selectivity.and_then(clamp_selectivity);
        }
        FeatureDetail::CastPreventsIndex { col, .. } => {
            *col = clean_ident(col);
        }
        FeatureDetail::RangeTimeQuery {
            time_col,
            from_date,
            to_date,
            to_date_next,
        } => {
            *time_col = clean_ident(time_col);
            *from_date = from_date.trim().to_string();
            *to_date = to_date.trim().to_string();
            if to_date_next.is_none() {
                *to_date_next = next_day(to_date);
            }
        }
        FeatureDetail::ModuloFilter { col, .. } => {
            *col = clean_ident(col);
        }
        _ => {}
    }

    feature
}

/// Clamp a selectivity into [0, 1]; non-finite values are dropped.
pub fn clamp_selectivity(v: f64) -> Option<f64> {
    if !v.is_finite() {
        return None;
    }
    Some(v.clamp(0.0, 1.0))
}

/// Normalize a batch and drop fingerprint duplicates, first occurrence wins.
pub fn normalize_features(features: Vec<Feature>) -> Vec<Feature> {
    let mut seen: HashSet<Fingerprint> = HashSet::new();
    let mut out = Vec::with_capacity(features.len());
    for feature in features {
        let feature = normalize_feature(feature);
        if seen.insert(fingerprint(&feature)) {
            out.push(feature);
        }
    }
    out
}

/// Feature identity for dedup: kind, relation, sorted columns, node id.
type Fingerprint = (FeatureKind, Option<String>, Vec<String>, i64);

fn fingerprint(feature: &Feature) -> Fingerprint {
    let mut cols: Vec<String> = feature.columns().iter().map(|c| c.to_string()).collect();
    cols.sort();
    (feature.kind(), feature.relation.clone(), cols, feature.node_id)
}

fn clean_ident(s: &str) -> String {
    s.trim().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_scan(relation: &str, selectivity: Option<f64>) -> Feature {
        Feature {
            node_id: 1,
            relation: Some(relation.to_string()),
            detail: FeatureDetail::SeqScanBigTable {
                est_rows: 250000,
                selectivity,
            },
        }
    }

    #[test]
    fn test_relation_gets_default_schema() {
        let f = normalize_feature(seq_scan("orders", None));
        assert_eq!(f.relation.as_deref(), Some("public.orders"));
    }

    #[test]
    fn test_qualified_relation_unchanged() {
        let f = normalize_feature(seq_scan("sales.order_items", None));
        assert_eq!(f.relation.as_deref(), Some("sales.order_items"));
    }

    #[test]
    fn test_normalize_idempotent() {
        let original = Feature {
            node_id: 3,
            relation: Some("\"Sales\".orders".to_string()),
            detail: FeatureDetail::RangeTimeQuery {
                time_col: "\"created_at\"".to_string(),
                from_date: "2024-01-01".to_string(),
                to_date: "2024-01-31".to_string(),
                to_date_next: None,
            },
        };
        let once = normalize_feature(original);
        let twice = normalize_feature(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_selectivity_clamped() {
        assert_eq!(clamp_selectivity(-0.5), Some(0.0));
        assert_eq!(clamp_selectivity(1.5), Some(1.0));
        assert_eq!(clamp_selectivity(0.25), Some(0.25));
        assert_eq!(clamp_selectivity(f64::NAN), None);
        assert_eq!(clamp_selectivity(f64::INFINITY), None);

        let f = normalize_feature(seq_scan("t", Some(2.0)));
        assert_eq!(f.selectivity(), Some(1.0));
        let f = normalize_feature(seq_scan("t", None));
        assert_eq!(f.selectivity(), None);
    }

    #[test]
    fn test_to_date_next_computed_when_missing() {
        let f = normalize_feature(Feature {
            node_id: 1,
            relation: None,
            detail: FeatureDetail::RangeTimeQuery {
                time_col: "created_at".to_string(),
                from_date: "2024-01-01".to_string(),
                to_date: "2024-01-31".to_string(),
                to_date_next: None,
            },
        });
        match f.detail {
            FeatureDetail::RangeTimeQuery { to_date_next, .. } => {
                assert_eq!(to_date_next.as_deref(), Some("2024-02-01"));
            }
            other => panic!("unexpected detail: {:?}", other),
        }
    }

    #[test]
    fn test_dedup_first_occurrence_wins() {
        let a = seq_scan("public.orders", Some(0.5));
        let b = seq_scan("orders", Some(0.9)); // same fingerprint after normalization
        let out = normalize_features(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].selectivity(), Some(0.5));
    }

    #[test]
    fn test_different_node_ids_not_deduped() {
        let a = seq_scan("orders", None);
        let mut b = seq_scan("orders", None);
        b.node_id = 2;
        let out = normalize_features(vec![a, b]);
        assert_eq!(out.len(), 2);
    }
}
