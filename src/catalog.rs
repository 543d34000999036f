//! Feature kind vocabulary.
//!
//! The set of plan/query patterns the extractor can emit and rules can match
//! on. The enum is the contract: rules naming anything else are rejected at
//! load time, so unrecognized kinds can never reach the matcher.

use serde::{Deserialize, Serialize};

/// A recognized feature kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Full-table scan with a filter, or on a table above the size threshold
    SeqScanBigTable,
    /// Indexable column wrapped in a non-indexable expression
    CastPreventsIndex,
    /// Date range expressed through a wrapped column, rewritable half-open
    RangeTimeQuery,
    /// Sort key contains a non-deterministic expression
    OrderByNondeterministic,
    /// `col % N = K` predicate, defeats B-tree index usage
    ModuloFilter,
    /// Sort estimated to exceed work_mem and spill to disk
    SortSpillRisk,
    /// Hash aggregate estimated to exceed work_mem
    HashaggSpillRisk,
    /// Table statistics older than the staleness threshold
    OutdatedStats,
}

impl FeatureKind {
    /// All recognized kinds, in a stable order.
    pub fn all() -> &'static [FeatureKind] {
        &[
            FeatureKind::SeqScanBigTable,
            FeatureKind::CastPreventsIndex,
            FeatureKind::RangeTimeQuery,
            FeatureKind::OrderByNondeterministic,
            FeatureKind::ModuloFilter,
            FeatureKind::SortSpillRisk,
            FeatureKind::HashaggSpillRisk,
            FeatureKind::OutdatedStats,
        ]
    }

    /// Stable snake_case name, matching the serde representation.
    pub fn name(&self) -> &'static str {
        match self {
            FeatureKind::SeqScanBigTable => "seq_scan_big_table",
            FeatureKind::CastPreventsIndex => "cast_prevents_index",
            FeatureKind::RangeTimeQuery => "range_time_query",
            FeatureKind::OrderByNondeterministic => "order_by_nondeterministic",
            FeatureKind::ModuloFilter => "modulo_filter",
            FeatureKind::SortSpillRisk => "sort_spill_risk",
            FeatureKind::HashaggSpillRisk => "hashagg_spill_risk",
            FeatureKind::OutdatedStats => "outdated_stats",
        }
    }

    /// Parse a snake_case kind name.
    pub fn parse(s: &str) -> Option<FeatureKind> {
        FeatureKind::all().iter().copied().find(|k| k.name() == s)
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_all_kinds() {
        for kind in FeatureKind::all() {
            assert_eq!(FeatureKind::parse(kind.name()), Some(*kind));
        }
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(FeatureKind::parse("seq_scan"), None);
        assert_eq!(FeatureKind::parse(""), None);
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&FeatureKind::SeqScanBigTable).unwrap();
        assert_eq!(json, "\"seq_scan_big_table\"");
        let back: FeatureKind = serde_json::from_str("\"range_time_query\"").unwrap();
        assert_eq!(back, FeatureKind::RangeTimeQuery);
    }
}
