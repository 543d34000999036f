//! Typed feature records extracted from plans and query text.
//!
//! A feature is one detected tuning-relevant pattern. The shared base
//! (`node_id`, `relation`) lives on [`Feature`]; everything kind-specific
//! lives in the [`FeatureDetail`] variant for that kind, so missing-field
//! handling is explicit instead of being buried in an untyped map.

use serde::Serialize;

use crate::catalog::FeatureKind;

/// A structured signal detected in the plan or query text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    /// Stable within one extraction run; shared by features from one node
    pub node_id: i64,
    /// Relation the signal concerns; `schema.table` after normalization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(flatten)]
    pub detail: FeatureDetail,
}

/// Kind-specific payload, one variant per [`FeatureKind`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureDetail {
    SeqScanBigTable {
        est_rows: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        selectivity: Option<f64>,
    },
    CastPreventsIndex {
        col: String,
        func: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    RangeTimeQuery {
        time_col: String,
        from_date: String,
        to_date: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        to_date_next: Option<String>,
    },
    OrderByNondeterministic {
        expr: String,
    },
    ModuloFilter {
        col: String,
        modulus: i64,
        remainder: i64,
    },
    SortSpillRisk {
        mem_est_mb: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        work_mem_mb: Option<f64>,
    },
    HashaggSpillRisk {
        mem_est_mb: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        work_mem_mb: Option<f64>,
    },
    OutdatedStats {
        #[serde(skip_serializing_if = "Option::is_none")]
        days_since_analyze: Option<i64>,
    },
}

impl Feature {
    pub fn kind(&self) -> FeatureKind {
        match self.detail {
            FeatureDetail::SeqScanBigTable { .. } => FeatureKind::SeqScanBigTable,
            FeatureDetail::CastPreventsIndex { .. } => FeatureKind::CastPreventsIndex,
            FeatureDetail::RangeTimeQuery { .. } => FeatureKind::RangeTimeQuery,
            FeatureDetail::OrderByNondeterministic { .. } => {
                FeatureKind::OrderByNondeterministic
            }
            FeatureDetail::ModuloFilter { .. } => FeatureKind::ModuloFilter,
            FeatureDetail::SortSpillRisk { .. } => FeatureKind::SortSpillRisk,
            FeatureDetail::HashaggSpillRisk { .. } => FeatureKind::HashaggSpillRisk,
            FeatureDetail::OutdatedStats { .. } => FeatureKind::OutdatedStats,
        }
    }

    /// Columns this feature concerns, for fingerprinting and index DDL.
    pub fn columns(&self) -> Vec<&str> {
        match &self.detail {
            FeatureDetail::CastPreventsIndex { col, .. } => vec![col.as_str()],
            FeatureDetail::RangeTimeQuery { time_col, .. } => vec![time_col.as_str()],
            FeatureDetail::ModuloFilter { col, .. } => vec![col.as_str()],
            _ => Vec::new(),
        }
    }

    pub fn selectivity(&self) -> Option<f64> {
        match self.detail {
            FeatureDetail::SeqScanBigTable { selectivity, .. } => selectivity,
            _ => None,
        }
    }

    pub fn est_rows(&self) -> Option<i64> {
        match self.detail {
            FeatureDetail::SeqScanBigTable { est_rows, .. } => Some(est_rows),
            _ => None,
        }
    }

    pub fn mem_est_mb(&self) -> Option<f64> {
        match self.detail {
            FeatureDetail::SortSpillRisk { mem_est_mb, .. }
            | FeatureDetail::HashaggSpillRisk { mem_est_mb, .. } => Some(mem_est_mb),
            _ => None,
        }
    }

    pub fn work_mem_mb(&self) -> Option<f64> {
        match self.detail {
            FeatureDetail::SortSpillRisk { work_mem_mb, .. }
            | FeatureDetail::HashaggSpillRisk { work_mem_mb, .. } => work_mem_mb,
            _ => None,
        }
    }

    /// Evidence snapshot attached to recommendations.
    pub fn snapshot(&self) -> FeatureSnapshot {
        FeatureSnapshot {
            node_id: self.node_id,
            relation: self.relation.clone(),
            selectivity: self.selectivity(),
            est_rows: self.est_rows(),
            mem_est_mb: self.mem_est_mb(),
            work_mem_mb: self.work_mem_mb(),
        }
    }
}

/// The slice of a feature that recommendations carry as evidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSnapshot {
    pub node_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selectivity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub est_rows: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_est_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_mem_mb: Option<f64>,
}
