//! Risk aggregation: contributions to a bounded score and severity tier.

use serde::Serialize;

use crate::catalog::FeatureKind;
use crate::engine::{RiskContribution, RULE_SCORE_CAP};

/// Aggregate score ceiling.
pub const TOTAL_SCORE_CAP: u32 = 100;

/// Scores below this are informational.
pub const INFO_BELOW: u32 = 25;

/// Scores below this (and at or above [`INFO_BELOW`]) are warnings.
pub const WARNING_BELOW: u32 = 50;

/// Confidence multiplier applied when the evidence rests on stale statistics.
pub const STALE_STATS_CONFIDENCE: f64 = 0.85;

/// Severity tier of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Info,
    Warning,
    Critical,
}

impl RiskSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            RiskSeverity::Info => "info",
            RiskSeverity::Warning => "warning",
            RiskSeverity::Critical => "critical",
        }
    }

    /// Findings exit code: 0 info, 1 warning, 2 critical.
    pub fn exit_code(&self) -> i32 {
        match self {
            RiskSeverity::Info => crate::exit_codes::INFO,
            RiskSeverity::Warning => crate::exit_codes::WARNING,
            RiskSeverity::Critical => crate::exit_codes::CRITICAL,
        }
    }
}

impl std::fmt::Display for RiskSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The final risk verdict for one analysis run. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub score: u32,
    pub severity: RiskSeverity,
    pub drivers: Vec<String>,
    pub confidence_factor: f64,
}

/// Fold contributions into a bounded score.
///
/// Each contribution is capped at [`RULE_SCORE_CAP`] before summation so a
/// single rule cannot dominate; the confidence factor multiplies the sum
/// before the final cap at [`TOTAL_SCORE_CAP`].
pub fn aggregate(contributions: &[RiskContribution]) -> RiskAssessment {
    let raw: u32 = contributions
        .iter()
        .map(|c| c.score.min(RULE_SCORE_CAP))
        .sum();

    let stale_evidence = contributions
        .iter()
        .any(|c| c.drivers.contains(&FeatureKind::OutdatedStats));
    let confidence_factor = if stale_evidence {
        STALE_STATS_CONFIDENCE
    } else {
        1.0
    };

    let score = ((raw as f64 * confidence_factor).round() as u32).min(TOTAL_SCORE_CAP);

    RiskAssessment {
        score,
        severity: severity_for(score),
        drivers: contributions.iter().map(|c| c.rule_id.clone()).collect(),
        confidence_factor,
    }
}

fn severity_for(score: u32) -> RiskSeverity {
    if score < INFO_BELOW {
        RiskSeverity::Info
    } else if score < WARNING_BELOW {
        RiskSeverity::Warning
    } else {
        RiskSeverity::Critical
    }
}
