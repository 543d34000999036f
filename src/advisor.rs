//! The plan-to-advice pipeline.
//!
//! One synchronous, pure pass over immutable inputs: extract features,
//! normalize them, apply the rule set, aggregate risk, render the report.
//! No I/O happens here; callers fetch the plan and context first. The rule
//! set is shared and read-only, so any number of analyses can run in
//! parallel against it.

use serde::Serialize;

use crate::engine::{apply_rules, Recommendation, RiskContribution};
use crate::extract::{extract_features, ExtractContext, ExtractorConfig};
use crate::feature::Feature;
use crate::normalize::normalize_features;
use crate::plan::Plan;
use crate::report::{render_report, ReportContext, DEFAULT_PLAN_EVIDENCE_NODES};
use crate::risk::{aggregate, RiskAssessment};
use crate::rules::RuleSet;

/// Everything one analysis run produces.
#[derive(Debug, Serialize)]
pub struct AdviseResult {
    pub risk: RiskAssessment,
    pub recommendations: Vec<Recommendation>,
    pub risk_contributions: Vec<RiskContribution>,
    pub features: Vec<Feature>,
    pub explain_md: String,
}

/// Knobs for one analysis run.
#[derive(Debug, Clone)]
pub struct AdviseOptions {
    pub extractor: ExtractorConfig,
    pub plan_evidence_nodes: usize,
}

impl Default for AdviseOptions {
    fn default() -> Self {
        Self {
            extractor: ExtractorConfig::default(),
            plan_evidence_nodes: DEFAULT_PLAN_EVIDENCE_NODES,
        }
    }
}

/// Run the full pipeline.
///
/// Always returns a well-formed result; an empty plan, empty query, or empty
/// rule set yields zero findings and an info-level risk, never an error.
pub fn advise(
    plan: Option<&Plan>,
    sql: &str,
    ctx: &ExtractContext,
    rules: &RuleSet,
    options: &AdviseOptions,
) -> AdviseResult {
    let features = normalize_features(extract_features(plan, sql, ctx, &options.extractor));
    let (recommendations, risk_contributions) = apply_rules(rules, &features);
    let risk = aggregate(&risk_contributions);

    let mut report_ctx = ReportContext::new(&features, plan);
    report_ctx.plan_evidence_nodes = options.plan_evidence_nodes;
    let explain_md = render_report(&recommendations, &risk, &risk_contributions, &report_ctx);

    AdviseResult {
        risk,
        recommendations,
        risk_contributions,
        features,
        explain_md,
    }
}
