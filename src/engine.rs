//! Rule matching and action synthesis.
//!
//! Evaluates the rule set against normalized features, renders action
//! templates through a typed placeholder map, and emits recommendations and
//! risk contributions. Rendering is all-or-nothing per template: an action
//! whose placeholders do not all resolve to non-empty values is omitted, and
//! a (rule, feature) pair with no renderable action yields nothing at all.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::catalog::FeatureKind;
use crate::feature::{Feature, FeatureDetail, FeatureSnapshot};
use crate::rules::{Confidence, Effort, ExpectedGain, RecommendationType, Rule, RuleSet};
use crate::sql::{qualify, quote_ident, safe_name, split_relation};

/// Per-rule risk contribution cap.
pub const RULE_SCORE_CAP: u32 = 40;

/// Rendered action strings; every field that is present fully resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderedAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_sql_hint: Option<String>,
}

impl RenderedAction {
    pub fn is_empty(&self) -> bool {
        self.ddl.is_none() && self.alter.is_none() && self.rewrite_sql_hint.is_none()
    }

    /// Key set for recommendation dedup: which fields rendered to what.
    fn key_set(&self) -> Vec<(&'static str, String)> {
        let mut keys = Vec::new();
        if let Some(v) = &self.ddl {
            keys.push(("ddl", v.clone()));
        }
        if let Some(v) = &self.alter {
            keys.push(("alter", v.clone()));
        }
        if let Some(v) = &self.rewrite_sql_hint {
            keys.push(("rewrite_sql_hint", v.clone()));
        }
        keys
    }
}

/// A synthesized recommendation, owned by one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub id: String,
    pub rule_id: String,
    #[serde(rename = "type")]
    pub rec_type: RecommendationType,
    pub title: String,
    pub action: RenderedAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_gain: Option<ExpectedGain>,
    pub effort: Effort,
    pub confidence: Confidence,
    pub evidence: Vec<FeatureSnapshot>,
}

/// One matched rule's contribution to the risk score.
#[derive(Debug, Clone, Serialize)]
pub struct RiskContribution {
    pub rule_id: String,
    /// Capped at [`RULE_SCORE_CAP`]
    pub score: u32,
    pub drivers: Vec<FeatureKind>,
}

/// Apply every rule to every feature, in rule-set order then feature order.
pub fn apply_rules(
    rules: &RuleSet,
    features: &[Feature],
) -> (Vec<Recommendation>, Vec<RiskContribution>) {
    let mut recommendations = Vec::new();
    let mut contributions = Vec::new();
    let mut seen_recs: HashSet<(String, &'static str, Vec<(&'static str, String)>)> =
        HashSet::new();
    let mut seen_contribs: HashSet<(String, i64)> = HashSet::new();

    for rule in &rules.rules {
        // a rule that slipped through load validation is ignored, not fatal
        let Some(kind) = rule.feature_kind() else {
            continue;
        };
        for feature in features {
            if !rule_matches(rule, kind, feature) {
                continue;
            }

            if rule.risk.base > 0 && seen_contribs.insert((rule.id.clone(), feature.node_id)) {
                contributions.push(RiskContribution {
                    rule_id: rule.id.clone(),
                    score: rule.risk.base.min(RULE_SCORE_CAP),
                    drivers: vec![kind],
                });
            }

            let action = render_action(rule, feature);
            if action.is_empty() {
                continue;
            }

            let dedup_key = (rule.id.clone(), rule.rule_type.name(), action.key_set());
            if !seen_recs.insert(dedup_key) {
                continue;
            }

            recommendations.push(Recommendation {
                id: format!("REC_{}_{}", rule.id, feature.node_id),
                rule_id: rule.id.clone(),
                rec_type: rule.rule_type,
                title: rule.title.clone(),
                action,
                expected_gain: rule.expected_gain.clone(),
                effort: rule.effort,
                confidence: rule.confidence,
                evidence: vec![feature.snapshot()],
            });
        }
    }

    (recommendations, contributions)
}

/// Kind equality plus every configured guard; a missing operand fails the
/// match, never errors.
fn rule_matches(rule: &Rule, kind: FeatureKind, feature: &Feature) -> bool {
    if feature.kind() != kind {
        return false;
    }
    let m = &rule.match_spec;

    if let Some(threshold) = m.selectivity_lt {
        match feature.selectivity() {
            Some(s) if s < threshold => {}
            _ => return false,
        }
    }
    if let Some(min) = m.est_rows_gt {
        match feature.est_rows() {
            Some(rows) if rows > min => {}
            _ => return false,
        }
    }
    if m.mem_gt_work_mem == Some(true) {
        match (feature.mem_est_mb(), feature.work_mem_mb()) {
            (Some(mem), Some(wm)) if mem > wm => {}
            _ => return false,
        }
    }
    if let Some(ratio) = m.mem_ratio_gt {
        match (feature.mem_est_mb(), feature.work_mem_mb()) {
            (Some(mem), Some(wm)) if wm > 0.0 && mem / wm > ratio => {}
            _ => return false,
        }
    }

    true
}

fn render_action(rule: &Rule, feature: &Feature) -> RenderedAction {
    let placeholders = placeholder_map(feature);
    let spec = &rule.action;

    let mut ddl = spec
        .ddl_template
        .as_deref()
        .and_then(|t| render_template(t, &placeholders));

    // informational setup statements are joined ahead of the DDL
    if ddl.is_some() && !spec.pre_sql.is_empty() {
        let pre: Vec<String> = spec
            .pre_sql
            .iter()
            .filter_map(|t| render_template(t, &placeholders))
            .collect();
        if !pre.is_empty() {
            ddl = ddl.map(|rendered| format!("{}\n{}", pre.join("\n"), rendered));
        }
    }

    RenderedAction {
        ddl,
        alter: spec
            .alter
            .as_deref()
            .and_then(|t| render_template(t, &placeholders)),
        rewrite_sql_hint: spec
            .rewrite_sql_hint
            .as_deref()
            .and_then(|t| render_template(t, &placeholders)),
    }
}

/// Substitute `{name}` placeholders; `None` unless every one resolves to a
/// non-empty value. An `INCLUDE({include_cols})` clause is elided entirely
/// when the include list is empty rather than rendered as `INCLUDE()`.
pub fn render_template(template: &str, placeholders: &BTreeMap<&'static str, String>) -> Option<String> {
    let mut template = template.to_string();
    if placeholders
        .get("include_cols")
        .map_or(true, |v| v.is_empty())
    {
        template = include_clause_re().replace_all(&template, "").to_string();
    }

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_re().captures_iter(&template) {
        let whole = caps.get(0).expect("capture 0 always present");
        let name = &caps[1];
        let value = placeholders.get(name).filter(|v| !v.is_empty())?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Some(out)
}

/// Typed substitution map from a normalized feature.
fn placeholder_map(feature: &Feature) -> BTreeMap<&'static str, String> {
    let mut ph: BTreeMap<&'static str, String> = BTreeMap::new();

    if let Some(rel) = &feature.relation {
        let (schema, table) = split_relation(rel);
        ph.insert("relation", format!("{}.{}", schema, table));
        ph.insert("table", qualify(&schema, &table));
        ph.insert("table_name", table.clone());
        ph.insert("schema", schema.clone());

        let cols = feature.columns();
        if !cols.is_empty() {
            ph.insert(
                "cols",
                cols.iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
            ph.insert("col", cols[0].to_string());
            ph.insert(
                "index_name",
                format!(
                    "idx_{}_{}",
                    safe_name(&format!("{}_{}", schema, table)),
                    safe_name(&cols.join("_"))
                ),
            );
        }
    }

    match &feature.detail {
        FeatureDetail::SeqScanBigTable {
            est_rows,
            selectivity,
        } => {
            ph.insert("est_rows", est_rows.to_string());
            if let Some(s) = selectivity {
                ph.insert("selectivity", format!("{:.3}", s));
            }
        }
        FeatureDetail::CastPreventsIndex { func, format, .. } => {
            ph.insert("func", func.clone());
            if let Some(f) = format {
                ph.insert("format", f.clone());
            }
        }
        FeatureDetail::RangeTimeQuery {
            time_col,
            from_date,
            to_date,
            to_date_next,
        } => {
            ph.insert("time_col", time_col.clone());
            ph.insert("from_date", from_date.clone());
            ph.insert("to_date", to_date.clone());
            if let Some(next) = to_date_next {
                ph.insert("to_date_next", next.clone());
            }
        }
        FeatureDetail::OrderByNondeterministic { expr } => {
            ph.insert("expr", expr.clone());
        }
        FeatureDetail::ModuloFilter {
            modulus, remainder, ..
        } => {
            ph.insert("modulus", modulus.to_string());
            ph.insert("remainder", remainder.to_string());
        }
        FeatureDetail::SortSpillRisk {
            mem_est_mb,
            work_mem_mb,
        }
        | FeatureDetail::HashaggSpillRisk {
            mem_est_mb,
            work_mem_mb,
        } => {
            ph.insert("mem_est_mb", format!("{}", mem_est_mb.ceil() as i64));
            if let Some(wm) = work_mem_mb {
                ph.insert("work_mem_mb", format!("{}", wm.ceil() as i64));
            }
        }
        FeatureDetail::OutdatedStats { days_since_analyze } => {
            if let Some(days) = days_since_analyze {
                ph.insert("days_since_analyze", days.to_string());
            }
        }
    }

    ph
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("valid regex"))
}

fn include_clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*INCLUDE\(\{include_cols\}\)").expect("valid regex"))
}
