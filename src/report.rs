//! Explanation document rendering.
//!
//! Produces the deterministic Markdown report: overall risk block, per-rule
//! contribution breakdown, recommendations ordered by a fixed tie-break
//! (type, effort, confidence, id), each joined back to its feature context
//! and to matching plan nodes as textual evidence.

use std::sync::OnceLock;

use regex::Regex;

use crate::engine::{Recommendation, RiskContribution};
use crate::feature::{Feature, FeatureDetail};
use crate::plan::Plan;
use crate::risk::{RiskAssessment, RiskSeverity};

/// How many plan nodes to quote as evidence per recommendation.
pub const DEFAULT_PLAN_EVIDENCE_NODES: usize = 2;

/// Inputs the renderer joins recommendations back against.
pub struct ReportContext<'a> {
    pub features: &'a [Feature],
    pub plan: Option<&'a Plan>,
    pub plan_evidence_nodes: usize,
}

impl<'a> ReportContext<'a> {
    pub fn new(features: &'a [Feature], plan: Option<&'a Plan>) -> Self {
        Self {
            features,
            plan,
            plan_evidence_nodes: DEFAULT_PLAN_EVIDENCE_NODES,
        }
    }
}

/// Render the full explanation document.
pub fn render_report(
    recommendations: &[Recommendation],
    risk: &RiskAssessment,
    contributions: &[RiskContribution],
    ctx: &ReportContext,
) -> String {
    let mut recs: Vec<&Recommendation> = recommendations.iter().collect();
    recs.sort_by_key(|r| sort_key(r));

    let mut lines: Vec<String> = Vec::new();

    lines.push("### Summary".to_string());
    lines.push(format!(
        "- Risk: **{} {} ({}/100)**",
        severity_icon(risk.severity),
        capitalize(risk.severity.label()),
        risk.score
    ));
    if risk.drivers.is_empty() {
        lines.push("- Drivers: none identified".to_string());
    } else {
        lines.push(format!("- Drivers: {}", risk.drivers.join(", ")));
    }
    if risk.confidence_factor < 1.0 {
        lines.push(format!(
            "- Confidence factor: {} (evidence rests on stale statistics)",
            risk.confidence_factor
        ));
    }
    lines.push(String::new());

    if !contributions.is_empty() {
        lines.push("### Rule contributions".to_string());
        for c in contributions {
            let drivers: Vec<&str> = c.drivers.iter().map(|d| d.name()).collect();
            if drivers.is_empty() {
                lines.push(format!("- {}: +{}", c.rule_id, c.score));
            } else {
                lines.push(format!("- {}: +{} ({})", c.rule_id, c.score, drivers.join(", ")));
            }
        }
        lines.push(String::new());
    }

    if recs.is_empty() {
        lines.push("_No problems found._".to_string());
    } else {
        lines.push("### Recommendations (by priority)".to_string());
        for rec in &recs {
            render_recommendation(rec, ctx, &mut lines);
        }
    }

    let notes = closing_notes(&recs);
    if !notes.is_empty() {
        lines.push(String::new());
        lines.push("### Notes".to_string());
        for note in notes {
            lines.push(format!("- {}", note));
        }
    }

    lines.join("\n")
}

/// Fixed tie-break: type category, then effort, then confidence, then id.
fn sort_key(rec: &Recommendation) -> (u8, u8, u8, String) {
    (
        rec.rec_type.rank(),
        rec.effort.rank(),
        rec.confidence.rank(),
        rec.id.clone(),
    )
}

fn render_recommendation(rec: &Recommendation, ctx: &ReportContext, lines: &mut Vec<String>) {
    lines.push(format!("- {}", rec.title));

    // node-level context from the feature set
    let node_id = rec.evidence.first().map(|e| e.node_id);
    let node_features: Vec<&Feature> = node_id
        .map(|id| ctx.features.iter().filter(|f| f.node_id == id).collect())
        .unwrap_or_default();

    let why = why_facts(rec, &node_features);
    if !why.is_empty() {
        lines.push("  - Why:".to_string());
        for fact in why {
            lines.push(format!("    - {}", fact));
        }
    }

    let mut what: Vec<String> = Vec::new();
    if let Some(hint) = &rec.action.rewrite_sql_hint {
        what.push(format!("    - Rewrite: {}", hint));
        if let Some(block) = rewritten_where(&node_features) {
            what.push("    - Rewritten WHERE:".to_string());
            what.push(format!("```sql\n{}\n```", block));
        }
    }
    if let Some(ddl) = &rec.action.ddl {
        what.push(format!("    - DDL: `{}`", ddl));
        if let Some(index_name) = extract_index_name(ddl) {
            what.push(format!(
                "      - rollback: `DROP INDEX CONCURRENTLY {};`",
                index_name
            ));
        }
        if ddl.contains("CREATE INDEX") {
            what.push("      - after creation: run ANALYZE on the table".to_string());
        }
    }
    if let Some(alter) = &rec.action.alter {
        what.push(format!("    - ALTER/SET: `{}`", alter));
        if alter.contains("work_mem") {
            what.push(
                "      - rollback: `RESET work_mem;` (or end the transaction if SET LOCAL)"
                    .to_string(),
            );
        }
    }
    if !what.is_empty() {
        lines.push("  - What to do:".to_string());
        lines.append(&mut what);
    }

    if let Some(gain) = &rec.expected_gain {
        let mut parts = vec![format!("kind: {}", gain.kind)];
        parts.push(format!("estimate: {}", gain.source));
        if let Some(value) = &gain.value {
            parts.push(format!("effect: {}", value));
        }
        lines.push(format!("  - Expected benefit: {}", parts.join("; ")));
    }

    // best-effort plan evidence by relation
    if let (Some(plan), Some(relation)) = (
        ctx.plan,
        rec.evidence.first().and_then(|e| e.relation.as_deref()),
    ) {
        let nodes = plan.nodes_for_relation(relation);
        if !nodes.is_empty() {
            lines.push("  - Evidence from the plan:".to_string());
            for node in nodes.iter().take(ctx.plan_evidence_nodes) {
                lines.push(format!("    - {}", node.summary_line()));
            }
        }
    }

    lines.push(format!(
        "  - effort: {}; confidence: {}",
        format!("{:?}", rec.effort).to_lowercase(),
        format!("{:?}", rec.confidence).to_lowercase()
    ));
}

/// Facts for the "Why" block, from the evidence snapshot joined with the
/// full feature records of the same node.
fn why_facts(rec: &Recommendation, node_features: &[&Feature]) -> Vec<String> {
    let mut facts = Vec::new();
    for e in &rec.evidence {
        let mut parts = vec![format!("nodeId: {}", e.node_id)];
        if let Some(rel) = &e.relation {
            parts.push(format!("relation: {}", rel));
        }
        if let Some(s) = e.selectivity {
            parts.push(format!("selectivity: {}", s));
        }
        if let Some(rows) = e.est_rows {
            parts.push(format!("estRows: {}", rows));
        }
        if let Some(mem) = e.mem_est_mb {
            parts.push(format!("memEstMB: {:.1}", mem));
        }
        if let Some(wm) = e.work_mem_mb {
            parts.push(format!("workMemMB: {:.1}", wm));
        }
        facts.push(parts.join("; "));
    }
    // add column facts the snapshot does not carry
    for feature in node_features {
        let cols = feature.columns();
        if !cols.is_empty() {
            facts.push(format!("column: {}", cols.join(", ")));
            break;
        }
    }
    facts
}

/// Concrete half-open WHERE clause when the node carried a date range.
fn rewritten_where(node_features: &[&Feature]) -> Option<String> {
    for feature in node_features {
        if let FeatureDetail::RangeTimeQuery {
            time_col,
            from_date,
            to_date_next: Some(next),
            ..
        } = &feature.detail
        {
            return Some(format!(
                "\"{}\" >= DATE '{}' AND \"{}\" < DATE '{}'",
                time_col, from_date, time_col, next
            ));
        }
    }
    None
}

fn closing_notes(recs: &[&Recommendation]) -> Vec<&'static str> {
    let mut notes = Vec::new();
    if recs
        .iter()
        .any(|r| r.action.alter.as_deref().is_some_and(|a| a.contains("SET LOCAL")))
    {
        notes.push("Settings applied with `SET LOCAL` last only for the current transaction.");
    }
    if recs
        .iter()
        .any(|r| r.action.ddl.as_deref().is_some_and(|d| d.contains("CONCURRENTLY")))
    {
        notes.push(
            "`CREATE INDEX CONCURRENTLY` cannot run inside a transaction block and takes longer, \
             but does not lock writes.",
        );
    }
    notes
}

fn severity_icon(severity: RiskSeverity) -> &'static str {
    match severity {
        RiskSeverity::Info => "ℹ",
        RiskSeverity::Warning => "⚠",
        RiskSeverity::Critical => "✗",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn extract_index_name(ddl: &str) -> Option<String> {
    let caps = index_name_re().captures(ddl)?;
    Some(caps[1].to_string())
}

fn index_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)CREATE\s+INDEX\s+(?:CONCURRENTLY\s+)?([A-Za-z0-9_".]+)\s+ON"#)
            .expect("valid regex")
    })
}
