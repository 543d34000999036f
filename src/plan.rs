//! Query plan model.
//!
//! Deserializes PostgreSQL `EXPLAIN (FORMAT JSON)` output into a plan tree
//! and provides the traversal helpers the extractor and report renderer
//! share. Field names mirror the EXPLAIN JSON keys.

use anyhow::{Context, Result};
use serde::Deserialize;

/// One node of a query execution plan.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanNode {
    #[serde(rename = "Node Type", default)]
    pub node_type: String,
    #[serde(rename = "Relation Name")]
    pub relation_name: Option<String>,
    #[serde(rename = "Schema")]
    pub schema: Option<String>,
    #[serde(rename = "Alias")]
    pub alias: Option<String>,
    #[serde(rename = "Startup Cost")]
    pub startup_cost: Option<f64>,
    #[serde(rename = "Total Cost")]
    pub total_cost: Option<f64>,
    #[serde(rename = "Plan Rows")]
    pub plan_rows: Option<i64>,
    #[serde(rename = "Plan Width")]
    pub plan_width: Option<i32>,
    #[serde(rename = "Strategy")]
    pub strategy: Option<String>,
    #[serde(rename = "Actual Rows")]
    pub actual_rows: Option<i64>,
    #[serde(rename = "Filter")]
    pub filter: Option<String>,
    #[serde(rename = "Index Cond")]
    pub index_cond: Option<String>,
    #[serde(rename = "Join Filter")]
    pub join_filter: Option<String>,
    #[serde(rename = "Recheck Cond")]
    pub recheck_cond: Option<String>,
    #[serde(rename = "Sort Key")]
    pub sort_key: Option<Vec<String>>,
    #[serde(rename = "Plans")]
    pub plans: Option<Vec<PlanNode>>,
}

impl PlanNode {
    /// The relation this node reads, if any (relation name over alias).
    pub fn relation(&self) -> Option<&str> {
        self.relation_name.as_deref().or(self.alias.as_deref())
    }

    /// Schema-qualified relation when EXPLAIN VERBOSE supplied the schema.
    pub fn qualified_relation(&self) -> Option<String> {
        let relation = self.relation()?;
        match self.schema.as_deref() {
            Some(schema) => Some(format!("{}.{}", schema, relation)),
            None => Some(relation.to_string()),
        }
    }

    /// All textual condition fields on this node, in EXPLAIN order.
    pub fn condition_texts(&self) -> Vec<&str> {
        [
            self.filter.as_deref(),
            self.index_cond.as_deref(),
            self.join_filter.as_deref(),
            self.recheck_cond.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// One-line rendering for plan evidence in reports.
    pub fn summary_line(&self) -> String {
        let mut parts = vec![format!("Node Type: {}", self.node_type)];
        for (label, value) in [
            ("Filter", &self.filter),
            ("Index Cond", &self.index_cond),
            ("Join Filter", &self.join_filter),
            ("Recheck Cond", &self.recheck_cond),
        ] {
            if let Some(v) = value {
                parts.push(format!("{}: {}", label, v));
            }
        }
        if let Some(keys) = &self.sort_key {
            parts.push(format!("Sort Key: {}", keys.join(", ")));
        }
        if let Some(rows) = self.plan_rows {
            parts.push(format!("Plan Rows: {}", rows));
        }
        if let Some(rows) = self.actual_rows {
            parts.push(format!("Actual Rows: {}", rows));
        }
        if let Some(cost) = self.startup_cost {
            parts.push(format!("Startup Cost: {}", cost));
        }
        if let Some(cost) = self.total_cost {
            parts.push(format!("Total Cost: {}", cost));
        }
        parts.join(" | ")
    }
}

/// Root of an EXPLAIN document: the plan tree plus timing fields we ignore.
#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    #[serde(rename = "Plan")]
    pub root: PlanNode,
}

impl Plan {
    /// Parse `EXPLAIN (FORMAT JSON)` output.
    ///
    /// Accepts the array form Postgres emits (`[{"Plan": ...}]`), a single
    /// `{"Plan": ...}` object, or a bare plan node.
    pub fn from_json(value: &serde_json::Value) -> Result<Plan> {
        let obj = match value {
            serde_json::Value::Array(items) => items
                .first()
                .context("EXPLAIN output is an empty array")?,
            other => other,
        };
        if obj.get("Plan").is_some() {
            serde_json::from_value(obj.clone()).context("Failed to parse EXPLAIN JSON")
        } else {
            let root: PlanNode =
                serde_json::from_value(obj.clone()).context("Failed to parse plan node")?;
            Ok(Plan { root })
        }
    }

    /// Depth-first pre-order walk over all nodes.
    pub fn walk(&self) -> Vec<&PlanNode> {
        let mut out = Vec::new();
        fn dfs<'a>(node: &'a PlanNode, out: &mut Vec<&'a PlanNode>) {
            out.push(node);
            if let Some(children) = &node.plans {
                for child in children {
                    dfs(child, out);
                }
            }
        }
        dfs(&self.root, &mut out);
        out
    }

    /// Nodes reading `relation`, matched case-insensitively with any schema
    /// qualifier stripped from both sides.
    pub fn nodes_for_relation(&self, relation: &str) -> Vec<&PlanNode> {
        let needle = bare_table(relation);
        if needle.is_empty() {
            return Vec::new();
        }
        self.walk()
            .into_iter()
            .filter(|n| n.relation().map(bare_table).as_deref() == Some(needle.as_str()))
            .collect()
    }
}

/// Lowercased table name with quotes and schema qualifier removed.
fn bare_table(relation: &str) -> String {
    relation
        .trim_matches('"')
        .rsplit('.')
        .next()
        .unwrap_or("")
        .trim_matches('"')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> serde_json::Value {
        serde_json::json!([{
            "Plan": {
                "Node Type": "Sort",
                "Startup Cost": 900.0,
                "Total Cost": 950.0,
                "Plan Rows": 100,
                "Sort Key": ["random()"],
                "Plans": [{
                    "Node Type": "Seq Scan",
                    "Relation Name": "order_items",
                    "Schema": "sales",
                    "Plan Rows": 250000,
                    "Total Cost": 890.0,
                    "Filter": "(status = 'open'::text)"
                }]
            }
        }])
    }

    #[test]
    fn test_parse_array_form() {
        let plan = Plan::from_json(&sample()).unwrap();
        assert_eq!(plan.root.node_type, "Sort");
        assert_eq!(plan.walk().len(), 2);
    }

    #[test]
    fn test_parse_bare_node() {
        let value = serde_json::json!({"Node Type": "Seq Scan", "Plan Rows": 5});
        let plan = Plan::from_json(&value).unwrap();
        assert_eq!(plan.root.node_type, "Seq Scan");
    }

    #[test]
    fn test_qualified_relation() {
        let plan = Plan::from_json(&sample()).unwrap();
        assert_eq!(plan.walk()[0].qualified_relation(), None);
        assert_eq!(
            plan.walk()[1].qualified_relation().as_deref(),
            Some("sales.order_items")
        );
    }

    #[test]
    fn test_nodes_for_relation_case_insensitive_schema_stripped() {
        let plan = Plan::from_json(&sample()).unwrap();
        let hits = plan.nodes_for_relation("SALES.Order_Items");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_type, "Seq Scan");
        assert!(plan.nodes_for_relation("users").is_empty());
    }

    #[test]
    fn test_summary_line() {
        let plan = Plan::from_json(&sample()).unwrap();
        let line = plan.walk()[1].summary_line();
        assert!(line.contains("Node Type: Seq Scan"));
        assert!(line.contains("Filter: (status = 'open'::text)"));
        assert!(line.contains("Plan Rows: 250000"));
    }

    #[test]
    fn test_condition_texts() {
        let node = PlanNode {
            filter: Some("(a = 1)".into()),
            join_filter: Some("(b = c)".into()),
            ..Default::default()
        };
        assert_eq!(node.condition_texts(), vec!["(a = 1)", "(b = c)"]);
    }
}
