//! Declarative tuning rules: model, loading, and validation.
//!
//! Rules live in TOML files (`[[rules]]` tables), either a single file or a
//! directory of `.toml` files loaded in file-name order. A rule that is not
//! actionable, names an unknown feature kind, or duplicates an id is skipped
//! at load time with a recorded reason; the matcher never sees it. A default
//! rule set is compiled into the binary.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::catalog::FeatureKind;
use crate::suggest;

/// Rule set compiled into the binary, used when no rules path is configured.
const DEFAULT_RULES_TOML: &str = include_str!("../rules/default.toml");

/// Maximum edit distance for "did you mean" suggestions in skip reasons.
const SUGGEST_DISTANCE: usize = 4;

/// What a matched rule recommends doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    SqlRewrite,
    Index,
    DbSetting,
    Stats,
}

impl RecommendationType {
    /// Report ordering: rewrites first, statistics maintenance last.
    pub fn rank(&self) -> u8 {
        match self {
            RecommendationType::SqlRewrite => 0,
            RecommendationType::Index => 1,
            RecommendationType::DbSetting => 2,
            RecommendationType::Stats => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecommendationType::SqlRewrite => "sql_rewrite",
            RecommendationType::Index => "index",
            RecommendationType::DbSetting => "db_setting",
            RecommendationType::Stats => "stats",
        }
    }
}

/// Implementation effort tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    #[default]
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn rank(&self) -> u8 {
        match self {
            Effort::Low => 0,
            Effort::Medium => 1,
            Effort::High => 2,
        }
    }
}

/// How confident the rule author is that the action helps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    /// Report ordering: high confidence sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            Confidence::High => 0,
            Confidence::Medium => 1,
            Confidence::Low => 2,
        }
    }
}

/// Match predicate: a required feature kind plus optional guards.
///
/// Guards form a closed set evaluated by the matcher; a guard whose operand
/// is missing on the feature makes the match fail, never error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSpec {
    /// Required feature kind name (validated against the catalog at load)
    pub feature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selectivity_lt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub est_rows_gt: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_gt_work_mem: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_ratio_gt: Option<f64>,
}

/// Action templates with named `{placeholder}` substitution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddl_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_sql_hint: Option<String>,
    /// Setup statements joined ahead of a rendered DDL template
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_sql: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskSpec {
    /// Base score contribution, 0-100
    #[serde(default)]
    pub base: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedGain {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default = "default_gain_source")]
    pub source: String,
}

fn default_gain_source() -> String {
    "heuristic".to_string()
}

/// One declarative tuning rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(rename = "type")]
    pub rule_type: RecommendationType,
    pub title: String,
    #[serde(rename = "match")]
    pub match_spec: MatchSpec,
    #[serde(default)]
    pub action: ActionSpec,
    #[serde(default)]
    pub risk: RiskSpec,
    #[serde(default)]
    pub effort: Effort,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_gain: Option<ExpectedGain>,
}

impl Rule {
    /// The feature kind this rule matches, if it names a recognized one.
    pub fn feature_kind(&self) -> Option<FeatureKind> {
        FeatureKind::parse(&self.match_spec.feature)
    }

    /// A rule is actionable when its type has at least one usable template.
    fn is_actionable(&self) -> bool {
        let a = &self.action;
        let nonempty = |t: &Option<String>| t.as_deref().is_some_and(|s| !s.trim().is_empty());
        match self.rule_type {
            RecommendationType::Index => nonempty(&a.ddl_template),
            RecommendationType::DbSetting => nonempty(&a.alter),
            RecommendationType::SqlRewrite => {
                nonempty(&a.rewrite_sql_hint) || nonempty(&a.ddl_template)
            }
            RecommendationType::Stats => nonempty(&a.ddl_template) || nonempty(&a.alter),
        }
    }
}

/// A rule rejected at load time, with the reason it was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRule {
    pub id: String,
    pub source: String,
    pub reason: String,
}

/// An ordered, validated rule set. Read-only after load.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub skipped: Vec<SkippedRule>,
}

/// TOML shape of one rules file.
#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rule set compiled into the binary.
    pub fn load_default() -> RuleSet {
        Self::from_toml_str(DEFAULT_RULES_TOML, "<builtin>")
            .expect("embedded default rule set must parse")
    }

    /// Parse a rules document, validating each rule.
    ///
    /// A file that does not parse is an error; an individual rule that fails
    /// validation is skipped with a recorded reason.
    pub fn from_toml_str(toml_text: &str, source: &str) -> Result<RuleSet> {
        let file: RuleFile = toml::from_str(toml_text)
            .with_context(|| format!("Failed to parse rules from {}", source))?;
        let mut set = RuleSet::default();
        let mut seen_ids = HashSet::new();
        for rule in file.rules {
            set.accept(rule, source, &mut seen_ids);
        }
        Ok(set)
    }

    /// Load rules from a file, or from every `.toml` file under a directory
    /// in file-name order.
    pub fn load_path(path: &Path) -> Result<RuleSet> {
        if path.is_dir() {
            let mut files: Vec<_> = WalkDir::new(path)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "toml"))
                .map(|e| e.into_path())
                .collect();
            files.sort();

            let mut set = RuleSet::default();
            let mut seen_ids = HashSet::new();
            for file in files {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let source = file.display().to_string();
                let parsed: RuleFile = toml::from_str(&text)
                    .with_context(|| format!("Failed to parse rules from {}", source))?;
                for rule in parsed.rules {
                    set.accept(rule, &source, &mut seen_ids);
                }
            }
            Ok(set)
        } else {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::from_toml_str(&text, &path.display().to_string())
        }
    }

    fn accept(&mut self, rule: Rule, source: &str, seen_ids: &mut HashSet<String>) {
        if let Err(reason) = validate_rule(&rule, seen_ids) {
            self.skipped.push(SkippedRule {
                id: rule.id.clone(),
                source: source.to_string(),
                reason,
            });
            return;
        }
        seen_ids.insert(rule.id.clone());
        self.rules.push(rule);
    }
}

fn validate_rule(rule: &Rule, seen_ids: &HashSet<String>) -> Result<(), String> {
    if rule.id.trim().is_empty() {
        return Err("rule has no id".to_string());
    }
    if seen_ids.contains(&rule.id) {
        return Err(format!("duplicate rule id '{}'", rule.id));
    }
    if rule.feature_kind().is_none() {
        let known: Vec<&str> = FeatureKind::all().iter().map(|k| k.name()).collect();
        let mut reason = format!("unknown feature kind '{}'", rule.match_spec.feature);
        if let Some(suggestion) =
            suggest::best_match(&rule.match_spec.feature, &known, SUGGEST_DISTANCE)
        {
            reason.push_str(&format!(" (did you mean '{}'?)", suggestion));
        }
        return Err(reason);
    }
    if !rule.is_actionable() {
        return Err(format!(
            "rule is not actionable for type '{}' (no usable template)",
            rule.rule_type.name()
        ));
    }
    if rule.risk.base > 100 {
        return Err(format!("risk.base {} exceeds 100", rule.risk.base));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toml_rule(id: &str, feature: &str, rule_type: &str, action: &str) -> String {
        format!(
            r#"
[[rules]]
id = "{id}"
type = "{rule_type}"
title = "Test rule"
[rules.match]
feature = "{feature}"
[rules.action]
{action}
[rules.risk]
base = 20
"#
        )
    }

    #[test]
    fn test_load_valid_rule() {
        let text = toml_rule(
            "R1",
            "seq_scan_big_table",
            "index",
            r#"ddl_template = "CREATE INDEX {index_name} ON {table} ({cols});""#,
        );
        let set = RuleSet::from_toml_str(&text, "<test>").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.skipped.is_empty());
        assert_eq!(set.rules[0].feature_kind(), Some(FeatureKind::SeqScanBigTable));
    }

    #[test]
    fn test_unknown_feature_kind_skipped_with_suggestion() {
        let text = toml_rule(
            "R1",
            "seq_scan_big_tabel",
            "index",
            r#"ddl_template = "CREATE INDEX i ON t (c);""#,
        );
        let set = RuleSet::from_toml_str(&text, "<test>").unwrap();
        assert!(set.is_empty());
        assert_eq!(set.skipped.len(), 1);
        assert!(set.skipped[0].reason.contains("seq_scan_big_table"));
    }

    #[test]
    fn test_not_actionable_skipped() {
        // index rule with only an alter template
        let text = toml_rule(
            "R1",
            "seq_scan_big_table",
            "index",
            r#"alter = "SET work_mem = '64MB';""#,
        );
        let set = RuleSet::from_toml_str(&text, "<test>").unwrap();
        assert!(set.is_empty());
        assert!(set.skipped[0].reason.contains("not actionable"));
    }

    #[test]
    fn test_duplicate_id_skipped() {
        let a = toml_rule(
            "R1",
            "seq_scan_big_table",
            "index",
            r#"ddl_template = "CREATE INDEX a ON t (c);""#,
        );
        let b = toml_rule(
            "R1",
            "modulo_filter",
            "sql_rewrite",
            r#"rewrite_sql_hint = "rewrite it""#,
        );
        let set = RuleSet::from_toml_str(&format!("{a}\n{b}"), "<test>").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.skipped[0].reason.contains("duplicate"));
    }

    #[test]
    fn test_invalid_type_is_parse_error() {
        let text = toml_rule(
            "R1",
            "seq_scan_big_table",
            "reindex",
            r#"ddl_template = "x""#,
        );
        assert!(RuleSet::from_toml_str(&text, "<test>").is_err());
    }

    #[test]
    fn test_default_rule_set_loads_cleanly() {
        let set = RuleSet::load_default();
        assert!(!set.is_empty());
        assert!(
            set.skipped.is_empty(),
            "builtin rules must all validate: {:?}",
            set.skipped
        );
    }

    #[test]
    fn test_load_directory_in_file_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("20_second.toml"),
            toml_rule(
                "R_B",
                "modulo_filter",
                "sql_rewrite",
                r#"rewrite_sql_hint = "b""#,
            ),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("10_first.toml"),
            toml_rule(
                "R_A",
                "seq_scan_big_table",
                "index",
                r#"ddl_template = "CREATE INDEX {index_name} ON {table} ({cols});""#,
            ),
        )
        .unwrap();
        let set = RuleSet::load_path(dir.path()).unwrap();
        let ids: Vec<_> = set.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["R_A", "R_B"]);
    }

    #[test]
    fn test_rank_orders() {
        assert!(RecommendationType::SqlRewrite.rank() < RecommendationType::Index.rank());
        assert!(RecommendationType::Index.rank() < RecommendationType::DbSetting.rank());
        assert!(Effort::Low.rank() < Effort::High.rank());
        assert!(Confidence::High.rank() < Confidence::Low.rank());
    }
}
