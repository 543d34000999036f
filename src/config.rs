use anyhow::{bail, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::extract::{ExtractorConfig, DEFAULT_LARGE_TABLE_ROWS, DEFAULT_STATS_STALE_DAYS};
use crate::report::DEFAULT_PLAN_EVIDENCE_NODES;

/// Main configuration structure loaded from pgadvise.toml
#[derive(Deserialize, Default, Debug)]
pub struct Config {
    pub database: Option<DatabaseConfig>,
    pub rules: Option<RulesConfig>,
    pub advisor: Option<AdvisorConfig>,
}

#[derive(Deserialize, Debug)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct RulesConfig {
    /// Rule file, or directory of .toml rule files loaded in name order
    pub path: Option<String>,
}

/// Analysis thresholds. Anything unset falls back to the built-in defaults.
#[derive(Deserialize, Debug, Default)]
pub struct AdvisorConfig {
    pub large_table_rows: Option<i64>,
    pub stats_stale_days: Option<i64>,
    pub plan_evidence_nodes: Option<usize>,
}

impl Config {
    /// Load config from file, or return default if no config exists.
    /// If an explicit path is provided via --config, it MUST exist (error if not).
    /// If no path is provided, check ./pgadvise.toml (use default if not found).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    bail!("Config file not found: {}", p.display());
                }
                p
            }
            None => {
                let default_path = Path::new("pgadvise.toml");
                if default_path.exists() {
                    default_path
                } else {
                    return Ok(Config::default());
                }
            }
        };

        let contents = fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", config_path.display(), e))?;
        Ok(config)
    }

    /// Extractor thresholds with config overrides applied.
    pub fn extractor_config(&self) -> ExtractorConfig {
        let advisor = self.advisor.as_ref();
        ExtractorConfig {
            large_table_rows: advisor
                .and_then(|a| a.large_table_rows)
                .unwrap_or(DEFAULT_LARGE_TABLE_ROWS),
            stats_stale_days: advisor
                .and_then(|a| a.stats_stale_days)
                .unwrap_or(DEFAULT_STATS_STALE_DAYS),
        }
    }

    pub fn plan_evidence_nodes(&self) -> usize {
        self.advisor
            .as_ref()
            .and_then(|a| a.plan_evidence_nodes)
            .unwrap_or(DEFAULT_PLAN_EVIDENCE_NODES)
    }
}
