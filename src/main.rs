use anyhow::{Context, Result};
use clap::{error::ErrorKind, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use pgadvise::advisor::{advise, AdviseOptions, AdviseResult};
use pgadvise::config::Config;
use pgadvise::connection;
use pgadvise::diagnostic::{self, setup_ctrlc_handler, DiagnosticSession, TimeoutConfig};
use pgadvise::exit_codes;
use pgadvise::extract::ExtractContext;
use pgadvise::output::{schema, AdviseOutput, JsonError, Output};
use pgadvise::plan::Plan;
use pgadvise::reason_codes::{ReasonCode, ReasonInfo};
use pgadvise::rules::RuleSet;
use pgadvise::tips::{show_tip, TipContext};

/// Version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "pgadvise")]
#[command(version = VERSION)]
#[command(about = "PostgreSQL plan advisor", long_about = None)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Database URL (overrides DATABASE_URL env var and config file)
    #[arg(short = 'd', long = "database-url", global = true)]
    database_url: Option<String>,

    /// Path to config file (default: ./pgadvise.toml)
    #[arg(long = "config", global = true)]
    config_path: Option<PathBuf>,

    /// Path to a rule file or directory of rule files (default: built-in rules)
    #[arg(long = "rules", global = true)]
    rules_path: Option<PathBuf>,

    /// Minimal output (errors only)
    #[arg(long, global = true)]
    quiet: bool,

    /// Show progress detail
    #[arg(long, global = true)]
    verbose: bool,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Connection timeout (e.g., "5s", "500ms"). Default: 5s
    #[arg(long = "connect-timeout", global = true, value_name = "DURATION")]
    connect_timeout: Option<String>,

    /// Statement timeout (e.g., "30s", "1m"). Default: 30s
    #[arg(long = "statement-timeout", global = true, value_name = "DURATION")]
    statement_timeout: Option<String>,

    /// Lock timeout (e.g., "500ms", "1s"). Default: 500ms
    #[arg(long = "lock-timeout", global = true, value_name = "DURATION")]
    lock_timeout: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a saved EXPLAIN (FORMAT JSON) plan file
    Analyze {
        /// Path to the EXPLAIN JSON file
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Original query text
        #[arg(long)]
        sql: Option<String>,
        /// Read the original query text from a file
        #[arg(long = "sql-file", conflicts_with = "sql")]
        sql_file: Option<PathBuf>,
    },
    /// Run EXPLAIN against the database and analyze the plan
    Sql {
        /// Query to explain and analyze
        query: String,
        /// Use EXPLAIN ANALYZE (executes the query)
        #[arg(long)]
        analyze: bool,
    },
    /// Rule set commands (list, check)
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
}

#[derive(Subcommand)]
enum RulesCommands {
    /// Show the loaded rule set
    List,
    /// Validate rule files and report rejected rules
    Check,
}

/// Parse CLI timeout options into a TimeoutConfig.
fn parse_timeout_config(cli: &Cli) -> Result<TimeoutConfig> {
    let connect_timeout = cli
        .connect_timeout
        .as_ref()
        .map(|s| diagnostic::parse_duration(s))
        .transpose()
        .context("Invalid --connect-timeout")?;

    let statement_timeout = cli
        .statement_timeout
        .as_ref()
        .map(|s| diagnostic::parse_duration(s))
        .transpose()
        .context("Invalid --statement-timeout")?;

    let lock_timeout = cli
        .lock_timeout
        .as_ref()
        .map(|s| diagnostic::parse_duration(s))
        .transpose()
        .context("Invalid --lock-timeout")?;

    Ok(TimeoutConfig::new(
        connect_timeout,
        statement_timeout,
        lock_timeout,
    ))
}

/// Load the rule set: --rules flag beats config file beats built-in rules.
fn load_rule_set(cli_rules: Option<&Path>, config: &Config, output: &Output) -> Result<RuleSet> {
    let path = cli_rules.map(|p| p.to_path_buf()).or_else(|| {
        config
            .rules
            .as_ref()
            .and_then(|r| r.path.as_deref())
            .map(PathBuf::from)
    });

    let set = match path {
        Some(p) => RuleSet::load_path(&p)?,
        None => RuleSet::load_default(),
    };

    for skipped in &set.skipped {
        output.warn(&format!(
            "Skipped rule '{}' ({}): {}",
            skipped.id, skipped.source, skipped.reason
        ));
    }
    output.verbose(&format!("Loaded {} rules", set.len()));
    Ok(set)
}

/// Print an advise result and return the findings exit code.
fn emit_result(
    result: &AdviseResult,
    warnings: Vec<ReasonInfo>,
    output: &Output,
) -> Result<i32> {
    if output.is_json() {
        AdviseOutput::new(schema::ADVISE, result, result.risk.severity)
            .with_warnings(warnings)
            .print()?;
    } else {
        for warning in &warnings {
            output.warn(&format!("Warning: {}", warning.message));
        }
        output.data(&result.explain_md);
    }
    Ok(result.risk.severity.exit_code())
}

async fn run(cli: Cli, output: &Output) -> Result<i32> {
    let config = Config::load(cli.config_path.as_deref())?;
    let options = AdviseOptions {
        extractor: config.extractor_config(),
        plan_evidence_nodes: config.plan_evidence_nodes(),
    };

    match &cli.command {
        Commands::Analyze {
            file,
            sql,
            sql_file,
        } => {
            let rules = load_rule_set(cli.rules_path.as_deref(), &config, output)?;

            let raw = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read plan file {}", file.display()))?;
            let json: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("Plan file {} is not valid JSON", file.display()))?;
            let plan = Plan::from_json(&json)?;

            let sql_text = match (sql, sql_file) {
                (Some(text), _) => text.clone(),
                (None, Some(path)) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read SQL file {}", path.display()))?,
                (None, None) => String::new(),
            };

            let result = advise(
                Some(&plan),
                &sql_text,
                &ExtractContext::default(),
                &rules,
                &options,
            );
            let code = emit_result(&result, vec![], output)?;
            show_tip(
                TipContext::AnalyzeFile {
                    had_findings: !result.recommendations.is_empty(),
                },
                output.quiet,
            );
            Ok(code)
        }

        Commands::Sql { query, analyze } => {
            let rules = load_rule_set(cli.rules_path.as_deref(), &config, output)?;
            let conn = connection::resolve(cli.database_url.as_deref(), &config)?;
            if !output.is_json() {
                conn.print_banner();
            }

            let timeouts = parse_timeout_config(&cli)?;
            let session = match DiagnosticSession::connect(&conn.url, timeouts).await {
                Ok(session) => session,
                Err(e) => {
                    if output.is_json() {
                        JsonError::new(format!("{e:#}")).print();
                    } else {
                        eprintln!("Error: {e:#}");
                    }
                    return Ok(exit_codes::CONNECTION_FAILURE);
                }
            };
            setup_ctrlc_handler(session.cancel_token());

            let plan_json = session.explain_json(query, *analyze).await?;
            let plan = Plan::from_json(&plan_json)?;

            // settings and statistics are best-effort context, not hard inputs
            let mut warnings = Vec::new();
            let work_mem_mb = match session.work_mem_mb().await {
                Ok(mb) => Some(mb),
                Err(e) => {
                    warnings.push(ReasonInfo::new(
                        ReasonCode::StatsUnavailable,
                        format!("work_mem unavailable: {e:#}"),
                    ));
                    None
                }
            };
            let stats = match session.stats_age().await {
                Ok(stats) => stats,
                Err(e) => {
                    warnings.push(ReasonInfo::new(
                        ReasonCode::StatsUnavailable,
                        format!("statistics age unavailable: {e:#}"),
                    ));
                    vec![]
                }
            };

            let ctx = ExtractContext { work_mem_mb, stats };
            let result = advise(Some(&plan), query, &ctx, &rules, &options);
            let code = emit_result(&result, warnings, output)?;
            show_tip(TipContext::AnalyzeLive { analyzed: *analyze }, output.quiet);
            Ok(code)
        }

        Commands::Rules { command } => {
            let rules = load_rule_set(cli.rules_path.as_deref(), &config, output)?;
            match command {
                RulesCommands::List => {
                    if output.is_json() {
                        let data = serde_json::json!({
                            "rules": rules.rules,
                            "skipped": rules.skipped,
                        });
                        println!("{}", serde_json::to_string_pretty(&data)?);
                    } else {
                        for rule in &rules.rules {
                            output.data(&format!(
                                "{}  type={}  feature={}  risk={}  {}",
                                rule.id,
                                rule.rule_type.name(),
                                rule.match_spec.feature,
                                rule.risk.base,
                                rule.title
                            ));
                        }
                    }
                    Ok(exit_codes::INFO)
                }
                RulesCommands::Check => {
                    let skipped = rules.skipped.len();
                    if output.is_json() {
                        let data = serde_json::json!({
                            "loaded": rules.len(),
                            "skipped": rules.skipped,
                        });
                        println!("{}", serde_json::to_string_pretty(&data)?);
                    } else {
                        output.data(&format!(
                            "{} {} rules loaded",
                            "ok:".green(),
                            rules.len()
                        ));
                        for s in &rules.skipped {
                            output.data(&format!(
                                "{} {} ({}): {}",
                                "skipped:".red(),
                                s.id,
                                s.source,
                                s.reason
                            ));
                        }
                    }
                    show_tip(TipContext::RulesCheck { skipped }, output.quiet);
                    if skipped > 0 {
                        Ok(exit_codes::CONFIG_ERROR)
                    } else {
                        Ok(exit_codes::INFO)
                    }
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before parsing CLI so env vars are available)
    let _ = dotenvy::dotenv();

    // Check for --json flag early (before full parsing) for error handling
    let json_mode = std::env::args().any(|arg| arg == "--json");

    // Use try_parse to handle clap errors in JSON mode
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            match e.kind() {
                // --help and --version print the same text either mode
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
                _ if json_mode => {
                    JsonError::new(e.to_string()).print();
                    std::process::exit(2);
                }
                _ => e.exit(),
            }
        }
    };

    let output = Output::new(cli.json, cli.quiet, cli.verbose);

    match run(cli, &output).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if output.is_json() {
                // JSON mode: structured error to stdout
                JsonError::new(format!("{e:#}")).print();
            } else {
                // Human mode: error to stderr with full chain
                eprintln!("Error: {e:#}");
            }
            std::process::exit(exit_codes::OPERATIONAL_FAILURE);
        }
    }
}
