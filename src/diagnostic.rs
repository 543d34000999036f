//! Bounded database sessions for plan fetching.
//!
//! All live analysis goes through DiagnosticSession to ensure:
//! - Connection timeout (fast fail on unreachable hosts)
//! - Statement timeout (bounded EXPLAIN runtime)
//! - Lock timeout (never wait on locks)
//! - Ctrl+C cancellation (best-effort query cancellation)

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_postgres::{CancelToken, Client, NoTls};

use crate::extract::RelationStats;

/// Default timeout values for diagnostic sessions.
/// These are conservative defaults for production safety.
pub mod defaults {
    use std::time::Duration;

    /// Connection timeout: fail fast on unreachable hosts
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Statement timeout: bound EXPLAIN runtime
    pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Lock timeout: never wait on locks (analysis should be non-blocking)
    pub const LOCK_TIMEOUT: Duration = Duration::from_millis(500);
}

/// Timeout configuration for a diagnostic session.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub connect_timeout: Duration,
    pub statement_timeout: Duration,
    pub lock_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: defaults::CONNECT_TIMEOUT,
            statement_timeout: defaults::STATEMENT_TIMEOUT,
            lock_timeout: defaults::LOCK_TIMEOUT,
        }
    }
}

impl TimeoutConfig {
    pub fn new(
        connect_timeout: Option<Duration>,
        statement_timeout: Option<Duration>,
        lock_timeout: Option<Duration>,
    ) -> Self {
        Self {
            connect_timeout: connect_timeout.unwrap_or(defaults::CONNECT_TIMEOUT),
            statement_timeout: statement_timeout.unwrap_or(defaults::STATEMENT_TIMEOUT),
            lock_timeout: lock_timeout.unwrap_or(defaults::LOCK_TIMEOUT),
        }
    }

    fn format_pg_duration(d: Duration) -> String {
        format!("{}ms", d.as_millis())
    }

    /// SQL to set session-level timeouts.
    pub fn session_setup_sql(&self) -> String {
        format!(
            "SET statement_timeout = '{}'; SET lock_timeout = '{}';",
            Self::format_pg_duration(self.statement_timeout),
            Self::format_pg_duration(self.lock_timeout),
        )
    }
}

/// A bounded session wrapping a tokio_postgres Client.
///
/// Connection drops cleanly when the session is dropped.
pub struct DiagnosticSession {
    client: Client,
    pub timeouts: TimeoutConfig,
    cancel_token: CancelToken,
    /// Sender to signal connection task to stop (triggers on drop)
    _shutdown_tx: oneshot::Sender<()>,
}

impl DiagnosticSession {
    /// Connect with timeout enforcement.
    ///
    /// Sets session-level statement_timeout and lock_timeout after connecting.
    pub async fn connect(database_url: &str, timeouts: TimeoutConfig) -> Result<Self> {
        let connect_future = tokio_postgres::connect(database_url, NoTls);
        let (client, connection) = tokio::time::timeout(timeouts.connect_timeout, connect_future)
            .await
            .with_context(|| format!("Connection timed out after {:?}", timeouts.connect_timeout))?
            .with_context(|| "Failed to connect to database")?;

        let cancel_token = client.cancel_token();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            tokio::select! {
                _ = connection => {}
                _ = shutdown_rx => {}
            }
        });

        client
            .batch_execute(&timeouts.session_setup_sql())
            .await
            .context("Failed to set session timeouts")?;

        Ok(Self {
            client,
            timeouts,
            cancel_token,
            _shutdown_tx: shutdown_tx,
        })
    }

    /// Get a cloneable cancel token for Ctrl+C handling.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel_token.clone()
    }

    /// Run `EXPLAIN (FORMAT JSON)` on a query and return the raw plan JSON.
    ///
    /// With `analyze` the query is actually executed, so actual row counts
    /// become available; without it only planner estimates are returned.
    pub async fn explain_json(&self, query: &str, analyze: bool) -> Result<serde_json::Value> {
        let explain_opts = if analyze {
            "ANALYZE, FORMAT JSON, VERBOSE, BUFFERS"
        } else {
            "FORMAT JSON, VERBOSE"
        };
        let explain_query = format!("EXPLAIN ({}) {}", explain_opts, query);

        let row = self
            .client
            .query_one(&explain_query, &[])
            .await
            .context("Failed to execute EXPLAIN")?;

        // JSON arrives directly with the tokio-postgres with-serde_json-1 feature
        let plan_json: serde_json::Value = row.get(0);
        Ok(plan_json)
    }

    /// Fetch `work_mem` in megabytes from the current session settings.
    pub async fn work_mem_mb(&self) -> Result<f64> {
        let row = self
            .client
            .query_one("SELECT setting::bigint FROM pg_settings WHERE name = 'work_mem'", &[])
            .await
            .context("Failed to read work_mem")?;
        let kb: i64 = row.get(0); // pg_settings reports work_mem in KB
        Ok(kb as f64 / 1024.0)
    }

    /// Fetch statistics age for user tables, for staleness detection.
    pub async fn stats_age(&self) -> Result<Vec<RelationStats>> {
        let query = r#"
            SELECT
                schemaname || '.' || relname AS relation,
                extract(epoch from now() - greatest(last_analyze, last_autoanalyze))::bigint
                    / 86400 AS days_since_analyze
            FROM pg_stat_user_tables
        "#;
        let rows = self
            .client
            .query(query, &[])
            .await
            .context("Failed to read statistics age")?;

        Ok(rows
            .iter()
            .map(|row| RelationStats {
                relation: row.get("relation"),
                days_since_analyze: row.get("days_since_analyze"),
            })
            .collect())
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let (num_part, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else {
        // Default to seconds if no unit
        (s, "s")
    };

    let num: u64 = num_part
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration number: '{}'", num_part))?;

    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        _ => anyhow::bail!("Unknown duration unit: '{}'", unit),
    };

    Ok(duration)
}

/// Set up Ctrl+C (SIGINT) handling for graceful query cancellation.
///
/// When Ctrl+C is pressed:
/// 1. Attempts to cancel any running query via the cancel token
/// 2. Exits with the INTERRUPTED exit code
pub fn setup_ctrlc_handler(cancel_token: CancelToken) {
    use crate::exit_codes;

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Failed to listen for Ctrl+C: {}", e);
            return;
        }

        eprintln!("\nInterrupted (Ctrl+C). Cancelling query...");

        // best effort - may fail if the query already completed
        if let Err(e) = cancel_token.cancel_query(NoTls).await {
            eprintln!("Warning: Failed to cancel query: {}", e);
        }

        std::process::exit(exit_codes::INTERRUPTED);
    });
}
