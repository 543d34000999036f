//! Reason codes for operational failures.
//!
//! Stable identifiers for why a plan or statistics fetch failed or degraded.
//! The pipeline itself never fails; these classify what happened in the I/O
//! layer around it so automation can react without parsing messages.

use serde::Serialize;

/// Reason code taxonomy for operational output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Connection to database timed out
    ConnectionTimeout,
    /// Connection to database failed
    ConnectionFailed,
    /// Statement execution timed out (statement_timeout)
    StatementTimeout,
    /// Query was cancelled (e.g., by Ctrl+C)
    QueryCancelled,
    /// Insufficient database privileges
    MissingPrivilege,
    /// Referenced table or relation does not exist
    MissingTable,
    /// Referenced schema does not exist
    MissingSchema,
    /// Statistics could not be fetched; analysis ran without them
    StatsUnavailable,
    /// Rule file could not be read or parsed
    RulesUnavailable,
    /// Unexpected internal error
    InternalError,
}

impl ReasonCode {
    /// Human-readable description of the reason code.
    pub fn description(&self) -> &'static str {
        match self {
            ReasonCode::ConnectionTimeout => "connection timed out",
            ReasonCode::ConnectionFailed => "connection failed",
            ReasonCode::StatementTimeout => "statement timeout exceeded",
            ReasonCode::QueryCancelled => "query was cancelled",
            ReasonCode::MissingPrivilege => "insufficient privileges",
            ReasonCode::MissingTable => "referenced table does not exist",
            ReasonCode::MissingSchema => "referenced schema does not exist",
            ReasonCode::StatsUnavailable => "statistics unavailable",
            ReasonCode::RulesUnavailable => "rule files unavailable",
            ReasonCode::InternalError => "internal error",
        }
    }

    /// Classify a tokio_postgres error into a reason code.
    pub fn from_postgres_error(err: &tokio_postgres::Error) -> Self {
        // SQLSTATE codes first (most reliable)
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code();
            return match code {
                "08000" | "08001" | "08003" | "08004" | "08006" => ReasonCode::ConnectionFailed,
                "42501" => ReasonCode::MissingPrivilege,
                "42P01" => ReasonCode::MissingTable,
                "3F000" => ReasonCode::MissingSchema,
                "57014" => ReasonCode::QueryCancelled, // includes statement_timeout
                _ => Self::classify_message(&err.to_string().to_lowercase()),
            };
        }
        Self::classify_message(&err.to_string().to_lowercase())
    }

    /// Classify an error message into a reason code using heuristics.
    fn classify_message(msg: &str) -> Self {
        if msg.contains("permission denied") || msg.contains("must be superuser") {
            ReasonCode::MissingPrivilege
        } else if msg.contains("statement timeout") || msg.contains("canceling statement") {
            ReasonCode::StatementTimeout
        } else if msg.contains("connection refused")
            || msg.contains("could not connect")
            || msg.contains("connection timed out")
        {
            ReasonCode::ConnectionTimeout
        } else if msg.contains("does not exist") && msg.contains("relation") {
            ReasonCode::MissingTable
        } else if msg.contains("does not exist") && msg.contains("schema") {
            ReasonCode::MissingSchema
        } else {
            ReasonCode::InternalError
        }
    }
}

/// Structured reason information for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct ReasonInfo {
    /// Stable reason code for automation
    pub code: ReasonCode,
    /// Human-readable message
    pub message: String,
}

impl ReasonInfo {
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create from a tokio_postgres error.
    pub fn from_postgres_error(err: &tokio_postgres::Error) -> Self {
        Self {
            code: ReasonCode::from_postgres_error(err),
            message: err.to_string(),
        }
    }
}
