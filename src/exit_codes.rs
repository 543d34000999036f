//! Exit code policy for pgadvise.
//!
#![allow(dead_code)] // Constants defined for policy documentation, used selectively
//!
//! ## Findings (0-2)
//!
//! Analysis commands exit with the risk severity:
//! - `0` = Info (nothing worth acting on)
//! - `1` = Warning (tuning opportunities found)
//! - `2` = Critical (severe plan problems found)
//!
//! ## Operational Failures (10+)
//!
//! Operational failures (connection issues, invalid config, unreadable
//! rule files) use codes >= 10 to distinguish from findings:
//! - `10` = General operational failure
//! - `11` = Connection failure
//! - `12` = Configuration or rule-file error
//!
//! This separation allows automation to distinguish between:
//! - "The query has problems" (findings, 1-2)
//! - "We couldn't analyze the query" (operational failure, 10+)

/// Exit code: informational findings only
pub const INFO: i32 = 0;

/// Exit code: warning-level findings
pub const WARNING: i32 = 1;

/// Exit code: critical findings
pub const CRITICAL: i32 = 2;

/// Exit code: general operational failure
pub const OPERATIONAL_FAILURE: i32 = 10;

/// Exit code: connection failure
pub const CONNECTION_FAILURE: i32 = 11;

/// Exit code: configuration or rule-file error
pub const CONFIG_ERROR: i32 = 12;

/// Exit code: interrupted by Ctrl+C (SIGINT)
pub const INTERRUPTED: i32 = 130;
