//! Contextual tips shown after commands to improve discoverability.
//!
//! Tips are shown:
//! - Only when stderr is a TTY (not in scripts/CI)
//! - Only when --quiet is not set
//! - One tip per command max
//! - Formatted subtly (dim text) so they don't look like command output

use std::io::{IsTerminal, Write};

/// Context for selecting an appropriate tip after a command.
pub enum TipContext {
    /// After analyzing a plan from a file
    AnalyzeFile { had_findings: bool },
    /// After a live EXPLAIN analysis
    AnalyzeLive { analyzed: bool },
    /// After rules check
    RulesCheck { skipped: usize },
}

/// Show a contextual tip if appropriate.
///
/// Tips are suppressed if:
/// - quiet mode is enabled
/// - stderr is not a TTY
pub fn show_tip(ctx: TipContext, quiet: bool) {
    if quiet {
        return;
    }

    // Only show tips on interactive terminals
    if !std::io::stderr().is_terminal() {
        return;
    }

    let tip = select_tip(ctx);

    // Print to stderr so it doesn't interfere with piped output
    let mut stderr = std::io::stderr();
    // Use dim ANSI escape for subtle appearance
    let _ = writeln!(stderr, "\n\x1b[2mTip: {}\x1b[0m", tip);
}

/// Select the most relevant tip for the given context.
fn select_tip(ctx: TipContext) -> &'static str {
    match ctx {
        TipContext::AnalyzeFile { had_findings } => {
            if had_findings {
                "`pgadvise sql <query> --analyze` runs EXPLAIN ANALYZE for actual row counts"
            } else {
                "`pgadvise rules list` shows which patterns pgadvise looks for"
            }
        }
        TipContext::AnalyzeLive { analyzed } => {
            if analyzed {
                "Re-run without --analyze when the query is too expensive to execute"
            } else {
                "Add --analyze to execute the query and compare actual vs estimated rows"
            }
        }
        TipContext::RulesCheck { skipped } => {
            if skipped > 0 {
                "Skipped rules list the reason; fix the rule file and re-run `pgadvise rules check`"
            } else {
                "`pgadvise analyze --file plan.json` runs these rules against a saved plan"
            }
        }
    }
}
