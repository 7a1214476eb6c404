use std::io::Write;
use std::time::Duration;

use parking_lot::Mutex;

use crate::runner::listener::{Capability, Listener};
use crate::runner::result::{Outcome, RunSummary, UnitResult};

/// Format an outcome label for terminal output.
fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "PASSED",
        Outcome::Failed => "FAILED",
        Outcome::Skipped => "SKIPPED",
        Outcome::FailedWithinSuccessPercentage => "FLAKY",
        Outcome::Incomplete => "INCOMPLETE",
    }
}

/// Format a unit result as it completes.
pub fn format_unit_result(result: &UnitResult, verbose: u8) -> String {
    let label = outcome_label(result.outcome);
    let secs = result.duration().as_secs_f64();
    let mut line = format!("  [{label}] {}", result.name);
    if result.invocation > 0 {
        line.push_str(&format!(" #{}", result.invocation + 1));
    }
    line.push_str(&format!(" ({secs:.1}s)"));

    if let Some(cause) = &result.cause {
        line.push_str(&format!("\n         → {}", cause.message));
        if verbose > 1
            && let Some(detail) = &cause.detail
        {
            line.push_str(&format!("\n           {detail}"));
        }
    }
    line
}

/// Format a configuration method result. Passing ones are only shown at
/// higher verbosity.
pub fn format_configuration_result(result: &UnitResult, verbose: u8) -> Option<String> {
    if result.outcome == Outcome::Passed && verbose < 2 {
        return None;
    }
    let scope = result.scope.map(|s| s.to_string()).unwrap_or_default();
    let mut line = format!(
        "  [{}] @{scope} {}",
        outcome_label(result.outcome),
        result.name
    );
    if let Some(cause) = &result.cause {
        line.push_str(&format!("\n         → {}", cause.message));
    }
    Some(line)
}

/// Comma-separated non-zero counts, e.g. `3 passed, 1 skipped`.
pub fn format_counts(summary: &RunSummary) -> String {
    let mut parts = Vec::new();

    if summary.passed > 0 {
        parts.push(format!("{} passed", summary.passed));
    }
    if summary.failed > 0 {
        parts.push(format!("{} failed", summary.failed));
    }
    if summary.failed_within_success_percentage > 0 {
        parts.push(format!("{} flaky", summary.failed_within_success_percentage));
    }
    if summary.skipped > 0 {
        parts.push(format!("{} skipped", summary.skipped));
    }
    if summary.incomplete > 0 {
        parts.push(format!("{} incomplete", summary.incomplete));
    }
    if summary.configuration_failures > 0 {
        parts.push(format!(
            "{} configuration failures",
            summary.configuration_failures
        ));
    }

    if parts.is_empty() {
        parts.push("0 tests".into());
    }
    parts.join(", ")
}

/// Format the final summary line.
pub fn format_summary(summary: &RunSummary, duration: Duration) -> String {
    format!(
        "Results: {} ({:.1}s)",
        format_counts(summary),
        duration.as_secs_f64()
    )
}

/// Format the header printed when a test starts.
pub fn format_test_header(test: &str) -> String {
    format!("Running {test}...")
}

/// Prints progress lines to a writer as results arrive.
///
/// Verbosity 0 prints nothing, 1 prints unit results and failing
/// configurations, 2 adds passing configurations and failure detail.
pub struct ConsoleListener {
    verbose: u8,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleListener {
    const CAPABILITIES: [Capability; 3] = [
        Capability::ObservesTest,
        Capability::ObservesConfiguration,
        Capability::ObservesResults,
    ];

    /// Progress on stderr, leaving stdout for the report.
    pub fn stderr(verbose: u8) -> Self {
        Self::new(verbose, Box::new(std::io::stderr()))
    }

    pub fn new(verbose: u8, out: Box<dyn Write + Send>) -> Self {
        Self {
            verbose,
            out: Mutex::new(out),
        }
    }

    fn line(&self, text: &str) {
        if self.verbose == 0 {
            return;
        }
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{text}") {
            tracing::debug!(error = %e, "console write failed");
        }
    }
}

impl Listener for ConsoleListener {
    fn capabilities(&self) -> &[Capability] {
        &Self::CAPABILITIES
    }

    fn on_test_start(&self, test: &str) {
        self.line(&format_test_header(test));
    }

    fn on_test_finish(&self, test: &str, summary: &RunSummary) {
        self.line(&format!("{test}: {}\n", format_counts(summary)));
    }

    fn on_configuration_result(&self, result: &UnitResult) {
        if let Some(text) = format_configuration_result(result, self.verbose) {
            self.line(&text);
        }
    }

    fn on_result(&self, result: &UnitResult) {
        self.line(&format_unit_result(result, self.verbose));
    }
}
