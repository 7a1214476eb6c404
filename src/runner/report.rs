use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::runner::config::RunConfig;
use crate::runner::executor::{SuiteResult, TestRunResult};
use crate::runner::result::{RunSummary, UnitResult};

/// Serializable suite result for emitter output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunReport {
    pub suite: String,
    pub run: RunMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<UnitResultReport>,
    pub tests: Vec<TestReport>,
    pub summary: SummaryReport,
}

/// How the run was configured and how long it took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub parallel: String,
    pub thread_count: usize,
    pub duration_ms: u64,
}

/// One test of the suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    pub results: Vec<UnitResultReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<UnitResultReport>,
    pub summary: SummaryReport,
}

/// A single invocation's result in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResultReport {
    pub order: usize,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub instance: u32,
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub invocation: usize,
    pub outcome: String,
    /// Milliseconds since the Unix epoch.
    pub started_ms: u64,
    pub ended_ms: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<CauseReport>,
}

/// Failure cause detail in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CauseReport {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary statistics in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failed_within_success_percentage: usize,
    pub incomplete: usize,
    pub configuration_failures: usize,
    pub success: bool,
}

fn is_zero_u32(n: &u32) -> bool {
    *n == 0
}

fn is_zero_usize(n: &usize) -> bool {
    *n == 0
}

fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

fn unit_reports(results: &[UnitResult]) -> Vec<UnitResultReport> {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| UnitResultReport {
            order: i + 1,
            unit: r.name.clone(),
            scope: r.scope.map(|s| s.to_string()),
            instance: r.instance,
            invocation: r.invocation,
            outcome: r.outcome.to_string(),
            started_ms: epoch_ms(r.started),
            ended_ms: epoch_ms(r.ended),
            duration_ms: r.duration().as_millis() as u64,
            cause: r.cause.as_ref().map(|c| CauseReport {
                kind: c.kind.to_string(),
                message: c.message.clone(),
                detail: c.detail.clone(),
            }),
        })
        .collect()
}

fn summary_report(summary: &RunSummary) -> SummaryReport {
    SummaryReport {
        total: summary.total,
        passed: summary.passed,
        failed: summary.failed,
        skipped: summary.skipped,
        failed_within_success_percentage: summary.failed_within_success_percentage,
        incomplete: summary.incomplete,
        configuration_failures: summary.configuration_failures,
        success: summary.success(),
    }
}

fn test_report(test: &TestRunResult) -> TestReport {
    TestReport {
        name: test.name.clone(),
        duration_ms: test.duration.as_millis() as u64,
        timed_out: test.timed_out,
        results: unit_reports(&test.results),
        configurations: unit_reports(&test.configurations),
        summary: summary_report(&test.summary),
    }
}

/// Convert a [`SuiteResult`] into a serializable [`TestRunReport`].
pub fn to_report(result: &SuiteResult, config: &RunConfig) -> TestRunReport {
    TestRunReport {
        suite: result.name.clone(),
        run: RunMetadata {
            parallel: config.parallel.to_string(),
            thread_count: config.thread_count,
            duration_ms: result.duration.as_millis() as u64,
        },
        configurations: unit_reports(&result.configurations),
        tests: result.tests.iter().map(test_report).collect(),
        summary: summary_report(&result.summary()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::runner::result::{FailureCause, FailureKind};
    use crate::unit::{ConfigScope, UnitId};

    fn at(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn make_test(results: Vec<UnitResult>) -> TestRunResult {
        TestRunResult {
            name: "Login".into(),
            summary: RunSummary::from_results(&results),
            results,
            configurations: vec![],
            invoked: vec![],
            timed_out: false,
            duration: Duration::from_millis(500),
        }
    }

    fn make_suite(tests: Vec<TestRunResult>) -> SuiteResult {
        SuiteResult {
            name: "Smoke".into(),
            configurations: vec![],
            tests,
            duration: Duration::from_millis(750),
        }
    }

    #[test]
    fn report_from_passing_run() {
        let suite = make_suite(vec![make_test(vec![
            UnitResult::passed(UnitId::next(), "Auth.login").timed(at(1_000), at(1_120)),
        ])]);
        let report = to_report(&suite, &RunConfig::default());
        assert_eq!(report.suite, "Smoke");
        assert_eq!(report.run.duration_ms, 750);
        assert_eq!(report.run.parallel, "none");
        let unit = &report.tests[0].results[0];
        assert_eq!(unit.outcome, "passed");
        assert_eq!(unit.started_ms, 1_000);
        assert_eq!(unit.ended_ms, 1_120);
        assert_eq!(unit.duration_ms, 120);
        assert!(unit.cause.is_none());
        assert!(report.summary.success);
    }

    #[test]
    fn report_carries_cause() {
        let suite = make_suite(vec![make_test(vec![UnitResult::skipped(
            UnitId::next(),
            "Auth.logout",
            FailureCause::new(FailureKind::DependencyFailed, "upstream Auth.login failed")
                .with_detail("expected 200"),
        )])]);
        let report = to_report(&suite, &RunConfig::default());
        let cause = report.tests[0].results[0].cause.as_ref().unwrap();
        assert_eq!(cause.kind, "dependency failed");
        assert_eq!(cause.message, "upstream Auth.login failed");
        assert_eq!(cause.detail.as_deref(), Some("expected 200"));
    }

    #[test]
    fn report_orders_results() {
        let suite = make_suite(vec![make_test(vec![
            UnitResult::passed(UnitId::next(), "A.first"),
            UnitResult::passed(UnitId::next(), "A.second"),
        ])]);
        let report = to_report(&suite, &RunConfig::default());
        assert_eq!(report.tests[0].results[0].order, 1);
        assert_eq!(report.tests[0].results[1].order, 2);
    }

    #[test]
    fn suite_configurations_are_reported_with_scope() {
        let mut suite = make_suite(vec![]);
        suite.configurations.push(
            UnitResult::failed(UnitId::next(), "Env.boot", FailureCause::assertion("down"))
                .in_scope(ConfigScope::BeforeSuite),
        );
        let report = to_report(&suite, &RunConfig::default());
        assert_eq!(report.configurations[0].scope.as_deref(), Some("before-suite"));
        assert_eq!(report.summary.configuration_failures, 1);
        assert!(!report.summary.success);
    }
}
