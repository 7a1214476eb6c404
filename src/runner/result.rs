use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::unit::{ConfigScope, UnitId};

/// The recorded outcome of one invocation of a unit or configuration method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
    /// Failed, but the unit's cumulative pass rate still meets its threshold.
    FailedWithinSuccessPercentage,
    /// Not finished when the run timed out.
    Incomplete,
}

impl Outcome {
    /// Whether a dependent of a unit with this outcome should be skipped.
    pub fn blocks_dependents(self) -> bool {
        matches!(self, Self::Failed | Self::Skipped | Self::Incomplete)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::FailedWithinSuccessPercentage => write!(f, "failed-within-success-percentage"),
            Self::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// Why an invocation did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCause {
    pub kind: FailureKind,
    pub message: String,
    pub detail: Option<String>,
}

impl FailureCause {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::AssertionFailed, message)
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FailureCause {}

/// Classification of failure causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The body returned an error.
    AssertionFailed,
    /// The body panicked.
    Panicked,
    /// The invocation exceeded the unit's own timeout.
    Timeout,
    /// A configuration method of an enclosing scope failed.
    ConfigurationFailed,
    /// An upstream unit failed or was skipped.
    DependencyFailed,
    /// The run timed out before the unit finished.
    Incomplete,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssertionFailed => write!(f, "assertion failed"),
            Self::Panicked => write!(f, "panicked"),
            Self::Timeout => write!(f, "timeout"),
            Self::ConfigurationFailed => write!(f, "configuration failed"),
            Self::DependencyFailed => write!(f, "dependency failed"),
            Self::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// Result of one invocation of a test unit or configuration method.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitResult {
    pub unit: UnitId,
    pub name: String,
    pub instance: u32,
    /// `Some` for configuration methods.
    pub scope: Option<ConfigScope>,
    pub outcome: Outcome,
    pub cause: Option<FailureCause>,
    pub invocation: usize,
    pub started: SystemTime,
    pub ended: SystemTime,
    /// Position in the aggregator's append order; assigned on record.
    pub sequence: u64,
}

impl UnitResult {
    fn with(unit: UnitId, name: &str, outcome: Outcome, cause: Option<FailureCause>) -> Self {
        let now = SystemTime::now();
        Self {
            unit,
            name: name.to_owned(),
            instance: 0,
            scope: None,
            outcome,
            cause,
            invocation: 0,
            started: now,
            ended: now,
            sequence: 0,
        }
    }

    pub fn passed(unit: UnitId, name: &str) -> Self {
        Self::with(unit, name, Outcome::Passed, None)
    }

    pub fn failed(unit: UnitId, name: &str, cause: FailureCause) -> Self {
        Self::with(unit, name, Outcome::Failed, Some(cause))
    }

    pub fn failed_within_success_percentage(unit: UnitId, name: &str, cause: FailureCause) -> Self {
        Self::with(unit, name, Outcome::FailedWithinSuccessPercentage, Some(cause))
    }

    pub fn skipped(unit: UnitId, name: &str, cause: FailureCause) -> Self {
        Self::with(unit, name, Outcome::Skipped, Some(cause))
    }

    pub fn incomplete(unit: UnitId, name: &str, cause: FailureCause) -> Self {
        Self::with(unit, name, Outcome::Incomplete, Some(cause))
    }

    #[must_use]
    pub fn timed(mut self, started: SystemTime, ended: SystemTime) -> Self {
        self.started = started;
        self.ended = ended;
        self
    }

    #[must_use]
    pub fn for_invocation(mut self, invocation: usize) -> Self {
        self.invocation = invocation;
        self
    }

    #[must_use]
    pub fn for_instance(mut self, instance: u32) -> Self {
        self.instance = instance;
        self
    }

    #[must_use]
    pub fn in_scope(mut self, scope: ConfigScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn duration(&self) -> Duration {
        self.ended.duration_since(self.started).unwrap_or_default()
    }

    pub fn is_configuration(&self) -> bool {
        self.scope.is_some()
    }
}

/// Entry in the ordered log of everything that was actually invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokedMethod {
    pub unit: UnitId,
    pub name: String,
    pub scope: Option<ConfigScope>,
    pub invocation: usize,
}

/// Aggregate counts over test-unit results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failed_within_success_percentage: usize,
    pub incomplete: usize,
    pub configuration_failures: usize,
    pub configuration_skips: usize,
}

impl RunSummary {
    /// Whether the run was fully successful: nothing failed and nothing was left unfinished.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.incomplete == 0 && self.configuration_failures == 0
    }

    pub fn from_results(results: &[UnitResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            if r.is_configuration() {
                match r.outcome {
                    Outcome::Failed => summary.configuration_failures += 1,
                    Outcome::Skipped => summary.configuration_skips += 1,
                    _ => {}
                }
                continue;
            }
            summary.total += 1;
            match r.outcome {
                Outcome::Passed => summary.passed += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::FailedWithinSuccessPercentage => {
                    summary.failed_within_success_percentage += 1;
                }
                Outcome::Incomplete => summary.incomplete += 1,
            }
        }
        summary
    }
}

/// Concurrent, append-only store of results keyed by unit.
///
/// Safe to record into from any number of worker threads. Once sealed, late
/// test-unit records from abandoned threads are dropped; configuration
/// results are still accepted so the after-scope methods can be reported.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    tests: DashMap<UnitId, Vec<UnitResult>>,
    configurations: DashMap<UnitId, Vec<UnitResult>>,
    invoked: Mutex<Vec<InvokedMethod>>,
    sequence: AtomicU64,
    sealed: RwLock<bool>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result. Returns `false` if it was a test-unit result
    /// arriving after [`seal`](Self::seal).
    pub fn record(&self, result: UnitResult) -> bool {
        let sealed = self.sealed.read();
        if *sealed && !result.is_configuration() {
            tracing::debug!(unit = %result.name, "dropping result recorded after seal");
            return false;
        }
        self.insert(result);
        true
    }

    /// Append a result regardless of the seal. Used by the run owner to mark
    /// unfinished units after a timeout.
    pub(crate) fn force_record(&self, result: UnitResult) {
        self.insert(result);
    }

    fn insert(&self, mut result: UnitResult) {
        result.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let map = if result.is_configuration() {
            &self.configurations
        } else {
            &self.tests
        };
        map.entry(result.unit).or_default().push(result);
    }

    /// Log that a unit or configuration method is actually being invoked.
    pub fn record_invoked(&self, invoked: InvokedMethod) {
        let sealed = self.sealed.read();
        if *sealed && invoked.scope.is_none() {
            return;
        }
        self.invoked.lock().push(invoked);
    }

    /// Stop accepting test-unit results. Waits for records already in progress.
    pub fn seal(&self) {
        *self.sealed.write() = true;
    }

    pub fn is_sealed(&self) -> bool {
        *self.sealed.read()
    }

    pub fn results_for(&self, unit: UnitId) -> Vec<UnitResult> {
        self.tests
            .get(&unit)
            .or_else(|| self.configurations.get(&unit))
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// The first recorded outcome of this unit that blocks dependents, if any.
    pub fn blocking_outcome(&self, unit: UnitId) -> Option<Outcome> {
        self.tests.get(&unit).and_then(|results| {
            results
                .iter()
                .map(|r| r.outcome)
                .find(|o| o.blocks_dependents())
        })
    }


    /// Test-unit results in record order.
    pub fn test_results(&self) -> Vec<UnitResult> {
        Self::ordered(&self.tests)
    }

    /// Configuration-method results in record order.
    pub fn configuration_results(&self) -> Vec<UnitResult> {
        Self::ordered(&self.configurations)
    }

    /// Names of invoked units and configuration methods, in invocation order.
    pub fn invoked(&self) -> Vec<InvokedMethod> {
        self.invoked.lock().clone()
    }

    pub fn summary(&self) -> RunSummary {
        let mut all = self.test_results();
        all.extend(self.configuration_results());
        RunSummary::from_results(&all)
    }

    fn ordered(map: &DashMap<UnitId, Vec<UnitResult>>) -> Vec<UnitResult> {
        let mut all: Vec<UnitResult> = map
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|r| r.sequence);
        all
    }
}
