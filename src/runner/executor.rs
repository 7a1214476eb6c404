use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::graph::{self, DependencyGraph, GraphError, NodeStatus};
use crate::plan::interceptor::MethodInterceptorChain;
use crate::plan::membership::Membership;
use crate::plan::schedule::{self, Schedule};
use crate::plan::worker::WorkerGroupingPolicy;
use crate::runner::config::{FailurePolicy, ParallelMode, RunConfig};
use crate::runner::context::RunContext;
use crate::runner::invoker::UnitInvoker;
use crate::runner::lifecycle::{ConfigurationLifecycle, run_configurations};
use crate::runner::listener::ListenerRegistry;
use crate::runner::pool::{PoolOutcome, WorkerRunner, run_pool};
use crate::runner::result::{
    FailureCause, FailureKind, InvokedMethod, RunSummary, UnitResult,
};
use crate::unit::{ConfigScope, Suite, TestSet, TestUnit};

/// Drives a dependency graph to completion, sequentially or on a pool.
#[derive(Debug, Clone, Copy)]
pub struct GraphExecutor {
    mode: ParallelMode,
    thread_count: usize,
    timeout: Option<Duration>,
    policy: WorkerGroupingPolicy,
}

impl GraphExecutor {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            mode: config.parallel,
            thread_count: config.thread_count,
            timeout: config.timeout(),
            policy: WorkerGroupingPolicy::new(config.parallel, config.grouping_precedence),
        }
    }

    pub fn policy(&self) -> WorkerGroupingPolicy {
        self.policy
    }

    /// Run every node of `graph` through `runner`.
    ///
    /// The overall timeout only applies to the pool; the sequential loop
    /// runs to completion.
    ///
    /// # Errors
    ///
    /// Returns [`RunErrorKind::NoFreeNodes`] if the graph stalls, or the
    /// pool's spawn errors.
    pub fn execute(
        &self,
        graph: DependencyGraph,
        runner: Arc<dyn WorkerRunner>,
    ) -> Result<PoolOutcome, RunError> {
        if self.mode.is_parallel() {
            run_pool(graph, self.policy, self.thread_count, self.timeout, runner)
        } else {
            self.run_sequential(graph, runner.as_ref())
        }
    }

    fn run_sequential(
        &self,
        mut graph: DependencyGraph,
        runner: &dyn WorkerRunner,
    ) -> Result<PoolOutcome, RunError> {
        while !graph.is_finished() {
            let free = graph.free_nodes();
            if free.is_empty() {
                return Err(RunError::new(
                    RunErrorKind::NoFreeNodes,
                    format!("{} units remain but none is free", graph.remaining()),
                ));
            }
            for worker in self.policy.group(&graph, &free) {
                let nodes = worker.nodes();
                graph.set_statuses(&nodes, NodeStatus::Running)?;
                runner.run(&worker);
                graph.set_statuses(&nodes, NodeStatus::Finished)?;
            }
        }
        Ok(PoolOutcome::default())
    }
}

/// A test whose graph is built and validated but not yet run.
struct PreparedTest {
    context: Arc<RunContext>,
    test: TestSet,
    graph: DependencyGraph,
    membership: Membership,
}

/// Runs suites: interception, graph construction, configuration lifecycle
/// and execution.
pub struct TestRunner {
    config: RunConfig,
    listeners: Arc<ListenerRegistry>,
}

impl TestRunner {
    pub fn new(config: RunConfig) -> Self {
        Self::with_listeners(config, ListenerRegistry::new())
    }

    pub fn with_listeners(config: RunConfig, listeners: ListenerRegistry) -> Self {
        Self {
            config,
            listeners: Arc::new(listeners),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run a single test as a suite of its own.
    ///
    /// # Errors
    ///
    /// As for [`run_suite`](Self::run_suite).
    pub fn run_test(&self, test: &TestSet) -> Result<TestRunResult, RunError> {
        let suite = Suite::new(test.name.clone()).with_test(test.clone());
        let mut result = self.run_suite(&suite)?;
        result.tests.pop().ok_or_else(|| {
            RunError::new(RunErrorKind::Configuration, "suite produced no test result")
        })
    }

    /// Build every graph, then run the suite.
    ///
    /// Nothing is invoked unless every test's graph builds.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] for an invalid config, an unresolved or cyclic
    /// dependency, or a stalled graph. Unit failures are results, not errors.
    pub fn run_suite(&self, suite: &Suite) -> Result<SuiteResult, RunError> {
        let start = Instant::now();
        self.config.validate().map_err(|e| {
            RunError::new(RunErrorKind::InvalidConfig, e.message).with_detail(e.kind.to_string())
        })?;

        let prepared = self.prepare(suite)?;
        let suite_context = RunContext::new(
            suite.name.clone(),
            "",
            self.config.clone(),
            Arc::clone(&self.listeners),
        );

        tracing::info!(suite = %suite.name, tests = prepared.len(), "suite started");
        self.listeners.suite_started(&suite.name);

        let suite_failure = run_configurations(
            &suite_context,
            &suite.configurations_for(ConfigScope::BeforeSuite),
            0,
            None,
        );
        if let Some(cause) = &suite_failure {
            tracing::warn!(suite = %suite.name, %cause, "before-suite configuration failed");
        }

        let mut tests = Vec::with_capacity(prepared.len());
        for p in prepared {
            tests.push(self.run_prepared(p, suite_failure.clone())?);
        }

        let poison = match self.config.config_failure_policy {
            FailurePolicy::Skip => suite_failure.as_ref(),
            FailurePolicy::Continue => None,
        };
        run_configurations(
            &suite_context,
            &suite.configurations_for(ConfigScope::AfterSuite),
            0,
            poison,
        );
        self.listeners.suite_finished(&suite.name);

        let configurations = suite_context.results.configuration_results();
        let result = SuiteResult {
            name: suite.name.clone(),
            configurations,
            tests,
            duration: start.elapsed(),
        };
        tracing::info!(
            suite = %suite.name,
            success = result.success(),
            duration_ms = result.duration.as_millis() as u64,
            "suite finished"
        );
        Ok(result)
    }

    /// Intercept and build a graph for every test of the suite.
    fn prepare(&self, suite: &Suite) -> Result<Vec<PreparedTest>, RunError> {
        let chain = MethodInterceptorChain::new(self.config.ordering);
        let mut prepared = Vec::with_capacity(suite.tests.len());
        for test in &suite.tests {
            let context = Arc::new(RunContext::new(
                suite.name.clone(),
                test.name.clone(),
                self.config.clone(),
                Arc::clone(&self.listeners),
            ));
            let intercepted = chain.apply(test.units.clone(), &context);
            let graph = graph::build(&intercepted.units, self.config.dependency_mode)
                .map_err(|e| RunError::from(e).in_test(&test.name))?;
            tracing::debug!(test = %test.name, units = graph.node_count(), "graph ready");
            prepared.push(PreparedTest {
                context,
                test: test.clone(),
                graph,
                membership: intercepted.membership,
            });
        }
        Ok(prepared)
    }

    fn run_prepared(
        &self,
        prepared: PreparedTest,
        suite_failure: Option<FailureCause>,
    ) -> Result<TestRunResult, RunError> {
        let start = Instant::now();
        let PreparedTest {
            context,
            test,
            graph,
            membership,
        } = prepared;

        tracing::info!(test = %test.name, units = graph.node_count(), "test started");
        self.listeners.test_started(&test.name);

        let lifecycle = Arc::new(ConfigurationLifecycle::new(
            Arc::clone(&context),
            &test.configurations,
            &membership,
            suite_failure,
        ));
        lifecycle.before_test();

        let invoker = Arc::new(UnitInvoker::new(Arc::clone(&context), Arc::clone(&lifecycle)));
        let executor = GraphExecutor::new(&self.config);
        let outcome = executor
            .execute(graph, invoker)
            .map_err(|e| e.in_test(&test.name))?;

        if outcome.timed_out {
            context.cancel();
            context.results.seal();
            mark_incomplete(&context, &outcome.unfinished);
            tracing::warn!(
                test = %test.name,
                incomplete = outcome.unfinished.len(),
                "test timed out"
            );
        } else {
            context.results.seal();
        }

        lifecycle.after_test();

        let results = context.results.test_results();
        let summary = context.results.summary();
        self.listeners.test_finished(&test.name, &summary);
        tracing::info!(
            test = %test.name,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            incomplete = summary.incomplete,
            "test finished"
        );

        Ok(TestRunResult {
            name: test.name.clone(),
            results,
            configurations: context.results.configuration_results(),
            invoked: context.results.invoked(),
            summary,
            timed_out: outcome.timed_out,
            duration: start.elapsed(),
        })
    }

    /// Build every test's graph and compute its batch order without running
    /// anything.
    ///
    /// # Errors
    ///
    /// As for graph construction.
    pub fn plan(&self, suite: &Suite) -> Result<Vec<Schedule>, RunError> {
        let executor = GraphExecutor::new(&self.config);
        self.prepare(suite)?
            .into_iter()
            .map(|p| schedule::compile(&p.test.name, p.graph, &executor.policy(), &p.membership))
            .collect()
    }
}

fn mark_incomplete(context: &RunContext, units: &[Arc<TestUnit>]) {
    for unit in units {
        let cause = FailureCause::new(
            FailureKind::Incomplete,
            format!("{unit} did not finish before the test timed out"),
        );
        context.results.force_record(
            UnitResult::incomplete(unit.id(), &unit.to_string(), cause)
                .for_instance(unit.instance),
        );
    }
}

/// Outcome of one test's graph run.
#[derive(Debug, Clone)]
pub struct TestRunResult {
    pub name: String,
    pub results: Vec<UnitResult>,
    pub configurations: Vec<UnitResult>,
    pub invoked: Vec<InvokedMethod>,
    pub summary: RunSummary,
    pub timed_out: bool,
    pub duration: Duration,
}

impl TestRunResult {
    /// Names of invoked test units (not configuration methods), in order.
    pub fn invoked_units(&self) -> Vec<String> {
        self.invoked
            .iter()
            .filter(|m| m.scope.is_none())
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn result_for(&self, name: &str) -> Option<&UnitResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Outcome of a whole suite.
#[derive(Debug, Clone)]
pub struct SuiteResult {
    pub name: String,
    /// Suite-scope configuration results.
    pub configurations: Vec<UnitResult>,
    pub tests: Vec<TestRunResult>,
    pub duration: Duration,
}

impl SuiteResult {
    pub fn summary(&self) -> RunSummary {
        let mut all: Vec<UnitResult> = self.configurations.clone();
        for t in &self.tests {
            all.extend(t.results.iter().cloned());
            all.extend(t.configurations.iter().cloned());
        }
        RunSummary::from_results(&all)
    }

    pub fn success(&self) -> bool {
        self.summary().success()
    }
}

/// Error from the runner orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    fn in_test(mut self, test: &str) -> Self {
        self.message = format!("test '{test}': {}", self.message);
        self
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RunError {}

impl From<GraphError> for RunError {
    fn from(e: GraphError) -> Self {
        Self {
            kind: RunErrorKind::Configuration,
            message: e.to_string(),
            detail: e.detail,
        }
    }
}

/// Classification of runner errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    /// Unresolved or cyclic dependencies, or an illegal graph transition.
    Configuration,
    /// Nodes remain but none has its dependencies finished.
    NoFreeNodes,
    InvalidConfig,
    /// A pool thread could not be started.
    ThreadSpawn,
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration error"),
            Self::NoFreeNodes => write!(f, "no free nodes"),
            Self::InvalidConfig => write!(f, "invalid config"),
            Self::ThreadSpawn => write!(f, "thread spawn failed"),
        }
    }
}
