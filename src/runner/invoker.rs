use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, SystemTime};

use crate::plan::worker::{Worker, WorkerTask};
use crate::runner::context::RunContext;
use crate::runner::lifecycle::ConfigurationLifecycle;
use crate::runner::pool::WorkerRunner;
use crate::runner::result::{FailureCause, FailureKind, InvokedMethod, UnitResult};
use crate::unit::{ConfigurationMethod, Invocation, TestUnit, UnitBody};

/// Invokes the units of a worker inside their configuration brackets.
#[derive(Debug)]
pub struct UnitInvoker {
    context: Arc<RunContext>,
    lifecycle: Arc<ConfigurationLifecycle>,
}

impl UnitInvoker {
    pub fn new(context: Arc<RunContext>, lifecycle: Arc<ConfigurationLifecycle>) -> Self {
        Self { context, lifecycle }
    }

    fn invoke(&self, task: &WorkerTask) {
        let unit = task.unit.as_ref();
        let name = unit.to_string();

        if let Some(cause) = self.lifecycle.enter_unit(unit) {
            tracing::debug!(unit = %name, cause = %cause, "skipping unit");
            self.record(UnitResult::skipped(unit.id(), &name, cause).for_instance(unit.instance));
            self.lifecycle.leave_unit(unit);
            return;
        }

        if !unit.always_run
            && let Some(cause) = self.upstream_failure(task)
        {
            tracing::debug!(unit = %name, cause = %cause, "skipping unit");
            self.record(UnitResult::skipped(unit.id(), &name, cause).for_instance(unit.instance));
            self.lifecycle.leave_unit(unit);
            return;
        }

        let count = unit.invocation_count.max(1);
        let failures = AtomicUsize::new(0);
        if unit.thread_pool_size > 1 && count > 1 {
            let next = AtomicUsize::new(0);
            let threads = unit.thread_pool_size.min(count);
            thread::scope(|scope| {
                for _ in 0..threads {
                    scope.spawn(|| {
                        loop {
                            let index = next.fetch_add(1, Ordering::SeqCst);
                            if index >= count || self.context.is_cancelled() {
                                break;
                            }
                            self.invoke_once(unit, &name, index, count, &failures);
                        }
                    });
                }
            });
        } else {
            for index in 0..count {
                if self.context.is_cancelled() {
                    break;
                }
                self.invoke_once(unit, &name, index, count, &failures);
            }
        }

        self.lifecycle.leave_unit(unit);
    }

    /// The first upstream unit that failed or was skipped.
    fn upstream_failure(&self, task: &WorkerTask) -> Option<FailureCause> {
        task.upstream.iter().find_map(|id| {
            let outcome = self.context.results.blocking_outcome(*id)?;
            let upstream = self
                .context
                .results
                .results_for(*id)
                .first()
                .map_or_else(|| id.to_string(), |r| r.name.clone());
            Some(FailureCause::new(
                FailureKind::DependencyFailed,
                format!("upstream {upstream} {outcome}"),
            ))
        })
    }

    fn invoke_once(
        &self,
        unit: &TestUnit,
        name: &str,
        index: usize,
        count: usize,
        failures: &AtomicUsize,
    ) {
        if self.context.is_cancelled() {
            return;
        }
        let invocation = Invocation {
            name: unit.qualified_name(),
            index,
            count,
        };

        if let Some(cause) = self.lifecycle.before_method(unit, &invocation) {
            self.record(
                UnitResult::skipped(unit.id(), name, cause)
                    .for_invocation(index)
                    .for_instance(unit.instance),
            );
            self.lifecycle.after_method(unit, &invocation);
            return;
        }

        let method = InvokedMethod {
            unit: unit.id(),
            name: name.to_owned(),
            scope: None,
            invocation: index,
        };
        self.context.results.record_invoked(method.clone());
        self.context.listeners.before_invocation(&method);

        let started = SystemTime::now();
        let body = unit.body();
        let mut run = || run_body(&body, &invocation, unit.timeout);
        let outcome = match self.context.listeners.invocation_hook() {
            Some(hook) => guarded(|| hook.hook_invocation(&invocation, &mut run)),
            None => run(),
        };
        let ended = SystemTime::now();

        let result = match outcome {
            Ok(()) => UnitResult::passed(unit.id(), name),
            Err(cause) => {
                let failed = failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failed <= unit.allowed_failures() {
                    UnitResult::failed_within_success_percentage(unit.id(), name, cause)
                } else {
                    UnitResult::failed(unit.id(), name, cause)
                }
            }
        }
        .for_invocation(index)
        .for_instance(unit.instance)
        .timed(started, ended);

        self.context.listeners.after_invocation(&method, &result);
        self.record(result);
        self.lifecycle.after_method(unit, &invocation);
    }

    fn record(&self, result: UnitResult) {
        if self.context.results.record(result.clone()) {
            self.context.listeners.result(&result);
        }
    }
}

impl WorkerRunner for UnitInvoker {
    fn run(&self, worker: &Worker) {
        for task in &worker.tasks {
            if self.context.is_cancelled() {
                break;
            }
            self.invoke(task);
        }
    }
}

/// Invoke one configuration method and record its result.
pub(crate) fn invoke_configuration(
    context: &RunContext,
    config: &ConfigurationMethod,
    instance: u32,
) -> Result<(), FailureCause> {
    let name = config.qualified_name();
    let invocation = Invocation {
        name: name.clone(),
        index: 0,
        count: 1,
    };
    let method = InvokedMethod {
        unit: config.id(),
        name: name.clone(),
        scope: Some(config.scope),
        invocation: 0,
    };
    context.results.record_invoked(method.clone());
    context.listeners.before_invocation(&method);

    let started = SystemTime::now();
    let body = config.body();
    let mut run = || run_body(&body, &invocation, None);
    let outcome = match context.listeners.configuration_hook() {
        Some(hook) => guarded(|| hook.hook_configuration(&invocation, &mut run)),
        None => run(),
    };
    let ended = SystemTime::now();

    let result = match &outcome {
        Ok(()) => UnitResult::passed(config.id(), &name),
        Err(cause) => {
            tracing::warn!(configuration = %name, scope = %config.scope, cause = %cause, "configuration failed");
            UnitResult::failed(config.id(), &name, cause.clone())
        }
    }
    .in_scope(config.scope)
    .for_instance(instance)
    .timed(started, ended);

    context.listeners.after_invocation(&method, &result);
    if context.results.record(result.clone()) {
        context.listeners.configuration_result(&result);
    }
    outcome
}

/// Call `body`, turning a panic into a failure. With a `timeout`, the body
/// runs on its own thread and is abandoned if it does not return in time.
fn run_body(
    body: &UnitBody,
    invocation: &Invocation,
    timeout: Option<Duration>,
) -> Result<(), FailureCause> {
    let Some(timeout) = timeout else {
        return call(body, invocation);
    };

    let (tx, rx) = mpsc::channel();
    let body = Arc::clone(body);
    let inv = invocation.clone();
    let spawned = thread::Builder::new()
        .name(format!("testgraph-unit-{}", invocation.name))
        .spawn(move || {
            // The receiver is gone once the caller gave up waiting.
            let _ = tx.send(call(&body, &inv));
        });
    if let Err(e) = spawned {
        return Err(FailureCause::new(FailureKind::Panicked, "could not start invocation thread")
            .with_detail(e.to_string()));
    }

    match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(FailureCause::new(
            FailureKind::Timeout,
            format!("{} did not finish within {}ms", invocation.name, timeout.as_millis()),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(FailureCause::new(
            FailureKind::Panicked,
            format!("{} stopped without a result", invocation.name),
        )),
    }
}

fn call(body: &UnitBody, invocation: &Invocation) -> Result<(), FailureCause> {
    guarded(|| (**body)(invocation))
}

/// Run `f`, turning a panic into a failure.
fn guarded(f: impl FnOnce() -> Result<(), FailureCause>) -> Result<(), FailureCause> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_owned());
            Err(FailureCause::new(FailureKind::Panicked, message))
        }
    }
}
