use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use petgraph::graph::NodeIndex;

use crate::graph::{DependencyGraph, NodeStatus};
use crate::plan::worker::{Worker, WorkerGroupingPolicy};
use crate::runner::executor::{RunError, RunErrorKind};
use crate::unit::TestUnit;

/// Runs the units of one worker, in order, on the calling thread.
pub trait WorkerRunner: Send + Sync {
    fn run(&self, worker: &Worker);
}

/// What the pool left behind.
#[derive(Debug, Default)]
pub struct PoolOutcome {
    /// Units not FINISHED when the pool stopped, in declaration order.
    pub unfinished: Vec<Arc<TestUnit>>,
    pub timed_out: bool,
}

struct PoolState {
    graph: DependencyGraph,
    queue: VecDeque<Worker>,
    /// Nodes sitting in `queue`, still READY but already claimed.
    queued: HashSet<NodeIndex>,
    in_flight: usize,
    shutdown: bool,
    error: Option<RunError>,
}

struct Shared {
    state: Mutex<PoolState>,
    work_ready: Condvar,
    done: Condvar,
    policy: WorkerGroupingPolicy,
}

/// Drain `graph` with `thread_count` threads.
///
/// Each thread takes a worker, marks its nodes RUNNING, runs it unlocked,
/// then under the lock marks them FINISHED and queues whatever became free.
/// With a `deadline`, the caller stops waiting once it passes; busy threads
/// are detached and left to finish on their own.
///
/// # Errors
///
/// Returns [`RunErrorKind::NoFreeNodes`] if the graph stalls and
/// [`RunErrorKind::ThreadSpawn`] if a pool thread cannot be started.
pub fn run_pool(
    graph: DependencyGraph,
    policy: WorkerGroupingPolicy,
    thread_count: usize,
    deadline: Option<Duration>,
    runner: Arc<dyn WorkerRunner>,
) -> Result<PoolOutcome, RunError> {
    let shared = Arc::new(Shared {
        state: Mutex::new(PoolState {
            graph,
            queue: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: 0,
            shutdown: false,
            error: None,
        }),
        work_ready: Condvar::new(),
        done: Condvar::new(),
        policy,
    });

    {
        let mut state = shared.state.lock();
        if state.graph.is_finished() {
            return Ok(PoolOutcome::default());
        }
        schedule(&shared, &mut state);
        if let Some(err) = state.error.take() {
            return Err(err);
        }
    }

    let started = Instant::now();
    let threads = thread_count.max(1);
    let mut handles = Vec::with_capacity(threads);
    for i in 0..threads {
        let shared_for_thread = Arc::clone(&shared);
        let runner = Arc::clone(&runner);
        let spawned = thread::Builder::new()
            .name(format!("testgraph-pool-{i}"))
            .spawn(move || pool_thread(&shared_for_thread, runner.as_ref()));
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                shared.state.lock().shutdown = true;
                shared.work_ready.notify_all();
                return Err(RunError::new(RunErrorKind::ThreadSpawn, e.to_string())
                    .with_detail(format!("thread {i} of {threads}")));
            }
        }
    }
    tracing::debug!(threads, "pool started");

    let limit = deadline.map(|d| started + d);
    let mut state = shared.state.lock();
    let timed_out = loop {
        if state.graph.is_finished() || state.error.is_some() {
            break false;
        }
        match limit {
            None => shared.done.wait(&mut state),
            Some(at) => {
                if shared.done.wait_until(&mut state, at).timed_out()
                    && !state.graph.is_finished()
                    && state.error.is_none()
                {
                    break true;
                }
            }
        }
    };
    state.shutdown = true;
    shared.work_ready.notify_all();
    let unfinished: Vec<Arc<TestUnit>> = state
        .graph
        .unfinished()
        .into_iter()
        .map(|idx| Arc::clone(state.graph.unit(idx)))
        .collect();
    let error = state.error.take();
    drop(state);

    if timed_out {
        tracing::warn!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            unfinished = unfinished.len(),
            "pool timed out; abandoning running workers"
        );
        drop(handles);
    } else {
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("pool thread panicked outside a worker");
            }
        }
    }

    match error {
        Some(err) => Err(err),
        None => Ok(PoolOutcome {
            unfinished,
            timed_out,
        }),
    }
}

fn pool_thread(shared: &Shared, runner: &dyn WorkerRunner) {
    loop {
        let worker = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(worker) = state.queue.pop_front() {
                    let nodes = worker.nodes();
                    for n in &nodes {
                        state.queued.remove(n);
                    }
                    if let Err(e) = state.graph.set_statuses(&nodes, NodeStatus::Running) {
                        fail(shared, &mut state, e.into());
                        return;
                    }
                    state.in_flight += 1;
                    break worker;
                }
                shared.work_ready.wait(&mut state);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(|| runner.run(&worker))).is_err() {
            tracing::error!(worker = %worker, "worker panicked; marking its units finished");
        }

        let mut state = shared.state.lock();
        state.in_flight -= 1;
        if state.shutdown {
            return;
        }
        if let Err(e) = state.graph.set_statuses(&worker.nodes(), NodeStatus::Finished) {
            fail(shared, &mut state, e.into());
            return;
        }
        schedule(shared, &mut state);
        if state.graph.is_finished() || state.error.is_some() {
            shared.done.notify_all();
        }
    }
}

/// Queue workers for every free node not already claimed.
fn schedule(shared: &Shared, state: &mut PoolState) {
    let free: Vec<NodeIndex> = state
        .graph
        .free_nodes()
        .into_iter()
        .filter(|n| !state.queued.contains(n))
        .collect();

    if free.is_empty() {
        if state.in_flight == 0 && state.queue.is_empty() && !state.graph.is_finished() {
            let remaining = state.graph.remaining();
            fail(
                shared,
                state,
                RunError::new(
                    RunErrorKind::NoFreeNodes,
                    format!("{remaining} units remain but none is free"),
                ),
            );
        }
        return;
    }

    let workers = shared.policy.group(&state.graph, &free);
    tracing::debug!(free = free.len(), workers = workers.len(), "submitting workers");
    for worker in workers {
        state.queued.extend(worker.nodes());
        state.queue.push_back(worker);
    }
    shared.work_ready.notify_all();
}

fn fail(shared: &Shared, state: &mut PoolState, error: RunError) {
    if state.error.is_none() {
        state.error = Some(error);
    }
    state.shutdown = true;
    shared.work_ready.notify_all();
    shared.done.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::graph::{DependencyMode, build};
    use crate::runner::config::{GroupingPrecedence, ParallelMode};

    struct Recording {
        order: Mutex<Vec<String>>,
        running: AtomicUsize,
        peak: AtomicUsize,
        sleep: Duration,
    }

    impl Recording {
        fn new(sleep: Duration) -> Arc<Self> {
            Arc::new(Self {
                order: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                sleep,
            })
        }
    }

    impl WorkerRunner for Recording {
        fn run(&self, worker: &Worker) {
            for task in &worker.tasks {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(self.sleep);
                self.order.lock().push(task.unit.method.clone());
                self.running.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn graph(units: Vec<TestUnit>) -> DependencyGraph {
        let units: Vec<Arc<TestUnit>> = units.into_iter().map(Arc::new).collect();
        build(&units, DependencyMode::Hard).unwrap()
    }

    fn methods() -> WorkerGroupingPolicy {
        WorkerGroupingPolicy::new(ParallelMode::Methods, GroupingPrecedence::Priority)
    }

    #[test]
    fn empty_graph_returns_immediately() {
        let runner = Recording::new(Duration::ZERO);
        let out = run_pool(graph(vec![]), methods(), 2, None, runner.clone()).unwrap();
        assert!(out.unfinished.is_empty());
        assert!(!out.timed_out);
    }

    #[test]
    fn dependencies_finish_first() {
        let runner = Recording::new(Duration::from_millis(5));
        let g = graph(vec![
            TestUnit::passing("T", "a"),
            TestUnit::passing("T", "b").depends_on_methods(["a"]),
            TestUnit::passing("T", "c").depends_on_methods(["a"]),
            TestUnit::passing("T", "d").depends_on_methods(["b", "c"]),
        ]);
        let out = run_pool(g, methods(), 2, None, runner.clone()).unwrap();
        assert!(out.unfinished.is_empty());
        let order = runner.order.lock().clone();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], "a");
        assert_eq!(order[3], "d");
    }

    #[test]
    fn never_exceeds_thread_count() {
        let runner = Recording::new(Duration::from_millis(10));
        let units = (0..12)
            .map(|i| TestUnit::passing("T", format!("m{i}")))
            .collect();
        run_pool(graph(units), methods(), 3, None, runner.clone()).unwrap();
        assert_eq!(runner.order.lock().len(), 12);
        assert!(runner.peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn deadline_leaves_units_unfinished() {
        let runner = Recording::new(Duration::from_millis(500));
        let g = graph(vec![
            TestUnit::passing("T", "slow"),
            TestUnit::passing("T", "after").depends_on_methods(["slow"]),
        ]);
        let started = Instant::now();
        let out = run_pool(g, methods(), 1, Some(Duration::from_millis(50)), runner).unwrap();
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_millis(400));
        let names: Vec<String> = out.unfinished.iter().map(|u| u.method.clone()).collect();
        assert_eq!(names, vec!["slow", "after"]);
    }

    struct Panicking;

    impl WorkerRunner for Panicking {
        fn run(&self, _worker: &Worker) {
            panic!("runner blew up");
        }
    }

    #[test]
    fn panicking_worker_still_finishes_nodes() {
        let g = graph(vec![
            TestUnit::passing("T", "a"),
            TestUnit::passing("T", "b").depends_on_methods(["a"]),
        ]);
        let out = run_pool(g, methods(), 2, None, Arc::new(Panicking)).unwrap();
        assert!(out.unfinished.is_empty());
    }
}
