//! Scheduling properties of the graph executor, driven through `TestRunner`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use testgraph::graph::{DependencyMode, GraphErrorKind};
use testgraph::runner::config::{OrderingMode, ParallelMode, RunConfig};
use testgraph::runner::executor::{RunErrorKind, TestRunner};
use testgraph::runner::result::{FailureKind, Outcome};
use testgraph::unit::{ConfigScope, ConfigurationMethod, Suite, TestSet, TestUnit};

type Log = Arc<Mutex<Vec<String>>>;

fn logging(log: &Log, class: &str, method: &str) -> TestUnit {
    let log = Arc::clone(log);
    let name = format!("{class}.{method}");
    TestUnit::new(class, method, move |_| {
        log.lock().push(name.clone());
        Ok(())
    })
}

fn parallel(mode: ParallelMode, threads: usize) -> RunConfig {
    RunConfig {
        parallel: mode,
        thread_count: threads,
        ..RunConfig::default()
    }
}

fn position(order: &[String], name: &str) -> usize {
    order
        .iter()
        .position(|n| n == name)
        .unwrap_or_else(|| panic!("{name} was not invoked: {order:?}"))
}

#[test]
fn sequential_run_is_topological() {
    let log: Log = Arc::default();
    let test = TestSet::new("diamond")
        .with_unit(logging(&log, "T", "d").depends_on_methods(["b", "c"]))
        .with_unit(logging(&log, "T", "c").depends_on_methods(["a"]))
        .with_unit(logging(&log, "T", "b").depends_on_methods(["a"]))
        .with_unit(logging(&log, "T", "a"))
        .with_unit(logging(&log, "T", "e").depends_on_methods(["d"]));
    let result = TestRunner::new(RunConfig::default()).run_test(&test).unwrap();

    let order = log.lock().clone();
    assert_eq!(order.len(), 5);
    for (node, deps) in [("T.b", ["T.a"]), ("T.c", ["T.a"]), ("T.e", ["T.d"])] {
        for dep in deps {
            assert!(position(&order, dep) < position(&order, node));
        }
    }
    assert!(position(&order, "T.b") < position(&order, "T.d"));
    assert!(position(&order, "T.c") < position(&order, "T.d"));
    assert_eq!(result.invoked_units(), order);
    assert_eq!(result.summary.passed, 5);
}

#[test]
fn cycle_fails_before_anything_is_invoked() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invoked);
    let suite = Suite::new("cyclic")
        .with_configuration(ConfigurationMethod::new(
            ConfigScope::BeforeSuite,
            "Env",
            "boot",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        ))
        .with_test(TestSet::new("fine").with_unit(TestUnit::passing("F", "ok")))
        .with_test(
            TestSet::new("loop")
                .with_unit(TestUnit::passing("L", "a").depends_on_methods(["c"]))
                .with_unit(TestUnit::passing("L", "b").depends_on_methods(["a"]))
                .with_unit(TestUnit::passing("L", "c").depends_on_methods(["b"])),
        );

    let err = TestRunner::new(RunConfig::default()).run_suite(&suite).unwrap_err();
    assert_eq!(err.kind, RunErrorKind::Configuration);
    assert!(err.message.contains("test 'loop'"));
    assert!(err.message.contains(&GraphErrorKind::CyclicDependency.to_string()));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[test]
fn sequential_order_is_repeatable() {
    let build = || {
        TestSet::new("repeat")
            .with_unit(TestUnit::passing("B", "two").with_priority(1))
            .with_unit(TestUnit::passing("A", "one"))
            .with_unit(TestUnit::passing("B", "one").depends_on_methods(["A.one"]))
            .with_unit(TestUnit::passing("C", "x").with_groups(["g"]))
            .with_unit(TestUnit::passing("A", "two").depends_on_groups(["g"]))
    };
    let runner = TestRunner::new(RunConfig::default());
    let first = runner.run_test(&build()).unwrap().invoked_units();
    let second = runner.run_test(&build()).unwrap().invoked_units();
    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
}

#[test]
fn parallel_run_respects_thread_count() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut test = TestSet::new("wide");
    for i in 0..12 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        test = test.with_unit(TestUnit::new("W", format!("m{i}"), move |_| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }));
    }
    let result = TestRunner::new(parallel(ParallelMode::Methods, 3))
        .run_test(&test)
        .unwrap();
    assert_eq!(result.summary.passed, 12);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 2);
}

#[test]
fn fan_out_after_shared_dependency() {
    for _ in 0..5 {
        let log: Log = Arc::default();
        let test = TestSet::new("abc")
            .with_unit(logging(&log, "T", "a"))
            .with_unit(logging(&log, "T", "b").depends_on_methods(["a"]))
            .with_unit(logging(&log, "T", "c").depends_on_methods(["a"]));
        let result = TestRunner::new(parallel(ParallelMode::Methods, 2))
            .run_test(&test)
            .unwrap();
        assert_eq!(result.summary.passed, 3);
        let order = log.lock().clone();
        assert_eq!(order[0], "T.a");
        assert!(order[1..].contains(&"T.b".to_owned()));
        assert!(order[1..].contains(&"T.c".to_owned()));
    }
}

#[test]
fn instance_ordering_keeps_classes_contiguous() {
    let log: Log = Arc::default();
    let test = TestSet::new("ordering")
        .with_unit(logging(&log, "X", "m2"))
        .with_unit(logging(&log, "Y", "m1"))
        .with_unit(logging(&log, "X", "m1"));
    TestRunner::new(RunConfig::default()).run_test(&test).unwrap();
    assert_eq!(*log.lock(), vec!["X.m2", "X.m1", "Y.m1"]);
}

#[test]
fn preserve_ordering_keeps_declaration_order() {
    let log: Log = Arc::default();
    let test = TestSet::new("ordering")
        .with_unit(logging(&log, "X", "m2"))
        .with_unit(logging(&log, "Y", "m1"))
        .with_unit(logging(&log, "X", "m1"));
    let config = RunConfig {
        ordering: OrderingMode::Preserve,
        ..RunConfig::default()
    };
    TestRunner::new(config).run_test(&test).unwrap();
    assert_eq!(*log.lock(), vec!["X.m2", "Y.m1", "X.m1"]);
}

#[test]
fn missing_group_depends_on_dependency_mode() {
    let test = TestSet::new("groups")
        .with_unit(TestUnit::passing("T", "c"))
        .with_unit(TestUnit::passing("T", "d").depends_on_groups(["slow"]));

    let soft = RunConfig {
        dependency_mode: DependencyMode::Soft,
        ..RunConfig::default()
    };
    let result = TestRunner::new(soft).run_test(&test).unwrap();
    assert_eq!(result.summary.passed, 2);

    let err = TestRunner::new(RunConfig::default()).run_test(&test).unwrap_err();
    assert_eq!(err.kind, RunErrorKind::Configuration);
    assert!(err.message.contains("slow"));
}

#[test]
fn timeout_marks_unfinished_units_incomplete() {
    let test = TestSet::new("slow")
        .with_unit(TestUnit::new("T", "sleepy", |_| {
            thread::sleep(Duration::from_secs(10));
            Ok(())
        }))
        .with_unit(TestUnit::passing("T", "after").depends_on_methods(["sleepy"]));
    let config = RunConfig {
        timeout_ms: Some(100),
        ..parallel(ParallelMode::Methods, 2)
    };

    let started = Instant::now();
    let result = TestRunner::new(config).run_test(&test).unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(result.timed_out);
    assert_eq!(result.summary.incomplete, 2);
    assert_eq!(result.summary.passed, 0);
    for name in ["T.sleepy", "T.after"] {
        let r = result.result_for(name).unwrap();
        assert_eq!(r.outcome, Outcome::Incomplete);
        assert_eq!(r.cause.as_ref().unwrap().kind, FailureKind::Incomplete);
    }
    assert!(!result.invoked_units().contains(&"T.after".to_owned()));
}

#[test]
fn classes_mode_runs_a_class_on_one_thread() {
    let threads: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
    let mut test = TestSet::new("classes");
    for class in ["A", "B"] {
        for method in ["one", "two", "three"] {
            let threads = Arc::clone(&threads);
            let class_name = class.to_owned();
            test = test.with_unit(TestUnit::new(class, method, move |_| {
                let id = format!("{:?}", thread::current().id());
                threads.lock().push((class_name.clone(), id));
                Ok(())
            }));
        }
    }
    TestRunner::new(parallel(ParallelMode::Classes, 2))
        .run_test(&test)
        .unwrap();
    let seen = threads.lock().clone();
    assert_eq!(seen.len(), 6);
    for class in ["A", "B"] {
        let ids: Vec<&String> = seen.iter().filter(|(c, _)| c == class).map(|(_, t)| t).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]), "{class} ran on several threads");
    }
}

#[test]
fn failed_dependency_skips_downstream_but_graph_completes() {
    let test = TestSet::new("chain")
        .with_unit(TestUnit::new("T", "a", |_| Err(testgraph::runner::FailureCause::assertion("down"))))
        .with_unit(TestUnit::passing("T", "b").depends_on_methods(["a"]))
        .with_unit(TestUnit::passing("T", "c").depends_on_methods(["b"]))
        .with_unit(TestUnit::passing("T", "free"));
    let result = TestRunner::new(parallel(ParallelMode::Methods, 2))
        .run_test(&test)
        .unwrap();
    assert_eq!(result.result_for("T.a").unwrap().outcome, Outcome::Failed);
    assert_eq!(result.result_for("T.b").unwrap().outcome, Outcome::Skipped);
    assert_eq!(result.result_for("T.c").unwrap().outcome, Outcome::Skipped);
    assert_eq!(result.result_for("T.free").unwrap().outcome, Outcome::Passed);
    assert!(!result.summary.success());
}

#[test]
fn plan_matches_sequential_run() {
    let log: Log = Arc::default();
    let build = |log: &Log| {
        TestSet::new("planned")
            .with_unit(logging(log, "A", "x"))
            .with_unit(logging(log, "B", "y").depends_on_methods(["A.x"]))
            .with_unit(logging(log, "A", "z"))
    };
    let runner = TestRunner::new(RunConfig::default());
    let schedules = runner
        .plan(&Suite::new("s").with_test(build(&log)))
        .unwrap();
    assert!(log.lock().is_empty());
    let planned = schedules[0].flatten();

    runner.run_test(&build(&log)).unwrap();
    assert_eq!(planned, *log.lock());
}
