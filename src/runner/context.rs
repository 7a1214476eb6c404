use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::runner::config::RunConfig;
use crate::runner::listener::ListenerRegistry;
use crate::runner::result::ResultAggregator;

/// State shared by every component of one test run.
///
/// Created when the test starts and dropped when it finishes. Worker threads
/// hold it through an `Arc`.
#[derive(Debug)]
pub struct RunContext {
    pub suite_name: String,
    pub test_name: String,
    pub config: RunConfig,
    pub results: Arc<ResultAggregator>,
    pub listeners: Arc<ListenerRegistry>,
    cancelled: AtomicBool,
}

impl RunContext {
    pub fn new(
        suite_name: impl Into<String>,
        test_name: impl Into<String>,
        config: RunConfig,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            suite_name: suite_name.into(),
            test_name: test_name.into(),
            config,
            results: Arc::new(ResultAggregator::new()),
            listeners,
            cancelled: AtomicBool::new(false),
        }
    }

    /// A fresh context for another test of the same suite, with its own
    /// result store.
    pub fn for_test(&self, test_name: impl Into<String>) -> Self {
        Self::new(
            self.suite_name.clone(),
            test_name,
            self.config.clone(),
            Arc::clone(&self.listeners),
        )
    }

    /// Stop starting new invocations. In-flight bodies are not interrupted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn verbosity(&self) -> u8 {
        self.config.verbose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RunContext {
        RunContext::new(
            "suite",
            "smoke",
            RunConfig::default(),
            Arc::new(ListenerRegistry::new()),
        )
    }

    #[test]
    fn context_new_defaults() {
        let ctx = context();
        assert_eq!(ctx.suite_name, "suite");
        assert_eq!(ctx.test_name, "smoke");
        assert_eq!(ctx.verbosity(), 1);
        assert!(!ctx.is_cancelled());
        assert!(!ctx.results.is_sealed());
    }

    #[test]
    fn cancel_is_sticky() {
        let ctx = context();
        ctx.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn for_test_gets_fresh_results() {
        let ctx = context();
        ctx.results.seal();
        let next = ctx.for_test("regression");
        assert_eq!(next.suite_name, "suite");
        assert_eq!(next.test_name, "regression");
        assert!(!next.results.is_sealed());
        assert!(Arc::ptr_eq(&ctx.listeners, &next.listeners));
    }
}
