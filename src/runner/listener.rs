use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::runner::context::RunContext;
use crate::runner::result::{FailureCause, InvokedMethod, RunSummary, UnitResult};
use crate::unit::{ClassKey, Invocation, TestUnit};

/// An optional role a listener can take on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Reorders or filters the unit list before the graph is built.
    ReordersMethods,
    ObservesSuite,
    ObservesTest,
    ObservesClass,
    ObservesGroup,
    /// Receives configuration-method results.
    ObservesConfiguration,
    /// Called around every test and configuration invocation.
    ObservesInvokedMethod,
    /// Receives every test-unit result as it is recorded.
    ObservesResults,
    /// Wraps, and may replace, the call of a test-unit body.
    HooksInvocation,
    /// Wraps, and may replace, the call of a configuration-method body.
    HooksConfiguration,
}

impl Capability {
    pub const ALL: [Self; 10] = [
        Self::ReordersMethods,
        Self::ObservesSuite,
        Self::ObservesTest,
        Self::ObservesClass,
        Self::ObservesGroup,
        Self::ObservesConfiguration,
        Self::ObservesInvokedMethod,
        Self::ObservesResults,
        Self::HooksInvocation,
        Self::HooksConfiguration,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReordersMethods => write!(f, "reorders-methods"),
            Self::ObservesSuite => write!(f, "observes-suite"),
            Self::ObservesTest => write!(f, "observes-test"),
            Self::ObservesClass => write!(f, "observes-class"),
            Self::ObservesGroup => write!(f, "observes-group"),
            Self::ObservesConfiguration => write!(f, "observes-configuration"),
            Self::ObservesInvokedMethod => write!(f, "observes-invoked-method"),
            Self::ObservesResults => write!(f, "observes-results"),
            Self::HooksInvocation => write!(f, "hooks-invocation"),
            Self::HooksConfiguration => write!(f, "hooks-configuration"),
        }
    }
}

/// A run observer. Every callback has a no-op default; a listener is only
/// called for the capabilities it declares.
///
/// Callbacks other than the suite and test ones may arrive concurrently from
/// pool threads.
pub trait Listener: Send + Sync {
    fn capabilities(&self) -> &[Capability];

    /// Reorder or filter the units of one test. Runs before the built-in
    /// ordering and before graph construction.
    fn intercept(&self, units: Vec<Arc<TestUnit>>, _context: &RunContext) -> Vec<Arc<TestUnit>> {
        units
    }

    fn on_suite_start(&self, _suite: &str) {}
    fn on_suite_finish(&self, _suite: &str) {}
    fn on_test_start(&self, _test: &str) {}
    fn on_test_finish(&self, _test: &str, _summary: &RunSummary) {}
    fn on_class_start(&self, _class: &ClassKey) {}
    fn on_class_finish(&self, _class: &ClassKey) {}
    fn on_group_start(&self, _group: &str) {}
    fn on_group_finish(&self, _group: &str) {}
    fn on_configuration_result(&self, _result: &UnitResult) {}
    fn before_invocation(&self, _method: &InvokedMethod) {}
    fn after_invocation(&self, _method: &InvokedMethod, _result: &UnitResult) {}
    fn on_result(&self, _result: &UnitResult) {}

    /// Run in place of a test-unit body. `body` runs the real one, timeout
    /// included; not calling it skips the body and the returned outcome
    /// stands.
    fn hook_invocation(
        &self,
        _invocation: &Invocation,
        body: &mut dyn FnMut() -> Result<(), FailureCause>,
    ) -> Result<(), FailureCause> {
        body()
    }

    /// As [`Listener::hook_invocation`], for configuration methods.
    fn hook_configuration(
        &self,
        _invocation: &Invocation,
        body: &mut dyn FnMut() -> Result<(), FailureCause>,
    ) -> Result<(), FailureCause> {
        body()
    }
}

/// Listeners sorted into one collection per capability.
#[derive(Default)]
pub struct ListenerRegistry {
    registered: Vec<Arc<dyn Listener>>,
    by_capability: HashMap<Capability, Vec<Arc<dyn Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener to every collection matching its capabilities.
    /// Returns `false` if this same listener was already registered.
    pub fn register(&mut self, listener: Arc<dyn Listener>) -> bool {
        let ptr = Arc::as_ptr(&listener).cast::<()>();
        if self
            .registered
            .iter()
            .any(|l| Arc::as_ptr(l).cast::<()>() == ptr)
        {
            return false;
        }
        for cap in Capability::ALL {
            if listener.capabilities().contains(&cap) {
                self.by_capability
                    .entry(cap)
                    .or_default()
                    .push(Arc::clone(&listener));
            }
        }
        self.registered.push(listener);
        true
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Listeners holding `capability`, in registration order.
    pub fn with_capability(&self, capability: Capability) -> &[Arc<dyn Listener>] {
        self.by_capability
            .get(&capability)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn interceptors(&self) -> &[Arc<dyn Listener>] {
        self.with_capability(Capability::ReordersMethods)
    }

    /// The first registered invocation hook. Later ones are never called.
    pub(crate) fn invocation_hook(&self) -> Option<&Arc<dyn Listener>> {
        self.with_capability(Capability::HooksInvocation).first()
    }

    pub(crate) fn configuration_hook(&self) -> Option<&Arc<dyn Listener>> {
        self.with_capability(Capability::HooksConfiguration).first()
    }

    pub(crate) fn suite_started(&self, suite: &str) {
        for l in self.with_capability(Capability::ObservesSuite) {
            l.on_suite_start(suite);
        }
    }

    pub(crate) fn suite_finished(&self, suite: &str) {
        for l in self.with_capability(Capability::ObservesSuite) {
            l.on_suite_finish(suite);
        }
    }

    pub(crate) fn test_started(&self, test: &str) {
        for l in self.with_capability(Capability::ObservesTest) {
            l.on_test_start(test);
        }
    }

    pub(crate) fn test_finished(&self, test: &str, summary: &RunSummary) {
        for l in self.with_capability(Capability::ObservesTest) {
            l.on_test_finish(test, summary);
        }
    }

    pub(crate) fn class_started(&self, class: &ClassKey) {
        for l in self.with_capability(Capability::ObservesClass) {
            l.on_class_start(class);
        }
    }

    pub(crate) fn class_finished(&self, class: &ClassKey) {
        for l in self.with_capability(Capability::ObservesClass) {
            l.on_class_finish(class);
        }
    }

    pub(crate) fn group_started(&self, group: &str) {
        for l in self.with_capability(Capability::ObservesGroup) {
            l.on_group_start(group);
        }
    }

    pub(crate) fn group_finished(&self, group: &str) {
        for l in self.with_capability(Capability::ObservesGroup) {
            l.on_group_finish(group);
        }
    }

    pub(crate) fn configuration_result(&self, result: &UnitResult) {
        for l in self.with_capability(Capability::ObservesConfiguration) {
            l.on_configuration_result(result);
        }
    }

    pub(crate) fn before_invocation(&self, method: &InvokedMethod) {
        for l in self.with_capability(Capability::ObservesInvokedMethod) {
            l.before_invocation(method);
        }
    }

    pub(crate) fn after_invocation(&self, method: &InvokedMethod, result: &UnitResult) {
        for l in self.with_capability(Capability::ObservesInvokedMethod) {
            l.after_invocation(method, result);
        }
    }

    pub(crate) fn result(&self, result: &UnitResult) {
        for l in self.with_capability(Capability::ObservesResults) {
            l.on_result(result);
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(String, usize)> = self
            .by_capability
            .iter()
            .map(|(cap, ls)| (cap.to_string(), ls.len()))
            .collect();
        counts.sort();
        f.debug_struct("ListenerRegistry")
            .field("registered", &self.registered.len())
            .field("by_capability", &counts)
            .finish()
    }
}
