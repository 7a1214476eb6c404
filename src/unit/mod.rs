pub mod config;
pub mod suite;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::runner::result::FailureCause;

pub use config::{ConfigScope, ConfigurationMethod};
pub use suite::{Suite, TestSet};

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a test unit or configuration method.
///
/// Identity is by construction, not by value: two units with the same class
/// and method name built separately get distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    pub(crate) fn next() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Name of the class that declares a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(String);

impl ClassId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One instance of a declaring class. Class-scoped configuration brackets
/// each instance separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassKey {
    pub class: ClassId,
    pub instance: u32,
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance == 0 {
            write!(f, "{}", self.class)
        } else {
            write!(f, "{}[{}]", self.class, self.instance)
        }
    }
}

/// What a unit body sees when it is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Qualified `Class.method` name of the unit being invoked.
    pub name: String,
    /// Zero-based invocation index.
    pub index: usize,
    /// Total number of invocations scheduled for this unit.
    pub count: usize,
}

/// The callable part of a unit. Returning `Err` records a failure; a panic is
/// caught and recorded as well.
pub type UnitBody = Arc<dyn Fn(&Invocation) -> Result<(), FailureCause> + Send + Sync>;

/// One schedulable test operation, bound to an instance of its declaring class.
///
/// Everything except the identity and the body is plain descriptor data
/// handed over by discovery.
pub struct TestUnit {
    id: UnitId,
    pub class: ClassId,
    pub instance: u32,
    pub method: String,
    pub description: Option<String>,
    /// Lower runs first among otherwise-unordered units.
    pub priority: i32,
    pub groups: Vec<String>,
    pub depends_on_methods: Vec<String>,
    pub depends_on_groups: Vec<String>,
    /// When greater than one, invocations of this unit fan out over that many threads.
    pub thread_pool_size: usize,
    pub invocation_count: usize,
    pub timeout: Option<Duration>,
    /// Percentage of invocations that must pass, 0..=100.
    pub success_percentage: u8,
    /// Run even when an upstream dependency failed or was skipped.
    pub always_run: bool,
    /// Every unit of this class shares one worker thread.
    pub sequential: bool,
    body: UnitBody,
}

impl TestUnit {
    /// Create a unit with default metadata around the given body.
    pub fn new<F>(class: impl Into<String>, method: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Invocation) -> Result<(), FailureCause> + Send + Sync + 'static,
    {
        Self {
            id: UnitId::next(),
            class: ClassId::new(class),
            instance: 0,
            method: method.into(),
            description: None,
            priority: 0,
            groups: Vec::new(),
            depends_on_methods: Vec::new(),
            depends_on_groups: Vec::new(),
            thread_pool_size: 0,
            invocation_count: 1,
            timeout: None,
            success_percentage: 100,
            always_run: false,
            sequential: false,
            body: Arc::new(body),
        }
    }

    /// A unit whose body always passes.
    pub fn passing(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(class, method, |_| Ok(()))
    }

    #[must_use]
    pub fn with_instance(mut self, instance: u32) -> Self {
        self.instance = instance;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn depends_on_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn depends_on_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = size;
        self
    }

    #[must_use]
    pub fn with_invocation_count(mut self, count: usize) -> Self {
        self.invocation_count = count.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_success_percentage(mut self, percentage: u8) -> Self {
        self.success_percentage = percentage.min(100);
        self
    }

    #[must_use]
    pub fn always_run(mut self, always_run: bool) -> Self {
        self.always_run = always_run;
        self
    }

    #[must_use]
    pub fn sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    /// `Class.method`, the name dependency entries resolve against.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class, self.method)
    }

    pub fn class_key(&self) -> ClassKey {
        ClassKey {
            class: self.class.clone(),
            instance: self.instance,
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub(crate) fn body(&self) -> UnitBody {
        Arc::clone(&self.body)
    }

    /// Number of failed invocations this unit tolerates before it counts as failed.
    pub fn allowed_failures(&self) -> usize {
        let count = self.invocation_count.max(1);
        count * (100 - usize::from(self.success_percentage.min(100))) / 100
    }
}

impl fmt::Debug for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestUnit")
            .field("id", &self.id)
            .field("name", &self.qualified_name())
            .field("instance", &self.instance)
            .field("priority", &self.priority)
            .field("groups", &self.groups)
            .field("depends_on_methods", &self.depends_on_methods)
            .field("depends_on_groups", &self.depends_on_groups)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance == 0 {
            write!(f, "{}", self.qualified_name())
        } else {
            write!(f, "{}[{}]", self.qualified_name(), self.instance)
        }
    }
}
