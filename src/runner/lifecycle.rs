use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::plan::membership::Membership;
use crate::runner::config::FailurePolicy;
use crate::runner::context::RunContext;
use crate::runner::invoker::invoke_configuration;
use crate::runner::result::{FailureCause, FailureKind, UnitResult};
use crate::unit::{ClassKey, ConfigScope, ConfigurationMethod, Invocation, TestUnit};

#[derive(Debug, Default)]
struct ScopeState {
    remaining: usize,
    started: bool,
    finished: bool,
    failure: Option<FailureCause>,
}

/// Runs configuration methods around the units of one test.
///
/// Class and group scopes open on the first unit that enters them and close
/// when their remaining member count reaches zero, so the bracketing holds
/// under any interleaving of pool threads.
#[derive(Debug)]
pub struct ConfigurationLifecycle {
    context: Arc<RunContext>,
    configurations: Vec<Arc<ConfigurationMethod>>,
    classes: HashMap<ClassKey, Mutex<ScopeState>>,
    groups: HashMap<String, Mutex<ScopeState>>,
    suite_failure: Option<FailureCause>,
    test_failure: Mutex<Option<FailureCause>>,
}

impl ConfigurationLifecycle {
    pub fn new(
        context: Arc<RunContext>,
        configurations: &[Arc<ConfigurationMethod>],
        membership: &Membership,
        suite_failure: Option<FailureCause>,
    ) -> Self {
        let configurations: Vec<Arc<ConfigurationMethod>> = configurations
            .iter()
            .filter(|c| {
                let suite_scoped =
                    matches!(c.scope, ConfigScope::BeforeSuite | ConfigScope::AfterSuite);
                if suite_scoped {
                    tracing::warn!(
                        configuration = %c.qualified_name(),
                        "suite-scoped configuration on a test is ignored"
                    );
                }
                !suite_scoped
            })
            .cloned()
            .collect();
        let scope = |remaining| {
            Mutex::new(ScopeState {
                remaining,
                ..ScopeState::default()
            })
        };
        Self {
            context,
            configurations,
            classes: membership
                .classes()
                .iter()
                .map(|(k, n)| (k.clone(), scope(*n)))
                .collect(),
            groups: membership
                .groups()
                .iter()
                .map(|(g, n)| (g.clone(), scope(*n)))
                .collect(),
            suite_failure,
            test_failure: Mutex::new(None),
        }
    }

    fn skips(&self) -> bool {
        self.context.config.config_failure_policy == FailurePolicy::Skip
    }

    fn matching(
        &self,
        scope: ConfigScope,
        pred: impl Fn(&ConfigurationMethod) -> bool,
    ) -> Vec<Arc<ConfigurationMethod>> {
        self.configurations
            .iter()
            .filter(|c| c.scope == scope && pred(c.as_ref()))
            .cloned()
            .collect()
    }

    /// Suite or test failure that skips everything below it.
    fn outer_failure(&self) -> Option<FailureCause> {
        if !self.skips() {
            return None;
        }
        self.suite_failure
            .clone()
            .or_else(|| self.test_failure.lock().clone())
    }

    pub fn before_test(&self) {
        let configs = self.matching(ConfigScope::BeforeTest, |_| true);
        let poison = self.skips().then(|| self.suite_failure.clone()).flatten();
        let failure = run_configurations(&self.context, &configs, 0, poison.as_ref());
        *self.test_failure.lock() = failure;
    }

    pub fn after_test(&self) {
        let configs = self.matching(ConfigScope::AfterTest, |_| true);
        let poison = self.outer_failure();
        run_configurations(&self.context, &configs, 0, poison.as_ref());
    }

    /// Open the unit's class and group scopes if this is their first unit.
    /// Returns the cause to skip the unit with, if an enclosing scope failed
    /// under the skip policy.
    pub fn enter_unit(&self, unit: &TestUnit) -> Option<FailureCause> {
        if self.context.is_cancelled() {
            return Some(FailureCause::new(FailureKind::Incomplete, "run cancelled"));
        }
        if let Some(cause) = self.outer_failure() {
            return Some(cause);
        }

        let key = unit.class_key();
        if let Some(state) = self.classes.get(&key) {
            let mut state = state.lock();
            if !state.started {
                state.started = true;
                self.context.listeners.class_started(&key);
                let configs = self.matching(ConfigScope::BeforeClass, |c| c.class == key.class);
                state.failure = run_configurations(&self.context, &configs, key.instance, None);
            }
            if self.skips()
                && let Some(cause) = &state.failure
            {
                return Some(cause.clone());
            }
        }

        for group in &unit.groups {
            let Some(state) = self.groups.get(group) else {
                continue;
            };
            let mut state = state.lock();
            if !state.started {
                state.started = true;
                self.context.listeners.group_started(group);
                let configs =
                    self.matching(ConfigScope::BeforeGroups, |c| c.groups.contains(group));
                state.failure = run_configurations(&self.context, &configs, 0, None);
            }
            if self.skips()
                && let Some(cause) = &state.failure
            {
                return Some(cause.clone());
            }
        }
        None
    }

    /// Count the unit out of its scopes, closing any that are now empty.
    /// Must be called once for every unit handed to [`enter_unit`](Self::enter_unit).
    pub fn leave_unit(&self, unit: &TestUnit) {
        if self.context.is_cancelled() {
            return;
        }
        let key = unit.class_key();
        if let Some(state) = self.classes.get(&key) {
            let mut state = state.lock();
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining == 0 && state.started && !state.finished {
                state.finished = true;
                let poison = self.poison(state.failure.as_ref());
                let configs = self.matching(ConfigScope::AfterClass, |c| c.class == key.class);
                run_configurations(&self.context, &configs, key.instance, poison.as_ref());
                self.context.listeners.class_finished(&key);
            }
        }

        for group in &unit.groups {
            let Some(state) = self.groups.get(group) else {
                continue;
            };
            let mut state = state.lock();
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining == 0 && state.started && !state.finished {
                state.finished = true;
                let poison = self.poison(state.failure.as_ref());
                let configs =
                    self.matching(ConfigScope::AfterGroups, |c| c.groups.contains(group));
                run_configurations(&self.context, &configs, 0, poison.as_ref());
                self.context.listeners.group_finished(group);
            }
        }
    }

    /// Run the before-method configurations for one invocation. A failure
    /// under the skip policy poisons the class; the returned cause skips the
    /// invocation.
    pub fn before_method(&self, unit: &TestUnit, invocation: &Invocation) -> Option<FailureCause> {
        if let Some(cause) = self.scope_failure(unit) {
            return Some(cause);
        }
        let configs = self.matching(ConfigScope::BeforeMethod, |c| c.class == unit.class);
        let failure = run_configurations(&self.context, &configs, unit.instance, None)?;
        tracing::debug!(
            unit = %unit,
            invocation = invocation.index,
            "before-method configuration failed"
        );
        if !self.skips() {
            return None;
        }
        if let Some(state) = self.classes.get(&unit.class_key()) {
            state.lock().failure.get_or_insert_with(|| failure.clone());
        }
        Some(failure)
    }

    pub fn after_method(&self, unit: &TestUnit, _invocation: &Invocation) {
        if self.context.is_cancelled() {
            return;
        }
        let poison = self.scope_failure(unit);
        let configs = self.matching(ConfigScope::AfterMethod, |c| c.class == unit.class);
        run_configurations(&self.context, &configs, unit.instance, poison.as_ref());
    }

    /// The first failed scope enclosing `unit`, under the skip policy.
    pub fn scope_failure(&self, unit: &TestUnit) -> Option<FailureCause> {
        if !self.skips() {
            return None;
        }
        if let Some(cause) = self.outer_failure() {
            return Some(cause);
        }
        if let Some(state) = self.classes.get(&unit.class_key())
            && let Some(cause) = &state.lock().failure
        {
            return Some(cause.clone());
        }
        unit.groups
            .iter()
            .filter_map(|g| self.groups.get(g))
            .find_map(|state| state.lock().failure.clone())
    }

    fn poison(&self, own: Option<&FailureCause>) -> Option<FailureCause> {
        if !self.skips() {
            return None;
        }
        own.cloned().or_else(|| self.outer_failure())
    }
}

/// Run `configs` in order and return the first failure, wrapped as a
/// configuration failure.
///
/// While `poison` is set (or once one of `configs` fails), later methods are
/// recorded as skipped unless flagged `always_run`. Callers pass `poison`
/// only under the skip policy.
pub(crate) fn run_configurations(
    context: &RunContext,
    configs: &[Arc<ConfigurationMethod>],
    instance: u32,
    poison: Option<&FailureCause>,
) -> Option<FailureCause> {
    let skips = context.config.config_failure_policy == FailurePolicy::Skip;
    let mut poison = poison.cloned();
    let mut first_failure = None;

    for config in configs {
        let name = config.qualified_name();
        if let Some(cause) = &poison
            && !config.always_run
        {
            let result = UnitResult::skipped(config.id(), &name, cause.clone())
                .in_scope(config.scope)
                .for_instance(instance);
            if context.results.record(result.clone()) {
                context.listeners.configuration_result(&result);
            }
            continue;
        }

        if let Err(cause) = invoke_configuration(context, config, instance) {
            let wrapped = FailureCause::new(
                FailureKind::ConfigurationFailed,
                format!("{} {name} failed", config.scope),
            )
            .with_detail(cause.to_string());
            if skips && poison.is_none() {
                poison = Some(wrapped.clone());
            }
            first_failure.get_or_insert(wrapped);
        }
    }
    first_failure
}
