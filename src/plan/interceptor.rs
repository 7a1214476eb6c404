use std::collections::HashMap;
use std::sync::Arc;

use crate::plan::membership::Membership;
use crate::runner::config::OrderingMode;
use crate::runner::context::RunContext;
use crate::unit::{ClassKey, TestUnit};

/// The unit list after every interceptor ran, with the membership index
/// rebuilt from it.
#[derive(Debug, Clone)]
pub struct Intercepted {
    pub units: Vec<Arc<TestUnit>>,
    pub membership: Membership,
}

/// Registered reordering listeners followed by the built-in ordering.
#[derive(Debug, Clone, Copy)]
pub struct MethodInterceptorChain {
    ordering: OrderingMode,
}

impl MethodInterceptorChain {
    pub fn new(ordering: OrderingMode) -> Self {
        Self { ordering }
    }

    pub fn apply(&self, units: Vec<Arc<TestUnit>>, context: &RunContext) -> Intercepted {
        let before = units.len();
        let mut units = units;
        for interceptor in context.listeners.interceptors() {
            units = interceptor.intercept(units, context);
        }
        if units.len() != before {
            tracing::debug!(
                test = %context.test_name,
                before,
                after = units.len(),
                "interceptors changed the unit count"
            );
        }
        let units = match self.ordering {
            OrderingMode::Preserve => preserve_order(units),
            OrderingMode::Instance => instance_order(units),
        };
        let membership = Membership::from_units(&units);
        Intercepted { units, membership }
    }
}

/// Stable sort by priority; class boundaries are ignored.
pub fn preserve_order(mut units: Vec<Arc<TestUnit>>) -> Vec<Arc<TestUnit>> {
    units.sort_by_key(|u| u.priority);
    units
}

/// Make units of one class instance contiguous. Instances keep their
/// first-appearance order and units keep their relative order inside one.
pub fn instance_order(units: Vec<Arc<TestUnit>>) -> Vec<Arc<TestUnit>> {
    let mut buckets: Vec<Vec<Arc<TestUnit>>> = Vec::new();
    let mut index: HashMap<ClassKey, usize> = HashMap::new();
    for unit in units {
        let key = unit.class_key();
        let slot = *index.entry(key).or_insert_with(|| {
            buckets.push(Vec::new());
            buckets.len() - 1
        });
        buckets[slot].push(unit);
    }
    buckets.into_iter().flatten().collect()
}
