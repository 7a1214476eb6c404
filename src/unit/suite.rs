use std::sync::Arc;

use crate::unit::{ConfigScope, ConfigurationMethod, TestUnit};

/// One graph run: the pre-filtered units of a test and the configuration
/// methods that bracket them.
#[derive(Debug, Default, Clone)]
pub struct TestSet {
    pub name: String,
    pub units: Vec<Arc<TestUnit>>,
    pub configurations: Vec<Arc<ConfigurationMethod>>,
}

impl TestSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
            configurations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: TestUnit) -> Self {
        self.units.push(Arc::new(unit));
        self
    }

    #[must_use]
    pub fn with_configuration(mut self, configuration: ConfigurationMethod) -> Self {
        self.configurations.push(Arc::new(configuration));
        self
    }
}

/// A named collection of tests plus the suite-scope configuration methods.
#[derive(Debug, Default)]
pub struct Suite {
    pub name: String,
    pub tests: Vec<TestSet>,
    pub configurations: Vec<Arc<ConfigurationMethod>>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
            configurations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_test(mut self, test: TestSet) -> Self {
        self.tests.push(test);
        self
    }

    #[must_use]
    pub fn with_configuration(mut self, configuration: ConfigurationMethod) -> Self {
        self.configurations.push(Arc::new(configuration));
        self
    }

    /// Suite-scope configurations with the given scope, in declaration order.
    pub fn configurations_for(&self, scope: ConfigScope) -> Vec<Arc<ConfigurationMethod>> {
        self.configurations
            .iter()
            .filter(|c| c.scope == scope)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_collects_tests_and_configurations() {
        let suite = Suite::new("nightly")
            .with_configuration(ConfigurationMethod::passing(
                ConfigScope::BeforeSuite,
                "Env",
                "boot",
            ))
            .with_configuration(ConfigurationMethod::passing(
                ConfigScope::AfterSuite,
                "Env",
                "halt",
            ))
            .with_test(TestSet::new("smoke").with_unit(TestUnit::passing("A", "a")));
        assert_eq!(suite.tests.len(), 1);
        assert_eq!(suite.configurations_for(ConfigScope::BeforeSuite).len(), 1);
        assert_eq!(suite.configurations_for(ConfigScope::BeforeTest).len(), 0);
        assert_eq!(suite.tests[0].units[0].qualified_name(), "A.a");
    }
}
