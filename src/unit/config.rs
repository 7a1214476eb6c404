use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::runner::result::FailureCause;
use crate::unit::{ClassId, Invocation, UnitBody, UnitId};

/// Where a configuration method sits relative to graph execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigScope {
    BeforeSuite,
    AfterSuite,
    BeforeTest,
    AfterTest,
    BeforeClass,
    AfterClass,
    BeforeGroups,
    AfterGroups,
    BeforeMethod,
    AfterMethod,
}

impl ConfigScope {
    pub fn is_before(self) -> bool {
        matches!(
            self,
            Self::BeforeSuite
                | Self::BeforeTest
                | Self::BeforeClass
                | Self::BeforeGroups
                | Self::BeforeMethod
        )
    }
}

impl fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeSuite => write!(f, "before-suite"),
            Self::AfterSuite => write!(f, "after-suite"),
            Self::BeforeTest => write!(f, "before-test"),
            Self::AfterTest => write!(f, "after-test"),
            Self::BeforeClass => write!(f, "before-class"),
            Self::AfterClass => write!(f, "after-class"),
            Self::BeforeGroups => write!(f, "before-groups"),
            Self::AfterGroups => write!(f, "after-groups"),
            Self::BeforeMethod => write!(f, "before-method"),
            Self::AfterMethod => write!(f, "after-method"),
        }
    }
}

/// A setup or teardown method. Never part of the dependency graph.
///
/// Class- and method-scoped configurations apply to every instance of
/// `class`; before/after-class runs once per instance.
pub struct ConfigurationMethod {
    id: UnitId,
    pub scope: ConfigScope,
    pub class: ClassId,
    pub method: String,
    /// Groups bracketed by a before/after-groups method.
    pub groups: Vec<String>,
    /// Run even when an enclosing scope already failed under the skip policy.
    pub always_run: bool,
    body: UnitBody,
}

impl ConfigurationMethod {
    pub fn new<F>(
        scope: ConfigScope,
        class: impl Into<String>,
        method: impl Into<String>,
        body: F,
    ) -> Self
    where
        F: Fn(&Invocation) -> Result<(), FailureCause> + Send + Sync + 'static,
    {
        Self {
            id: UnitId::next(),
            scope,
            class: ClassId::new(class),
            method: method.into(),
            groups: Vec::new(),
            always_run: false,
            body: Arc::new(body),
        }
    }

    pub fn passing(scope: ConfigScope, class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(scope, class, method, |_| Ok(()))
    }

    #[must_use]
    pub fn for_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn always_run(mut self, always_run: bool) -> Self {
        self.always_run = always_run;
        self
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class, self.method)
    }

    pub(crate) fn body(&self) -> UnitBody {
        Arc::clone(&self.body)
    }
}

impl fmt::Debug for ConfigurationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationMethod")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("name", &self.qualified_name())
            .field("groups", &self.groups)
            .field("always_run", &self.always_run)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_display() {
        assert_eq!(ConfigScope::BeforeSuite.to_string(), "before-suite");
        assert_eq!(ConfigScope::AfterGroups.to_string(), "after-groups");
        assert_eq!(ConfigScope::BeforeMethod.to_string(), "before-method");
    }

    #[test]
    fn scope_direction() {
        assert!(ConfigScope::BeforeClass.is_before());
        assert!(!ConfigScope::AfterClass.is_before());
        assert!(!ConfigScope::AfterSuite.is_before());
    }

    #[test]
    fn group_configuration_records_groups() {
        let cfg = ConfigurationMethod::passing(ConfigScope::BeforeGroups, "Db", "open")
            .for_groups(["db"])
            .always_run(true);
        assert_eq!(cfg.groups, vec!["db"]);
        assert!(cfg.always_run);
        assert_eq!(cfg.qualified_name(), "Db.open");
    }
}
