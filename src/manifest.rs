//! YAML descriptor manifests for the command line.
//!
//! A manifest lists test units and configuration methods as plain data.
//! Bodies are scripted: a unit passes unless it is told to sleep, fail or
//! panic.
//!
//! ```yaml
//! suite: Smoke
//! config:
//!   parallel: methods
//!   thread_count: 2
//! configurations:
//!   - { scope: before-suite, class: Env, method: boot }
//! tests:
//!   - name: Login
//!     units:
//!       - { class: Auth, method: login }
//!       - { class: Auth, method: logout, depends_on_methods: [login] }
//! ```

use std::fmt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runner::config::RunConfig;
use crate::runner::result::FailureCause;
use crate::unit::{ConfigScope, ConfigurationMethod, Invocation, Suite, TestSet, TestUnit};

/// Top-level manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub suite: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RunConfig>,
    /// Suite-scope configuration methods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<ConfigurationSpec>,
    pub tests: Vec<TestSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    pub name: String,
    #[serde(default)]
    pub units: Vec<UnitSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<ConfigurationSpec>,
}

/// Descriptor of one test unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitSpec {
    pub class: String,
    pub method: String,
    #[serde(default)]
    pub instance: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on_groups: Vec<String>,
    #[serde(default)]
    pub thread_pool_size: usize,
    #[serde(default = "one")]
    pub invocation_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default = "hundred")]
    pub success_percentage: u8,
    #[serde(default)]
    pub always_run: bool,
    #[serde(default)]
    pub sequential: bool,
    /// Sleep before anything else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_ms: Option<u64>,
    /// Return an assertion failure with this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
    /// Panic with this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic: Option<String>,
    /// Only fail or panic on these zero-based invocation indices. Empty means every invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_invocations: Vec<usize>,
}

/// Descriptor of one configuration method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationSpec {
    pub scope: ConfigScope,
    pub class: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default)]
    pub always_run: bool,
    /// Sleep before anything else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_ms: Option<u64>,
    /// Return an assertion failure with this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
    /// Panic with this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic: Option<String>,
    /// Only fail or panic on these zero-based invocation indices. Empty means every invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_invocations: Vec<usize>,
}

/// What a scripted body does when invoked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Behaviour {
    sleep_ms: Option<u64>,
    fail: Option<String>,
    panic: Option<String>,
    on_invocations: Vec<usize>,
}

fn one() -> usize {
    1
}

fn hundred() -> u8 {
    100
}

impl Behaviour {
    fn into_body(self) -> impl Fn(&Invocation) -> Result<(), FailureCause> + Send + Sync + 'static {
        move |inv: &Invocation| {
            if let Some(ms) = self.sleep_ms {
                thread::sleep(Duration::from_millis(ms));
            }
            let applies = self.on_invocations.is_empty() || self.on_invocations.contains(&inv.index);
            if !applies {
                return Ok(());
            }
            if let Some(msg) = &self.panic {
                panic!("{msg}");
            }
            match &self.fail {
                Some(msg) => Err(FailureCause::assertion(msg.clone())),
                None => Ok(()),
            }
        }
    }
}

impl UnitSpec {
    fn into_unit(self) -> TestUnit {
        let body = Behaviour {
            sleep_ms: self.sleep_ms,
            fail: self.fail,
            panic: self.panic,
            on_invocations: self.on_invocations,
        }
        .into_body();
        let mut unit = TestUnit::new(self.class, self.method, body)
            .with_instance(self.instance)
            .with_priority(self.priority)
            .with_groups(self.groups)
            .depends_on_methods(self.depends_on_methods)
            .depends_on_groups(self.depends_on_groups)
            .with_thread_pool_size(self.thread_pool_size)
            .with_invocation_count(self.invocation_count)
            .with_success_percentage(self.success_percentage)
            .always_run(self.always_run)
            .sequential(self.sequential);
        if let Some(description) = self.description {
            unit = unit.with_description(description);
        }
        if let Some(ms) = self.timeout_ms {
            unit = unit.with_timeout(Duration::from_millis(ms));
        }
        unit
    }
}

impl ConfigurationSpec {
    fn into_configuration(self) -> ConfigurationMethod {
        let body = Behaviour {
            sleep_ms: self.sleep_ms,
            fail: self.fail,
            panic: self.panic,
            on_invocations: self.on_invocations,
        }
        .into_body();
        ConfigurationMethod::new(self.scope, self.class, self.method, body)
            .for_groups(self.groups)
            .always_run(self.always_run)
    }
}

impl Manifest {
    /// Parse a YAML manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestErrorKind::Parse`] on malformed input or an invalid
    /// embedded config.
    pub fn from_yaml(input: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_yaml::from_str(input)
            .map_err(|e| ManifestError::new(ManifestErrorKind::Parse, e.to_string()))?;
        if let Some(config) = &manifest.config {
            config.validate().map_err(|e| {
                ManifestError::new(ManifestErrorKind::Parse, e.to_string())
                    .with_detail("in the embedded config")
            })?;
        }
        Ok(manifest)
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestErrorKind::Io`] if the file cannot be read.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ManifestError::new(ManifestErrorKind::Io, e.to_string())
                .with_detail(path.display().to_string())
        })?;
        Self::from_yaml(&content)
    }

    /// Build the runnable suite.
    pub fn into_suite(self) -> Suite {
        let mut suite = Suite::new(self.suite);
        suite.configurations = self
            .configurations
            .into_iter()
            .map(|c| c.into_configuration().into())
            .collect();
        suite.tests = self
            .tests
            .into_iter()
            .map(|t| {
                let mut test = TestSet::new(t.name);
                test.units = t.units.into_iter().map(|u| u.into_unit().into()).collect();
                test.configurations = t
                    .configurations
                    .into_iter()
                    .map(|c| c.into_configuration().into())
                    .collect();
                test
            })
            .collect();
        suite
    }
}

/// Error loading a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestError {
    pub kind: ManifestErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl ManifestError {
    fn new(kind: ManifestErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ManifestError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestErrorKind {
    Io,
    Parse,
}

impl fmt::Display for ManifestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "manifest io error"),
            Self::Parse => write!(f, "manifest parse error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::runner::config::ParallelMode;
    use crate::runner::result::FailureKind;

    const SMOKE: &str = "
suite: Smoke
config:
  parallel: methods
  thread_count: 2
configurations:
  - { scope: before-suite, class: Env, method: boot }
tests:
  - name: Login
    configurations:
      - { scope: before-class, class: Auth, method: open, always_run: true }
    units:
      - class: Auth
        method: login
        groups: [fast]
        priority: -1
      - class: Auth
        method: logout
        depends_on_methods: [login]
        fail: session still open
        on_invocations: [1]
        invocation_count: 2
        success_percentage: 50
";

    fn invocation(index: usize) -> Invocation {
        Invocation {
            name: "X.m".into(),
            index,
            count: 2,
        }
    }

    #[test]
    fn parses_units_and_configurations() {
        let m = Manifest::from_yaml(SMOKE).unwrap();
        assert_eq!(m.suite, "Smoke");
        assert_eq!(m.config.as_ref().unwrap().parallel, ParallelMode::Methods);
        assert_eq!(m.configurations[0].scope, ConfigScope::BeforeSuite);
        let login = &m.tests[0].units[0];
        assert_eq!(login.priority, -1);
        assert_eq!(login.invocation_count, 1);
        assert_eq!(login.success_percentage, 100);
        let logout = &m.tests[0].units[1];
        assert_eq!(logout.fail.as_deref(), Some("session still open"));
        assert_eq!(logout.on_invocations, vec![1]);
    }

    #[test]
    fn builds_suite() {
        let suite = Manifest::from_yaml(SMOKE).unwrap().into_suite();
        assert_eq!(suite.configurations.len(), 1);
        let test = &suite.tests[0];
        assert_eq!(test.units.len(), 2);
        assert_eq!(test.units[1].depends_on_methods, vec!["login"]);
        assert_eq!(test.units[1].allowed_failures(), 1);
        assert!(test.configurations[0].always_run);
    }

    #[test]
    fn scripted_body_fails_on_listed_invocations() {
        let suite = Manifest::from_yaml(SMOKE).unwrap().into_suite();
        let body = suite.tests[0].units[1].body();
        assert!(body(&invocation(0)).is_ok());
        let err = body(&invocation(1)).unwrap_err();
        assert_eq!(err.kind, FailureKind::AssertionFailed);
        assert_eq!(err.message, "session still open");
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = Manifest::from_yaml("suite: S\ntests:\n  - name: T\n    units:\n      - { class: A, method: a, colour: red }\n")
            .unwrap_err();
        assert_eq!(err.kind, ManifestErrorKind::Parse);
    }

    #[test]
    fn invalid_embedded_config_is_rejected() {
        let err = Manifest::from_yaml("suite: S\nconfig:\n  thread_count: 0\ntests: []\n").unwrap_err();
        assert_eq!(err.kind, ManifestErrorKind::Parse);
        assert_eq!(err.detail.as_deref(), Some("in the embedded config"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SMOKE.as_bytes()).unwrap();
        let m = Manifest::from_path(file.path()).unwrap();
        assert_eq!(m.tests.len(), 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Manifest::from_path(Path::new("/nonexistent/manifest.yaml")).unwrap_err();
        assert_eq!(err.kind, ManifestErrorKind::Io);
        assert_eq!(err.detail.as_deref(), Some("/nonexistent/manifest.yaml"));
    }
}
