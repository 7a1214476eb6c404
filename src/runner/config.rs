use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph::DependencyMode;

/// How graph nodes are spread over threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelMode {
    /// Single-threaded free-node loop.
    #[default]
    None,
    /// One worker per free node.
    Methods,
    /// Free nodes of one class share a worker.
    Classes,
    /// Free nodes of one class instance share a worker.
    Instances,
}

impl ParallelMode {
    pub fn is_parallel(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for ParallelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Methods => write!(f, "methods"),
            Self::Classes => write!(f, "classes"),
            Self::Instances => write!(f, "instances"),
        }
    }
}

/// What happens to dependent units when a configuration method fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Skip,
    Continue,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

/// The built-in interceptor that always runs last.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingMode {
    /// Same-instance units are made contiguous.
    #[default]
    Instance,
    /// Stable sort by priority only.
    Preserve,
}

/// Which key orders workers within one free-node batch when units are
/// grouped by class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingPrecedence {
    /// Lowest member priority first, then declaration order.
    #[default]
    Priority,
    /// Class first-appearance order; priority only orders units inside a worker.
    Class,
}

/// Settings for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub parallel: ParallelMode,
    pub thread_count: usize,
    /// Overall deadline for one test's graph, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub dependency_mode: DependencyMode,
    pub config_failure_policy: FailurePolicy,
    pub ordering: OrderingMode,
    pub grouping_precedence: GroupingPrecedence,
    pub verbose: u8,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallel: ParallelMode::None,
            thread_count: 5,
            timeout_ms: None,
            dependency_mode: DependencyMode::Hard,
            config_failure_policy: FailurePolicy::Skip,
            ordering: OrderingMode::Instance,
            grouping_precedence: GroupingPrecedence::Priority,
            verbose: 1,
        }
    }
}

impl RunConfig {
    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigErrorKind::Parse`] on malformed input and
    /// [`ConfigErrorKind::Invalid`] if the values fail validation.
    pub fn from_yaml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(input)
            .map_err(|e| ConfigError::new(ConfigErrorKind::Parse, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// As for [`from_yaml`](Self::from_yaml).
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)
            .map_err(|e| ConfigError::new(ConfigErrorKind::Parse, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigErrorKind::Io`] if the file cannot be read, otherwise
    /// the errors of the matching parser.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(ConfigErrorKind::Io, e.to_string())
                .with_detail(path.display().to_string())
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// # Errors
    ///
    /// Rejects a zero thread count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_count == 0 {
            return Err(ConfigError::new(
                ConfigErrorKind::Invalid,
                "thread_count must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Error loading a [`RunConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl ConfigError {
    fn new(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
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

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    Io,
    Parse,
    Invalid,
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "config io error"),
            Self::Parse => write!(f, "config parse error"),
            Self::Invalid => write!(f, "invalid config"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let c = RunConfig::default();
        assert_eq!(c.parallel, ParallelMode::None);
        assert_eq!(c.thread_count, 5);
        assert!(c.timeout().is_none());
        assert_eq!(c.dependency_mode, DependencyMode::Hard);
        assert_eq!(c.config_failure_policy, FailurePolicy::Skip);
        assert_eq!(c.ordering, OrderingMode::Instance);
        assert_eq!(c.grouping_precedence, GroupingPrecedence::Priority);
        assert_eq!(c.verbose, 1);
    }

    #[test]
    fn parses_partial_yaml() {
        let c = RunConfig::from_yaml("parallel: classes\nthread_count: 2\ntimeout_ms: 100\n").unwrap();
        assert_eq!(c.parallel, ParallelMode::Classes);
        assert_eq!(c.thread_count, 2);
        assert_eq!(c.timeout(), Some(Duration::from_millis(100)));
        assert_eq!(c.ordering, OrderingMode::Instance);
    }

    #[test]
    fn parses_json() {
        let c = RunConfig::from_json(
            r#"{"dependency_mode": "soft", "config_failure_policy": "continue", "ordering": "preserve"}"#,
        )
        .unwrap();
        assert_eq!(c.dependency_mode, DependencyMode::Soft);
        assert_eq!(c.config_failure_policy, FailurePolicy::Continue);
        assert_eq!(c.ordering, OrderingMode::Preserve);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = RunConfig::from_yaml("threads: 4\n").unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::Parse);
    }

    #[test]
    fn rejects_zero_threads() {
        let err = RunConfig::from_yaml("thread_count: 0\n").unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::Invalid);
        assert_eq!(err.to_string(), "invalid config: thread_count must be at least 1");
    }

    #[test]
    fn loads_by_extension() {
        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(json, r#"{{"parallel": "methods"}}"#).unwrap();
        assert_eq!(
            RunConfig::from_path(json.path()).unwrap().parallel,
            ParallelMode::Methods
        );

        let mut yaml = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(yaml, "parallel: instances").unwrap();
        assert_eq!(
            RunConfig::from_path(yaml.path()).unwrap().parallel,
            ParallelMode::Instances
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = RunConfig::from_path(Path::new("/nonexistent/run.yaml")).unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::Io);
        assert_eq!(err.detail.as_deref(), Some("/nonexistent/run.yaml"));
    }

    #[test]
    fn round_trips_through_yaml() {
        let c = RunConfig {
            parallel: ParallelMode::Methods,
            timeout_ms: Some(250),
            ..RunConfig::default()
        };
        let text = serde_yaml::to_string(&c).unwrap();
        assert_eq!(RunConfig::from_yaml(&text).unwrap(), c);
    }
}
