use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::emit::run_result::{
    emit_run_json, emit_run_junit, emit_run_yaml, emit_schedules_json, emit_schedules_yaml,
};
use crate::manifest::Manifest;
use crate::runner::config::{ParallelMode, RunConfig};
use crate::runner::display::{ConsoleListener, format_summary};
use crate::runner::executor::TestRunner;
use crate::runner::listener::ListenerRegistry;
use crate::runner::report::to_report;
use crate::unit::Suite;

/// Options for the `plan` command.
pub struct PlanOptions {
    pub manifest: PathBuf,
    pub config: Option<PathBuf>,
    pub format: String,
    pub output: Option<PathBuf>,
}

/// Options for the `run` command.
pub struct RunOptions {
    pub manifest: PathBuf,
    pub config: Option<PathBuf>,
    pub format: String,
    pub output: Option<PathBuf>,
    pub parallel: Option<String>,
    pub threads: Option<usize>,
    pub timeout_ms: Option<u64>,
    /// Added to the config's console verbosity.
    pub verbose: u8,
}

/// Load a manifest and settle its config: the manifest's own `config`
/// block, replaced wholesale by `--config` when given.
fn load(manifest: &Path, config: Option<&PathBuf>) -> Result<(Suite, RunConfig), String> {
    let manifest =
        Manifest::from_path(manifest).map_err(|e| format!("{}: {e}", manifest.display()))?;
    let config = match config {
        Some(path) => {
            RunConfig::from_path(path).map_err(|e| format!("{}: {e}", path.display()))?
        }
        None => manifest.config.clone().unwrap_or_default(),
    };
    Ok((manifest.into_suite(), config))
}

fn write_or_return(output: Option<&PathBuf>, text: String, what: &str) -> Result<String, String> {
    match output {
        Some(path) => {
            std::fs::write(path, &text)
                .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
            Ok(format!("{what} written to {}\n", path.display()))
        }
        None => Ok(text),
    }
}

/// Run the `plan` command: build every graph and print the batch order
/// without invoking anything.
///
/// # Errors
///
/// Returns an error string if loading, graph construction or emitting fails.
pub fn run_plan(options: &PlanOptions) -> Result<String, String> {
    let (suite, config) = load(&options.manifest, options.config.as_ref())?;
    let schedules = TestRunner::new(config)
        .plan(&suite)
        .map_err(|e| format!("{}: {e}", options.manifest.display()))?;

    let text = match options.format.as_str() {
        "yaml" => emit_schedules_yaml(&schedules),
        "json" => emit_schedules_json(&schedules),
        other => return Err(format!("unknown format '{other}' (expected: yaml, json)")),
    };
    write_or_return(options.output.as_ref(), text, "plan")
}

/// Run the `validate` command: check dependency resolution and cycles.
///
/// # Errors
///
/// Returns the first load or graph error, prefixed with its file.
pub fn run_validate(manifests: &[PathBuf], config: Option<&PathBuf>) -> Result<String, String> {
    let mut lines = Vec::new();
    for file in manifests {
        let (suite, config) = load(file, config)?;
        let schedules = TestRunner::new(config)
            .plan(&suite)
            .map_err(|e| format!("{}: {e}", file.display()))?;
        for s in &schedules {
            lines.push(format!(
                "{}: {}/{} is valid ({} units, {} edges, {} batches)",
                file.display(),
                suite.name,
                s.test,
                s.units_total,
                s.edges_total,
                s.batches.len(),
            ));
        }
    }
    Ok(lines.join("\n"))
}

/// Run the `run` command: execute a manifest's scripted units and emit the
/// report.
///
/// Returns `Ok(true)` if the suite succeeded, `Ok(false)` otherwise.
///
/// # Errors
///
/// Returns an error string if loading, graph construction or writing fails.
pub fn run_run(options: RunOptions) -> Result<bool, String> {
    let (suite, mut config) = load(&options.manifest, options.config.as_ref())?;
    if let Some(mode) = &options.parallel {
        config.parallel = serde_yaml::from_str::<ParallelMode>(mode).map_err(|_| {
            format!("unknown parallel mode '{mode}' (expected: none, methods, classes, instances)")
        })?;
    }
    if let Some(threads) = options.threads {
        config.thread_count = threads;
    }
    if options.timeout_ms.is_some() {
        config.timeout_ms = options.timeout_ms;
    }
    config.verbose = config.verbose.saturating_add(options.verbose);

    let mut listeners = ListenerRegistry::new();
    listeners.register(Arc::new(ConsoleListener::stderr(config.verbose)));
    let runner = TestRunner::with_listeners(config, listeners);

    let result = runner
        .run_suite(&suite)
        .map_err(|e| format!("run error: {e}"))?;
    let report = to_report(&result, runner.config());

    let text = match options.format.as_str() {
        "yaml" => emit_run_yaml(&report),
        "json" => emit_run_json(&report),
        "junit" | "xml" => emit_run_junit(&report),
        other => {
            return Err(format!(
                "unknown format '{other}' (expected: yaml, json, junit)"
            ));
        }
    };

    if let Some(path) = &options.output {
        std::fs::write(path, &text)
            .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
        eprintln!("results written to {}", path.display());
    } else {
        print!("{text}");
    }
    eprintln!("{}", format_summary(&result.summary(), result.duration));

    Ok(result.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MANIFEST: &str = "
suite: Smoke
tests:
  - name: Login
    units:
      - { class: Auth, method: login }
      - { class: Auth, method: logout, depends_on_methods: [login] }
";

    fn manifest_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn run_options(path: &Path) -> RunOptions {
        RunOptions {
            manifest: path.to_path_buf(),
            config: None,
            format: "yaml".into(),
            output: None,
            parallel: None,
            threads: None,
            timeout_ms: None,
            verbose: 0,
        }
    }

    #[test]
    fn validate_reports_counts() {
        let file = manifest_file(MANIFEST);
        let out = run_validate(&[file.path().to_path_buf()], None).unwrap();
        assert!(out.contains("Smoke/Login is valid (2 units, 1 edges, 2 batches)"));
    }

    #[test]
    fn validate_rejects_cycle() {
        let file = manifest_file(
            "suite: S\ntests:\n  - name: T\n    units:\n      - { class: A, method: a, depends_on_methods: [b] }\n      - { class: A, method: b, depends_on_methods: [a] }\n",
        );
        let err = run_validate(&[file.path().to_path_buf()], None).unwrap_err();
        assert!(err.contains("cyclic dependency"));
        assert!(err.contains("test 'T'"));
    }

    #[test]
    fn plan_emits_yaml_schedule() {
        let file = manifest_file(MANIFEST);
        let out = run_plan(&PlanOptions {
            manifest: file.path().to_path_buf(),
            config: None,
            format: "yaml".into(),
            output: None,
        })
        .unwrap();
        assert!(out.contains("test: Login"));
        assert!(out.contains("- Auth.login"));
    }

    #[test]
    fn plan_rejects_unknown_format() {
        let file = manifest_file(MANIFEST);
        let err = run_plan(&PlanOptions {
            manifest: file.path().to_path_buf(),
            config: None,
            format: "dot".into(),
            output: None,
        })
        .unwrap_err();
        assert!(err.contains("unknown format 'dot'"));
    }

    #[test]
    fn run_writes_report_file() {
        let file = manifest_file(MANIFEST);
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report.json");
        let mut options = run_options(file.path());
        options.format = "json".into();
        options.output = Some(out.clone());
        assert!(run_run(options).unwrap());
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(json["summary"]["passed"], 2);
    }

    #[test]
    fn run_reports_failure() {
        let file = manifest_file(
            "suite: S\ntests:\n  - name: T\n    units:\n      - { class: A, method: a, fail: broken }\n",
        );
        let dir = tempfile::tempdir().unwrap();
        let mut options = run_options(file.path());
        options.output = Some(dir.path().join("report.yaml"));
        assert!(!run_run(options).unwrap());
    }

    #[test]
    fn run_rejects_unknown_parallel_mode() {
        let file = manifest_file(MANIFEST);
        let mut options = run_options(file.path());
        options.parallel = Some("tests".into());
        let err = run_run(options).unwrap_err();
        assert!(err.contains("unknown parallel mode 'tests'"));
    }

    #[test]
    fn config_file_replaces_manifest_config() {
        let file = manifest_file(MANIFEST);
        let mut config = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        config.write_all(br#"{"thread_count": 0}"#).unwrap();
        let err = run_validate(&[file.path().to_path_buf()], Some(&config.path().to_path_buf()))
            .unwrap_err();
        assert!(err.contains("thread_count must be at least 1"));
    }
}
