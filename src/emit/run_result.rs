use std::fmt::Write;

use crate::plan::schedule::Schedule;
use crate::runner::report::{TestRunReport, UnitResultReport};

/// Emit run results as YAML.
pub fn emit_run_yaml(report: &TestRunReport) -> String {
    serde_yaml::to_string(report).unwrap_or_else(|e| format!("# Error serializing report: {e}"))
}

/// Emit run results as JSON.
pub fn emit_run_json(report: &TestRunReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{ \"error\": \"{e}\" }}"))
}

/// Emit dry-run schedules as YAML.
pub fn emit_schedules_yaml(schedules: &[Schedule]) -> String {
    serde_yaml::to_string(schedules).unwrap_or_else(|e| format!("# Error serializing plan: {e}"))
}

/// Emit dry-run schedules as JSON.
pub fn emit_schedules_json(schedules: &[Schedule]) -> String {
    serde_json::to_string_pretty(schedules).unwrap_or_else(|e| format!("{{ \"error\": \"{e}\" }}"))
}

/// Emit run results as JUnit XML, one `<testsuite>` per test.
pub fn emit_run_junit(report: &TestRunReport) -> String {
    let mut out = String::new();
    let suite = xml_escape(&report.suite);
    let s = &report.summary;
    let time_secs = report.run.duration_ms as f64 / 1000.0;

    // Writing to a String cannot fail.
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        out,
        r#"<testsuites name="{suite}" tests="{}" failures="{}" skipped="{}" time="{time_secs:.1}">"#,
        s.total,
        s.failed + s.incomplete,
        s.skipped
    );

    for test in &report.tests {
        let name = xml_escape(&test.name);
        let t = &test.summary;
        let test_secs = test.duration_ms as f64 / 1000.0;
        let _ = writeln!(
            out,
            r#"  <testsuite name="{name}" tests="{}" failures="{}" skipped="{}" time="{test_secs:.1}">"#,
            t.total,
            t.failed + t.incomplete,
            t.skipped
        );
        for result in &test.results {
            write_case(&mut out, result);
        }
        let _ = writeln!(out, "  </testsuite>");
    }

    let _ = writeln!(out, "</testsuites>");
    out
}

fn write_case(out: &mut String, result: &UnitResultReport) {
    let (class, method) = result
        .unit
        .split_once('.')
        .unwrap_or(("", result.unit.as_str()));
    let case = if result.invocation > 0 {
        format!("{method}#{}", result.invocation + 1)
    } else {
        method.to_owned()
    };
    let secs = result.duration_ms as f64 / 1000.0;
    let _ = writeln!(
        out,
        r#"    <testcase name="{}" classname="{}" time="{secs:.1}">"#,
        xml_escape(&case),
        xml_escape(class)
    );

    let (message, kind) = result.cause.as_ref().map_or(("", ""), |c| {
        (c.message.as_str(), c.kind.as_str())
    });
    match result.outcome.as_str() {
        "failed" | "incomplete" => {
            let _ = writeln!(
                out,
                r#"      <failure message="{}" type="{}"/>"#,
                xml_escape(message),
                xml_escape(kind)
            );
        }
        "skipped" => {
            let _ = writeln!(out, r#"      <skipped message="{}"/>"#, xml_escape(message));
        }
        "failed-within-success-percentage" => {
            let _ = writeln!(
                out,
                "      <system-out>failed within success percentage: {}</system-out>",
                xml_escape(message)
            );
        }
        _ => {}
    }
    let _ = writeln!(out, "    </testcase>");
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
