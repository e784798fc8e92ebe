use reqjob_exec::{RunReport, TaskStatus};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn print_result<T: Serialize>(format: OutputFormat, quiet: bool, result: &T) {
    if quiet {
        return;
    }
    let rendered = match format {
        OutputFormat::Text => serde_json::to_string_pretty(result),
        OutputFormat::Json => serde_json::to_string(result),
    };
    if let Ok(json) = rendered {
        println!("{json}");
    }
}

pub fn print_error(format: OutputFormat, quiet: bool, message: &str) {
    if quiet {
        return;
    }
    match format {
        OutputFormat::Text => eprintln!("error: {message}"),
        OutputFormat::Json => {
            let err = serde_json::json!({"error": message});
            eprintln!("{}", serde_json::to_string(&err).unwrap_or_default());
        }
    }
}

pub fn print_report(format: OutputFormat, quiet: bool, report: &RunReport) {
    if quiet {
        return;
    }
    match format {
        OutputFormat::Json => print_result(format, quiet, report),
        OutputFormat::Text => print!("{}", render_report(report)),
    }
}

fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    for job in &report.jobs {
        for task in &job.tasks {
            let label = match task.status {
                TaskStatus::Passed => "PASS ",
                TaskStatus::Failed => "FAIL ",
                TaskStatus::Errored => "ERROR",
                TaskStatus::Skipped => "SKIP ",
            };
            out.push_str(&format!("{label} {}/{}", job.name, task.name));
            match (task.status_code, task.elapsed_ms) {
                (Some(code), Some(ms)) => out.push_str(&format!(" ({code}, {ms}ms)")),
                (Some(code), None) => out.push_str(&format!(" ({code})")),
                _ => {}
            }
            out.push('\n');
            for error in &task.errors {
                out.push_str(&format!("    {error}\n"));
            }
            for failure in &task.failures {
                out.push_str(&format!("    {failure}\n"));
            }
        }
    }
    let total: usize = report.jobs.iter().map(|j| j.tasks.len()).sum();
    out.push_str(&format!(
        "{total} tasks: {} passed, {} failed, {} errored, {} skipped",
        report.count(TaskStatus::Passed),
        report.count(TaskStatus::Failed),
        report.count(TaskStatus::Errored),
        report.count(TaskStatus::Skipped),
    ));
    if report.cancelled {
        out.push_str(" (cancelled)");
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqjob_core::Value;
    use reqjob_exec::{JobReport, TaskReport, VerifyError};
    use uuid::Uuid;

    fn task(name: &str, status: TaskStatus) -> TaskReport {
        TaskReport {
            name: name.to_string(),
            path: String::new(),
            status,
            status_code: None,
            elapsed_ms: None,
            errors: Vec::new(),
            failures: Vec::new(),
        }
    }

    #[test]
    fn text_report_lists_tasks_and_totals() {
        let mut failed = task("name", TaskStatus::Failed);
        failed.status_code = Some(200);
        failed.errors.push(VerifyError::ValueMismatch {
            actual: Value::from("ann"),
            expected: Value::from("bob"),
            location: "response.json.name".into(),
        });
        let mut passed = task("user", TaskStatus::Passed);
        passed.status_code = Some(200);
        passed.elapsed_ms = Some(12);
        let report = RunReport {
            run_id: Uuid::nil(),
            profile: "demo".into(),
            cancelled: true,
            jobs: vec![JobReport {
                name: "users".into(),
                path: "jobs[0]".into(),
                tasks: vec![passed, failed, task("rest", TaskStatus::Skipped)],
            }],
        };

        assert_eq!(
            render_report(&report),
            "PASS  users/user (200, 12ms)\n\
             FAIL  users/name (200)\n    \
             ValueMismatch: response.json.name == 'ann' != 'bob'\n\
             SKIP  users/rest\n\
             3 tasks: 1 passed, 1 failed, 0 errored, 1 skipped (cancelled)\n"
        );
    }
}
