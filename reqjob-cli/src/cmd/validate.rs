use std::path::Path;
use std::sync::Arc;

use reqjob_core::Profile;
use reqjob_exec::{AttrRegistry, NoOpEventSink, Runner};
use serde::Serialize;

use crate::exit_codes;
use crate::output::{print_error, print_result, OutputFormat};
use crate::{OutputArgs, SourceArgs};

use super::load_profile;

#[derive(Serialize)]
struct ValidateResult {
    valid: bool,
    jobs: usize,
    tasks: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

/// Every job and task is resolved, evaluated and prepared; nothing is sent.
fn check(profile: &Profile, source: &SourceArgs) -> ValidateResult {
    let mut errors = Vec::new();
    for job in profile.resolved_jobs() {
        match job {
            Ok(job) => errors.extend(
                job.resolved_tasks()
                    .filter_map(Result::err)
                    .map(|e| e.to_string()),
            ),
            Err(e) => errors.push(e.to_string()),
        }
    }

    let (jobs, tasks) = if errors.is_empty() {
        let runner = Runner::new(AttrRegistry::new(), Arc::new(NoOpEventSink));
        match runner.plan(profile, &source.context()) {
            Ok(plan) => (plan.jobs.len(), plan.jobs.iter().map(|j| j.tasks.len()).sum()),
            Err(e) => {
                errors.push(e.to_string());
                (0, 0)
            }
        }
    } else {
        (0, 0)
    };

    ValidateResult {
        valid: errors.is_empty(),
        jobs,
        tasks,
        errors,
    }
}

pub async fn validate_cmd(path: &Path, source: SourceArgs, output: OutputArgs) -> i32 {
    let result = match load_profile(path, &source) {
        Ok(profile) => check(&profile, &source),
        Err(failure) if failure.exit_code() == exit_codes::RUNTIME_ERROR => {
            print_error(output.format, output.quiet, &failure.messages().join("; "));
            return failure.exit_code();
        }
        Err(failure) => ValidateResult {
            valid: false,
            jobs: 0,
            tasks: 0,
            errors: failure.messages(),
        },
    };

    if output.format == OutputFormat::Text && !output.quiet {
        if result.valid {
            println!("ok: {} jobs, {} tasks", result.jobs, result.tasks);
        } else {
            eprintln!("error: validation failed");
            for e in &result.errors {
                eprintln!("- {e}");
            }
        }
    } else {
        print_result(output.format, output.quiet, &result);
    }

    if result.valid {
        exit_codes::SUCCESS
    } else {
        exit_codes::VALIDATION_FAILED
    }
}
