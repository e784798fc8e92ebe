//! Running a profile's jobs.
//!
//! A run is planned in full before anything is sent: every job and task is
//! resolved, evaluated and prepared, so a configuration error anywhere aborts
//! the run without touching the network. Execution then walks jobs and their
//! tasks in order, one request in flight at a time, with one client per job.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqjob_core::{Context, Engine, Profile};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::{AppGuard, RunningApps};
use crate::error::{HttpError, RunError, VerifyError};
use crate::events::{Event, EventSink};
use crate::hooks::HookEvent;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::prepare::{ClientArgs, PreparedTask};
use crate::registry::AttrRegistry;

/// Shared cancellation flag, checked before each task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Response received and every expectation held.
    Passed,
    /// Response received but expectations did not hold.
    Failed,
    /// Transport or hook failure.
    Errored,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Passed => "passed",
            TaskStatus::Failed => "failed",
            TaskStatus::Errored => "errored",
            TaskStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub name: String,
    pub path: String,
    pub status: TaskStatus,
    pub status_code: Option<u16>,
    pub elapsed_ms: Option<u64>,
    pub errors: Vec<VerifyError>,
    /// Transport and hook failures.
    pub failures: Vec<String>,
}

impl TaskReport {
    fn skipped(task: &PreparedTask) -> Self {
        Self {
            name: task.name.clone(),
            path: task.path.clone(),
            status: TaskStatus::Skipped,
            status_code: None,
            elapsed_ms: None,
            errors: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn errored(task: &PreparedTask, failure: String) -> Self {
        Self {
            status: TaskStatus::Errored,
            failures: vec![failure],
            ..Self::skipped(task)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub name: String,
    pub path: String,
    pub tasks: Vec<TaskReport>,
}

impl JobReport {
    /// No task failed or errored. Skipped tasks do not count against a job.
    pub fn passed(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| matches!(t.status, TaskStatus::Passed | TaskStatus::Skipped))
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub profile: String,
    pub cancelled: bool,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.jobs.iter().all(JobReport::passed)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.jobs.iter().map(|j| j.count(status)).sum()
    }
}

/// A job with its client arguments and prepared tasks.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub name: String,
    pub path: String,
    pub client: ClientArgs,
    pub tasks: Vec<PreparedTask>,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub profile: String,
    pub jobs: Vec<PlannedJob>,
}

pub struct Runner {
    registry: AttrRegistry,
    sink: Arc<dyn EventSink>,
    apps: RunningApps,
    tags: BTreeSet<String>,
}

impl Runner {
    pub fn new(registry: AttrRegistry, sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            sink,
            apps: RunningApps::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Shares the running-application set with other runners, so two runs
    /// cannot drive the same application at once.
    pub fn with_running_apps(mut self, apps: RunningApps) -> Self {
        self.apps = apps;
        self
    }

    /// Only run jobs carrying one of `tags`, directly or through the profile.
    /// Empty runs everything.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn registry(&self) -> &AttrRegistry {
        &self.registry
    }

    /// Resolves, evaluates and prepares everything the run will send.
    pub fn plan(&self, profile: &Profile, context: &Context) -> Result<Plan, RunError> {
        let mut engine = Engine::new(context.clone());
        for (key, value) in profile.env() {
            // Explicit overrides from the caller win over the document.
            if context.env_overrides().contains_key(key) {
                debug!(key = %key, "env entry overridden");
                continue;
            }
            engine
                .bind_env_var(key, value)
                .map_err(|source| RunError::Env {
                    key: key.clone(),
                    source,
                })?;
        }

        let mut jobs = Vec::new();
        for job in profile.resolved_jobs() {
            let job = job?;
            let selected = self.tags.is_empty()
                || job.tags.iter().chain(&profile.tags).any(|t| self.tags.contains(t));
            if !selected {
                debug!(job = %job.name, "job filtered out by tags");
                continue;
            }
            let client = ClientArgs::build(&job, &engine, &self.registry)?;
            let mut tasks = Vec::new();
            for task in job.resolved_tasks() {
                let task = task?;
                tasks.push(PreparedTask::build(&task, &client, &engine, &self.registry)?);
            }
            jobs.push(PlannedJob {
                name: job.name.clone(),
                path: job.path.clone(),
                client,
                tasks,
            });
        }
        Ok(Plan {
            profile: profile.name.clone(),
            jobs,
        })
    }

    pub async fn run(
        &self,
        profile: &Profile,
        context: &Context,
        token: &CancelToken,
    ) -> Result<RunReport, RunError> {
        let plan = self.plan(profile, context)?;
        self.execute(plan, token).await
    }

    pub async fn execute(&self, plan: Plan, token: &CancelToken) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, profile = %plan.profile, jobs = plan.jobs.len(), "run started");
        self.sink
            .emit(Event::RunStarted {
                run_id,
                profile: plan.profile.clone(),
                jobs: plan.jobs.len(),
            })
            .await;

        let mut report = RunReport {
            run_id,
            profile: plan.profile,
            cancelled: false,
            jobs: Vec::with_capacity(plan.jobs.len()),
        };
        for job in &plan.jobs {
            let job_report = self.execute_job(run_id, job, token).await?;
            report.jobs.push(job_report);
        }
        report.cancelled = token.is_cancelled();

        let passed = report.is_success();
        info!(
            %run_id,
            passed,
            failed = report.count(TaskStatus::Failed),
            errored = report.count(TaskStatus::Errored),
            skipped = report.count(TaskStatus::Skipped),
            "run finished"
        );
        self.sink.emit(Event::RunFinished { run_id, passed }).await;
        Ok(report)
    }

    async fn client_for(
        &self,
        job: &PlannedJob,
    ) -> Result<(Arc<dyn HttpClient>, Option<AppGuard>), HttpError> {
        if let Some((name, app)) = &job.client.app {
            let guard = self.apps.start(name, app.clone()).await?;
            let transport: Arc<dyn HttpClient> = Arc::new(guard.transport());
            return Ok((transport, Some(guard)));
        }
        if let Some(transport) = &job.client.transport {
            return Ok((transport.clone(), None));
        }
        let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(&job.client)?);
        Ok((client, None))
    }

    async fn execute_job(
        &self,
        run_id: Uuid,
        job: &PlannedJob,
        token: &CancelToken,
    ) -> Result<JobReport, RunError> {
        info!(job = %job.name, tasks = job.tasks.len(), "job started");
        self.sink
            .emit(Event::JobStarted {
                run_id,
                job: job.name.clone(),
            })
            .await;

        let mut report = JobReport {
            name: job.name.clone(),
            path: job.path.clone(),
            tasks: Vec::with_capacity(job.tasks.len()),
        };

        let (client, guard) = if token.is_cancelled() || job.tasks.is_empty() {
            (None, None)
        } else {
            match self.client_for(job).await {
                Ok((client, guard)) => (Some(client), guard),
                Err(e) if job.client.app.is_some() => {
                    error!(job = %job.name, error = %e, "application unavailable");
                    for task in &job.tasks {
                        report.tasks.push(TaskReport::errored(task, e.to_string()));
                    }
                    self.finish_job(run_id, &report).await;
                    return Ok(report);
                }
                Err(source) => {
                    return Err(RunError::Client {
                        job: job.name.clone(),
                        source,
                    })
                }
            }
        };

        for task in &job.tasks {
            let client = match &client {
                Some(client) if !token.is_cancelled() => client,
                _ => {
                    debug!(job = %job.name, task = %task.name, "task skipped");
                    self.sink
                        .emit(Event::TaskSkipped {
                            run_id,
                            job: job.name.clone(),
                            task: task.name.clone(),
                        })
                        .await;
                    report.tasks.push(TaskReport::skipped(task));
                    continue;
                }
            };
            self.sink
                .emit(Event::TaskStarted {
                    run_id,
                    job: job.name.clone(),
                    task: task.name.clone(),
                })
                .await;
            let task_report = run_task(&**client, task).await;
            log_task(&job.name, &task_report);
            self.sink
                .emit(Event::TaskFinished {
                    run_id,
                    job: job.name.clone(),
                    task: task.name.clone(),
                    status: task_report.status,
                    status_code: task_report.status_code,
                    errors: task_report.errors.len() + task_report.failures.len(),
                })
                .await;
            report.tasks.push(task_report);
        }

        // The client goes first, then the application it was talking to.
        drop(client);
        if let Some(guard) = guard {
            if let Err(e) = guard.shutdown().await {
                warn!(job = %job.name, error = %e, "application shutdown failed");
            }
        }

        self.finish_job(run_id, &report).await;
        Ok(report)
    }

    async fn finish_job(&self, run_id: Uuid, report: &JobReport) {
        let passed = report.passed();
        info!(job = %report.name, passed, "job finished");
        self.sink
            .emit(Event::JobFinished {
                run_id,
                job: report.name.clone(),
                passed,
            })
            .await;
    }
}

fn log_task(job: &str, report: &TaskReport) {
    match report.status {
        TaskStatus::Passed => info!(
            job,
            task = %report.name,
            status = report.status_code,
            "task passed"
        ),
        TaskStatus::Failed => {
            for e in &report.errors {
                warn!(job, task = %report.name, kind = e.kind(), location = e.location(), "{e}");
            }
            warn!(job, task = %report.name, errors = report.errors.len(), "task failed");
        }
        TaskStatus::Errored => error!(
            job,
            task = %report.name,
            failures = ?report.failures,
            "task errored"
        ),
        TaskStatus::Skipped => {}
    }
}

fn rendered<E: ToString>(errors: Vec<E>) -> impl Iterator<Item = String> {
    errors.into_iter().map(|e| e.to_string())
}

/// Sends one task through the hook pipeline and verifies the response.
pub async fn run_task(client: &dyn HttpClient, task: &PreparedTask) -> TaskReport {
    let hooks = &task.hooks;
    let mut failures: Vec<String> = Vec::new();

    let mut request = task.request.clone();
    failures.extend(rendered(hooks.dispatch(&mut HookEvent::BuildRequest(&mut request))));
    failures.extend(rendered(hooks.dispatch(&mut HookEvent::Request(&request))));

    let response = match client.send(request).await {
        Ok(response) => response,
        Err(e) => {
            failures.push(e.to_string());
            let exceptions = hooks.dispatch(&mut HookEvent::Exception(&failures));
            failures.extend(rendered(exceptions));
            return TaskReport {
                status: TaskStatus::Errored,
                failures,
                ..TaskReport::skipped(task)
            };
        }
    };

    failures.extend(rendered(hooks.dispatch(&mut HookEvent::Response(&response))));
    let errors = task.verifier.verify(&response);
    failures.extend(rendered(hooks.dispatch(&mut HookEvent::Expect {
        response: &response,
        errors: &errors,
    })));
    let mut outcome = if errors.is_empty() {
        HookEvent::Success(&response)
    } else {
        HookEvent::Error {
            response: &response,
            errors: &errors,
        }
    };
    failures.extend(rendered(hooks.dispatch(&mut outcome)));
    failures.extend(rendered(hooks.dispatch(&mut HookEvent::Complete(&response))));
    if !failures.is_empty() {
        let exceptions = hooks.dispatch(&mut HookEvent::Exception(&failures));
        failures.extend(rendered(exceptions));
    }

    let status = if !errors.is_empty() {
        TaskStatus::Failed
    } else if !failures.is_empty() {
        TaskStatus::Errored
    } else {
        TaskStatus::Passed
    };
    TaskReport {
        name: task.name.clone(),
        path: task.path.clone(),
        status,
        status_code: Some(response.status),
        elapsed_ms: Some(response.elapsed.as_millis() as u64),
        errors,
        failures,
    }
}
