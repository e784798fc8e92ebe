//! Run progress events, published separately from diagnostics logging.

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::runner::TaskStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    RunStarted {
        run_id: Uuid,
        profile: String,
        jobs: usize,
    },
    JobStarted {
        run_id: Uuid,
        job: String,
    },
    TaskStarted {
        run_id: Uuid,
        job: String,
        task: String,
    },
    TaskFinished {
        run_id: Uuid,
        job: String,
        task: String,
        status: TaskStatus,
        status_code: Option<u16>,
        errors: usize,
    },
    TaskSkipped {
        run_id: Uuid,
        job: String,
        task: String,
    },
    JobFinished {
        run_id: Uuid,
        job: String,
        passed: bool,
    },
    RunFinished {
        run_id: Uuid,
        passed: bool,
    },
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::RunStarted { .. } => "run.started",
            Event::JobStarted { .. } => "job.started",
            Event::TaskStarted { .. } => "task.started",
            Event::TaskFinished { .. } => "task.finished",
            Event::TaskSkipped { .. } => "task.skipped",
            Event::JobFinished { .. } => "job.finished",
            Event::RunFinished { .. } => "run.finished",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let ty = self.event_type();
        match self {
            Event::RunStarted { run_id, profile, jobs } => {
                json!({ "type": ty, "run_id": run_id.to_string(), "profile": profile, "jobs": jobs })
            }
            Event::JobStarted { run_id, job } => {
                json!({ "type": ty, "run_id": run_id.to_string(), "job": job })
            }
            Event::TaskStarted { run_id, job, task } | Event::TaskSkipped { run_id, job, task } => {
                json!({ "type": ty, "run_id": run_id.to_string(), "job": job, "task": task })
            }
            Event::TaskFinished { run_id, job, task, status, status_code, errors } => {
                json!({
                    "type": ty,
                    "run_id": run_id.to_string(),
                    "job": job,
                    "task": task,
                    "status": status.as_str(),
                    "status_code": status_code,
                    "errors": errors
                })
            }
            Event::JobFinished { run_id, job, passed } => {
                json!({ "type": ty, "run_id": run_id.to_string(), "job": job, "passed": passed })
            }
            Event::RunFinished { run_id, passed } => {
                json!({ "type": ty, "run_id": run_id.to_string(), "passed": passed })
            }
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

pub struct CompositeEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl Default for CompositeEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl EventSink for CompositeEventSink {
    async fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}

/// JSON lines on stdout.
pub struct StdoutEventSink;

#[async_trait]
impl EventSink for StdoutEventSink {
    async fn emit(&self, event: Event) {
        println!("{}", serde_json::to_string(&event.to_json()).unwrap_or_default());
    }
}

/// Events as `info` records of the `reqjob::events` target.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: Event) {
        tracing::info!(target: "reqjob::events", event = %event.event_type(), payload = %event.to_json());
    }
}

pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: Event) {}
}
