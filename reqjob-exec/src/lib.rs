#![forbid(unsafe_code)]

//! Runtime engine for executing reqjob profiles.
//!
//! Parsing, validation and inheritance live in `reqjob-core`; this crate turns
//! resolved jobs into requests, sends them and checks the responses.

pub mod app;
pub mod error;
pub mod events;
pub mod hooks;
pub mod http;
pub mod prepare;
pub mod registry;
pub mod runner;
pub mod verify;

pub use crate::app::{App, AppGuard, AppTransport, RunningApps};
pub use crate::error::{AppError, HookError, HttpError, PrepareError, RunError, VerifyError};
pub use crate::events::{
    CompositeEventSink, Event, EventSink, NoOpEventSink, StdoutEventSink, TracingEventSink,
};
pub use crate::hooks::{Hook, HookEvent, NamedHook, TaskHooks};
pub use crate::http::{Auth, Body, HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use crate::prepare::{ClientArgs, ClientCert, PreparedTask, TlsVerify};
pub use crate::registry::{Attr, AttrRegistry, Factory};
pub use crate::runner::{
    run_task, CancelToken, JobReport, Plan, PlannedJob, RunReport, Runner, TaskReport, TaskStatus,
};
pub use crate::verify::Verifier;
