use reqjob_core::{AttrPathError, EvalError, ResolveError, SchemaError, UrlTemplateError, Value};
use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    #[error("timeout")]
    Timeout,
    #[error("connect/dns/tls error: {0}")]
    Network(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("exceeded {max} redirects")]
    TooManyRedirects { max: usize },
    #[error(transparent)]
    App(#[from] AppError),
    #[error("http error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("application {0} is already running")]
    AlreadyRunning(String),
    #[error("application {0} is not running")]
    NotRunning(String),
    #[error("application {app} failed during {stage}: {message}")]
    Lifecycle {
        app: String,
        stage: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("hook {hook} failed: {message}")]
pub struct HookError {
    pub hook: String,
    pub message: String,
}

impl HookError {
    pub fn new(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

/// A located difference between a response and its expectation.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "type")]
pub enum VerifyError {
    #[error("TypeMismatch: {location} == {} != {}", .actual.repr(), .expected.repr())]
    TypeMismatch {
        actual: Value,
        expected: Value,
        location: String,
    },
    #[error("ValueMismatch: {location} == {} != {}", .actual.repr(), .expected.repr())]
    ValueMismatch {
        actual: Value,
        expected: Value,
        location: String,
    },
    #[error("SizeMismatch: {location} == {actual} != {expected}")]
    SizeMismatch {
        actual: usize,
        expected: usize,
        location: String,
    },
    #[error("JSONDecodeFailure: {location} == {message}")]
    JsonDecode { message: String, location: String },
}

impl VerifyError {
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::TypeMismatch { .. } => "TypeMismatch",
            VerifyError::ValueMismatch { .. } => "ValueMismatch",
            VerifyError::SizeMismatch { .. } => "SizeMismatch",
            VerifyError::JsonDecode { .. } => "JSONDecodeFailure",
        }
    }

    pub fn location(&self) -> &str {
        match self {
            VerifyError::TypeMismatch { location, .. }
            | VerifyError::ValueMismatch { location, .. }
            | VerifyError::SizeMismatch { location, .. }
            | VerifyError::JsonDecode { location, .. } => location,
        }
    }
}

/// Configuration errors found while turning resolved settings into
/// client and request arguments.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("{path}: {source}")]
    Eval {
        path: String,
        #[source]
        source: EvalError,
    },
    #[error("{path}: {source}")]
    AttrPath {
        path: String,
        #[source]
        source: AttrPathError,
    },
    #[error("{path}.url: {source}")]
    Url {
        path: String,
        #[source]
        source: UrlTemplateError,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("{path}: invalid TLS material: {message}")]
    Tls { path: String, message: String },
    #[error("{path}: {target} could not be constructed: {message}")]
    Factory {
        path: String,
        target: String,
        message: String,
    },
    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Prepare(#[from] PrepareError),
    #[error("env.{key}: {source}")]
    Env {
        key: String,
        #[source]
        source: EvalError,
    },
    #[error("{job}: failed to create http client: {source}")]
    Client {
        job: String,
        #[source]
        source: HttpError,
    },
}

impl RunError {
    /// Whether the run stopped on a problem in the profile rather than at run time.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, RunError::Client { .. })
    }
}
