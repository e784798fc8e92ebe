use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("document is neither valid YAML nor valid JSON: {}", join_errors(.errors))]
    Aggregate { errors: Vec<ParseError> },
    #[error("unknown document format {0:?} (expected yaml or json)")]
    UnknownFormat(String),
    #[error("{path}: unknown tag {tag}")]
    UnknownTag { tag: String, path: String },
    #[error("{path}: invalid {tag} value: {message}")]
    InvalidTag {
        tag: String,
        path: String,
        message: String,
    },
    #[error("{path}: mapping keys must be scalars")]
    UnsupportedKey { path: String },
    #[error("cannot serialize {0} values")]
    Unserializable(&'static str),
}

fn join_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("unmergeable value of type {kind}")]
    Unmergeable { kind: &'static str },
    #[error("type mismatch: cannot merge {right} into {left}")]
    TypeMismatch {
        left: &'static str,
        right: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("name '{0}' is not defined")]
    Name(String),
    #[error("TypeError: {0}")]
    Type(String),
    #[error("ValueError: {0}")]
    Value(String),
    #[error("ZeroDivisionError: {0}")]
    ZeroDivision(String),
    #[error("{0} is not a value")]
    NotAValue(String),
    #[error("expression {expression:?} did not settle after {depth} evaluations")]
    Recursion { expression: String, depth: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlTemplateError {
    #[error("unbalanced '{{' or '}}' at offset {0}")]
    Unbalanced(usize),
    #[error("invalid placeholder {0:?}")]
    InvalidPlaceholder(String),
    #[error("missing keywords: {}", .required.join(", "))]
    MissingKeywords { required: Vec<String> },
    #[error("invalid base url {0:?}: only http and https are supported")]
    InvalidBase(String),
    #[error("cannot join {url:?} onto {base:?}: {message}")]
    Join {
        base: String,
        url: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttrPathError {
    #[error("empty attribute path")]
    Empty,
    #[error("invalid attribute path {0:?} (expected module:attribute)")]
    InvalidFormat(String),
    #[error("invalid alias {0:?}")]
    InvalidAlias(String),
    #[error("unknown alias {0:?}")]
    UnknownAlias(String),
    #[error("module '{module}' is not registered (looking up {module}:{attribute})")]
    ModuleNotFound { module: String, attribute: String },
    #[error("module '{module}' has no attribute '{attribute}'")]
    AttributeNotFound { module: String, attribute: String },
    #[error("{path} is a {found}, expected a {expected}")]
    KindMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Debug, Error)]
#[error("profile failed validation ({violations_len} violations)")]
pub struct SchemaError {
    pub violations: Vec<Violation>,
    violations_len: usize,
}

impl SchemaError {
    pub fn new(violations: Vec<Violation>) -> Self {
        let violations_len = violations.len();
        Self {
            violations,
            violations_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{path}: {source}")]
    Merge {
        path: String,
        #[source]
        source: MergeError,
    },
    #[error("{path}.url: {source}")]
    Url {
        path: String,
        #[source]
        source: UrlTemplateError,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
