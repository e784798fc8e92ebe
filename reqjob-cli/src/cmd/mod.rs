pub mod run;
pub mod validate;

use std::path::Path;

use reqjob_core::{Loader, ParseError, Profile};

use crate::exit_codes;
use crate::SourceArgs;

/// Why a profile could not be loaded, split by exit code.
pub enum LoadFailure {
    /// The file could not be read.
    Read(String),
    /// The document is malformed; one entry per violation.
    Invalid(Vec<String>),
}

impl LoadFailure {
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadFailure::Read(_) => exit_codes::RUNTIME_ERROR,
            LoadFailure::Invalid(_) => exit_codes::VALIDATION_FAILED,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        match self {
            LoadFailure::Read(message) => vec![message.clone()],
            LoadFailure::Invalid(messages) => messages.clone(),
        }
    }
}

pub fn load_profile(path: &Path, source: &SourceArgs) -> Result<Profile, LoadFailure> {
    let value = Loader::new()
        .parse_file(path, source.format())
        .map_err(|e| match e {
            ParseError::Io { .. } => LoadFailure::Read(e.to_string()),
            other => LoadFailure::Invalid(vec![other.to_string()]),
        })?;
    Profile::from_value(&value).map_err(|e| {
        LoadFailure::Invalid(
            e.violations
                .iter()
                .map(|v| format!("{}: {}", v.path, v.message))
                .collect(),
        )
    })
}
