use std::collections::BTreeSet;

use crate::error::{ResolveError, SchemaError};
use crate::value::{Mapping, Value};

use super::client::{ClientSettings, CLIENT_FIELDS};
use super::decode::{field, index, Decoder};
use super::job::{Job, ResolvedJob};

const PROFILE_ONLY_FIELDS: &[&str] = &["version", "name", "jobs", "tags", "env", "aliases"];

const DEFAULT_TAGS: [&str; 4] = ["minutes", "hour", "daily", "month"];

/// Root document: shared client settings and the jobs that inherit them.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub version: i64,
    pub tags: BTreeSet<String>,
    env: Mapping,
    settings: Mapping,
    jobs: Vec<Job>,
}

impl Profile {
    /// Decodes and checks a parsed document, reporting every violation.
    ///
    /// Fields holding `${...}` expressions are accepted as written and
    /// checked again once evaluated.
    pub fn from_value(value: &Value) -> Result<Profile, SchemaError> {
        let mut d = Decoder::lenient();
        let profile = Self::decode(&mut d, value);
        d.finish()?;
        profile.ok_or_else(|| SchemaError::new(Vec::new()))
    }

    fn decode(d: &mut Decoder, value: &Value) -> Option<Profile> {
        let map = d.map("", value)?;
        let allowed: Vec<&str> = CLIENT_FIELDS.iter().chain(PROFILE_ONLY_FIELDS).copied().collect();
        d.unknown_keys("", map, &allowed);

        let version = match map.get("version") {
            None => 0,
            Some(Value::Int(0)) => 0,
            Some(other) => {
                d.push("version", format!("unsupported version {}", other.repr()));
                0
            }
        };
        let name = match map.get("name") {
            Some(v) => d.string("name", v).unwrap_or_default(),
            None => String::new(),
        };
        let tags = match map.get("tags") {
            Some(v) => d.string_set("tags", v).unwrap_or_default(),
            None => DEFAULT_TAGS.iter().map(|t| (*t).to_string()).collect(),
        };
        let env = match map.get("env") {
            Some(v) => d.optional_map("env", v).cloned().unwrap_or_default(),
            None => Mapping::new(),
        };
        let jobs = match map.get("jobs") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => d
                .seq("jobs", v)
                .unwrap_or_default()
                .iter()
                .enumerate()
                .filter_map(|(i, job)| Job::decode(d, &index("jobs", i), job))
                .collect(),
        };

        let settings: Mapping = map
            .iter()
            .filter(|(k, _)| CLIENT_FIELDS.contains(&k.as_str()) || k.as_str() == "aliases")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ClientSettings::decode_with(d, &settings, "");
        for (key, value) in &env {
            if value.is_container() {
                d.push(field("env", key), "expected a scalar or an expression");
            }
        }

        Some(Profile {
            name,
            version,
            tags,
            env,
            settings,
            jobs,
        })
    }

    /// `env` entries, evaluated in order into the expression context.
    pub fn env(&self) -> &Mapping {
        &self.env
    }

    pub fn settings(&self) -> &Mapping {
        &self.settings
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Each job merged with this profile, in declared order.
    pub fn resolved_jobs(&self) -> impl Iterator<Item = Result<ResolvedJob, ResolveError>> + '_ {
        self.jobs.iter().map(move |job| job.resolve(self))
    }
}
