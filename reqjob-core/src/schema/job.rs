use std::collections::BTreeSet;

use crate::error::ResolveError;
use crate::value::{Mapping, Value};

use super::client::{ClientSettings, CLIENT_FIELDS};
use super::decode::{field, index, Decoder};
use super::profile::Profile;
use super::task::{ResolvedTask, Task};
use super::{inherit, JOB_INHERITED_FIELDS};

const JOB_ONLY_FIELDS: &[&str] = &["name", "tasks", "tags", "aliases"];

/// A job as written in the profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub name: String,
    /// Location in the profile, e.g. `jobs[0]`.
    pub path: String,
    pub tags: BTreeSet<String>,
    settings: Mapping,
    tasks: Vec<Task>,
}

/// A job merged with its profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJob {
    pub name: String,
    pub path: String,
    pub tags: BTreeSet<String>,
    settings: Mapping,
    tasks: Vec<Task>,
}

impl Job {
    pub(crate) fn decode(d: &mut Decoder, path: &str, value: &Value) -> Option<Job> {
        let map = d.map(path, value)?;
        let allowed: Vec<&str> = CLIENT_FIELDS.iter().chain(JOB_ONLY_FIELDS).copied().collect();
        d.unknown_keys(path, map, &allowed);

        let name = match map.get("name") {
            Some(v) => d.string(&field(path, "name"), v).unwrap_or_default(),
            None => {
                d.push(field(path, "name"), "required field is missing");
                String::new()
            }
        };
        let tags = match map.get("tags") {
            Some(v) => d.string_set(&field(path, "tags"), v).unwrap_or_default(),
            None => BTreeSet::new(),
        };
        let tasks = match map.get("tasks") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => {
                let tasks_path = field(path, "tasks");
                d.seq(&tasks_path, v)
                    .unwrap_or_default()
                    .iter()
                    .enumerate()
                    .filter_map(|(i, task)| Task::decode(d, &index(&tasks_path, i), task))
                    .collect()
            }
        };

        let settings: Mapping = map
            .iter()
            .filter(|(k, _)| CLIENT_FIELDS.contains(&k.as_str()) || k.as_str() == "aliases")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ClientSettings::decode_with(d, &settings, path);

        Some(Job {
            name,
            path: path.to_string(),
            tags,
            settings,
            tasks,
        })
    }

    pub fn settings(&self) -> &Mapping {
        &self.settings
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Merges this job with its profile.
    pub fn resolve(&self, profile: &Profile) -> Result<ResolvedJob, ResolveError> {
        let settings = inherit(profile.settings(), &self.settings, JOB_INHERITED_FIELDS)
            .map_err(|source| ResolveError::Merge {
                path: self.path.clone(),
                source,
            })?;
        Ok(ResolvedJob {
            name: self.name.clone(),
            path: self.path.clone(),
            tags: self.tags.clone(),
            settings,
            tasks: self.tasks.clone(),
        })
    }
}

impl ResolvedJob {
    pub fn settings(&self) -> &Mapping {
        &self.settings
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Each task merged with this job, in declared order.
    pub fn resolved_tasks(&self) -> impl Iterator<Item = Result<ResolvedTask, ResolveError>> + '_ {
        self.tasks.iter().map(move |task| task.resolve(self))
    }
}
