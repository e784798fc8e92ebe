use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{ResolveError, SchemaError, UrlTemplateError};
use crate::url::UrlTemplate;
use crate::value::{Mapping, Value};

use super::client::decode_aliases;
use super::decode::{field, index, Decoder};
use super::expect;
use super::hooks::EventHooks;
use super::job::ResolvedJob;
use super::values::{Aliases, FileSpec, Instance, Method};
use super::{inherit, TASK_INHERITED_FIELDS};

/// Request fields a task may set.
pub(crate) const REQUEST_FIELDS: &[&str] = &[
    "url",
    "method",
    "params",
    "json",
    "content",
    "data",
    "files",
    "headers",
    "cookies",
    "auth",
    "allow_redirects",
    "timeout",
    "event_hooks",
    "aliases",
];

const TASK_ONLY_FIELDS: &[&str] = &["name", "kwargs", "expect", "tags"];

/// A task as written in its job.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub name: String,
    /// Location in the profile, e.g. `jobs[0].tasks[1]`.
    pub path: String,
    pub tags: BTreeSet<String>,
    settings: Mapping,
    kwargs: Option<Mapping>,
    expect: Option<Value>,
}

/// A task merged with its job. When the URL template or the values it
/// consumes hold expressions, binding waits for evaluation and the kwargs
/// are kept in [`ResolvedTask::pending_kwargs`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask {
    pub name: String,
    pub path: String,
    pub tags: BTreeSet<String>,
    settings: Mapping,
    expect: Option<Value>,
    pending_kwargs: Option<Mapping>,
}

impl Task {
    pub(crate) fn decode(d: &mut Decoder, path: &str, value: &Value) -> Option<Task> {
        let map = d.map(path, value)?;
        let allowed: Vec<&str> = REQUEST_FIELDS.iter().chain(TASK_ONLY_FIELDS).copied().collect();
        d.unknown_keys(path, map, &allowed);

        let name = match map.get("name") {
            Some(v) => d.string(&field(path, "name"), v).unwrap_or_default(),
            None => String::new(),
        };
        let tags = match map.get("tags") {
            Some(v) => d.string_set(&field(path, "tags"), v).unwrap_or_default(),
            None => BTreeSet::new(),
        };
        let kwargs = match map.get("kwargs") {
            Some(v) => d.optional_map(&field(path, "kwargs"), v).cloned(),
            None => None,
        };
        let expect = map.get("expect").filter(|v| !v.is_null()).cloned();
        if let Some(tree) = &expect {
            expect::check(d, &field(path, "expect"), tree);
        }

        let settings: Mapping = map
            .iter()
            .filter(|(k, _)| REQUEST_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        RequestSettings::decode_with(d, &settings, path);
        if let Some(Value::Str(url)) = settings.get("url") {
            if let Err(e) = UrlTemplate::parse(url) {
                d.push(field(path, "url"), e.to_string());
            }
        }

        Some(Task {
            name,
            path: path.to_string(),
            tags,
            settings,
            kwargs,
            expect,
        })
    }

    pub fn settings(&self) -> &Mapping {
        &self.settings
    }

    pub fn kwargs(&self) -> Option<&Mapping> {
        self.kwargs.as_ref()
    }

    /// Merges this task with its job and binds the URL template.
    pub fn resolve(&self, job: &ResolvedJob) -> Result<ResolvedTask, ResolveError> {
        let mut settings = inherit(job.settings(), &self.settings, TASK_INHERITED_FIELDS)
            .map_err(|source| ResolveError::Merge {
                path: self.path.clone(),
                source,
            })?;
        let url_error = |source| ResolveError::Url {
            path: self.path.clone(),
            source,
        };

        let kwargs = self.kwargs.clone().unwrap_or_default();
        let pending_kwargs = match settings.get("url") {
            None | Some(Value::Str(_)) => {
                let text = settings.get("url").and_then(Value::as_str).unwrap_or_default();
                let template = UrlTemplate::parse(text).map_err(url_error)?;
                match settings.get("params") {
                    Some(Value::Tagged(_)) => Some(kwargs),
                    params => {
                        let params = params.and_then(Value::as_map).cloned().unwrap_or_default();
                        let missing = template.missing(&kwargs, &params);
                        if !missing.is_empty() {
                            return Err(url_error(UrlTemplateError::MissingKeywords {
                                required: missing,
                            }));
                        }
                        let consumes_expression = template.keywords().into_iter().any(|name| {
                            kwargs
                                .get(name)
                                .or_else(|| params.get(name))
                                .is_some_and(Value::contains_tagged)
                        });
                        if consumes_expression {
                            Some(kwargs)
                        } else {
                            bind_url(&mut settings, kwargs).map_err(url_error)?;
                            None
                        }
                    }
                }
            }
            Some(_) => Some(kwargs),
        };

        Ok(ResolvedTask {
            name: self.name.clone(),
            path: self.path.clone(),
            tags: self.tags.clone(),
            settings,
            expect: self.expect.clone(),
            pending_kwargs,
        })
    }
}

impl ResolvedTask {
    pub fn settings(&self) -> &Mapping {
        &self.settings
    }

    pub fn expect(&self) -> Option<&Value> {
        self.expect.as_ref()
    }

    /// Kwargs still to be bound into the URL after evaluation.
    pub fn pending_kwargs(&self) -> Option<&Mapping> {
        self.pending_kwargs.as_ref()
    }

    pub fn url(&self) -> &str {
        self.settings.get("url").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn params(&self) -> Option<&Mapping> {
        self.settings.get("params").and_then(Value::as_map)
    }
}

/// Fills `settings.url` from `kwargs` and `settings.params`; kwargs the
/// template does not use become query parameters.
pub fn bind_url(settings: &mut Mapping, kwargs: Mapping) -> Result<(), UrlTemplateError> {
    let text = settings.get("url").and_then(Value::as_str).unwrap_or_default();
    let template = UrlTemplate::parse(text)?;
    let had_params = settings.get("params").is_some_and(|v| !v.is_null());
    let mut params = settings
        .get("params")
        .and_then(Value::as_map)
        .cloned()
        .unwrap_or_default();
    let url = template.bind(kwargs, &mut params)?;
    settings.insert("url".to_string(), Value::Str(url));
    if had_params || !params.is_empty() {
        settings.insert("params".to_string(), Value::Map(params));
    }
    Ok(())
}

/// Typed request settings of a resolved, evaluated task.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSettings {
    pub url: String,
    pub method: Method,
    pub params: Option<Mapping>,
    pub json: Option<Value>,
    pub content: Option<String>,
    pub data: Option<Mapping>,
    pub files: Vec<FileSpec>,
    pub headers: Option<Mapping>,
    pub cookies: Option<Mapping>,
    pub auth: Option<Instance>,
    pub allow_redirects: bool,
    /// Seconds; the client timeout applies when unset.
    pub timeout: Option<f64>,
    pub event_hooks: EventHooks,
    pub aliases: Aliases,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: Method::Get,
            params: None,
            json: None,
            content: None,
            data: None,
            files: Vec::new(),
            headers: None,
            cookies: None,
            auth: None,
            allow_redirects: true,
            timeout: None,
            event_hooks: EventHooks::default(),
            aliases: Aliases::new(),
        }
    }
}

impl RequestSettings {
    pub fn decode(settings: &Mapping, path: &str) -> Result<Self, SchemaError> {
        let mut d = Decoder::strict();
        let out = Self::decode_with(&mut d, settings, path);
        d.finish()?;
        Ok(out)
    }

    pub(crate) fn decode_with(d: &mut Decoder, settings: &Mapping, path: &str) -> Self {
        let mut out = Self::default();
        for (key, value) in settings {
            let p = field(path, key);
            match key.as_str() {
                "url" => out.url = d.string(&p, value).unwrap_or_default(),
                "method" => {
                    if let Some(text) = d.string(&p, value) {
                        match text.parse() {
                            Ok(method) => out.method = method,
                            Err(message) => d.push(p, message),
                        }
                    }
                }
                "params" => out.params = d.optional_map(&p, value).cloned(),
                "json" if !value.is_null() => out.json = Some(value.clone()),
                "content" if !value.is_null() => out.content = d.string(&p, value),
                "data" => out.data = d.optional_map(&p, value).cloned(),
                "files" => out.files = decode_files(d, &p, value),
                "headers" => out.headers = d.optional_map(&p, value).cloned(),
                "cookies" => out.cookies = d.optional_map(&p, value).cloned(),
                "auth" if !value.is_null() => out.auth = d.instance(&p, value),
                "allow_redirects" => out.allow_redirects = d.bool(&p, value).unwrap_or(true),
                "timeout" if !value.is_null() => out.timeout = d.float(&p, value),
                "event_hooks" => out.event_hooks = EventHooks::decode(d, &p, value),
                "aliases" => out.aliases = decode_aliases(d, &p, value),
                _ => {}
            }
        }
        let has = |key: &str| settings.get(key).is_some_and(|v| !v.is_null());
        if has("json") && (has("content") || has("data")) {
            d.push(field(path, "json"), "cannot be combined with content or data");
        }
        out
    }
}

fn decode_files(d: &mut Decoder, path: &str, value: &Value) -> Vec<FileSpec> {
    match value {
        Value::Null => Vec::new(),
        Value::Seq(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| decode_file(d, &index(path, i), item))
            .collect(),
        other => decode_file(d, path, other).into_iter().collect(),
    }
}

fn decode_file(d: &mut Decoder, path: &str, value: &Value) -> Option<FileSpec> {
    let map = d.map(path, value)?;
    d.unknown_keys(path, map, &["key", "name", "path", "media_type", "exist"]);
    let required = |key: &str, d: &mut Decoder| match map.get(key) {
        Some(v) => d.string(&field(path, key), v),
        None => {
            d.push(field(path, key), "required field is missing");
            None
        }
    };
    let key = required("key", d);
    let file_path = required("path", d);
    let optional = |key: &str, d: &mut Decoder| {
        map.get(key)
            .filter(|v| !v.is_null())
            .and_then(|v| d.string(&field(path, key), v))
    };
    let name = optional("name", d);
    let media_type = optional("media_type", d);
    let exist = match map.get("exist") {
        Some(v) => d.bool(&field(path, "exist"), v).unwrap_or(true),
        None => true,
    };

    let file_path = PathBuf::from(file_path?);
    if exist && !Path::new(&file_path).is_file() {
        d.push(
            field(path, "path"),
            format!("file {} does not exist", file_path.display()),
        );
    }
    Some(FileSpec {
        key: key?,
        name,
        path: file_path,
        media_type,
        exist,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: Vec<(&str, Value)>) -> Mapping {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn method_is_case_normalized() {
        let settings = map(vec![("method", Value::from("post"))]);
        let request = RequestSettings::decode(&settings, "t").expect("decode");
        assert_eq!(request.method, Method::Post);

        let err = RequestSettings::decode(&map(vec![("method", Value::from("TRACE"))]), "jobs[0].tasks[1]")
            .expect_err("invalid");
        assert_eq!(err.violations[0].path, "jobs[0].tasks[1].method");
        assert_eq!(
            err.violations[0].message,
            "expected one of GET, POST, PATCH, PUT, DELETE"
        );
    }

    #[test]
    fn json_excludes_other_bodies() {
        let settings = map(vec![
            ("json", [("a", 1)].into_iter().collect()),
            ("content", Value::from("raw")),
        ]);
        let err = RequestSettings::decode(&settings, "t").expect_err("invalid");
        assert_eq!(err.violations[0].path, "t.json");
    }

    #[test]
    fn files_must_exist_unless_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let present = dir.path().join("a.txt");
        std::fs::write(&present, b"x").expect("write");
        let missing = dir.path().join("b.txt");

        let files = Value::Seq(vec![
            [("key", Value::from("a")), ("path", Value::from(present.display().to_string()))]
                .into_iter()
                .collect(),
            [
                ("key", Value::from("b")),
                ("path", Value::from(missing.display().to_string())),
                ("exist", Value::Bool(false)),
            ]
            .into_iter()
            .collect(),
        ]);
        let request = RequestSettings::decode(&map(vec![("files", files)]), "t").expect("decode");
        assert_eq!(request.files.len(), 2);

        let bad: Value = [("key", "c"), ("path", "/definitely/not/here.bin")].into_iter().collect();
        let err = RequestSettings::decode(&map(vec![("files", bad)]), "t").expect_err("missing");
        assert_eq!(err.violations[0].path, "t.files.path");
    }

    #[test]
    fn bind_url_routes_leftover_kwargs_to_params() {
        let mut settings = map(vec![("url", Value::from("/users/{id}"))]);
        let kwargs = map(vec![("id", Value::Int(5)), ("active", Value::Bool(true))]);
        bind_url(&mut settings, kwargs).expect("bind");
        assert_eq!(settings.get("url"), Some(&Value::from("/users/5")));
        let params: Value = [("active", true)].into_iter().collect();
        assert_eq!(settings.get("params"), Some(&params));
    }
}
