//! Projection of resolved jobs and tasks onto client and request arguments.
//!
//! Both steps evaluate every expression in the resolved settings first, then
//! decode the result strictly and dereference attribute paths through the
//! [`AttrRegistry`]. Anything that fails here is a configuration error and is
//! reported before a request is sent.

use std::sync::Arc;
use std::time::Duration;

use reqjob_core::schema::{
    bind_url, Aliases, AttrPath, Cert, ClientSettings, HookPhase, Instance, Limits,
    RequestSettings, ResolvedJob, ResolvedTask, Verify,
};
use reqjob_core::url::urljoin;
use reqjob_core::{AttrPathError, Engine, Mapping, Value};

use crate::app::App;
use crate::error::PrepareError;
use crate::hooks::{NamedHook, TaskHooks};
use crate::http::{Auth, Body, HttpClient, HttpRequest};
use crate::registry::{AttrRegistry, Factory};
use crate::verify::Verifier;

/// Server certificate verification as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsVerify {
    Enabled(bool),
    /// Extra trusted roots, PEM encoded.
    CaPem(Vec<u8>),
}

/// Client certificate chain and private key, PEM encoded.
#[derive(Clone)]
pub struct ClientCert {
    pub pem: Vec<u8>,
}

impl std::fmt::Debug for ClientCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClientCert(<redacted>)")
    }
}

/// Everything needed to build the HTTP client for one job.
#[derive(Clone)]
pub struct ClientArgs {
    pub job: String,
    pub path: String,
    pub base_url: String,
    /// Used by requests that bring no auth of their own.
    pub auth: Option<Auth>,
    pub verify: TlsVerify,
    pub cert: Option<ClientCert>,
    pub http1: bool,
    pub http2: bool,
    pub proxies: Vec<(String, String)>,
    pub timeout: Duration,
    pub limits: Limits,
    pub max_redirects: usize,
    pub trust_env: bool,
    pub transport: Option<Arc<dyn HttpClient>>,
    /// In-process application, with the path it was found under.
    pub app: Option<(String, Arc<dyn App>)>,
}

impl std::fmt::Debug for ClientArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientArgs")
            .field("job", &self.job)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("limits", &self.limits)
            .field("max_redirects", &self.max_redirects)
            .field("transport", &self.transport.is_some())
            .field("app", &self.app.as_ref().map(|(name, _)| name))
            .finish_non_exhaustive()
    }
}

fn field(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn evaluate_map(engine: &Engine, path: &str, settings: &Mapping) -> Result<Mapping, PrepareError> {
    let evaluated = engine
        .evaluate_recursive(&Value::Map(settings.clone()))
        .map_err(|source| PrepareError::Eval {
            path: path.to_string(),
            source,
        })?;
    match evaluated {
        Value::Map(map) => Ok(map),
        other => Err(PrepareError::Invalid {
            path: path.to_string(),
            message: format!("settings evaluated to {}", other.kind()),
        }),
    }
}

fn resolve_target<'a>(
    path: &str,
    instance: &'a Instance,
    aliases: &'a Aliases,
) -> Result<&'a AttrPath, PrepareError> {
    instance
        .target
        .resolve(aliases)
        .map_err(|source| PrepareError::AttrPath {
            path: path.to_string(),
            source,
        })
}

fn instantiate<T>(
    path: &str,
    instance: &Instance,
    aliases: &Aliases,
    lookup: impl FnOnce(&AttrPath) -> Result<Factory<T>, AttrPathError>,
) -> Result<T, PrepareError> {
    let target = resolve_target(path, instance, aliases)?;
    let factory = lookup(target).map_err(|source| PrepareError::AttrPath {
        path: path.to_string(),
        source,
    })?;
    factory(&instance.args, &instance.kwargs).map_err(|message| PrepareError::Factory {
        path: path.to_string(),
        target: target.to_string(),
        message,
    })
}

fn seconds(path: &str, value: f64) -> Result<Duration, PrepareError> {
    Duration::try_from_secs_f64(value).map_err(|e| PrepareError::Invalid {
        path: path.to_string(),
        message: format!("invalid timeout {value}: {e}"),
    })
}

fn read_pem(path: &str, file: &std::path::Path) -> Result<Vec<u8>, PrepareError> {
    std::fs::read(file).map_err(|e| PrepareError::Tls {
        path: path.to_string(),
        message: format!("{}: {e}", file.display()),
    })
}

impl ClientArgs {
    pub fn build(
        job: &ResolvedJob,
        engine: &Engine,
        registry: &AttrRegistry,
    ) -> Result<Self, PrepareError> {
        let settings = evaluate_map(engine, &job.path, job.settings())?;
        let client = ClientSettings::decode(&settings, &job.path)?;
        let aliases = &client.aliases;

        let auth = match &client.auth {
            Some(instance) => Some(instantiate(&field(&job.path, "auth"), instance, aliases, |p| {
                registry.auth(p)
            })?),
            None => None,
        };

        let verify_path = field(&job.path, "verify");
        let verify = match &client.verify {
            Verify::Enabled(enabled) => TlsVerify::Enabled(*enabled),
            Verify::CaBundle(file) => {
                let pem = read_pem(&verify_path, file)?;
                reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| PrepareError::Tls {
                    path: verify_path.clone(),
                    message: e.to_string(),
                })?;
                TlsVerify::CaPem(pem)
            }
            Verify::Instance(instance) => {
                instantiate(&verify_path, instance, aliases, |p| registry.verify(p))?
            }
        };

        let cert_path = field(&job.path, "cert");
        let cert = match &client.cert {
            None => None,
            Some(Cert::Path(file)) => {
                let pem = read_pem(&cert_path, file)?;
                reqwest::Identity::from_pem(&pem).map_err(|e| PrepareError::Tls {
                    path: cert_path.clone(),
                    message: e.to_string(),
                })?;
                Some(ClientCert { pem })
            }
            Some(Cert::Instance(instance)) => Some(instantiate(&cert_path, instance, aliases, |p| {
                registry.cert(p)
            })?),
        };

        let transport = match &client.transport {
            Some(instance) => Some(instantiate(
                &field(&job.path, "transport"),
                instance,
                aliases,
                |p| registry.transport(p),
            )?),
            None => None,
        };

        let app = match &client.app {
            Some(target) => {
                let app_path = field(&job.path, "app");
                let attr_error = |source| PrepareError::AttrPath {
                    path: app_path.clone(),
                    source,
                };
                let resolved = target.resolve(aliases).map_err(attr_error)?;
                let app = registry.app(resolved).map_err(attr_error)?;
                Some((resolved.to_string(), app))
            }
            None => None,
        };

        urljoin(&client.base_url, "").map_err(|e| PrepareError::Invalid {
            path: field(&job.path, "base_url"),
            message: e.to_string(),
        })?;

        Ok(Self {
            job: job.name.clone(),
            path: job.path.clone(),
            base_url: client.base_url,
            auth,
            verify,
            cert,
            http1: client.http1,
            http2: client.http2,
            proxies: client.proxies,
            timeout: seconds(&field(&job.path, "timeout"), client.timeout)?,
            limits: client.limits,
            max_redirects: client.max_redirects,
            trust_env: client.trust_env,
            transport,
            app,
        })
    }
}

/// A task ready to send: the request, its expectation and its hooks.
#[derive(Debug, Clone)]
pub struct PreparedTask {
    pub name: String,
    pub path: String,
    pub request: HttpRequest,
    pub verifier: Verifier,
    pub hooks: TaskHooks,
}

fn pairs(map: Option<&Mapping>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (key, value) in map.into_iter().flatten() {
        match value {
            Value::Null | Value::Undefined => {}
            Value::Seq(items) | Value::Set(items) => {
                out.extend(items.iter().map(|v| (key.clone(), v.to_param_string())));
            }
            other => out.push((key.clone(), other.to_param_string())),
        }
    }
    out
}

impl PreparedTask {
    pub fn build(
        task: &ResolvedTask,
        client: &ClientArgs,
        engine: &Engine,
        registry: &AttrRegistry,
    ) -> Result<Self, PrepareError> {
        let mut settings = evaluate_map(engine, &task.path, task.settings())?;
        if let Some(pending) = task.pending_kwargs() {
            let kwargs = evaluate_map(engine, &field(&task.path, "kwargs"), pending)?;
            bind_url(&mut settings, kwargs).map_err(|source| PrepareError::Url {
                path: task.path.clone(),
                source,
            })?;
        }
        let rs = RequestSettings::decode(&settings, &task.path)?;

        let url = urljoin(&client.base_url, &rs.url).map_err(|source| PrepareError::Url {
            path: task.path.clone(),
            source,
        })?;
        if url.is_empty() {
            return Err(PrepareError::Invalid {
                path: field(&task.path, "url"),
                message: "no URL to request (set `url` or `base_url`)".to_string(),
            });
        }

        let expect = match task.expect() {
            Some(tree) => Some(engine.evaluate_recursive(tree).map_err(|source| {
                PrepareError::Eval {
                    path: field(&task.path, "expect"),
                    source,
                }
            })?),
            None => None,
        };

        let fields = pairs(rs.data.as_ref());
        let body = if let Some(json) = &rs.json {
            Body::Json(json.to_json().map_err(|e| PrepareError::Invalid {
                path: field(&task.path, "json"),
                message: e.to_string(),
            })?)
        } else if let Some(content) = rs.content {
            Body::Content(content.into_bytes())
        } else if !rs.files.is_empty() {
            Body::Multipart {
                fields,
                files: rs.files,
            }
        } else if rs.data.is_some() {
            Body::Form(fields)
        } else {
            Body::Empty
        };

        let auth = match &rs.auth {
            Some(instance) => Some(instantiate(
                &field(&task.path, "auth"),
                instance,
                &rs.aliases,
                |p| registry.auth(p),
            )?),
            None => client.auth.clone(),
        };
        let timeout = match rs.timeout {
            Some(t) => Some(seconds(&field(&task.path, "timeout"), t)?),
            None => None,
        };

        let mut hooks = TaskHooks::default();
        for phase in HookPhase::ALL {
            let phase_path = format!("{}.event_hooks.{}", task.path, phase);
            for (i, target) in rs.event_hooks.get(phase).iter().enumerate() {
                let attr_error = |source| PrepareError::AttrPath {
                    path: format!("{phase_path}[{i}]"),
                    source,
                };
                let resolved = target.resolve(&rs.aliases).map_err(attr_error)?;
                let hook = registry.hook(resolved).map_err(attr_error)?;
                hooks.push(
                    phase,
                    NamedHook {
                        name: resolved.to_string(),
                        hook,
                    },
                );
            }
        }

        let request = HttpRequest {
            method: rs.method,
            url,
            query: pairs(rs.params.as_ref()),
            headers: pairs(rs.headers.as_ref()),
            cookies: pairs(rs.cookies.as_ref()),
            body,
            auth,
            timeout,
            allow_redirects: rs.allow_redirects,
        };

        Ok(Self {
            name: if task.name.is_empty() {
                task.path.clone()
            } else {
                task.name.clone()
            },
            path: task.path.clone(),
            request,
            verifier: Verifier::from_value(expect.as_ref()),
            hooks,
        })
    }
}
