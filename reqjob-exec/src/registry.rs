//! Resolution of `module:attribute` references.
//!
//! Documents name hooks, auth schemes, transports and applications by
//! attribute path. The embedding program registers what those paths may
//! point at; [`AttrRegistry::new`] starts with the built-in `reqjob.auth`
//! and `reqjob.hooks` modules.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqjob_core::schema::AttrPath;
use reqjob_core::{AttrPathError, Mapping, Value};
use secrecy::SecretString;

use crate::app::App;
use crate::hooks::{self, Hook};
use crate::http::{Auth, HttpClient};
use crate::prepare::{ClientCert, TlsVerify};

/// Constructor called with an instance's `args` and `kwargs`.
pub type Factory<T> = Arc<dyn Fn(&[Value], &Mapping) -> Result<T, String> + Send + Sync>;

#[derive(Clone)]
pub enum Attr {
    Hook(Arc<dyn Hook>),
    Auth(Factory<Auth>),
    Transport(Factory<Arc<dyn HttpClient>>),
    Cert(Factory<ClientCert>),
    Verify(Factory<TlsVerify>),
    App(Arc<dyn App>),
}

impl Attr {
    pub fn kind(&self) -> &'static str {
        match self {
            Attr::Hook(_) => "hook",
            Attr::Auth(_) => "auth factory",
            Attr::Transport(_) => "transport factory",
            Attr::Cert(_) => "certificate factory",
            Attr::Verify(_) => "verify factory",
            Attr::App(_) => "application",
        }
    }
}

impl std::fmt::Debug for Attr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attr({})", self.kind())
    }
}

#[derive(Clone, Debug)]
pub struct AttrRegistry {
    modules: BTreeMap<String, BTreeMap<String, Attr>>,
}

impl Default for AttrRegistry {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! typed_getter {
    ($name:ident, $variant:ident, $ty:ty, $expected:literal) => {
        pub fn $name(&self, path: &AttrPath) -> Result<$ty, AttrPathError> {
            match self.get(path)? {
                Attr::$variant(inner) => Ok(inner.clone()),
                other => Err(AttrPathError::KindMismatch {
                    path: path.to_string(),
                    expected: $expected,
                    found: other.kind(),
                }),
            }
        }
    };
}

impl AttrRegistry {
    /// Registry holding the built-in modules.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.insert("reqjob.auth", "HTTPBasicAuth", Attr::Auth(Arc::new(basic_auth)));
        registry.insert("reqjob.auth", "HTTPProxyAuth", Attr::Auth(Arc::new(proxy_auth)));
        registry.insert("reqjob.auth", "BearerAuth", Attr::Auth(Arc::new(bearer_auth)));
        registry.insert("reqjob.hooks", "debug_request", Attr::Hook(Arc::new(hooks::debug_request)));
        registry.insert("reqjob.hooks", "debug_response", Attr::Hook(Arc::new(hooks::debug_response)));
        registry.insert(
            "reqjob.hooks",
            "raise_for_status",
            Attr::Hook(Arc::new(hooks::raise_for_status)),
        );
        registry
    }

    pub fn empty() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
    }

    fn insert(&mut self, module: &str, attribute: &str, attr: Attr) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(attribute.to_string(), attr);
    }

    /// Registers `attr` under `path`, replacing any previous entry.
    pub fn register(&mut self, path: &str, attr: Attr) -> Result<(), AttrPathError> {
        let path = AttrPath::parse(path)?;
        self.insert(path.module(), path.attribute(), attr);
        Ok(())
    }

    pub fn register_hook(&mut self, path: &str, hook: impl Hook + 'static) -> Result<(), AttrPathError> {
        self.register(path, Attr::Hook(Arc::new(hook)))
    }

    pub fn register_app(&mut self, path: &str, app: Arc<dyn App>) -> Result<(), AttrPathError> {
        self.register(path, Attr::App(app))
    }

    pub fn register_auth<F>(&mut self, path: &str, factory: F) -> Result<(), AttrPathError>
    where
        F: Fn(&[Value], &Mapping) -> Result<Auth, String> + Send + Sync + 'static,
    {
        self.register(path, Attr::Auth(Arc::new(factory)))
    }

    pub fn register_transport<F>(&mut self, path: &str, factory: F) -> Result<(), AttrPathError>
    where
        F: Fn(&[Value], &Mapping) -> Result<Arc<dyn HttpClient>, String> + Send + Sync + 'static,
    {
        self.register(path, Attr::Transport(Arc::new(factory)))
    }

    pub fn get(&self, path: &AttrPath) -> Result<&Attr, AttrPathError> {
        let module = self
            .modules
            .get(path.module())
            .ok_or_else(|| AttrPathError::ModuleNotFound {
                module: path.module().to_string(),
                attribute: path.attribute().to_string(),
            })?;
        module
            .get(path.attribute())
            .ok_or_else(|| AttrPathError::AttributeNotFound {
                module: path.module().to_string(),
                attribute: path.attribute().to_string(),
            })
    }

    typed_getter!(hook, Hook, Arc<dyn Hook>, "hook");
    typed_getter!(auth, Auth, Factory<Auth>, "auth factory");
    typed_getter!(transport, Transport, Factory<Arc<dyn HttpClient>>, "transport factory");
    typed_getter!(cert, Cert, Factory<ClientCert>, "certificate factory");
    typed_getter!(verify, Verify, Factory<TlsVerify>, "verify factory");
    typed_getter!(app, App, Arc<dyn App>, "application");

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

/// Positional argument `index`, or the keyword `name`.
fn string_arg(args: &[Value], kwargs: &Mapping, index: usize, name: &str) -> Result<String, String> {
    kwargs
        .get(name)
        .or_else(|| args.get(index))
        .filter(|v| !v.is_null() && !v.is_undefined())
        .map(Value::to_param_string)
        .ok_or_else(|| format!("missing required argument '{name}'"))
}

fn basic_auth(args: &[Value], kwargs: &Mapping) -> Result<Auth, String> {
    Ok(Auth::Basic {
        username: string_arg(args, kwargs, 0, "username")?,
        password: SecretString::from(string_arg(args, kwargs, 1, "password")?),
    })
}

fn proxy_auth(args: &[Value], kwargs: &Mapping) -> Result<Auth, String> {
    Ok(Auth::Proxy {
        username: string_arg(args, kwargs, 0, "username")?,
        password: SecretString::from(string_arg(args, kwargs, 1, "password")?),
    })
}

fn bearer_auth(args: &[Value], kwargs: &Mapping) -> Result<Auth, String> {
    Ok(Auth::Bearer(SecretString::from(string_arg(args, kwargs, 0, "token")?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(text: &str) -> AttrPath {
        AttrPath::parse(text).expect("path")
    }

    #[test]
    fn builtin_auth_accepts_positional_and_keyword_arguments() {
        let registry = AttrRegistry::new();
        let factory = registry.auth(&path("reqjob.auth:HTTPBasicAuth")).expect("auth");
        let kwargs: Mapping = [("password".to_string(), Value::from("pw"))].into_iter().collect();
        let auth = factory(&[Value::from("user")], &kwargs).expect("build");
        assert!(matches!(auth, Auth::Basic { ref username, .. } if username == "user"));

        let err = factory(&[], &Mapping::new()).err().expect("missing");
        assert_eq!(err, "missing required argument 'username'");
    }

    #[test]
    fn wrong_kind_is_reported() {
        let registry = AttrRegistry::new();
        let err = registry.hook(&path("reqjob.auth:BearerAuth")).err().expect("kind");
        assert_eq!(
            err,
            AttrPathError::KindMismatch {
                path: "reqjob.auth:BearerAuth".into(),
                expected: "hook",
                found: "auth factory",
            }
        );
    }
}
