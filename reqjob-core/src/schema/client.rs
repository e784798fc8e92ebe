use std::path::PathBuf;

use crate::error::SchemaError;
use crate::value::{Mapping, Value};

use super::decode::{field, Decoder};
use super::hooks::EventHooks;
use super::values::{
    Alias, Aliases, AttrPath, AttrTarget, Cert, Instance, Limits, Verify, MAX_CONNECTIONS,
};

/// Client-level settings shared by profiles and jobs.
pub const CLIENT_FIELDS: &[&str] = &[
    "auth",
    "params",
    "headers",
    "cookies",
    "verify",
    "cert",
    "http1",
    "http2",
    "proxies",
    "timeout",
    "limits",
    "max_redirects",
    "event_hooks",
    "base_url",
    "transport",
    "app",
    "trust_env",
];

/// Typed client settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub auth: Option<Instance>,
    pub params: Option<Mapping>,
    pub headers: Option<Mapping>,
    pub cookies: Option<Mapping>,
    pub verify: Verify,
    pub cert: Option<Cert>,
    pub http1: bool,
    pub http2: bool,
    pub proxies: Vec<(String, String)>,
    /// Seconds.
    pub timeout: f64,
    pub limits: Limits,
    pub max_redirects: usize,
    pub event_hooks: EventHooks,
    pub base_url: String,
    pub transport: Option<Instance>,
    pub app: Option<AttrTarget>,
    pub trust_env: bool,
    pub aliases: Aliases,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            auth: None,
            params: None,
            headers: None,
            cookies: None,
            verify: Verify::default(),
            cert: None,
            http1: true,
            http2: false,
            proxies: Vec::new(),
            timeout: 5.0,
            limits: Limits::default(),
            max_redirects: 20,
            event_hooks: EventHooks::default(),
            base_url: String::new(),
            transport: None,
            app: None,
            trust_env: true,
            aliases: Aliases::new(),
        }
    }
}

impl ClientSettings {
    /// Decodes fully evaluated settings. Keys outside [`CLIENT_FIELDS`] and
    /// `aliases` are ignored.
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
                "auth" if !value.is_null() => out.auth = d.instance(&p, value),
                "params" => out.params = d.optional_map(&p, value).cloned(),
                "headers" => out.headers = d.optional_map(&p, value).cloned(),
                "cookies" => out.cookies = d.optional_map(&p, value).cloned(),
                "verify" => out.verify = decode_verify(d, &p, value).unwrap_or_default(),
                "cert" if !value.is_null() => out.cert = decode_cert(d, &p, value),
                "http1" => out.http1 = d.bool(&p, value).unwrap_or(true),
                "http2" => out.http2 = d.bool(&p, value).unwrap_or(false),
                "proxies" => out.proxies = d.string_map(&p, value).unwrap_or_default(),
                "timeout" => out.timeout = d.float(&p, value).unwrap_or(5.0),
                "limits" => out.limits = decode_limits(d, &p, value),
                "max_redirects" => {
                    out.max_redirects = d
                        .uint(&p, value)
                        .and_then(|n| usize::try_from(n).ok())
                        .unwrap_or(20)
                }
                "event_hooks" => out.event_hooks = EventHooks::decode(d, &p, value),
                "base_url" => out.base_url = d.string(&p, value).unwrap_or_default(),
                "transport" if !value.is_null() => out.transport = d.instance(&p, value),
                "app" if !value.is_null() => out.app = d.attr_target(&p, value),
                "trust_env" => out.trust_env = d.bool(&p, value).unwrap_or(true),
                "aliases" => out.aliases = decode_aliases(d, &p, value),
                _ => {}
            }
        }
        if !out.http1 && !out.http2 {
            d.push(field(path, "http1"), "at least one of http1 and http2 must be enabled");
        }
        out
    }
}

fn decode_verify(d: &mut Decoder, path: &str, value: &Value) -> Option<Verify> {
    match value {
        Value::Bool(b) => Some(Verify::Enabled(*b)),
        Value::Str(s) => Some(Verify::CaBundle(PathBuf::from(s))),
        Value::Null => Some(Verify::default()),
        other => d.instance(path, other).map(Verify::Instance),
    }
}

fn decode_cert(d: &mut Decoder, path: &str, value: &Value) -> Option<Cert> {
    match value {
        Value::Str(s) if !s.contains(':') => Some(Cert::Path(PathBuf::from(s))),
        other => d.instance(path, other).map(Cert::Instance),
    }
}

fn decode_limits(d: &mut Decoder, path: &str, value: &Value) -> Limits {
    let mut limits = Limits::default();
    let Some(map) = d.optional_map(path, value) else {
        return limits;
    };
    d.unknown_keys(path, map, &["max_connections", "max_keepalive_connections"]);
    let mut read = |key: &str, slot: &mut usize| {
        if let Some(v) = map.get(key) {
            if let Some(n) = d.uint(&field(path, key), v).and_then(|n| usize::try_from(n).ok()) {
                *slot = n;
            }
        }
    };
    read("max_connections", &mut limits.max_connections);
    read("max_keepalive_connections", &mut limits.max_keepalive_connections);
    if limits.max_connections == 0 {
        d.push(field(path, "max_connections"), "must be at least 1");
    } else if limits.max_connections > MAX_CONNECTIONS {
        d.push(
            field(path, "max_connections"),
            format!("must be at most {MAX_CONNECTIONS}"),
        );
    }
    limits
}

pub(crate) fn decode_aliases(d: &mut Decoder, path: &str, value: &Value) -> Aliases {
    let mut aliases = Aliases::new();
    let Some(map) = d.optional_map(path, value) else {
        return aliases;
    };
    for (key, value) in map {
        let p = field(path, key);
        let alias = match Alias::parse(key) {
            Ok(alias) => alias,
            Err(e) => {
                d.push(&p, e.to_string());
                continue;
            }
        };
        let Some(text) = d.string(&p, value) else {
            continue;
        };
        match AttrPath::parse(&text) {
            Ok(target) => {
                aliases.insert(alias, target);
            }
            Err(e) => d.push(p, e.to_string()),
        }
    }
    aliases
}
