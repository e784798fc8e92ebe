//! YAML/JSON loading with custom tags and `${...}` implicit resolution.
//!
//! Tag constructors live in a [`TagRegistry`] owned by each [`Loader`], so two
//! loaders in one process never see each other's registrations.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::value::{Tag, TaggedValue};

use crate::error::ParseError;
use crate::value::{Mapping, Tagged, Value};

/// Full-match pattern for implicitly tagged scalars.
pub static ENV_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\$\{(.*)\}$").expect("valid"));
static ENV_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?::(.*))?$").expect("valid")
});

pub const ENV_VAR_TAG: &str = "!env_var";
pub const REF_TAG: &str = "!ref";
pub const CALL_TAG: &str = "!call";

/// Names that read like identifiers but are literals in expressions.
const RESERVED: &[&str] = &["True", "False", "None", "null", "undefined", "true", "false"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl FromStr for Format {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Format::Yaml),
            "json" => Ok(Format::Json),
            _ => Err(ParseError::UnknownFormat(s.to_string())),
        }
    }
}

impl Format {
    /// Guesses the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }
}

/// Builds a value from the scalar text under a tag; `None` means the tagged node was null.
pub type TagConstructor = fn(Option<&str>) -> Result<Value, String>;

#[derive(Debug, Clone)]
pub struct TagRegistry {
    constructors: BTreeMap<String, TagConstructor>,
    implicit: Vec<(Regex, String)>,
}

impl TagRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
            implicit: Vec::new(),
        }
    }

    /// Registry with `!env_var`, `!ref`, `!call` and the `${...}` resolver.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ENV_VAR_TAG, construct_env_var);
        registry.register(REF_TAG, construct_ref);
        registry.register(CALL_TAG, construct_call);
        registry.add_implicit_resolver(ENV_VAR_TAG, ENV_PATTERN.clone());
        registry
    }

    pub fn register(&mut self, tag: &str, constructor: TagConstructor) {
        self.constructors.insert(normalize_tag(tag), constructor);
    }

    pub fn add_implicit_resolver(&mut self, tag: &str, pattern: Regex) {
        self.implicit.push((pattern, normalize_tag(tag)));
    }

    /// Tag implied by a plain scalar, if any resolver matches it entirely.
    pub fn resolve_implicit(&self, scalar: &str) -> Option<&str> {
        self.implicit
            .iter()
            .find(|(re, _)| re.is_match(scalar))
            .map(|(_, tag)| tag.as_str())
    }

    fn construct(&self, tag: &str, scalar: Option<&str>, path: &str) -> Result<Value, ParseError> {
        let constructor = self.constructors.get(tag).ok_or_else(|| ParseError::UnknownTag {
            tag: tag.to_string(),
            path: display_path(path),
        })?;
        constructor(scalar).map_err(|message| ParseError::InvalidTag {
            tag: tag.to_string(),
            path: display_path(path),
            message,
        })
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn normalize_tag(tag: &str) -> String {
    if tag.starts_with('!') {
        tag.to_string()
    } else {
        format!("!{tag}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

/// Scalars outside the `${...}` form stay plain strings.
fn construct_env_var(scalar: Option<&str>) -> Result<Value, String> {
    let text = scalar.unwrap_or_default();
    Ok(match ENV_PATTERN.captures(text) {
        Some(caps) => Value::Tagged(classify(caps.get(1).map_or("", |m| m.as_str()))),
        None => Value::Str(text.to_string()),
    })
}

fn construct_ref(scalar: Option<&str>) -> Result<Value, String> {
    Ok(Value::Tagged(Tagged::Ref(scalar.unwrap_or_default().to_string())))
}

fn construct_call(scalar: Option<&str>) -> Result<Value, String> {
    Ok(Value::Tagged(Tagged::AttrRef(
        scalar.unwrap_or_default().trim().to_string(),
    )))
}

/// Splits `NAME` / `NAME:default` from arbitrary expressions.
fn classify(inner: &str) -> Tagged {
    if let Some(caps) = ENV_KEY_RE.captures(inner) {
        let key = caps.get(1).map_or("", |m| m.as_str());
        if !RESERVED.contains(&key) {
            return Tagged::EnvRef {
                key: key.to_string(),
                default: caps.get(2).map(|m| m.as_str().to_string()),
            };
        }
    }
    Tagged::Expression(inner.trim().to_string())
}

#[derive(Debug, Clone, Default)]
pub struct Loader {
    tags: TagRegistry,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(tags: TagRegistry) -> Self {
        Self { tags }
    }

    pub fn tags_mut(&mut self) -> &mut TagRegistry {
        &mut self.tags
    }

    pub fn parse_file(&self, path: &Path, hint: Option<Format>) -> Result<Value, ParseError> {
        let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_str(&content, hint.or_else(|| Format::from_path(path)))
    }

    /// Parses a document. Without a hint YAML is tried first, then JSON.
    pub fn parse_str(&self, content: &str, hint: Option<Format>) -> Result<Value, ParseError> {
        match hint {
            Some(Format::Yaml) => self.parse_yaml(content),
            Some(Format::Json) => self.parse_json(content),
            None => match self.parse_yaml(content) {
                Ok(value) => Ok(value),
                Err(yaml_err) => match self.parse_json(content) {
                    Ok(value) => Ok(value),
                    Err(json_err) => Err(ParseError::Aggregate {
                        errors: vec![yaml_err, json_err],
                    }),
                },
            },
        }
    }

    fn parse_yaml(&self, content: &str) -> Result<Value, ParseError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(content)?;
        self.convert_yaml(raw, "")
    }

    fn parse_json(&self, content: &str) -> Result<Value, ParseError> {
        let raw: serde_json::Value = serde_json::from_str(content)?;
        Ok(self.convert_json(raw))
    }

    fn scalar(&self, s: String) -> Value {
        match self.tags.resolve_implicit(&s) {
            // Implicit tags only ever name registered constructors.
            Some(tag) => self
                .tags
                .construct(tag, Some(&s), "")
                .unwrap_or(Value::Str(s)),
            None => Value::Str(s),
        }
    }

    fn convert_json(&self, raw: serde_json::Value) -> Value {
        match raw {
            serde_json::Value::String(s) => self.scalar(s),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(|v| self.convert_json(v)).collect())
            }
            serde_json::Value::Object(m) => {
                Value::Map(m.into_iter().map(|(k, v)| (k, self.convert_json(v))).collect())
            }
            other => Value::from(other),
        }
    }

    fn convert_yaml(&self, raw: serde_yaml::Value, path: &str) -> Result<Value, ParseError> {
        Ok(match raw {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_yaml::Value::String(s) => self.scalar(s),
            serde_yaml::Value::Sequence(items) => Value::Seq(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| self.convert_yaml(v, &format!("{path}[{i}]")))
                    .collect::<Result<_, _>>()?,
            ),
            serde_yaml::Value::Mapping(m) => {
                let mut out = Mapping::with_capacity(m.len());
                for (k, v) in m {
                    let key = yaml_key(&k).ok_or_else(|| ParseError::UnsupportedKey {
                        path: display_path(path),
                    })?;
                    let child = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    let value = self.convert_yaml(v, &child)?;
                    out.insert(key, value);
                }
                Value::Map(out)
            }
            serde_yaml::Value::Tagged(tagged) => {
                let TaggedValue { tag, value } = *tagged;
                let tag = normalize_tag(&tag.to_string());
                let text = match value {
                    serde_yaml::Value::Null => None,
                    serde_yaml::Value::String(s) => Some(s),
                    serde_yaml::Value::Bool(b) => Some(b.to_string()),
                    serde_yaml::Value::Number(n) => Some(n.to_string()),
                    _ => {
                        return Err(ParseError::InvalidTag {
                            tag,
                            path: display_path(path),
                            message: "tagged node must be a scalar".to_string(),
                        })
                    }
                };
                self.tags.construct(&tag, text.as_deref(), path)?
            }
        })
    }

    /// Serializes a value back to YAML. Evaluable tags are written in `${...}` form.
    pub fn dump(&self, value: &Value) -> Result<String, ParseError> {
        Ok(serde_yaml::to_string(&to_yaml(value)?)?)
    }
}

fn yaml_key(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some("null".to_string()),
        _ => None,
    }
}

fn to_yaml(value: &Value) -> Result<serde_yaml::Value, ParseError> {
    Ok(match value {
        Value::Undefined => return Err(ParseError::Unserializable("undefined")),
        Value::Null => serde_yaml::Value::Null,
        Value::Bool(b) => serde_yaml::Value::Bool(*b),
        Value::Int(i) => serde_yaml::Value::Number((*i).into()),
        Value::Float(f) => serde_yaml::Value::Number((*f).into()),
        Value::Str(s) => serde_yaml::Value::String(s.clone()),
        Value::Bytes(b) => serde_yaml::Value::String(String::from_utf8_lossy(b).into_owned()),
        Value::Seq(items) | Value::Set(items) => serde_yaml::Value::Sequence(
            items.iter().map(to_yaml).collect::<Result<_, _>>()?,
        ),
        Value::Map(m) => {
            let mut out = serde_yaml::Mapping::with_capacity(m.len());
            for (k, v) in m {
                out.insert(serde_yaml::Value::String(k.clone()), to_yaml(v)?);
            }
            serde_yaml::Value::Mapping(out)
        }
        Value::Tagged(t) if t.is_evaluable() => serde_yaml::Value::String(t.to_string()),
        Value::Tagged(t) => serde_yaml::Value::Tagged(Box::new(TaggedValue {
            tag: Tag::new(t.tag().trim_start_matches('!')),
            value: serde_yaml::Value::String(t.source()),
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_env_refs_and_expressions() {
        assert_eq!(
            classify("HOME"),
            Tagged::EnvRef {
                key: "HOME".into(),
                default: None
            }
        );
        assert_eq!(
            classify("PORT:8080"),
            Tagged::EnvRef {
                key: "PORT".into(),
                default: Some("8080".into())
            }
        );
        assert_eq!(
            classify("URL:http://localhost:80"),
            Tagged::EnvRef {
                key: "URL".into(),
                default: Some("http://localhost:80".into())
            }
        );
        assert_eq!(classify("1 + 2"), Tagged::Expression("1 + 2".into()));
        assert_eq!(classify("True"), Tagged::Expression("True".into()));
    }

    #[test]
    fn implicit_resolver_needs_full_match() {
        let tags = TagRegistry::with_defaults();
        assert_eq!(tags.resolve_implicit("${X}"), Some(ENV_VAR_TAG));
        assert_eq!(tags.resolve_implicit("prefix ${X}"), None);
        assert_eq!(tags.resolve_implicit("${X} suffix"), None);
    }

    #[test]
    fn registries_are_isolated() {
        fn upper(s: Option<&str>) -> Result<Value, String> {
            Ok(Value::Str(s.unwrap_or_default().to_uppercase()))
        }
        let mut custom = Loader::new();
        custom.tags_mut().register("!upper", upper);
        let plain = Loader::new();

        let doc = "a: !upper hi";
        let parsed = custom.parse_str(doc, Some(Format::Yaml)).expect("custom tag");
        assert_eq!(parsed.as_map().and_then(|m| m.get("a")), Some(&Value::from("HI")));
        assert!(matches!(
            plain.parse_str(doc, Some(Format::Yaml)),
            Err(ParseError::UnknownTag { .. })
        ));
    }
}
