//! Dynamic value tree shared by the loader, merge engine, sandbox and verifier.

use std::fmt;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// String-keyed mapping that keeps document order.
pub type Mapping = IndexMap<String, Value>;

/// A scalar carrying a tag that is evaluated later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tagged {
    /// `${NAME}` or `${NAME:default}`.
    EnvRef {
        key: String,
        default: Option<String>,
    },
    /// `${expr}` where the text is not a plain name.
    Expression(String),
    /// `!ref name`, a reference resolved by the consumer.
    Ref(String),
    /// `!call module:attribute`, an attribute reference resolved by the consumer.
    AttrRef(String),
}

impl Tagged {
    pub fn tag(&self) -> &'static str {
        match self {
            Tagged::EnvRef { .. } | Tagged::Expression(_) => "!env_var",
            Tagged::Ref(_) => "!ref",
            Tagged::AttrRef(_) => "!call",
        }
    }

    /// Text as written inside the tag.
    pub fn source(&self) -> String {
        match self {
            Tagged::EnvRef { key, default } => match default {
                Some(default) => format!("{key}:{default}"),
                None => key.clone(),
            },
            Tagged::Expression(s) | Tagged::Ref(s) | Tagged::AttrRef(s) => s.clone(),
        }
    }

    /// Whether the sandbox evaluates this tag.
    pub fn is_evaluable(&self) -> bool {
        matches!(self, Tagged::EnvRef { .. } | Tagged::Expression(_))
    }
}

impl fmt::Display for Tagged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tagged::EnvRef { .. } | Tagged::Expression(_) => write!(f, "${{{}}}", self.source()),
            _ => write!(f, "{} {}", self.tag(), self.source()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent value; distinct from null.
    Undefined,
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    /// Unique elements in insertion order.
    Set(Vec<Value>),
    Map(Mapping),
    Tagged(Tagged),
}

impl Value {
    /// Builds a set, dropping elements loosely equal to an earlier one.
    pub fn set_from(items: impl IntoIterator<Item = Value>) -> Value {
        let mut out: Vec<Value> = Vec::new();
        for item in items {
            if !out.iter().any(|v| v.loose_eq(&item)) {
                out.push(item);
            }
        }
        Value::Set(out)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Seq(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "dict",
            Value::Tagged(_) => "tagged",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Seq(_) | Value::Set(_) | Value::Map(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Mapping> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Elements of a list or set.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(s) | Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tagged(&self) -> Option<&Tagged> {
        match self {
            Value::Tagged(t) => Some(t),
            _ => None,
        }
    }

    /// True when any node of the tree still needs evaluation.
    pub fn contains_tagged(&self) -> bool {
        match self {
            Value::Tagged(t) => t.is_evaluable(),
            Value::Seq(items) | Value::Set(items) => items.iter().any(Value::contains_tagged),
            Value::Map(m) => m.values().any(Value::contains_tagged),
            _ => false,
        }
    }

    /// Python-style truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Seq(s) | Value::Set(s) => !s.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Tagged(_) => true,
        }
    }

    /// Equality where ints and floats compare numerically and sets ignore order.
    /// Booleans never equal numbers.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Seq(a), Value::Seq(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.loose_eq(y)))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.loose_eq(other)))
            }
            _ => self == other,
        }
    }

    /// Python `repr()` rendering.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        write_repr(self, &mut out);
        out
    }

    /// Text used for query parameters, headers, form fields and URL placeholders.
    pub fn to_param_string(&self) -> String {
        match self {
            Value::Undefined | Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => s.clone(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Tagged(t) => t.to_string(),
            Value::Seq(_) | Value::Set(_) | Value::Map(_) => self
                .to_json()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| self.repr()),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        Ok(match self {
            Value::Undefined => return Err(ValueError::NotJson("undefined")),
            Value::Tagged(_) => return Err(ValueError::NotJson("unevaluated expression")),
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or(ValueError::NotJson("non-finite float"))?,
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
            Value::Seq(items) | Value::Set(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<_, _>>()?,
            ),
            Value::Map(m) => {
                let mut out = serde_json::Map::new();
                for (k, v) in m {
                    out.insert(k.clone(), v.to_json()?);
                }
                serde_json::Value::Object(out)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("{0} cannot be represented as JSON")]
    NotJson(&'static str),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a.len() == b.len() && a.iter().all(|x| b.contains(x)),
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Tagged(a), Value::Tagged(b)) => a == b,
            _ => false,
        }
    }
}

/// Python `str()` rendering: strings print raw, everything else as `repr`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            other => f.write_str(&other.repr()),
        }
    }
}

pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

pub(crate) fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn write_repr(value: &Value, out: &mut String) {
    match value {
        Value::Undefined => out.push_str("undefined"),
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&format_float(*f)),
        Value::Str(s) => out.push_str(&repr_str(s)),
        Value::Bytes(bytes) => {
            out.push_str("b'");
            for b in bytes {
                match b {
                    b'\\' => out.push_str("\\\\"),
                    b'\'' => out.push_str("\\'"),
                    b'\n' => out.push_str("\\n"),
                    b'\r' => out.push_str("\\r"),
                    b'\t' => out.push_str("\\t"),
                    0x20..=0x7e => out.push(*b as char),
                    _ => out.push_str(&format!("\\x{b:02x}")),
                }
            }
            out.push('\'');
        }
        Value::Seq(items) => {
            out.push('[');
            write_items(items, out);
            out.push(']');
        }
        Value::Set(items) if items.is_empty() => out.push_str("set()"),
        Value::Set(items) => {
            out.push('{');
            write_items(items, out);
            out.push('}');
        }
        Value::Map(m) => {
            out.push('{');
            for (i, (k, v)) in m.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&repr_str(k));
                out.push_str(": ");
                write_repr(v, out);
            }
            out.push('}');
        }
        Value::Tagged(t) => out.push_str(&t.to_string()),
    }
}

fn write_items(items: &[Value], out: &mut String) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(item, out);
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined => serializer.serialize_str("undefined"),
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            Value::Seq(items) | Value::Set(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Tagged(t) => serializer.serialize_str(&t.to_string()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::Seq(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(m) => {
                Value::Map(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Seq(value)
    }
}

impl From<Mapping> for Value {
    fn from(value: Mapping) -> Self {
        Value::Map(value)
    }
}

impl From<Tagged> for Value {
    fn from(value: Tagged) -> Self {
        Value::Tagged(value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_matches_python() {
        let v: Value = [
            ("a", Value::Int(1)),
            ("b", Value::Float(2.0)),
            ("c", Value::Seq(vec![Value::Null, Value::Bool(true), "x".into()])),
        ]
        .into_iter()
        .collect();
        assert_eq!(v.repr(), "{'a': 1, 'b': 2.0, 'c': [None, True, 'x']}");
        assert_eq!(Value::Set(vec![]).repr(), "set()");
        assert_eq!(Value::from("it's").repr(), "\"it's\"");
        assert_eq!(Value::Bytes(b"a\n".to_vec()).repr(), "b'a\\n'");
    }

    #[test]
    fn loose_eq_mixes_ints_and_floats_only() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(!Value::Bool(true).loose_eq(&Value::Int(1)));
        assert!(Value::Set(vec![1.into(), 2.into()]).loose_eq(&Value::Set(vec![2.into(), 1.into()])));
        assert!(!Value::Seq(vec![1.into(), 2.into()]).loose_eq(&Value::Seq(vec![2.into(), 1.into()])));
    }

    #[test]
    fn set_from_drops_duplicates() {
        let set = Value::set_from(vec![1.into(), Value::Float(1.0), 2.into()]);
        assert_eq!(set, Value::Set(vec![1.into(), 2.into()]));
    }

    #[test]
    fn param_strings_use_lowercase_booleans() {
        assert_eq!(Value::Bool(true).to_param_string(), "true");
        assert_eq!(Value::Float(1.5).to_param_string(), "1.5");
        assert_eq!(Value::Null.to_param_string(), "");
    }

    #[test]
    fn contains_tagged_ignores_refs() {
        let expr = Value::Tagged(Tagged::Expression("1 + 1".into()));
        assert!(Value::Seq(vec![expr]).contains_tagged());
        assert!(!Value::Tagged(Tagged::Ref("x".into())).contains_tagged());
    }

    #[test]
    fn undefined_is_not_json() {
        assert_eq!(Value::Undefined.to_json(), Err(ValueError::NotJson("undefined")));
    }
}
