use std::collections::BTreeSet;

use crate::error::{SchemaError, Violation};
use crate::value::{Mapping, Tagged, Value};

use super::values::{AttrTarget, Instance};

pub(crate) fn field(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

pub(crate) fn index(path: &str, i: usize) -> String {
    format!("{path}[{i}]")
}

/// Typed reads over a [`Value`] tree that record every violation with its
/// location instead of stopping at the first one.
///
/// In lenient mode an evaluable tag is accepted wherever a typed value is
/// expected; the typed read then yields `None` and the value is checked
/// again after evaluation.
pub(crate) struct Decoder {
    violations: Vec<Violation>,
    lenient: bool,
}

impl Decoder {
    pub fn lenient() -> Self {
        Self {
            violations: Vec::new(),
            lenient: true,
        }
    }

    pub fn strict() -> Self {
        Self {
            violations: Vec::new(),
            lenient: false,
        }
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation::new(path, message));
    }

    pub fn finish(self) -> Result<(), SchemaError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::new(self.violations))
        }
    }

    pub fn is_deferred(&self, value: &Value) -> bool {
        self.lenient && matches!(value, Value::Tagged(t) if t.is_evaluable())
    }

    fn expected(&mut self, path: &str, what: &str, value: &Value) {
        if !self.is_deferred(value) {
            self.push(path, format!("expected {what}, found {}", value.kind()));
        }
    }

    pub fn map<'v>(&mut self, path: &str, value: &'v Value) -> Option<&'v Mapping> {
        match value {
            Value::Map(m) => Some(m),
            other => {
                self.expected(path, "a mapping", other);
                None
            }
        }
    }

    /// Like [`Decoder::map`] but `null` reads as absent.
    pub fn optional_map<'v>(&mut self, path: &str, value: &'v Value) -> Option<&'v Mapping> {
        if value.is_null() {
            return None;
        }
        self.map(path, value)
    }

    pub fn seq<'v>(&mut self, path: &str, value: &'v Value) -> Option<&'v [Value]> {
        match value {
            Value::Seq(items) => Some(items),
            other => {
                self.expected(path, "a list", other);
                None
            }
        }
    }

    pub fn string(&mut self, path: &str, value: &Value) -> Option<String> {
        match value {
            Value::Str(s) => Some(s.clone()),
            other => {
                self.expected(path, "a string", other);
                None
            }
        }
    }

    pub fn bool(&mut self, path: &str, value: &Value) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(*b),
            other => {
                self.expected(path, "a boolean", other);
                None
            }
        }
    }

    pub fn float(&mut self, path: &str, value: &Value) -> Option<f64> {
        match value {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if f.is_finite() && *f >= 0.0 => Some(*f),
            Value::Float(_) => {
                self.push(path, "must be a finite, non-negative number");
                None
            }
            other => {
                self.expected(path, "a number", other);
                None
            }
        }
    }

    pub fn uint(&mut self, path: &str, value: &Value) -> Option<u64> {
        match value {
            Value::Int(i) => match u64::try_from(*i) {
                Ok(n) => Some(n),
                Err(_) => {
                    self.push(path, "must not be negative");
                    None
                }
            },
            other => {
                self.expected(path, "an integer", other);
                None
            }
        }
    }

    pub fn string_set(&mut self, path: &str, value: &Value) -> Option<BTreeSet<String>> {
        let items = match value {
            Value::Seq(items) | Value::Set(items) => items,
            other => {
                self.expected(path, "a list of strings", other);
                return None;
            }
        };
        let mut out = BTreeSet::new();
        for (i, item) in items.iter().enumerate() {
            if let Some(s) = self.string(&index(path, i), item) {
                out.insert(s);
            }
        }
        Some(out)
    }

    /// Mapping with string values only, e.g. `proxies`.
    pub fn string_map(&mut self, path: &str, value: &Value) -> Option<Vec<(String, String)>> {
        let map = self.map(path, value)?;
        let mut out = Vec::with_capacity(map.len());
        for (k, v) in map {
            if let Some(s) = self.string(&field(path, k), v) {
                out.push((k.clone(), s));
            }
        }
        Some(out)
    }

    pub fn unknown_keys(&mut self, path: &str, map: &Mapping, allowed: &[&str]) {
        for key in map.keys() {
            if !allowed.contains(&key.as_str()) {
                self.push(field(path, key), "unknown field");
            }
        }
    }

    /// `module:attribute`, an alias, or the same written with `!call`.
    pub fn attr_target(&mut self, path: &str, value: &Value) -> Option<AttrTarget> {
        let text = match value {
            Value::Str(s) => s,
            Value::Tagged(Tagged::AttrRef(s)) => s,
            other => {
                self.expected(path, "an attribute path", other);
                return None;
            }
        };
        match AttrTarget::parse(text) {
            Ok(target) => Some(target),
            Err(e) => {
                self.push(path, e.to_string());
                None
            }
        }
    }

    /// `{type, args, kwargs}` or the bare type as shorthand.
    pub fn instance(&mut self, path: &str, value: &Value) -> Option<Instance> {
        let map = match value {
            Value::Str(_) | Value::Tagged(Tagged::AttrRef(_)) => {
                return self.attr_target(path, value).map(Instance::of);
            }
            other => self.map(path, other)?,
        };
        self.unknown_keys(path, map, &["type", "args", "kwargs"]);
        let target = match map.get("type") {
            Some(t) => self.attr_target(&field(path, "type"), t),
            None => {
                self.push(field(path, "type"), "required field is missing");
                None
            }
        };
        let args = match map.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => self.seq(&field(path, "args"), v).map(<[Value]>::to_vec).unwrap_or_default(),
        };
        let kwargs = match map.get("kwargs") {
            None => Mapping::new(),
            Some(v) => self
                .optional_map(&field(path, "kwargs"), v)
                .cloned()
                .unwrap_or_default(),
        };
        Some(Instance {
            target: target?,
            args,
            kwargs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_violation_with_its_path() {
        let mut d = Decoder::strict();
        assert_eq!(d.bool("jobs[0].http2", &Value::from("yes")), None);
        assert_eq!(d.uint("limits.max_connections", &Value::Int(-1)), None);
        let err = d.finish().expect_err("violations");
        assert_eq!(err.violations.len(), 2);
        assert_eq!(err.violations[0].path, "jobs[0].http2");
        assert_eq!(err.violations[0].message, "expected a boolean, found str");
    }

    #[test]
    fn lenient_mode_defers_expressions() {
        let tagged = Value::Tagged(Tagged::Expression("1 + 1".into()));
        let mut lenient = Decoder::lenient();
        assert_eq!(lenient.float("timeout", &tagged), None);
        assert!(lenient.finish().is_ok());

        let mut strict = Decoder::strict();
        assert_eq!(strict.float("timeout", &tagged), None);
        assert!(strict.finish().is_err());
    }

    #[test]
    fn instance_shorthand() {
        let mut d = Decoder::strict();
        let instance = d.instance("auth", &Value::from("reqjob.auth:BearerAuth")).expect("instance");
        assert!(instance.args.is_empty());
        assert_eq!(instance.target.to_string(), "reqjob.auth:BearerAuth");
        assert!(d.finish().is_ok());
    }
}
