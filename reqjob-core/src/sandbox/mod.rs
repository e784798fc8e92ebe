//! Restricted expression language used by `${...}` tags.
//!
//! Expressions are parsed into a small AST and walked by an interpreter that
//! only knows literals, operators, names from the [`Context`], the `env`
//! lookup and an allow-list of builtins. There is no attribute access beyond
//! mapping keys and a handful of string and mapping methods, so nothing in an
//! expression can reach the file system, the network or the process.

mod builtins;
mod context;
mod interp;
mod lexer;
mod ops;
mod parser;

use tracing::trace;

use crate::error::EvalError;
use crate::value::{Mapping, Tagged, Value};

pub use self::builtins::Builtin;
pub use self::context::Context;

use self::interp::Interpreter;

/// Re-evaluation limit for values whose result is itself a tag.
pub const MAX_RECURSION: usize = 32;

/// Evaluates tags and expression strings against a [`Context`].
#[derive(Debug, Clone, Default)]
pub struct Engine {
    context: Context,
}

impl Engine {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Evaluates one expression. Blank input evaluates to `None`.
    pub fn evaluate(&self, source: &str) -> Result<Value, EvalError> {
        if source.trim().is_empty() {
            return Ok(Value::Null);
        }
        let expr = parser::parse(source.trim())?;
        Interpreter::new(&self.context).value(&expr)
    }

    /// Evaluates a single tag. Non-evaluable tags come back unchanged.
    pub fn evaluate_tagged(&self, tagged: &Tagged) -> Result<Value, EvalError> {
        match tagged {
            Tagged::EnvRef { key, default } => {
                let raw = self.context.env(key).or_else(|| default.clone());
                Ok(raw.map_or(Value::Null, coerce_env))
            }
            Tagged::Expression(source) => self.evaluate(source),
            Tagged::Ref(_) | Tagged::AttrRef(_) => Ok(Value::Tagged(tagged.clone())),
        }
    }

    /// Returns a copy of `value` with every evaluable tag replaced.
    ///
    /// A result that is itself a tag is evaluated again, up to
    /// [`MAX_RECURSION`] times.
    pub fn evaluate_recursive(&self, value: &Value) -> Result<Value, EvalError> {
        let mut out = value.clone();
        self.resolve_in_place(&mut out, 0)?;
        Ok(out)
    }

    fn resolve_in_place(&self, value: &mut Value, depth: usize) -> Result<(), EvalError> {
        match value {
            Value::Seq(items) | Value::Set(items) => {
                for item in items {
                    self.resolve_in_place(item, depth)?;
                }
            }
            Value::Map(map) => {
                for item in map.values_mut() {
                    self.resolve_in_place(item, depth)?;
                }
            }
            Value::Tagged(tagged) if tagged.is_evaluable() => {
                if depth >= MAX_RECURSION {
                    return Err(EvalError::Recursion {
                        expression: tagged.source(),
                        depth,
                    });
                }
                let mut result = self.evaluate_tagged(tagged)?;
                // A tag that evaluates to itself is a fixed point.
                if matches!(&result, Value::Tagged(t) if t == tagged) {
                    *value = result;
                    return Ok(());
                }
                self.resolve_in_place(&mut result, depth + 1)?;
                *value = result;
            }
            _ => {}
        }
        Ok(())
    }

    /// Evaluates one `env` entry and stores the result as an override.
    ///
    /// `None` results leave the environment untouched.
    pub fn bind_env_var(&mut self, key: &str, value: &Value) -> Result<(), EvalError> {
        let resolved = self.evaluate_recursive(value)?;
        if matches!(resolved, Value::Null | Value::Undefined) {
            trace!(key, "env entry evaluated to None, skipped");
            return Ok(());
        }
        self.context.set_env(key, resolved.to_param_string());
        Ok(())
    }

    /// Binds a whole `env` mapping in document order, so later entries can
    /// read earlier ones.
    pub fn bind_env(&mut self, env: &Mapping) -> Result<(), EvalError> {
        for (key, value) in env {
            self.bind_env_var(key, value)?;
        }
        Ok(())
    }
}

/// Names of every builtin an expression may call.
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    Builtin::ALL.iter().map(|b| b.name())
}

// `${PORT}` reads as an int when the text is numeric.
fn coerce_env(raw: String) -> Value {
    if raw.chars().any(|c| c.is_ascii_digit()) {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::Float(f);
        }
    }
    Value::Str(raw)
}
