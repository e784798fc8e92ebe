use std::collections::BTreeMap;

use crate::value::{Mapping, Value};

/// Names visible to expressions plus the `env` lookup.
///
/// `env` reads explicit overrides first and falls back to the process
/// environment; a key found in neither reads as `None`.
#[derive(Debug, Clone, Default)]
pub struct Context {
    bindings: Mapping,
    env: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind(name, value);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_env(key, value);
        self
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bindings.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    pub fn env(&self, key: &str) -> Option<String> {
        self.env
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    pub fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}
