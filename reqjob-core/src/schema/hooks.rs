use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::value::Value;

use super::decode::{field, index, Decoder};
use super::values::AttrTarget;

/// Points in a task's life where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    /// May rewrite the request before it is sent.
    BuildRequest,
    Request,
    /// Not run when the transport fails.
    Response,
    Expect,
    Success,
    Error,
    Complete,
    Exception,
}

impl HookPhase {
    pub const ALL: [HookPhase; 8] = [
        HookPhase::BuildRequest,
        HookPhase::Request,
        HookPhase::Response,
        HookPhase::Expect,
        HookPhase::Success,
        HookPhase::Error,
        HookPhase::Complete,
        HookPhase::Exception,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::BuildRequest => "build_request",
            HookPhase::Request => "request",
            HookPhase::Response => "response",
            HookPhase::Expect => "expect",
            HookPhase::Success => "success",
            HookPhase::Error => "error",
            HookPhase::Complete => "complete",
            HookPhase::Exception => "exception",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        HookPhase::ALL.into_iter().find(|p| p.as_str() == key)
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook references per phase. Unset phases read as empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventHooks {
    phases: BTreeMap<HookPhase, Vec<AttrTarget>>,
}

impl EventHooks {
    pub fn get(&self, phase: HookPhase) -> &[AttrTarget] {
        self.phases.get(&phase).map_or(&[], Vec::as_slice)
    }

    pub fn set(&mut self, phase: HookPhase, hooks: Vec<AttrTarget>) {
        self.phases.insert(phase, hooks);
    }

    pub fn is_empty(&self) -> bool {
        self.phases.values().all(Vec::is_empty)
    }

    pub(crate) fn decode(d: &mut Decoder, path: &str, value: &Value) -> EventHooks {
        let mut hooks = EventHooks::default();
        let Some(map) = d.optional_map(path, value) else {
            return hooks;
        };
        for (key, value) in map {
            let key_path = field(path, key);
            let Some(phase) = HookPhase::from_key(key) else {
                d.push(key_path, "unknown hook phase");
                continue;
            };
            if value.is_null() {
                continue;
            }
            let Some(items) = d.seq(&key_path, value) else {
                continue;
            };
            let targets = items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| d.attr_target(&index(&key_path, i), item))
                .collect();
            hooks.set(phase, targets);
        }
        hooks
    }
}
