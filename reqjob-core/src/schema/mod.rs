//! Profile, job and task documents and the inheritance between them.
//!
//! Each entity keeps the mapping of fields its author actually wrote.
//! Resolution takes the parent's inherited fields as a base, overlays the
//! child's fields with a depth-limited merge, and adds params, headers and
//! cookies key by key. Typed views with defaults applied are decoded from
//! the resolved mapping once its expressions have been evaluated.

mod client;
mod decode;
mod expect;
mod hooks;
mod job;
mod profile;
mod task;
mod values;

use crate::error::MergeError;
use crate::merge::{merge_in_place, merge_shallow, DEFAULT_MAX_DEPTH};
use crate::value::{Mapping, Value};

pub use self::client::{ClientSettings, CLIENT_FIELDS};
pub use self::expect::RESPONSE_FACETS;
pub use self::hooks::{EventHooks, HookPhase};
pub use self::job::{Job, ResolvedJob};
pub use self::profile::Profile;
pub use self::task::{bind_url, RequestSettings, ResolvedTask, Task};
pub use self::values::{
    Alias, Aliases, AttrPath, AttrTarget, Cert, FileSpec, Instance, Limits, Method, Verify,
    MAX_CONNECTIONS,
};

/// Fields combined key by key across levels instead of overwritten.
pub const MERGEABLE_FIELDS: &[&str] = &["params", "headers", "cookies"];

/// Profile fields a job starts from (mergeables are handled separately).
pub const JOB_INHERITED_FIELDS: &[&str] = &[
    "auth",
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
    "aliases",
];

/// Job fields a task starts from (mergeables are handled separately).
pub const TASK_INHERITED_FIELDS: &[&str] = &["event_hooks", "aliases"];

/// Combines a parent's settings with a child's.
///
/// The parent's `inherited` fields form the base and the child's own fields
/// are merged over it at [`DEFAULT_MAX_DEPTH`]: nested mappings such as
/// `event_hooks` merge per key, anything deeper is replaced. A child value of
/// a different kind than the parent's replaces it outright.
pub(crate) fn inherit(
    parent: &Mapping,
    child: &Mapping,
    inherited: &[&str],
) -> Result<Mapping, MergeError> {
    let mut base: Mapping = parent
        .iter()
        .filter(|(k, _)| inherited.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let overlay: Mapping = child
        .iter()
        .filter(|(k, _)| !MERGEABLE_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    base.retain(|key, value| match overlay.get(key) {
        Some(over) => !over.is_container() || over.kind() == value.kind(),
        None => true,
    });

    let mut merged = Value::Map(base);
    merge_in_place(&mut merged, Value::Map(overlay), DEFAULT_MAX_DEPTH)?;
    let mut merged = match merged {
        Value::Map(m) => m,
        other => return Err(MergeError::Unmergeable { kind: other.kind() }),
    };

    for field in MERGEABLE_FIELDS {
        let from_parent = parent.get(*field).filter(|v| !v.is_null());
        let from_child = child.get(*field).filter(|v| !v.is_null());
        let combined = match (from_parent, from_child) {
            // An expression can only be replaced, not merged.
            (_, Some(c)) if !matches!(c, Value::Map(_)) => Some(c.clone()),
            (Some(p), None) if !matches!(p, Value::Map(_)) => Some(p.clone()),
            (p, c) => merge_shallow(p.and_then(Value::as_map), c.and_then(Value::as_map)).map(Value::Map),
        };
        if let Some(value) = combined {
            merged.insert((*field).to_string(), value);
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: Vec<(&str, Value)>) -> Mapping {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn mergeables_union_and_child_wins() {
        let parent = map(vec![
            ("headers", [("a", "1"), ("b", "1")].into_iter().collect()),
            ("timeout", Value::Int(3)),
        ]);
        let child = map(vec![("headers", [("b", "2")].into_iter().collect())]);
        let merged = inherit(&parent, &child, JOB_INHERITED_FIELDS).expect("merge");
        let expected: Value = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(merged.get("headers"), Some(&expected));
        assert_eq!(merged.get("timeout"), Some(&Value::Int(3)));
    }

    #[test]
    fn only_inherited_fields_pass_down() {
        let parent = map(vec![("timeout", Value::Int(3)), ("aliases", Value::Map(Mapping::new()))]);
        let merged = inherit(&parent, &Mapping::new(), TASK_INHERITED_FIELDS).expect("merge");
        assert!(merged.get("timeout").is_none());
        assert!(merged.get("aliases").is_some());
    }

    #[test]
    fn hook_phases_merge_but_lists_inside_are_replaced() {
        let parent = map(vec![(
            "event_hooks",
            [("request", vec![Value::from("m:a")]), ("response", vec![Value::from("m:b")])]
                .into_iter()
                .collect(),
        )]);
        let child = map(vec![(
            "event_hooks",
            [("request", vec![Value::from("m:c")])].into_iter().collect(),
        )]);
        let merged = inherit(&parent, &child, TASK_INHERITED_FIELDS).expect("merge");
        let expected: Value = [
            ("request", vec![Value::from("m:c")]),
            ("response", vec![Value::from("m:b")]),
        ]
        .into_iter()
        .collect();
        assert_eq!(merged.get("event_hooks"), Some(&expected));
    }

    #[test]
    fn child_of_another_kind_replaces() {
        let parent = map(vec![("verify", Value::Bool(true))]);
        let child = map(vec![("verify", [("type", "m:ctx")].into_iter().collect())]);
        let merged = inherit(&parent, &child, JOB_INHERITED_FIELDS).expect("merge");
        assert!(matches!(merged.get("verify"), Some(Value::Map(_))));
    }
}
