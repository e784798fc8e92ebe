//! Structural merge used to cascade configuration between nesting levels.
//!
//! Lists concatenate, sets union and mappings merge key by key. Mappings only
//! recurse up to `max_depth` levels; below that, each of `b`'s keys replaces
//! the value in `a` wholesale.

use crate::error::MergeError;
use crate::value::{Mapping, Value};

pub const DEFAULT_MAX_DEPTH: usize = 1;

/// Merges `b` into a copy of `a`; neither input is touched.
pub fn merge_deep(a: &Value, b: &Value, max_depth: usize) -> Result<Value, MergeError> {
    let mut out = a.clone();
    merge_in_place(&mut out, b.clone(), max_depth)?;
    Ok(out)
}

/// Merges `b` into `a`. On error `a` may hold a partial merge.
pub fn merge_in_place(a: &mut Value, b: Value, max_depth: usize) -> Result<(), MergeError> {
    merge_at(a, b, max_depth, 0)
}

fn merge_at(a: &mut Value, b: Value, max_depth: usize, depth: usize) -> Result<(), MergeError> {
    match (a, b) {
        (Value::Seq(left), Value::Seq(right)) => left.extend(right),
        (Value::Set(left), Value::Set(right)) => {
            for item in right {
                if !left.iter().any(|existing| existing.loose_eq(&item)) {
                    left.push(item);
                }
            }
        }
        (Value::Map(left), Value::Map(right)) => {
            let depth = depth + 1;
            if depth <= max_depth {
                for (key, value) in right {
                    match left.get_mut(&key) {
                        Some(existing) if value.is_container() => {
                            merge_at(existing, value, max_depth, depth)?
                        }
                        Some(existing) => *existing = value,
                        None => {
                            left.insert(key, value);
                        }
                    }
                }
            } else {
                left.extend(right);
            }
        }
        (left, right) if left.is_container() => {
            return Err(MergeError::TypeMismatch {
                left: left.kind(),
                right: right.kind(),
            })
        }
        (left, _) => return Err(MergeError::Unmergeable { kind: left.kind() }),
    }
    Ok(())
}

/// Single-level key union where `b` wins. `None` when there is nothing to merge.
pub fn merge_shallow(a: Option<&Mapping>, b: Option<&Mapping>) -> Option<Mapping> {
    match (a, b) {
        (None, None) => None,
        (None, Some(b)) if b.is_empty() => None,
        (a, b) => {
            let mut out = a.cloned().unwrap_or_default();
            if let Some(b) = b {
                out.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Value)]) -> Value {
        entries.iter().cloned().collect()
    }

    #[test]
    fn scalar_in_container_is_replaced() {
        let a = map(&[("a", Value::Seq(vec![1.into()]))]);
        let b = map(&[("a", Value::Int(2))]);
        assert_eq!(merge_deep(&a, &b, 1), Ok(map(&[("a", Value::Int(2))])));
    }

    #[test]
    fn scalar_target_with_container_source_is_unmergeable() {
        let a = map(&[("a", Value::Int(1))]);
        let b = map(&[("a", Value::Seq(vec![]))]);
        assert_eq!(
            merge_deep(&a, &b, 1),
            Err(MergeError::Unmergeable { kind: "int" })
        );
    }

    #[test]
    fn zero_depth_overwrites_top_level_keys() {
        let a = map(&[("a", map(&[("x", 1.into())])), ("keep", 1.into())]);
        let b = map(&[("a", map(&[("y", 2.into())]))]);
        let merged = merge_deep(&a, &b, 0).expect("merge");
        assert_eq!(
            merged,
            map(&[("a", map(&[("y", 2.into())])), ("keep", 1.into())])
        );
    }
}
