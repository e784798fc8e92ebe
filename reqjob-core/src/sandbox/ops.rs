//! Python semantics for operators over [`Value`].

use std::cmp::Ordering;

use crate::error::EvalError;
use crate::value::{format_float, Mapping, Value};

use super::parser::BinOp;

/// Upper bound on sequences built by repetition or `range`.
pub(crate) const MAX_SEQUENCE: usize = 1_000_000;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

/// Numeric view; booleans count as 0 and 1.
pub(crate) fn number(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Str(_) | Value::Tagged(_) => "str",
        Value::Bytes(_) => "bytes",
        Value::Seq(_) => "list",
        Value::Set(_) => "set",
        Value::Map(_) => "dict",
    }
}

fn type_error(message: impl Into<String>) -> EvalError {
    EvalError::Type(message.into())
}

fn overflow() -> EvalError {
    EvalError::Value("integer overflow".to_string())
}

pub(crate) fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Seq(x), Value::Seq(y)) => x.len() == y.len() && x.iter().zip(y).all(|(l, r)| py_eq(l, r)),
        (Value::Set(x), Value::Set(y)) => {
            x.len() == y.len() && x.iter().all(|l| y.iter().any(|r| py_eq(l, r)))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| py_eq(v, w)))
        }
        _ => match (number(a), number(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => x == y,
            (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
            _ => a == b,
        },
    }
}

pub(crate) fn py_cmp(a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return match (x, y) {
            (Num::Int(x), Num::Int(y)) => Ok(x.cmp(&y)),
            (x, y) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .ok_or_else(|| EvalError::Value("cannot order nan".to_string())),
        };
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Ok(x.cmp(y)),
        (Value::Seq(x), Value::Seq(y)) => {
            for (l, r) in x.iter().zip(y) {
                if !py_eq(l, r) {
                    return py_cmp(l, r);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            type_name(a),
            type_name(b)
        ))),
    }
}

/// Python `str()`.
pub(crate) fn py_str(value: &Value) -> String {
    value.to_string()
}

/// Elements produced by iterating a value.
pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::Seq(items) | Value::Set(items) => Ok(items.clone()),
        Value::Map(m) => Ok(m.keys().cloned().map(Value::Str).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Bytes(b) => Ok(b.iter().map(|x| Value::Int(i64::from(*x))).collect()),
        other => Err(type_error(format!(
            "'{}' object is not iterable",
            type_name(other)
        ))),
    }
}

/// Mapping keys are strings; other hashable scalars are rendered with `str()`.
pub(crate) fn to_key(value: &Value) -> Result<String, EvalError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => Ok(py_str(value)),
        other => Err(type_error(format!(
            "unhashable type: '{}'",
            type_name(other)
        ))),
    }
}

pub(crate) fn contains(container: &Value, item: &Value) -> Result<bool, EvalError> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                type_name(other)
            ))),
        },
        Value::Seq(items) | Value::Set(items) => Ok(items.iter().any(|x| py_eq(x, item))),
        Value::Map(m) => Ok(match item {
            Value::Str(key) => m.contains_key(key),
            _ => to_key(item).is_ok_and(|key| m.contains_key(&key)),
        }),
        Value::Bytes(b) => match number(item) {
            Some(Num::Int(x)) => Ok(u8::try_from(x).is_ok_and(|x| b.contains(&x))),
            _ => Err(type_error("a bytes-like object is required")),
        },
        other => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            type_name(other)
        ))),
    }
}

/// Identity for singletons, same-type equality otherwise.
pub(crate) fn is_same(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b) && a == b
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

pub(crate) fn index(target: &Value, key: &Value) -> Result<Value, EvalError> {
    match target {
        Value::Map(m) => {
            let k = to_key(key)?;
            m.get(&k)
                .cloned()
                .ok_or_else(|| EvalError::Value(format!("KeyError: {}", key.repr())))
        }
        Value::Seq(items) => {
            let i = int_index(key, "list")?;
            normalize_index(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| EvalError::Value("list index out of range".to_string()))
        }
        Value::Str(s) => {
            let i = int_index(key, "string")?;
            let chars: Vec<char> = s.chars().collect();
            normalize_index(i, chars.len())
                .map(|i| Value::Str(chars[i].to_string()))
                .ok_or_else(|| EvalError::Value("string index out of range".to_string()))
        }
        Value::Bytes(b) => {
            let i = int_index(key, "bytes")?;
            normalize_index(i, b.len())
                .map(|i| Value::Int(i64::from(b[i])))
                .ok_or_else(|| EvalError::Value("index out of range".to_string()))
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

fn int_index(key: &Value, what: &str) -> Result<i64, EvalError> {
    match number(key) {
        Some(Num::Int(i)) => Ok(i),
        _ => Err(type_error(format!(
            "{what} indices must be integers, not {}",
            type_name(key)
        ))),
    }
}

fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let adjust = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let start = start.map_or(0, |v| clamp(adjust(v), 0, len));
        let stop = stop.map_or(len, |v| clamp(adjust(v), 0, len));
        let mut i = start;
        while i < stop {
            out.extend(usize::try_from(i).ok());
            i += step;
        }
    } else {
        let start = start.map_or(len - 1, |v| clamp(adjust(v), -1, len - 1));
        let stop = stop.map_or(-1, |v| clamp(adjust(v), -1, len - 1));
        let mut i = start;
        while i > stop {
            out.extend(usize::try_from(i).ok());
            i += step;
        }
    }
    out
}

pub(crate) fn slice(
    target: &Value,
    start: Option<&Value>,
    stop: Option<&Value>,
    step: Option<&Value>,
) -> Result<Value, EvalError> {
    let bound = |v: Option<&Value>| -> Result<Option<i64>, EvalError> {
        match v {
            None | Some(Value::Null) => Ok(None),
            Some(v) => int_index(v, "slice").map(Some),
        }
    };
    let step = bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(EvalError::Value("slice step cannot be zero".to_string()));
    }
    let (start, stop) = (bound(start)?, bound(stop)?);
    match target {
        Value::Seq(items) => Ok(Value::Seq(
            slice_indices(items.len(), start, stop, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(
                slice_indices(chars.len(), start, stop, step)
                    .into_iter()
                    .map(|i| chars[i])
                    .collect(),
            ))
        }
        Value::Bytes(b) => Ok(Value::Bytes(
            slice_indices(b.len(), start, stop, step)
                .into_iter()
                .map(|i| b[i])
                .collect(),
        )),
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

/// Footprint of `value` in elements plus string bytes, saturating past `limit`.
fn weight(value: &Value, limit: usize) -> usize {
    let nested = |items: &mut dyn Iterator<Item = usize>| {
        let mut total = 1usize;
        for w in items {
            total = total.saturating_add(w);
            if total > limit {
                break;
            }
        }
        total
    };
    match value {
        Value::Str(s) => 1 + s.len(),
        Value::Bytes(b) => 1 + b.len(),
        Value::Seq(items) | Value::Set(items) => {
            nested(&mut items.iter().map(|item| weight(item, limit)))
        }
        Value::Map(map) => nested(&mut map.iter().map(|(k, v)| k.len() + weight(v, limit))),
        _ => 1,
    }
}

fn repeat<T: Clone>(
    items: &[T],
    times: i64,
    weigh: impl Fn(&T) -> usize,
) -> Result<Vec<T>, EvalError> {
    let times = usize::try_from(times.max(0)).unwrap_or(0);
    let too_large = || EvalError::Value("repeated sequence is too large".to_string());
    if items.len().saturating_mul(times) > MAX_SEQUENCE {
        return Err(too_large());
    }
    if times > 1 {
        let mut once = 0usize;
        for item in items {
            once = once.saturating_add(weigh(item));
            if once.saturating_mul(times) > MAX_SEQUENCE {
                return Err(too_large());
            }
        }
    }
    Ok((0..times).flat_map(|_| items.iter().cloned()).collect())
}

fn unsupported(op: BinOp, a: &Value, b: &Value) -> EvalError {
    type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        type_name(a),
        type_name(b)
    ))
}

pub(crate) fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return numeric(op, x, y);
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{x}{y}"))),
        (BinOp::Add, Value::Bytes(x), Value::Bytes(y)) => Ok(Value::Bytes([x.as_slice(), y.as_slice()].concat())),
        (BinOp::Add, Value::Seq(x), Value::Seq(y)) => Ok(Value::Seq([x.as_slice(), y.as_slice()].concat())),
        (BinOp::Sub, Value::Set(x), Value::Set(y)) => Ok(Value::Set(
            x.iter().filter(|v| !y.iter().any(|w| py_eq(v, w))).cloned().collect(),
        )),
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) => match number(n) {
            Some(Num::Int(times)) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(Value::Str(repeat(&chars, times, |c| c.len_utf8())?.into_iter().collect()))
            }
            _ => Err(unsupported(op, a, b)),
        },
        (BinOp::Mul, Value::Seq(items), n) | (BinOp::Mul, n, Value::Seq(items)) => match number(n) {
            Some(Num::Int(times)) => {
                Ok(Value::Seq(repeat(items, times, |item| weight(item, MAX_SEQUENCE))?))
            }
            _ => Err(unsupported(op, a, b)),
        },
        (BinOp::Mod, Value::Str(_), _) => Err(type_error(
            "printf-style formatting is not supported; use format()",
        )),
        _ => Err(unsupported(op, a, b)),
    }
}

fn zero_division(what: &str) -> EvalError {
    EvalError::ZeroDivision(what.to_string())
}

fn numeric(op: BinOp, x: Num, y: Num) -> Result<Value, EvalError> {
    if let (Num::Int(a), Num::Int(b)) = (x, y) {
        return match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div => {
                if b == 0 {
                    Err(zero_division("division by zero"))
                } else {
                    Ok(Value::Float(a as f64 / b as f64))
                }
            }
            BinOp::FloorDiv => {
                if b == 0 {
                    Err(zero_division("integer division or modulo by zero"))
                } else {
                    floor_div(a, b).map(Value::Int).ok_or_else(overflow)
                }
            }
            BinOp::Mod => {
                if b == 0 {
                    Err(zero_division("integer division or modulo by zero"))
                } else {
                    floor_mod(a, b).map(Value::Int).ok_or_else(overflow)
                }
            }
            BinOp::Pow => int_pow(a, b),
        };
    }
    let (a, b) = (x.as_f64(), y.as_f64());
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            float_mod(a, b)
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
    };
    Ok(Value::Float(result))
}

pub(crate) fn int_pow(base: i64, exp: i64) -> Result<Value, EvalError> {
    if exp < 0 {
        if base == 0 {
            return Err(zero_division("0.0 cannot be raised to a negative power"));
        }
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    let exp = u32::try_from(exp).map_err(|_| overflow())?;
    base.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
}

pub(crate) fn negate(value: &Value) -> Result<Value, EvalError> {
    match number(value) {
        Some(Num::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        Some(Num::Float(f)) => Ok(Value::Float(-f)),
        None => Err(type_error(format!(
            "bad operand type for unary -: '{}'",
            type_name(value)
        ))),
    }
}

pub(crate) fn positive(value: &Value) -> Result<Value, EvalError> {
    match number(value) {
        Some(Num::Int(i)) => Ok(Value::Int(i)),
        Some(Num::Float(f)) => Ok(Value::Float(f)),
        None => Err(type_error(format!(
            "bad operand type for unary +: '{}'",
            type_name(value)
        ))),
    }
}

/// Builds a dict from `(key, value)` pairs.
pub(crate) fn dict_from_pairs(pairs: Vec<Value>) -> Result<Mapping, EvalError> {
    let mut out = Mapping::new();
    for pair in pairs {
        let items = iterate(&pair)?;
        match items.as_slice() {
            [k, v] => {
                out.insert(to_key(k)?, v.clone());
            }
            _ => {
                return Err(EvalError::Value(format!(
                    "dictionary update sequence element has length {}; 2 is required",
                    items.len()
                )))
            }
        }
    }
    Ok(out)
}

pub(crate) fn float_text(f: f64) -> String {
    format_float(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_and_modulo_follow_python() {
        assert_eq!(binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)), Ok(Value::Int(-4)));
        assert_eq!(binary(BinOp::Mod, &Value::Int(-7), &Value::Int(2)), Ok(Value::Int(1)));
        assert_eq!(binary(BinOp::Mod, &Value::Int(7), &Value::Int(-2)), Ok(Value::Int(-1)));
        assert_eq!(binary(BinOp::Div, &Value::Int(1), &Value::Int(2)), Ok(Value::Float(0.5)));
    }

    #[test]
    fn slices_follow_python() {
        let s = Value::from("abcdef");
        let v = |i: i64| Value::Int(i);
        assert_eq!(slice(&s, Some(&v(1)), Some(&v(-1)), None), Ok(Value::from("bcde")));
        assert_eq!(slice(&s, None, None, Some(&v(-2))), Ok(Value::from("fdb")));
        assert_eq!(slice(&s, Some(&v(10)), None, None), Ok(Value::from("")));
    }

    #[test]
    fn booleans_are_numbers_in_expressions() {
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)));
        assert_eq!(binary(BinOp::Add, &Value::Bool(true), &Value::Int(1)), Ok(Value::Int(2)));
    }

    #[test]
    fn repetition_is_bounded_by_total_size() {
        let big = Value::from("a".repeat(1000));
        let err = binary(BinOp::Mul, &Value::Seq(vec![big.clone()]), &Value::Int(1_000_000));
        assert!(matches!(err, Err(EvalError::Value(_))));
        assert!(binary(BinOp::Mul, &Value::from("ab"), &Value::Int(600_000)).is_err());

        let ok = binary(BinOp::Mul, &Value::Seq(vec![big, Value::Int(1)]), &Value::Int(3));
        let Ok(Value::Seq(items)) = ok else {
            panic!("expected a list");
        };
        assert_eq!(items.len(), 6);
        assert_eq!(items[5], Value::Int(1));
        assert_eq!(
            binary(BinOp::Mul, &Value::Int(2), &Value::from("ab")),
            Ok(Value::from("abab"))
        );
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).is_err());
        assert!(int_pow(10, 100).is_err());
    }
}
