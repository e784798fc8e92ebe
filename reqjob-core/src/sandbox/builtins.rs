//! The allow-listed functions callable from expressions.

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::error::EvalError;
use crate::value::{repr_str, Value};

use super::interp::{Interpreter, Operand};
use super::ops::{self, number, py_cmp, py_str, type_name, Num, MAX_SEQUENCE};
use super::parser::BinOp;

macro_rules! builtins {
    ($($variant:ident => $name:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Builtin {
            $($variant),*
        }

        impl Builtin {
            pub const ALL: &'static [Builtin] = &[$(Builtin::$variant),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Builtin::$variant => $name),*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Builtin::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

builtins! {
    Abs => "abs",
    All => "all",
    Any => "any",
    Ascii => "ascii",
    Bin => "bin",
    Bool => "bool",
    Callable => "callable",
    Chr => "chr",
    Dict => "dict",
    Divmod => "divmod",
    Enumerate => "enumerate",
    Filter => "filter",
    Float => "float",
    Format => "format",
    Frozenset => "frozenset",
    Hex => "hex",
    Int => "int",
    Len => "len",
    List => "list",
    Map => "map",
    Max => "max",
    Min => "min",
    Oct => "oct",
    Ord => "ord",
    Pow => "pow",
    Range => "range",
    Repr => "repr",
    Reversed => "reversed",
    Round => "round",
    Set => "set",
    Sorted => "sorted",
    Str => "str",
    Sum => "sum",
    Tuple => "tuple",
    Type => "type",
    Zip => "zip",
    Lower => "lower",
    Upper => "upper",
    Strip => "strip",
    Split => "split",
    Join => "join",
    Startswith => "startswith",
    Endswith => "endswith",
    Replace => "replace",
    ToJson => "to_json",
    FromJson => "from_json",
}

impl Builtin {
    /// Builtins that are also callable as `"text".name(...)`.
    pub(crate) fn string_method(name: &str) -> Option<Self> {
        match Self::from_name(name)? {
            b @ (Builtin::Lower
            | Builtin::Upper
            | Builtin::Strip
            | Builtin::Split
            | Builtin::Join
            | Builtin::Startswith
            | Builtin::Endswith
            | Builtin::Replace) => Some(b),
            _ => None,
        }
    }
}

/// Call arguments, consumed front to back.
pub(crate) struct Args {
    name: &'static str,
    positional: VecDeque<Operand>,
    keywords: Vec<(String, Operand)>,
}

impl Args {
    pub fn new(name: &'static str, positional: Vec<Operand>, keywords: Vec<(String, Operand)>) -> Self {
        Self {
            name,
            positional: positional.into(),
            keywords,
        }
    }

    pub fn arity(&self, min: usize, max: usize) -> Result<(), EvalError> {
        let given = self.positional.len();
        if given >= min && given <= max {
            return Ok(());
        }
        let expected = if min == max {
            format!("exactly {min}")
        } else if max == usize::MAX {
            format!("at least {min}")
        } else {
            format!("from {min} to {max}")
        };
        Err(EvalError::Type(format!(
            "{}() takes {expected} positional arguments ({given} given)",
            self.name
        )))
    }

    pub fn remaining(&self) -> usize {
        self.positional.len()
    }

    pub fn operand(&mut self) -> Option<Operand> {
        self.positional.pop_front()
    }

    pub fn value(&mut self) -> Result<Option<Value>, EvalError> {
        self.operand().map(Operand::into_value).transpose()
    }

    pub fn required(&mut self) -> Result<Value, EvalError> {
        self.value()?.ok_or_else(|| {
            EvalError::Type(format!("{}() missing a required argument", self.name))
        })
    }

    /// Positional argument or the same-named keyword.
    pub fn value_or_keyword(&mut self, key: &str) -> Result<Option<Value>, EvalError> {
        match self.value()? {
            Some(v) => Ok(Some(v)),
            None => self.keyword_value(key),
        }
    }

    pub fn keyword(&mut self, key: &str) -> Option<Operand> {
        let index = self.keywords.iter().position(|(k, _)| k == key)?;
        Some(self.keywords.remove(index).1)
    }

    pub fn keyword_value(&mut self, key: &str) -> Result<Option<Value>, EvalError> {
        self.keyword(key).map(Operand::into_value).transpose()
    }

    pub fn rest(&mut self) -> Result<Vec<Value>, EvalError> {
        self.positional.drain(..).map(Operand::into_value).collect()
    }

    pub fn take_keywords(&mut self) -> Vec<(String, Operand)> {
        std::mem::take(&mut self.keywords)
    }

    pub fn finish(self) -> Result<(), EvalError> {
        match self.keywords.first() {
            Some((key, _)) => Err(EvalError::Type(format!(
                "{}() got an unexpected keyword argument '{key}'",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

fn type_error(message: impl Into<String>) -> EvalError {
    EvalError::Type(message.into())
}

fn value_error(message: impl Into<String>) -> EvalError {
    EvalError::Value(message.into())
}

fn int_arg(name: &str, value: &Value) -> Result<i64, EvalError> {
    match number(value) {
        Some(Num::Int(i)) => Ok(i),
        _ => Err(type_error(format!(
            "{name}() expected an integer, got '{}'",
            type_name(value)
        ))),
    }
}

fn str_arg(name: &str, value: Value) -> Result<String, EvalError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(type_error(format!(
            "{name}() expected a string, got '{}'",
            type_name(&other)
        ))),
    }
}

pub(crate) fn call(
    interp: &Interpreter<'_>,
    builtin: Builtin,
    positional: Vec<Operand>,
    keywords: Vec<(String, Operand)>,
) -> Result<Value, EvalError> {
    let mut args = Args::new(builtin.name(), positional, keywords);
    let name = builtin.name();

    let result = match builtin {
        Builtin::Abs => {
            args.arity(1, 1)?;
            let x = args.required()?;
            match number(&x) {
                Some(Num::Int(i)) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| value_error("integer overflow"))?,
                Some(Num::Float(f)) => Value::Float(f.abs()),
                None => {
                    return Err(type_error(format!(
                        "bad operand type for abs(): '{}'",
                        type_name(&x)
                    )))
                }
            }
        }
        Builtin::All | Builtin::Any => {
            args.arity(1, 1)?;
            let items = ops::iterate(&args.required()?)?;
            Value::Bool(if builtin == Builtin::All {
                items.iter().all(Value::truthy)
            } else {
                items.iter().any(Value::truthy)
            })
        }
        Builtin::Ascii => {
            args.arity(1, 1)?;
            Value::Str(ascii(&args.required()?.repr()))
        }
        Builtin::Bin | Builtin::Hex | Builtin::Oct => {
            args.arity(1, 1)?;
            let i = int_arg(name, &args.required()?)?;
            let sign = if i < 0 { "-" } else { "" };
            let abs = i.unsigned_abs();
            Value::Str(match builtin {
                Builtin::Bin => format!("{sign}0b{abs:b}"),
                Builtin::Hex => format!("{sign}0x{abs:x}"),
                _ => format!("{sign}0o{abs:o}"),
            })
        }
        Builtin::Bool => {
            args.arity(0, 1)?;
            Value::Bool(args.value()?.is_some_and(|v| v.truthy()))
        }
        Builtin::Callable => {
            args.arity(1, 1)?;
            let operand = args.operand();
            Value::Bool(matches!(
                operand,
                Some(Operand::Builtin(_) | Operand::Method(..))
            ))
        }
        Builtin::Chr => {
            args.arity(1, 1)?;
            let i = int_arg(name, &args.required()?)?;
            let c = u32::try_from(i)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| value_error("chr() arg not in range(0x110000)"))?;
            Value::Str(c.to_string())
        }
        Builtin::Dict => {
            args.arity(0, 1)?;
            let mut out = match args.value()? {
                None => Default::default(),
                Some(Value::Map(m)) => m,
                Some(other) => ops::dict_from_pairs(ops::iterate(&other)?)?,
            };
            for (key, operand) in args.take_keywords() {
                out.insert(key, operand.into_value()?);
            }
            Value::Map(out)
        }
        Builtin::Divmod => {
            args.arity(2, 2)?;
            let (a, b) = (args.required()?, args.required()?);
            Value::Seq(vec![
                ops::binary(BinOp::FloorDiv, &a, &b)?,
                ops::binary(BinOp::Mod, &a, &b)?,
            ])
        }
        Builtin::Enumerate => {
            args.arity(1, 2)?;
            let items = ops::iterate(&args.required()?)?;
            let start = match args.value_or_keyword("start")? {
                Some(v) => int_arg(name, &v)?,
                None => 0,
            };
            let mut out = Vec::with_capacity(items.len());
            for (offset, item) in items.into_iter().enumerate() {
                let index = i64::try_from(offset)
                    .ok()
                    .and_then(|o| start.checked_add(o))
                    .ok_or_else(|| value_error("integer overflow"))?;
                out.push(Value::Seq(vec![Value::Int(index), item]));
            }
            Value::Seq(out)
        }
        Builtin::Filter => {
            args.arity(2, 2)?;
            let predicate = args.operand();
            let items = ops::iterate(&args.required()?)?;
            let mut out = Vec::new();
            for item in items {
                let keep = match &predicate {
                    Some(Operand::Value(Value::Null)) | None => item.truthy(),
                    Some(f) => interp.call(f, vec![Operand::Value(item.clone())], Vec::new())?.truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            Value::Seq(out)
        }
        Builtin::Float => {
            args.arity(0, 1)?;
            match args.value()? {
                None => Value::Float(0.0),
                Some(v) => Value::Float(to_float(&v)?),
            }
        }
        Builtin::Format => {
            args.arity(1, 2)?;
            let value = args.required()?;
            let spec = match args.value()? {
                Some(v) => str_arg(name, v)?,
                None => String::new(),
            };
            Value::Str(format_value(&value, &spec)?)
        }
        Builtin::Frozenset | Builtin::Set => {
            args.arity(0, 1)?;
            match args.value()? {
                None => Value::Set(Vec::new()),
                Some(v) => Value::set_from(ops::iterate(&v)?),
            }
        }
        Builtin::Int => {
            args.arity(0, 2)?;
            let value = args.value()?;
            let base = args.value_or_keyword("base")?;
            match (value, base) {
                (None, _) => Value::Int(0),
                (Some(Value::Str(s)), base) => {
                    let base = match base {
                        Some(b) => int_arg(name, &b)?,
                        None => 10,
                    };
                    Value::Int(parse_int(&s, base)?)
                }
                (Some(_), Some(_)) => {
                    return Err(type_error("int() can't convert non-string with explicit base"))
                }
                (Some(v), None) => match number(&v) {
                    Some(Num::Int(i)) => Value::Int(i),
                    Some(Num::Float(f)) => Value::Int(float_to_int(f.trunc())?),
                    None => {
                        return Err(type_error(format!(
                            "int() argument must be a string or a number, not '{}'",
                            type_name(&v)
                        )))
                    }
                },
            }
        }
        Builtin::Len => {
            args.arity(1, 1)?;
            let v = args.required()?;
            let len = match &v {
                Value::Str(s) => s.chars().count(),
                Value::Bytes(b) => b.len(),
                Value::Seq(items) | Value::Set(items) => items.len(),
                Value::Map(m) => m.len(),
                other => {
                    return Err(type_error(format!(
                        "object of type '{}' has no len()",
                        type_name(other)
                    )))
                }
            };
            Value::Int(i64::try_from(len).unwrap_or(i64::MAX))
        }
        Builtin::List | Builtin::Tuple => {
            args.arity(0, 1)?;
            match args.value()? {
                None => Value::Seq(Vec::new()),
                Some(v) => Value::Seq(ops::iterate(&v)?),
            }
        }
        Builtin::Map => {
            args.arity(2, usize::MAX)?;
            let f = args
                .operand()
                .ok_or_else(|| type_error("map() must have at least two arguments"))?;
            let columns = args
                .rest()?
                .iter()
                .map(ops::iterate)
                .collect::<Result<Vec<_>, _>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(rows);
            for row in 0..rows {
                let call_args = columns
                    .iter()
                    .map(|column| Operand::Value(column[row].clone()))
                    .collect();
                out.push(interp.call(&f, call_args, Vec::new())?);
            }
            Value::Seq(out)
        }
        Builtin::Max | Builtin::Min => {
            args.arity(1, usize::MAX)?;
            let key = args.keyword("key");
            let default = args.keyword_value("default")?;
            let items = if args.remaining() == 1 {
                ops::iterate(&args.required()?)?
            } else {
                args.rest()?
            };
            let want = if builtin == Builtin::Max {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            let mut best: Option<(Value, Value)> = None;
            for item in items {
                let k = match &key {
                    Some(Operand::Value(Value::Null)) | None => item.clone(),
                    Some(f) => interp.call(f, vec![Operand::Value(item.clone())], Vec::new())?,
                };
                let replace = match &best {
                    None => true,
                    Some((best_key, _)) => py_cmp(&k, best_key)? == want,
                };
                if replace {
                    best = Some((k, item));
                }
            }
            match (best, default) {
                (Some((_, item)), _) => item,
                (None, Some(default)) => default,
                (None, None) => return Err(value_error(format!("{name}() arg is an empty sequence"))),
            }
        }
        Builtin::Ord => {
            args.arity(1, 1)?;
            let s = str_arg(name, args.required()?)?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Value::Int(i64::from(u32::from(c))),
                _ => {
                    return Err(type_error(format!(
                        "ord() expected a character, but string of length {} found",
                        s.chars().count()
                    )))
                }
            }
        }
        Builtin::Pow => {
            args.arity(2, 3)?;
            let (base, exp) = (args.required()?, args.required()?);
            match args.value_or_keyword("mod")? {
                None | Some(Value::Null) => ops::binary(BinOp::Pow, &base, &exp)?,
                Some(modulus) => Value::Int(mod_pow(
                    int_arg(name, &base)?,
                    int_arg(name, &exp)?,
                    int_arg(name, &modulus)?,
                )?),
            }
        }
        Builtin::Range => {
            args.arity(1, 3)?;
            let bounds = args
                .rest()?
                .iter()
                .map(|v| int_arg(name, v))
                .collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => unreachable!("arity checked"),
            };
            Value::Seq(range(start, stop, step)?)
        }
        Builtin::Repr => {
            args.arity(1, 1)?;
            Value::Str(args.required()?.repr())
        }
        Builtin::Reversed => {
            args.arity(1, 1)?;
            let mut items = ops::iterate(&args.required()?)?;
            items.reverse();
            Value::Seq(items)
        }
        Builtin::Round => {
            args.arity(1, 2)?;
            let x = args.required()?;
            let digits = match args.value_or_keyword("ndigits")? {
                None | Some(Value::Null) => None,
                Some(d) => Some(int_arg(name, &d)?),
            };
            round(&x, digits)?
        }
        Builtin::Sorted => {
            args.arity(1, 1)?;
            let items = ops::iterate(&args.required()?)?;
            let key = args.keyword("key");
            let reverse = args.keyword_value("reverse")?.is_some_and(|v| v.truthy());
            let mut keyed = Vec::with_capacity(items.len());
            for item in items {
                let k = match &key {
                    Some(Operand::Value(Value::Null)) | None => item.clone(),
                    Some(f) => interp.call(f, vec![Operand::Value(item.clone())], Vec::new())?,
                };
                keyed.push((k, item));
            }
            let mut failure = None;
            keyed.sort_by(|(a, _), (b, _)| match py_cmp(a, b) {
                Ok(ordering) if reverse => ordering.reverse(),
                Ok(ordering) => ordering,
                Err(e) => {
                    failure.get_or_insert(e);
                    Ordering::Equal
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
            Value::Seq(keyed.into_iter().map(|(_, item)| item).collect())
        }
        Builtin::Str => {
            args.arity(0, 1)?;
            Value::Str(args.value()?.map(|v| py_str(&v)).unwrap_or_default())
        }
        Builtin::Sum => {
            args.arity(1, 2)?;
            let items = ops::iterate(&args.required()?)?;
            let mut total = args.value_or_keyword("start")?.unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(type_error("sum() can't sum strings [use ''.join(seq) instead]"));
            }
            for item in &items {
                total = ops::binary(BinOp::Add, &total, item)?;
            }
            total
        }
        Builtin::Type => {
            args.arity(1, 1)?;
            Value::Str(match args.operand() {
                Some(Operand::Value(v)) => type_name(&v).to_string(),
                Some(Operand::Builtin(_)) => "builtin_function_or_method".to_string(),
                Some(Operand::Method(..)) => "method".to_string(),
                Some(Operand::Env) => "env".to_string(),
                None => unreachable!("arity checked"),
            })
        }
        Builtin::Zip => {
            let columns = args
                .rest()?
                .iter()
                .map(ops::iterate)
                .collect::<Result<Vec<_>, _>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Value::Seq(
                (0..rows)
                    .map(|row| Value::Seq(columns.iter().map(|c| c[row].clone()).collect()))
                    .collect(),
            )
        }
        Builtin::Lower | Builtin::Upper => {
            args.arity(1, 1)?;
            let s = str_arg(name, args.required()?)?;
            Value::Str(if builtin == Builtin::Lower {
                s.to_lowercase()
            } else {
                s.to_uppercase()
            })
        }
        Builtin::Strip => {
            args.arity(1, 2)?;
            let s = str_arg(name, args.required()?)?;
            Value::Str(match args.value_or_keyword("chars")? {
                None | Some(Value::Null) => s.trim().to_string(),
                Some(chars) => {
                    let chars: Vec<char> = str_arg(name, chars)?.chars().collect();
                    s.trim_matches(|c| chars.contains(&c)).to_string()
                }
            })
        }
        Builtin::Split => {
            args.arity(1, 3)?;
            let s = str_arg(name, args.required()?)?;
            let sep = match args.value_or_keyword("sep")? {
                None | Some(Value::Null) => None,
                Some(v) => Some(str_arg(name, v)?),
            };
            let max_split = match args.value_or_keyword("maxsplit")? {
                Some(v) => int_arg(name, &v)?,
                None => -1,
            };
            Value::Seq(split(&s, sep.as_deref(), max_split)?.into_iter().map(Value::Str).collect())
        }
        Builtin::Join => {
            args.arity(2, 2)?;
            let sep = str_arg(name, args.required()?)?;
            let items = ops::iterate(&args.required()?)?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                match item {
                    Value::Str(s) => parts.push(s),
                    other => {
                        return Err(type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            type_name(&other)
                        )))
                    }
                }
            }
            Value::Str(parts.join(&sep))
        }
        Builtin::Startswith | Builtin::Endswith => {
            args.arity(2, 2)?;
            let s = str_arg(name, args.required()?)?;
            let candidates = match args.required()? {
                Value::Str(p) => vec![p],
                Value::Seq(items) => items
                    .into_iter()
                    .map(|v| str_arg(name, v))
                    .collect::<Result<_, _>>()?,
                other => {
                    return Err(type_error(format!(
                        "{name} first arg must be str or a tuple of str, not {}",
                        type_name(&other)
                    )))
                }
            };
            Value::Bool(candidates.iter().any(|p| {
                if builtin == Builtin::Startswith {
                    s.starts_with(p.as_str())
                } else {
                    s.ends_with(p.as_str())
                }
            }))
        }
        Builtin::Replace => {
            args.arity(3, 4)?;
            let s = str_arg(name, args.required()?)?;
            let old = str_arg(name, args.required()?)?;
            let new = str_arg(name, args.required()?)?;
            let count = match args.value_or_keyword("count")? {
                Some(v) => int_arg(name, &v)?,
                None => -1,
            };
            Value::Str(match usize::try_from(count) {
                Ok(n) => s.replacen(&old, &new, n),
                Err(_) => s.replace(&old, &new),
            })
        }
        Builtin::ToJson => {
            args.arity(1, 1)?;
            let json = args
                .required()?
                .to_json()
                .map_err(|e| value_error(e.to_string()))?;
            let pretty = args.keyword_value("indent")?.is_some_and(|v| !v.is_null());
            let text = if pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            Value::Str(text.map_err(|e| value_error(e.to_string()))?)
        }
        Builtin::FromJson => {
            args.arity(1, 1)?;
            let text = str_arg(name, args.required()?)?;
            let json: serde_json::Value =
                serde_json::from_str(&text).map_err(|e| value_error(e.to_string()))?;
            Value::from(json)
        }
    };

    args.finish()?;
    Ok(result)
}

fn ascii(repr: &str) -> String {
    let mut out = String::with_capacity(repr.len());
    for c in repr.chars() {
        let code = u32::from(c);
        if c.is_ascii() {
            out.push(c);
        } else if code <= 0xff {
            out.push_str(&format!("\\x{code:02x}"));
        } else if code <= 0xffff {
            out.push_str(&format!("\\u{code:04x}"));
        } else {
            out.push_str(&format!("\\U{code:08x}"));
        }
    }
    out
}

fn to_float(value: &Value) -> Result<f64, EvalError> {
    if let Some(n) = number(value) {
        return Ok(match n {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        });
    }
    match value {
        Value::Str(s) => {
            let text = s.trim();
            let lowered = text.to_ascii_lowercase();
            let unsigned = lowered.trim_start_matches(['+', '-']);
            let negative = lowered.starts_with('-');
            match unsigned {
                "inf" | "infinity" => Ok(if negative { f64::NEG_INFINITY } else { f64::INFINITY }),
                "nan" => Ok(f64::NAN),
                _ => text
                    .replace('_', "")
                    .parse::<f64>()
                    .ok()
                    .filter(|_| text.chars().any(|c| c.is_ascii_digit()))
                    .ok_or_else(|| value_error(format!("could not convert string to float: {}", repr_str(s)))),
            }
        }
        other => Err(type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            type_name(other)
        ))),
    }
}

fn float_to_int(f: f64) -> Result<i64, EvalError> {
    if !f.is_finite() {
        return Err(value_error("cannot convert float infinity or nan to integer"));
    }
    if f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(value_error("integer overflow"));
    }
    Ok(f as i64)
}

fn parse_int(text: &str, base: i64) -> Result<i64, EvalError> {
    let invalid = || {
        value_error(format!(
            "invalid literal for int() with base {base}: {}",
            repr_str(text)
        ))
    };
    if base != 0 && !(2..=36).contains(&base) {
        return Err(value_error("int() base must be >= 2 and <= 36, or 0"));
    }
    let trimmed = text.trim().replace('_', "");
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, trimmed.trim_start_matches('+').to_string()),
    };
    let lowered = digits.to_ascii_lowercase();
    let (radix, digits) = match (base, lowered.get(..2)) {
        (0 | 16, Some("0x")) => (16, &digits[2..]),
        (0 | 8, Some("0o")) => (8, &digits[2..]),
        (0 | 2, Some("0b")) => (2, &digits[2..]),
        (0, _) => (10, digits.as_str()),
        (b, _) => (u32::try_from(b).map_err(|_| invalid())?, digits.as_str()),
    };
    if digits.is_empty() {
        return Err(invalid());
    }
    let magnitude = i64::from_str_radix(digits, radix).map_err(|_| invalid())?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn mod_pow(base: i64, exp: i64, modulus: i64) -> Result<i64, EvalError> {
    if modulus == 0 {
        return Err(value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(value_error("pow() 2nd argument cannot be negative when 3rd argument specified"));
    }
    let m = i128::from(modulus);
    let mut result: i128 = 1;
    let mut b = i128::from(base).rem_euclid(m);
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = (result * b).rem_euclid(m);
        }
        b = (b * b).rem_euclid(m);
        e >>= 1;
    }
    // Python gives the result the sign of the modulus.
    let result = if modulus < 0 && result != 0 { result + m } else { result };
    i64::try_from(result).map_err(|_| value_error("integer overflow"))
}

fn range(start: i64, stop: i64, step: i64) -> Result<Vec<Value>, EvalError> {
    if step == 0 {
        return Err(value_error("range() arg 3 must not be zero"));
    }
    let span = if step > 0 {
        i128::from(stop) - i128::from(start)
    } else {
        i128::from(start) - i128::from(stop)
    };
    let step_abs = i128::from(step).abs();
    let count = if span <= 0 { 0 } else { (span + step_abs - 1) / step_abs };
    if count > MAX_SEQUENCE as i128 {
        return Err(value_error("range() is too large"));
    }
    let mut out = Vec::new();
    let mut current = i128::from(start);
    for _ in 0..count {
        out.push(Value::Int(current as i64));
        current += i128::from(step);
    }
    Ok(out)
}

fn round(x: &Value, digits: Option<i64>) -> Result<Value, EvalError> {
    match (number(x), digits) {
        (Some(Num::Int(i)), None) => Ok(Value::Int(i)),
        (Some(Num::Int(i)), Some(d)) if d >= 0 => Ok(Value::Int(i)),
        (Some(Num::Int(i)), Some(d)) => {
            let factor = u32::try_from(-d)
                .ok()
                .and_then(|p| 10_i64.checked_pow(p));
            match factor {
                None => Ok(Value::Int(0)),
                Some(factor) => {
                    let rounded = (i as f64 / factor as f64).round_ties_even() as i64;
                    rounded
                        .checked_mul(factor)
                        .map(Value::Int)
                        .ok_or_else(|| value_error("integer overflow"))
                }
            }
        }
        (Some(Num::Float(f)), None) => Ok(Value::Int(float_to_int(f.round_ties_even())?)),
        (Some(Num::Float(f)), Some(d)) => {
            if !f.is_finite() || d > 308 {
                return Ok(Value::Float(f));
            }
            if d < -308 {
                return Ok(Value::Float(0.0_f64.copysign(f)));
            }
            let scale = 10f64.powi(i32::try_from(d).unwrap_or(0));
            let scaled = f * scale;
            if !scaled.is_finite() {
                return Ok(Value::Float(f));
            }
            let rounded = scaled.round_ties_even() / scale;
            Ok(Value::Float(if rounded.is_finite() { rounded } else { f }))
        }
        (None, _) => Err(type_error(format!(
            "type {} doesn't define __round__ method",
            type_name(x)
        ))),
    }
}

fn split(s: &str, sep: Option<&str>, max_split: i64) -> Result<Vec<String>, EvalError> {
    let limit = usize::try_from(max_split).ok();
    match sep {
        Some("") => Err(value_error("empty separator")),
        Some(sep) => Ok(match limit {
            Some(n) => s.splitn(n + 1, sep).map(str::to_string).collect(),
            None => s.split(sep).map(str::to_string).collect(),
        }),
        None => {
            let Some(limit) = limit else {
                return Ok(s.split_whitespace().map(str::to_string).collect());
            };
            let mut out = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if out.len() == limit {
                    out.push(rest.to_string());
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                out.push(rest[..end].to_string());
                rest = rest[end..].trim_start();
            }
            Ok(out)
        }
    }
}

struct FormatSpec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Result<FormatSpec, EvalError> {
    let invalid = || value_error(format!("Invalid format specifier '{spec}'"));
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut out = FormatSpec {
        fill: ' ',
        align: None,
        sign: '-',
        alternate: false,
        width: 0,
        grouping: None,
        precision: None,
        kind: None,
    };
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = chars[0];
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            out.sign = c;
            i += 1;
        }
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        if out.align.is_none() {
            out.fill = '0';
            out.align = Some('=');
        }
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| invalid())?;
        if out.width > MAX_SEQUENCE {
            return Err(value_error("format width is too large"));
        }
    }
    if let Some(&c) = chars.get(i) {
        if c == ',' || c == '_' {
            out.grouping = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(invalid());
        }
        let precision: usize = chars[start..i]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| invalid())?;
        if precision > MAX_SEQUENCE {
            return Err(value_error("format precision is too large"));
        }
        out.precision = Some(precision);
    }
    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid());
    }
    Ok(out)
}

fn group_digits(digits: &str, separator: char) -> String {
    let (int_part, frac_part) = match digits.find('.') {
        Some(dot) => digits.split_at(dot),
        None => (digits, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(c);
    }
    grouped.push_str(frac_part);
    grouped
}

fn python_exponent(formatted: String, upper: bool) -> String {
    let Some((mantissa, exp)) = formatted.split_once('e') else {
        return formatted;
    };
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{digits:0>2}")
}

fn general(f: f64, precision: usize, upper: bool) -> String {
    if f == 0.0 || !f.is_finite() {
        return ops::float_text(f).trim_end_matches(".0").to_string();
    }
    let p = precision.max(1);
    let exp = f.abs().log10().floor() as i64;
    let p_i = i64::try_from(p).unwrap_or(i64::MAX);
    let trim = |s: String| {
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    };
    if exp >= -4 && exp < p_i {
        let decimals = usize::try_from(p_i - 1 - exp).unwrap_or(0);
        trim(format!("{f:.decimals$}"))
    } else {
        let formatted = format!("{:.*e}", p - 1, f);
        let (mantissa, rest) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        python_exponent(format!("{}e{rest}", trim(mantissa.to_string())), upper)
    }
}

fn format_value(value: &Value, spec: &str) -> Result<String, EvalError> {
    if spec.is_empty() {
        return Ok(py_str(value));
    }
    let spec = parse_spec(spec)?;
    let unknown = |code: char| {
        value_error(format!(
            "Unknown format code '{code}' for object of type '{}'",
            type_name(value)
        ))
    };

    let numeric = number(value).filter(|_| !matches!(value, Value::Bool(_)) || spec.kind.is_some());
    let body = match (spec.kind, numeric) {
        (None | Some('s'), None) => {
            let text = py_str(value);
            match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        (Some(code), None) => return Err(unknown(code)),
        (None | Some('d'), Some(Num::Int(i))) => i.unsigned_abs().to_string(),
        (Some(code @ ('b' | 'o' | 'x' | 'X')), Some(Num::Int(i))) => {
            let abs = i.unsigned_abs();
            let (digits, prefix) = match code {
                'b' => (format!("{abs:b}"), "0b"),
                'o' => (format!("{abs:o}"), "0o"),
                'x' => (format!("{abs:x}"), "0x"),
                _ => (format!("{abs:X}"), "0X"),
            };
            if spec.alternate {
                format!("{prefix}{digits}")
            } else {
                digits
            }
        }
        (Some('c'), Some(Num::Int(i))) => u32::try_from(i)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .ok_or_else(|| value_error("%c arg not in range(0x110000)"))?,
        (Some(code @ ('d' | 'b' | 'o' | 'x' | 'X' | 'c')), Some(Num::Float(_))) => {
            return Err(unknown(code))
        }
        (kind, Some(n)) => {
            let f = match n {
                Num::Int(i) => i as f64,
                Num::Float(f) => f,
            };
            let abs = f.abs();
            match kind {
                Some('f' | 'F') => format!("{abs:.*}", spec.precision.unwrap_or(6)),
                Some(code @ ('e' | 'E')) => python_exponent(
                    format!("{abs:.*e}", spec.precision.unwrap_or(6)),
                    code == 'E',
                ),
                Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), abs * 100.0),
                Some(code @ ('g' | 'G')) => general(abs, spec.precision.unwrap_or(6), code == 'G'),
                None => match spec.precision {
                    Some(p) => general(abs, p, false),
                    None => ops::float_text(abs),
                },
                Some(code) => return Err(unknown(code)),
            }
        }
    };

    let body = match spec.grouping {
        Some(sep) if numeric.is_some() => group_digits(&body, sep),
        _ => body,
    };
    let negative = match numeric {
        Some(Num::Int(i)) => i < 0,
        Some(Num::Float(f)) => f.is_sign_negative() && f != 0.0,
        None => false,
    };
    let sign = match (numeric, negative, spec.sign) {
        (None, _, _) => "",
        (_, true, _) => "-",
        (_, false, '+') => "+",
        (_, false, ' ') => " ",
        _ => "",
    };

    let len = sign.chars().count() + body.chars().count();
    let pad = spec.width.saturating_sub(len);
    let fill = |n: usize| std::iter::repeat(spec.fill).take(n).collect::<String>();
    let default_align = if numeric.is_some() { '>' } else { '<' };
    Ok(match spec.align.unwrap_or(default_align) {
        '<' => format!("{sign}{body}{}", fill(pad)),
        '^' => format!("{}{sign}{body}{}", fill(pad / 2), fill(pad - pad / 2)),
        '=' => format!("{sign}{}{body}", fill(pad)),
        _ => format!("{}{sign}{body}", fill(pad)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_round_trips_its_name() {
        for builtin in Builtin::ALL {
            assert_eq!(Builtin::from_name(builtin.name()), Some(*builtin));
        }
        assert_eq!(Builtin::from_name("open"), None);
        assert_eq!(Builtin::from_name("__import__"), None);
    }

    #[test]
    fn format_specs() {
        assert_eq!(format_value(&Value::Int(42), "05d").expect("fmt"), "00042");
        assert_eq!(format_value(&Value::Int(-42), "05d").expect("fmt"), "-0042");
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").expect("fmt"), "3.14");
        assert_eq!(format_value(&Value::Int(1234567), ",").expect("fmt"), "1,234,567");
        assert_eq!(format_value(&Value::Int(255), "#x").expect("fmt"), "0xff");
        assert_eq!(format_value(&Value::from("ab"), ">4").expect("fmt"), "  ab");
        assert_eq!(format_value(&Value::from("ab"), "*^6").expect("fmt"), "**ab**");
        assert_eq!(format_value(&Value::Float(1500.0), ".2e").expect("fmt"), "1.50e+03");
        assert_eq!(format_value(&Value::Float(0.25), ".1%").expect("fmt"), "25.0%");
        assert!(format_value(&Value::from("x"), "d").is_err());
    }

    #[test]
    fn int_parsing_with_bases() {
        assert_eq!(parse_int(" 42 ", 10), Ok(42));
        assert_eq!(parse_int("-ff", 16), Ok(-255));
        assert_eq!(parse_int("0x1f", 0), Ok(31));
        assert_eq!(parse_int("0b101", 2), Ok(5));
        assert!(parse_int("12a", 10).is_err());
    }

    #[test]
    fn python_rounding_is_bankers() {
        assert_eq!(round(&Value::Float(2.5), None), Ok(Value::Int(2)));
        assert_eq!(round(&Value::Float(3.5), None), Ok(Value::Int(4)));
        assert_eq!(round(&Value::Float(1.25), Some(1)), Ok(Value::Float(1.2)));
        assert_eq!(round(&Value::Int(1250), Some(-2)), Ok(Value::Int(1200)));
    }

    #[test]
    fn rounding_far_past_the_exponent_range() {
        assert_eq!(round(&Value::Float(1e308), Some(-400)), Ok(Value::Float(0.0)));
        let Ok(Value::Float(negative)) = round(&Value::Float(-5.0), Some(-309)) else {
            panic!("expected a float");
        };
        assert!(negative == 0.0 && negative.is_sign_negative());
        assert_eq!(round(&Value::Float(1e308), Some(10)), Ok(Value::Float(1e308)));
        assert_eq!(round(&Value::Float(0.5), Some(400)), Ok(Value::Float(0.5)));
    }

    #[test]
    fn oversized_format_widths_are_rejected() {
        let err = format_value(&Value::Int(1), ">99999999999").expect_err("width");
        assert!(matches!(err, EvalError::Value(_)));
        assert!(format_value(&Value::Float(1.0), ".99999999").is_err());
        assert_eq!(format_value(&Value::Int(7), "03").expect("fmt"), "007");
    }

    #[test]
    fn whitespace_split_honours_maxsplit() {
        assert_eq!(split("  a b  c ", None, 1).expect("split"), vec!["a", "b  c "]);
        assert_eq!(split("a,b,c", Some(","), -1).expect("split"), vec!["a", "b", "c"]);
        assert!(split("abc", Some(""), -1).is_err());
    }

    #[test]
    fn mod_pow_matches_python() {
        assert_eq!(mod_pow(3, 4, 5), Ok(1));
        assert_eq!(mod_pow(-3, 3, 5), Ok(3));
        assert_eq!(mod_pow(3, 3, -5), Ok(-3));
    }
}
