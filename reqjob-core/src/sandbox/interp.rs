use crate::error::EvalError;
use crate::value::{Mapping, Value};

use super::builtins::{self, Args, Builtin};
use super::context::Context;
use super::ops;
use super::parser::{CmpOp, Expr, UnaryOp};

/// Result of evaluating a sub-expression: a plain value or something callable.
#[derive(Debug, Clone)]
pub(crate) enum Operand {
    Value(Value),
    Builtin(Builtin),
    Method(Box<Value>, Method),
    Env,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Str(Builtin),
    DictGet,
    DictKeys,
    DictValues,
    DictItems,
    EnvGet,
}

impl Method {
    fn name(self) -> &'static str {
        match self {
            Method::Str(b) => b.name(),
            Method::DictGet | Method::EnvGet => "get",
            Method::DictKeys => "keys",
            Method::DictValues => "values",
            Method::DictItems => "items",
        }
    }
}

impl Operand {
    pub fn into_value(self) -> Result<Value, EvalError> {
        match self {
            Operand::Value(v) => Ok(v),
            Operand::Builtin(b) => Err(EvalError::NotAValue(format!(
                "<built-in function {}>",
                b.name()
            ))),
            Operand::Method(_, m) => Err(EvalError::NotAValue(format!("<method {}>", m.name()))),
            Operand::Env => Err(EvalError::NotAValue("env".to_string())),
        }
    }
}

pub(crate) struct Interpreter<'a> {
    context: &'a Context,
}

impl<'a> Interpreter<'a> {
    pub fn new(context: &'a Context) -> Self {
        Self { context }
    }

    pub fn value(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.evaluate(expr)?.into_value()
    }

    fn values(&self, exprs: &[Expr]) -> Result<Vec<Value>, EvalError> {
        exprs.iter().map(|e| self.value(e)).collect()
    }

    pub fn evaluate(&self, expr: &Expr) -> Result<Operand, EvalError> {
        let value = match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Name(name) => return self.lookup(name),
            Expr::List(items) | Expr::Tuple(items) => Value::Seq(self.values(items)?),
            Expr::Set(items) => Value::set_from(self.values(items)?),
            Expr::Dict(entries) => {
                let mut map = Mapping::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = ops::to_key(&self.value(k)?)?;
                    map.insert(key, self.value(v)?);
                }
                Value::Map(map)
            }
            Expr::Unary(op, operand) => {
                let v = self.value(operand)?;
                match op {
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::Neg => ops::negate(&v)?,
                    UnaryOp::Pos => ops::positive(&v)?,
                }
            }
            Expr::Binary(op, l, r) => ops::binary(*op, &self.value(l)?, &self.value(r)?)?,
            Expr::Compare(first, rest) => {
                let mut left = self.value(first)?;
                for (op, right) in rest {
                    let right = self.value(right)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Operand::Value(Value::Bool(false)));
                    }
                    left = right;
                }
                Value::Bool(true)
            }
            Expr::And(l, r) => {
                let left = self.value(l)?;
                if !left.truthy() {
                    left
                } else {
                    self.value(r)?
                }
            }
            Expr::Or(l, r) => {
                let left = self.value(l)?;
                if left.truthy() {
                    left
                } else {
                    self.value(r)?
                }
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                return if self.value(cond)?.truthy() {
                    self.evaluate(then)
                } else {
                    self.evaluate(otherwise)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.evaluate(func)?;
                let args = args
                    .iter()
                    .map(|a| self.evaluate(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let kwargs = kwargs
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.evaluate(v)?)))
                    .collect::<Result<Vec<_>, EvalError>>()?;
                self.call(&callee, args, kwargs)?
            }
            Expr::Index(target, key) => {
                let key = self.value(key)?;
                match self.evaluate(target)? {
                    Operand::Env => self.env_value(&ops::to_key(&key)?),
                    other => ops::index(&other.into_value()?, &key)?,
                }
            }
            Expr::Slice {
                target,
                start,
                stop,
                step,
            } => {
                let target = self.value(target)?;
                let bound = |b: &Option<Box<Expr>>| b.as_deref().map(|e| self.value(e)).transpose();
                let (start, stop, step) = (bound(start)?, bound(stop)?, bound(step)?);
                ops::slice(&target, start.as_ref(), stop.as_ref(), step.as_ref())?
            }
            Expr::Attr(target, name) => return self.attribute(self.evaluate(target)?, name),
        };
        Ok(Operand::Value(value))
    }

    fn lookup(&self, name: &str) -> Result<Operand, EvalError> {
        if name == "env" {
            return Ok(Operand::Env);
        }
        let constant = match name {
            "True" | "true" => Some(Value::Bool(true)),
            "False" | "false" => Some(Value::Bool(false)),
            "None" | "null" => Some(Value::Null),
            "undefined" => Some(Value::Undefined),
            _ => None,
        };
        if let Some(value) = constant {
            return Ok(Operand::Value(value));
        }
        if let Some(value) = self.context.get(name) {
            return Ok(Operand::Value(value.clone()));
        }
        Builtin::from_name(name)
            .map(Operand::Builtin)
            .ok_or_else(|| EvalError::Name(name.to_string()))
    }

    fn env_value(&self, key: &str) -> Value {
        self.context.env(key).map_or(Value::Null, Value::Str)
    }

    fn attribute(&self, target: Operand, name: &str) -> Result<Operand, EvalError> {
        let no_attribute = |type_name: &str| {
            EvalError::Type(format!("'{type_name}' object has no attribute '{name}'"))
        };
        match target {
            Operand::Env if name == "get" => Ok(Operand::Method(Box::new(Value::Null), Method::EnvGet)),
            Operand::Env => Ok(Operand::Value(self.env_value(name))),
            Operand::Value(Value::Map(map)) => {
                if let Some(v) = map.get(name) {
                    return Ok(Operand::Value(v.clone()));
                }
                let method = match name {
                    "get" => Method::DictGet,
                    "keys" => Method::DictKeys,
                    "values" => Method::DictValues,
                    "items" => Method::DictItems,
                    _ => return Err(no_attribute("dict")),
                };
                Ok(Operand::Method(Box::new(Value::Map(map)), method))
            }
            Operand::Value(Value::Str(s)) => match Builtin::string_method(name) {
                Some(b) => Ok(Operand::Method(Box::new(Value::Str(s)), Method::Str(b))),
                None => Err(no_attribute("str")),
            },
            Operand::Value(other) => Err(no_attribute(ops::type_name(&other))),
            Operand::Builtin(_) => Err(no_attribute("builtin_function_or_method")),
            Operand::Method(..) => Err(no_attribute("method")),
        }
    }

    pub fn call(
        &self,
        callee: &Operand,
        mut args: Vec<Operand>,
        kwargs: Vec<(String, Operand)>,
    ) -> Result<Value, EvalError> {
        match callee {
            Operand::Builtin(b) => builtins::call(self, *b, args, kwargs),
            Operand::Method(receiver, Method::Str(b)) => {
                // `sep.join(items)` keeps the separator first.
                args.insert(0, Operand::Value((**receiver).clone()));
                builtins::call(self, *b, args, kwargs)
            }
            Operand::Method(receiver, method) => {
                let mut args = Args::new(method.name(), args, kwargs);
                let result = match (method, receiver.as_ref()) {
                    (Method::EnvGet, _) => {
                        args.arity(1, 2)?;
                        let key = ops::to_key(&args.required()?)?;
                        let default = args.value()?.unwrap_or(Value::Null);
                        self.context.env(&key).map_or(default, Value::Str)
                    }
                    (Method::DictGet, Value::Map(map)) => {
                        args.arity(1, 2)?;
                        let key = ops::to_key(&args.required()?)?;
                        let default = args.value()?.unwrap_or(Value::Null);
                        map.get(&key).cloned().unwrap_or(default)
                    }
                    (Method::DictKeys, Value::Map(map)) => {
                        args.arity(0, 0)?;
                        Value::Seq(map.keys().cloned().map(Value::Str).collect())
                    }
                    (Method::DictValues, Value::Map(map)) => {
                        args.arity(0, 0)?;
                        Value::Seq(map.values().cloned().collect())
                    }
                    (Method::DictItems, Value::Map(map)) => {
                        args.arity(0, 0)?;
                        Value::Seq(
                            map.iter()
                                .map(|(k, v)| Value::Seq(vec![Value::Str(k.clone()), v.clone()]))
                                .collect(),
                        )
                    }
                    (method, other) => {
                        return Err(EvalError::Type(format!(
                            "'{}' object has no attribute '{}'",
                            ops::type_name(other),
                            method.name()
                        )))
                    }
                };
                args.finish()?;
                Ok(result)
            }
            Operand::Env => Err(EvalError::Type("'env' object is not callable".to_string())),
            Operand::Value(v) => Err(EvalError::Type(format!(
                "'{}' object is not callable",
                ops::type_name(v)
            ))),
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    use std::cmp::Ordering;

    Ok(match op {
        CmpOp::Eq => ops::py_eq(left, right),
        CmpOp::Ne => !ops::py_eq(left, right),
        CmpOp::Lt => ops::py_cmp(left, right)? == Ordering::Less,
        CmpOp::Le => ops::py_cmp(left, right)? != Ordering::Greater,
        CmpOp::Gt => ops::py_cmp(left, right)? == Ordering::Greater,
        CmpOp::Ge => ops::py_cmp(left, right)? != Ordering::Less,
        CmpOp::In => ops::contains(right, left)?,
        CmpOp::NotIn => !ops::contains(right, left)?,
        CmpOp::Is => ops::is_same(left, right),
        CmpOp::IsNot => !ops::is_same(left, right),
    })
}
