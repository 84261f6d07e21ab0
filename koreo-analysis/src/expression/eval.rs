//! Dry evaluation of parsed expressions over JSON values.
//!
//! Covers the subset of CEL that Koreo functions lean on: arithmetic, comparison,
//! logic, conditionals, member and index access, list/map literals, the common
//! built-in functions and the list macros. There is no I/O.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use super::parser::{BinaryOp, Expr, ExprKind, Literal, UnaryOp};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("undeclared reference to '{0}'")]
    UnknownIdentifier(String),
    #[error("no such key: {0}")]
    NoSuchKey(String),
    #[error("index {index} out of range for list of {len} items")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("no matching overload for '{op}' applied to {lhs} and {rhs}")]
    NoOverload {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow in '{0}'")]
    Overflow(&'static str),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("'{function}' expects {expected} argument(s), got {actual}")]
    Arity {
        function: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid regular expression: {0}")]
    Regex(String),
    #[error("{0}")]
    Type(String),
}

pub type EvalResult = Result<Value, EvalError>;

/// Variable bindings visible to an expression.
///
/// Lookups search the most recently pushed binding first, which is how macro
/// loop variables shadow outer names.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bind(name, value);
        self
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    fn push(&mut self, name: &str, value: Value) {
        self.entries.push((name.to_string(), value));
    }

    fn pop(&mut self) {
        self.entries.pop();
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Equality with CEL's numeric leniency: `2 == 2.0`.
pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => lhs == rhs,
    }
}

pub fn evaluate(expr: &Expr, bindings: &Bindings) -> EvalResult {
    let mut scope = bindings.clone();
    eval(expr, &mut scope)
}

fn eval(expr: &Expr, scope: &mut Bindings) -> EvalResult {
    match &expr.kind {
        ExprKind::Literal(literal) => literal_value(literal),
        ExprKind::Ident(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownIdentifier(name.clone())),
        ExprKind::StepRef(path) => {
            let steps = scope
                .get("steps")
                .cloned()
                .ok_or_else(|| EvalError::UnknownIdentifier(format!("${{{}}}", path.join("."))))?;
            path.iter().try_fold(steps, |value, segment| member(&value, segment))
        }
        ExprKind::Member { target, field } => {
            let value = eval(target, scope)?;
            member(&value, field)
        }
        ExprKind::Index { target, index } => {
            let value = eval(target, scope)?;
            let index = eval(index, scope)?;
            index_value(&value, &index)
        }
        ExprKind::Unary { op, operand } => {
            let value = eval(operand, scope)?;
            match (op, &value) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Negate, Value::Number(n)) => match n.as_i64() {
                    Some(i) => i
                        .checked_neg()
                        .map(Value::from)
                        .ok_or(EvalError::Overflow("-")),
                    None => float_value(-n.as_f64().unwrap_or_default()),
                },
                (UnaryOp::Not, other) | (UnaryOp::Negate, other) => Err(EvalError::Type(format!(
                    "cannot apply unary {} to {}",
                    if *op == UnaryOp::Not { "'!'" } else { "'-'" },
                    type_name(other)
                ))),
            }
        }
        ExprKind::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, scope),
        ExprKind::Ternary {
            condition,
            then,
            otherwise,
        } => match eval(condition, scope)? {
            Value::Bool(true) => eval(then, scope),
            Value::Bool(false) => eval(otherwise, scope),
            other => Err(EvalError::Type(format!(
                "conditional expects bool, got {}",
                type_name(&other)
            ))),
        },
        ExprKind::List(items) => items
            .iter()
            .map(|item| eval(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ExprKind::Map(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let key = match eval(key, scope)? {
                    Value::String(key) => key,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(EvalError::Type(format!(
                            "map keys must be strings, got {}",
                            type_name(&other)
                        )))
                    }
                };
                map.insert(key, eval(value, scope)?);
            }
            Ok(Value::Object(map))
        }
        ExprKind::Call { function, args } => call_function(function, args, scope),
        ExprKind::MethodCall {
            target,
            method,
            args,
        } => call_method(target, method, args, scope),
    }
}

fn literal_value(literal: &Literal) -> EvalResult {
    Ok(match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::from(*i),
        Literal::Float(f) => return float_value(*f),
        Literal::String(s) => Value::String(s.clone()),
    })
}

fn float_value(f: f64) -> EvalResult {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| EvalError::Type(format!("{f} is not a finite number")))
}

fn member(value: &Value, field: &str) -> EvalResult {
    match value {
        Value::Object(map) => map
            .get(field)
            .cloned()
            .ok_or_else(|| EvalError::NoSuchKey(field.to_string())),
        other => Err(EvalError::Type(format!(
            "cannot select field '{field}' from {}",
            type_name(other)
        ))),
    }
}

fn index_value(value: &Value, index: &Value) -> EvalResult {
    match (value, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or_else(|| EvalError::Type("list index must be an int".into()))?;
            usize::try_from(i)
                .ok()
                .and_then(|idx| items.get(idx))
                .cloned()
                .ok_or(EvalError::IndexOutOfRange {
                    index: i,
                    len: items.len(),
                })
        }
        (Value::Object(_), Value::String(key)) => member(value, key),
        (lhs, rhs) => Err(EvalError::NoOverload {
            op: "[]",
            lhs: type_name(lhs),
            rhs: type_name(rhs),
        }),
    }
}

fn as_bool(value: &Value, context: &str) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| {
        EvalError::Type(format!(
            "{context} expects bool, got {}",
            type_name(value)
        ))
    })
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &mut Bindings) -> EvalResult {
    match op {
        BinaryOp::And => {
            if !as_bool(&eval(lhs, scope)?, "'&&'")? {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(as_bool(&eval(rhs, scope)?, "'&&'")?));
        }
        BinaryOp::Or => {
            if as_bool(&eval(lhs, scope)?, "'||'")? {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(as_bool(&eval(rhs, scope)?, "'||'")?));
        }
        _ => {}
    }

    let left = eval(lhs, scope)?;
    let right = eval(rhs, scope)?;
    let no_overload = || EvalError::NoOverload {
        op: op.as_str(),
        lhs: type_name(&left),
        rhs: type_name(&right),
    };

    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right).ok_or_else(no_overload)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In => match &right {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|item| values_equal(item, &left)))),
            Value::Object(map) => match &left {
                Value::String(key) => Ok(Value::Bool(map.contains_key(key))),
                _ => Err(no_overload()),
            },
            _ => Err(no_overload()),
        },
        BinaryOp::Add => match (&left, &right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            (Value::Number(a), Value::Number(b)) => arithmetic(op, a, b),
            _ => Err(no_overload()),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => arithmetic(op, a, b),
            _ => Err(no_overload()),
        },
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators handled above"),
    }
}

fn arithmetic(op: BinaryOp, a: &Number, b: &Number) -> EvalResult {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let result = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div | BinaryOp::Rem if y == 0 => return Err(EvalError::DivisionByZero),
            BinaryOp::Div => x.checked_div(y),
            BinaryOp::Rem => x.checked_rem(y),
            _ => None,
        };
        return result.map(Value::from).ok_or(EvalError::Overflow(op.as_str()));
    }

    let x = a.as_f64().unwrap_or_default();
    let y = b.as_f64().unwrap_or_default();
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Rem => x % y,
        _ => f64::NAN,
    };
    float_value(result)
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn expect_arity(function: &str, args: &[Expr], expected: usize) -> Result<(), EvalError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(EvalError::Arity {
            function: function.to_string(),
            expected,
            actual: args.len(),
        })
    }
}

fn call_function(function: &str, args: &[Expr], scope: &mut Bindings) -> EvalResult {
    if function == "has" {
        expect_arity(function, args, 1)?;
        let ExprKind::Member { target, field } = &args[0].kind else {
            return Err(EvalError::Type(
                "has() expects a field selection such as has(x.y)".into(),
            ));
        };
        return match eval(target, scope)? {
            Value::Object(map) => Ok(Value::Bool(map.contains_key(field))),
            other => Err(EvalError::Type(format!(
                "has() cannot test fields of {}",
                type_name(&other)
            ))),
        };
    }

    let values = args
        .iter()
        .map(|arg| eval(arg, scope))
        .collect::<Result<Vec<_>, _>>()?;

    match function {
        "size" => {
            expect_arity(function, args, 1)?;
            size(&values[0])
        }
        "int" => {
            expect_arity(function, args, 1)?;
            to_int(&values[0])
        }
        "uint" => {
            expect_arity(function, args, 1)?;
            to_int(&values[0])
        }
        "double" => {
            expect_arity(function, args, 1)?;
            match &values[0] {
                Value::Number(n) => float_value(n.as_f64().unwrap_or_default()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| EvalError::Type(format!("cannot convert '{s}' to double")))
                    .and_then(float_value),
                other => Err(EvalError::Type(format!(
                    "cannot convert {} to double",
                    type_name(other)
                ))),
            }
        }
        "string" => {
            expect_arity(function, args, 1)?;
            Ok(Value::String(match &values[0] {
                Value::String(s) => s.clone(),
                Value::Null => "null".into(),
                other => other.to_string(),
            }))
        }
        "bool" => {
            expect_arity(function, args, 1)?;
            match &values[0] {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) if s == "true" => Ok(Value::Bool(true)),
                Value::String(s) if s == "false" => Ok(Value::Bool(false)),
                other => Err(EvalError::Type(format!(
                    "cannot convert {} to bool",
                    type_name(other)
                ))),
            }
        }
        "type" => {
            expect_arity(function, args, 1)?;
            Ok(Value::String(type_name(&values[0]).into()))
        }
        "sum" | "min" | "max" => {
            let items: Vec<Value> = match values.as_slice() {
                [Value::Array(items)] => items.clone(),
                _ => values.clone(),
            };
            aggregate(function, &items)
        }
        _ => Err(EvalError::UnknownFunction(function.to_string())),
    }
}

fn size(value: &Value) -> EvalResult {
    let len = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => {
            return Err(EvalError::Type(format!(
                "size() is not defined for {}",
                type_name(other)
            )))
        }
    };
    Ok(Value::from(len as i64))
}

fn to_int(value: &Value) -> EvalResult {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::from(i)),
            None => Ok(Value::from(n.as_f64().unwrap_or_default().trunc() as i64)),
        },
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| EvalError::Type(format!("cannot convert '{s}' to int"))),
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        other => Err(EvalError::Type(format!(
            "cannot convert {} to int",
            type_name(other)
        ))),
    }
}

fn aggregate(function: &str, items: &[Value]) -> EvalResult {
    let numbers = items
        .iter()
        .map(|item| match item {
            Value::Number(n) => Ok(n.clone()),
            other => Err(EvalError::Type(format!(
                "{function}() expects numbers, got {}",
                type_name(other)
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if function == "sum" {
        let mut total = Value::from(0);
        for n in &numbers {
            if let Value::Number(acc) = &total {
                total = arithmetic(BinaryOp::Add, acc, n)?;
            }
        }
        return Ok(total);
    }

    let mut best: Option<Number> = None;
    for n in numbers {
        let replace = match &best {
            None => true,
            Some(current) => {
                let ordering = compare(&Value::Number(n.clone()), &Value::Number(current.clone()));
                if function == "min" {
                    ordering == Some(Ordering::Less)
                } else {
                    ordering == Some(Ordering::Greater)
                }
            }
        };
        if replace {
            best = Some(n);
        }
    }
    best.map(Value::Number)
        .ok_or_else(|| EvalError::Type(format!("{function}() of an empty list")))
}

fn call_method(target: &Expr, method: &str, args: &[Expr], scope: &mut Bindings) -> EvalResult {
    if matches!(method, "map" | "filter" | "all" | "exists" | "exists_one") {
        return list_macro(target, method, args, scope);
    }

    let receiver = eval(target, scope)?;
    let values = args
        .iter()
        .map(|arg| eval(arg, scope))
        .collect::<Result<Vec<_>, _>>()?;

    let string_arg = |idx: usize| string_argument(&values, idx, method);

    match (&receiver, method) {
        (_, "size") => {
            expect_arity(method, args, 0)?;
            size(&receiver)
        }
        (Value::String(s), "contains") => {
            expect_arity(method, args, 1)?;
            Ok(Value::Bool(s.contains(string_arg(0)?)))
        }
        (Value::String(s), "startsWith") => {
            expect_arity(method, args, 1)?;
            Ok(Value::Bool(s.starts_with(string_arg(0)?)))
        }
        (Value::String(s), "endsWith") => {
            expect_arity(method, args, 1)?;
            Ok(Value::Bool(s.ends_with(string_arg(0)?)))
        }
        (Value::String(s), "matches") => {
            expect_arity(method, args, 1)?;
            let pattern =
                Regex::new(string_arg(0)?).map_err(|err| EvalError::Regex(err.to_string()))?;
            Ok(Value::Bool(pattern.is_match(s)))
        }
        (Value::String(s), "lowerAscii" | "lower") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "upperAscii" | "upper") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "trim") => Ok(Value::String(s.trim().to_string())),
        (Value::String(s), "split") => {
            expect_arity(method, args, 1)?;
            Ok(Value::Array(
                s.split(string_arg(0)?)
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }
        (Value::Array(items), "join") => {
            let separator = if args.is_empty() { "" } else { string_arg(0)? };
            let parts = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(EvalError::Type(format!(
                        "join() expects a list of strings, found {}",
                        type_name(other)
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::String(parts.join(separator)))
        }
        (Value::Array(items), "contains") => {
            expect_arity(method, args, 1)?;
            Ok(Value::Bool(items.iter().any(|item| values_equal(item, &values[0]))))
        }
        (Value::Object(a), "overlay") => {
            expect_arity(method, args, 1)?;
            let Value::Object(b) = &values[0] else {
                return Err(EvalError::Type("overlay() expects a map".into()));
            };
            let mut merged = Value::Object(a.clone());
            merge_overlay(&mut merged, &Value::Object(b.clone()));
            Ok(merged)
        }
        (other, _) => Err(EvalError::Type(format!(
            "no method '{method}' on {}",
            type_name(other)
        ))),
    }
}

fn string_argument<'v>(values: &'v [Value], idx: usize, method: &str) -> Result<&'v str, EvalError> {
    values
        .get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| EvalError::Type(format!("{method}() expects a string argument")))
}

fn list_macro(target: &Expr, method: &str, args: &[Expr], scope: &mut Bindings) -> EvalResult {
    expect_arity(method, args, 2)?;
    let ExprKind::Ident(variable) = &args[0].kind else {
        return Err(EvalError::Type(format!(
            "{method}() expects a loop variable as its first argument"
        )));
    };
    let items: Vec<Value> = match eval(target, scope)? {
        Value::Array(items) => items,
        Value::Object(map) => map.keys().cloned().map(Value::String).collect(),
        other => {
            return Err(EvalError::Type(format!(
                "{method}() is not defined for {}",
                type_name(&other)
            )))
        }
    };

    let body = &args[1];
    let mut mapped = Vec::new();
    let mut matched = 0usize;
    for item in items {
        scope.push(variable, item.clone());
        let result = eval(body, scope);
        scope.pop();
        let result = result?;
        match method {
            "map" => mapped.push(result),
            _ => {
                if as_bool(&result, method)? {
                    matched += 1;
                    if method == "filter" {
                        mapped.push(item);
                    }
                } else if method == "all" {
                    return Ok(Value::Bool(false));
                }
            }
        }
    }

    Ok(match method {
        "map" | "filter" => Value::Array(mapped),
        "all" => Value::Bool(true),
        "exists" => Value::Bool(matched > 0),
        _ => Value::Bool(matched == 1),
    })
}

/// Recursively merges `overlay` onto `base`; maps merge key by key, every
/// other value replaces.
pub fn merge_overlay(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_overlay(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::compile;
    use serde_json::json;

    fn eval_body(body: &str, bindings: &Bindings) -> EvalResult {
        let compiled = compile(&format!("={body}")).expect("expression compiles");
        compiled.evaluate(bindings)
    }

    fn inputs(value: Value) -> Bindings {
        Bindings::new().with("inputs", value)
    }

    #[test]
    fn arithmetic_and_precedence() {
        let b = inputs(json!({"value": 4}));
        assert_eq!(eval_body("inputs.value * 2 + 3", &b), Ok(json!(11)));
        assert_eq!(eval_body("7 / 2", &b), Ok(json!(3)));
        assert_eq!(eval_body("7.0 / 2", &b), Ok(json!(3.5)));
        assert_eq!(eval_body("1 / 0", &b), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn sum_and_average() {
        let b = inputs(json!({"values": [{"amount": 10}, {"amount": 20}]}));
        assert_eq!(
            eval_body("sum(inputs.values.map(v, v.amount))", &b),
            Ok(json!(30))
        );
        assert_eq!(
            eval_body("sum(inputs.values.map(v, v.amount)) / size(inputs.values)", &b),
            Ok(json!(15))
        );
    }

    #[test]
    fn macros_and_membership() {
        let b = inputs(json!({"items": [1, 2, 3], "labels": {"app": "web"}}));
        assert_eq!(eval_body("inputs.items.filter(i, i > 1)", &b), Ok(json!([2, 3])));
        assert_eq!(eval_body("inputs.items.all(i, i > 0)", &b), Ok(json!(true)));
        assert_eq!(eval_body("inputs.items.exists_one(i, i == 2)", &b), Ok(json!(true)));
        assert_eq!(eval_body("'app' in inputs.labels", &b), Ok(json!(true)));
        assert_eq!(eval_body("has(inputs.labels.app)", &b), Ok(json!(true)));
        assert_eq!(eval_body("has(inputs.labels.tier)", &b), Ok(json!(false)));
    }

    #[test]
    fn strings_and_conditionals() {
        let b = inputs(json!({"name": "Demo-App"}));
        assert_eq!(
            eval_body("inputs.name.lowerAscii() + '-svc'", &b),
            Ok(json!("demo-app-svc"))
        );
        assert_eq!(
            eval_body("inputs.name.startsWith('Demo') ? 'yes' : 'no'", &b),
            Ok(json!("yes"))
        );
        assert_eq!(eval_body("inputs.name.matches('^[A-Z]')", &b), Ok(json!(true)));
    }

    #[test]
    fn missing_keys_are_errors() {
        let b = inputs(json!({}));
        assert_eq!(
            eval_body("inputs.absent", &b),
            Err(EvalError::NoSuchKey("absent".into()))
        );
        assert!(matches!(
            eval_body("unknown.x", &b),
            Err(EvalError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn numeric_equality_crosses_int_and_double() {
        assert!(values_equal(&json!(15), &json!(15.0)));
        assert!(values_equal(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn overlay_merges_maps() {
        let mut base = json!({"metadata": {"name": "a", "labels": {"x": "1"}}});
        merge_overlay(&mut base, &json!({"metadata": {"labels": {"y": "2"}}}));
        assert_eq!(
            base,
            json!({"metadata": {"name": "a", "labels": {"x": "1", "y": "2"}}})
        );
    }
}
