//! Closed library of derivation functions.
//!
//! Every function is pure and total over JSON values: a type mismatch or an
//! absent argument yields `false` for predicates and `null` for
//! value-producing functions. The only errors are an unknown function name
//! and a wrong argument count, both of which indicate a malformed contract.

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, Time};

use crate::numeric::{compare, from_decimal, round, to_decimal, values_equal};

/// Allowed argument count for a library function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    fn exactly(n: usize) -> Self {
        Arity {
            min: n,
            max: Some(n),
        }
    }

    fn at_least(n: usize) -> Self {
        Arity { min: n, max: None }
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", max),
            Some(max) => write!(f, "{} to {}", self.min, max),
            None => write!(f, "at least {}", self.min),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FunctionError {
    #[error("unknown function '{0}'")]
    Unknown(String),
    #[error("function '{function}' expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: Arity,
        got: usize,
    },
}

/// Argument count accepted by `function`, or `None` if it is not in the
/// library.
pub fn arity(function: &str) -> Option<Arity> {
    let arity = match function {
        "equals" | "not_equals" | "greater_than" | "greater_or_equal" | "less_than"
        | "less_or_equal" => Arity::exactly(2),
        "add" | "subtract" | "multiply" | "divide" => Arity::exactly(2),
        "min" | "max" => Arity::at_least(1),
        "abs" => Arity::exactly(1),
        "round" => Arity {
            min: 1,
            max: Some(2),
        },
        "date_before" | "date_after" | "days_between" | "add_days" => Arity::exactly(2),
        "concat" => Arity::at_least(1),
        "lower" | "upper" | "length" => Arity::exactly(1),
        "starts_with" | "ends_with" | "contains_text" => Arity::exactly(2),
        "count" | "sum" | "is_empty" => Arity::exactly(1),
        "includes" => Arity::exactly(2),
        "and" | "or" | "coalesce" => Arity::at_least(1),
        "not" => Arity::exactly(1),
        "if_then_else" => Arity::exactly(3),
        _ => return None,
    };
    Some(arity)
}

/// Check that `function` exists and accepts `count` arguments.
pub fn check(function: &str, count: usize) -> Result<(), FunctionError> {
    let expected = arity(function).ok_or_else(|| FunctionError::Unknown(function.to_string()))?;
    if !expected.accepts(count) {
        return Err(FunctionError::Arity {
            function: function.to_string(),
            expected,
            got: count,
        });
    }
    Ok(())
}

/// Apply a library function. `None` marks an argument whose fact is absent.
pub fn apply(function: &str, args: &[Option<Value>]) -> Result<Value, FunctionError> {
    check(function, args.len())?;
    let value = match function {
        "equals" => Value::Bool(both(args, values_equal)),
        "not_equals" => Value::Bool(both(args, |l, r| !values_equal(l, r))),
        "greater_than" => Value::Bool(ordered(args, |o| o.is_gt())),
        "greater_or_equal" => Value::Bool(ordered(args, |o| o.is_ge())),
        "less_than" => Value::Bool(ordered(args, |o| o.is_lt())),
        "less_or_equal" => Value::Bool(ordered(args, |o| o.is_le())),

        "add" => arithmetic(args, |l, r| l.checked_add(r)),
        "subtract" => arithmetic(args, |l, r| l.checked_sub(r)),
        "multiply" => arithmetic(args, |l, r| l.checked_mul(r)),
        "divide" => arithmetic(args, |l, r| {
            if r.is_zero() {
                None
            } else {
                l.checked_div(r)
            }
        }),
        "min" => decimals(args)
            .and_then(|ds| ds.into_iter().min())
            .map_or(Value::Null, from_decimal),
        "max" => decimals(args)
            .and_then(|ds| ds.into_iter().max())
            .map_or(Value::Null, from_decimal),
        "abs" => decimal_arg(args, 0).map_or(Value::Null, |d| from_decimal(d.abs())),
        "round" => round_fn(args),

        "date_before" => Value::Bool(instants(args).map_or(false, |(a, b)| a < b)),
        "date_after" => Value::Bool(instants(args).map_or(false, |(a, b)| a > b)),
        "days_between" => instants(args).map_or(Value::Null, |(a, b)| {
            Value::Number((b - a).whole_days().into())
        }),
        "add_days" => add_days(args),

        "concat" => concat(args),
        "lower" => string_arg(args, 0).map_or(Value::Null, |s| Value::String(s.to_lowercase())),
        "upper" => string_arg(args, 0).map_or(Value::Null, |s| Value::String(s.to_uppercase())),
        "starts_with" => Value::Bool(strings(args).map_or(false, |(s, p)| s.starts_with(p))),
        "ends_with" => Value::Bool(strings(args).map_or(false, |(s, p)| s.ends_with(p))),
        "contains_text" => Value::Bool(strings(args).map_or(false, |(s, p)| s.contains(p))),
        "length" => match &args[0] {
            Some(Value::String(s)) => Value::Number(s.chars().count().into()),
            Some(Value::Array(items)) => Value::Number(items.len().into()),
            Some(Value::Object(map)) => Value::Number(map.len().into()),
            _ => Value::Null,
        },

        "count" => match &args[0] {
            Some(Value::Array(items)) => Value::Number(items.len().into()),
            _ => Value::Null,
        },
        "sum" => sum(args),
        "includes" => Value::Bool(match (&args[0], &args[1]) {
            (Some(Value::Array(items)), Some(item)) => {
                items.iter().any(|candidate| values_equal(candidate, item))
            }
            _ => false,
        }),
        "is_empty" => Value::Bool(match &args[0] {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::Object(map)) => map.is_empty(),
            Some(_) => false,
        }),

        "and" => Value::Bool(args.iter().all(truthy)),
        "or" => Value::Bool(args.iter().any(truthy)),
        "not" => Value::Bool(!truthy(&args[0])),
        "if_then_else" => {
            let branch = if truthy(&args[0]) { &args[1] } else { &args[2] };
            branch.clone().unwrap_or(Value::Null)
        }
        "coalesce" => args
            .iter()
            .flatten()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null),

        other => return Err(FunctionError::Unknown(other.to_string())),
    };
    Ok(value)
}

// ──────────────────────────────────────────────
// Argument helpers
// ──────────────────────────────────────────────

fn truthy(arg: &Option<Value>) -> bool {
    matches!(arg, Some(Value::Bool(true)))
}

fn both(args: &[Option<Value>], f: impl Fn(&Value, &Value) -> bool) -> bool {
    match (&args[0], &args[1]) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

fn ordered(args: &[Option<Value>], f: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    match (&args[0], &args[1]) {
        (Some(l), Some(r)) => compare(l, r).map_or(false, f),
        _ => false,
    }
}

fn decimal_arg(args: &[Option<Value>], index: usize) -> Option<Decimal> {
    args.get(index)?.as_ref().and_then(to_decimal)
}

fn decimals(args: &[Option<Value>]) -> Option<Vec<Decimal>> {
    args.iter()
        .map(|a| a.as_ref().and_then(to_decimal))
        .collect()
}

fn arithmetic(args: &[Option<Value>], f: impl Fn(Decimal, Decimal) -> Option<Decimal>) -> Value {
    match (decimal_arg(args, 0), decimal_arg(args, 1)) {
        (Some(l), Some(r)) => f(l, r).map_or(Value::Null, from_decimal),
        _ => Value::Null,
    }
}

fn round_fn(args: &[Option<Value>]) -> Value {
    let Some(value) = decimal_arg(args, 0) else {
        return Value::Null;
    };
    let dp = match args.get(1) {
        None => 0,
        Some(arg) => match arg.as_ref().and_then(to_decimal) {
            Some(d) if d.fract().is_zero() && d >= Decimal::ZERO && d <= Decimal::from(28) => {
                match d.to_u32() {
                    Some(dp) => dp,
                    None => return Value::Null,
                }
            }
            _ => return Value::Null,
        },
    };
    from_decimal(round(value, dp))
}

fn sum(args: &[Option<Value>]) -> Value {
    let Some(Value::Array(items)) = &args[0] else {
        return Value::Null;
    };
    let mut total = Decimal::ZERO;
    for item in items {
        let Some(d) = to_decimal(item) else {
            return Value::Null;
        };
        match total.checked_add(d) {
            Some(t) => total = t,
            None => return Value::Null,
        }
    }
    from_decimal(total)
}

fn string_arg(args: &[Option<Value>], index: usize) -> Option<&str> {
    match args.get(index)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn strings(args: &[Option<Value>]) -> Option<(&str, &str)> {
    Some((string_arg(args, 0)?, string_arg(args, 1)?))
}

fn concat(args: &[Option<Value>]) -> Value {
    let mut out = String::new();
    for arg in args {
        match arg {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Number(n)) => out.push_str(&n.to_string()),
            Some(Value::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
            _ => return Value::Null,
        }
    }
    Value::String(out)
}

// ──────────────────────────────────────────────
// Dates
// ──────────────────────────────────────────────

/// A parsed date argument, remembering whether it carried a time.
enum Instant {
    Date(Date),
    DateTime(OffsetDateTime),
}

impl Instant {
    fn parse(value: &Value) -> Option<Instant> {
        let Value::String(text) = value else {
            return None;
        };
        if let Ok(date) = Date::parse(text, format_description!("[year]-[month]-[day]")) {
            return Some(Instant::Date(date));
        }
        OffsetDateTime::parse(text, &Rfc3339)
            .ok()
            .map(Instant::DateTime)
    }

    fn at(&self) -> OffsetDateTime {
        match self {
            Instant::Date(date) => date.with_time(Time::MIDNIGHT).assume_utc(),
            Instant::DateTime(dt) => *dt,
        }
    }
}

fn instants(args: &[Option<Value>]) -> Option<(OffsetDateTime, OffsetDateTime)> {
    let a = Instant::parse(args.first()?.as_ref()?)?;
    let b = Instant::parse(args.get(1)?.as_ref()?)?;
    Some((a.at(), b.at()))
}

fn add_days(args: &[Option<Value>]) -> Value {
    let Some(start) = args[0].as_ref().and_then(Instant::parse) else {
        return Value::Null;
    };
    let Some(days) = decimal_arg(args, 1)
        .filter(|d| d.fract().is_zero())
        .and_then(|d| d.to_i64())
    else {
        return Value::Null;
    };
    let shifted = match start {
        Instant::Date(date) => date
            .checked_add(Duration::days(days))
            .and_then(|d| d.format(format_description!("[year]-[month]-[day]")).ok()),
        Instant::DateTime(dt) => dt
            .checked_add(Duration::days(days))
            .and_then(|d| d.format(&Rfc3339).ok()),
    };
    shifted.map_or(Value::Null, Value::String)
}
