//! Numeric model over JSON fact values using `rust_decimal`.
//!
//! Comparisons and arithmetic go through `Decimal`, so `0.1 + 0.2 == 0.3`
//! and `500 == 500.0`. JSON numbers and numeric strings (such as money
//! amounts written as `"1500.00"`) both take part.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Number, Value};

/// Interpret a JSON value as a decimal, if it is numeric.
pub fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(text)
        .ok()
        .or_else(|| Decimal::from_scientific(text).ok())
}

/// Render a decimal as a JSON value.
///
/// Integral values become JSON integers. Fractional values become JSON
/// numbers at the output boundary.
pub fn from_decimal(value: Decimal) -> Value {
    let normalized = value.normalize();
    if normalized.scale() == 0 {
        if let Some(i) = normalized.to_i64() {
            return Value::Number(i.into());
        }
    }
    normalized
        .to_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(normalized.to_string()))
}

/// Round half to even at `dp` decimal places.
pub fn round(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven)
}

/// Order two values: numerically when both are numeric, lexically when
/// both are strings, otherwise incomparable.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (to_decimal(left), to_decimal(right)) {
        return Some(l.cmp(&r));
    }
    match (left, right) {
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Equality with numeric normalization; otherwise structural JSON equality.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (to_decimal(left), to_decimal(right)) {
                (Some(l), Some(r)) => l == r,
                _ => left == right,
            }
        }
        _ => left == right,
    }
}
