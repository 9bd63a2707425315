//! Value helpers over the JSON document model.
//!
//! Documents and expressions are plain `serde_json::Value`s. This module adds
//! the pieces `serde_json` does not provide: numeric-aware deep equality, a
//! total ordering across types, and arithmetic that keeps integers integral.

use std::cmp::Ordering;

use serde_json::{Number, Value};

/// Returns a human-readable type name.
#[must_use]
pub const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Deep structural equality where numerically equal numbers compare equal.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map_or(false, |other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Equality over optional values; `None` only equals `None`.
#[must_use]
pub fn optional_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => values_equal(x, y),
        (None, None) => true,
        _ => false,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    match (x.as_i64(), y.as_i64()) {
        (Some(l), Some(r)) => l == r,
        _ => match (x.as_f64(), y.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => x == y,
        },
    }
}

const fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total ordering across all JSON values.
///
/// Values of different types order by type rank:
/// null < numbers < strings < objects < arrays < booleans.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    if let (Some(l), Some(r)) = (x.as_i64(), y.as_i64()) {
        return l.cmp(&r);
    }
    let l = x.as_f64().unwrap_or(f64::NAN);
    let r = y.as_f64().unwrap_or(f64::NAN);
    l.partial_cmp(&r).unwrap_or(Ordering::Equal)
}

/// Arithmetic operation over two JSON numbers.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Applies `op` to two numbers, staying integral when both sides are integers
/// and the result does not overflow.
#[must_use]
pub fn arithmetic(op: Arith, a: &Number, b: &Number) -> Option<Number> {
    if let (Some(l), Some(r)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            Arith::Add => l.checked_add(r),
            Arith::Sub => l.checked_sub(r),
            Arith::Mul => l.checked_mul(r),
            Arith::Div => {
                if r != 0 && l % r == 0 {
                    l.checked_div(r)
                } else {
                    None
                }
            }
            Arith::Rem => l.checked_rem(r),
        };
        if let Some(v) = exact {
            return Some(Number::from(v));
        }
        if matches!(op, Arith::Rem) {
            return None;
        }
    }
    let l = a.as_f64()?;
    let r = b.as_f64()?;
    let result = match op {
        Arith::Add => l + r,
        Arith::Sub => l - r,
        Arith::Mul => l * r,
        Arith::Div => l / r,
        Arith::Rem => l % r,
    };
    Number::from_f64(result)
}

/// Copy of `value` with integral floats rewritten as integers, so that
/// numerically equal values serialize identically.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            #[allow(clippy::cast_possible_truncation)]
            Some(f) if f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) => Value::from(f as i64),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect()),
        _ => value.clone(),
    }
}

/// Mongo-style truthiness used by aggregation expressions.
#[must_use]
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Some(_) => true,
    }
}

/// Returns true if `haystack` contains an element deep-equal to `needle`.
#[must_use]
pub fn contains_value(haystack: &[Value], needle: &Value) -> bool {
    haystack.iter().any(|v| values_equal(v, needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_name() {
        assert_eq!(type_name(&json!(null)), "null");
        assert_eq!(type_name(&json!([1])), "array");
        assert_eq!(type_name(&json!({"a": 1})), "object");
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize(&json!({"a": [1.0, 2.5], "b": -3.0})), json!({"a": [1, 2.5], "b": -3}));
        assert_eq!(canonicalize(&json!(1e300)), json!(1e300));
        assert_eq!(canonicalize(&json!("1.0")), json!("1.0"));
    }

    #[test]
    fn test_values_equal_numeric() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!({"a": [1, 2.0]}), &json!({"a": [1.0, 2]})));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_optional_equal() {
        assert!(optional_equal(None, None));
        assert!(!optional_equal(None, Some(&json!(null))));
    }

    #[test]
    fn test_compare_across_types() {
        assert_eq!(compare_values(&json!(null), &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!(10), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!(true), &json!([1])), Ordering::Greater);
        assert_eq!(compare_values(&json!(2), &json!(10.5)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
    }

    #[test]
    fn test_compare_arrays_lexicographic() {
        assert_eq!(compare_values(&json!([1, 2]), &json!([1, 3])), Ordering::Less);
        assert_eq!(compare_values(&json!([1, 2]), &json!([1])), Ordering::Greater);
    }

    #[test]
    fn test_arithmetic_integral() {
        let r = arithmetic(Arith::Add, &Number::from(2), &Number::from(3)).unwrap();
        assert_eq!(r.as_i64(), Some(5));
        let r = arithmetic(Arith::Div, &Number::from(7), &Number::from(2)).unwrap();
        assert_eq!(r.as_f64(), Some(3.5));
        let r = arithmetic(Arith::Mul, &Number::from(i64::MAX), &Number::from(2)).unwrap();
        assert!(r.as_i64().is_none());
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(is_truthy(Some(&json!(""))));
        assert!(is_truthy(Some(&json!([]))));
    }
}
