//! Projection shaping.
//!
//! Supported entries: inclusion (`1`/`true`, dotted paths allowed), field
//! references (`"$a.b"`), nested sub-projections, computed expressions, the
//! projection-shaping operators `$slice` and `$elemMatch`, and literal values.
//! Exclusion (`0`/`false`) is rejected.

use serde_json::{Map, Value};

use crate::analyzer::{is_projection_shaping, single_operator};
use crate::error::ExpressionError;
use crate::value::type_name;

use super::expression::{self, slice_count, slice_window, Scope};
use super::query::Query;

/// Projects `document` through `projection`.
///
/// An absent (`null`) or empty projection returns the whole document.
pub fn project(document: &Value, projection: &Value) -> Result<Value, ExpressionError> {
    match projection {
        Value::Null => Ok(document.clone()),
        Value::Object(spec) if spec.is_empty() => Ok(document.clone()),
        Value::Object(spec) => {
            let scope = Scope::new(document);
            project_object(document, spec, &scope).map(Value::Object)
        }
        other => Err(ExpressionError::invalid(
            "projection",
            format!("expected an object, got {}", type_name(other)),
        )),
    }
}

fn project_object(
    current: &Value,
    spec: &Map<String, Value>,
    scope: &Scope<'_>,
) -> Result<Map<String, Value>, ExpressionError> {
    let mut out = Map::new();
    for (key, entry) in spec {
        let segments: Vec<&str> = key.split('.').collect();
        match entry {
            Value::Bool(true) => include(current, &segments, &mut out),
            Value::Number(n) if n.as_f64().map_or(false, |f| f != 0.0) => {
                include(current, &segments, &mut out);
            }
            Value::Bool(false) | Value::Number(_) => {
                return Err(ExpressionError::invalid(
                    "projection",
                    format!("exclusion of '{key}' is not supported"),
                ))
            }
            Value::Object(inner) => {
                if let Some((operator, argument)) = single_operator(entry) {
                    if is_projection_shaping(operator, argument) {
                        if let Some(v) = shape(current, key, operator, argument)? {
                            set_path(&mut out, &segments, v);
                        }
                    } else if let Some(v) = expression::evaluate(entry, scope)? {
                        set_path(&mut out, &segments, v);
                    }
                    continue;
                }
                let nested = match lookup_one(current, &segments) {
                    Some(Value::Array(items)) => {
                        let mut shaped = Vec::with_capacity(items.len());
                        for item in items.iter().filter(|i| i.is_object()) {
                            shaped.push(Value::Object(project_object(item, inner, scope)?));
                        }
                        Some(Value::Array(shaped))
                    }
                    Some(sub @ Value::Object(_)) => Some(Value::Object(project_object(sub, inner, scope)?)),
                    _ => {
                        let computed = project_object(&Value::Null, inner, scope)?;
                        (!computed.is_empty()).then_some(Value::Object(computed))
                    }
                };
                if let Some(v) = nested {
                    set_path(&mut out, &segments, v);
                }
            }
            Value::String(_) | Value::Array(_) => {
                if let Some(v) = expression::evaluate(entry, scope)? {
                    set_path(&mut out, &segments, v);
                }
            }
            Value::Null => set_path(&mut out, &segments, Value::Null),
        }
    }
    Ok(out)
}

fn lookup_one<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(value, |v, seg| v.as_object().and_then(|m| m.get(*seg)))
}

/// Copies the value at `segments` into `out`, preserving nesting and mapping
/// through arrays of sub-documents.
fn include(source: &Value, segments: &[&str], out: &mut Map<String, Value>) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let Some(value) = source.as_object().and_then(|m| m.get(*head)) else {
        return;
    };
    if rest.is_empty() {
        out.insert((*head).to_string(), value.clone());
        return;
    }
    match value {
        Value::Object(_) => {
            let slot = out
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(target) = slot {
                include(value, rest, target);
            }
        }
        Value::Array(items) => {
            let subdocs: Vec<&Value> = items.iter().filter(|i| i.is_object()).collect();
            let slot = out
                .entry((*head).to_string())
                .or_insert_with(|| Value::Array(vec![Value::Object(Map::new()); subdocs.len()]));
            if let Value::Array(targets) = slot {
                for (item, target) in subdocs.into_iter().zip(targets.iter_mut()) {
                    if let Value::Object(t) = target {
                        include(item, rest, t);
                    }
                }
            }
        }
        _ => {}
    }
}

fn set_path(out: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut cursor = out;
    for seg in parents {
        let slot = cursor
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        cursor = next;
    }
    cursor.insert((*last).to_string(), value);
}

fn shape(
    current: &Value,
    key: &str,
    operator: &str,
    argument: &Value,
) -> Result<Option<Value>, ExpressionError> {
    let segments: Vec<&str> = key.split('.').collect();
    let Some(Value::Array(items)) = lookup_one(current, &segments) else {
        return Ok(lookup_one(current, &segments).cloned());
    };
    match (operator, argument) {
        ("$slice", Value::Number(n)) => {
            let n = n.as_i64().unwrap_or(0);
            Ok(Some(Value::Array(slice_count(items, n))))
        }
        ("$slice", Value::Array(pair)) => {
            let skip = pair.first().and_then(Value::as_i64).unwrap_or(0);
            let n = pair.get(1).and_then(Value::as_i64).unwrap_or(0);
            Ok(Some(Value::Array(slice_window(items, skip, n))))
        }
        ("$elemMatch", cond) => {
            let query = Query::parse(cond)?;
            Ok(items
                .iter()
                .find(|item| query.matches(item))
                .map(|item| Value::Array(vec![item.clone()])))
        }
        _ => Err(ExpressionError::invalid(operator, "unsupported projection form")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "firstName": "Kwame",
            "age": 30,
            "address": {"city": "Accra", "zip": "00233"},
            "orders": [{"id": 1, "total": 5}, {"id": 2, "total": 9}],
            "scores": [3, 8, 9, 1]
        })
    }

    #[test]
    fn test_empty_projection_returns_document() {
        assert_eq!(project(&doc(), &json!({})).unwrap(), doc());
        assert_eq!(project(&doc(), &Value::Null).unwrap(), doc());
    }

    #[test]
    fn test_inclusion() {
        let out = project(&doc(), &json!({"firstName": 1, "address.city": true})).unwrap();
        assert_eq!(out, json!({"firstName": "Kwame", "address": {"city": "Accra"}}));
    }

    #[test]
    fn test_inclusion_through_arrays() {
        let out = project(&doc(), &json!({"orders.total": 1})).unwrap();
        assert_eq!(out, json!({"orders": [{"total": 5}, {"total": 9}]}));
    }

    #[test]
    fn test_missing_fields_omitted() {
        let out = project(&doc(), &json!({"nickname": 1})).unwrap();
        assert_eq!(out, json!({}));
    }

    #[test]
    fn test_computed_fields() {
        let out = project(
            &doc(),
            &json!({"name": "$firstName", "older": {"$add": ["$age", 1]}, "tag": "vip"}),
        )
        .unwrap();
        assert_eq!(out, json!({"name": "Kwame", "older": 31, "tag": "vip"}));
    }

    #[test]
    fn test_nested_projection() {
        let out = project(&doc(), &json!({"address": {"zip": 1}})).unwrap();
        assert_eq!(out, json!({"address": {"zip": "00233"}}));
    }

    #[test]
    fn test_projection_shaping() {
        let out = project(
            &doc(),
            &json!({"scores": {"$slice": -2}, "orders": {"$elemMatch": {"total": {"$gt": 6}}}}),
        )
        .unwrap();
        assert_eq!(out, json!({"scores": [9, 1], "orders": [{"id": 2, "total": 9}]}));
    }

    #[test]
    fn test_exclusion_rejected() {
        assert!(project(&doc(), &json!({"age": 0})).is_err());
        assert!(project(&doc(), &json!([1])).is_err());
    }
}
