//! Query compilation and matching.
//!
//! A filter condition is parsed once into a [`Query`] tree; unknown operators
//! and malformed arguments are rejected at parse time. Matching follows
//! MongoDB semantics: dotted paths traverse arrays, equality against an array
//! field also matches any of its elements, and a missing field equals `null`.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use crate::error::ExpressionError;
use crate::value::{compare_values, type_name, values_equal};

use super::expression;

/// A parsed filter condition.
#[derive(Debug, Clone)]
pub enum Query {
    /// Every sub-query must match. An empty condition is `And(vec![])`.
    And(Vec<Query>),
    /// At least one sub-query must match.
    Or(Vec<Query>),
    /// No sub-query may match.
    Nor(Vec<Query>),
    /// Aggregation expression coerced to truthiness.
    Expr(Value),
    /// Condition on a field path.
    Field {
        /// Dotted field path.
        path: String,
        /// Operators that must all hold.
        ops: Vec<FieldOp>,
    },
}

/// A single operator applied to the values found at a field path.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Cmp(Ordering, bool, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Size(usize),
    All(Vec<Value>),
    ElemMatch(ElemMatch),
    Not(Vec<FieldOp>),
    Regex(Regex),
    Mod(i64, i64),
    Type(String),
}

/// Argument of `$elemMatch`.
#[derive(Debug, Clone)]
pub enum ElemMatch {
    /// Operators applied to each element directly (`{$gte: 80}`).
    Ops(Vec<FieldOp>),
    /// Query applied to each element as a document (`{qty: {$gt: 1}}`).
    Query(Box<Query>),
}

impl Query {
    /// Parses a condition object.
    pub fn parse(condition: &Value) -> Result<Self, ExpressionError> {
        match condition {
            Value::Null => Ok(Self::And(Vec::new())),
            Value::Object(map) => Self::parse_object(map),
            other => Err(ExpressionError::invalid(
                "query",
                format!("condition must be an object, got {}", type_name(other)),
            )),
        }
    }

    fn parse_object(map: &Map<String, Value>) -> Result<Self, ExpressionError> {
        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            let clause = match key.as_str() {
                "$and" => Self::And(parse_list(key, value)?),
                "$or" => Self::Or(parse_list(key, value)?),
                "$nor" => Self::Nor(parse_list(key, value)?),
                "$expr" => Self::Expr(value.clone()),
                k if k.starts_with('$') => {
                    return Err(ExpressionError::UnknownOperator {
                        operator: k.to_string(),
                    })
                }
                _ => Self::Field {
                    path: key.clone(),
                    ops: parse_field_condition(value)?,
                },
            };
            clauses.push(clause);
        }
        if clauses.len() == 1 {
            if let Some(only) = clauses.pop() {
                return Ok(only);
            }
        }
        Ok(Self::And(clauses))
    }

    /// Tests the query against a document.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::And(qs) => qs.iter().all(|q| q.matches(doc)),
            Self::Or(qs) => qs.iter().any(|q| q.matches(doc)),
            Self::Nor(qs) => !qs.iter().any(|q| q.matches(doc)),
            Self::Expr(expr) => match expression::evaluate_root(expr, doc) {
                Ok(v) => crate::value::is_truthy(v.as_ref()),
                Err(err) => {
                    tracing::trace!(error = %err, "$expr evaluation failed; treating as no match");
                    false
                }
            },
            Self::Field { path, ops } => {
                let mut found = Vec::new();
                lookup(doc, &path.split('.').collect::<Vec<_>>(), &mut found);
                ops.iter().all(|op| op.test(&found))
            }
        }
    }
}

fn parse_list(operator: &str, value: &Value) -> Result<Vec<Query>, ExpressionError> {
    let Value::Array(items) = value else {
        return Err(ExpressionError::invalid(operator, "expected an array of conditions"));
    };
    if items.is_empty() {
        return Err(ExpressionError::invalid(operator, "array must not be empty"));
    }
    items.iter().map(Query::parse).collect()
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .map_or(false, |m| !m.is_empty() && m.keys().all(|k| k.starts_with('$')))
}

fn parse_field_condition(value: &Value) -> Result<Vec<FieldOp>, ExpressionError> {
    match value.as_object() {
        Some(map) if is_operator_object(value) => parse_ops(map),
        _ => Ok(vec![FieldOp::Eq(value.clone())]),
    }
}

fn parse_ops(map: &Map<String, Value>) -> Result<Vec<FieldOp>, ExpressionError> {
    let mut ops = Vec::with_capacity(map.len());
    for (key, arg) in map {
        let op = match key.as_str() {
            "$eq" => FieldOp::Eq(arg.clone()),
            "$ne" => FieldOp::Ne(arg.clone()),
            "$gt" => FieldOp::Cmp(Ordering::Greater, false, arg.clone()),
            "$gte" => FieldOp::Cmp(Ordering::Greater, true, arg.clone()),
            "$lt" => FieldOp::Cmp(Ordering::Less, false, arg.clone()),
            "$lte" => FieldOp::Cmp(Ordering::Less, true, arg.clone()),
            "$in" => FieldOp::In(array_arg(key, arg)?),
            "$nin" => FieldOp::Nin(array_arg(key, arg)?),
            "$all" => FieldOp::All(array_arg(key, arg)?),
            "$exists" => FieldOp::Exists(crate::value::is_truthy(Some(arg))),
            "$size" => FieldOp::Size(
                arg.as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| ExpressionError::invalid(key, "expected a non-negative integer"))?,
            ),
            "$elemMatch" => {
                let Value::Object(inner) = arg else {
                    return Err(ExpressionError::invalid(key, "expected an object"));
                };
                let logical = inner
                    .keys()
                    .any(|k| matches!(k.as_str(), "$and" | "$or" | "$nor" | "$expr"));
                if is_operator_object(arg) && !logical {
                    FieldOp::ElemMatch(ElemMatch::Ops(parse_ops(inner)?))
                } else {
                    FieldOp::ElemMatch(ElemMatch::Query(Box::new(Query::parse_object(inner)?)))
                }
            }
            "$not" => match arg {
                Value::Object(inner) if is_operator_object(arg) => FieldOp::Not(parse_ops(inner)?),
                _ => return Err(ExpressionError::invalid(key, "expected an operator object")),
            },
            "$regex" => {
                let pattern = arg
                    .as_str()
                    .ok_or_else(|| ExpressionError::invalid(key, "expected a string pattern"))?;
                let options = map.get("$options").and_then(Value::as_str).unwrap_or("");
                FieldOp::Regex(build_regex(pattern, options)?)
            }
            "$options" => continue,
            "$mod" => {
                let pair = arg.as_array().filter(|a| a.len() == 2);
                let parsed = pair.and_then(|a| Some((a[0].as_i64()?, a[1].as_i64()?)));
                match parsed {
                    Some((d, r)) if d != 0 => FieldOp::Mod(d, r),
                    _ => return Err(ExpressionError::invalid(key, "expected [divisor, remainder]")),
                }
            }
            "$type" => FieldOp::Type(
                arg.as_str()
                    .ok_or_else(|| ExpressionError::invalid(key, "expected a type name"))?
                    .to_string(),
            ),
            other => {
                return Err(ExpressionError::UnknownOperator {
                    operator: other.to_string(),
                })
            }
        };
        ops.push(op);
    }
    Ok(ops)
}

fn array_arg(operator: &str, arg: &Value) -> Result<Vec<Value>, ExpressionError> {
    arg.as_array()
        .cloned()
        .ok_or_else(|| ExpressionError::invalid(operator, "expected an array"))
}

fn build_regex(pattern: &str, options: &str) -> Result<Regex, ExpressionError> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| ExpressionError::invalid("$regex", e.to_string()))
}

/// Collects every value reachable at `segments`, traversing arrays.
pub fn lookup<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(*head) {
                lookup(v, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(idx) = head.parse::<usize>() {
                if let Some(v) = items.get(idx) {
                    lookup(v, rest, out);
                }
            }
            for item in items.iter().filter(|i| i.is_object()) {
                lookup(item, segments, out);
            }
        }
        _ => {}
    }
}

/// Candidate values plus the elements of array candidates.
fn flattened<'a>(found: &[&'a Value]) -> impl Iterator<Item = &'a Value> + 'a {
    let found: Vec<&'a Value> = found.to_vec();
    found.into_iter().flat_map(|v| {
        let own = std::iter::once(v);
        let elems: Box<dyn Iterator<Item = &'a Value>> = match v {
            Value::Array(items) => Box::new(items.iter()),
            _ => Box::new(std::iter::empty()),
        };
        own.chain(elems)
    })
}

fn equals_any(found: &[&Value], target: &Value) -> bool {
    if found.is_empty() {
        return target.is_null();
    }
    flattened(found).any(|v| values_equal(v, target))
}

fn same_type_bracket(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

impl FieldOp {
    fn test(&self, found: &[&Value]) -> bool {
        match self {
            Self::Eq(target) => equals_any(found, target),
            Self::Ne(target) => !equals_any(found, target),
            Self::Cmp(direction, inclusive, target) => flattened(found).any(|v| {
                if !same_type_bracket(v, target) {
                    return false;
                }
                let ord = compare_values(v, target);
                ord == *direction || (*inclusive && ord == Ordering::Equal)
            }),
            Self::In(list) => list.iter().any(|t| equals_any(found, t)),
            Self::Nin(list) => !list.iter().any(|t| equals_any(found, t)),
            Self::Exists(expected) => !found.is_empty() == *expected,
            Self::Size(n) => found.iter().any(|v| v.as_array().map_or(false, |a| a.len() == *n)),
            Self::All(list) => !list.is_empty() && list.iter().all(|t| equals_any(found, t)),
            Self::ElemMatch(m) => found.iter().any(|v| match v {
                Value::Array(items) => items.iter().any(|item| m.test(item)),
                _ => false,
            }),
            Self::Not(ops) => !ops.iter().all(|op| op.test(found)),
            Self::Regex(re) => flattened(found).any(|v| v.as_str().map_or(false, |s| re.is_match(s))),
            Self::Mod(d, r) => flattened(found).any(|v| v.as_i64().map_or(false, |n| n.checked_rem(*d) == Some(*r))),
            Self::Type(name) => found.iter().any(|v| type_name(v) == name.as_str()),
        }
    }
}

impl ElemMatch {
    fn test(&self, element: &Value) -> bool {
        match self {
            Self::Ops(ops) => ops.iter().all(|op| op.test(&[element])),
            Self::Query(q) => element.is_object() && q.matches(element),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(cond: Value, doc: Value) -> bool {
        Query::parse(&cond).unwrap().matches(&doc)
    }

    #[test]
    fn test_empty_condition_matches_everything() {
        assert!(check(json!({}), json!({"a": 1})));
        assert!(check(Value::Null, json!({})));
    }

    #[test]
    fn test_implicit_equality_and_arrays() {
        assert!(check(json!({"tags": "red"}), json!({"tags": ["blue", "red"]})));
        assert!(check(json!({"a.b": 2}), json!({"a": [{"b": 1}, {"b": 2}]})));
        assert!(check(json!({"missing": null}), json!({"a": 1})));
        assert!(!check(json!({"a": 2}), json!({"a": 1})));
    }

    #[test]
    fn test_comparisons_respect_type_brackets() {
        assert!(check(json!({"age": {"$gte": 30, "$lt": 40}}), json!({"age": 30})));
        assert!(!check(json!({"age": {"$gt": 30}}), json!({"age": "99"})));
    }

    #[test]
    fn test_logical_operators() {
        let doc = json!({"a": 1, "b": 2});
        assert!(check(json!({"$or": [{"a": 5}, {"b": 2}]}), doc.clone()));
        assert!(!check(json!({"$nor": [{"a": 1}]}), doc.clone()));
        assert!(check(json!({"$and": [{"a": 1}, {"b": {"$in": [2, 3]}}]}), doc));
    }

    #[test]
    fn test_exists_size_all() {
        let doc = json!({"xs": [1, 2, 3]});
        assert!(check(json!({"xs": {"$exists": true, "$size": 3}}), doc.clone()));
        assert!(check(json!({"ys": {"$exists": false}}), doc.clone()));
        assert!(check(json!({"xs": {"$all": [1, 3]}}), doc));
    }

    #[test]
    fn test_elem_match_forms() {
        let doc = json!({"scores": [70, 85], "items": [{"q": 1}, {"q": 5}]});
        assert!(check(json!({"scores": {"$elemMatch": {"$gte": 80, "$lt": 90}}}), doc.clone()));
        assert!(check(json!({"items": {"$elemMatch": {"q": {"$gt": 4}}}}), doc.clone()));
        assert!(!check(json!({"items": {"$elemMatch": {"q": {"$gt": 9}}}}), doc));
    }

    #[test]
    fn test_regex_not_mod_type() {
        let doc = json!({"name": "Kwame", "n": 10});
        assert!(check(json!({"name": {"$regex": "^kw", "$options": "i"}}), doc.clone()));
        assert!(check(json!({"n": {"$not": {"$gt": 20}}}), doc.clone()));
        assert!(check(json!({"n": {"$mod": [3, 1]}}), doc.clone()));
        assert!(check(json!({"name": {"$type": "string"}}), doc));
    }

    #[test]
    fn test_expr() {
        assert!(check(json!({"$expr": {"$gt": ["$a", "$b"]}}), json!({"a": 3, "b": 2})));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Query::parse(&json!({"$where": "x"})).is_err());
        assert!(Query::parse(&json!({"$or": []})).is_err());
        assert!(Query::parse(&json!({"a": {"$in": 3}})).is_err());
        assert!(Query::parse(&json!([1])).is_err());
    }
}
