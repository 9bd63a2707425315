//! Aggregation expression evaluation.
//!
//! Expressions evaluate to `Option<Value>`: `None` is a missing value (a field
//! reference that resolves to nothing), distinct from JSON `null`.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use crate::analyzer::single_operator;
use crate::error::ExpressionError;
use crate::value::{arithmetic, compare_values, is_truthy, type_name, values_equal, Arith};

/// Variable scope for expression evaluation.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    root: &'a Value,
    current: &'a Value,
    vars: HashMap<String, Value>,
}

impl<'a> Scope<'a> {
    /// Scope rooted at `document`.
    #[must_use]
    pub fn new(document: &'a Value) -> Self {
        Self {
            root: document,
            current: document,
            vars: HashMap::new(),
        }
    }

    fn with_vars(&self, vars: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut next = self.clone();
        next.vars.extend(vars);
        next
    }
}

/// Evaluates `expr` against `document`.
pub fn evaluate_root(expr: &Value, document: &Value) -> Result<Option<Value>, ExpressionError> {
    evaluate(expr, &Scope::new(document))
}

/// Evaluates `expr` in `scope`.
pub fn evaluate(expr: &Value, scope: &Scope<'_>) -> Result<Option<Value>, ExpressionError> {
    match expr {
        Value::String(s) if s.starts_with("$$") => resolve_variable(&s[2..], scope),
        Value::String(s) if s.starts_with('$') => Ok(resolve_field(scope.current, &s[1..])),
        Value::Array(items) => {
            let values = items
                .iter()
                .map(|item| evaluate(item, scope).map(|v| v.unwrap_or(Value::Null)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Value::Array(values)))
        }
        Value::Object(map) => {
            if let Some((operator, argument)) = single_operator(expr) {
                return apply(operator, argument, scope);
            }
            if let Some(key) = map.keys().find(|k| k.starts_with('$')) {
                return Err(ExpressionError::invalid(
                    key,
                    "operator objects must contain exactly one key",
                ));
            }
            let mut out = Map::new();
            for (key, value) in map {
                if let Some(v) = evaluate(value, scope)? {
                    out.insert(key.clone(), v);
                }
            }
            Ok(Some(Value::Object(out)))
        }
        other => Ok(Some(other.clone())),
    }
}

/// Resolves a dotted path; arrays map the remaining path over their elements.
#[must_use]
pub fn resolve_field(value: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    walk(value, &segments)
}

fn walk(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Object(map) => walk(map.get(*head)?, rest),
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(|item| walk(item, segments)).collect(),
        )),
        _ => None,
    }
}

fn resolve_variable(reference: &str, scope: &Scope<'_>) -> Result<Option<Value>, ExpressionError> {
    let (name, rest) = reference.split_once('.').unwrap_or((reference, ""));
    let base = match name {
        "ROOT" => scope.root,
        "CURRENT" => scope.current,
        _ => scope
            .vars
            .get(name)
            .ok_or_else(|| ExpressionError::UndefinedVariable {
                name: name.to_string(),
            })?,
    };
    Ok(if rest.is_empty() {
        Some(base.clone())
    } else {
        resolve_field(base, rest)
    })
}

fn operands<'v>(argument: &'v Value) -> Vec<&'v Value> {
    match argument {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn evaluate_operands(argument: &Value, scope: &Scope<'_>) -> Result<Vec<Value>, ExpressionError> {
    operands(argument)
        .into_iter()
        .map(|a| evaluate(a, scope).map(|v| v.unwrap_or(Value::Null)))
        .collect()
}

fn exactly<const N: usize>(operator: &str, values: Vec<Value>) -> Result<[Value; N], ExpressionError> {
    let len = values.len();
    values
        .try_into()
        .map_err(|_| ExpressionError::invalid(operator, format!("expected {N} arguments, got {len}")))
}

fn number<'v>(operator: &str, value: &'v Value) -> Result<&'v Number, ExpressionError> {
    value.as_number().ok_or_else(|| {
        ExpressionError::evaluation(operator, format!("expected a number, got {}", type_name(value)))
    })
}

fn array<'v>(operator: &str, value: &'v Value) -> Result<&'v Vec<Value>, ExpressionError> {
    value.as_array().ok_or_else(|| {
        ExpressionError::evaluation(operator, format!("expected an array, got {}", type_name(value)))
    })
}

fn object_arg<'v>(operator: &str, argument: &'v Value) -> Result<&'v Map<String, Value>, ExpressionError> {
    argument
        .as_object()
        .ok_or_else(|| ExpressionError::invalid(operator, "expected an object argument"))
}

fn index(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

fn fold_arith(operator: &str, op: Arith, values: &[Value]) -> Result<Option<Value>, ExpressionError> {
    if values.iter().any(Value::is_null) {
        return Ok(Some(Value::Null));
    }
    let mut iter = values.iter();
    let Some(first) = iter.next() else {
        return Err(ExpressionError::invalid(operator, "expected at least one argument"));
    };
    let mut acc = number(operator, first)?.clone();
    for next in iter {
        acc = arithmetic(op, &acc, number(operator, next)?)
            .ok_or_else(|| ExpressionError::evaluation(operator, "arithmetic result is not representable"))?;
    }
    Ok(Some(Value::Number(acc)))
}

fn compare(operator: &str, values: Vec<Value>) -> Result<Ordering, ExpressionError> {
    let [a, b] = exactly::<2>(operator, values)?;
    Ok(compare_values(&a, &b))
}

fn apply(operator: &str, argument: &Value, scope: &Scope<'_>) -> Result<Option<Value>, ExpressionError> {
    let result = match operator {
        "$literal" => argument.clone(),
        "$add" => return fold_arith(operator, Arith::Add, &evaluate_operands(argument, scope)?),
        "$multiply" => return fold_arith(operator, Arith::Mul, &evaluate_operands(argument, scope)?),
        "$subtract" | "$divide" | "$mod" => {
            let values = evaluate_operands(argument, scope)?;
            let values = exactly::<2>(operator, values)?;
            let op = match operator {
                "$subtract" => Arith::Sub,
                "$divide" => Arith::Div,
                _ => Arith::Rem,
            };
            return fold_arith(operator, op, &values);
        }
        "$abs" => {
            let [v] = exactly::<1>(operator, evaluate_operands(argument, scope)?)?;
            if v.is_null() {
                Value::Null
            } else {
                let n = number(operator, &v)?;
                match n.as_i64() {
                    Some(i) => Value::from(i.checked_abs().ok_or_else(|| {
                        ExpressionError::evaluation(operator, "integer overflow")
                    })?),
                    None => Value::from(n.as_f64().unwrap_or(0.0).abs()),
                }
            }
        }
        "$eq" | "$ne" => {
            let [a, b] = exactly::<2>(operator, evaluate_operands(argument, scope)?)?;
            Value::Bool(values_equal(&a, &b) == (operator == "$eq"))
        }
        "$gt" => Value::Bool(compare(operator, evaluate_operands(argument, scope)?)? == Ordering::Greater),
        "$gte" => Value::Bool(compare(operator, evaluate_operands(argument, scope)?)? != Ordering::Less),
        "$lt" => Value::Bool(compare(operator, evaluate_operands(argument, scope)?)? == Ordering::Less),
        "$lte" => Value::Bool(compare(operator, evaluate_operands(argument, scope)?)? != Ordering::Greater),
        "$cmp" => Value::from(compare(operator, evaluate_operands(argument, scope)?)? as i64),
        "$and" => {
            let mut all = true;
            for a in operands(argument) {
                if !is_truthy(evaluate(a, scope)?.as_ref()) {
                    all = false;
                    break;
                }
            }
            Value::Bool(all)
        }
        "$or" => {
            let mut any = false;
            for a in operands(argument) {
                if is_truthy(evaluate(a, scope)?.as_ref()) {
                    any = true;
                    break;
                }
            }
            Value::Bool(any)
        }
        "$not" => {
            let [v] = exactly::<1>(operator, evaluate_operands(argument, scope)?)?;
            Value::Bool(!is_truthy(Some(&v)))
        }
        "$cond" => {
            let (cond, then, otherwise) = match argument {
                Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Value::Object(map) => match (map.get("if"), map.get("then"), map.get("else")) {
                    (Some(c), Some(t), Some(e)) => (c, t, e),
                    _ => return Err(ExpressionError::invalid(operator, "requires if, then and else")),
                },
                _ => return Err(ExpressionError::invalid(operator, "expected [if, then, else]")),
            };
            let branch = if is_truthy(evaluate(cond, scope)?.as_ref()) { then } else { otherwise };
            return evaluate(branch, scope);
        }
        "$ifNull" => {
            let args = operands(argument);
            let Some((fallback, candidates)) = args.split_last() else {
                return Err(ExpressionError::invalid(operator, "expected at least two arguments"));
            };
            for candidate in candidates {
                match evaluate(candidate, scope)? {
                    Some(Value::Null) | None => {}
                    Some(v) => return Ok(Some(v)),
                }
            }
            return evaluate(fallback, scope);
        }
        "$switch" => {
            let map = object_arg(operator, argument)?;
            let branches = map
                .get("branches")
                .and_then(Value::as_array)
                .ok_or_else(|| ExpressionError::invalid(operator, "requires a branches array"))?;
            for branch in branches {
                let (Some(case), Some(then)) = (branch.get("case"), branch.get("then")) else {
                    return Err(ExpressionError::invalid(operator, "branch requires case and then"));
                };
                if is_truthy(evaluate(case, scope)?.as_ref()) {
                    return evaluate(then, scope);
                }
            }
            let default = map
                .get("default")
                .ok_or_else(|| ExpressionError::evaluation(operator, "no branch matched and no default"))?;
            return evaluate(default, scope);
        }
        "$concat" => {
            let mut out = String::new();
            for v in evaluate_operands(argument, scope)? {
                match v {
                    Value::Null => return Ok(Some(Value::Null)),
                    Value::String(s) => out.push_str(&s),
                    other => {
                        return Err(ExpressionError::evaluation(
                            operator,
                            format!("expected strings, got {}", type_name(&other)),
                        ))
                    }
                }
            }
            Value::String(out)
        }
        "$toUpper" | "$toLower" => {
            let [v] = exactly::<1>(operator, evaluate_operands(argument, scope)?)?;
            let s = match v {
                Value::Null => String::new(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            Value::String(if operator == "$toUpper" { s.to_uppercase() } else { s.to_lowercase() })
        }
        "$size" => {
            let [v] = exactly::<1>(operator, evaluate_operands(argument, scope)?)?;
            Value::from(array(operator, &v)?.len())
        }
        "$arrayElemAt" => {
            let [arr, idx] = exactly::<2>(operator, evaluate_operands(argument, scope)?)?;
            let items = array(operator, &arr)?;
            let i = index(&idx).ok_or_else(|| ExpressionError::evaluation(operator, "index must be an integer"))?;
            let resolved = if i < 0 { items.len() as i64 + i } else { i };
            return Ok(usize::try_from(resolved).ok().and_then(|i| items.get(i)).cloned());
        }
        "$in" => {
            let [needle, haystack] = exactly::<2>(operator, evaluate_operands(argument, scope)?)?;
            Value::Bool(crate::value::contains_value(array(operator, &haystack)?, &needle))
        }
        "$slice" => {
            let values = evaluate_operands(argument, scope)?;
            let Some((arr, rest)) = values.split_first() else {
                return Err(ExpressionError::invalid(operator, "expected [array, n] or [array, position, n]"));
            };
            if arr.is_null() {
                return Ok(Some(Value::Null));
            }
            let items = array(operator, arr)?;
            let ints = rest
                .iter()
                .map(|v| index(v).ok_or_else(|| ExpressionError::evaluation(operator, "expected integers")))
                .collect::<Result<Vec<_>, _>>()?;
            Value::Array(match ints.as_slice() {
                [n] => slice_count(items, *n),
                [position, n] => slice_window(items, *position, *n),
                _ => return Err(ExpressionError::invalid(operator, "expected [array, n] or [array, position, n]")),
            })
        }
        "$filter" => {
            let map = object_arg(operator, argument)?;
            let input = map.get("input").ok_or_else(|| ExpressionError::invalid(operator, "requires input"))?;
            let cond = map.get("cond").ok_or_else(|| ExpressionError::invalid(operator, "requires cond"))?;
            let name = map.get("as").and_then(Value::as_str).unwrap_or("this");
            let limit = match map.get("limit") {
                Some(l) => evaluate(l, scope)?.as_ref().and_then(index),
                None => None,
            };
            let Some(input) = evaluate(input, scope)? else {
                return Ok(Some(Value::Null));
            };
            if input.is_null() {
                return Ok(Some(Value::Null));
            }
            let mut out = Vec::new();
            for item in array(operator, &input)? {
                if limit.map_or(false, |l| out.len() as i64 >= l) {
                    break;
                }
                let inner = scope.with_vars([(name.to_string(), item.clone())]);
                if is_truthy(evaluate(cond, &inner)?.as_ref()) {
                    out.push(item.clone());
                }
            }
            Value::Array(out)
        }
        "$map" => {
            let map = object_arg(operator, argument)?;
            let input = map.get("input").ok_or_else(|| ExpressionError::invalid(operator, "requires input"))?;
            let body = map.get("in").ok_or_else(|| ExpressionError::invalid(operator, "requires in"))?;
            let name = map.get("as").and_then(Value::as_str).unwrap_or("this");
            let Some(input) = evaluate(input, scope)? else {
                return Ok(Some(Value::Null));
            };
            if input.is_null() {
                return Ok(Some(Value::Null));
            }
            let mut out = Vec::new();
            for item in array(operator, &input)? {
                let inner = scope.with_vars([(name.to_string(), item.clone())]);
                out.push(evaluate(body, &inner)?.unwrap_or(Value::Null));
            }
            Value::Array(out)
        }
        "$reduce" => {
            let map = object_arg(operator, argument)?;
            let input = map.get("input").ok_or_else(|| ExpressionError::invalid(operator, "requires input"))?;
            let initial = map
                .get("initialValue")
                .ok_or_else(|| ExpressionError::invalid(operator, "requires initialValue"))?;
            let body = map.get("in").ok_or_else(|| ExpressionError::invalid(operator, "requires in"))?;
            let Some(input) = evaluate(input, scope)? else {
                return Ok(Some(Value::Null));
            };
            let mut acc = evaluate(initial, scope)?.unwrap_or(Value::Null);
            for item in array(operator, &input)? {
                let inner = scope.with_vars([
                    ("value".to_string(), acc),
                    ("this".to_string(), item.clone()),
                ]);
                acc = evaluate(body, &inner)?.unwrap_or(Value::Null);
            }
            acc
        }
        "$let" => {
            let map = object_arg(operator, argument)?;
            let body = map.get("in").ok_or_else(|| ExpressionError::invalid(operator, "requires in"))?;
            let mut bound = Vec::new();
            if let Some(vars) = map.get("vars").and_then(Value::as_object) {
                for (name, expr) in vars {
                    bound.push((name.clone(), evaluate(expr, scope)?.unwrap_or(Value::Null)));
                }
            }
            return evaluate(body, &scope.with_vars(bound));
        }
        other => {
            return Err(ExpressionError::UnknownOperator {
                operator: other.to_string(),
            })
        }
    };
    Ok(Some(result))
}

/// First `n` elements, or the last `|n|` when negative.
#[must_use]
pub fn slice_count(items: &[Value], n: i64) -> Vec<Value> {
    let len = items.len();
    let take = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX).min(len);
    if n >= 0 {
        items[..take].to_vec()
    } else {
        items[len - take..].to_vec()
    }
}

/// `n` elements starting at `position` (negative positions count from the end).
#[must_use]
pub fn slice_window(items: &[Value], position: i64, n: i64) -> Vec<Value> {
    let len = items.len();
    let offset = usize::try_from(position.unsigned_abs()).unwrap_or(usize::MAX);
    let start = if position < 0 { len.saturating_sub(offset) } else { offset.min(len) };
    let count = usize::try_from(n.max(0)).unwrap_or(usize::MAX);
    let end = start.saturating_add(count).min(len);
    items[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(expr: Value, doc: Value) -> Option<Value> {
        evaluate_root(&expr, &doc).unwrap()
    }

    #[test]
    fn test_field_references() {
        let doc = json!({"a": {"b": 2}, "xs": [{"v": 1}, {"v": 2}]});
        assert_eq!(eval(json!("$a.b"), doc.clone()), Some(json!(2)));
        assert_eq!(eval(json!("$xs.v"), doc.clone()), Some(json!([1, 2])));
        assert_eq!(eval(json!("$nope"), doc), None);
    }

    #[test]
    fn test_arithmetic() {
        let doc = json!({"p": 10, "q": 4});
        assert_eq!(eval(json!({"$add": ["$p", "$q", 1]}), doc.clone()), Some(json!(15)));
        assert_eq!(eval(json!({"$subtract": ["$p", "$q"]}), doc.clone()), Some(json!(6)));
        assert_eq!(eval(json!({"$divide": ["$p", "$q"]}), doc.clone()), Some(json!(2.5)));
        assert_eq!(eval(json!({"$add": ["$p", null]}), doc), Some(Value::Null));
    }

    #[test]
    fn test_conditionals() {
        let doc = json!({"score": 95});
        let grade = json!({"$cond": {"if": {"$gte": ["$score", 90]}, "then": "A", "else": "B"}});
        assert_eq!(eval(grade, doc.clone()), Some(json!("A")));
        assert_eq!(eval(json!({"$ifNull": ["$missing", "dflt"]}), doc.clone()), Some(json!("dflt")));
        let sw = json!({"$switch": {"branches": [{"case": {"$lt": ["$score", 50]}, "then": "low"}], "default": "high"}});
        assert_eq!(eval(sw, doc), Some(json!("high")));
    }

    #[test]
    fn test_array_operators() {
        let doc = json!({"xs": [1, 2, 3, 4]});
        let filter = json!({"$filter": {"input": "$xs", "as": "x", "cond": {"$gt": ["$$x", 2]}}});
        assert_eq!(eval(filter, doc.clone()), Some(json!([3, 4])));
        let map = json!({"$map": {"input": "$xs", "in": {"$multiply": ["$$this", 10]}}});
        assert_eq!(eval(map, doc.clone()), Some(json!([10, 20, 30, 40])));
        let reduce = json!({"$reduce": {"input": "$xs", "initialValue": 0, "in": {"$add": ["$$value", "$$this"]}}});
        assert_eq!(eval(reduce, doc.clone()), Some(json!(10)));
        assert_eq!(eval(json!({"$size": "$xs"}), doc.clone()), Some(json!(4)));
        assert_eq!(eval(json!({"$arrayElemAt": ["$xs", -1]}), doc.clone()), Some(json!(4)));
        assert_eq!(eval(json!({"$slice": ["$xs", 1, 2]}), doc.clone()), Some(json!([2, 3])));
        assert_eq!(eval(json!({"$in": [3, "$xs"]}), doc), Some(json!(true)));
    }

    #[test]
    fn test_strings_and_let() {
        let doc = json!({"first": "Ada", "last": "Lovelace"});
        let full = json!({"$concat": ["$first", " ", "$last"]});
        assert_eq!(eval(full, doc.clone()), Some(json!("Ada Lovelace")));
        assert_eq!(eval(json!({"$toUpper": "$first"}), doc.clone()), Some(json!("ADA")));
        let let_expr = json!({"$let": {"vars": {"f": "$first"}, "in": {"$toLower": "$$f"}}});
        assert_eq!(eval(let_expr, doc), Some(json!("ada")));
    }

    #[test]
    fn test_literal_and_objects() {
        let doc = json!({"a": 1});
        assert_eq!(eval(json!({"$literal": "$a"}), doc.clone()), Some(json!("$a")));
        assert_eq!(eval(json!({"x": "$a", "y": "$none"}), doc), Some(json!({"x": 1})));
    }

    #[test]
    fn test_errors() {
        let doc = json!({"s": "text"});
        assert!(evaluate_root(&json!({"$frobnicate": 1}), &doc).is_err());
        assert!(evaluate_root(&json!({"$add": ["$s", 1]}), &doc).is_err());
        assert!(evaluate_root(&json!("$$undefinedVar"), &doc).is_err());
        assert!(evaluate_root(&json!({"$divide": [1, 0]}), &doc).is_err());
    }

    #[test]
    fn test_slice_helpers() {
        let xs: Vec<Value> = (1..=5).map(Value::from).collect();
        assert_eq!(slice_count(&xs, 2), vec![json!(1), json!(2)]);
        assert_eq!(slice_count(&xs, -2), vec![json!(4), json!(5)]);
        assert_eq!(slice_count(&xs, 10).len(), 5);
        assert_eq!(slice_window(&xs, -2, 5), vec![json!(4), json!(5)]);
        assert_eq!(slice_window(&xs, 1, i64::MAX), xs[1..].to_vec());
        assert_eq!(slice_window(&xs, i64::MIN, i64::MAX), xs);
        assert_eq!(slice_window(&xs, i64::MAX, 3), Vec::<Value>::new());
        assert_eq!(slice_count(&xs, i64::MIN), xs);
    }
}
