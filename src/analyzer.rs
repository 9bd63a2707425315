//! Static dependency analysis of filter, projection and update expressions.
//!
//! The analyzer walks an expression tree and collects the document field paths
//! the expression reads (conditions, projections) or writes (updates). Store
//! notification decisions are made purely from these precomputed sets, so the
//! analysis must over-approximate rather than miss a path.
//!
//! Operators are classified through a closed table ([`OperatorShape`]). Any
//! operator whose argument uses named roles instead of field names must be
//! listed there, otherwise role names would be mistaken for field segments.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::path;

/// Marker prefix for operators and field references.
pub const MARKER: char = '$';

/// Prefix for loop-local / system variables (`$$this`, `$$ROOT`).
pub const VARIABLE_PREFIX: &str = "$$";

/// How the analyzer treats the argument of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorShape {
    /// Opaque argument that never contributes paths (`$literal`).
    Literal,
    /// Object argument whose listed keys hold expressions; other keys are
    /// configuration (e.g. the `as` variable name of `$map`).
    Roles(&'static [&'static str]),
    /// `$switch`: branch objects with `case`/`then` roles plus `default`.
    Switch,
    /// `$let`: every value of `vars` plus `in`.
    Let,
    /// Operator name shared between projection and expression/query
    /// contexts. At the root of a projection it reshapes the named field.
    ProjectionShaping,
    /// Argument is an ordinary sub-expression.
    Passthrough,
}

/// Classifies an operator for dependency analysis.
#[must_use]
pub fn classify(operator: &str) -> OperatorShape {
    match operator {
        "$literal" => OperatorShape::Literal,
        "$cond" => OperatorShape::Roles(&["if", "then", "else"]),
        "$filter" => OperatorShape::Roles(&["input", "cond", "limit"]),
        "$map" => OperatorShape::Roles(&["input", "in"]),
        "$reduce" => OperatorShape::Roles(&["input", "initialValue", "in"]),
        "$sortArray" => OperatorShape::Roles(&["input"]),
        "$regexMatch" | "$regexFind" => OperatorShape::Roles(&["input", "regex", "options"]),
        "$trim" | "$ltrim" | "$rtrim" => OperatorShape::Roles(&["input", "chars"]),
        "$dateToString" => OperatorShape::Roles(&["date", "format", "timezone", "onNull"]),
        "$zip" => OperatorShape::Roles(&["inputs", "defaults"]),
        "$switch" => OperatorShape::Switch,
        "$let" => OperatorShape::Let,
        "$slice" | "$elemMatch" => OperatorShape::ProjectionShaping,
        _ => OperatorShape::Passthrough,
    }
}

/// Extracts the field paths an expression depends on.
///
/// With `include_root_fields`, top-level literal assignments (`{a: 5}`) count as
/// dependencies on `a`; this is the mode for conditions and update expressions.
/// Without it, root keys only count when their value is projection-shaped
/// (`1`, `true`, a field reference, or a nested projection).
#[must_use]
pub fn analyze(expr: &Value, include_root_fields: bool) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect(expr, None, include_root_fields, &mut out);
    out
}

/// Fields read by a filter condition.
#[must_use]
pub fn condition_fields(condition: &Value) -> BTreeSet<String> {
    analyze(condition, true)
}

/// Fields read by a projection.
#[must_use]
pub fn projection_fields(projection: &Value) -> BTreeSet<String> {
    analyze(projection, false)
}

/// Fields written by an update expression, truncated before any array-filter
/// placeholder segment.
#[must_use]
pub fn update_fields(update: &Value) -> BTreeSet<String> {
    analyze(update, true)
        .into_iter()
        .map(|p| match p.find(".$") {
            Some(idx) => p[..idx].to_string(),
            None => p,
        })
        .collect()
}

/// Returns true if `key` is an operator name.
#[must_use]
pub fn is_operator(key: &str) -> bool {
    key.starts_with(MARKER)
}

/// Returns `(operator, argument)` if `value` is a single-key operator object.
#[must_use]
pub fn single_operator(value: &Value) -> Option<(&str, &Value)> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let (key, arg) = map.iter().next()?;
    is_operator(key).then_some((key.as_str(), arg))
}

/// Returns true if `value` can appear as a root projection entry.
#[must_use]
pub fn is_projection_like(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) => s.starts_with(MARKER),
        Value::Object(_) | Value::Array(_) => true,
        Value::Null => false,
    }
}

fn is_pure_inclusion(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::Object(map) => {
            !map.is_empty() && map.iter().all(|(key, v)| !is_operator(key) && is_pure_inclusion(v))
        }
        _ => false,
    }
}

/// Decides whether `operator(argument)` at the root of a projection reshapes
/// the field it is keyed under, as opposed to computing a new value.
///
/// `$elemMatch` is always projection-shaping here. `$slice` is
/// projection-shaping for `n` or `[skip, n]`; the expression form takes the
/// array as its first argument (`["$items", 2]`).
#[must_use]
pub fn is_projection_shaping(operator: &str, argument: &Value) -> bool {
    if classify(operator) != OperatorShape::ProjectionShaping {
        return false;
    }
    match operator {
        "$elemMatch" => argument.is_object(),
        "$slice" => match argument {
            Value::Number(_) => true,
            Value::Array(items) => items.len() == 2 && items.iter().all(Value::is_number),
            _ => false,
        },
        _ => false,
    }
}

/// Returns true if `expr` references the whole document through `$$ROOT` or
/// `$$CURRENT`. Such references are invisible to [`analyze`], so callers must
/// treat the expression as depending on every path.
#[must_use]
pub fn reads_whole_document(expr: &Value) -> bool {
    match expr {
        Value::String(s) => ["$$ROOT", "$$CURRENT"]
            .iter()
            .any(|var| s.strip_prefix(var).is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))),
        Value::Array(items) => items.iter().any(reads_whole_document),
        Value::Object(map) => map
            .iter()
            .any(|(key, value)| classify(key) != OperatorShape::Literal && reads_whole_document(value)),
        _ => false,
    }
}

fn insert_ancestor(ancestor: Option<&str>, out: &mut BTreeSet<String>) {
    if let Some(a) = ancestor {
        out.insert(a.to_string());
    }
}

fn collect(expr: &Value, ancestor: Option<&str>, include_root: bool, out: &mut BTreeSet<String>) {
    match expr {
        Value::String(s) if s.starts_with(VARIABLE_PREFIX) => {}
        Value::String(s) if s.starts_with(MARKER) => {
            let field = &s[MARKER.len_utf8()..];
            if !field.is_empty() {
                out.insert(field.to_string());
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                insert_ancestor(ancestor, out);
            }
            for item in items {
                collect(item, ancestor, include_root, out);
            }
        }
        Value::Object(map) => {
            if map.is_empty() {
                insert_ancestor(ancestor, out);
            }
            for (key, value) in map {
                collect_entry(key, value, ancestor, include_root, out);
            }
        }
        _ => insert_ancestor(ancestor, out),
    }
}

fn collect_entry(
    key: &str,
    value: &Value,
    ancestor: Option<&str>,
    include_root: bool,
    out: &mut BTreeSet<String>,
) {
    if is_operator(key) {
        for role in role_values(key, value) {
            collect(role, ancestor, include_root, out);
        }
        return;
    }

    let field = path::join(ancestor, key);

    if ancestor.is_none() && !include_root {
        if !is_projection_like(value) {
            return;
        }
        if let Some((operator, argument)) = single_operator(value) {
            if is_projection_shaping(operator, argument) {
                out.insert(field);
            } else {
                // Computed output field: the key names the output, not a source.
                collect(value, None, include_root, out);
            }
            return;
        }
        // A nested sub-projection takes its shape from the source field.
        if value.is_object() && !is_pure_inclusion(value) {
            out.insert(field.clone());
        }
    }

    collect(value, Some(&field), include_root, out);
}

/// Values of an operator argument that hold expressions.
fn role_values<'a>(operator: &str, argument: &'a Value) -> Vec<&'a Value> {
    match (classify(operator), argument) {
        (OperatorShape::Literal, _) => Vec::new(),
        (OperatorShape::Roles(roles), Value::Object(map)) => {
            roles.iter().filter_map(|r| map.get(*r)).collect()
        }
        (OperatorShape::Switch, Value::Object(map)) => {
            let mut out = Vec::new();
            if let Some(Value::Array(branches)) = map.get("branches") {
                for branch in branches {
                    if let Value::Object(b) = branch {
                        out.extend(["case", "then"].iter().filter_map(|r| b.get(*r)));
                    }
                }
            }
            out.extend(map.get("default"));
            out
        }
        (OperatorShape::Let, Value::Object(map)) => {
            let mut out = Vec::new();
            if let Some(Value::Object(vars)) = map.get("vars") {
                out.extend(vars.values());
            }
            out.extend(map.get("in"));
            out
        }
        _ => vec![argument],
    }
}
