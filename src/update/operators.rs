//! Update operator catalog.
//!
//! Every operator is a variant of the closed [`UpdateOperator`] enum. Update
//! expressions are parsed (and their operands validated) up front, so unknown
//! operators and malformed modifiers never reach the document.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use chrono::Utc;
use serde_json::{json, Map, Number, Value};

use crate::error::UpdateError;
use crate::evaluator::expression::{resolve_field, slice_count};
use crate::evaluator::{Evaluator, Predicate};
use crate::value::{arithmetic, compare_values, contains_value, type_name, values_equal, Arith};

use super::apply::{apply_update, walk_expression, Target};

/// Update operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdateOperator {
    /// `$set`: overwrite with a copy of the value.
    Set,
    /// `$unset`: remove the field.
    Unset,
    /// `$inc`: add a numeric delta.
    Inc,
    /// `$mul`: multiply; a missing or null field counts as zero.
    Mul,
    /// `$max`: overwrite when the new value is greater.
    Max,
    /// `$min`: overwrite when the new value is less.
    Min,
    /// `$currentDate`: set to the current time.
    CurrentDate,
    /// `$push`: append values, with `$each`/`$position`/`$sort`/`$slice`.
    Push,
    /// `$addToSet`: append values not already present.
    AddToSet,
    /// `$pop`: remove the first (`-1`) or last (`1`) element.
    Pop,
    /// `$pull`: remove elements matching a value or condition.
    Pull,
    /// `$pullAll`: remove elements equal to any listed value.
    PullAll,
}

impl UpdateOperator {
    /// Every operator, in dispatch order.
    pub const ALL: [Self; 12] = [
        Self::Set,
        Self::Unset,
        Self::Inc,
        Self::Mul,
        Self::Max,
        Self::Min,
        Self::CurrentDate,
        Self::Push,
        Self::AddToSet,
        Self::Pop,
        Self::Pull,
        Self::PullAll,
    ];

    /// Parses an operator key.
    pub fn parse(name: &str) -> Result<Self, UpdateError> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == name)
            .ok_or_else(|| UpdateError::UnknownOperator {
                operator: name.to_string(),
            })
    }

    /// The operator key.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Set => "$set",
            Self::Unset => "$unset",
            Self::Inc => "$inc",
            Self::Mul => "$mul",
            Self::Max => "$max",
            Self::Min => "$min",
            Self::CurrentDate => "$currentDate",
            Self::Push => "$push",
            Self::AddToSet => "$addToSet",
            Self::Pop => "$pop",
            Self::Pull => "$pull",
            Self::PullAll => "$pullAll",
        }
    }

    /// Whether missing intermediate objects are created on the way to the target.
    #[must_use]
    pub const fn creates_path(self) -> bool {
        !matches!(self, Self::Unset | Self::Pop | Self::Pull | Self::PullAll)
    }
}

impl fmt::Display for UpdateOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sort order for `$push` with `$sort`.
#[derive(Debug, Clone, PartialEq)]
pub enum PushSort {
    /// Natural ordering of the elements (`1` ascending, `-1` descending).
    Natural(bool),
    /// Ordering by element fields, in key order.
    Keys(Vec<(String, bool)>),
}

/// Parsed `$push` operand.
#[derive(Debug, Clone, PartialEq)]
pub struct PushSpec {
    each: Vec<Value>,
    position: Option<i64>,
    sort: Option<PushSort>,
    slice: Option<i64>,
}

impl PushSpec {
    fn parse(operator: UpdateOperator, value: &Value) -> Result<Self, UpdateError> {
        let Some(map) = value.as_object().filter(|m| m.contains_key("$each")) else {
            return Ok(Self {
                each: vec![value.clone()],
                position: None,
                sort: None,
                slice: None,
            });
        };
        let invalid = |reason: &str| UpdateError::InvalidModifier {
            operator: operator.name().to_string(),
            reason: reason.to_string(),
        };
        let mut spec = Self {
            each: Vec::new(),
            position: None,
            sort: None,
            slice: None,
        };
        for (key, arg) in map {
            match (operator, key.as_str()) {
                (_, "$each") => {
                    spec.each = arg.as_array().cloned().ok_or_else(|| invalid("$each must be an array"))?;
                }
                (UpdateOperator::Push, "$position") => {
                    spec.position = Some(arg.as_i64().ok_or_else(|| invalid("$position must be an integer"))?);
                }
                (UpdateOperator::Push, "$slice") => {
                    spec.slice = Some(arg.as_i64().ok_or_else(|| invalid("$slice must be an integer"))?);
                }
                (UpdateOperator::Push, "$sort") => spec.sort = Some(parse_sort(arg).ok_or_else(|| invalid("$sort must be 1, -1 or an object of 1/-1"))?),
                (_, other) => return Err(invalid(&format!("unknown modifier '{other}'"))),
            }
        }
        Ok(spec)
    }

    fn apply(&self, current: &[Value]) -> Vec<Value> {
        let mut next = current.to_vec();
        let at = match self.position {
            None => next.len(),
            Some(p) if p < 0 => next.len().saturating_sub(usize::try_from(p.unsigned_abs()).unwrap_or(usize::MAX)),
            Some(p) => usize::try_from(p).unwrap_or(usize::MAX).min(next.len()),
        };
        next.splice(at..at, self.each.iter().cloned());
        match &self.sort {
            Some(PushSort::Natural(asc)) => next.sort_by(|a, b| directed(compare_values(a, b), *asc)),
            Some(PushSort::Keys(keys)) => next.sort_by(|a, b| {
                keys.iter()
                    .map(|(key, asc)| {
                        let l = resolve_field(a, key).unwrap_or(Value::Null);
                        let r = resolve_field(b, key).unwrap_or(Value::Null);
                        directed(compare_values(&l, &r), *asc)
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            }),
            None => {}
        }
        match self.slice {
            Some(n) => slice_count(&next, n),
            None => next,
        }
    }
}

fn directed(ord: Ordering, ascending: bool) -> Ordering {
    if ascending {
        ord
    } else {
        ord.reverse()
    }
}

fn sort_direction(value: &Value) -> Option<bool> {
    match value.as_i64() {
        Some(1) => Some(true),
        Some(-1) => Some(false),
        _ => None,
    }
}

fn parse_sort(value: &Value) -> Option<PushSort> {
    match value {
        Value::Object(keys) if !keys.is_empty() => keys
            .iter()
            .map(|(k, v)| sort_direction(v).map(|asc| (k.clone(), asc)))
            .collect::<Option<Vec<_>>>()
            .map(PushSort::Keys),
        other => sort_direction(other).map(PushSort::Natural),
    }
}

/// One parsed `operator: {selector: value, ...}` clause.
#[derive(Debug, Clone)]
pub struct UpdateClause {
    operator: UpdateOperator,
    operand: Map<String, Value>,
}

impl UpdateClause {
    /// The clause operator.
    #[must_use]
    pub const fn operator(&self) -> UpdateOperator {
        self.operator
    }
}

/// A parsed update expression.
#[derive(Debug, Clone)]
pub struct UpdateExpression {
    clauses: Vec<UpdateClause>,
}

impl UpdateExpression {
    /// Parses and validates an update expression.
    pub fn parse(expr: &Value) -> Result<Self, UpdateError> {
        let Value::Object(map) = expr else {
            return Err(UpdateError::NotAnObject {
                actual: type_name(expr),
            });
        };
        let mut clauses = Vec::with_capacity(map.len());
        for (key, operand) in map {
            let operator = UpdateOperator::parse(key)?;
            let Value::Object(operand) = operand else {
                return Err(UpdateError::InvalidOperand {
                    operator: key.clone(),
                });
            };
            for (field, value) in operand {
                validate_operand(operator, field, value)?;
            }
            clauses.push(UpdateClause {
                operator,
                operand: operand.clone(),
            });
        }
        clauses.sort_by_key(|c| c.operator);
        Ok(Self { clauses })
    }

    /// The parsed clauses in dispatch order.
    #[must_use]
    pub fn clauses(&self) -> &[UpdateClause] {
        &self.clauses
    }

    /// Applies every clause to `document`, returning the changed paths.
    ///
    /// The document may be partially modified when an error is returned;
    /// callers that need atomicity apply to a copy.
    pub fn apply(
        &self,
        document: &mut Value,
        array_filters: &[Value],
        evaluator: &dyn Evaluator,
    ) -> Result<BTreeSet<String>, UpdateError> {
        let mut changes = BTreeSet::new();
        for clause in &self.clauses {
            apply_clause(clause, document, array_filters, evaluator, &mut |path| {
                changes.insert(path.to_string());
            })?;
        }
        Ok(changes)
    }
}

fn mismatch(operator: UpdateOperator, field: &str, expected: &'static str, actual: &Value) -> UpdateError {
    UpdateError::TypeMismatch {
        operator: operator.name().to_string(),
        field: field.to_string(),
        expected,
        actual: type_name(actual),
    }
}

fn validate_operand(operator: UpdateOperator, field: &str, value: &Value) -> Result<(), UpdateError> {
    match operator {
        UpdateOperator::Inc | UpdateOperator::Mul if !value.is_number() => {
            Err(mismatch(operator, field, "number", value))
        }
        UpdateOperator::Pop if sort_direction(value).is_none() => Err(UpdateError::InvalidModifier {
            operator: operator.name().to_string(),
            reason: format!("'{field}' must be 1 or -1"),
        }),
        UpdateOperator::PullAll if !value.is_array() => Err(mismatch(operator, field, "array", value)),
        UpdateOperator::CurrentDate => match value {
            Value::Bool(true) => Ok(()),
            Value::Object(m) if matches!(m.get("$type").and_then(Value::as_str), Some("date" | "timestamp")) => Ok(()),
            _ => Err(UpdateError::InvalidModifier {
                operator: operator.name().to_string(),
                reason: format!("'{field}' must be true or {{$type: \"date\" | \"timestamp\"}}"),
            }),
        },
        UpdateOperator::Push | UpdateOperator::AddToSet => PushSpec::parse(operator, value).map(|_| ()),
        _ => Ok(()),
    }
}

/// Emitted path for a selector: the selector up to its first placeholder.
fn changed_path(selector: &str) -> &str {
    match selector.find(".$[") {
        Some(idx) => &selector[..idx],
        None => selector,
    }
}

/// Per-value state prepared once and reused at every target.
enum Prepared {
    Plain,
    Push(PushSpec),
    Pull(PullMatcher),
}

enum PullMatcher {
    Equal(Value),
    Condition(Predicate),
}

impl PullMatcher {
    fn matches(&self, element: &Value) -> bool {
        match self {
            Self::Equal(v) => values_equal(element, v),
            Self::Condition(p) => p(element),
        }
    }
}

fn pull_matcher(value: &Value, evaluator: &dyn Evaluator) -> Result<PullMatcher, UpdateError> {
    let Value::Object(map) = value else {
        return Ok(PullMatcher::Equal(value.clone()));
    };
    if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) {
        // Operator conditions apply to the element itself; wrap it as a field.
        let compiled = evaluator.compile(&json!({ "element": value }))?;
        return Ok(PullMatcher::Condition(std::rc::Rc::new(move |element: &Value| {
            compiled(&json!({ "element": element }))
        })));
    }
    let compiled = evaluator.compile(value)?;
    Ok(PullMatcher::Condition(std::rc::Rc::new(move |element: &Value| {
        element.is_object() && compiled(element)
    })))
}

fn apply_clause(
    clause: &UpdateClause,
    document: &mut Value,
    array_filters: &[Value],
    evaluator: &dyn Evaluator,
    emit: &mut dyn FnMut(&str),
) -> Result<(), UpdateError> {
    let operator = clause.operator;
    walk_expression(&clause.operand, array_filters, evaluator, |selector, node, predicates, value| {
        let prepared = match operator {
            UpdateOperator::Push | UpdateOperator::AddToSet => Prepared::Push(PushSpec::parse(operator, value)?),
            UpdateOperator::Pull => Prepared::Pull(pull_matcher(value, evaluator)?),
            UpdateOperator::PullAll => Prepared::Pull(pull_matcher(&json!({ "$in": value }), evaluator)?),
            _ => Prepared::Plain,
        };
        let changed = apply_update(document, node, predicates, operator.creates_path(), &mut |target| {
            mutate(operator, selector, target, value, &prepared)
        })?;
        if changed {
            emit(changed_path(selector));
        }
        Ok(())
    })
}

fn mutate(
    operator: UpdateOperator,
    field: &str,
    mut target: Target<'_>,
    value: &Value,
    prepared: &Prepared,
) -> Result<bool, UpdateError> {
    match (operator, prepared) {
        (UpdateOperator::Set, _) => {
            if target.get().map_or(false, |cur| values_equal(cur, value)) {
                return Ok(false);
            }
            target.set(value.clone())?;
            Ok(true)
        }
        (UpdateOperator::Unset, _) => Ok(target.remove()),
        (UpdateOperator::Inc, _) => {
            let delta = value.as_number().ok_or_else(|| mismatch(operator, field, "number", value))?;
            let next = match target.get() {
                None => delta.clone(),
                Some(Value::Number(cur)) => arithmetic(Arith::Add, cur, delta)
                    .ok_or_else(|| mismatch(operator, field, "finite number", value))?,
                Some(other) => return Err(mismatch(operator, field, "number", other)),
            };
            target.set(Value::Number(next))?;
            Ok(true)
        }
        (UpdateOperator::Mul, _) => {
            let factor = value.as_number().ok_or_else(|| mismatch(operator, field, "number", value))?;
            let zero = if factor.is_f64() { Number::from_f64(0.0) } else { Some(Number::from(0)) };
            let next = match target.get() {
                None | Some(Value::Null) => zero,
                Some(Value::Number(cur)) => arithmetic(Arith::Mul, cur, factor),
                Some(other) => return Err(mismatch(operator, field, "number", other)),
            }
            .ok_or_else(|| mismatch(operator, field, "finite number", value))?;
            let next = Value::Number(next);
            if target.get().map_or(false, |cur| cur.is_number() && values_equal(cur, &next)) {
                return Ok(false);
            }
            target.set(next)?;
            Ok(true)
        }
        (UpdateOperator::Max | UpdateOperator::Min, _) => {
            let wanted = if operator == UpdateOperator::Max { Ordering::Greater } else { Ordering::Less };
            let replace = target.get().map_or(true, |cur| compare_values(value, cur) == wanted);
            if replace {
                target.set(value.clone())?;
            }
            Ok(replace)
        }
        (UpdateOperator::CurrentDate, _) => {
            let now = Utc::now();
            let stamp = match value.get("$type").and_then(Value::as_str) {
                Some("timestamp") => Value::from(now.timestamp_millis()),
                _ => Value::String(now.to_rfc3339()),
            };
            target.set(stamp)?;
            Ok(true)
        }
        (UpdateOperator::Push, Prepared::Push(spec)) => {
            let current = match target.get() {
                None => None,
                Some(Value::Array(items)) => Some(items.as_slice()),
                Some(other) => return Err(mismatch(operator, field, "array", other)),
            };
            let next = spec.apply(current.unwrap_or(&[]));
            if current.map_or(false, |cur| cur.len() == next.len() && cur.iter().zip(&next).all(|(a, b)| values_equal(a, b))) {
                return Ok(false);
            }
            target.set(Value::Array(next))?;
            Ok(true)
        }
        (UpdateOperator::AddToSet, Prepared::Push(spec)) => {
            let existed = match target.get() {
                None => false,
                Some(Value::Array(_)) => true,
                Some(other) => return Err(mismatch(operator, field, "array", other)),
            };
            if !existed {
                target.set(Value::Array(Vec::new()))?;
            }
            let Some(Value::Array(items)) = target.get_mut() else {
                return Ok(false);
            };
            let before = items.len();
            for candidate in &spec.each {
                if !contains_value(items, candidate) {
                    items.push(candidate.clone());
                }
            }
            Ok(!existed || items.len() != before)
        }
        (UpdateOperator::Pop, _) => {
            let from_front = value.as_i64() == Some(-1);
            match target.get_mut() {
                None => Ok(false),
                Some(Value::Array(items)) if items.is_empty() => Ok(false),
                Some(Value::Array(items)) => {
                    if from_front {
                        items.remove(0);
                    } else {
                        items.pop();
                    }
                    Ok(true)
                }
                Some(other) => Err(mismatch(operator, field, "array", other)),
            }
        }
        (UpdateOperator::Pull | UpdateOperator::PullAll, Prepared::Pull(matcher)) => match target.get_mut() {
            None => Ok(false),
            Some(Value::Array(items)) => {
                let before = items.len();
                items.retain(|item| !matcher.matches(item));
                Ok(items.len() != before)
            }
            Some(other) => Err(mismatch(operator, field, "array", other)),
        },
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::QueryEvaluator;

    fn run(doc: Value, update: Value) -> (Value, BTreeSet<String>) {
        run_with(doc, update, &[])
    }

    fn run_with(mut doc: Value, update: Value, filters: &[Value]) -> (Value, BTreeSet<String>) {
        let expr = UpdateExpression::parse(&update).unwrap();
        let changes = expr.apply(&mut doc, filters, &QueryEvaluator::new()).unwrap();
        (doc, changes)
    }

    fn fields(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| (*p).to_string()).collect()
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        let err = UpdateExpression::parse(&json!({"$rename": {"a": "b"}})).unwrap_err();
        assert!(matches!(err, UpdateError::UnknownOperator { .. }));
        assert!(UpdateExpression::parse(&json!({"$set": 1})).is_err());
        assert!(UpdateExpression::parse(&json!([])).is_err());
    }

    #[test]
    fn test_parse_validates_operands() {
        assert!(UpdateExpression::parse(&json!({"$inc": {"a": "x"}})).is_err());
        assert!(UpdateExpression::parse(&json!({"$pop": {"a": 2}})).is_err());
        assert!(UpdateExpression::parse(&json!({"$pullAll": {"a": 1}})).is_err());
        assert!(UpdateExpression::parse(&json!({"$currentDate": {"a": {"$type": "year"}}})).is_err());
        assert!(UpdateExpression::parse(&json!({"$push": {"a": {"$each": 1}}})).is_err());
        assert!(UpdateExpression::parse(&json!({"$addToSet": {"a": {"$each": [1], "$slice": 1}}})).is_err());
    }

    #[test]
    fn test_operator_names_roundtrip() {
        for op in UpdateOperator::ALL {
            assert_eq!(UpdateOperator::parse(op.name()).unwrap(), op);
        }
    }

    #[test]
    fn test_set() {
        let (doc, changes) = run(json!({"a": 1}), json!({"$set": {"a": 2, "b.c": [1]}}));
        assert_eq!(doc, json!({"a": 2, "b": {"c": [1]}}));
        assert_eq!(changes, fields(&["a", "b.c"]));
    }

    #[test]
    fn test_set_equal_value_is_noop() {
        let (_, changes) = run(json!({"a": {"x": 1}}), json!({"$set": {"a": {"x": 1.0}}}));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_unset() {
        let (doc, changes) = run(json!({"a": 1, "b": 2}), json!({"$unset": {"a": "", "zz": ""}}));
        assert_eq!(doc, json!({"b": 2}));
        assert_eq!(changes, fields(&["a"]));
    }

    #[test]
    fn test_inc_always_emits() {
        let (doc, changes) = run(json!({"n": 1}), json!({"$inc": {"n": 0, "m": 5}}));
        assert_eq!(doc, json!({"n": 1, "m": 5}));
        assert_eq!(changes, fields(&["m", "n"]));
    }

    #[test]
    fn test_inc_type_mismatch() {
        let mut doc = json!({"n": "x"});
        let expr = UpdateExpression::parse(&json!({"$inc": {"n": 1}})).unwrap();
        let err = expr.apply(&mut doc, &[], &QueryEvaluator::new()).unwrap_err();
        assert!(matches!(err, UpdateError::TypeMismatch { .. }));
    }

    #[test]
    fn test_mul() {
        let (doc, changes) = run(json!({"a": 3, "b": null, "c": 5}), json!({"$mul": {"a": 2, "b": 4, "c": 1, "d": 2}}));
        assert_eq!(doc, json!({"a": 6, "b": 0, "c": 5, "d": 0}));
        assert_eq!(changes, fields(&["a", "b", "d"]));
    }

    #[test]
    fn test_max_min() {
        let (doc, changes) = run(json!({"hi": 5, "lo": 5}), json!({"$max": {"hi": 3}, "$min": {"lo": 3}}));
        assert_eq!(doc, json!({"hi": 5, "lo": 3}));
        assert_eq!(changes, fields(&["lo"]));
    }

    #[test]
    fn test_current_date() {
        let (doc, changes) = run(json!({}), json!({"$currentDate": {"at": true, "ts": {"$type": "timestamp"}}}));
        assert!(doc["at"].is_string());
        assert!(doc["ts"].is_i64());
        assert_eq!(changes, fields(&["at", "ts"]));
    }

    #[test]
    fn test_push_modifiers() {
        let (doc, _) = run(
            json!({"xs": [5, 1]}),
            json!({"$push": {"xs": {"$each": [4, 2], "$sort": 1, "$slice": -3}}}),
        );
        assert_eq!(doc, json!({"xs": [2, 4, 5]}));

        let (doc, _) = run(json!({"xs": [1, 2]}), json!({"$push": {"xs": {"$each": [9], "$position": 1}}}));
        assert_eq!(doc, json!({"xs": [1, 9, 2]}));

        let (doc, _) = run(
            json!({"xs": [{"n": 2}]}),
            json!({"$push": {"xs": {"$each": [{"n": 1}], "$sort": {"n": -1}}}}),
        );
        assert_eq!(doc, json!({"xs": [{"n": 2}, {"n": 1}]}));
    }

    #[test]
    fn test_push_creates_and_noop() {
        let (doc, changes) = run(json!({}), json!({"$push": {"xs": 1}}));
        assert_eq!(doc, json!({"xs": [1]}));
        assert_eq!(changes, fields(&["xs"]));

        let (_, changes) = run(json!({"xs": [1, 2]}), json!({"$push": {"xs": {"$each": [3], "$slice": 2}}}));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_add_to_set() {
        let (doc, changes) = run(json!({"xs": [1, 2]}), json!({"$addToSet": {"xs": {"$each": [2, 3, 3]}}}));
        assert_eq!(doc, json!({"xs": [1, 2, 3]}));
        assert_eq!(changes, fields(&["xs"]));

        let (_, changes) = run(json!({"xs": [1, 2]}), json!({"$addToSet": {"xs": 2}}));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_pop() {
        let (doc, changes) = run(json!({"a": [1, 2, 3], "b": [1, 2], "c": []}), json!({"$pop": {"a": 1, "b": -1, "c": 1}}));
        assert_eq!(doc, json!({"a": [1, 2], "b": [2], "c": []}));
        assert_eq!(changes, fields(&["a", "b"]));
    }

    #[test]
    fn test_pull() {
        let (doc, _) = run(json!({"votes": [3, 5, 6, 7]}), json!({"$pull": {"votes": {"$gte": 6}}}));
        assert_eq!(doc, json!({"votes": [3, 5]}));

        let (doc, _) = run(
            json!({"items": [{"q": 1}, {"q": 5}, "x"]}),
            json!({"$pull": {"items": {"q": {"$gt": 2}}}}),
        );
        assert_eq!(doc, json!({"items": [{"q": 1}, "x"]}));

        let (_, changes) = run(json!({"xs": [1]}), json!({"$pull": {"xs": 9}}));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_pull_all() {
        let (doc, changes) = run(json!({"xs": [1, 2, 3, 1]}), json!({"$pullAll": {"xs": [1, 3]}}));
        assert_eq!(doc, json!({"xs": [2]}));
        assert_eq!(changes, fields(&["xs"]));
    }

    #[test]
    fn test_scoped_under_array_filter() {
        let (doc, changes) = run_with(
            json!({"grades": [{"score": 9, "n": 0}, {"score": 2, "n": 0}]}),
            json!({"$inc": {"grades.$[g].n": 1}}),
            &[json!({"g.score": {"$gt": 5}})],
        );
        assert_eq!(doc, json!({"grades": [{"score": 9, "n": 1}, {"score": 2, "n": 0}]}));
        assert_eq!(changes, fields(&["grades"]));
    }

    #[test]
    fn test_push_into_every_nested_array() {
        let (doc, _) = run(
            json!({"rows": [{"xs": [1]}, {"xs": []}]}),
            json!({"$push": {"rows.$[].xs": 0}}),
        );
        assert_eq!(doc, json!({"rows": [{"xs": [1, 0]}, {"xs": [0]}]}));
    }
}
