//! Locating and mutating update targets.
//!
//! [`apply_update`] resolves a [`PathNode`] chain inside a document, filters
//! array elements through the per-identifier predicates, and hands each
//! resolved location to a mutation callback as a [`Target`].

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::error::UpdateError;
use crate::evaluator::{Evaluator, Predicate};

use super::path_node::{tokenize_path, PathNode};

/// Largest number of `null` slots a single write may pad an array with.
pub const MAX_ARRAY_PADDING: usize = 1_500_000;

/// Length an array must grow to so that `index` is addressable.
fn padded_len(len: usize, index: usize) -> Result<usize, UpdateError> {
    let out_of_range = || UpdateError::IndexOutOfRange {
        index,
        limit: MAX_ARRAY_PADDING,
    };
    if index.saturating_sub(len) > MAX_ARRAY_PADDING {
        return Err(out_of_range());
    }
    index.checked_add(1).ok_or_else(out_of_range)
}

/// Array-filter predicates keyed by placeholder identifier.
pub type Predicates = HashMap<String, Predicate>;

/// A mutable location inside the document.
#[derive(Debug)]
pub enum Target<'a> {
    /// A key of an object (possibly absent).
    Field {
        /// Containing object.
        map: &'a mut Map<String, Value>,
        /// Field name.
        key: String,
    },
    /// A slot of an array (possibly past the end).
    Element {
        /// Containing array.
        items: &'a mut Vec<Value>,
        /// Element index.
        index: usize,
    },
}

impl<'a> Target<'a> {
    fn resolve(container: &'a mut Value, key: &str) -> Option<Self> {
        match container {
            Value::Object(map) => Some(Self::Field {
                map,
                key: key.to_string(),
            }),
            Value::Array(items) => key.parse().ok().map(|index| Self::Element { items, index }),
            _ => None,
        }
    }

    /// Current value, if present.
    #[must_use]
    pub fn get(&self) -> Option<&Value> {
        match self {
            Self::Field { map, key } => map.get(key),
            Self::Element { items, index } => items.get(*index),
        }
    }

    /// Mutable access to the current value, if present.
    pub fn get_mut(&mut self) -> Option<&mut Value> {
        match self {
            Self::Field { map, key } => map.get_mut(key),
            Self::Element { items, index } => items.get_mut(*index),
        }
    }

    /// Writes `value`, padding arrays with `null` when writing past the end.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::IndexOutOfRange`] when the write would pad the
    /// array by more than [`MAX_ARRAY_PADDING`] elements.
    pub fn set(&mut self, value: Value) -> Result<(), UpdateError> {
        match self {
            Self::Field { map, key } => {
                map.insert(key.clone(), value);
            }
            Self::Element { items, index } => {
                if *index >= items.len() {
                    let len = padded_len(items.len(), *index)?;
                    items.resize(len, Value::Null);
                }
                items[*index] = value;
            }
        }
        Ok(())
    }

    /// Removes the value. Array slots are nulled rather than shifted.
    pub fn remove(&mut self) -> bool {
        match self {
            Self::Field { map, key } => map.remove(key.as_str()).is_some(),
            Self::Element { items, index } => match items.get_mut(*index) {
                Some(slot) if !slot.is_null() => {
                    *slot = Value::Null;
                    true
                }
                _ => false,
            },
        }
    }
}

/// Walks `segments` down from `root`, optionally creating missing objects.
fn navigate<'v>(
    root: &'v mut Value,
    segments: &[&str],
    create: bool,
) -> Result<Option<&'v mut Value>, UpdateError> {
    let mut cursor = root;
    for seg in segments {
        cursor = match cursor {
            Value::Object(map) => {
                if !map.contains_key(*seg) {
                    if !create {
                        return Ok(None);
                    }
                    map.insert((*seg).to_string(), Value::Object(Map::new()));
                }
                match map.get_mut(*seg) {
                    Some(next) => next,
                    None => return Ok(None),
                }
            }
            Value::Array(items) => {
                let Ok(index) = seg.parse::<usize>() else {
                    return Ok(None);
                };
                if index >= items.len() {
                    if !create {
                        return Ok(None);
                    }
                    let len = padded_len(items.len(), index)?;
                    items.resize(len, Value::Null);
                    items[index] = Value::Object(Map::new());
                }
                match items.get_mut(index) {
                    Some(next) => next,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
    }
    Ok(Some(cursor))
}

/// Applies `mutate` at every location `node` resolves to inside `value`.
///
/// Returns whether any invocation of `mutate` reported a change. Locations
/// that cannot be resolved (missing arrays, scalar intermediates) are skipped.
pub fn apply_update(
    value: &mut Value,
    node: &PathNode,
    predicates: &Predicates,
    create: bool,
    mutate: &mut dyn FnMut(Target<'_>) -> Result<bool, UpdateError>,
) -> Result<bool, UpdateError> {
    let segments = node.segments();
    let Some(child) = &node.child else {
        let Some((last, parents)) = segments.split_last() else {
            return Ok(false);
        };
        let Some(container) = navigate(value, parents, create)? else {
            return Ok(false);
        };
        return match Target::resolve(container, last) {
            Some(target) => mutate(target),
            None => Ok(false),
        };
    };

    let Some(Value::Array(items)) = navigate(value, &segments, false)? else {
        return Ok(false);
    };
    let predicate = predicates.get(child);
    let mut changed = false;
    for index in 0..items.len() {
        if let Some(test) = predicate {
            if !test(&items[index]) {
                continue;
            }
        }
        changed |= match &node.next {
            Some(next) => apply_update(&mut items[index], next, predicates, create, mutate)?,
            None => mutate(Target::Element {
                items: &mut *items,
                index,
            })?,
        };
    }
    Ok(changed)
}

/// Builds the predicate for `identifier` from every array-filter fragment
/// keyed by the identifier or a path under it.
fn build_predicate(
    identifier: &str,
    array_filters: &[Value],
    evaluator: &dyn Evaluator,
) -> Result<Option<Predicate>, UpdateError> {
    let nested_prefix = format!("{identifier}.");
    let mut merged = Map::new();
    for filter in array_filters {
        let Value::Object(fragment) = filter else {
            return Err(UpdateError::InvalidArrayFilter {
                reason: "each array filter must be an object".to_string(),
            });
        };
        for (key, cond) in fragment {
            if key == identifier || key.starts_with(&nested_prefix) {
                merged.insert(key.clone(), cond.clone());
            }
        }
    }
    if merged.is_empty() {
        return Ok(None);
    }
    let compiled = evaluator.compile(&Value::Object(merged))?;
    let name = identifier.to_string();
    Ok(Some(Rc::new(move |element: &Value| {
        let mut wrapper = Map::with_capacity(1);
        wrapper.insert(name.clone(), element.clone());
        compiled(&Value::Object(wrapper))
    })))
}

/// Visits every `(selector, value)` pair of an operator operand with its
/// tokenized path and array-filter predicates.
pub fn walk_expression(
    operand: &Map<String, Value>,
    array_filters: &[Value],
    evaluator: &dyn Evaluator,
    mut callback: impl FnMut(&str, &PathNode, &Predicates, &Value) -> Result<(), UpdateError>,
) -> Result<(), UpdateError> {
    let none = Predicates::new();
    for (selector, value) in operand {
        let (node, identifiers) = tokenize_path(selector)?;
        if node.is_plain() {
            callback(selector, &node, &none, value)?;
            continue;
        }
        let mut predicates = Predicates::with_capacity(identifiers.len());
        for identifier in &identifiers {
            if let Some(p) = build_predicate(identifier, array_filters, evaluator)? {
                predicates.insert(identifier.clone(), p);
            }
        }
        callback(selector, &node, &predicates, value)?;
    }
    Ok(())
}
