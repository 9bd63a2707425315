//! The document store.
//!
//! A [`Store`] owns one JSON document, applies declarative updates to it and
//! notifies the [`Selector`]s whose dependency paths intersect the changed
//! paths. Everything runs synchronously on the caller's thread: when
//! [`Store::update`] returns, every affected listener has already run.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, debug_span, trace};

use crate::analyzer::update_fields;
use crate::error::{StateResult, StoreError};
use crate::evaluator::{Evaluator, QueryEvaluator};
use crate::selector::{Selector, SelectorKey};
use crate::update::UpdateExpression;
use crate::value::type_name;

/// Store tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Keep a snapshot of the whole document between updates so repeated
    /// [`Store::state`] calls do not clone it.
    pub cache_full_state: bool,
    /// Buffer size of channels opened with [`Selector::stream`].
    pub stream_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_full_state: true,
            stream_capacity: 1024,
        }
    }
}

/// Optional inputs to [`Store::update_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    array_filters: Vec<Value>,
    condition: Option<Value>,
}

impl UpdateOptions {
    /// No filters, no condition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an array filter document (`{"elem.score": {"$gt": 5}}`).
    #[must_use]
    pub fn array_filter(mut self, filter: Value) -> Self {
        self.array_filters.push(filter);
        self
    }

    /// Replaces the array filters.
    #[must_use]
    pub fn array_filters(mut self, filters: Vec<Value>) -> Self {
        self.array_filters = filters;
        self
    }

    /// Only apply the update if the document matches `condition`.
    #[must_use]
    pub fn condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Outcome of an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Whether the document changed.
    pub modified: bool,
    /// Changed paths, sorted.
    pub fields: Vec<String>,
    /// Listener invocations triggered by this update, excluding nested
    /// updates made from listeners.
    pub notifications: usize,
}

impl UpdateResult {
    fn unmodified() -> Self {
        Self::default()
    }
}

struct StoreInner {
    config: StoreConfig,
    document: Rc<RefCell<Value>>,
    evaluator: Rc<dyn Evaluator>,
    selectors: RefCell<Vec<Rc<Selector>>>,
    index: RefCell<HashMap<SelectorKey, Rc<Selector>>>,
    full_state: RefCell<Option<Value>>,
}

/// A reactive document store.
///
/// `Store` is a cheap handle; clones share the same document and selectors.
/// It is single-threaded (`!Send`) because listeners run inline and may call
/// back into the store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    /// Creates a store with the default configuration and evaluator.
    ///
    /// # Errors
    ///
    /// Fails if `document` is not an object.
    pub fn new(document: Value) -> StateResult<Self> {
        Self::with_config(document, StoreConfig::default())
    }

    /// Creates a store with a custom configuration.
    pub fn with_config(document: Value, config: StoreConfig) -> StateResult<Self> {
        Self::with_evaluator(document, config, QueryEvaluator::new())
    }

    /// Creates a store with a custom expression evaluator.
    pub fn with_evaluator<E>(document: Value, config: StoreConfig, evaluator: E) -> StateResult<Self>
    where
        E: Evaluator + 'static,
    {
        if !document.is_object() {
            return Err(StoreError::InvalidDocument {
                actual: type_name(&document),
            }
            .into());
        }
        Ok(Self {
            inner: Rc::new(StoreInner {
                config,
                document: Rc::new(RefCell::new(document)),
                evaluator: Rc::new(evaluator),
                selectors: RefCell::new(Vec::new()),
                index: RefCell::new(HashMap::new()),
                full_state: RefCell::new(None),
            }),
        })
    }

    /// The store's configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Number of distinct selectors created so far.
    #[must_use]
    pub fn selector_count(&self) -> usize {
        self.inner.selectors.borrow().len()
    }

    /// A copy of the whole document.
    #[must_use]
    pub fn state(&self) -> Value {
        if !self.inner.config.cache_full_state {
            return self.inner.document.borrow().clone();
        }
        if let Some(snapshot) = self.inner.full_state.borrow().as_ref() {
            return snapshot.clone();
        }
        let snapshot = self.inner.document.borrow().clone();
        *self.inner.full_state.borrow_mut() = Some(snapshot.clone());
        snapshot
    }

    /// Evaluates a projection and condition against the current document
    /// without creating a selector.
    pub fn get_state(&self, projection: &Value, condition: &Value) -> StateResult<Option<Value>> {
        validate_projection(projection)?;
        validate_condition(condition)?;
        if is_empty_spec(projection) && is_empty_spec(condition) {
            return Ok(Some(self.state()));
        }
        let predicate = self.inner.evaluator.compile(condition)?;
        let document = self.inner.document.borrow();
        if !predicate(&*document) {
            return Ok(None);
        }
        Ok(Some(self.inner.evaluator.project(&*document, projection)?))
    }

    /// Returns the selector for `projection` and `condition`, creating it on
    /// first use.
    ///
    /// Structurally equal arguments always return the same selector.
    /// A `null` or empty projection selects the whole document.
    ///
    /// # Errors
    ///
    /// Fails on exclusion projections, non-object conditions, and
    /// conditions the evaluator rejects.
    pub fn select(&self, projection: Value, condition: Value) -> StateResult<Rc<Selector>> {
        validate_projection(&projection)?;
        validate_condition(&condition)?;
        let key = SelectorKey::of(&projection, &condition);
        if let Some(existing) = self.inner.index.borrow().get(&key) {
            return Ok(Rc::clone(existing));
        }
        let selector = Rc::new(Selector::new(
            projection,
            condition,
            Rc::clone(&self.inner.document),
            Rc::clone(&self.inner.evaluator),
            self.inner.config.stream_capacity,
        )?);
        debug!(
            selector = %key,
            dependencies = ?selector.dependencies(),
            "selector created"
        );
        self.inner.selectors.borrow_mut().push(Rc::clone(&selector));
        self.inner.index.borrow_mut().insert(key, Rc::clone(&selector));
        Ok(selector)
    }

    /// Applies an update expression and notifies affected selectors.
    pub fn update(&self, expression: &Value) -> StateResult<UpdateResult> {
        self.update_with(expression, &UpdateOptions::default())
    }

    /// Applies an update expression with array filters and/or a guard
    /// condition.
    ///
    /// The update is atomic: if any operator fails, the document is left
    /// unchanged and no listener runs.
    pub fn update_with(&self, expression: &Value, options: &UpdateOptions) -> StateResult<UpdateResult> {
        let span = debug_span!("store.update");
        let _entered = span.enter();

        let parsed = UpdateExpression::parse(expression)?;
        trace!(targets = ?update_fields(expression), "update parsed");
        if let Some(condition) = &options.condition {
            validate_condition(condition)?;
            let predicate = self.inner.evaluator.compile(condition)?;
            if !predicate(&*self.inner.document.borrow()) {
                debug!("update condition not met");
                return Ok(UpdateResult::unmodified());
            }
        }

        let mut working = self.inner.document.borrow().clone();
        let changed = parsed.apply(&mut working, &options.array_filters, self.inner.evaluator.as_ref())?;
        if changed.is_empty() {
            debug!("update changed nothing");
            return Ok(UpdateResult::unmodified());
        }
        *self.inner.document.borrow_mut() = working;
        self.inner.full_state.borrow_mut().take();

        let fields: Vec<String> = changed.into_iter().collect();
        let selectors: Vec<Rc<Selector>> = self.inner.selectors.borrow().clone();
        let mut notifications = 0;
        for selector in selectors {
            if selector.is_affected_by(&fields) {
                notifications += selector.notify_all();
            } else {
                trace!(selector = %selector.key(), "selector unaffected");
            }
        }
        debug!(fields = ?fields, notifications, "update applied");
        Ok(UpdateResult {
            modified: true,
            fields,
            notifications,
        })
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("selectors", &self.selector_count())
            .finish_non_exhaustive()
    }
}

fn is_empty_spec(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn validate_condition(condition: &Value) -> Result<(), StoreError> {
    if condition.is_null() || condition.is_object() {
        Ok(())
    } else {
        Err(StoreError::InvalidCondition {
            actual: type_name(condition),
        })
    }
}

/// Accepts inclusion projections: `1`/`true`, field references, nested
/// projections and operator expressions.
fn validate_projection(projection: &Value) -> Result<(), StoreError> {
    let map = match projection {
        Value::Null => return Ok(()),
        Value::Object(map) => map,
        other => {
            return Err(StoreError::InvalidProjection {
                field: String::new(),
                reason: format!("projection must be an object, got {}", type_name(other)),
            })
        }
    };
    for (field, spec) in map {
        let ok = match spec {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64() == Some(1.0),
            Value::String(s) => s.starts_with('$'),
            Value::Object(_) | Value::Array(_) => true,
            Value::Null => false,
        };
        if !ok {
            let reason = match spec {
                Value::Bool(false) | Value::Number(_) => "exclusion projections are not supported".to_string(),
                other => format!("unsupported projection value {other}"),
            };
            return Err(StoreError::InvalidProjection {
                field: field.clone(),
                reason,
            });
        }
    }
    Ok(())
}
