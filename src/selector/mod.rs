//! Selectors: memoized, observable views of the store's document.
//!
//! A selector pairs a projection with a filter condition. Its value is the
//! projected document when the condition holds and `None` otherwise. The value
//! is computed lazily, cached, and recomputed only when the store reports a
//! change to one of the selector's dependency paths.
//!
//! ```text
//! Uncached --get/listen--> Cached(v) --relevant update--> recompute
//!                                      |
//!                                      +-- value changed --> listeners
//! ```
//!
//! Listener callbacks may update the store re-entrantly. No interior borrow is
//! held while a callback runs.

pub mod listener;
pub mod stream;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::{trace, warn};

use crate::analyzer::{condition_fields, projection_fields, reads_whole_document};
use crate::error::{ExpressionError, SelectorError, SelectorResult};
use crate::evaluator::{Evaluator, Predicate};
use crate::path::same_ancestor;
use crate::value::{canonicalize, optional_equal};

pub use listener::{ListenMode, Listener, ListenerId, ListenerResult};
use listener::ListenerRegistry;
pub use stream::{SelectorEvent, SelectorStream};

/// Structural identity of a `(projection, condition)` pair.
///
/// Equal specs hash to the same key because `serde_json` object keys
/// serialize in sorted order. Integral floats are hashed as integers, so
/// `{"a": 1.0}` and `{"a": 1}` share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectorKey(blake3::Hash);

impl SelectorKey {
    /// Computes the key for a projection and condition.
    #[must_use]
    pub fn of(projection: &Value, condition: &Value) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(canonicalize(projection).to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(canonicalize(condition).to_string().as_bytes());
        Self(hasher.finalize())
    }
}

impl fmt::Display for SelectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

/// Paths a selector depends on. An empty set means "every path".
#[must_use]
pub fn dependencies_of(projection: &Value, condition: &Value) -> BTreeSet<String> {
    let unshaped = match projection {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if unshaped || reads_whole_document(projection) || reads_whole_document(condition) {
        return BTreeSet::new();
    }
    let projected = projection_fields(projection);
    if projected.is_empty() {
        return BTreeSet::new();
    }
    let mut deps = condition_fields(condition);
    deps.extend(projected);
    deps
}

#[derive(Debug, Clone)]
enum CacheState {
    Uncached,
    Cached(Option<Value>),
}

/// A memoized, observable view of the store.
///
/// Obtained from [`Store::select`](crate::Store::select); structurally equal
/// requests return the same `Rc<Selector>`.
pub struct Selector {
    key: SelectorKey,
    projection: Value,
    condition: Value,
    dependencies: BTreeSet<String>,
    predicate: Predicate,
    document: Rc<RefCell<Value>>,
    evaluator: Rc<dyn Evaluator>,
    cache: RefCell<CacheState>,
    listeners: RefCell<ListenerRegistry>,
    stream_capacity: usize,
}

impl Selector {
    pub(crate) fn new(
        projection: Value,
        condition: Value,
        document: Rc<RefCell<Value>>,
        evaluator: Rc<dyn Evaluator>,
        stream_capacity: usize,
    ) -> Result<Self, ExpressionError> {
        let predicate = evaluator.compile(&condition)?;
        Ok(Self {
            key: SelectorKey::of(&projection, &condition),
            dependencies: dependencies_of(&projection, &condition),
            projection,
            condition,
            predicate,
            document,
            evaluator,
            cache: RefCell::new(CacheState::Uncached),
            listeners: RefCell::new(ListenerRegistry::default()),
            stream_capacity,
        })
    }

    /// Structural identity of this selector.
    #[must_use]
    pub const fn key(&self) -> SelectorKey {
        self.key
    }

    /// The projection this selector was created with.
    #[must_use]
    pub const fn projection(&self) -> &Value {
        &self.projection
    }

    /// The filter condition this selector was created with.
    #[must_use]
    pub const fn condition(&self) -> &Value {
        &self.condition
    }

    /// Dependency paths; empty when the selector observes every change.
    #[must_use]
    pub const fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Returns true if every update is relevant to this selector.
    #[must_use]
    pub fn observes_everything(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Returns true if any changed path is an ancestor of, descendant of, or
    /// equal to one of this selector's dependencies.
    #[must_use]
    pub fn is_affected_by<S: AsRef<str>>(&self, changed: &[S]) -> bool {
        self.observes_everything() || self.dependencies.iter().any(|dep| same_ancestor(changed, dep))
    }

    /// Current value: the projected document, or `None` when the condition
    /// does not hold. Served from cache when valid.
    pub fn get(&self) -> SelectorResult<Option<Value>> {
        if let CacheState::Cached(value) = &*self.cache.borrow() {
            return Ok(value.clone());
        }
        let value = self.compute()?;
        *self.cache.borrow_mut() = CacheState::Cached(value.clone());
        Ok(value)
    }

    fn compute(&self) -> Result<Option<Value>, ExpressionError> {
        let document = self.document.borrow();
        if !(self.predicate)(&*document) {
            return Ok(None);
        }
        self.evaluator.project(&*document, &self.projection).map(Some)
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Mode `listener` is registered in, if any.
    #[must_use]
    pub fn listener_mode(&self, listener: &Listener) -> Option<ListenMode> {
        self.listeners.borrow().mode_of(listener.id())
    }

    /// Registers a listener invoked on every change of this selector's value.
    ///
    /// Registering the same listener again is a no-op; registering one that
    /// is already in once mode fails.
    pub fn listen(&self, listener: &Listener) -> SelectorResult<()> {
        self.register(listener, ListenMode::Repeat)
    }

    /// Registers a listener invoked on the next change only.
    pub fn listen_once(&self, listener: &Listener) -> SelectorResult<()> {
        self.register(listener, ListenMode::Once)
    }

    /// Like [`listen`](Self::listen), then invokes the listener with the
    /// current value if it is defined.
    ///
    /// If that invocation fails the listener is removed again and the
    /// failure is returned.
    pub fn listen_immediately(&self, listener: &Listener) -> SelectorResult<()> {
        self.register_immediately(listener, ListenMode::Repeat)
    }

    /// Like [`listen_once`](Self::listen_once), then invokes the listener
    /// with the current value if it is defined, consuming the registration.
    pub fn listen_once_immediately(&self, listener: &Listener) -> SelectorResult<()> {
        self.register_immediately(listener, ListenMode::Once)
    }

    /// Removes `listener` from either mode. Returns whether it was present.
    pub fn remove_listener(&self, listener: &Listener) -> bool {
        self.listeners.borrow_mut().remove(listener.id())
    }

    /// Opens a channel-backed stream of this selector's values.
    pub fn stream(self: &Rc<Self>) -> SelectorResult<SelectorStream> {
        SelectorStream::open(self, self.stream_capacity)
    }

    fn register(&self, listener: &Listener, mode: ListenMode) -> SelectorResult<()> {
        if self.listeners.borrow_mut().insert(listener, mode)? {
            trace!(selector = %self.key, listener = %listener.id(), %mode, "listener registered");
            self.prime();
        }
        Ok(())
    }

    /// Caches the current value so the next relevant update is compared
    /// against what a new listener could observe now.
    fn prime(&self) {
        if let Err(err) = self.get() {
            warn!(selector = %self.key, error = %err, "could not compute value at registration");
        }
    }

    fn register_immediately(&self, listener: &Listener, mode: ListenMode) -> SelectorResult<()> {
        self.register(listener, mode)?;
        let current = match self.get() {
            Ok(value) => value,
            Err(err) => {
                self.remove_listener(listener);
                return Err(err);
            }
        };
        let Some(current) = current else {
            return Ok(());
        };
        if mode == ListenMode::Once {
            self.remove_listener(listener);
        }
        listener.invoke(Some(&current)).map_err(|source| {
            self.remove_listener(listener);
            SelectorError::ImmediateInvocation { source }
        })
    }

    /// Recomputes the value after a relevant change and notifies listeners
    /// if it differs from the cached one. Returns the number of listener
    /// invocations. A value that was never computed counts as different.
    ///
    /// Without listeners this only drops the cache; the next [`get`](Self::get)
    /// recomputes.
    pub(crate) fn notify_all(&self) -> usize {
        if self.listeners.borrow().is_empty() {
            *self.cache.borrow_mut() = CacheState::Uncached;
            return 0;
        }
        let previous = std::mem::replace(&mut *self.cache.borrow_mut(), CacheState::Uncached);
        let current = match self.compute() {
            Ok(value) => value,
            Err(err) => {
                warn!(selector = %self.key, error = %err, "selector recomputation failed");
                return 0;
            }
        };
        *self.cache.borrow_mut() = CacheState::Cached(current.clone());
        if let CacheState::Cached(previous) = &previous {
            if optional_equal(previous.as_ref(), current.as_ref()) {
                trace!(selector = %self.key, "value unchanged");
                return 0;
            }
        }
        self.fan_out(current.as_ref())
    }

    fn fan_out(&self, value: Option<&Value>) -> usize {
        let order = self.listeners.borrow().ids();
        let mut invoked = 0;
        for id in order {
            let entry = self.listeners.borrow().get(id);
            let Some((listener, mode)) = entry else {
                continue;
            };
            if mode == ListenMode::Once {
                self.listeners.borrow_mut().remove(id);
            }
            invoked += 1;
            if let Err(err) = listener.invoke(value) {
                warn!(selector = %self.key, listener = %id, error = %err, "listener failed, removing it");
                self.listeners.borrow_mut().remove(id);
            }
        }
        invoked
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("key", &self.key)
            .field("projection", &self.projection)
            .field("condition", &self.condition)
            .field("dependencies", &self.dependencies)
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::QueryEvaluator;
    use serde_json::json;
    use std::cell::Cell;

    fn selector(doc: &Rc<RefCell<Value>>, projection: Value, condition: Value) -> Rc<Selector> {
        Rc::new(
            Selector::new(projection, condition, Rc::clone(doc), Rc::new(QueryEvaluator::new()), 8)
                .unwrap(),
        )
    }

    fn counting(count: &Rc<Cell<usize>>) -> Listener {
        let count = Rc::clone(count);
        Listener::new(move |_| {
            count.set(count.get() + 1);
            Ok(())
        })
    }

    #[test]
    fn test_dependencies_of() {
        let deps = dependencies_of(&json!({"name": 1}), &json!({"age": {"$gt": 30}}));
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["age", "name"]);
        assert!(dependencies_of(&Value::Null, &json!({"age": 1})).is_empty());
        assert!(dependencies_of(&json!({}), &Value::Null).is_empty());
        assert!(dependencies_of(&json!({"doc": "$$ROOT"}), &Value::Null).is_empty());
    }

    #[test]
    fn test_key_is_structural() {
        let a = SelectorKey::of(&json!({"a": 1, "b": 1}), &json!({}));
        let b = SelectorKey::of(&json!({"b": 1, "a": 1}), &json!({}));
        assert_eq!(a, b);
        assert_ne!(a, SelectorKey::of(&json!({"a": 1}), &json!({})));
        assert_eq!(
            SelectorKey::of(&json!({"a": 1.0}), &json!({"n": {"$gt": 2.0}})),
            SelectorKey::of(&json!({"a": 1}), &json!({"n": {"$gt": 2}}))
        );
        assert_ne!(
            SelectorKey::of(&json!({"a": 1}), &json!({"n": 2.5})),
            SelectorKey::of(&json!({"a": 1}), &json!({"n": 2}))
        );
        assert_eq!(a.to_string().len(), 64);
    }

    #[test]
    fn test_get_caches_until_notified() {
        let doc = Rc::new(RefCell::new(json!({"name": "John"})));
        let sel = selector(&doc, json!({"name": 1}), Value::Null);
        assert_eq!(sel.get().unwrap(), Some(json!({"name": "John"})));

        *doc.borrow_mut() = json!({"name": "Kwame"});
        assert_eq!(sel.get().unwrap(), Some(json!({"name": "John"})));

        assert_eq!(sel.notify_all(), 0);
        assert_eq!(sel.get().unwrap(), Some(json!({"name": "Kwame"})));
    }

    #[test]
    fn test_condition_false_is_none() {
        let doc = Rc::new(RefCell::new(json!({"age": 20})));
        let sel = selector(&doc, json!({"age": 1}), json!({"age": {"$gt": 30}}));
        assert_eq!(sel.get().unwrap(), None);
    }

    #[test]
    fn test_notify_skips_unchanged_value() {
        let doc = Rc::new(RefCell::new(json!({"name": "John", "age": 1})));
        let sel = selector(&doc, json!({"name": 1}), Value::Null);
        let count = Rc::new(Cell::new(0));
        sel.listen(&counting(&count)).unwrap();

        doc.borrow_mut()["age"] = json!(2);
        assert_eq!(sel.notify_all(), 0);
        assert_eq!(count.get(), 0);

        doc.borrow_mut()["name"] = json!("Kwame");
        assert_eq!(sel.notify_all(), 1);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_listen_primes_cache() {
        let doc = Rc::new(RefCell::new(json!({"age": 20})));
        let sel = selector(&doc, json!({"age": 1}), json!({"age": {"$gt": 30}}));
        let count = Rc::new(Cell::new(0));
        sel.listen(&counting(&count)).unwrap();

        doc.borrow_mut()["age"] = json!(25);
        assert_eq!(sel.notify_all(), 0);
        doc.borrow_mut()["age"] = json!(31);
        assert_eq!(sel.notify_all(), 1);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_relisten_after_last_listener_left() {
        let doc = Rc::new(RefCell::new(json!({"n": 0})));
        let sel = selector(&doc, json!({"n": 1}), json!({"n": {"$gt": 5}}));
        let count = Rc::new(Cell::new(0));
        let first = counting(&count);
        sel.listen(&first).unwrap();
        sel.remove_listener(&first);

        doc.borrow_mut()["n"] = json!(1);
        assert_eq!(sel.notify_all(), 0);

        sel.listen(&counting(&count)).unwrap();
        doc.borrow_mut()["n"] = json!(2);
        assert_eq!(sel.notify_all(), 0);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_notify_without_previous_value_always_fires() {
        let doc = Rc::new(RefCell::new(json!({"name": "John"})));
        let sel = selector(&doc, json!({"name": 1}), Value::Null);
        let count = Rc::new(Cell::new(0));
        sel.listen(&counting(&count)).unwrap();
        *sel.cache.borrow_mut() = CacheState::Uncached;
        assert_eq!(sel.notify_all(), 1);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_once_listener_removed_before_invocation() {
        let doc = Rc::new(RefCell::new(json!({"n": 0})));
        let sel = selector(&doc, json!({"n": 1}), Value::Null);
        let seen = Rc::new(Cell::new(None));
        let probe = Rc::clone(&sel);
        let observed = Rc::clone(&seen);
        let listener = Listener::new(move |_| {
            observed.set(Some(probe.listener_count()));
            Ok(())
        });
        sel.listen_once(&listener).unwrap();
        doc.borrow_mut()["n"] = json!(1);
        assert_eq!(sel.notify_all(), 1);
        assert_eq!(seen.get(), Some(0));
        assert_eq!(sel.listener_count(), 0);
    }

    #[test]
    fn test_failing_listener_removed() {
        let doc = Rc::new(RefCell::new(json!({"n": 0})));
        let sel = selector(&doc, json!({"n": 1}), Value::Null);
        let count = Rc::new(Cell::new(0));
        sel.listen(&Listener::new(|_| Err("boom".into()))).unwrap();
        sel.listen(&counting(&count)).unwrap();

        doc.borrow_mut()["n"] = json!(1);
        assert_eq!(sel.notify_all(), 2);
        assert_eq!(sel.listener_count(), 1);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_listener_removing_later_listener() {
        let doc = Rc::new(RefCell::new(json!({"n": 0})));
        let sel = selector(&doc, json!({"n": 1}), Value::Null);
        let count = Rc::new(Cell::new(0));
        let victim = counting(&count);
        let probe = Rc::clone(&sel);
        let target = victim.clone();
        sel.listen(&Listener::new(move |_| {
            probe.remove_listener(&target);
            Ok(())
        }))
        .unwrap();
        sel.listen(&victim).unwrap();

        doc.borrow_mut()["n"] = json!(1);
        assert_eq!(sel.notify_all(), 1);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_listen_immediately_defined_and_undefined() {
        let doc = Rc::new(RefCell::new(json!({"age": 20})));
        let count = Rc::new(Cell::new(0));

        let hidden = selector(&doc, json!({"age": 1}), json!({"age": {"$gt": 30}}));
        hidden.listen_immediately(&counting(&count)).unwrap();
        assert_eq!(count.get(), 0);
        assert_eq!(hidden.listener_count(), 1);

        let visible = selector(&doc, json!({"age": 1}), Value::Null);
        visible.listen_immediately(&counting(&count)).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_listen_once_immediately_consumes_registration() {
        let doc = Rc::new(RefCell::new(json!({"n": 1})));
        let sel = selector(&doc, json!({"n": 1}), Value::Null);
        let count = Rc::new(Cell::new(0));
        sel.listen_once_immediately(&counting(&count)).unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(sel.listener_count(), 0);
    }

    #[test]
    fn test_listen_immediately_failure_unregisters() {
        let doc = Rc::new(RefCell::new(json!({"n": 1})));
        let sel = selector(&doc, json!({"n": 1}), Value::Null);
        let err = sel
            .listen_immediately(&Listener::new(|_| Err("nope".into())))
            .unwrap_err();
        assert!(matches!(err, SelectorError::ImmediateInvocation { .. }));
        assert_eq!(sel.listener_count(), 0);
    }

    #[test]
    fn test_mode_conflict() {
        let doc = Rc::new(RefCell::new(json!({})));
        let sel = selector(&doc, json!({"n": 1}), Value::Null);
        let l = Listener::new(|_| Ok(()));
        sel.listen(&l).unwrap();
        sel.listen(&l).unwrap();
        assert!(sel.listen_once(&l).is_err());
        assert_eq!(sel.listener_mode(&l), Some(ListenMode::Repeat));
        assert!(sel.remove_listener(&l));
        sel.listen_once(&l).unwrap();
        assert_eq!(sel.listener_mode(&l), Some(ListenMode::Once));
    }

    #[test]
    fn test_is_affected_by() {
        let doc = Rc::new(RefCell::new(json!({})));
        let sel = selector(&doc, json!({"user.name": 1}), Value::Null);
        assert!(sel.is_affected_by(&["user"]));
        assert!(sel.is_affected_by(&["user.name.first"]));
        assert!(!sel.is_affected_by(&["user.age"]));
        assert!(!sel.is_affected_by(&["username"]));

        let all = selector(&doc, Value::Null, Value::Null);
        assert!(all.is_affected_by(&["anything"]));
    }

    #[test]
    fn test_stream_receives_values() {
        let doc = Rc::new(RefCell::new(json!({"n": 0})));
        let sel = selector(&doc, json!({"n": 1}), Value::Null);
        let stream = sel.stream().unwrap();
        assert_eq!(sel.listener_count(), 1);

        doc.borrow_mut()["n"] = json!(1);
        sel.notify_all();
        let event = stream.try_recv().unwrap().unwrap();
        assert_eq!(event.value, Some(json!({"n": 1})));
        assert!(stream.try_recv().unwrap().is_none());

        drop(stream);
        assert_eq!(sel.listener_count(), 0);
    }

    #[test]
    fn test_stream_drops_when_full() {
        let doc = Rc::new(RefCell::new(json!({"n": 0})));
        let sel = Rc::new(
            Selector::new(json!({"n": 1}), Value::Null, Rc::clone(&doc), Rc::new(QueryEvaluator::new()), 1)
                .unwrap(),
        );
        let stream = sel.stream().unwrap();
        for n in 1..=3 {
            doc.borrow_mut()["n"] = json!(n);
            sel.notify_all();
        }
        assert_eq!(stream.pending(), 1);
        assert_eq!(stream.dropped(), 2);
        assert_eq!(stream.drain().len(), 1);
        stream.unsubscribe();
        stream.unsubscribe();
        assert_eq!(sel.listener_count(), 0);
    }
}
