//! # KyroState - Dependency-Aware Reactive Document Store
//!
//! KyroState holds a single JSON document, applies MongoDB-style update
//! expressions to it, and keeps memoized [`Selector`]s over it up to date.
//! Every selector knows statically which field paths it reads; an update only
//! recomputes the selectors whose paths it touched, and only notifies
//! listeners when a selector's value actually changed.
//!
//! ## Core Concepts
//!
//! - **Store**: owner of the document and the selector registry
//! - **Selector**: a `(projection, condition)` view with cached value and listeners
//! - **Update expression**: `{"$set": {...}, "$push": {...}}` with array filters
//! - **Dependency analysis**: the field paths an expression reads or writes
//!
//! ## Usage
//!
//! ```rust
//! use kyrostate::{Listener, Store};
//! use serde_json::{json, Value};
//!
//! let store = Store::new(json!({"name": "John", "age": 40}))?;
//! let names = store.select(json!({"name": 1}), Value::Null)?;
//!
//! names.listen(&Listener::new(|value| {
//!     println!("name is now {value:?}");
//!     Ok(())
//! }))?;
//!
//! store.update(&json!({"$set": {"name": "Kwame"}}))?;
//! assert_eq!(names.get()?, Some(json!({"name": "Kwame"})));
//! # Ok::<(), kyrostate::StateError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core: values, paths, analysis
pub mod analyzer;
pub mod error;
pub mod path;
pub mod value;

// Evaluation and updates
pub mod evaluator;
pub mod update;

// Reactive layer
pub mod selector;
pub mod store;

// Re-export primary types at crate root for convenience
pub use error::{
    ExpressionError, ListenerFailure, SelectorError, SelectorResult, StateError, StateResult,
    StoreError, UpdateError,
};
pub use evaluator::{Evaluator, Predicate, QueryEvaluator};
pub use selector::{
    ListenMode, Listener, ListenerId, ListenerResult, Selector, SelectorEvent, SelectorKey,
    SelectorStream,
};
pub use store::{Store, StoreConfig, UpdateOptions, UpdateResult};
pub use update::{UpdateExpression, UpdateOperator};
