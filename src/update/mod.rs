//! Declarative document updates.
//!
//! An update expression maps operators to `{selector: value}` operands.
//! Selectors may contain array-filter placeholders (`$[]`, `$[name]`) whose
//! predicates come from the caller's array filters. Each operator reports the
//! path of every location it actually changed; no-ops report nothing.

/// Target resolution and array-filter application.
pub mod apply;
/// The operator catalog.
pub mod operators;
/// Selector tokenization.
pub mod path_node;

pub use apply::{apply_update, walk_expression, Predicates, Target};
pub use operators::{UpdateClause, UpdateExpression, UpdateOperator};
pub use path_node::{tokenize_path, PathNode};
