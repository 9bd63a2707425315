//! Expression evaluation.
//!
//! The store treats evaluation as a pluggable collaborator: it only needs to
//! turn a filter condition into a reusable predicate and to shape a document
//! through a projection. [`QueryEvaluator`] is the default implementation and
//! covers the query, aggregation-expression and projection subset the store's
//! own update operators rely on (`$pull` conditions, array filters).

/// Aggregation expression evaluation (`$add`, `$cond`, `$map`, ...).
pub mod expression;
/// Projection shaping.
pub mod projection;
/// Query (filter condition) compilation and matching.
pub mod query;

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::error::ExpressionError;

pub use query::Query;

/// A compiled, reusable test against a document.
pub type Predicate = Rc<dyn Fn(&Value) -> bool>;

/// Contract between the store and an expression evaluator.
///
/// Implementations must be pure: the same inputs always produce the same
/// outputs and neither call may observe or mutate anything else.
pub trait Evaluator {
    /// Compiles a filter condition into a predicate.
    ///
    /// Malformed conditions (unknown operators, bad arguments) are rejected
    /// here rather than when the predicate runs.
    fn compile(&self, condition: &Value) -> Result<Predicate, ExpressionError>;

    /// Shapes `document` through `projection`.
    fn project(&self, document: &Value, projection: &Value) -> Result<Value, ExpressionError>;
}

/// Default evaluator implementing a MongoDB-flavoured query language.
#[derive(Clone, Copy, Default)]
pub struct QueryEvaluator;

impl QueryEvaluator {
    /// Creates the default evaluator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl fmt::Debug for QueryEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryEvaluator")
    }
}

impl Evaluator for QueryEvaluator {
    fn compile(&self, condition: &Value) -> Result<Predicate, ExpressionError> {
        let query = Query::parse(condition)?;
        Ok(Rc::new(move |doc: &Value| query.matches(doc)))
    }

    fn project(&self, document: &Value, projection: &Value) -> Result<Value, ExpressionError> {
        projection::project(document, projection)
    }
}
