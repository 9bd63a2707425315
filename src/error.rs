//! Error types for KyroState.
//!
//! All errors in KyroState are strongly typed using thiserror.
//! Construction errors are raised synchronously at the offending call;
//! none of them leave the store in an unusable state.

use thiserror::Error;

/// Boxed error returned by a failing listener.
pub type ListenerFailure = Box<dyn std::error::Error + 'static>;

/// Errors raised while compiling or evaluating filter/projection expressions.
#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("Unknown operator '{operator}'")]
    UnknownOperator {
        operator: String,
    },

    #[error("Invalid argument for '{operator}': {reason}")]
    InvalidArgument {
        operator: String,
        reason: String,
    },

    #[error("Evaluation of '{operator}' failed: {reason}")]
    Evaluation {
        operator: String,
        reason: String,
    },

    #[error("Undefined variable '$${name}'")]
    UndefinedVariable {
        name: String,
    },
}

impl ExpressionError {
    pub(crate) fn invalid(operator: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operator: operator.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn evaluation(operator: &str, reason: impl Into<String>) -> Self {
        Self::Evaluation {
            operator: operator.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while parsing or applying update expressions.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Unknown update operator '{operator}'")]
    UnknownOperator {
        operator: String,
    },

    #[error("Update expression must be an object of operators, got {actual}")]
    NotAnObject {
        actual: &'static str,
    },

    #[error("Operand of '{operator}' must be an object of field selectors")]
    InvalidOperand {
        operator: String,
    },

    #[error("Invalid array filter identifier '{identifier}' in '{path}'")]
    InvalidIdentifier {
        identifier: String,
        path: String,
    },

    #[error("Invalid array filter: {reason}")]
    InvalidArrayFilter {
        reason: String,
    },

    #[error("Cannot apply '{operator}' to '{field}': expected {expected}, found {actual}")]
    TypeMismatch {
        operator: String,
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Array index {index} is past the end by more than {limit} elements")]
    IndexOutOfRange {
        index: usize,
        limit: usize,
    },

    #[error("Invalid modifier for '{operator}': {reason}")]
    InvalidModifier {
        operator: String,
        reason: String,
    },

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
}

/// Errors raised by selector listener registration.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("Listener {listener} is already registered in {existing} mode")]
    ConflictingRegistration {
        listener: String,
        existing: &'static str,
    },

    #[error("Listener failed during immediate invocation: {source}")]
    ImmediateInvocation {
        #[source]
        source: ListenerFailure,
    },

    #[error("Selector evaluation failed: {0}")]
    Evaluation(#[from] ExpressionError),

    #[error("Timed out after {duration_ms}ms waiting for a selector value")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Selector stream disconnected")]
    Disconnected,
}

/// Errors raised by the store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document root must be an object, got {actual}")]
    InvalidDocument {
        actual: &'static str,
    },

    #[error("Invalid projection for field '{field}': {reason}")]
    InvalidProjection {
        field: String,
        reason: String,
    },

    #[error("Condition must be an object, got {actual}")]
    InvalidCondition {
        actual: &'static str,
    },
}

/// Top-level error type for KyroState.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Update error: {0}")]
    Update(#[from] UpdateError),

    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
}

impl StateError {
    /// Returns true if this is a store construction/validation error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this is an update parsing/application error.
    #[must_use]
    pub const fn is_update(&self) -> bool {
        matches!(self, Self::Update(_))
    }

    /// Returns true if this is a selector registration error.
    #[must_use]
    pub const fn is_selector(&self) -> bool {
        matches!(self, Self::Selector(_))
    }

    /// Returns true if this is an expression error.
    #[must_use]
    pub const fn is_expression(&self) -> bool {
        matches!(self, Self::Expression(_))
    }
}

/// Result type alias for selector operations.
pub type SelectorResult<T> = Result<T, SelectorError>;

/// Result type alias for KyroState operations.
pub type StateResult<T> = Result<T, StateError>;
