//! Error types for the binding engine

use markbind_tree::{FileId, ParseError, TreeError};
use thiserror::Error;

pub type DomResult<T> = Result<T, DomError>;

/// A declared type that the schema builder cannot support. Cached per type,
/// so every use of a broken type reports the same error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Type '{0}' is not registered")]
    UnknownType(String),

    #[error("Operation '{operation}' of '{type_name}' cannot be classified: {reason}")]
    UnsupportedOperation {
        type_name: String,
        operation: String,
        reason: String,
    },

    #[error("Name '{name}' is claimed by more than one child of '{type_name}'")]
    DuplicateName { type_name: String, name: String },

    #[error("Type '{0}' inherits from itself")]
    CyclicInheritance(String),

    #[error("No converter for value type '{0}'")]
    NoConverter(String),

    #[error("Unknown converter '{0}'")]
    UnknownConverter(String),
}

#[derive(Error, Debug, Clone)]
pub enum DomError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid element {element}: {reason}")]
    InvalidElement { element: String, reason: String },

    #[error("Engine invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Tree edit refused: {0}")]
    Tree(#[from] TreeError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("File {0} is not open")]
    FileNotFound(FileId),

    #[error("Invalid argument for '{operation}': {message}")]
    InvalidArgument { operation: String, message: String },

    #[error("Operation was canceled")]
    Canceled,

    #[error("Unexpected invocation result: expected {expected}")]
    UnexpectedResult { expected: &'static str },

    #[error("Elements belong to different managers")]
    ForeignElement,

    #[error("Manager was dropped")]
    ManagerDropped,
}

impl DomError {
    pub fn invalid_argument(operation: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, DomError::Config(_))
    }

    pub fn is_invalid_element(&self) -> bool {
        matches!(self, DomError::InvalidElement { .. })
    }
}
