use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdapterError>;

/// Error signal reported by the SQL engine.
///
/// `number` is the MySQL server error number when the transport could
/// extract one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub number: Option<u16>,
    pub message: String,
}

impl EngineError {
    pub fn new(number: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            number,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(number) => write!(f, "[{}] {}", number, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Class {0} already exists.")]
    DuplicateClass(String),

    #[error("A duplicate value for a field with unique values was provided")]
    DuplicateValue,

    #[error("Field {field} already exists on class {class_name}")]
    FieldAlreadyExists { class_name: String, field: String },

    #[error("Object not found.")]
    ObjectNotFound,

    #[error("Nested keys should not contain the '$' or '.' characters: {0}")]
    InvalidNestedKey(String),

    #[error("Invalid class name: {0}")]
    InvalidClassName(String),

    #[error("Invalid field name: {0}")]
    InvalidFieldName(String),

    #[error("Field {field} is not defined on class {class_name}")]
    UnknownField { class_name: String, field: String },

    #[error("Incorrect type for field {field}: {message}")]
    IncorrectType { field: String, message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unsupported query on field {field}: {detail}")]
    UnsupportedQuery { field: String, detail: String },

    #[error("Unsupported update of field {field} with {value}")]
    UnsupportedUpdate { field: String, value: String },

    #[error("Operation forbidden: {0}")]
    OperationForbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Engine error: {0}")]
    Engine(EngineError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classified kind of an [`AdapterError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateClass,
    DuplicateValue,
    FieldAlreadyExists,
    ObjectNotFound,
    InvalidNestedKey,
    InvalidClassName,
    InvalidFieldName,
    UnknownField,
    IncorrectType,
    InvalidQuery,
    UnsupportedQuery,
    UnsupportedUpdate,
    OperationForbidden,
    InternalError,
    Engine,
    Connection,
    Database,
    Json,
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::DuplicateClass(_) => ErrorKind::DuplicateClass,
            AdapterError::DuplicateValue => ErrorKind::DuplicateValue,
            AdapterError::FieldAlreadyExists { .. } => ErrorKind::FieldAlreadyExists,
            AdapterError::ObjectNotFound => ErrorKind::ObjectNotFound,
            AdapterError::InvalidNestedKey(_) => ErrorKind::InvalidNestedKey,
            AdapterError::InvalidClassName(_) => ErrorKind::InvalidClassName,
            AdapterError::InvalidFieldName(_) => ErrorKind::InvalidFieldName,
            AdapterError::UnknownField { .. } => ErrorKind::UnknownField,
            AdapterError::IncorrectType { .. } => ErrorKind::IncorrectType,
            AdapterError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            AdapterError::UnsupportedQuery { .. } => ErrorKind::UnsupportedQuery,
            AdapterError::UnsupportedUpdate { .. } => ErrorKind::UnsupportedUpdate,
            AdapterError::OperationForbidden(_) => ErrorKind::OperationForbidden,
            AdapterError::InternalError(_) => ErrorKind::InternalError,
            AdapterError::Engine(_) => ErrorKind::Engine,
            AdapterError::Connection(_) => ErrorKind::Connection,
            AdapterError::Database(_) => ErrorKind::Database,
            AdapterError::Json(_) => ErrorKind::Json,
        }
    }

    /// Whether the connection that produced this error must be torn down.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, AdapterError::Connection(_))
    }

    /// MySQL error number carried by an engine error.
    pub fn engine_number(&self) -> Option<u16> {
        match self {
            AdapterError::Engine(err) => err.number,
            _ => None,
        }
    }

    pub(crate) fn unsupported_query(field: impl Into<String>, detail: impl Into<String>) -> Self {
        AdapterError::UnsupportedQuery {
            field: field.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn unsupported_update(field: impl Into<String>, value: &serde_json::Value) -> Self {
        AdapterError::UnsupportedUpdate {
            field: field.into(),
            value: value.to_string(),
        }
    }

    pub(crate) fn incorrect_type(field: impl Into<String>, message: impl Into<String>) -> Self {
        AdapterError::IncorrectType {
            field: field.into(),
            message: message.into(),
        }
    }
}
