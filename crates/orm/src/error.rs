//! Error types for the ORM system
//!
//! Tagged errors for validation, access control, concurrency, integrity and
//! programming failures, plus the infrastructure errors raised by the
//! database layer. Every one of them aborts the enclosing transaction.

use thiserror::Error;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// A field value violates a domain, selection, required or size constraint
    #[error("Validation error on {}: {message}", location(.model, .field))]
    Validation {
        model: String,
        field: Option<String>,
        /// Untranslated message, used as translation source
        key: String,
        /// Message translated in the language of the request
        message: String,
    },
    /// Permission check or rule-bypass detection failed
    #[error("Access error on {model} ({operation}): {message}")]
    Access {
        model: String,
        operation: String,
        key: String,
        message: String,
    },
    /// The optimistic write window tripped; re-fetch and retry
    #[error("Concurrency error on {model}: {message}")]
    Concurrency { model: String, message: String },
    /// Storage engine constraint violation
    #[error("Integrity error: {message}")]
    Integrity {
        constraint: Option<String>,
        message: String,
    },
    /// Unknown field, unknown model, malformed domain: a definition bug
    #[error("Programming error: {0}")]
    Programming(String),
    /// Database query error
    #[error("Database error: {0}")]
    Database(String),
    /// Connection pool error
    #[error("Connection error: {0}")]
    Connection(String),
    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// Schema synchronization error
    #[error("Schema error: {0}")]
    Schema(String),
    /// Query building error
    #[error("Query error: {0}")]
    Query(String),
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

fn location(model: &str, field: &Option<String>) -> String {
    match field {
        Some(field) => format!("{}.{}", model, field),
        None => model.to_string(),
    }
}

impl ModelError {
    /// Validation error whose message has not been translated yet
    pub fn validation(model: &str, field: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        ModelError::Validation {
            model: model.to_string(),
            field: field.map(str::to_string),
            key: message.clone(),
            message,
        }
    }

    /// Access error whose message has not been translated yet
    pub fn access(model: &str, operation: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        ModelError::Access {
            model: model.to_string(),
            operation: operation.to_string(),
            key: message.clone(),
            message,
        }
    }

    pub fn concurrency(model: &str, message: impl Into<String>) -> Self {
        ModelError::Concurrency {
            model: model.to_string(),
            message: message.into(),
        }
    }

    pub fn unknown_model(model: &str) -> Self {
        ModelError::Programming(format!("unknown model '{}'", model))
    }

    pub fn unknown_field(model: &str, field: &str) -> Self {
        ModelError::Programming(format!("model '{}' has no field '{}'", model, field))
    }

    /// Errors the caller can fix and retry (shown to the end user)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ModelError::Validation { .. }
                | ModelError::Access { .. }
                | ModelError::Concurrency { .. }
                | ModelError::Integrity { .. }
        )
    }

    /// Errors that reveal a bug in a model definition
    pub fn is_fatal(&self) -> bool {
        matches!(self, ModelError::Programming(_))
    }

    /// Translation source of a user-facing message, if any
    pub fn message_key(&self) -> Option<&str> {
        match self {
            ModelError::Validation { key, .. } | ModelError::Access { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Replace the message of a user-facing error with its translation
    pub fn with_translation(self, translated: String) -> Self {
        match self {
            ModelError::Validation {
                model, field, key, ..
            } => ModelError::Validation {
                model,
                field,
                key,
                message: translated,
            },
            ModelError::Access {
                model,
                operation,
                key,
                ..
            } => ModelError::Access {
                model,
                operation,
                key,
                message: translated,
            },
            other => other,
        }
    }
}

// Convert from sqlx errors, keeping constraint violations distinguishable
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => match db_err.kind() {
                sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => ModelError::Integrity {
                    constraint: db_err.constraint().map(str::to_string),
                    message: db_err.message().to_string(),
                },
                _ => ModelError::Database(err.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                ModelError::Connection(err.to_string())
            }
            _ => ModelError::Database(err.to_string()),
        }
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

// Convert from anyhow errors
impl From<anyhow::Error> for ModelError {
    fn from(err: anyhow::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}
