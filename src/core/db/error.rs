//! Store Error Types
//!
//! Store failures reduce to two classes the pipeline reacts to: the store
//! is unavailable (transient, retry with backoff) or a constraint was
//! violated (permanent, record an issue).

use thiserror::Error;

/// Comprehensive error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store is unreachable or the pool is exhausted
    #[error("Store unavailable: {context}")]
    Unavailable {
        context: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// A unique or foreign-key constraint rejected the write
    #[error("Constraint violation on {entity}: {detail}")]
    ConstraintViolation { entity: String, detail: String },

    /// A row the operation requires does not exist
    #[error("Not found: {entity} with {key}")]
    NotFound { entity: String, key: String },

    /// Rejected bill status regression
    #[error("Bill {bill} cannot move from {from} back to {to}")]
    StatusRegression {
        bill: String,
        from: String,
        to: String,
    },

    /// Migration failure at startup
    #[error("Migration failed: {source}")]
    Migration {
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// Any other query failure
    #[error("Store query failed: {context}")]
    Query {
        context: String,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    pub fn unavailable(context: impl Into<String>, source: Option<sqlx::Error>) -> Self {
        Self::Unavailable {
            context: context.into(),
            source,
        }
    }

    pub fn constraint(entity: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            entity: entity.into(),
            detail: detail.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.into(),
        }
    }

    pub fn query(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Query {
            context: context.into(),
            source,
        }
    }

    /// Whether retrying the operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable {
                    context: "connection".to_string(),
                    source: Some(err),
                }
            }
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Self::constraint(
                "record",
                db_err.message().to_string(),
            ),
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => Self::constraint(
                "record",
                format!("foreign key violation: {}", db_err.message()),
            ),
            sqlx::Error::RowNotFound => Self::not_found("record", "unknown"),
            _ => Self::Query {
                context: "store operation".to_string(),
                source: err,
            },
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(source: sqlx::migrate::MigrateError) -> Self {
        Self::Migration { source }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
