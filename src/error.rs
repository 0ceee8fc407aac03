//! # Error Handling
//!
//! Tagged error kinds for the job queue. Callers branch on [`ErrorKind`]
//! (e.g. a cancel that hits a job already handled elsewhere) instead of
//! comparing error instances.

use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

use crate::models::JobStatus;

/// Coarse classification of a [`QueueError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Duplicate,
    InvalidInput,
    Transient,
    Database,
}

/// Errors surfaced by queue, retry-policy and dead-letter operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("job '{job_id}' is {actual}, expected {expected}")]
    InvalidState {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("{entity} '{id}' already exists")]
    Duplicate { entity: &'static str, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Connectivity or timeout problem talking to the store. Not retried here.
    #[error("transient store error while trying to {context}: {source}")]
    Transient {
        context: &'static str,
        #[source]
        source: DbErr,
    },

    #[error("store error while trying to {context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: DbErr,
    },
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::NotFound { .. } => ErrorKind::NotFound,
            QueueError::InvalidState { .. } => ErrorKind::InvalidState,
            QueueError::Duplicate { .. } => ErrorKind::Duplicate,
            QueueError::InvalidInput(_) => ErrorKind::InvalidInput,
            QueueError::Transient { .. } => ErrorKind::Transient,
            QueueError::Database { .. } => ErrorKind::Database,
        }
    }

    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        QueueError::NotFound {
            entity: "job",
            id: job_id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Wraps a store error with the operation that produced it, classifying
/// connectivity problems as [`ErrorKind::Transient`].
pub fn map_db_err(context: &'static str, err: DbErr) -> QueueError {
    if is_transient(&err) {
        tracing::warn!(error = ?err, context, "Transient database error");
        QueueError::Transient {
            context,
            source: err,
        }
    } else {
        tracing::error!(error = ?err, context, "Database operation failed");
        QueueError::Database {
            context,
            source: err,
        }
    }
}

fn is_transient(err: &DbErr) -> bool {
    use sea_orm::SqlxError;

    match err {
        DbErr::ConnectionAcquire(_) => true,
        DbErr::Conn(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx_err)) => matches!(
            sqlx_err,
            SqlxError::Io(_)
                | SqlxError::PoolTimedOut
                | SqlxError::PoolClosed
                | SqlxError::WorkerCrashed
        ),
        DbErr::Conn(_) => true,
        _ => false,
    }
}

/// True when the error is a unique/primary-key violation on any supported backend.
pub fn is_unique_violation(error: &DbErr) -> bool {
    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code = code.as_ref();
        code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}
