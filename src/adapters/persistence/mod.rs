use sqlx::PgPool;

use crate::app_error::AppError;

pub mod entitlement;

// PostgreSQL SQLSTATE codes that mean "lost a race, try again".
const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";

// SQLSTATE class 22 (data exception): the values themselves were rejected,
// e.g. a NUL byte in TEXT (22021) or in JSONB (22P05).
const DATA_EXCEPTION_CLASS: &str = "22";

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        PostgresPersistence { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound("Row not found".into()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(
                    UNIQUE_VIOLATION | SERIALIZATION_FAILURE | DEADLOCK_DETECTED
                    | LOCK_NOT_AVAILABLE,
                ) => {
                    tracing::warn!(error = %err, "Database conflict");
                    AppError::Conflict("Concurrent update, retry".into())
                }
                Some(code) if code.starts_with(DATA_EXCEPTION_CLASS) => {
                    tracing::warn!(error = %err, sqlstate = code, "Database rejected event data");
                    AppError::InvalidInput(format!("Event data rejected by store ({code})"))
                }
                _ => {
                    // Log the actual error for debugging, but don't expose details
                    tracing::error!(error = ?err, "Database error");
                    AppError::Database("Database operation failed".into())
                }
            },
            _ => {
                tracing::error!(error = ?err, "Database error");
                AppError::Database("Database operation failed".into())
            }
        }
    }
}
