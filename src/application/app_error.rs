use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Store unreachable or a statement failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Lost a lock or serialization race at the store.
    #[error("Store conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the platform should redeliver the webhook.
    ///
    /// Store failures are transient; malformed payloads and missing references
    /// fail the same way on every delivery.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(_) | AppError::Conflict(_) | AppError::Internal(_) => true,
            AppError::InvalidInput(_) | AppError::NotFound(_) => false,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::Conflict(_) => ErrorCode::StoreConflict,
            AppError::InvalidInput(_) => ErrorCode::InvalidInput,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    DatabaseError,
    StoreConflict,
    InvalidInput,
    NotFound,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::StoreConflict => "STORE_CONFLICT",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
