//! Store error type and mapping to the API taxonomy.

use waypoint_core::ApiError;

/// Errors surfaced by repository functions.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Referenced row absent
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Unique-constraint or state violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Underlying database failure
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // SQLite reports constraint violations as database errors with a
        // UNIQUE/FOREIGN KEY message; map uniqueness to Conflict so callers
        // get a 409 rather than a 500.
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return Self::Conflict(db_err.message().to_string());
            }
        }
        Self::Database(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what.to_string()),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Database(db) => Self::Internal(anyhow::Error::new(db)),
        }
    }
}

/// Result alias for repository functions.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_display() {
        let err = StoreError::NotFound("task");
        assert_eq!(err.to_string(), "task not found");
    }

    #[test]
    fn test_api_error_mapping() {
        assert_eq!(
            ApiError::from(StoreError::NotFound("task")).status_code(),
            404
        );
        assert_eq!(
            ApiError::from(StoreError::Conflict("timer already running".into())).status_code(),
            409
        );
    }
}
