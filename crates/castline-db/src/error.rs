//! Database error types.

use thiserror::Error;

/// SQLSTATE class for insufficient resources (`53100 disk_full`, `53200 out_of_memory`, ...).
const INSUFFICIENT_RESOURCES_CLASS: &str = "53";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("insufficient resources: {0}")]
    ResourceExhausted(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Classify a driver error by its SQLSTATE.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
            _ => None,
        };
        match code.as_deref() {
            Some(c) if c.starts_with(INSUFFICIENT_RESOURCES_CLASS) => {
                DbError::ResourceExhausted(err.to_string())
            }
            Some(UNIQUE_VIOLATION) => DbError::Duplicate(err.to_string()),
            _ => DbError::Database(err),
        }
    }

    /// Whether the store refused work for lack of memory, disk or connections.
    pub fn is_resource_exhausted(&self) -> bool {
        match self {
            DbError::ResourceExhausted(_) => true,
            DbError::Database(sqlx::Error::Database(db)) => db
                .code()
                .is_some_and(|c| c.starts_with(INSUFFICIENT_RESOURCES_CLASS)),
            _ => false,
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_exhausted_classification() {
        assert!(DbError::ResourceExhausted("out of memory".into()).is_resource_exhausted());
        assert!(!DbError::NotFound("post p1".into()).is_resource_exhausted());
        assert!(!DbError::Database(sqlx::Error::RowNotFound).is_resource_exhausted());
    }

    #[test]
    fn test_non_database_errors_pass_through() {
        let err = DbError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DbError::Database(sqlx::Error::PoolTimedOut)));
    }
}
