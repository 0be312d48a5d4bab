//! Database Backend Abstractions
//!
//! The ORM talks to storage through the traits in [`core`]; PostgreSQL is the
//! production backend and SQLite serves embedded use and the test-suite.

pub mod core;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use self::core::*;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use crate::error::{OrmError, OrmResult};

/// Engines a connection URL can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect the backend from a connection URL
    pub fn from_url(url: &str) -> OrmResult<Self> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("sqlite:") || url.starts_with("file:") {
            Ok(DatabaseBackendType::SQLite)
        } else {
            Err(OrmError::Connection(format!(
                "Unable to detect database backend from URL: {}",
                url
            )))
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        match self {
            DatabaseBackendType::PostgreSQL => SqlDialect::PostgreSQL,
            DatabaseBackendType::SQLite => SqlDialect::SQLite,
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Open a pool for `database_url` with the matching backend
pub async fn connect(
    database_url: &str,
    config: &crate::config::PoolConfig,
) -> OrmResult<Arc<dyn DatabasePool>> {
    match DatabaseBackendType::from_url(database_url)? {
        DatabaseBackendType::PostgreSQL => {
            PostgresBackend::new().create_pool(database_url, config).await
        }
        DatabaseBackendType::SQLite => SqliteBackend::new().create_pool(database_url, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_detection() {
        assert_eq!(
            DatabaseBackendType::from_url("postgres://localhost/db").unwrap(),
            DatabaseBackendType::PostgreSQL
        );
        assert_eq!(
            DatabaseBackendType::from_url("sqlite::memory:").unwrap(),
            DatabaseBackendType::SQLite
        );
        assert!(DatabaseBackendType::from_url("mysql://localhost/db").is_err());
    }
}
