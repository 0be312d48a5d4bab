//! SQLite Backend Implementation
//!
//! Embedded backend used for single-process deployments and the test-suite.
//! `sqlite::memory:` databases live on one pinned connection, so the pool is
//! capped at a single connection that never expires.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row as SqlxRow, Sqlite, ValueRef};
use tracing::debug;

use super::core::*;
use crate::config::PoolConfig;
use crate::error::{OrmError, OrmResult};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite database backend implementation
#[derive(Debug, Default)]
pub struct SqliteBackend;

impl SqliteBackend {
    pub fn new() -> Self {
        Self
    }

    fn is_memory(url: &str) -> bool {
        url.contains(":memory:") || url.contains("mode=memory")
    }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn create_pool(
        &self,
        database_url: &str,
        config: &PoolConfig,
    ) -> OrmResult<Arc<dyn DatabasePool>> {
        self.validate_database_url(database_url)?;

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| OrmError::Connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true)
            // LIKE must be case-sensitive as on PostgreSQL
            .pragma("case_sensitive_like", "ON");

        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .test_before_acquire(config.test_before_acquire);

        if Self::is_memory(database_url) {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(config.idle_timeout.map(Duration::from_secs))
                .max_lifetime(config.max_lifetime.map(Duration::from_secs));
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| OrmError::Connection(format!("Failed to open SQLite database: {}", e)))?;

        Ok(Arc::new(SqlitePool::new(pool)))
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn validate_database_url(&self, url: &str) -> OrmResult<()> {
        if !url.starts_with("sqlite:") && !url.starts_with("file:") {
            return Err(OrmError::Connection("Invalid SQLite URL scheme".to_string()));
        }
        Ok(())
    }
}

/// SQLite connection pool implementation
pub struct SqlitePool {
    pool: Pool<Sqlite>,
}

impl SqlitePool {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabasePool for SqlitePool {
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn inner(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        debug!(target: "oerp_orm::sql", "{} {:?}", sql, params);
        let tx = self.inner()?;
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        debug!(target: "oerp_orm::sql", "{} {:?}", sql, params);
        let tx = self.inner()?;
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut **tx)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &[DatabaseValue]) -> SqliteQuery<'q> {
    for param in params {
        query = bind_database_value(query, param);
    }
    query
}

/// Temporal values are stored as ISO text so that they compare lexically
fn bind_database_value<'q>(query: SqliteQuery<'q>, value: &DatabaseValue) -> SqliteQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<i64>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Date(d) => query.bind(d.format("%Y-%m-%d").to_string()),
        DatabaseValue::DateTime(dt) => query.bind(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        DatabaseValue::Time(t) => query.bind(t.format("%H:%M:%S").to_string()),
        DatabaseValue::Json(j) => query.bind(j.to_string()),
    }
}

fn decode_row(row: &SqliteRow) -> OrmResult<Row> {
    let columns = row
        .columns()
        .iter()
        .enumerate()
        .map(|(index, column)| Ok((column.name().to_string(), decode_column(row, index)?)))
        .collect::<OrmResult<Vec<_>>>()?;
    Ok(Row::new(columns))
}

/// SQLite values are dynamically typed: probe integer, real, text then blob
fn decode_column(row: &SqliteRow, index: usize) -> OrmResult<DatabaseValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }
    if let Ok(i) = row.try_get::<i64, _>(index) {
        return Ok(DatabaseValue::Int64(i));
    }
    if let Ok(f) = row.try_get::<f64, _>(index) {
        return Ok(DatabaseValue::Float64(f));
    }
    if let Ok(s) = row.try_get::<String, _>(index) {
        return Ok(DatabaseValue::String(s));
    }
    if let Ok(b) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(DatabaseValue::Bytes(b));
    }
    Err(OrmError::Query(format!(
        "Unable to decode column '{}'",
        row.columns()[index].name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_keeps_state_between_transactions() {
        let pool = SqliteBackend::new()
            .create_pool("sqlite::memory:", &PoolConfig::default())
            .await
            .unwrap();

        let mut tx = pool.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name VARCHAR)", &[])
            .await
            .unwrap();
        tx.execute(
            "INSERT INTO t (name) VALUES (?)",
            &[DatabaseValue::from("Hello")],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let rows = pool
            .fetch_all("SELECT id, name FROM t WHERE name LIKE ?", &["hello".into()])
            .await
            .unwrap();
        assert!(rows.is_empty(), "LIKE must be case-sensitive");

        let rows = pool
            .fetch_all("SELECT id, name FROM t", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_string("name").as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_null_decodes_as_null() {
        let pool = SqliteBackend::new()
            .create_pool("sqlite::memory:", &PoolConfig::default())
            .await
            .unwrap();
        let rows = pool
            .fetch_all("SELECT NULL AS a, 1.5 AS b, X'00FF' AS c", &[])
            .await
            .unwrap();
        assert_eq!(rows[0].get("a"), Some(&DatabaseValue::Null));
        assert_eq!(rows[0].get("b"), Some(&DatabaseValue::Float64(1.5)));
        assert_eq!(rows[0].get("c"), Some(&DatabaseValue::Bytes(vec![0, 255])));
    }
}
