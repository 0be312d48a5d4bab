//! Storage seam
//!
//! Backends hand out transactions; every ORM statement runs inside one. Rows
//! come back already decoded into [`DatabaseValue`]s so the rest of the crate
//! never touches driver types.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;

use crate::config::PoolConfig;
use crate::error::{OrmError, OrmResult};

/// A driver transaction; dropped without commit means rolled back
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a statement and return the affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return every result row
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>>;

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Row>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    async fn commit(self: Box<Self>) -> OrmResult<()>;

    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// Pooled connections to one database
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Begin a transaction on a pooled connection
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>>;

    /// Execute a statement outside of any transaction
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query outside of any transaction
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>>;

    /// Close the pool
    async fn close(&self) -> OrmResult<()>;

    /// SQL dialect spoken by the pool's connections
    fn dialect(&self) -> SqlDialect;
}

/// Factory for the pools of one database engine
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    async fn create_pool(
        &self,
        database_url: &str,
        config: &PoolConfig,
    ) -> OrmResult<Arc<dyn DatabasePool>>;

    fn sql_dialect(&self) -> SqlDialect;

    /// Reject URLs of another engine before connecting
    fn validate_database_url(&self, url: &str) -> OrmResult<()>;
}

/// One decoded result row, columns kept in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, DatabaseValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, DatabaseValue)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn get_by_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.columns.get(index).map(|(_, value)| value)
    }

    /// Integer column; NULL and missing columns are errors
    pub fn get_i64(&self, name: &str) -> OrmResult<i64> {
        self.get(name)
            .and_then(DatabaseValue::as_i64)
            .ok_or_else(|| OrmError::Query(format!("Column '{}' is not an integer", name)))
    }

    /// Integer column, `None` for NULL
    pub fn get_opt_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(DatabaseValue::as_i64)
    }

    /// Text column, `None` for NULL
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column name to JSON value, as handed to `read` callers
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

/// A bound parameter or a decoded column
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Json(JsonValue),
}

impl DatabaseValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::Bool(b) => Some(*b as i64),
            DatabaseValue::Float64(f) if f.fract() == 0.0 => Some(*f as i64),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DatabaseValue::Float64(f) => Some(*f),
            DatabaseValue::Int64(i) => Some(*i as f64),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(b) => Some(*b),
            DatabaseValue::Int64(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Dates and datetimes become the strings the field layer parses back
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => {
                JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect())
            }
            DatabaseValue::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
            DatabaseValue::DateTime(dt) => {
                JsonValue::String(dt.format("%Y-%m-%d %H:%M:%S").to_string())
            }
            DatabaseValue::Time(t) => JsonValue::String(t.format("%H:%M:%S").to_string()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int64(value as i64)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<NaiveDate> for DatabaseValue {
    fn from(value: NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl From<NaiveDateTime> for DatabaseValue {
    fn from(value: NaiveDateTime) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<NaiveTime> for DatabaseValue {
    fn from(value: NaiveTime) -> Self {
        DatabaseValue::Time(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// The SQL flavour statements are rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Placeholder for the zero-based parameter `index`
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Primary key column definition used when a table is created
    pub fn id_column(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "\"id\" SERIAL NOT NULL PRIMARY KEY",
            SqlDialect::SQLite => "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    /// Whether `ALTER COLUMN .. SET/DROP NOT NULL` exists
    pub fn supports_alter_not_null(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }

    /// Whether foreign keys can be added to or dropped from an existing column
    pub fn supports_alter_foreign_key(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }

    /// Whether CHECK constraints can be added to an existing table
    pub fn supports_add_check(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }

    /// Whether `ALTER COLUMN .. TYPE` exists
    pub fn supports_alter_type(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }

    /// Whether the dialect has a native ILIKE operator
    pub fn has_ilike(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlDialect::PostgreSQL => write!(f, "postgresql"),
            SqlDialect::SQLite => write!(f, "sqlite"),
        }
    }
}
