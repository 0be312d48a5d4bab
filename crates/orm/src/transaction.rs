//! Request transactions
//!
//! One [`Transaction`] serves one request end to end: a pooled connection
//! with an open database transaction, the acting user, the request
//! [`Context`] and the browse cache of the records read so far. Every ORM
//! operation is a method on it (see the `crud`, `schema` and `ir` modules).

use std::collections::HashMap;
use std::sync::Arc;

use oerp_cache::Cache;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::backends::{DatabaseTransaction, Row, SqlDialect};
use crate::context::Context;
use crate::error::{ModelError, OrmResult};
use crate::model::{Model, Registry};
use crate::query::Sql;

/// Superuser id, bypasses model access and record rules
pub const ROOT_USER: i64 = 0;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Convert to SQL string for SET TRANSACTION ISOLATION LEVEL command
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transaction configuration options
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// `None` keeps the server default; ignored on SQLite
    pub isolation_level: Option<IsolationLevel>,
    pub read_only: bool,
}

/// Fields already fetched per `(model, id)`
pub(crate) type RecordCache = HashMap<(String, i64), Map<String, Value>>;

pub struct Transaction {
    registry: Arc<Registry>,
    inner: Option<Box<dyn DatabaseTransaction>>,
    user: i64,
    context: Context,
    pub(crate) records: RecordCache,
    savepoint_count: u32,
    committed: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("database", &self.registry.database())
            .field("user", &self.user)
            .field("context", &self.context)
            .field("active", &self.inner.is_some())
            .finish()
    }
}

impl Transaction {
    pub(crate) async fn begin(
        registry: Arc<Registry>,
        user: i64,
        context: Context,
        config: TransactionConfig,
    ) -> OrmResult<Self> {
        let mut inner = registry.pool().begin_transaction().await?;

        if registry.dialect() == SqlDialect::PostgreSQL {
            if let Some(level) = config.isolation_level {
                let sql = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
                inner.execute(&sql, &[]).await.map_err(|e| {
                    ModelError::Transaction(format!("Failed to set isolation level: {}", e))
                })?;
            }
            if config.read_only {
                inner.execute("SET TRANSACTION READ ONLY", &[]).await?;
            }
        }
        debug!("Transaction started for user {} on {}", user, registry.database());

        Ok(Self {
            registry,
            inner: Some(inner),
            user,
            context,
            records: HashMap::new(),
            savepoint_count: 0,
            committed: false,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn user(&self) -> i64 {
        self.user
    }

    pub fn is_superuser(&self) -> bool {
        self.user == ROOT_USER
    }

    /// Act as another user; the browse cache is dropped
    pub fn set_user(&mut self, user: i64) -> i64 {
        self.records.clear();
        std::mem::replace(&mut self.user, user)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Replace the context, returning the previous one. Cached records are
    /// dropped: values may depend on the language.
    pub fn set_context(&mut self, context: Context) -> Context {
        self.records.clear();
        std::mem::replace(&mut self.context, context)
    }

    pub fn dialect(&self) -> SqlDialect {
        self.registry.dialect()
    }

    pub fn model(&self, name: &str) -> OrmResult<Arc<Model>> {
        self.registry.model(name)
    }

    pub fn default_language(&self) -> &str {
        &self.registry.config().default_language
    }

    /// Language of the request
    pub fn language(&self) -> String {
        self.context
            .language_or(&self.registry.config().default_language)
            .to_string()
    }

    /// Whether values must go through `ir.translation`
    pub fn translating(&self) -> bool {
        self.language() != self.default_language()
    }

    pub fn in_max(&self) -> usize {
        self.registry.config().in_max
    }

    pub fn cache(&self) -> &Cache {
        self.registry.cache()
    }

    /// Process cache lookup in this database
    pub fn cache_get<T: serde::de::DeserializeOwned>(&self, cache: &str, key: &str) -> Option<T> {
        self.registry.cache().get(self.registry.database(), cache, key)
    }

    pub fn cache_put<T: serde::Serialize + ?Sized>(&self, cache: &str, key: &str, value: &T) {
        self.registry
            .cache()
            .put(self.registry.database(), cache, key, value)
    }

    pub fn cache_reset(&self, cache: &str) {
        self.registry.cache().reset(self.registry.database(), cache)
    }

    /// After any mutation: the browse cache goes and the process caches bound
    /// to the model are reset
    pub(crate) fn invalidate(&mut self, model: &Model) {
        self.records.clear();
        let reset = self
            .registry
            .cache()
            .invalidate_tag(self.registry.database(), &model.name);
        if !reset.is_empty() {
            debug!("{} write reset caches {:?}", model.name, reset);
        }
    }

    fn connection(&mut self) -> OrmResult<&mut Box<dyn DatabaseTransaction>> {
        self.inner
            .as_mut()
            .ok_or_else(|| ModelError::Transaction("Transaction has already been consumed".to_string()))
    }

    pub async fn execute(&mut self, sql: &Sql) -> OrmResult<u64> {
        let text = sql.render(self.dialect());
        self.connection()?.execute(&text, sql.params()).await
    }

    pub async fn fetch_all(&mut self, sql: &Sql) -> OrmResult<Vec<Row>> {
        let text = sql.render(self.dialect());
        self.connection()?.fetch_all(&text, sql.params()).await
    }

    pub async fn fetch_optional(&mut self, sql: &Sql) -> OrmResult<Option<Row>> {
        let text = sql.render(self.dialect());
        self.connection()?.fetch_optional(&text, sql.params()).await
    }

    /// First column of every row as an id
    pub async fn fetch_ids(&mut self, sql: &Sql) -> OrmResult<Vec<i64>> {
        let rows = self.fetch_all(sql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_by_index(0).and_then(|v| v.as_i64()))
            .collect())
    }

    /// First column of the first row as an integer
    pub async fn fetch_count(&mut self, sql: &Sql) -> OrmResult<i64> {
        let row = self.fetch_optional(sql).await?;
        Ok(row
            .and_then(|row| row.get_by_index(0).and_then(|v| v.as_i64()))
            .unwrap_or(0))
    }

    /// Open a savepoint, returning its name
    pub async fn savepoint(&mut self) -> OrmResult<String> {
        self.savepoint_count += 1;
        let name = format!("sp_{}", self.savepoint_count);
        self.connection()?
            .execute(&format!("SAVEPOINT {}", name), &[])
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to create savepoint: {}", e)))?;
        Ok(name)
    }

    pub async fn release_savepoint(&mut self, name: &str) -> OrmResult<()> {
        self.connection()?
            .execute(&format!("RELEASE SAVEPOINT {}", name), &[])
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to release savepoint: {}", e)))?;
        Ok(())
    }

    pub async fn rollback_to_savepoint(&mut self, name: &str) -> OrmResult<()> {
        self.records.clear();
        self.connection()?
            .execute(&format!("ROLLBACK TO SAVEPOINT {}", name), &[])
            .await
            .map_err(|e| {
                ModelError::Transaction(format!("Failed to rollback to savepoint: {}", e))
            })?;
        Ok(())
    }

    /// Call a bound method of a model
    pub async fn call(
        &mut self,
        model: &str,
        method: &str,
        ids: &[i64],
        args: Value,
    ) -> OrmResult<Value> {
        let method = self.model(model)?.method(method)?.clone();
        method.call(self, model, ids, args).await
    }

    pub async fn commit(mut self) -> OrmResult<()> {
        let inner = self.inner.take().ok_or_else(|| {
            ModelError::Transaction("Transaction has already been consumed".to_string())
        })?;
        inner.commit().await?;
        self.committed = true;
        debug!("Transaction committed");
        Ok(())
    }

    pub async fn rollback(mut self) -> OrmResult<()> {
        let inner = self.inner.take().ok_or_else(|| {
            ModelError::Transaction("Transaction has already been consumed".to_string())
        })?;
        inner.rollback().await?;
        debug!("Transaction rolled back");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.inner.take().is_some() && !self.committed {
            // the connection rolls back when the sqlx transaction drops
            warn!("Transaction dropped without explicit commit or rollback");
        }
    }
}
