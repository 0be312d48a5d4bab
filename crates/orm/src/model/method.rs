//! Bound model methods
//!
//! Everything a model delegates to code goes through [`ModelMethod`]:
//! function field getters and setters, searchers, constraints, dynamic
//! selections, default providers and workflow actions. A method receives the
//! transaction, the model name, the record ids and a JSON argument.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::OrmResult;
use crate::transaction::Transaction;

#[async_trait]
pub trait ModelMethod: Send + Sync {
    async fn call(
        &self,
        tx: &mut Transaction,
        model: &str,
        ids: &[i64],
        args: Value,
    ) -> OrmResult<Value>;
}

/// Adapter turning a closure into a [`ModelMethod`]
pub struct FnMethod<F>(F);

#[async_trait]
impl<F> ModelMethod for FnMethod<F>
where
    F: for<'a> Fn(&'a mut Transaction, &'a str, &'a [i64], Value) -> BoxFuture<'a, OrmResult<Value>>
        + Send
        + Sync,
{
    async fn call(
        &self,
        tx: &mut Transaction,
        model: &str,
        ids: &[i64],
        args: Value,
    ) -> OrmResult<Value> {
        (self.0)(tx, model, ids, args).await
    }
}

/// Wrap a closure returning a boxed future:
///
/// ```ignore
/// method(|tx, model, ids, _args| Box::pin(async move {
///     let rows = tx.read(model, ids, Some(&["name"])).await?;
///     Ok(serde_json::json!(rows.len()))
/// }))
/// ```
pub fn method<F>(f: F) -> Arc<dyn ModelMethod>
where
    F: for<'a> Fn(&'a mut Transaction, &'a str, &'a [i64], Value) -> BoxFuture<'a, OrmResult<Value>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnMethod(f))
}

/// Method answering the same value whatever the call
pub fn constant(value: Value) -> Arc<dyn ModelMethod> {
    method(move |_, _, _, _| {
        let value = value.clone();
        Box::pin(async move { Ok(value) })
    })
}
