mod common;

use common::{registry, root, values, TOTAL_CACHE};
use serde_json::json;

#[tokio::test]
async fn test_write_resets_bound_cache() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let a = tx.create("test.cached", values(json!({"value": 2}))).await.unwrap();
    tx.create("test.cached", values(json!({"value": 3}))).await.unwrap();

    assert_eq!(tx.call("test.cached", "total", &[], json!({})).await.unwrap(), json!(5));
    assert_eq!(tx.cache_get::<i64>(TOTAL_CACHE, "all"), Some(5));

    tx.write("test.cached", &[a], values(json!({"value": 10}))).await.unwrap();
    assert_eq!(tx.cache_get::<i64>(TOTAL_CACHE, "all"), None);
    assert_eq!(tx.call("test.cached", "total", &[], json!({})).await.unwrap(), json!(13));

    tx.delete("test.cached", &[a]).await.unwrap();
    assert_eq!(tx.call("test.cached", "total", &[], json!({})).await.unwrap(), json!(3));
}

#[tokio::test]
async fn test_unrelated_writes_keep_cache() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    tx.create("test.cached", values(json!({"value": 4}))).await.unwrap();
    tx.call("test.cached", "total", &[], json!({})).await.unwrap();

    tx.create("test.char", values(json!({"char": "other"}))).await.unwrap();
    assert_eq!(tx.cache_get::<i64>(TOTAL_CACHE, "all"), Some(4));

    tx.cache_reset(TOTAL_CACHE);
    assert_eq!(tx.cache_get::<i64>(TOTAL_CACHE, "all"), None);
}

#[tokio::test]
async fn test_cache_cleared_on_new_transaction() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    tx.create("test.cached", values(json!({"value": 1}))).await.unwrap();
    tx.call("test.cached", "total", &[], json!({})).await.unwrap();
    assert_eq!(tx.cache_get::<i64>(TOTAL_CACHE, "all"), Some(1));
    tx.commit().await.unwrap();

    let tx = root(&registry).await;
    assert_eq!(tx.cache_get::<i64>(TOTAL_CACHE, "all"), None);
    tx.rollback().await.unwrap();
}
