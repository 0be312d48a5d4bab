mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{init_tracing, registry, root, values};
use oerp_orm::{Context, Field, ModelDefinition, OnDelete, OrmConfig, Registry, ROOT_USER};
use serde_json::json;

static FILES: AtomicUsize = AtomicUsize::new(0);

/// A database file that outlives one registry
struct TempDatabase(std::path::PathBuf);

impl TempDatabase {
    fn new() -> Self {
        let n = FILES.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("oerp-schema-{}-{}.db", std::process::id(), n));
        let _ = std::fs::remove_file(&path);
        Self(path)
    }

    fn config(&self) -> OrmConfig {
        OrmConfig::new(format!("sqlite://{}?mode=rwc", self.0.display()))
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[tokio::test]
async fn test_synchronize_twice_changes_nothing() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let changes = tx.synchronize_schema().await.unwrap();
    assert!(changes.is_empty(), "unexpected changes {:?}", changes);
}

#[tokio::test]
async fn test_required_set_null_link_restricts() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let model = registry.model("test.required").unwrap();
    assert_eq!(
        model.field("partner").unwrap().ondelete(),
        Some(OnDelete::Restrict)
    );

    let info = tx.table_info("test_required").await.unwrap();
    let fk = info.foreign_key("partner").unwrap();
    assert_eq!(fk.table, "test_partner");
    assert_eq!(fk.on_delete, OnDelete::Restrict);
}

#[tokio::test]
async fn test_tables_indexes_and_relations_created() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let info = tx.table_info("test_partner").await.unwrap();
    for column in ["id", "name", "code", "active", "category", "create_uid", "write_date"] {
        assert!(info.column(column).is_some(), "missing column {}", column);
    }
    assert!(info.column("tags").is_none());
    assert!(info.index("test_partner_code_uniq").map(|i| i.unique).unwrap_or(false));

    assert!(tx.table_exists("test_partner_category_rel").await.unwrap());
    let rel = tx.table_info("test_partner_category_rel").await.unwrap();
    assert!(rel.column("partner").is_some());
    assert!(rel.column("category").is_some());

    let tree = tx.table_info("test_category").await.unwrap();
    assert!(tree.column("left").is_some());
    assert!(tree.column("right").is_some());
}

#[tokio::test]
async fn test_new_field_and_wider_column_on_reload() {
    init_tracing();
    let database = TempDatabase::new();

    let first = vec![ModelDefinition::new("test.evolving").field("name", Field::char("Name").size(8))];
    let registry = Registry::builder(database.config())
        .models(first)
        .load()
        .await
        .unwrap();
    let mut tx = registry.begin(ROOT_USER, Context::new()).await.unwrap();
    let id = tx
        .create("test.evolving", values(json!({"name": "short"})))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    registry.close().await.unwrap();

    let second = vec![ModelDefinition::new("test.evolving")
        .field("name", Field::char("Name").size(64).select())
        .field("count", Field::integer("Count").required().default(json!(3)))];
    let registry = Registry::builder(database.config())
        .models(second)
        .load()
        .await
        .unwrap();
    let mut tx = registry.begin(ROOT_USER, Context::new()).await.unwrap();

    let info = tx.table_info("test_evolving").await.unwrap();
    assert!(info.column("count").is_some());
    assert!(info.index("test_evolving_name_index").is_some());

    let rows = tx
        .read("test.evolving", &[id], Some(&["name", "count"]))
        .await
        .unwrap();
    assert_eq!(rows[0]["name"], json!("short"));
    assert_eq!(rows[0]["count"], json!(3));

    tx.write("test.evolving", &[id], values(json!({"name": "a value longer than eight"})))
        .await
        .unwrap();
    assert!(tx.synchronize_schema().await.unwrap().is_empty());
    tx.commit().await.unwrap();
    registry.close().await.unwrap();
}
