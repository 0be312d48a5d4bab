mod common;

use common::{registry, root, values};
use oerp_orm::{Context, Domain, ModelError, Operator};
use serde_json::json;

#[tokio::test]
async fn test_create_then_read_char() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create("test.char", values(json!({"char": "Test"})))
        .await
        .unwrap();
    let rows = tx.read("test.char", &[id], Some(&["char"])).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!(id));
    assert_eq!(rows[0]["char"], json!("Test"));
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_create_applies_defaults() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create("test.char", values(json!({"char": "defaults"})))
        .await
        .unwrap();
    let rows = tx
        .read("test.char", &[id], Some(&["number", "state", "ratio"]))
        .await
        .unwrap();

    assert_eq!(rows[0]["number"], json!(7));
    assert_eq!(rows[0]["state"], json!("draft"));
    assert_eq!(rows[0]["ratio"], json!(null));
}

#[tokio::test]
async fn test_default_get_lists_static_defaults() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let defaults = tx
        .default_get("test.char", Some(&["number", "state", "char"]))
        .await
        .unwrap();

    assert_eq!(defaults.get("number"), Some(&json!(7)));
    assert_eq!(defaults.get("state"), Some(&json!("draft")));
    assert!(defaults.get("char").map(|v| v.is_null()).unwrap_or(true));
}

#[tokio::test]
async fn test_read_keeps_requested_order_and_skips_missing() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let a = tx.create("test.char", values(json!({"char": "a"}))).await.unwrap();
    let b = tx.create("test.char", values(json!({"char": "b"}))).await.unwrap();

    let rows = tx
        .read("test.char", &[b, 9999, a, b], Some(&["char"]))
        .await
        .unwrap();
    let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![b, a]);
}

#[tokio::test]
async fn test_write_updates_values() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx.create("test.char", values(json!({"char": "old"}))).await.unwrap();
    tx.write("test.char", &[id], values(json!({"char": "new", "state": "done"})))
        .await
        .unwrap();

    let rows = tx.read("test.char", &[id], Some(&["char", "state"])).await.unwrap();
    assert_eq!(rows[0]["char"], json!("new"));
    assert_eq!(rows[0]["state"], json!("done"));
}

#[tokio::test]
async fn test_write_sets_log_access_columns() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx.create("test.char", values(json!({"char": "log"}))).await.unwrap();
    let rows = tx
        .read("test.char", &[id], Some(&["create_uid", "create_date", "write_date"]))
        .await
        .unwrap();
    assert_eq!(rows[0]["create_uid"], json!(0));
    assert!(rows[0]["create_date"].is_string());
    assert!(rows[0]["write_date"].is_null());

    tx.write("test.char", &[id], values(json!({"char": "logged"})))
        .await
        .unwrap();
    let rows = tx.read("test.char", &[id], Some(&["write_date"])).await.unwrap();
    assert!(rows[0]["write_date"].is_string());
}

#[tokio::test]
async fn test_size_is_enforced() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let err = tx
        .create("test.char", values(json!({"char": "x".repeat(17)})))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Validation { ref field, .. } if field.as_deref() == Some("char")));
    assert!(err.is_user_error());
}

#[tokio::test]
async fn test_selection_rejects_unknown_key() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let err = tx
        .create("test.char", values(json!({"char": "sel", "state": "archived"})))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Validation { .. }));
}

#[tokio::test]
async fn test_required_field_missing() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let err = tx
        .create("test.partner", values(json!({"code": "P1"})))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Validation { ref field, .. } if field.as_deref() == Some("name")));
}

#[tokio::test]
async fn test_unique_constraint_message() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    tx.create("test.partner", values(json!({"name": "A", "code": "SAME"})))
        .await
        .unwrap();
    let err = tx
        .create("test.partner", values(json!({"name": "B", "code": "SAME"})))
        .await
        .unwrap_err();

    match err {
        ModelError::Integrity { constraint, message } => {
            assert_eq!(constraint.as_deref(), Some("test_partner_code_uniq"));
            assert_eq!(message, "The code of the partner must be unique!");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_field_is_programming_error() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let err = tx
        .create("test.char", values(json!({"missing": 1})))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Programming(_)));
    assert!(!err.is_user_error());
}

#[tokio::test]
async fn test_delete_removes_record() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx.create("test.char", values(json!({"char": "gone"}))).await.unwrap();
    tx.delete("test.char", &[id]).await.unwrap();

    let rows = tx.read("test.char", &[id], Some(&["char"])).await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(tx.search_count("test.char", &Domain::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_restricted_by_required_link() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let partner = tx
        .create("test.partner", values(json!({"name": "Linked"})))
        .await
        .unwrap();
    tx.create("test.required", values(json!({"name": "r", "partner": partner})))
        .await
        .unwrap();

    let err = tx.delete("test.partner", &[partner]).await.unwrap_err();
    assert!(matches!(err, ModelError::Integrity { .. }));
}

#[tokio::test]
async fn test_function_field_getter() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create("test.computed", values(json!({"name": "four"})))
        .await
        .unwrap();
    let rows = tx.read("test.computed", &[id], Some(&["length"])).await.unwrap();
    assert_eq!(rows[0]["length"], json!(4));
}

#[tokio::test]
async fn test_constraint_method_blocks_write() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create("test.computed", values(json!({"name": "fine"})))
        .await
        .unwrap();
    let err = tx
        .write("test.computed", &[id], values(json!({"name": "forbidden"})))
        .await
        .unwrap_err();
    match err {
        ModelError::Validation { message, .. } => assert_eq!(message, "Name must not be 'forbidden'"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrency_window() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx.create("test.char", values(json!({"char": "v1"}))).await.unwrap();
    tx.write("test.char", &[id], values(json!({"char": "v2"})))
        .await
        .unwrap();

    tx.set_context(Context::new().with("read_delta", json!(3600)));
    let err = tx
        .write("test.char", &[id], values(json!({"char": "v3"})))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Concurrency { .. }));

    tx.set_context(Context::new());
    tx.write("test.char", &[id], values(json!({"char": "v3"})))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delegated_fields_live_on_parent() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let employee = tx
        .create("test.employee", values(json!({"name": "Jane", "salary": 10.5})))
        .await
        .unwrap();
    let rows = tx
        .read("test.employee", &[employee], Some(&["name", "salary", "partner"]))
        .await
        .unwrap();
    assert_eq!(rows[0]["name"], json!("Jane"));
    assert_eq!(rows[0]["salary"], json!(10.5));

    let partner = rows[0]["partner"].as_i64().unwrap();
    let parents = tx.read("test.partner", &[partner], Some(&["name"])).await.unwrap();
    assert_eq!(parents[0]["name"], json!("Jane"));

    tx.write("test.employee", &[employee], values(json!({"name": "Janet"})))
        .await
        .unwrap();
    let parents = tx.read("test.partner", &[partner], Some(&["name"])).await.unwrap();
    assert_eq!(parents[0]["name"], json!("Janet"));

    tx.delete("test.employee", &[employee]).await.unwrap();
    let left = tx
        .search("test.partner", &Domain::leaf("id", Operator::Eq, json!(partner)), 0, None, None)
        .await
        .unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn test_rollback_discards_changes() {
    let registry = registry().await;

    let mut tx = root(&registry).await;
    tx.create("test.char", values(json!({"char": "temp"}))).await.unwrap();
    tx.rollback().await.unwrap();

    let mut tx = root(&registry).await;
    assert_eq!(tx.search_count("test.char", &Domain::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_name_get_uses_rec_name() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx.create("test.char", values(json!({"char": "Named"}))).await.unwrap();
    let names = tx.name_get("test.char", &[id]).await.unwrap();
    assert_eq!(names, vec![(id, "Named".to_string())]);
}

#[tokio::test]
async fn test_every_scalar_type_survives_storage() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let partner = tx.create("test.partner", values(json!({"name": "Ref"}))).await.unwrap();
    let reference = format!("test.partner,{}", partner);
    let id = tx
        .create(
            "test.scalar",
            values(json!({
                "flag": true,
                "big": 5_000_000_000i64,
                "amount": 12.346,
                "day": "2024-02-29",
                "moment": "2024-03-01 10:20:30",
                "hour": "08:15:00",
                "blob": "aGVsbG8=",
                "data": {"a": 1, "b": [true]},
                "state": "done",
                "target": reference,
            })),
        )
        .await
        .unwrap();
    let empty = tx.create("test.scalar", values(json!({}))).await.unwrap();

    let rows = tx.read("test.scalar", &[id, empty], None).await.unwrap();
    let row = &rows[0];
    assert_eq!(row["flag"], json!(true));
    assert_eq!(row["big"], json!(5_000_000_000i64));
    assert_eq!(row["amount"], json!(12.35));
    assert_eq!(row["day"], json!("2024-02-29"));
    assert_eq!(row["moment"], json!("2024-03-01 10:20:30"));
    assert_eq!(row["hour"], json!("08:15:00"));
    assert_eq!(row["blob"], json!("aGVsbG8="));
    assert_eq!(row["data"], json!({"a": 1, "b": [true]}));
    assert_eq!(row["state"], json!("done"));
    assert_eq!(row["target"], json!(reference));

    let row = &rows[1];
    assert_eq!(row["flag"], json!(false));
    for name in ["big", "amount", "day", "moment", "hour", "blob", "data", "state", "target"] {
        assert_eq!(row[name], json!(null), "{} should be empty", name);
    }
}

#[tokio::test]
async fn test_relational_values_must_match_field_domain() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let good = tx.create("test.partner", values(json!({"name": "Good one"}))).await.unwrap();
    let bad = tx.create("test.partner", values(json!({"name": "Bad one"}))).await.unwrap();
    let retired = tx
        .create("test.partner", values(json!({"name": "Good old", "active": false})))
        .await
        .unwrap();

    let err = tx
        .create("test.picky", values(json!({"name": "x", "partner": bad})))
        .await
        .unwrap_err();
    match err {
        ModelError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("partner")),
        other => panic!("unexpected error {:?}", other),
    }

    let id = tx
        .create("test.picky", values(json!({"name": "x", "partner": good})))
        .await
        .unwrap();
    tx.write("test.picky", &[id], values(json!({"partner": retired})))
        .await
        .unwrap();
    let err = tx
        .write("test.picky", &[id], values(json!({"partner": bad})))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Validation { .. }));
    tx.write("test.picky", &[id], values(json!({"name": "renamed"})))
        .await
        .unwrap();

    let good_tag = tx.create("test.category", values(json!({"name": "Good tag"}))).await.unwrap();
    let plain_tag = tx.create("test.category", values(json!({"name": "Plain"}))).await.unwrap();
    let err = tx
        .create("test.picky", values(json!({"name": "y", "tags": [good_tag, plain_tag]})))
        .await
        .unwrap_err();
    match err {
        ModelError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("tags")),
        other => panic!("unexpected error {:?}", other),
    }
    tx.create("test.picky", values(json!({"name": "y", "tags": [good_tag]})))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrency_window_covers_unwritten_records() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx.create("test.char", values(json!({"char": "fresh"}))).await.unwrap();
    tx.set_context(Context::new().with("read_delta", json!(3600)));
    let err = tx
        .write("test.char", &[id], values(json!({"char": "late"})))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Concurrency { .. }));
}
