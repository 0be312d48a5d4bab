mod common;

use common::{registry, root, values};
use oerp_orm::{Domain, Operator};
use serde_json::json;

async fn target_ids(tx: &mut oerp_orm::Transaction, model: &str, id: i64) -> Vec<i64> {
    let rows = tx.read(model, &[id], Some(&["targets"])).await.unwrap();
    let mut ids: Vec<i64> = rows[0]["targets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_one2many_create_commands() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create(
            "test.o2m",
            values(json!({
                "name": "parent",
                "targets": [
                    ["create", {"name": "t1"}],
                    ["create", {"name": "t2"}],
                ],
            })),
        )
        .await
        .unwrap();

    let targets = target_ids(&mut tx, "test.o2m", id).await;
    assert_eq!(targets.len(), 2);
    let rows = tx
        .read("test.o2m.target", &targets, Some(&["origin"]))
        .await
        .unwrap();
    assert!(rows.iter().all(|row| row["origin"] == json!(id)));
}

#[tokio::test]
async fn test_one2many_delete_all_removes_children() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create(
            "test.o2m",
            values(json!({
                "name": "parent",
                "targets": [
                    ["create", {"name": "t1"}],
                    ["create", {"name": "t2"}],
                    ["create", {"name": "t3"}],
                ],
            })),
        )
        .await
        .unwrap();
    assert_eq!(
        tx.search_count("test.o2m.target", &Domain::new()).await.unwrap(),
        3
    );

    tx.write("test.o2m", &[id], values(json!({"targets": [["delete_all"]]})))
        .await
        .unwrap();

    assert!(target_ids(&mut tx, "test.o2m", id).await.is_empty());
    assert_eq!(
        tx.search_count("test.o2m.target", &Domain::new()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_one2many_unlink_keeps_child() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create(
            "test.o2m",
            values(json!({"name": "parent", "targets": [["create", {"name": "t1"}]]})),
        )
        .await
        .unwrap();
    let child = target_ids(&mut tx, "test.o2m", id).await[0];

    tx.write("test.o2m", &[id], values(json!({"targets": [["unlink", [child]]]})))
        .await
        .unwrap();

    assert!(target_ids(&mut tx, "test.o2m", id).await.is_empty());
    let rows = tx
        .read("test.o2m.target", &[child], Some(&["origin"]))
        .await
        .unwrap();
    assert_eq!(rows[0]["origin"], json!(null));

    tx.write("test.o2m", &[id], values(json!({"targets": [[4, child]]})))
        .await
        .unwrap();
    assert_eq!(target_ids(&mut tx, "test.o2m", id).await, vec![child]);
}

#[tokio::test]
async fn test_one2many_set_replaces_children() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create(
            "test.o2m",
            values(json!({
                "name": "parent",
                "targets": [["create", {"name": "a"}], ["create", {"name": "b"}]],
            })),
        )
        .await
        .unwrap();
    let loose = tx
        .create("test.o2m.target", values(json!({"name": "loose"})))
        .await
        .unwrap();

    tx.write("test.o2m", &[id], values(json!({"targets": [["set", [loose]]]})))
        .await
        .unwrap();
    assert_eq!(target_ids(&mut tx, "test.o2m", id).await, vec![loose]);
}

#[tokio::test]
async fn test_deleting_parent_cascades_to_children() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create(
            "test.o2m",
            values(json!({"name": "parent", "targets": [["create", {"name": "t1"}]]})),
        )
        .await
        .unwrap();
    tx.delete("test.o2m", &[id]).await.unwrap();

    assert_eq!(
        tx.search_count("test.o2m.target", &Domain::new()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_many2many_link_and_unlink() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let a = tx.create("test.m2m.target", values(json!({"name": "a"}))).await.unwrap();
    let b = tx.create("test.m2m.target", values(json!({"name": "b"}))).await.unwrap();

    let id = tx
        .create("test.m2m", values(json!({"name": "m", "targets": [["add", [a, b]]]})))
        .await
        .unwrap();
    assert_eq!(target_ids(&mut tx, "test.m2m", id).await, vec![a, b]);

    // linking twice keeps a single row
    tx.write("test.m2m", &[id], values(json!({"targets": [["add", [a]]]})))
        .await
        .unwrap();
    assert_eq!(target_ids(&mut tx, "test.m2m", id).await, vec![a, b]);

    tx.write("test.m2m", &[id], values(json!({"targets": [["unlink", [a]]]})))
        .await
        .unwrap();
    assert_eq!(target_ids(&mut tx, "test.m2m", id).await, vec![b]);

    // the target record survives
    assert_eq!(
        tx.search_count("test.m2m.target", &Domain::new()).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_many2many_bare_id_list_sets() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let a = tx.create("test.m2m.target", values(json!({"name": "a"}))).await.unwrap();
    let b = tx.create("test.m2m.target", values(json!({"name": "b"}))).await.unwrap();
    let id = tx
        .create("test.m2m", values(json!({"name": "m", "targets": [a]})))
        .await
        .unwrap();

    tx.write("test.m2m", &[id], values(json!({"targets": [b]})))
        .await
        .unwrap();
    assert_eq!(target_ids(&mut tx, "test.m2m", id).await, vec![b]);

    tx.write("test.m2m", &[id], values(json!({"targets": [[5]]})))
        .await
        .unwrap();
    assert!(target_ids(&mut tx, "test.m2m", id).await.is_empty());
}

#[tokio::test]
async fn test_deleting_target_drops_relation_rows() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let a = tx.create("test.m2m.target", values(json!({"name": "a"}))).await.unwrap();
    let id = tx
        .create("test.m2m", values(json!({"name": "m", "targets": [["create", {"name": "new"}], ["add", [a]]]})))
        .await
        .unwrap();
    assert_eq!(target_ids(&mut tx, "test.m2m", id).await.len(), 2);

    tx.delete("test.m2m.target", &[a]).await.unwrap();
    let remaining = target_ids(&mut tx, "test.m2m", id).await;
    assert_eq!(remaining.len(), 1);
    assert!(!remaining.contains(&a));
}

#[tokio::test]
async fn test_search_through_many2many() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let red = tx.create("test.m2m.target", values(json!({"name": "red"}))).await.unwrap();
    let blue = tx.create("test.m2m.target", values(json!({"name": "blue"}))).await.unwrap();
    let first = tx
        .create("test.m2m", values(json!({"name": "first", "targets": [red]})))
        .await
        .unwrap();
    tx.create("test.m2m", values(json!({"name": "second", "targets": [blue]})))
        .await
        .unwrap();

    let found = tx
        .search(
            "test.m2m",
            &Domain::leaf("targets.name", Operator::Eq, json!("red")),
            0,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(found, vec![first]);

    let found = tx
        .search(
            "test.m2m",
            &Domain::leaf("targets", Operator::In, json!([red])),
            0,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(found, vec![first]);
}
