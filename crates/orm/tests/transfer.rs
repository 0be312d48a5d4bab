mod common;

use common::{registry, root, values};
use oerp_orm::{Domain, ModelError, Operator, Values};
use serde_json::{json, Value};

#[tokio::test]
async fn test_copy_of_missing_record_fails() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let err = tx.copy("test.char", &[4242], Values::new()).await.unwrap_err();
    assert!(matches!(err, ModelError::Programming(_)), "unexpected error {:?}", err);
    assert_eq!(tx.search_count("test.char", &Domain::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_copy_duplicates_children() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let original = tx
        .create(
            "test.o2m",
            values(json!({
                "name": "original",
                "targets": [["create", {"name": "a"}], ["create", {"name": "b"}]],
            })),
        )
        .await
        .unwrap();

    let copies = tx
        .copy("test.o2m", &[original], values(json!({"name": "copy"})))
        .await
        .unwrap();
    assert_eq!(copies.len(), 1);
    let copy = copies[0];
    assert_ne!(copy, original);

    let rows = tx
        .read("test.o2m", &[original, copy], Some(&["name", "targets"]))
        .await
        .unwrap();
    assert_eq!(rows[1]["name"], json!("copy"));
    let original_children = rows[0]["targets"].as_array().unwrap().clone();
    let copied_children = rows[1]["targets"].as_array().unwrap().clone();
    assert_eq!(copied_children.len(), 2);
    assert!(copied_children.iter().all(|c| !original_children.contains(c)));
    assert_eq!(
        tx.search_count("test.o2m.target", &Domain::new()).await.unwrap(),
        4
    );
}

#[tokio::test]
async fn test_copy_shares_many2many_targets() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let target = tx.create("test.m2m.target", values(json!({"name": "t"}))).await.unwrap();
    let original = tx
        .create("test.m2m", values(json!({"name": "m", "targets": [target]})))
        .await
        .unwrap();
    let copy = tx.copy("test.m2m", &[original], Values::new()).await.unwrap()[0];

    let rows = tx.read("test.m2m", &[copy], Some(&["name", "targets"])).await.unwrap();
    assert_eq!(rows[0]["name"], json!("m"));
    assert_eq!(rows[0]["targets"], json!([target]));
    assert_eq!(
        tx.search_count("test.m2m.target", &Domain::new()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_export_names_and_ids() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let category = tx
        .load_fixture("base", "cat_retail", "test.category", values(json!({"name": "Retail"})))
        .await
        .unwrap();
    let partner = tx
        .create("test.partner", values(json!({"name": "Shop", "category": category})))
        .await
        .unwrap();

    let rows = tx
        .export_data(
            "test.partner",
            &[partner],
            &["name", "category", "category:id", "category.name", "id"],
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![vec![
            json!("Shop"),
            json!("Retail"),
            json!("base.cat_retail"),
            json!("Retail"),
            json!(partner),
        ]]
    );
}

#[tokio::test]
async fn test_export_spreads_one2many_lines() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create(
            "test.o2m",
            values(json!({
                "name": "parent",
                "targets": [["create", {"name": "first"}], ["create", {"name": "second"}]],
            })),
        )
        .await
        .unwrap();

    let rows = tx
        .export_data("test.o2m", &[id], &["name", "targets.name"])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], json!("parent"));
    assert_eq!(rows[1][0], Value::Null);
    let mut names = vec![rows[0][1].clone(), rows[1][1].clone()];
    names.sort_by_key(|v| v.as_str().map(str::to_string));
    assert_eq!(names, vec![json!("first"), json!("second")]);

    let rows = tx.export_data("test.o2m", &[id], &["targets"]).await.unwrap();
    assert_eq!(rows.len(), 1);
    let joined = rows[0][0].as_str().unwrap();
    assert!(joined.contains("first") && joined.contains("second"));
}

#[tokio::test]
async fn test_import_creates_records_with_relations() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let vip = tx
        .create("test.category", values(json!({"name": "VIP"})))
        .await
        .unwrap();

    let result = tx
        .import_data(
            "test.partner",
            &["name", "code", "category", "active"],
            &[
                vec![json!("Alpha"), json!("A1"), json!("VIP"), json!("yes")],
                vec![json!("Beta"), json!(""), json!(""), json!("0")],
            ],
        )
        .await
        .unwrap();
    assert_eq!(result.imported, 2);
    assert_eq!(result.error, None);

    let alpha = tx
        .search_read(
            "test.partner",
            &Domain::leaf("name", Operator::Eq, json!("Alpha")),
            Some(&["code", "category", "active"]),
            0,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(alpha[0]["code"], json!("A1"));
    assert_eq!(alpha[0]["category"], json!(vip));
    assert_eq!(alpha[0]["active"], json!(true));
}

#[tokio::test]
async fn test_import_one2many_lines() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let result = tx
        .import_data(
            "test.o2m",
            &["name", "targets.name"],
            &[
                vec![json!("one"), json!("1a")],
                vec![json!(""), json!("1b")],
                vec![json!("two"), json!("2a")],
            ],
        )
        .await
        .unwrap();
    assert_eq!(result.imported, 2);

    let one = tx
        .search("test.o2m", &Domain::leaf("name", Operator::Eq, json!("one")), 0, None, None)
        .await
        .unwrap();
    let rows = tx.read("test.o2m", &one, Some(&["targets"])).await.unwrap();
    assert_eq!(rows[0]["targets"].as_array().unwrap().len(), 2);
    assert_eq!(
        tx.search_count("test.o2m.target", &Domain::new()).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_import_stops_at_first_bad_row() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let result = tx
        .import_data(
            "test.char",
            &["char", "number"],
            &[
                vec![json!("ok"), json!("4")],
                vec![json!("bad"), json!("four")],
                vec![json!("never"), json!("5")],
            ],
        )
        .await
        .unwrap();
    assert_eq!(result.imported, 1);
    let (row, message) = result.error.unwrap();
    assert_eq!(row, 1);
    assert!(message.contains("four"));
    assert_eq!(tx.search_count("test.char", &Domain::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_import_by_identifier_updates() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let first = tx
        .import_data(
            "test.category",
            &["id", "name"],
            &[vec![json!("data.cat_a"), json!("A")]],
        )
        .await
        .unwrap();
    assert_eq!(first.imported, 1);
    let second = tx
        .import_data(
            "test.category",
            &["id", "name"],
            &[vec![json!("data.cat_a"), json!("A renamed")]],
        )
        .await
        .unwrap();
    assert_eq!(second.imported, 1);

    let id = tx.ref_id("test.category", "data.cat_a").await.unwrap();
    let rows = tx.read("test.category", &[id], Some(&["name"])).await.unwrap();
    assert_eq!(rows[0]["name"], json!("A renamed"));
    assert_eq!(tx.search_count("test.category", &Domain::new()).await.unwrap(), 1);
}
