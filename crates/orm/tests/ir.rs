mod common;

use common::{registry, root, values};
use oerp_orm::{Context, Domain, ModelError, Operator, Sql, XmlId};
use serde_json::json;

#[tokio::test]
async fn test_fixture_create_then_update() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .load_fixture("base", "partner_acme", "test.partner", values(json!({"name": "Acme"})))
        .await
        .unwrap();
    let again = tx
        .load_fixture("base", "partner_acme", "test.partner", values(json!({"name": "Acme Corp"})))
        .await
        .unwrap();
    assert_eq!(id, again);

    let rows = tx.read("test.partner", &[id], Some(&["name"])).await.unwrap();
    assert_eq!(rows[0]["name"], json!("Acme Corp"));

    let xml_id: XmlId = "base.partner_acme".parse().unwrap();
    assert_eq!(
        tx.xml_id_lookup(&xml_id).await.unwrap(),
        Some(("test.partner".to_string(), id))
    );
    assert_eq!(tx.ref_id("test.partner", "base.partner_acme").await.unwrap(), id);
    assert_eq!(
        tx.xml_ids("test.partner", &[id]).await.unwrap().get(&id).map(String::as_str),
        Some("base.partner_acme")
    );
}

#[tokio::test]
async fn test_fixture_references() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let category = tx
        .load_fixture("base", "category_vip", "test.category", values(json!({"name": "VIP"})))
        .await
        .unwrap();
    let partner = tx
        .load_fixture(
            "base",
            "partner_vip",
            "test.partner",
            values(json!({"name": "Vip", "category": {"$ref": "base.category_vip"}})),
        )
        .await
        .unwrap();

    let rows = tx.read("test.partner", &[partner], Some(&["category"])).await.unwrap();
    assert_eq!(rows[0]["category"], json!(category));
}

#[tokio::test]
async fn test_fixture_records_are_protected() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .load_fixture("base", "partner_fixed", "test.partner", values(json!({"name": "Fixed"})))
        .await
        .unwrap();

    let err = tx
        .write("test.partner", &[id], values(json!({"name": "Changed"})))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Access { .. }));

    // values the fixture does not set stay writable
    tx.write("test.partner", &[id], values(json!({"code": "FX"})))
        .await
        .unwrap();

    let err = tx.delete("test.partner", &[id]).await.unwrap_err();
    assert!(matches!(err, ModelError::Access { .. }));
}

#[tokio::test]
async fn test_unknown_reference() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let err = tx.ref_id("test.partner", "base.nothing").await.unwrap_err();
    assert!(err.is_user_error());
    assert!("no_dot".parse::<XmlId>().is_err());
}

#[tokio::test]
async fn test_translated_values() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let id = tx
        .create("test.char", values(json!({"char": "t", "note": "Hello"})))
        .await
        .unwrap();

    tx.set_context(Context::new().with_language("fr_FR"));
    let rows = tx.read("test.char", &[id], Some(&["note"])).await.unwrap();
    assert_eq!(rows[0]["note"], json!("Hello"));

    tx.write("test.char", &[id], values(json!({"note": "Bonjour"})))
        .await
        .unwrap();
    let rows = tx.read("test.char", &[id], Some(&["note"])).await.unwrap();
    assert_eq!(rows[0]["note"], json!("Bonjour"));

    let found = tx
        .search("test.char", &Domain::leaf("note", Operator::ILike, json!("bonj")), 0, None, None)
        .await
        .unwrap();
    assert_eq!(found, vec![id]);

    tx.set_context(Context::new());
    let rows = tx.read("test.char", &[id], Some(&["note"])).await.unwrap();
    assert_eq!(rows[0]["note"], json!("Hello"));
}

#[tokio::test]
async fn test_translated_labels_and_errors() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    for (name, kind, src, value) in [
        ("test.char,char", "field", "Char", "Caractère"),
        ("test.char,state", "selection", "Draft", "Brouillon"),
        ("test.partner", "error", "The code of the partner must be unique!", "Le code doit être unique !"),
    ] {
        tx.create(
            "ir.translation",
            values(json!({
                "name": name,
                "lang": "fr_FR",
                "type": kind,
                "src": src,
                "value": value,
            })),
        )
        .await
        .unwrap();
    }

    tx.set_context(Context::new().with_language("fr_FR"));
    let fields = tx.fields_get("test.char", Some(&["char", "state"])).await.unwrap();
    assert_eq!(fields["char"]["string"], json!("Caractère"));
    assert_eq!(fields["state"]["selection"], json!([["draft", "Brouillon"], ["done", "Done"]]));

    tx.create("test.partner", values(json!({"name": "A", "code": "X"})))
        .await
        .unwrap();
    let err = tx
        .create("test.partner", values(json!({"name": "B", "code": "X"})))
        .await
        .unwrap_err();
    match err {
        ModelError::Integrity { message, .. } => assert_eq!(message, "Le code doit être unique !"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_property_values() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    tx.set_property_default("test.char", "level", &json!(3)).await.unwrap();
    let a = tx.create("test.char", values(json!({"char": "a"}))).await.unwrap();
    let b = tx
        .create("test.char", values(json!({"char": "b", "level": 9})))
        .await
        .unwrap();

    let rows = tx.read("test.char", &[a, b], Some(&["level"])).await.unwrap();
    assert_eq!(rows[0]["level"], json!(3));
    assert_eq!(rows[1]["level"], json!(9));

    let found = tx
        .search("test.char", &Domain::leaf("level", Operator::Gt, json!(5)), 0, None, None)
        .await
        .unwrap();
    assert_eq!(found, vec![b]);

    tx.delete("test.char", &[b]).await.unwrap();
    let count = Sql::new("SELECT COUNT(*) FROM \"ir_property\" WHERE \"res\" IS NOT NULL");
    assert_eq!(tx.fetch_count(&count).await.unwrap(), 0);
}

#[tokio::test]
async fn test_fields_get_describes_fields() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let fields = tx.fields_get("test.partner", None).await.unwrap();
    assert_eq!(fields["name"]["type"], json!("char"));
    assert_eq!(fields["name"]["required"], json!(true));
    assert_eq!(fields["code"]["size"], json!(8));
    assert_eq!(fields["category"]["relation"], json!("test.category"));
    assert_eq!(fields["tags"]["type"], json!("many2many"));
    assert!(fields.get("create_date").is_some());

    let fields = tx.fields_get("test.o2m", Some(&["targets"])).await.unwrap();
    assert_eq!(fields["targets"]["relation_field"], json!("origin"));

    let err = tx.fields_get("test.partner", Some(&["missing"])).await.unwrap_err();
    assert!(matches!(err, ModelError::Programming(_)));
}

#[tokio::test]
async fn test_fields_view_get() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let view = tx.fields_view_get("test.partner", None, "form").await.unwrap();
    assert_eq!(view["type"], json!("form"));
    assert!(view["fields"].get("name").is_some());

    tx.create(
        "ir.ui.view",
        values(json!({
            "model": "test.partner",
            "type": "tree",
            "arch": "<tree><field name=\"name\"/><field name=\"code\"/></tree>",
        })),
    )
    .await
    .unwrap();
    let view = tx.fields_view_get("test.partner", None, "tree").await.unwrap();
    let fields = view["fields"].as_object().unwrap();
    assert_eq!(fields.len(), 2);
    assert!(fields.contains_key("code"));
}
