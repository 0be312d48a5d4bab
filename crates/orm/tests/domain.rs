mod common;

use common::{registry, root, values};
use oerp_orm::{Context, Domain, ModelError, Operator, OrderItem, Transaction};
use serde_json::json;

async fn category(tx: &mut Transaction, name: &str, parent: Option<i64>) -> i64 {
    tx.create(
        "test.category",
        values(json!({"name": name, "parent": parent})),
    )
    .await
    .unwrap()
}

fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_child_of_returns_node_and_descendants() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let top = category(&mut tx, "top", None).await;
    let node = category(&mut tx, "node", Some(top)).await;
    let child = category(&mut tx, "child", Some(node)).await;
    let grandchild = category(&mut tx, "grandchild", Some(child)).await;
    let sibling = category(&mut tx, "sibling", Some(top)).await;

    let found = tx
        .search(
            "test.category",
            &Domain::leaf("id", Operator::ChildOf, json!([node])),
            0,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(sorted(found), vec![node, child, grandchild]);

    let found = tx
        .search(
            "test.category",
            &Domain::leaf("parent", Operator::ChildOf, json!([top])),
            0,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(sorted(found), vec![node, child, grandchild, sibling]);
}

#[tokio::test]
async fn test_tree_bounds_follow_reparenting() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let a = category(&mut tx, "a", None).await;
    let b = category(&mut tx, "b", None).await;
    let leaf = category(&mut tx, "leaf", Some(a)).await;

    tx.write("test.category", &[leaf], values(json!({"parent": b})))
        .await
        .unwrap();

    let under_a = tx
        .search("test.category", &Domain::leaf("id", Operator::ChildOf, json!(a)), 0, None, None)
        .await
        .unwrap();
    assert_eq!(under_a, vec![a]);
    let under_b = tx
        .search("test.category", &Domain::leaf("id", Operator::ChildOf, json!(b)), 0, None, None)
        .await
        .unwrap();
    assert_eq!(sorted(under_b), vec![b, leaf]);

    let rows = tx
        .read("test.category", &[b, leaf], Some(&["left", "right"]))
        .await
        .unwrap();
    let (b_left, b_right) = (rows[0]["left"].as_i64().unwrap(), rows[0]["right"].as_i64().unwrap());
    let (l_left, l_right) = (rows[1]["left"].as_i64().unwrap(), rows[1]["right"].as_i64().unwrap());
    assert!(b_left < l_left && l_right < b_right);
}

#[tokio::test]
async fn test_deleting_tree_node_cascades() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let top = category(&mut tx, "top", None).await;
    let child = category(&mut tx, "child", Some(top)).await;
    category(&mut tx, "grandchild", Some(child)).await;

    tx.delete("test.category", &[child]).await.unwrap();
    let left = tx
        .search("test.category", &Domain::new(), 0, None, None)
        .await
        .unwrap();
    assert_eq!(left, vec![top]);
}

#[tokio::test]
async fn test_deleting_set_null_tree_node_orphans_subtree() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let node = |name: &str, parent: Option<i64>| values(json!({"name": name, "parent": parent}));
    let a = tx.create("test.node", node("a", None)).await.unwrap();
    let b = tx.create("test.node", node("b", Some(a))).await.unwrap();
    let c = tx.create("test.node", node("c", Some(b))).await.unwrap();

    tx.delete("test.node", &[b]).await.unwrap();

    let rows = tx.read("test.node", &[c], Some(&["parent"])).await.unwrap();
    assert_eq!(rows[0]["parent"], json!(null));
    let under_a = tx
        .search("test.node", &Domain::leaf("id", Operator::ChildOf, json!([a])), 0, None, None)
        .await
        .unwrap();
    assert_eq!(under_a, vec![a]);
    let under_c = tx
        .search("test.node", &Domain::leaf("id", Operator::ChildOf, json!([c])), 0, None, None)
        .await
        .unwrap();
    assert_eq!(under_c, vec![c]);
}

#[tokio::test]
async fn test_conjunction_narrows_each_operand() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let top = category(&mut tx, "Top", None).await;
    let retail = category(&mut tx, "Retail", Some(top)).await;
    let wholesale = category(&mut tx, "Wholesale", None).await;
    let gold = category(&mut tx, "Gold", Some(retail)).await;
    let silver = category(&mut tx, "Silver", None).await;

    let partner = |name: &str, category: Option<i64>, tags: Vec<i64>| {
        values(json!({"name": name, "category": category, "tags": tags}))
    };
    let p1 = tx.create("test.partner", partner("p1", Some(retail), vec![gold])).await.unwrap();
    tx.create("test.partner", partner("p2", Some(retail), vec![silver])).await.unwrap();
    let p3 = tx
        .create("test.partner", partner("p3", Some(wholesale), vec![gold, silver]))
        .await
        .unwrap();
    tx.create("test.partner", partner("p4", None, vec![])).await.unwrap();

    let by_category = Domain::leaf("category.name", Operator::Like, json!("Retail"));
    let by_tag_name = Domain::leaf("tags.name", Operator::Like, json!("o"));
    let by_tag_tree = Domain::leaf("tags", Operator::ChildOf, json!([top]));

    let cases = [
        (by_category.clone(), by_tag_name.clone(), vec![p1]),
        (by_tag_name.clone(), by_tag_tree.clone(), vec![p1, p3]),
        (by_category.clone(), by_tag_tree.clone(), vec![p1]),
    ];
    for (left, right, expected) in cases {
        let both = tx
            .search("test.partner", &Domain::and(vec![left.clone(), right.clone()]), 0, None, None)
            .await
            .unwrap();
        let left_ids = tx.search("test.partner", &left, 0, None, None).await.unwrap();
        let right_ids = tx.search("test.partner", &right, 0, None, None).await.unwrap();
        assert!(both.iter().all(|id| left_ids.contains(id)), "{:?} not within {:?}", both, left_ids);
        assert!(both.iter().all(|id| right_ids.contains(id)), "{:?} not within {:?}", both, right_ids);
        assert_eq!(sorted(both), expected);
    }
}

#[tokio::test]
async fn test_operators() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let apple = tx.create("test.char", values(json!({"char": "Apple", "number": 1}))).await.unwrap();
    let banana = tx.create("test.char", values(json!({"char": "banana", "number": 5}))).await.unwrap();
    let cherry = tx.create("test.char", values(json!({"char": "Cherry", "number": 10}))).await.unwrap();
    let empty = tx.create("test.char", values(json!({"number": 20}))).await.unwrap();

    let cases: Vec<(Domain, Vec<i64>)> = vec![
        (Domain::leaf("char", Operator::Eq, json!("Apple")), vec![apple]),
        (Domain::leaf("char", Operator::Ne, json!("Apple")), vec![banana, cherry, empty]),
        (Domain::leaf("char", Operator::Like, json!("an")), vec![banana]),
        (Domain::leaf("char", Operator::ILike, json!("A")), vec![apple, banana]),
        (Domain::leaf("char", Operator::NotILike, json!("a")), vec![cherry, empty]),
        (Domain::leaf("char", Operator::Eq, json!(false)), vec![empty]),
        (Domain::leaf("number", Operator::Gt, json!(5)), vec![cherry, empty]),
        (Domain::leaf("number", Operator::Le, json!(5)), vec![apple, banana]),
        (Domain::leaf("number", Operator::In, json!([1, 10])), vec![apple, cherry]),
        (Domain::leaf("number", Operator::NotIn, json!([1, 10])), vec![banana, empty]),
        (Domain::leaf("number", Operator::In, json!([])), vec![]),
        (
            Domain::or(vec![
                Domain::leaf("number", Operator::Eq, json!(1)),
                Domain::leaf("number", Operator::Eq, json!(20)),
            ]),
            vec![apple, empty],
        ),
        (
            Domain::and(vec![
                Domain::leaf("number", Operator::Ge, json!(5)),
                Domain::leaf("number", Operator::Lt, json!(20)),
            ]),
            vec![banana, cherry],
        ),
    ];

    for (domain, expected) in cases {
        let found = tx.search("test.char", &domain, 0, None, None).await.unwrap();
        assert_eq!(sorted(found), expected, "domain {}", domain.to_json());
    }
}

#[tokio::test]
async fn test_json_domain() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let a = tx.create("test.char", values(json!({"char": "a", "number": 1}))).await.unwrap();
    let b = tx.create("test.char", values(json!({"char": "b", "number": 2}))).await.unwrap();
    tx.create("test.char", values(json!({"char": "c", "number": 3}))).await.unwrap();

    let domain = Domain::from_json(&json!(["|", ["char", "=", "a"], ["number", "=", 2]])).unwrap();
    let found = tx.search("test.char", &domain, 0, None, None).await.unwrap();
    assert_eq!(sorted(found), vec![a, b]);
}

#[tokio::test]
async fn test_unknown_field_in_domain() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let err = tx
        .search("test.char", &Domain::leaf("nope", Operator::Eq, json!(1)), 0, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Programming(_)));
}

#[tokio::test]
async fn test_many2one_path_and_names() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let vip = category(&mut tx, "VIP", None).await;
    let basic = category(&mut tx, "Basic", None).await;
    let alice = tx
        .create("test.partner", values(json!({"name": "Alice", "category": vip})))
        .await
        .unwrap();
    let bob = tx
        .create("test.partner", values(json!({"name": "Bob", "category": basic})))
        .await
        .unwrap();
    let carol = tx
        .create("test.partner", values(json!({"name": "Carol"})))
        .await
        .unwrap();

    let found = tx
        .search("test.partner", &Domain::leaf("category.name", Operator::Eq, json!("VIP")), 0, None, None)
        .await
        .unwrap();
    assert_eq!(found, vec![alice]);

    let found = tx
        .search("test.partner", &Domain::leaf("category", Operator::ILike, json!("bas")), 0, None, None)
        .await
        .unwrap();
    assert_eq!(found, vec![bob]);

    let found = tx
        .search("test.partner", &Domain::leaf("category", Operator::Eq, json!(false)), 0, None, None)
        .await
        .unwrap();
    assert_eq!(found, vec![carol]);
}

#[tokio::test]
async fn test_inactive_records_hidden() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let active = tx
        .create("test.partner", values(json!({"name": "On"})))
        .await
        .unwrap();
    let inactive = tx
        .create("test.partner", values(json!({"name": "Off", "active": false})))
        .await
        .unwrap();

    let found = tx.search("test.partner", &Domain::new(), 0, None, None).await.unwrap();
    assert_eq!(found, vec![active]);

    let found = tx
        .search("test.partner", &Domain::leaf("active", Operator::Eq, json!(false)), 0, None, None)
        .await
        .unwrap();
    assert_eq!(found, vec![inactive]);

    tx.set_context(Context::new().with("active_test", json!(false)));
    let found = tx.search("test.partner", &Domain::new(), 0, None, None).await.unwrap();
    assert_eq!(sorted(found), vec![active, inactive]);
}

#[tokio::test]
async fn test_order_offset_limit() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let mut ids = Vec::new();
    for (name, number) in [("d", 4), ("b", 2), ("a", 1), ("c", 3)] {
        ids.push(
            tx.create("test.char", values(json!({"char": name, "number": number})))
                .await
                .unwrap(),
        );
    }

    let order = [OrderItem::asc("char")];
    let found = tx
        .search("test.char", &Domain::new(), 0, None, Some(&order))
        .await
        .unwrap();
    assert_eq!(found, vec![ids[2], ids[1], ids[3], ids[0]]);

    let order = [OrderItem::desc("number")];
    let found = tx
        .search("test.char", &Domain::new(), 1, Some(2), Some(&order))
        .await
        .unwrap();
    assert_eq!(found, vec![ids[3], ids[1]]);

    assert_eq!(tx.search_count("test.char", &Domain::new()).await.unwrap(), 4);
}

#[tokio::test]
async fn test_search_read_and_name_search() {
    let registry = registry().await;
    let mut tx = root(&registry).await;

    let first = tx.create("test.char", values(json!({"char": "Alpha"}))).await.unwrap();
    tx.create("test.char", values(json!({"char": "Beta"}))).await.unwrap();

    let rows = tx
        .search_read(
            "test.char",
            &Domain::leaf("char", Operator::Eq, json!("Alpha")),
            Some(&["char"]),
            0,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!(first));

    let names = tx
        .name_search("test.char", "alp", &Domain::new(), Operator::ILike, Some(10))
        .await
        .unwrap();
    assert_eq!(names, vec![(first, "Alpha".to_string())]);

    let names = tx
        .name_search("test.char", "", &Domain::new(), Operator::ILike, None)
        .await
        .unwrap();
    assert_eq!(names.len(), 2);
}
