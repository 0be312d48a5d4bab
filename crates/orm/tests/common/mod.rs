#![allow(dead_code)]

use std::sync::Arc;

use oerp_orm::{
    method, Context, Domain, Field, ModelDefinition, OnDelete, Operator, OrmConfig, Registry, Transaction,
    Values, ROOT_USER,
};
use serde_json::{json, Value};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Models exercised by the integration tests
pub fn test_models() -> Vec<ModelDefinition> {
    vec![
        ModelDefinition::new("test.char")
            .field("char", Field::char("Char").size(16))
            .field("note", Field::text("Note").translate())
            .field("number", Field::integer("Number").default(json!(7)))
            .field("ratio", Field::float("Ratio").digits(16, 2))
            .field("day", Field::date("Day"))
            .field("moment", Field::datetime("Moment"))
            .field("level", Field::property(Field::integer("Level")))
            .field(
                "state",
                Field::selection("State", vec![("draft", "Draft"), ("done", "Done")]).default(json!("draft")),
            )
            .rec_name("char"),
        ModelDefinition::new("test.required")
            .field("name", Field::char("Name").required())
            .field(
                "partner",
                Field::many2one("Partner", "test.partner")
                    .on_delete(OnDelete::SetNull)
                    .required(),
            ),
        ModelDefinition::new("test.partner")
            .field("name", Field::char("Name").required())
            .field("code", Field::char("Code").size(8))
            .field("active", Field::boolean("Active").default(json!(true)))
            .field("category", Field::many2one("Category", "test.category"))
            .field(
                "tags",
                Field::many2many("Tags", "test.category", "test_partner_category_rel", "partner", "category"),
            )
            .unique("code_uniq", &["code"], "The code of the partner must be unique!"),
        ModelDefinition::new("test.category")
            .field("name", Field::char("Name").required())
            .field(
                "parent",
                Field::many2one("Parent", "test.category")
                    .on_delete(OnDelete::Cascade)
                    .tree("left", "right"),
            ),
        ModelDefinition::new("test.node")
            .field("name", Field::char("Name"))
            .field("parent", Field::many2one("Parent", "test.node").tree("left", "right")),
        ModelDefinition::new("test.scalar")
            .field("flag", Field::boolean("Flag"))
            .field("big", Field::bigint("Big"))
            .field("amount", Field::numeric("Amount").digits(16, 2))
            .field("day", Field::date("Day"))
            .field("moment", Field::datetime("Moment"))
            .field("hour", Field::time("Hour"))
            .field("blob", Field::binary("Blob"))
            .field("data", Field::dict("Data"))
            .field("state", Field::selection("State", vec![("draft", "Draft"), ("done", "Done")]))
            .field("target", Field::reference("Target", vec![("test.partner", "Partner")])),
        ModelDefinition::new("test.picky")
            .field("name", Field::char("Name"))
            .field(
                "partner",
                Field::many2one("Partner", "test.partner")
                    .domain(Domain::leaf("name", Operator::Like, json!("Good"))),
            )
            .field(
                "tags",
                Field::many2many("Tags", "test.category", "test_picky_category_rel", "picky", "category")
                    .domain(Domain::leaf("name", Operator::Like, json!("Good"))),
            ),
        ModelDefinition::new("test.o2m")
            .field("name", Field::char("Name"))
            .field("targets", Field::one2many("Targets", "test.o2m.target", "origin")),
        ModelDefinition::new("test.o2m.target")
            .field("name", Field::char("Name"))
            .field(
                "origin",
                Field::many2one("Origin", "test.o2m").on_delete(OnDelete::Cascade),
            ),
        ModelDefinition::new("test.m2m")
            .field("name", Field::char("Name"))
            .field(
                "targets",
                Field::many2many("Targets", "test.m2m.target", "test_m2m_target_rel", "origin", "target"),
            ),
        ModelDefinition::new("test.m2m.target").field("name", Field::char("Name")),
        ModelDefinition::new("test.employee")
            .inherits("test.partner", "partner")
            .field("salary", Field::float("Salary")),
        ModelDefinition::new("test.computed")
            .field("name", Field::char("Name"))
            .field(
                "length",
                Field::function(Field::integer("Length"), "get_length"),
            )
            .method(
                "get_length",
                method(|tx, model, ids, _args| {
                    Box::pin(async move {
                        let rows = tx.read(model, ids, Some(&["name"])).await?;
                        let mut values = serde_json::Map::new();
                        for row in rows {
                            let id = row["id"].as_i64().unwrap_or_default();
                            let length = row["name"].as_str().map(|s| s.chars().count()).unwrap_or(0);
                            values.insert(id.to_string(), json!(length));
                        }
                        Ok(Value::Object(values))
                    })
                }),
            )
            .constraint("check_name", "Name must not be 'forbidden'")
            .method(
                "check_name",
                method(|tx, model, ids, _args| {
                    Box::pin(async move {
                        let rows = tx.read(model, ids, Some(&["name"])).await?;
                        Ok(json!(rows.iter().all(|row| row["name"] != json!("forbidden"))))
                    })
                }),
            ),
        ModelDefinition::new("test.cached")
            .field("value", Field::integer("Value"))
            .invalidates(TOTAL_CACHE)
            .method(
                "total",
                method(|tx, model, _ids, _args| {
                    Box::pin(async move {
                        if let Some(total) = tx.cache_get::<i64>(TOTAL_CACHE, "all") {
                            return Ok(json!(total));
                        }
                        let ids = tx.search(model, &Domain::new(), 0, None, None).await?;
                        let rows = tx.read(model, &ids, Some(&["value"])).await?;
                        let total: i64 = rows.iter().filter_map(|row| row["value"].as_i64()).sum();
                        tx.cache_put(TOTAL_CACHE, "all", &total);
                        Ok(json!(total))
                    })
                }),
            ),
    ]
}

/// Process cache filled by the `total` method of `test.cached`
pub const TOTAL_CACHE: &str = "test.cached.total";

pub async fn registry() -> Arc<Registry> {
    registry_with(OrmConfig::new("sqlite::memory:")).await
}

pub async fn registry_with(config: OrmConfig) -> Arc<Registry> {
    init_tracing();
    Registry::builder(config)
        .models(test_models())
        .load()
        .await
        .expect("registry loads")
}

pub async fn root(registry: &Arc<Registry>) -> Transaction {
    registry
        .begin(ROOT_USER, Context::new())
        .await
        .expect("transaction begins")
}

pub fn values(value: Value) -> Values {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}
