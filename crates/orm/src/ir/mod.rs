//! Base models installed in every database
//!
//! Users and groups, model access lines, record rules, translations,
//! properties, fixture bookkeeping and views. The ORM itself reads these
//! tables with plain SQL so that no access check or rule applies to its own
//! lookups.

pub mod access;
pub mod model_data;
pub mod property;
pub mod rule;
pub mod translation;
pub mod user;
pub mod view;

use serde_json::json;

use crate::error::OrmResult;
use crate::fields::{Field, OnDelete};
use crate::model::{ModelDefinition, USER_MODEL};
use crate::transaction::Transaction;

pub use access::AccessMode;
pub use model_data::XmlId;

/// Definitions of the base models
pub fn definitions() -> Vec<ModelDefinition> {
    vec![
        ModelDefinition::new("res.group")
            .description("Group")
            .field("name", Field::char("Name").required().translate())
            .field(
                "users",
                Field::many2many("Users", USER_MODEL, "res_user_group_rel", "group", "user"),
            )
            .unique("name_uniq", &["name"], "The name of the group must be unique!")
            .invalidates(access::ACCESS_CACHE)
            .invalidates(rule::RULE_CACHE)
            .invalidates(user::GROUPS_CACHE),
        ModelDefinition::new(USER_MODEL)
            .description("User")
            .field("name", Field::char("Name").required().select())
            .field("login", Field::char("Login").required().size(64))
            .field("active", Field::boolean("Active").default(json!(true)))
            .field("language", Field::char("Language").size(16))
            .field(
                "groups",
                Field::many2many("Groups", "res.group", "res_user_group_rel", "user", "group"),
            )
            .unique("login_key", &["login"], "You can not have two users with the same login!")
            .invalidates(access::ACCESS_CACHE)
            .invalidates(rule::RULE_CACHE)
            .invalidates(user::GROUPS_CACHE),
        ModelDefinition::new("ir.model.access")
            .description("Model access")
            .field("model", Field::char("Model").required().select())
            .field(
                "group",
                Field::many2one("Group", "res.group").on_delete(OnDelete::Cascade),
            )
            .field("perm_read", Field::boolean("Read Access").default(json!(false)))
            .field("perm_write", Field::boolean("Write Access").default(json!(false)))
            .field("perm_create", Field::boolean("Create Access").default(json!(false)))
            .field("perm_delete", Field::boolean("Delete Access").default(json!(false)))
            .field("description", Field::text("Description"))
            .rec_name("model")
            .invalidates(access::ACCESS_CACHE),
        ModelDefinition::new("ir.rule.group")
            .description("Rule group")
            .field("name", Field::char("Name").select())
            .field("model", Field::char("Model").required().select())
            .field(
                "global_p",
                Field::boolean("Global")
                    .default(json!(true))
                    .help("Make the rule global so every user must follow it"),
            )
            .field(
                "groups",
                Field::many2many("Groups", "res.group", "ir_rule_group_group_rel", "rule_group", "group"),
            )
            .field("rules", Field::one2many("Rules", "ir.rule", "rule_group"))
            .field("perm_read", Field::boolean("Read Access").default(json!(true)))
            .field("perm_write", Field::boolean("Write Access").default(json!(true)))
            .field("perm_create", Field::boolean("Create Access").default(json!(true)))
            .field("perm_delete", Field::boolean("Delete Access").default(json!(true)))
            .invalidates(rule::RULE_CACHE),
        ModelDefinition::new("ir.rule")
            .description("Rule")
            .field(
                "rule_group",
                Field::many2one("Group", "ir.rule.group")
                    .required()
                    .on_delete(OnDelete::Cascade)
                    .select(),
            )
            .field(
                "domain",
                Field::text("Domain")
                    .required()
                    .help("JSON domain, {\"$user\": field} is replaced by the user's value"),
            )
            .rec_name("domain")
            .constraint(rule::CHECK_DOMAIN, "Invalid domain")
            .method(rule::CHECK_DOMAIN, rule::check_domain_method())
            .invalidates(rule::RULE_CACHE),
        ModelDefinition::new("ir.translation")
            .description("Translation")
            .field("name", Field::char("Field Name").required().select())
            .field("lang", Field::char("Language").size(16).select())
            .field(
                "type",
                Field::selection(
                    "Type",
                    vec![
                        ("field", "Field"),
                        ("help", "Help"),
                        ("model", "Model"),
                        ("selection", "Selection"),
                        ("error", "Error"),
                        ("view", "View"),
                    ],
                )
                .required()
                .select(),
            )
            .field("src", Field::text("Source"))
            .field("value", Field::text("Translation Value"))
            .field("res_id", Field::integer("Resource ID").default(json!(0)).select())
            .field("fuzzy", Field::boolean("Fuzzy").default(json!(false)))
            .rec_name("src")
            .invalidates(translation::TRANSLATION_CACHE),
        ModelDefinition::new("ir.property")
            .description("Property")
            .field("name", Field::char("Field").required().select())
            .field("model", Field::char("Model").required().select())
            .field("res", Field::char("Resource").select())
            .field("value", Field::text("Value"))
            .invalidates(property::PROPERTY_CACHE),
        ModelDefinition::new("ir.model.data")
            .description("Model data")
            .field("module", Field::char("Module").required().select())
            .field("fs_id", Field::char("Identifier on File System").required().select())
            .field("model", Field::char("Model").required().select())
            .field("db_id", Field::integer("Resource ID").select())
            .field("values", Field::text("Values"))
            .field("noupdate", Field::boolean("No Update").default(json!(false)))
            .rec_name("fs_id")
            .unique("fs_id_module_uniq", &["fs_id", "module"], "The triple (fs_id, module, model) must be unique!")
            .invalidates(model_data::MODEL_DATA_CACHE),
        ModelDefinition::new("ir.ui.view")
            .description("View")
            .field("model", Field::char("Model").required().select())
            .field(
                "type",
                Field::selection("View Type", vec![("tree", "Tree"), ("form", "Form")])
                    .required()
                    .default(json!("form")),
            )
            .field("arch", Field::text("View Architecture"))
            .field("priority", Field::integer("Priority").default(json!(16)))
            .rec_name("model"),
    ]
}

/// Records every database needs: the superuser and the administrator
pub async fn install(tx: &mut Transaction) -> OrmResult<()> {
    user::install_users(tx).await
}
