//! View descriptions
//!
//! `fields_view_get` answers the arch stored in `ir.ui.view` (the given view
//! or the one with the lowest priority for the model and type) along with
//! the description of the fields it shows. Without a stored view a default
//! arch listing every field is generated.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::{ModelError, OrmResult};
use crate::model::Model;
use crate::query::Sql;
use crate::transaction::Transaction;

static FIELD_NODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<field\s+[^>]*?name\s*=\s*"([^"]+)""#).expect("valid regex"));

/// Field names referenced by an arch
pub fn arch_fields(arch: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in FIELD_NODE.captures_iter(arch) {
        let name = capture[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Arch listing every field but the bookkeeping ones
pub fn default_arch(model: &Model, view_type: &str) -> String {
    let title = if model.description.is_empty() {
        model.name.as_str()
    } else {
        model.description.as_str()
    };
    let mut arch = format!("<{} string=\"{}\">", view_type, escape_attribute(title));
    for name in model.field_names() {
        if name == "id" || crate::model::LOG_ACCESS_FIELDS.contains(&name.as_str()) {
            continue;
        }
        if view_type == "tree" {
            let Some(field) = model.any_field(&name) else {
                continue;
            };
            if field.kind.is_x2many() {
                continue;
            }
        }
        arch.push_str(&format!("<field name=\"{}\"/>", name));
    }
    arch.push_str(&format!("</{}>", view_type));
    arch
}

impl Transaction {
    pub async fn fields_view_get(
        &mut self,
        model: &str,
        view_id: Option<i64>,
        view_type: &str,
    ) -> OrmResult<Value> {
        let definition = self.model(model)?;
        let mut sql = Sql::new("SELECT \"id\", \"type\", \"arch\" FROM \"ir_ui_view\" WHERE ");
        match view_id {
            Some(id) => {
                sql.push("\"id\" = ").push_param(id);
            }
            None => {
                sql.push("\"model\" = ")
                    .push_param(model)
                    .push(" AND \"type\" = ")
                    .push_param(view_type)
                    .push(" ORDER BY \"priority\", \"id\"");
            }
        }
        let stored = self.fetch_optional(&sql).await?;
        if view_id.is_some() && stored.is_none() {
            return Err(ModelError::Programming(format!("View {:?} does not exist", view_id)));
        }

        let (id, view_type, arch) = match stored {
            Some(row) => (
                row.get_opt_i64("id"),
                row.get_string("type").unwrap_or_else(|| view_type.to_string()),
                row.get_string("arch")
                    .filter(|arch| !arch.trim().is_empty())
                    .unwrap_or_else(|| default_arch(&definition, view_type)),
            ),
            None => (None, view_type.to_string(), default_arch(&definition, view_type)),
        };

        let names = arch_fields(&arch);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let fields = self.fields_get(model, Some(&refs)).await?;
        let mut result = Map::new();
        result.insert("model".into(), json!(model));
        result.insert("type".into(), json!(view_type));
        result.insert("view_id".into(), json!(id));
        result.insert("arch".into(), json!(arch));
        result.insert("fields".into(), Value::Object(fields));
        Ok(Value::Object(result))
    }
}
