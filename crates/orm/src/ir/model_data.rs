//! Fixture bookkeeping
//!
//! Records loaded from fixtures are registered in `ir.model.data` under a
//! `module.fs_id` identifier together with the values they were loaded
//! with. Those values are protected: a write that changes one of them, or a
//! delete, is refused unless the record was flagged `noupdate` or a fixture
//! is being loaded.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use oerp_cache::cache_key;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};
use crate::fields::FieldKind;
use crate::model::{Model, Values};
use crate::query::Sql;
use crate::transaction::Transaction;

pub const MODEL_DATA_CACHE: &str = "ir.model.data.get_id";

const REFERENCE: &str = "$ref";

/// `module.fs_id` identifier of a fixture record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XmlId {
    pub module: String,
    pub fs_id: String,
}

impl XmlId {
    pub fn new(module: impl Into<String>, fs_id: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            fs_id: fs_id.into(),
        }
    }
}

impl FromStr for XmlId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((module, fs_id)) if !module.is_empty() && !fs_id.is_empty() => {
                Ok(XmlId::new(module, fs_id))
            }
            _ => Err(ModelError::Programming(format!(
                "'{}' is not a module.identifier reference",
                s
            ))),
        }
    }
}

impl fmt::Display for XmlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.fs_id)
    }
}

impl Transaction {
    /// Model and id registered under `xml_id`
    pub async fn xml_id_lookup(&mut self, xml_id: &XmlId) -> OrmResult<Option<(String, i64)>> {
        let key = xml_id.to_string();
        if let Some(hit) = self.cache_get::<Option<(String, i64)>>(MODEL_DATA_CACHE, &key) {
            return Ok(hit);
        }
        let mut sql = Sql::new("SELECT \"model\", \"db_id\" FROM \"ir_model_data\" WHERE \"module\" = ");
        sql.push_param(xml_id.module.as_str())
            .push(" AND \"fs_id\" = ")
            .push_param(xml_id.fs_id.as_str());
        let found = self.fetch_optional(&sql).await?.and_then(|row| {
            let model = row.get_string("model")?;
            let id = row.get_opt_i64("db_id")?;
            Some((model, id))
        });
        self.cache_put(MODEL_DATA_CACHE, &key, &found);
        Ok(found)
    }

    /// Id of the `model` record registered under `xml_id`
    pub async fn ref_id(&mut self, model: &str, xml_id: &str) -> OrmResult<i64> {
        let parsed: XmlId = xml_id.parse()?;
        match self.xml_id_lookup(&parsed).await? {
            Some((found, id)) if found == model => Ok(id),
            Some((found, _)) => Err(ModelError::Programming(format!(
                "Reference '{}' is a {} record, not {}",
                xml_id, found, model
            ))),
            None => Err(ModelError::validation(
                model,
                None,
                format!("Reference '{}' not found", xml_id),
            )),
        }
    }

    /// Identifiers of the records of `ids` that have one
    pub async fn xml_ids(&mut self, model: &str, ids: &[i64]) -> OrmResult<HashMap<i64, String>> {
        let mut found = HashMap::new();
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new(
                "SELECT \"db_id\", \"module\", \"fs_id\" FROM \"ir_model_data\" WHERE \"model\" = ",
            );
            sql.push_param(model)
                .push(" AND \"db_id\" IN ")
                .append(Sql::value_list(chunk.iter().copied()))
                .push(" ORDER BY \"id\"");
            for row in self.fetch_all(&sql).await? {
                if let (Some(id), Some(module), Some(fs_id)) = (
                    row.get_opt_i64("db_id"),
                    row.get_string("module"),
                    row.get_string("fs_id"),
                ) {
                    found.entry(id).or_insert_with(|| format!("{}.{}", module, fs_id));
                }
            }
        }
        Ok(found)
    }

    /// Replace `{"$ref": "module.fs_id"}` values by the ids they name
    async fn resolve_references(&mut self, value: &Value) -> OrmResult<Value> {
        let mut pending = vec![];
        collect_references(value, &mut pending);
        let mut resolved: HashMap<String, i64> = HashMap::new();
        for reference in pending {
            if resolved.contains_key(&reference) {
                continue;
            }
            let parsed: XmlId = reference.parse()?;
            let (_, id) = self.xml_id_lookup(&parsed).await?.ok_or_else(|| {
                ModelError::Programming(format!("Unknown fixture reference '{}'", reference))
            })?;
            resolved.insert(reference, id);
        }
        Ok(replace_references(value, &resolved))
    }

    /// Create or update the fixture record `module.fs_id` of `model`
    pub async fn load_fixture(
        &mut self,
        module: &str,
        fs_id: &str,
        model: &str,
        values: Values,
    ) -> OrmResult<i64> {
        let model = self.model(model)?;
        let values = match self.resolve_references(&Value::Object(values)).await? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let stored = fixture_values(&model, &values)?;

        let mut sql = Sql::new(
            "SELECT \"id\", \"db_id\", \"model\", \"noupdate\" FROM \"ir_model_data\" WHERE \"module\" = ",
        );
        sql.push_param(module)
            .push(" AND \"fs_id\" = ")
            .push_param(fs_id);
        let existing = self.fetch_optional(&sql).await?;

        let previous = self.context().clone();
        self.set_context(previous.clone().with("loading_fixture", Value::Bool(true)));
        let result = self
            .apply_fixture(&model, module, fs_id, values, stored, existing)
            .await;
        self.set_context(previous);
        result
    }

    async fn apply_fixture(
        &mut self,
        model: &Model,
        module: &str,
        fs_id: &str,
        values: Values,
        stored: Value,
        existing: Option<crate::backends::Row>,
    ) -> OrmResult<i64> {
        if let Some(row) = existing {
            let data_id = row.get_i64("id")?;
            let db_id = row.get_i64("db_id")?;
            if row.get_string("model").as_deref() != Some(model.name.as_str()) {
                return Err(ModelError::Programming(format!(
                    "Fixture {}.{} changed model",
                    module, fs_id
                )));
            }
            if row.get("noupdate").and_then(DatabaseValue::as_bool).unwrap_or(false) {
                debug!("fixture {}.{} is noupdate, skipped", module, fs_id);
                return Ok(db_id);
            }
            self.write(&model.name, &[db_id], values).await?;
            let mut update = Sql::new("UPDATE \"ir_model_data\" SET \"values\" = ");
            update
                .push_param(stored.to_string())
                .push(" WHERE \"id\" = ")
                .push_param(data_id);
            self.execute(&update).await?;
            return Ok(db_id);
        }

        let id = self.create(&model.name, values).await?;
        let mut insert = Sql::new(
            "INSERT INTO \"ir_model_data\" (\"module\", \"fs_id\", \"model\", \"db_id\", \"values\", \"noupdate\") VALUES ",
        );
        insert.append(Sql::value_list::<_, DatabaseValue>([
            module.into(),
            fs_id.into(),
            model.name.as_str().into(),
            id.into(),
            stored.to_string().into(),
            false.into(),
        ]));
        self.execute(&insert).await?;
        self.cache_reset(MODEL_DATA_CACHE);
        info!("Loaded fixture {}.{} as {} {}", module, fs_id, model.name, id);
        Ok(id)
    }

    /// Refuse writes changing fixture values (`values` given) or deletes
    /// (`values` is `None`) of fixture records
    pub(crate) async fn check_xml_protected(
        &mut self,
        model: &Model,
        ids: &[i64],
        values: Option<&Values>,
    ) -> OrmResult<()> {
        if self.context().loading_fixture() {
            return Ok(());
        }
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new("SELECT \"values\" FROM \"ir_model_data\" WHERE \"model\" = ");
            sql.push_param(model.name.as_str())
                .push(" AND \"noupdate\" = ")
                .push_param(false)
                .push(" AND \"db_id\" IN ")
                .append(Sql::value_list(chunk.iter().copied()));
            let rows = self.fetch_all(&sql).await?;
            if rows.is_empty() {
                continue;
            }
            let Some(values) = values else {
                return Err(self
                    .localize(ModelError::access(
                        &model.name,
                        "delete",
                        "You can not delete a record that was loaded from fixture data!",
                    ))
                    .await);
            };
            let written = fixture_values(model, values)?;
            for row in rows {
                let raw = row.get_string("values").unwrap_or_default();
                let Ok(Value::Object(loaded)) = serde_json::from_str::<Value>(&raw) else {
                    continue;
                };
                let conflict = written.as_object().into_iter().flatten().any(|(name, value)| {
                    loaded.get(name).map(|original| original != value).unwrap_or(false)
                });
                if conflict {
                    return Err(self
                        .localize(ModelError::access(
                            &model.name,
                            "write",
                            "You can not modify a value that was loaded from fixture data!",
                        ))
                        .await);
                }
            }
        }
        Ok(())
    }

    /// Forget the fixture rows of deleted records
    pub(crate) async fn delete_model_data(&mut self, model: &Model, ids: &[i64]) -> OrmResult<()> {
        let mut removed = 0;
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new("DELETE FROM \"ir_model_data\" WHERE \"model\" = ");
            sql.push_param(model.name.as_str())
                .push(" AND \"db_id\" IN ")
                .append(Sql::value_list(chunk.iter().copied()));
            removed += self.execute(&sql).await?;
        }
        if removed > 0 {
            self.cache_reset(MODEL_DATA_CACHE);
        }
        Ok(())
    }
}

/// Normalized form of the stored-field values of a fixture, used to detect
/// conflicting writes
fn fixture_values(model: &Model, values: &Values) -> OrmResult<Value> {
    let mut normalized = Map::new();
    for (name, value) in values {
        let Some(field) = model.any_field(name) else {
            continue;
        };
        let kind = &field.kind;
        if kind.is_x2many() || matches!(kind, FieldKind::Function(_)) {
            continue;
        }
        normalized.insert(name.clone(), field.to_storage_json(&model.name, value)?);
    }
    Ok(Value::Object(normalized))
}

fn collect_references(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => match map.get(REFERENCE) {
            Some(Value::String(reference)) if map.len() == 1 => found.push(reference.clone()),
            _ => map.values().for_each(|v| collect_references(v, found)),
        },
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, found)),
        _ => {}
    }
}

fn replace_references(value: &Value, resolved: &HashMap<String, i64>) -> Value {
    match value {
        Value::Object(map) => match map.get(REFERENCE) {
            Some(Value::String(reference)) if map.len() == 1 => resolved
                .get(reference)
                .map(|id| Value::from(*id))
                .unwrap_or(Value::Null),
            _ => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), replace_references(v, resolved)))
                    .collect(),
            ),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| replace_references(v, resolved)).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_xml_id_parsing() {
        let id: XmlId = "res.group_admin".parse().unwrap();
        assert_eq!(id.module, "res");
        assert_eq!(id.fs_id, "group_admin");
        assert_eq!(id.to_string(), "res.group_admin");
        assert!("nodot".parse::<XmlId>().is_err());
    }

    #[test]
    fn test_references_nested_in_commands() {
        let value = json!({
            "parent": {"$ref": "test.root"},
            "groups": [["add", [{"$ref": "res.group_admin"}]]],
        });
        let mut found = Vec::new();
        collect_references(&value, &mut found);
        found.sort();
        assert_eq!(found, vec!["res.group_admin", "test.root"]);

        let resolved: HashMap<String, i64> =
            [("test.root".to_string(), 3), ("res.group_admin".to_string(), 1)].into();
        assert_eq!(
            replace_references(&value, &resolved),
            json!({"parent": 3, "groups": [["add", [1]]]})
        );
    }
}
