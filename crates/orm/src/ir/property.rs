//! Properties
//!
//! Property fields have no column: their values live in `ir.property`, one
//! row per `(model, field, record)` plus an optional default row with a
//! NULL `res`. Relational values are stored as `"model,id"`, others as JSON.

use std::collections::HashMap;

use oerp_cache::cache_key;
use serde_json::Value;

use crate::backends::DatabaseValue;
use crate::error::OrmResult;
use crate::fields::conversion::{id_from_value, is_empty_value};
use crate::fields::{Field, FieldKind};
use crate::model::Model;
use crate::query::Sql;
use crate::transaction::Transaction;

pub const PROPERTY_CACHE: &str = "ir.property.default";

/// Decode the `value` column of a property row
pub fn decode_value(field: &Field, raw: &str) -> Value {
    match field.kind.value_kind() {
        FieldKind::Many2One(_) => raw
            .split_once(',')
            .and_then(|(_, id)| id.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or(Value::Null),
        _ => serde_json::from_str(raw).unwrap_or(Value::Null),
    }
}

/// Encode a value for the `value` column, `None` for an empty value
pub fn encode_value(model: &str, field: &Field, value: &Value) -> OrmResult<Option<String>> {
    if is_empty_value(value) && !matches!(field.kind.value_kind(), FieldKind::Boolean) {
        return Ok(None);
    }
    match field.kind.value_kind() {
        FieldKind::Many2One(m2o) => Ok(id_from_value(value).map(|id| format!("{},{}", m2o.relation, id))),
        _ => {
            let stored = field.to_storage_json(model, value)?;
            Ok(Some(stored.to_string()))
        }
    }
}

fn resource(model: &str, id: i64) -> String {
    format!("{},{}", model, id)
}

impl Transaction {
    /// Default value of a property field, `Null` when none is set
    pub async fn property_default(&mut self, model: &Model, field: &Field) -> OrmResult<Value> {
        let key = cache_key(&(&model.name, &field.name));
        if let Some(hit) = self.cache_get::<Value>(PROPERTY_CACHE, &key) {
            return Ok(hit);
        }
        let mut sql = Sql::new("SELECT \"value\" FROM \"ir_property\" WHERE \"model\" = ");
        sql.push_param(model.name.as_str())
            .push(" AND \"name\" = ")
            .push_param(field.name.as_str())
            .push(" AND \"res\" IS NULL ORDER BY \"id\"");
        let value = self
            .fetch_optional(&sql)
            .await?
            .and_then(|row| row.get_string("value"))
            .map(|raw| decode_value(field, &raw))
            .unwrap_or(Value::Null);
        self.cache_put(PROPERTY_CACHE, &key, &value);
        Ok(value)
    }

    /// Values of a property field for `ids`, falling back to the default
    pub async fn get_properties(
        &mut self,
        model: &Model,
        field: &Field,
        ids: &[i64],
    ) -> OrmResult<HashMap<i64, Value>> {
        let default = self.property_default(model, field).await?;
        let mut values: HashMap<i64, Value> = ids.iter().map(|id| (*id, default.clone())).collect();
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new("SELECT \"res\", \"value\" FROM \"ir_property\" WHERE \"model\" = ");
            sql.push_param(model.name.as_str())
                .push(" AND \"name\" = ")
                .push_param(field.name.as_str())
                .push(" AND \"res\" IN ")
                .append(Sql::value_list(chunk.iter().map(|id| resource(&model.name, *id))));
            for row in self.fetch_all(&sql).await? {
                let id = row
                    .get_string("res")
                    .and_then(|res| res.rsplit_once(',').and_then(|(_, id)| id.parse::<i64>().ok()));
                if let Some(id) = id {
                    let value = row
                        .get_string("value")
                        .map(|raw| decode_value(field, &raw))
                        .unwrap_or(Value::Null);
                    values.insert(id, value);
                }
            }
        }
        Ok(values)
    }

    /// Set a property value on `ids`; a value equal to the default only
    /// removes the record-specific rows
    pub async fn set_properties(
        &mut self,
        model: &Model,
        field: &Field,
        ids: &[i64],
        value: &Value,
    ) -> OrmResult<()> {
        self.clear_properties(model, Some(&field.name), ids).await?;
        let default = self.property_default(model, field).await?;
        let encoded = encode_value(&model.name, field, value)?;
        let default_encoded = encode_value(&model.name, field, &default)?;
        if encoded == default_encoded {
            return Ok(());
        }
        for id in ids {
            let mut insert = Sql::new(
                "INSERT INTO \"ir_property\" (\"name\", \"model\", \"res\", \"value\") VALUES ",
            );
            insert.append(Sql::value_list::<_, DatabaseValue>([
                field.name.as_str().into(),
                model.name.as_str().into(),
                resource(&model.name, *id).into(),
                encoded.clone().into(),
            ]));
            self.execute(&insert).await?;
        }
        Ok(())
    }

    /// Set the default value of a property field
    pub async fn set_property_default(
        &mut self,
        model: &str,
        field: &str,
        value: &Value,
    ) -> OrmResult<()> {
        let model = self.model(model)?;
        let field = model.require_field(field)?.clone();
        let mut delete = Sql::new("DELETE FROM \"ir_property\" WHERE \"model\" = ");
        delete
            .push_param(model.name.as_str())
            .push(" AND \"name\" = ")
            .push_param(field.name.as_str())
            .push(" AND \"res\" IS NULL");
        self.execute(&delete).await?;
        if let Some(encoded) = encode_value(&model.name, &field, value)? {
            let mut insert = Sql::new(
                "INSERT INTO \"ir_property\" (\"name\", \"model\", \"res\", \"value\") VALUES ",
            );
            insert.append(Sql::value_list::<_, DatabaseValue>([
                field.name.as_str().into(),
                model.name.as_str().into(),
                DatabaseValue::Null,
                encoded.into(),
            ]));
            self.execute(&insert).await?;
        }
        self.cache_reset(PROPERTY_CACHE);
        self.records.clear();
        Ok(())
    }

    /// Remove the record-specific rows of `ids`, for one field or all
    pub(crate) async fn clear_properties(
        &mut self,
        model: &Model,
        field: Option<&str>,
        ids: &[i64],
    ) -> OrmResult<()> {
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new("DELETE FROM \"ir_property\" WHERE \"model\" = ");
            sql.push_param(model.name.as_str());
            if let Some(field) = field {
                sql.push(" AND \"name\" = ").push_param(field);
            }
            sql.push(" AND \"res\" IN ")
                .append(Sql::value_list(chunk.iter().map(|id| resource(&model.name, *id))));
            self.execute(&sql).await?;
        }
        Ok(())
    }

    /// Forget property values pointing to deleted records of `model`
    pub(crate) async fn clear_property_references(&mut self, model: &Model, ids: &[i64]) -> OrmResult<()> {
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new("DELETE FROM \"ir_property\" WHERE \"value\" IN ");
            sql.append(Sql::value_list(chunk.iter().map(|id| resource(&model.name, *id))));
            if self.execute(&sql).await? > 0 {
                self.cache_reset(PROPERTY_CACHE);
            }
        }
        Ok(())
    }
}
