//! Default values

use serde_json::{json, Value};

use super::is_magic_field;
use crate::error::OrmResult;
use crate::fields::{DefaultValue, Field, FieldKind};
use crate::ir::access::AccessMode;
use crate::model::{Model, Values};
use crate::transaction::Transaction;

impl Transaction {
    /// Default of one field: static value, method result or property default
    pub(crate) async fn default_value(&mut self, model: &Model, field: &Field) -> OrmResult<Value> {
        match &field.default {
            Some(DefaultValue::Static(value)) => Ok(value.clone()),
            Some(DefaultValue::Method(method)) => {
                self.call(&model.name, method, &[], json!({ "name": field.name }))
                    .await
            }
            None if matches!(field.kind, FieldKind::Property(_)) => {
                self.property_default(model, field).await
            }
            None => Ok(Value::Null),
        }
    }

    /// Defaults of `fields` (every field when `None`). Fields without a
    /// default are left out; delegated fields take the parent's default.
    pub async fn default_get(&mut self, model: &str, fields: Option<&[&str]>) -> OrmResult<Values> {
        let model = self.model(model)?;
        self.check_access(&model.name, AccessMode::Read).await?;
        let names: Vec<String> = match fields {
            Some(fields) => fields.iter().map(|f| f.to_string()).collect(),
            None => model.field_names(),
        };
        self.collect_defaults(&model, names).await
    }

    pub(crate) async fn collect_defaults(&mut self, model: &Model, names: Vec<String>) -> OrmResult<Values> {
        let mut defaults = Values::new();
        for name in names {
            if is_magic_field(&model, &name) {
                continue;
            }
            let (owner, field) = match (model.field(&name), model.inherited_field(&name)) {
                (Some(field), _) => (self.model(&model.name)?, field.clone()),
                (None, Some(inherited)) => (self.model(&inherited.parent)?, inherited.field.clone()),
                (None, None) => {
                    return Err(crate::error::ModelError::unknown_field(&model.name, &name))
                }
            };
            let value = self.default_value(&owner, &field).await?;
            if !value.is_null() {
                defaults.insert(name, value);
            }
        }
        Ok(defaults)
    }
}
