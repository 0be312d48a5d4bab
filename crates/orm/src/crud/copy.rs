use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use super::is_magic_field;
use crate::error::{ModelError, OrmResult};
use crate::fields::{FieldKind, X2ManyCommand};
use crate::ir::access::AccessMode;
use crate::model::Values;
use crate::query::Sql;
use crate::transaction::Transaction;

impl Transaction {
    /// Duplicate `ids`, overriding the copied values with `default`.
    /// One2many children are duplicated too; many2many links are shared.
    pub async fn copy(&mut self, model: &str, ids: &[i64], default: Values) -> OrmResult<Vec<i64>> {
        let definition = self.model(model)?;
        self.check_access(&definition.name, AccessMode::Create).await?;
        let mut copies = Vec::with_capacity(ids.len());
        for id in ids {
            let values = self.copy_data(model, *id, &default).await?;
            let new_id = self.create(model, values).await?;
            self.copy_translations(&definition, *id, new_id).await?;
            debug!("copied {} {} to {}", model, id, new_id);
            copies.push(new_id);
        }
        Ok(copies)
    }

    /// Values creating a duplicate of `id`
    fn copy_data<'a>(&'a mut self, model: &'a str, id: i64, default: &'a Values) -> BoxFuture<'a, OrmResult<Values>> {
        Box::pin(async move {
            let definition = self.model(model)?;
            let names: Vec<String> = definition
                .field_names()
                .into_iter()
                .filter(|name| !is_magic_field(&definition, name))
                .filter(|name| !definition.inherits.iter().any(|(_, link)| link == name))
                .filter(|name| match definition.any_field(name).map(|f| &f.kind) {
                    Some(FieldKind::Function(function)) => function.setter.is_some(),
                    Some(_) => true,
                    None => false,
                })
                .collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let Some(record) = self.read(model, &[id], Some(&refs)).await?.into_iter().next() else {
                let mut sql = Sql::new("SELECT COUNT(*) FROM ");
                sql.push_ident(&definition.table).push(" WHERE \"id\" = ").push_param(id);
                return Err(match self.fetch_count(&sql).await? {
                    0 => ModelError::Programming(format!("Record {} of '{}' does not exist", id, model)),
                    _ => ModelError::access(
                        model,
                        AccessMode::Read.as_str(),
                        format!("Record {} of '{}' is not readable", id, model),
                    ),
                });
            };

            let mut values = Values::new();
            for name in &names {
                if let Some(value) = default.get(name) {
                    values.insert(name.clone(), value.clone());
                    continue;
                }
                let value = record.get(name).cloned().unwrap_or(Value::Null);
                let Some(field) = definition.any_field(name).cloned() else {
                    continue;
                };
                let value = match &field.kind {
                    FieldKind::One2Many(o2m) => {
                        let mut commands = Vec::new();
                        let children: Vec<i64> = value
                            .as_array()
                            .map(|items| items.iter().filter_map(Value::as_i64).collect())
                            .unwrap_or_default();
                        for child in children {
                            let mut child_values = self.copy_data(&o2m.relation, child, &Values::new()).await?;
                            child_values.remove(&o2m.field);
                            commands.push(X2ManyCommand::Create(child_values).to_json());
                        }
                        Value::Array(commands)
                    }
                    FieldKind::Many2Many(_) => json!([["set", value]]),
                    _ => value,
                };
                values.insert(name.clone(), value);
            }
            for (name, value) in default {
                values.entry(name.clone()).or_insert_with(|| value.clone());
            }
            Ok(values)
        })
    }
}
