use chrono::{Timelike, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use super::{is_magic_field, SplitValues};
use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};
use crate::fields::conversion::{id_from_value, is_empty_value};
use crate::fields::X2ManyCommand;
use crate::ir::access::AccessMode;
use crate::model::{Model, Values};
use crate::query::{InsertQuery, Sql};
use crate::transaction::Transaction;

/// Current time as stored in the bookkeeping columns
pub(crate) fn now() -> DatabaseValue {
    let now = Utc::now().naive_utc();
    DatabaseValue::DateTime(now.with_nanosecond(0).unwrap_or(now))
}

impl Transaction {
    /// Create one record and return its id
    pub fn create<'a>(&'a mut self, model: &'a str, values: Values) -> BoxFuture<'a, OrmResult<i64>> {
        Box::pin(async move {
            let model = self.model(model)?;
            self.check_access(&model.name, AccessMode::Create).await?;

            let missing: Vec<String> = model
                .field_names()
                .into_iter()
                .filter(|name| !values.contains_key(name) && !is_magic_field(&model, name))
                .collect();
            let mut values = values;
            for (name, value) in self.collect_defaults(&model, missing).await? {
                values.insert(name, value);
            }
            values.retain(|name, _| !is_magic_field(&model, name));
            self.check_values(&model, &values).await?;

            let split = SplitValues::new(&model, &values);
            for (parent, link, parent_values) in split.delegated {
                let linked = values.get(&link).and_then(id_from_value);
                let id = match linked {
                    Some(id) => {
                        if !parent_values.is_empty() {
                            self.write(&parent, &[id], parent_values).await?;
                        }
                        id
                    }
                    None => self.create(&parent, parent_values).await?,
                };
                values.insert(link, Value::from(id));
            }
            self.check_required(&model, &values).await?;

            let mut insert = InsertQuery::new(model.table.clone()).returning("id");
            for field in model.stored_fields() {
                if is_magic_field(&model, &field.name) {
                    continue;
                }
                let Some(value) = values.get(&field.name) else {
                    continue;
                };
                insert = insert.set(field.name.clone(), Sql::param(field.to_db(&model.name, value)?));
            }
            if model.log_access {
                insert = insert
                    .set("create_uid", Sql::param(self.user()))
                    .set("create_date", Sql::param(now()));
            }
            let row = match self.fetch_optional(&insert.to_sql()).await {
                Ok(row) => row,
                Err(e) => return Err(self.map_integrity(&model, e).await),
            };
            let id = row
                .and_then(|row| row.get_opt_i64("id"))
                .ok_or_else(|| ModelError::Database(format!("No id returned by insert into {}", model.table)))?;

            if self.translating() {
                let lang = self.language();
                for field in model.stored_fields().filter(|f| f.translate) {
                    if let Some(text) = values.get(&field.name).and_then(Value::as_str) {
                        self.set_translation(&model, &field.name, id, &lang, Some(text), text)
                            .await?;
                    }
                }
            }

            for (field, value) in split.deferred {
                if field.kind.is_x2many() {
                    let commands = X2ManyCommand::parse_list(&model.name, &field.name, &value)?;
                    self.apply_x2many(&model, &field, id, commands).await?;
                } else {
                    self.set_deferred(&model, &field, &[id], &value).await?;
                }
            }

            self.invalidate(&model);
            self.validate(&model, &[id]).await?;
            self.check_field_domains(&model, &[id], None).await?;
            self.update_trees(&model, None).await?;
            debug!("created {} {}", model.name, id);

            if !self.context().skip_workflow() {
                if let Some(hook) = self.registry().workflow().cloned() {
                    hook.trg_create(self, &model.name, id).await?;
                }
            }
            Ok(id)
        })
    }

    /// Write a function field through its setter or a property field
    pub(crate) async fn set_deferred(
        &mut self,
        model: &Model,
        field: &crate::fields::Field,
        ids: &[i64],
        value: &Value,
    ) -> OrmResult<()> {
        match &field.kind {
            crate::fields::FieldKind::Property(_) => {
                self.set_properties(model, field, ids, value).await
            }
            crate::fields::FieldKind::Function(function) => match &function.setter {
                Some(setter) => {
                    let args = serde_json::json!({ "name": field.name, "value": value });
                    self.call(&model.name, setter, ids, args).await.map(|_| ())
                }
                None if is_empty_value(value) => Ok(()),
                None => Err(ModelError::Programming(format!(
                    "Function field '{}' of '{}' has no setter",
                    field.name, model.name
                ))),
            },
            _ => Ok(()),
        }
    }

    /// Renumber the trees whose parent link was written, all of them when
    /// `values` is `None`
    pub(crate) async fn update_trees(&mut self, model: &Model, values: Option<&Values>) -> OrmResult<()> {
        let parents: Vec<_> = model
            .fields()
            .filter(|f| f.tree_columns().is_some())
            .filter(|f| values.map(|v| v.contains_key(&f.name)).unwrap_or(true))
            .cloned()
            .collect();
        for parent in parents {
            self.rebuild_tree(model, &parent).await?;
        }
        Ok(())
    }
}
