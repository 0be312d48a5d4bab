use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use super::create::now;
use super::{ids_in, is_magic_field, unique_ids, SplitValues};
use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};
use crate::fields::X2ManyCommand;
use crate::ir::access::AccessMode;
use crate::model::{Model, Values};
use crate::query::{Sql, UpdateQuery};
use crate::transaction::Transaction;

impl Transaction {
    /// Write `values` on every record of `ids`
    pub fn write<'a>(&'a mut self, model: &'a str, ids: &'a [i64], values: Values) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            let model = self.model(model)?;
            self.check_access(&model.name, AccessMode::Write).await?;
            let ids = unique_ids(ids);
            if ids.is_empty() {
                return Ok(());
            }
            let mut values = values;
            values.retain(|name, _| !is_magic_field(&model, name));

            self.check_xml_protected(&model, &ids, Some(&values)).await?;
            self.check_concurrency(&model, &ids).await?;
            self.check_values(&model, &values).await?;

            let split = SplitValues::new(&model, &values);
            let mut update = UpdateQuery::new(model.table.clone());
            let translating = self.translating();
            for (field, value) in &split.direct {
                if translating && field.translate {
                    continue;
                }
                update = update.set(field.name.clone(), Sql::param(field.to_db(&model.name, value)?));
            }
            if update.has_sets() && model.log_access {
                update = update
                    .set("write_uid", Sql::param(self.user()))
                    .set("write_date", Sql::param(now()));
            }

            for chunk in ids.chunks(self.in_max()) {
                self.check_rule_bypass(&model, chunk, AccessMode::Write).await?;
                if !update.has_sets() {
                    continue;
                }
                let statement = update.clone().filter(ids_in(Sql::ident("id"), chunk)).to_sql();
                if let Err(e) = self.execute(&statement).await {
                    return Err(self.map_integrity(&model, e).await);
                }
            }

            for (field, value) in &split.direct {
                if !field.translate {
                    continue;
                }
                let text = value.as_str();
                if translating {
                    let lang = self.language();
                    for id in &ids {
                        self.set_translation(&model, &field.name, *id, &lang, None, text.unwrap_or_default())
                            .await?;
                    }
                } else {
                    self.mark_translations_fuzzy(&model, &field.name, &ids, text).await?;
                }
            }

            for (parent, link, parent_values) in split.delegated {
                if parent_values.is_empty() {
                    continue;
                }
                let parent_ids = self.linked_ids(&model, &link, &ids).await?;
                self.write(&parent, &parent_ids, parent_values).await?;
            }

            for (field, value) in split.deferred {
                if field.kind.is_x2many() {
                    for id in &ids {
                        let commands = X2ManyCommand::parse_list(&model.name, &field.name, &value)?;
                        self.apply_x2many(&model, &field, *id, commands).await?;
                    }
                } else {
                    self.set_deferred(&model, &field, &ids, &value).await?;
                }
            }

            self.invalidate(&model);
            self.validate(&model, &ids).await?;
            self.check_field_domains(&model, &ids, Some(&values)).await?;
            self.update_trees(&model, Some(&values)).await?;
            debug!("wrote {:?} on {} {:?}", values.keys().collect::<Vec<_>>(), model.name, ids);

            if !self.context().skip_workflow() {
                if let Some(hook) = self.registry().workflow().cloned() {
                    for id in &ids {
                        hook.trg_write(self, &model.name, *id).await?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Values of the many2one column `link` on `ids`, without duplicates
    pub(crate) async fn linked_ids(&mut self, model: &Model, link: &str, ids: &[i64]) -> OrmResult<Vec<i64>> {
        let mut linked = Vec::new();
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new("SELECT ");
            sql.push_ident(link)
                .push(" FROM ")
                .push_ident(&model.table)
                .push(" WHERE ")
                .append(ids_in(Sql::ident("id"), chunk));
            linked.extend(self.fetch_ids(&sql).await?);
        }
        Ok(unique_ids(&linked))
    }

    /// Fail when one of `ids` was written by someone else inside the
    /// concurrency window (context `read_delta`, else the configured one)
    pub(crate) async fn check_concurrency(&mut self, model: &Arc<Model>, ids: &[i64]) -> OrmResult<()> {
        if !model.log_access {
            return Ok(());
        }
        let window = self
            .context()
            .read_delta()
            .or(self.registry().config().concurrency_window);
        let Some(window) = window else {
            return Ok(());
        };
        let Ok(window) = chrono::Duration::from_std(window) else {
            return Ok(());
        };
        let limit = Utc::now().naive_utc() - window;
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new("SELECT COUNT(*) FROM ");
            sql.push_ident(&model.table)
                .push(" WHERE ")
                .append(ids_in(Sql::ident("id"), chunk))
                // never-written rows count from their creation
                .push(" AND COALESCE(\"write_date\", \"create_date\") > ")
                .push_param(DatabaseValue::DateTime(limit));
            if self.fetch_count(&sql).await? > 0 {
                debug!("{} modified inside the concurrency window {:?}", model.name, chunk);
                return Err(ModelError::concurrency(
                    &model.name,
                    "This record was modified in the meanwhile",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_fields_never_written() {
        let model = crate::model::ModelDefinition::new("test.magic")
            .field("name", crate::fields::Field::char("Name"))
            .freeze(true)
            .unwrap();
        let mut values = Values::new();
        values.insert("name".into(), Value::from("a"));
        values.insert("write_uid".into(), Value::from(3));
        values.insert("id".into(), Value::from(9));
        values.retain(|name, _| !is_magic_field(&model, name));
        assert_eq!(values.keys().collect::<Vec<_>>(), vec!["name"]);
    }
}
