use std::collections::HashSet;

use futures::future::BoxFuture;
use tracing::debug;

use super::{ids_in, unique_ids};
use crate::error::{ModelError, OrmResult};
use crate::fields::{FieldKind, OnDelete};
use crate::ir::access::AccessMode;
use crate::model::Model;
use crate::query::{DeleteQuery, Sql};
use crate::transaction::Transaction;

impl Transaction {
    /// Delete `ids` of `model`, cascading through `CASCADE` many2ones
    /// pointing at it and into the delegated parents
    pub fn delete<'a>(&'a mut self, model: &'a str, ids: &'a [i64]) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            let model = self.model(model)?;
            self.check_access(&model.name, AccessMode::Delete).await?;
            let ids = unique_ids(ids);
            if ids.is_empty() {
                return Ok(());
            }

            let hook = match self.context().skip_workflow() {
                true => None,
                false => self.registry().workflow().cloned(),
            };
            if let Some(hook) = &hook {
                if hook.has_running(self, &model.name, &ids).await? {
                    return Err(self
                        .localize(ModelError::access(
                            &model.name,
                            AccessMode::Delete.as_str(),
                            "You can not delete a record with a running workflow!",
                        ))
                        .await);
                }
            }
            self.check_xml_protected(&model, &ids, None).await?;
            self.check_concurrency(&model, &ids).await?;
            for chunk in ids.chunks(self.in_max()) {
                self.check_rule_bypass(&model, chunk, AccessMode::Delete).await?;
            }

            let deleted: HashSet<i64> = ids.iter().copied().collect();
            let references = self.registry().referencing(&model.name);
            for (referencing, field) in &references {
                if field.ondelete() != Some(OnDelete::Cascade) {
                    continue;
                }
                let mut children = Vec::new();
                for chunk in ids.chunks(self.in_max()) {
                    let mut sql = Sql::new("SELECT \"id\" FROM ");
                    sql.push_ident(&referencing.table)
                        .push(" WHERE ")
                        .append(ids_in(Sql::ident(&field.name), chunk));
                    children.extend(self.fetch_ids(&sql).await?);
                }
                if referencing.name == model.name {
                    children.retain(|child| !deleted.contains(child));
                }
                if !children.is_empty() {
                    debug!("{} cascades to {} {:?}", model.name, referencing.name, children);
                    self.delete(&referencing.name, &children).await?;
                }
            }

            let mut parents = Vec::new();
            for (parent, link) in &model.inherits {
                parents.push((parent.clone(), self.linked_ids(&model, link, &ids).await?));
            }

            if let Some(hook) = &hook {
                for id in &ids {
                    hook.trg_delete(self, &model.name, *id).await?;
                }
            }

            self.delete_relation_rows(&model, &ids).await?;
            self.clear_properties(&model, None, &ids).await?;
            self.clear_property_references(&model, &ids).await?;

            for chunk in ids.chunks(self.in_max()) {
                let statement = DeleteQuery::new(model.table.clone())
                    .filter(ids_in(Sql::ident("id"), chunk))
                    .to_sql();
                if let Err(e) = self.execute(&statement).await {
                    return Err(self.map_integrity(&model, e).await);
                }
            }
            self.delete_translations(&model, &ids).await?;
            self.delete_model_data(&model, &ids).await?;
            self.invalidate(&model);
            // orphaned subtrees keep stale bounds until renumbered
            self.update_trees(&model, None).await?;
            for (referencing, field) in &references {
                if referencing.name != model.name && field.tree_columns().is_some() {
                    self.rebuild_tree(referencing, field).await?;
                }
            }
            debug!("deleted {} {:?}", model.name, ids);

            for (parent, parent_ids) in parents {
                self.delete(&parent, &parent_ids).await?;
            }
            Ok(())
        })
    }

    /// Drop the many2many rows naming deleted records on either side
    async fn delete_relation_rows(&mut self, model: &Model, ids: &[i64]) -> OrmResult<()> {
        let mut sides: Vec<(String, String)> = model
            .fields()
            .filter_map(|f| match &f.kind {
                FieldKind::Many2Many(m2m) => Some((m2m.table.clone(), m2m.origin.clone())),
                _ => None,
            })
            .collect();
        for other in self.registry().models() {
            for field in other.fields() {
                if let FieldKind::Many2Many(m2m) = &field.kind {
                    if m2m.relation == model.name {
                        sides.push((m2m.table.clone(), m2m.target.clone()));
                    }
                }
            }
        }
        sides.sort();
        sides.dedup();
        for (table, column) in sides {
            for chunk in ids.chunks(self.in_max()) {
                let statement = DeleteQuery::new(table.clone())
                    .filter(ids_in(Sql::ident(&column), chunk))
                    .to_sql();
                self.execute(&statement).await?;
            }
        }
        Ok(())
    }
}
