//! One2many and many2many mutation verbs

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use super::ids_in;
use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};
use crate::fields::{Field, FieldKind, Many2Many, One2Many, X2ManyCommand};
use crate::model::{Model, Values};
use crate::query::Sql;
use crate::transaction::Transaction;

impl Transaction {
    /// Apply the commands written to an x2many `field` of record `id`
    pub(crate) async fn apply_x2many(
        &mut self,
        model: &Model,
        field: &Field,
        id: i64,
        commands: Vec<X2ManyCommand>,
    ) -> OrmResult<()> {
        match &field.kind {
            FieldKind::One2Many(o2m) => {
                for command in commands {
                    self.apply_one2many(o2m, id, command).await?;
                }
            }
            FieldKind::Many2Many(m2m) => {
                for command in commands {
                    self.apply_many2many(m2m, id, command).await?;
                }
            }
            _ => {
                return Err(ModelError::Programming(format!(
                    "Field '{}' of '{}' is not an x2many",
                    field.name, model.name
                )))
            }
        }
        Ok(())
    }

    async fn apply_one2many(&mut self, o2m: &One2Many, id: i64, command: X2ManyCommand) -> OrmResult<()> {
        let target = o2m.relation.as_str();
        match command {
            X2ManyCommand::Create(mut values) => {
                values.insert(o2m.field.clone(), Value::from(id));
                self.create(target, values).await?;
            }
            X2ManyCommand::Write(ids, values) => self.write(target, &ids, values).await?,
            X2ManyCommand::Delete(ids) => self.delete(target, &ids).await?,
            X2ManyCommand::DeleteAll => {
                let linked = self.one2many_ids(o2m, id).await?;
                self.delete(target, &linked).await?;
            }
            X2ManyCommand::Unlink(ids) => {
                self.write(target, &ids, reverse_value(o2m, Value::Null)).await?;
            }
            X2ManyCommand::UnlinkAll => {
                let linked = self.one2many_ids(o2m, id).await?;
                self.write(target, &linked, reverse_value(o2m, Value::Null)).await?;
            }
            X2ManyCommand::Add(ids) => {
                self.write(target, &ids, reverse_value(o2m, Value::from(id))).await?;
            }
            X2ManyCommand::Set(ids) => {
                let keep: HashSet<i64> = ids.iter().copied().collect();
                let dropped: Vec<i64> = self
                    .one2many_ids(o2m, id)
                    .await?
                    .into_iter()
                    .filter(|linked| !keep.contains(linked))
                    .collect();
                self.write(target, &dropped, reverse_value(o2m, Value::Null)).await?;
                self.write(target, &ids, reverse_value(o2m, Value::from(id))).await?;
            }
        }
        Ok(())
    }

    /// Every target record pointing back to `id`, inactive ones included
    async fn one2many_ids(&mut self, o2m: &One2Many, id: i64) -> OrmResult<Vec<i64>> {
        let target = self.model(&o2m.relation)?;
        let mut sql = Sql::new("SELECT \"id\" FROM ");
        sql.push_ident(&target.table)
            .push(" WHERE ")
            .push_ident(&o2m.field)
            .push(" = ")
            .push_param(id);
        self.fetch_ids(&sql).await
    }

    async fn apply_many2many(&mut self, m2m: &Many2Many, id: i64, command: X2ManyCommand) -> OrmResult<()> {
        let target = m2m.relation.as_str();
        match command {
            X2ManyCommand::Create(values) => {
                let created = self.create(target, values).await?;
                self.link_many2many(m2m, id, &[created]).await?;
            }
            X2ManyCommand::Write(ids, values) => self.write(target, &ids, values).await?,
            X2ManyCommand::Delete(ids) => self.delete(target, &ids).await?,
            X2ManyCommand::DeleteAll => {
                let linked = self.many2many_ids(m2m, id).await?;
                self.delete(target, &linked).await?;
            }
            X2ManyCommand::Unlink(ids) => self.unlink_many2many(m2m, id, Some(&ids)).await?,
            X2ManyCommand::UnlinkAll => self.unlink_many2many(m2m, id, None).await?,
            X2ManyCommand::Add(ids) => self.link_many2many(m2m, id, &ids).await?,
            X2ManyCommand::Set(ids) => {
                self.unlink_many2many(m2m, id, None).await?;
                self.link_many2many(m2m, id, &ids).await?;
            }
        }
        Ok(())
    }

    async fn many2many_ids(&mut self, m2m: &Many2Many, id: i64) -> OrmResult<Vec<i64>> {
        let mut sql = Sql::new("SELECT ");
        sql.push_ident(&m2m.target)
            .push(" FROM ")
            .push_ident(&m2m.table)
            .push(" WHERE ")
            .push_ident(&m2m.origin)
            .push(" = ")
            .push_param(id);
        self.fetch_ids(&sql).await
    }

    /// Add relation rows for `ids` not linked to `id` yet
    async fn link_many2many(&mut self, m2m: &Many2Many, id: i64, ids: &[i64]) -> OrmResult<()> {
        let mut linked: HashSet<i64> = self.many2many_ids(m2m, id).await?.into_iter().collect();
        for target in ids {
            if !linked.insert(*target) {
                continue;
            }
            let mut insert = Sql::new("INSERT INTO ");
            insert
                .push_ident(&m2m.table)
                .push(" (")
                .push_ident(&m2m.origin)
                .push(", ")
                .push_ident(&m2m.target)
                .push(") VALUES ")
                .append(Sql::value_list::<_, DatabaseValue>([id.into(), (*target).into()]));
            self.execute(&insert).await?;
        }
        debug!("linked {:?} to {} through {}", ids, id, m2m.table);
        Ok(())
    }

    /// Remove the relation rows of `id`, only those towards `ids` if given
    async fn unlink_many2many(&mut self, m2m: &Many2Many, id: i64, ids: Option<&[i64]>) -> OrmResult<()> {
        let chunks: Vec<Option<&[i64]>> = match ids {
            Some(ids) if ids.is_empty() => return Ok(()),
            Some(ids) => ids.chunks(self.in_max()).map(Some).collect(),
            None => vec![None],
        };
        for chunk in chunks {
            let mut sql = Sql::new("DELETE FROM ");
            sql.push_ident(&m2m.table)
                .push(" WHERE ")
                .push_ident(&m2m.origin)
                .push(" = ")
                .push_param(id);
            if let Some(chunk) = chunk {
                sql.push(" AND ").append(ids_in(Sql::ident(&m2m.target), chunk));
            }
            self.execute(&sql).await?;
        }
        Ok(())
    }
}

fn reverse_value(o2m: &One2Many, value: Value) -> Values {
    let mut values = Values::new();
    values.insert(o2m.field.clone(), value);
    values
}
