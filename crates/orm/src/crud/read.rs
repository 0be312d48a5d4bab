use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use super::{ids_in, unique_ids};
use crate::domain::compiler::QueryTables;
use crate::domain::{Domain, Operator, OrderItem};
use crate::error::{ModelError, OrmResult};
use crate::fields::{Field, FieldKind};
use crate::ir::access::AccessMode;
use crate::model::{Model, Values};
use crate::query::{JoinClause, JoinType, Sql, TableRef};
use crate::transaction::Transaction;

impl Transaction {
    /// Values of `fields` (every field when `None`) for `ids`, in the order
    /// of `ids`. Ids that do not exist are skipped; ids hidden by a rule
    /// are an access error.
    pub fn read<'a>(
        &'a mut self,
        model: &'a str,
        ids: &'a [i64],
        fields: Option<&'a [&'a str]>,
    ) -> BoxFuture<'a, OrmResult<Vec<Values>>> {
        Box::pin(async move {
            let model = self.model(model)?;
            self.check_access(&model.name, AccessMode::Read).await?;
            let names: Vec<String> = match fields {
                Some(fields) => fields.iter().map(|f| f.to_string()).collect(),
                None => model.field_names(),
            };
            for name in &names {
                if name != "id" {
                    model.require_field(name)?;
                }
            }
            let ids = unique_ids(ids);

            let missing: Vec<i64> = ids
                .iter()
                .copied()
                .filter(|id| match self.records.get(&(model.name.clone(), *id)) {
                    Some(cached) => names.iter().any(|name| !cached.contains_key(name)),
                    None => true,
                })
                .collect();
            if !missing.is_empty() {
                let fetched = self.fetch_records(&model, &missing, &names).await?;
                for (id, values) in fetched {
                    self.records
                        .entry((model.name.clone(), id))
                        .or_default()
                        .extend(values);
                }
            }

            let mut result = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(cached) = self.records.get(&(model.name.clone(), id)) else {
                    continue;
                };
                let mut values = Values::new();
                values.insert("id".to_string(), Value::from(id));
                for name in &names {
                    values.insert(name.clone(), cached.get(name).cloned().unwrap_or(Value::Null));
                }
                result.push(values);
            }
            Ok(result)
        })
    }

    /// Load `names` of `ids` from the database, keyed by id
    async fn fetch_records(
        &mut self,
        model: &Arc<Model>,
        ids: &[i64],
        names: &[String],
    ) -> OrmResult<HashMap<i64, Values>> {
        let dialect = self.dialect();
        let mut columns: Vec<Arc<Field>> = Vec::new();
        let mut others: Vec<Arc<Field>> = Vec::new();
        let mut delegated: Vec<(String, String, Vec<String>)> = Vec::new();
        for name in names {
            if let Some(field) = model.field(name) {
                if field.is_stored() {
                    if field.name != "id" {
                        columns.push(field.clone());
                    }
                } else {
                    others.push(field.clone());
                }
            } else if let Some(inherited) = model.inherited_field(name) {
                match delegated
                    .iter_mut()
                    .find(|(parent, link, _)| *parent == inherited.parent && *link == inherited.link)
                {
                    Some((_, _, fields)) => fields.push(name.clone()),
                    None => delegated.push((
                        inherited.parent.clone(),
                        inherited.link.clone(),
                        vec![name.clone()],
                    )),
                }
            }
        }
        for (_, link, _) in &delegated {
            if !columns.iter().any(|f| f.name == *link) {
                columns.push(model.require_field(link)?.clone());
            }
        }

        let mut records: HashMap<i64, Values> = HashMap::new();
        let rule = self.rule_domain(&model.name, AccessMode::Read).await?;
        for chunk in ids.chunks(self.in_max()) {
            let mut tables = QueryTables::new(&model.table);
            let alias = tables.main_alias().to_string();
            let mut select_columns = vec![Sql::column(&alias, "id")];
            for field in &columns {
                let column = Sql::column(&alias, &field.name);
                let column = match field.sql_type() {
                    Some(ty) => ty.select_expression(column, dialect),
                    None => column,
                };
                let mut named = column;
                named.push(" AS ").push_ident(&field.name);
                select_columns.push(named);
            }
            let mut filter = ids_in(Sql::column(&alias, "id"), chunk);
            if let Some(rule) = &rule {
                let condition = self
                    .compile_domain(model.clone(), rule, &mut tables, alias.clone())
                    .await?;
                filter = Sql::join([filter, condition], " AND ");
            }
            let select = tables.select().columns(select_columns).filter(filter);
            let rows = self.fetch_all(&select.to_sql(dialect)).await?;

            if rule.is_some() && rows.len() < chunk.len() {
                let mut exists = Sql::new("SELECT COUNT(*) FROM ");
                exists
                    .push_ident(&model.table)
                    .push(" WHERE ")
                    .append(ids_in(Sql::ident("id"), chunk));
                if self.fetch_count(&exists).await? as usize > rows.len() {
                    return Err(self
                        .localize(ModelError::access(
                            &model.name,
                            AccessMode::Read.as_str(),
                            "You try to bypass an access rule!",
                        ))
                        .await);
                }
            }

            for row in rows {
                let id = row.get_i64("id")?;
                let mut values = Values::new();
                for field in &columns {
                    let value = row.get(&field.name).map(|v| field.from_db(v)).unwrap_or(Value::Null);
                    values.insert(field.name.clone(), value);
                }
                records.insert(id, values);
            }
        }
        let found: Vec<i64> = ids.iter().copied().filter(|id| records.contains_key(id)).collect();
        if found.is_empty() {
            return Ok(records);
        }

        if self.translating() {
            for field in &columns {
                if !field.translate {
                    continue;
                }
                for (id, value) in self.read_translations(model, &field.name, &found).await? {
                    if let Some(values) = records.get_mut(&id) {
                        values.insert(field.name.clone(), Value::String(value));
                    }
                }
            }
        }

        for field in &others {
            let values = self.read_computed(model, field, &found).await?;
            for (id, value) in values {
                if let Some(record) = records.get_mut(&id) {
                    record.insert(field.name.clone(), value);
                }
            }
        }

        for (parent, link, fields) in delegated {
            let links: HashMap<i64, i64> = found
                .iter()
                .filter_map(|id| {
                    let linked = records.get(id)?.get(&link)?.as_i64()?;
                    Some((*id, linked))
                })
                .collect();
            let parent_ids: Vec<i64> = unique_ids(&links.values().copied().collect::<Vec<_>>());
            let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            let parents: HashMap<i64, Values> = self
                .read(&parent, &parent_ids, Some(&refs))
                .await?
                .into_iter()
                .filter_map(|values| Some((values.get("id")?.as_i64()?, values)))
                .collect();
            for (id, linked) in links {
                let (Some(record), Some(parent_values)) = (records.get_mut(&id), parents.get(&linked)) else {
                    continue;
                };
                for name in &fields {
                    record.insert(
                        name.clone(),
                        parent_values.get(name).cloned().unwrap_or(Value::Null),
                    );
                }
            }
        }
        debug!("read {} {:?} of {}", found.len(), names, model.name);
        Ok(records)
    }

    /// Values of a field without column for `ids`
    async fn read_computed(
        &mut self,
        model: &Arc<Model>,
        field: &Field,
        ids: &[i64],
    ) -> OrmResult<HashMap<i64, Value>> {
        match &field.kind {
            FieldKind::One2Many(o2m) => {
                let target = self.model(&o2m.relation)?;
                let order = o2m.order.as_ref().map(|order| {
                    order
                        .iter()
                        .map(|(field, direction)| OrderItem::new(field.clone(), *direction))
                        .collect::<Vec<_>>()
                });
                let domain = Domain::leaf(o2m.field.clone(), Operator::In, json!(ids));
                let children = self
                    .search(&target.name, &domain, 0, None, order.as_deref())
                    .await?;
                let mut values: HashMap<i64, Vec<i64>> = ids.iter().map(|id| (*id, Vec::new())).collect();
                for chunk in children.chunks(self.in_max()) {
                    let mut sql = Sql::new("SELECT \"id\", ");
                    sql.push_ident(&o2m.field)
                        .push(" FROM ")
                        .push_ident(&target.table)
                        .push(" WHERE ")
                        .append(ids_in(Sql::ident("id"), chunk));
                    let parents: HashMap<i64, i64> = self
                        .fetch_all(&sql)
                        .await?
                        .iter()
                        .filter_map(|row| Some((row.get_opt_i64("id")?, row.get_opt_i64(&o2m.field)?)))
                        .collect();
                    for child in chunk {
                        if let Some(parent) = parents.get(child) {
                            values.entry(*parent).or_default().push(*child);
                        }
                    }
                }
                Ok(values.into_iter().map(|(id, children)| (id, json!(children))).collect())
            }
            FieldKind::Many2Many(m2m) => {
                let target = self.model(&m2m.relation)?;
                let mut values: HashMap<i64, Vec<i64>> = ids.iter().map(|id| (*id, Vec::new())).collect();
                let order = match &m2m.order {
                    Some(order) => order
                        .iter()
                        .map(|(field, direction)| OrderItem::new(field.clone(), *direction))
                        .collect(),
                    None => target.order.clone(),
                };
                let rule = self.rule_domain(&target.name, AccessMode::Read).await?;
                for chunk in ids.chunks(self.in_max()) {
                    let mut tables = QueryTables::new(&target.table);
                    let alias = tables.main_alias().to_string();
                    let mut on = Sql::column("_rel", &m2m.target);
                    on.push(" = ").append(Sql::column(&alias, "id"));
                    let mut filter = ids_in(Sql::column("_rel", &m2m.origin), chunk);
                    if let Some(rule) = &rule {
                        let condition = self
                            .compile_domain(target.clone(), rule, &mut tables, alias.clone())
                            .await?;
                        filter = Sql::join([filter, condition], " AND ");
                    }
                    let order_by = self.compile_order(&target, &alias, &order, &mut tables)?;
                    let mut select = tables
                        .select()
                        .join(JoinClause {
                            join_type: JoinType::Inner,
                            table: TableRef::new(m2m.table.clone(), "_rel"),
                            on,
                        })
                        .column(Sql::column("_rel", &m2m.origin))
                        .column(Sql::column(&alias, "id"))
                        .filter(filter);
                    for clause in order_by {
                        select = select.order_by(clause);
                    }
                    select = select.order_by(Sql::column(&alias, "id"));
                    for row in self.fetch_all(&select.to_sql(self.dialect())).await? {
                        if let (Some(origin), Some(id)) = (
                            row.get_by_index(0).and_then(|v| v.as_i64()),
                            row.get_by_index(1).and_then(|v| v.as_i64()),
                        ) {
                            values.entry(origin).or_default().push(id);
                        }
                    }
                }
                Ok(values.into_iter().map(|(id, linked)| (id, json!(linked))).collect())
            }
            FieldKind::Function(function) => {
                let result = self
                    .call(&model.name, &function.getter, ids, json!({ "name": field.name }))
                    .await?;
                let mut values = HashMap::new();
                match result {
                    Value::Object(map) => {
                        for (key, value) in map {
                            if let Ok(id) = key.parse::<i64>() {
                                values.insert(id, value);
                            }
                        }
                    }
                    Value::Array(items) if items.len() == ids.len() => {
                        values.extend(ids.iter().copied().zip(items));
                    }
                    other => {
                        return Err(ModelError::Programming(format!(
                            "Getter '{}' of '{}' answered {} instead of values by id",
                            function.getter, model.name, other
                        )))
                    }
                }
                Ok(values)
            }
            FieldKind::Property(_) => self.get_properties(model, field, ids).await,
            _ => Ok(HashMap::new()),
        }
    }

    /// `(id, display name)` of `ids`, from the `rec_name` field
    pub async fn name_get(&mut self, model: &str, ids: &[i64]) -> OrmResult<Vec<(i64, String)>> {
        let definition = self.model(model)?;
        if !definition.has_field(&definition.rec_name) {
            return Ok(ids.iter().map(|id| (*id, format!("{},{}", model, id))).collect());
        }
        let rec_name = definition.rec_name.clone();
        let rows = self.read(model, ids, Some(&[rec_name.as_str()])).await?;
        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(id) = row.get("id").and_then(Value::as_i64) else {
                continue;
            };
            let name = match row.get(&rec_name) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            names.push((id, name));
        }
        Ok(names)
    }
}
