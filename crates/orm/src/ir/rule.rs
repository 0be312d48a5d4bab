//! Record rules
//!
//! A rule group targets one model and a set of modes. Global groups apply to
//! everybody and are AND-ed; other groups apply to the members of their
//! groups and are OR-ed together. The rules of one group are OR-ed.
//!
//! Rule domains are stored as JSON; a `{"$user": "field"}` value stands for
//! that field of the current user.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use oerp_cache::cache_key;
use serde_json::{json, Value};
use tracing::debug;

use super::access::AccessMode;
use crate::domain::{compiler::QueryTables, Domain};
use crate::error::{ModelError, OrmResult};
use crate::model::{method, Model, ModelMethod};
use crate::query::Sql;
use crate::transaction::Transaction;

pub const RULE_CACHE: &str = "ir.rule.domain";

/// Constraint method validating rule domains
pub const CHECK_DOMAIN: &str = "check_domain";

const PLACEHOLDER: &str = "$user";

fn collect_placeholders(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(field)) = map.get(PLACEHOLDER) {
                found.push(field.clone());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_placeholders(v, found)),
        _ => {}
    }
}

fn substitute(value: &Value, user: &BTreeMap<String, Value>) -> Value {
    match value {
        Value::Object(map) => match map.get(PLACEHOLDER) {
            Some(Value::String(field)) => user.get(field).cloned().unwrap_or(Value::Null),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, user)).collect()),
        other => other.clone(),
    }
}

/// `check_domain` method of `ir.rule`: every domain must parse
pub fn check_domain_method() -> Arc<dyn ModelMethod> {
    method(|tx, _model, ids, _args| {
        Box::pin(async move {
            let mut sql = Sql::new("SELECT \"domain\" FROM \"ir_rule\" WHERE \"id\" IN ");
            sql.append(Sql::value_list(ids.iter().copied()));
            for row in tx.fetch_all(&sql).await? {
                let raw = row.get_string("domain").unwrap_or_default();
                let valid = serde_json::from_str::<Value>(&raw)
                    .ok()
                    .map(|value| Domain::from_json(&value).is_ok())
                    .unwrap_or(false);
                if !valid {
                    return Ok(json!(false));
                }
            }
            Ok(json!(true))
        })
    })
}

impl Transaction {
    /// Rule domain restricting `mode` on `model` for the current user
    pub async fn rule_domain(&mut self, model: &str, mode: AccessMode) -> OrmResult<Option<Domain>> {
        if self.is_superuser() {
            return Ok(None);
        }
        let key = cache_key(&(model, mode, self.user()));
        if let Some(hit) = self.cache_get::<Option<Domain>>(RULE_CACHE, &key) {
            return Ok(hit);
        }
        let domain = self.compute_rule_domain(model, mode).await?;
        self.cache_put(RULE_CACHE, &key, &domain);
        Ok(domain)
    }

    async fn compute_rule_domain(&mut self, model: &str, mode: AccessMode) -> OrmResult<Option<Domain>> {
        let mut sql = Sql::new("SELECT \"id\", \"global_p\" FROM \"ir_rule_group\" WHERE \"model\" = ");
        sql.push_param(model)
            .push(" AND ")
            .push_ident(mode.column())
            .push(" = ")
            .push_param(true)
            .push(" ORDER BY \"id\"");
        let rows = self.fetch_all(&sql).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let user_groups: HashSet<i64> = self.user_groups().await?.into_iter().collect();
        let mut global = Vec::new();
        let mut grouped = Vec::new();
        for row in rows {
            let id = row.get_i64("id")?;
            let is_global = row.get("global_p").and_then(|v| v.as_bool()).unwrap_or(false);
            if !is_global {
                let mut members = Sql::new(
                    "SELECT \"group\" FROM \"ir_rule_group_group_rel\" WHERE \"rule_group\" = ",
                );
                members.push_param(id);
                let groups = self.fetch_ids(&members).await?;
                if !groups.iter().any(|g| user_groups.contains(g)) {
                    continue;
                }
            }

            let mut rules = Sql::new("SELECT \"domain\" FROM \"ir_rule\" WHERE \"rule_group\" = ");
            rules.push_param(id).push(" ORDER BY \"id\"");
            let mut domains = Vec::new();
            for rule in self.fetch_all(&rules).await? {
                let raw = rule.get_string("domain").unwrap_or_default();
                let value: Value = serde_json::from_str(&raw)?;
                domains.push(self.resolve_placeholders(&value).await?);
            }
            if domains.is_empty() {
                continue;
            }
            let group_domain = Domain::or(domains);
            if is_global {
                global.push(group_domain);
            } else {
                grouped.push(group_domain);
            }
        }

        if !grouped.is_empty() {
            global.push(Domain::or(grouped));
        }
        let domain = Domain::and(global);
        debug!("rule domain for {} ({}): {}", model, mode, domain.to_json());
        Ok(if domain.is_empty() { None } else { Some(domain) })
    }

    async fn resolve_placeholders(&mut self, value: &Value) -> OrmResult<Domain> {
        let mut fields = Vec::new();
        collect_placeholders(value, &mut fields);
        let mut user = BTreeMap::new();
        for field in fields {
            if !user.contains_key(&field) {
                let resolved = self.user_value(&field).await?;
                user.insert(field, resolved);
            }
        }
        let domain = Domain::from_json(value)?;
        Ok(domain.map_values(&mut |v| substitute(v, &user)))
    }

    /// Fail unless every record of `ids` passes the rules of `mode`
    pub async fn check_rule_bypass(
        &mut self,
        model: &Arc<Model>,
        ids: &[i64],
        mode: AccessMode,
    ) -> OrmResult<()> {
        let Some(rule) = self.rule_domain(&model.name, mode).await? else {
            return Ok(());
        };
        let unique: Vec<i64> = {
            let mut seen = HashSet::new();
            ids.iter().copied().filter(|id| seen.insert(*id)).collect()
        };
        for chunk in unique.chunks(self.in_max()) {
            let mut tables = QueryTables::new(&model.table);
            let alias = tables.main_alias().to_string();
            let condition = self
                .compile_domain(model.clone(), &rule, &mut tables, alias.clone())
                .await?;
            let mut in_chunk = Sql::column(&alias, "id");
            in_chunk
                .push(" IN ")
                .append(Sql::value_list(chunk.iter().copied()));
            let visible = tables
                .select()
                .column(Sql::new("COUNT(*)"))
                .filter(in_chunk)
                .filter(condition)
                .to_sql(self.dialect());
            let visible = self.fetch_count(&visible).await?;

            let mut total = Sql::new("SELECT COUNT(*) FROM ");
            total
                .push_ident(&model.table)
                .push(" WHERE \"id\" IN ")
                .append(Sql::value_list(chunk.iter().copied()));
            let total = self.fetch_count(&total).await?;
            if visible != total {
                debug!(
                    "user {} bypassing {} rules on {}: {} of {} rows visible",
                    self.user(),
                    mode,
                    model.name,
                    visible,
                    total
                );
                return Err(self
                    .localize(ModelError::access(
                        &model.name,
                        mode.as_str(),
                        "You try to bypass an access rule!",
                    ))
                    .await);
            }
        }
        Ok(())
    }
}
