//! Domain to SQL translation
//!
//! Leaves compile against the alias of the table holding their field:
//!
//! - many2one hops and delegated (`inherits`) fields become deduplicated
//!   `LEFT JOIN`s (`_j1`, `_j2`, ...)
//! - one2many and many2many leaves become `IN`/`NOT IN` subqueries whose
//!   tables get `_s` aliases, so nothing ever multiplies the main rows
//! - `child_of` expands to the set of ids below the given records, through
//!   the MPTT interval when the tree keeps one
//! - function fields ask their searcher method for an equivalent domain,
//!   property fields are matched in memory against `ir.property`
//!
//! The top-level `where_clause` adds the implicit `active` filter and the
//! record rules of the user.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use super::eval;
use super::{Domain, DomainNode, Leaf, Operator};
use crate::backends::{DatabaseValue, SqlDialect};
use crate::error::{ModelError, OrmResult};
use crate::fields::conversion::{id_from_value, is_empty_value};
use crate::fields::{Field, FieldKind};
use crate::ir::access::AccessMode;
use crate::ir::property::decode_value;
use crate::model::Model;
use crate::query::{JoinClause, JoinType, SelectQuery, Sql, TableRef};
use crate::transaction::Transaction;

/// Tables of one query scope: the main table, the joins added while
/// compiling and the alias counter shared with nested subqueries
#[derive(Debug, Clone)]
pub struct QueryTables {
    main: TableRef,
    joins: Vec<JoinClause>,
    join_aliases: HashMap<(String, String), String>,
    counter: usize,
}

impl QueryTables {
    /// Scope whose main table is known by its own name
    pub fn new(table: &str) -> Self {
        Self {
            main: TableRef::plain(table),
            joins: Vec::new(),
            join_aliases: HashMap::new(),
            counter: 0,
        }
    }

    pub fn main_alias(&self) -> &str {
        &self.main.alias
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    fn next_alias(&mut self, prefix: char) -> String {
        self.counter += 1;
        format!("_{}{}", prefix, self.counter)
    }

    /// `LEFT JOIN table ON table.id = from.column`, once per `(from, column)`
    pub fn join_many2one(&mut self, from: &str, column: &str, table: &str) -> String {
        let key = (from.to_string(), column.to_string());
        if let Some(alias) = self.join_aliases.get(&key) {
            return alias.clone();
        }
        let alias = self.next_alias('j');
        let mut on = Sql::column(&alias, "id");
        on.push(" = ").append(Sql::column(from, column));
        self.joins.push(JoinClause {
            join_type: JoinType::Left,
            table: TableRef::new(table, alias.clone()),
            on,
        });
        self.join_aliases.insert(key, alias.clone());
        alias
    }

    /// Fresh scope for a subquery on `table`
    pub fn subquery(&mut self, table: &str) -> QueryTables {
        let alias = self.next_alias('s');
        QueryTables {
            main: TableRef::new(table, alias),
            joins: Vec::new(),
            join_aliases: HashMap::new(),
            counter: self.counter,
        }
    }

    /// Take over the counter of a finished subquery scope
    pub fn absorb(&mut self, sub: &QueryTables) {
        self.counter = self.counter.max(sub.counter);
    }

    /// SELECT over the main table and the joins
    pub fn select(&self) -> SelectQuery {
        SelectQuery::new(self.main.clone()).joins(self.joins.clone())
    }
}

/// Bound value for a comparison with `field`
fn comparison_value(field: &Field, model: &str, value: &Value) -> DatabaseValue {
    match field.to_db(model, value) {
        Ok(converted) => converted,
        Err(_) => match value {
            Value::Bool(b) => DatabaseValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => DatabaseValue::Int64(i),
                None => DatabaseValue::Float64(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => DatabaseValue::String(s.clone()),
            Value::Null => DatabaseValue::Null,
            other => DatabaseValue::String(other.to_string()),
        },
    }
}

fn is_null_sql(column: &Sql, negate: bool) -> Sql {
    let mut sql = column.clone();
    sql.push(if negate { " IS NOT NULL" } else { " IS NULL" });
    sql
}

fn or_null(condition: Sql, column: &Sql) -> Sql {
    Sql::join([condition, is_null_sql(column, false)], " OR ").wrap()
}

fn like_operand(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null | Value::Bool(false) => String::new(),
        other => other.to_string(),
    }
}

/// Compile `column <operator> value` for a plain column of `field`
pub fn compile_comparison(
    column: Sql,
    field: &Field,
    model: &str,
    operator: Operator,
    value: &Value,
    dialect: SqlDialect,
    in_max: usize,
) -> OrmResult<Sql> {
    if let FieldKind::Boolean = field.kind.value_kind() {
        if matches!(operator, Operator::Eq | Operator::Ne)
            && matches!(value, Value::Bool(_) | Value::Null | Value::Number(_))
        {
            let truthy = match value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
                _ => false,
            };
            let mut sql = column.clone();
            return Ok(if truthy == (operator == Operator::Eq) {
                sql.push(" = ").push_param(true);
                sql
            } else {
                sql.push(" = ").push_param(false);
                or_null(sql, &column)
            });
        }
    }

    match operator {
        Operator::Eq | Operator::Ne if is_empty_value(value) => {
            Ok(is_null_sql(&column, operator == Operator::Ne))
        }
        Operator::Eq => {
            let mut sql = column;
            sql.push(" = ").push_param(comparison_value(field, model, value));
            Ok(sql)
        }
        Operator::Ne => {
            let mut sql = column.clone();
            sql.push(" != ").push_param(comparison_value(field, model, value));
            Ok(or_null(sql, &column))
        }
        Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge => {
            let mut sql = column;
            sql.push(" ")
                .push(operator.as_str())
                .push(" ")
                .push_param(comparison_value(field, model, value));
            Ok(sql)
        }
        Operator::Like | Operator::ILike | Operator::NotLike | Operator::NotILike => {
            let operand = if field.kind.is_textual() {
                column.clone()
            } else {
                let mut cast = Sql::new("CAST(");
                cast.append(column.clone()).push(" AS VARCHAR)");
                cast
            };
            let negate = operator.is_negative();
            let pattern = like_operand(value);
            let mut sql = Sql::default();
            if operator.positive() == Operator::ILike && !dialect.has_ilike() {
                sql.push("LOWER(").append(operand).push(")");
                sql.push(if negate { " NOT LIKE " } else { " LIKE " });
                sql.push("LOWER(").push_param(pattern).push(")");
            } else {
                sql.append(operand);
                let keyword = match operator {
                    Operator::Like => " LIKE ",
                    Operator::NotLike => " NOT LIKE ",
                    Operator::ILike => " ILIKE ",
                    _ => " NOT ILIKE ",
                };
                sql.push(keyword).push_param(pattern);
            }
            Ok(if negate { or_null(sql, &column) } else { sql })
        }
        Operator::In | Operator::NotIn => {
            let items: Vec<Value> = match value {
                Value::Array(items) => items.clone(),
                Value::Null | Value::Bool(false) => vec![Value::Null],
                single => vec![single.clone()],
            };
            let has_null = items.iter().any(is_empty_value)
                && !matches!(field.kind.value_kind(), FieldKind::Boolean);
            let values: Vec<DatabaseValue> = items
                .iter()
                .filter(|v| !is_empty_value(v) || matches!(field.kind.value_kind(), FieldKind::Boolean))
                .map(|v| comparison_value(field, model, v))
                .collect();
            let negate = operator == Operator::NotIn;

            if values.is_empty() {
                return Ok(match (has_null, negate) {
                    (false, false) => Sql::falsehood(),
                    (false, true) => Sql::truth(),
                    (true, false) => is_null_sql(&column, false),
                    (true, true) => is_null_sql(&column, true),
                });
            }

            let parts = values.chunks(in_max.max(1)).map(|chunk| {
                let mut sql = column.clone();
                sql.push(if negate { " NOT IN " } else { " IN " })
                    .append(Sql::value_list(chunk.iter().cloned()));
                sql
            });
            let combined = Sql::join(parts, if negate { " AND " } else { " OR " }).wrap();
            Ok(match (has_null, negate) {
                (false, false) => combined,
                (true, false) => or_null(combined, &column),
                (false, true) => or_null(combined, &column),
                (true, true) => Sql::join([combined, is_null_sql(&column, true)], " AND ").wrap(),
            })
        }
        Operator::ChildOf => Err(ModelError::Programming(format!(
            "child_of is not supported on field '{}' of '{}'",
            field.name, model
        ))),
    }
}

/// `column IN (subquery)` or `column NOT IN (subquery)`
fn in_subquery(column: Sql, subquery: Sql, negate: bool) -> Sql {
    let mut sql = column;
    sql.push(if negate { " NOT IN (" } else { " IN (" })
        .append(subquery)
        .push(")");
    sql
}

fn id_list(ids: &[i64]) -> Value {
    Value::Array(ids.iter().map(|id| json!(id)).collect())
}

impl Transaction {
    /// Field `name` as seen from `model` at `alias`, joining the parent
    /// tables of delegated fields
    pub fn resolve_field(
        &self,
        model: Arc<Model>,
        alias: &str,
        name: &str,
        tables: &mut QueryTables,
    ) -> OrmResult<(Arc<Model>, String, Arc<Field>)> {
        let mut model = model;
        let mut alias = alias.to_string();
        loop {
            if let Some(field) = model.field(name) {
                let field = field.clone();
                return Ok((model, alias, field));
            }
            let inherited = model
                .inherited_field(name)
                .cloned()
                .ok_or_else(|| ModelError::unknown_field(&model.name, name))?;
            let parent = self.model(&inherited.parent)?;
            alias = tables.join_many2one(&alias, &inherited.link, &parent.table);
            model = parent;
        }
    }

    /// Compile `domain` on `model`, whose table is known as `alias`
    pub fn compile_domain<'a>(
        &'a mut self,
        model: Arc<Model>,
        domain: &'a Domain,
        tables: &'a mut QueryTables,
        alias: String,
    ) -> BoxFuture<'a, OrmResult<Sql>> {
        Box::pin(async move {
            let mut parts = Vec::with_capacity(domain.nodes.len());
            for node in &domain.nodes {
                let sql = match node {
                    DomainNode::Leaf(leaf) => {
                        self.compile_leaf(model.clone(), leaf, tables, &alias).await?
                    }
                    DomainNode::Group(group) => {
                        self.compile_domain(model.clone(), group, tables, alias.clone())
                            .await?
                    }
                };
                parts.push(sql);
            }
            let separator = match domain.bool_op() {
                super::BoolOp::And => " AND ",
                super::BoolOp::Or => " OR ",
            };
            Ok(match parts.len() {
                0 => Sql::truth(),
                1 => parts.into_iter().next().unwrap_or_else(Sql::truth),
                _ => Sql::join(parts, separator).wrap(),
            })
        })
    }

    async fn compile_leaf(
        &mut self,
        model: Arc<Model>,
        leaf: &Leaf,
        tables: &mut QueryTables,
        alias: &str,
    ) -> OrmResult<Sql> {
        let (head, rest) = leaf.split_path();
        let (owner, alias, field) = self.resolve_field(model, alias, head, tables)?;
        let dialect = self.dialect();
        let in_max = self.in_max();

        let plain_child_of = leaf.operator == Operator::ChildOf
            && rest.is_none()
            && field.kind.relation().is_none()
            && !matches!(field.kind, FieldKind::Function(_) | FieldKind::Property(_));
        if plain_child_of {
            let roots = self.child_of_roots(&owner, &leaf.value).await?;
            let ids = self.descendants(&owner, &roots).await?;
            let id_field = owner.require_field("id")?.clone();
            return compile_comparison(
                Sql::column(&alias, "id"),
                &id_field,
                &owner.name,
                Operator::In,
                &id_list(&ids),
                dialect,
                in_max,
            );
        }

        match (&field.kind, rest) {
            (FieldKind::Function(function), _) => {
                let searcher = function.searcher.clone().ok_or_else(|| {
                    ModelError::Programming(format!(
                        "Field '{}' of '{}' is not searchable",
                        field.name, owner.name
                    ))
                })?;
                let result = self
                    .call(
                        &owner.name,
                        &searcher,
                        &[],
                        json!({
                            "name": leaf.field,
                            "operator": leaf.operator.as_str(),
                            "value": leaf.value,
                        }),
                    )
                    .await?;
                let domain = Domain::from_json(&result)?;
                self.compile_domain(owner, &domain, tables, alias).await
            }
            (FieldKind::Property(_), None) => {
                self.compile_property(&owner, &field, leaf, &alias).await
            }
            (FieldKind::Many2One(m2o), Some(rest)) => {
                let target = self.model(&m2o.relation)?;
                let join = tables.join_many2one(&alias, &field.name, &target.table);
                let sub = Domain::leaf(rest, leaf.operator, leaf.value.clone());
                self.compile_domain(target, &sub, tables, join).await
            }
            (FieldKind::One2Many(_) | FieldKind::Many2Many(_), rest) => {
                self.compile_x2many(&field, leaf, rest, tables, &alias).await
            }
            (_, Some(_)) => Err(ModelError::Programming(format!(
                "Field '{}' of '{}' is not relational, can not follow '{}'",
                field.name, owner.name, leaf.field
            ))),
            (FieldKind::Many2One(m2o), None) => {
                let target = self.model(&m2o.relation)?;
                let column = Sql::column(&alias, &field.name);
                if leaf.operator == Operator::ChildOf {
                    let roots = self.child_of_roots(&target, &leaf.value).await?;
                    let ids = self.descendants(&target, &roots).await?;
                    return compile_comparison(
                        column,
                        &field,
                        &owner.name,
                        Operator::In,
                        &id_list(&ids),
                        dialect,
                        in_max,
                    );
                }
                if names_value(&leaf.value) {
                    let negate = leaf.operator.is_negative();
                    let by_name = Domain::leaf(
                        target.rec_name.clone(),
                        leaf.operator.positive(),
                        leaf.value.clone(),
                    );
                    let mut sub = tables.subquery(&target.table);
                    let sub_alias = sub.main_alias().to_string();
                    let condition = self
                        .compile_domain(target.clone(), &by_name, &mut sub, sub_alias.clone())
                        .await?;
                    tables.absorb(&sub);
                    let select = sub
                        .select()
                        .column(Sql::column(&sub_alias, "id"))
                        .filter(condition)
                        .to_sql(dialect);
                    let sql = in_subquery(column.clone(), select, negate);
                    return Ok(if negate { or_null(sql, &column) } else { sql });
                }
                compile_comparison(column, &field, &owner.name, leaf.operator, &leaf.value, dialect, in_max)
            }
            (_, None) => {
                if field.translate && self.translating() && !leaf.operator.is_negative() {
                    return self
                        .compile_translated(&owner, &field, leaf, tables, &alias)
                        .await;
                }
                let column = field
                    .sql_type()
                    .map(|ty| ty.select_expression(Sql::column(&alias, &field.name), dialect))
                    .unwrap_or_else(|| Sql::column(&alias, &field.name));
                compile_comparison(
                    column,
                    &field,
                    &owner.name,
                    leaf.operator,
                    &leaf.value,
                    dialect,
                    in_max,
                )
            }
        }
    }

    /// Translatable column: the source value or the translation in the
    /// request language may match
    async fn compile_translated(
        &mut self,
        model: &Model,
        field: &Field,
        leaf: &Leaf,
        tables: &mut QueryTables,
        alias: &str,
    ) -> OrmResult<Sql> {
        let dialect = self.dialect();
        let in_max = self.in_max();
        let mut sub = tables.subquery(&model.table);
        let sub_alias = sub.main_alias().to_string();
        tables.absorb(&sub);

        let source = compile_comparison(
            Sql::column(&sub_alias, &field.name),
            field,
            &model.name,
            leaf.operator,
            &leaf.value,
            dialect,
            in_max,
        )?;
        let translated = compile_comparison(
            Sql::column("ir_translation", "value"),
            field,
            &model.name,
            leaf.operator,
            &leaf.value,
            dialect,
            in_max,
        )?;

        let mut union = sub
            .select()
            .column(Sql::column(&sub_alias, "id"))
            .filter(source)
            .to_sql(dialect);
        union.push(" UNION ");
        union.append(
            SelectQuery::new(TableRef::plain("ir_translation"))
                .column(Sql::column("ir_translation", "res_id"))
                .filter({
                    let mut sql = Sql::column("ir_translation", "name");
                    sql.push(" = ").push_param(model.translation_name(&field.name));
                    sql
                })
                .filter({
                    let mut sql = Sql::column("ir_translation", "lang");
                    sql.push(" = ").push_param(self.language());
                    sql
                })
                .filter({
                    let mut sql = Sql::column("ir_translation", "type");
                    sql.push(" = ").push_param("model");
                    sql
                })
                .filter(translated)
                .to_sql(dialect),
        );
        Ok(in_subquery(Sql::column(alias, "id"), union, false))
    }

    async fn compile_x2many(
        &mut self,
        field: &Field,
        leaf: &Leaf,
        rest: Option<&str>,
        tables: &mut QueryTables,
        alias: &str,
    ) -> OrmResult<Sql> {
        let dialect = self.dialect();
        let target = self.model(field.kind.relation().unwrap_or_default())?;
        let negate;
        let target_domain = match rest {
            Some(rest) => {
                negate = leaf.operator.is_negative();
                Some(Domain::leaf(rest, leaf.operator.positive(), leaf.value.clone()))
            }
            None if is_empty_value(&leaf.value)
                && matches!(leaf.operator, Operator::Eq | Operator::Ne) =>
            {
                // `= false` means "no linked record at all"
                negate = leaf.operator == Operator::Eq;
                None
            }
            None => {
                negate = leaf.operator.is_negative();
                let operator = leaf.operator.positive();
                let by = if names_value(&leaf.value) && operator != Operator::ChildOf {
                    target.rec_name.clone()
                } else {
                    "id".to_string()
                };
                Some(Domain::leaf(by, operator, leaf.value.clone()))
            }
        };

        let subquery = match &field.kind {
            FieldKind::One2Many(o2m) => {
                let mut sub = tables.subquery(&target.table);
                let sub_alias = sub.main_alias().to_string();
                let mut select_filter = is_null_sql(&Sql::column(&sub_alias, &o2m.field), true);
                if let Some(domain) = &target_domain {
                    let condition = self
                        .compile_domain(target.clone(), domain, &mut sub, sub_alias.clone())
                        .await?;
                    select_filter = Sql::join([select_filter, condition], " AND ");
                }
                tables.absorb(&sub);
                sub.select()
                    .column(Sql::column(&sub_alias, &o2m.field))
                    .filter(select_filter)
                    .to_sql(dialect)
            }
            FieldKind::Many2Many(m2m) => {
                let rel = tables.subquery(&m2m.table);
                let rel_alias = rel.main_alias().to_string();
                tables.absorb(&rel);
                let mut select = rel.select().column(Sql::column(&rel_alias, &m2m.origin));
                if let Some(domain) = &target_domain {
                    let mut sub = tables.subquery(&target.table);
                    let sub_alias = sub.main_alias().to_string();
                    let condition = self
                        .compile_domain(target.clone(), domain, &mut sub, sub_alias.clone())
                        .await?;
                    tables.absorb(&sub);
                    let targets = sub
                        .select()
                        .column(Sql::column(&sub_alias, "id"))
                        .filter(condition)
                        .to_sql(dialect);
                    select = select.filter(in_subquery(
                        Sql::column(&rel_alias, &m2m.target),
                        targets,
                        false,
                    ));
                }
                select.to_sql(dialect)
            }
            _ => {
                return Err(ModelError::Programming(format!(
                    "Field '{}' is not a one2many or many2many",
                    field.name
                )))
            }
        };
        Ok(in_subquery(Sql::column(alias, "id"), subquery, negate))
    }

    /// Property values live in `ir.property`; they are compared in memory
    async fn compile_property(
        &mut self,
        model: &Model,
        field: &Field,
        leaf: &Leaf,
        alias: &str,
    ) -> OrmResult<Sql> {
        let mut sql = Sql::new("SELECT \"res\", \"value\" FROM \"ir_property\" WHERE \"model\" = ");
        sql.push_param(model.name.as_str())
            .push(" AND \"name\" = ")
            .push_param(field.name.as_str());
        let rows = self.fetch_all(&sql).await?;

        let prefix = format!("{},", model.name);
        let mut default_matches = eval::matches(leaf.operator, &Value::Null, &leaf.value);
        let mut matching = Vec::new();
        let mut failing = Vec::new();
        for row in rows {
            let value = row
                .get_string("value")
                .map(|raw| decode_value(field, &raw))
                .unwrap_or(Value::Null);
            let hit = eval::matches(leaf.operator, &value, &leaf.value);
            match row.get_string("res") {
                None => default_matches = hit,
                Some(res) => {
                    if let Some(id) = res.strip_prefix(&prefix).and_then(|id| id.parse::<i64>().ok()) {
                        if hit {
                            matching.push(id);
                        } else {
                            failing.push(id);
                        }
                    }
                }
            }
        }

        let id_field = model.require_field("id")?.clone();
        let (operator, ids) = if default_matches {
            (Operator::NotIn, failing)
        } else {
            (Operator::In, matching)
        };
        compile_comparison(
            Sql::column(alias, "id"),
            &id_field,
            &model.name,
            operator,
            &id_list(&ids),
            self.dialect(),
            self.in_max(),
        )
    }

    /// Ids named by a `child_of` value: ids, or record names
    async fn child_of_roots(&mut self, model: &Model, value: &Value) -> OrmResult<Vec<i64>> {
        let items = match value {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        let mut ids = Vec::new();
        for item in items {
            match item {
                Value::String(name) => {
                    for (id, _) in self
                        .name_search(&model.name, &name, &Domain::new(), Operator::Eq, None)
                        .await?
                    {
                        ids.push(id);
                    }
                }
                other => ids.extend(id_from_value(&other)),
            }
        }
        Ok(ids)
    }

    /// `ids` and every record below them in the tree of `model`
    pub async fn descendants(&mut self, model: &Model, ids: &[i64]) -> OrmResult<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let parent = model.tree_parent().cloned().ok_or_else(|| {
            ModelError::Programming(format!(
                "Model '{}' has no parent field for child_of",
                model.name
            ))
        })?;
        let mut found: Vec<i64> = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();

        if let Some((left, right)) = parent.tree_columns() {
            for chunk in ids.chunks(self.in_max()) {
                let mut sql = Sql::new("SELECT \"c\".\"id\" FROM ");
                sql.push_ident(&model.table)
                    .push(" AS \"c\" JOIN ")
                    .push_ident(&model.table)
                    .push(" AS \"p\" ON ")
                    .append(Sql::column("c", left))
                    .push(" >= ")
                    .append(Sql::column("p", left))
                    .push(" AND ")
                    .append(Sql::column("c", right))
                    .push(" <= ")
                    .append(Sql::column("p", right))
                    .push(" WHERE \"p\".\"id\" IN ")
                    .append(Sql::value_list(chunk.iter().copied()))
                    .push(" ORDER BY ")
                    .append(Sql::column("c", left));
                for id in self.fetch_ids(&sql).await? {
                    if seen.insert(id) {
                        found.push(id);
                    }
                }
            }
            // rows the interval does not cover yet
            let roots: Vec<i64> = ids.iter().copied().filter(|id| !seen.contains(id)).collect();
            if roots.is_empty() {
                return Ok(found);
            }
            let rest = self.walk_children(model, &parent.name, &roots).await?;
            for id in rest {
                if seen.insert(id) {
                    found.push(id);
                }
            }
            return Ok(found);
        }

        self.walk_children(model, &parent.name, ids).await
    }

    async fn walk_children(&mut self, model: &Model, parent: &str, ids: &[i64]) -> OrmResult<Vec<i64>> {
        let mut seen: HashSet<i64> = HashSet::new();
        let mut found = Vec::new();
        let mut frontier = Vec::new();
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new("SELECT \"id\" FROM ");
            sql.push_ident(&model.table)
                .push(" WHERE \"id\" IN ")
                .append(Sql::value_list(chunk.iter().copied()));
            frontier.extend(self.fetch_ids(&sql).await?);
        }
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for id in &frontier {
                if seen.insert(*id) {
                    found.push(*id);
                }
            }
            for chunk in frontier.chunks(self.in_max()) {
                let mut sql = Sql::new("SELECT \"id\" FROM ");
                sql.push_ident(&model.table)
                    .push(" WHERE ")
                    .push_ident(parent)
                    .push(" IN ")
                    .append(Sql::value_list(chunk.iter().copied()));
                for child in self.fetch_ids(&sql).await? {
                    if !seen.contains(&child) {
                        next.push(child);
                    }
                }
            }
            frontier = next;
        }
        Ok(found)
    }

    /// Scope and condition of a search on `model`: the domain, the implicit
    /// `active` filter and the record rules of `mode`
    pub async fn where_clause(
        &mut self,
        model: &Arc<Model>,
        domain: &Domain,
        mode: AccessMode,
    ) -> OrmResult<(QueryTables, Sql)> {
        let mut tables = QueryTables::new(&model.table);
        let alias = model.table.clone();

        let mut domain = domain.clone();
        if model.has_active()
            && self.context().active_test()
            && !domain.leaves().iter().any(|leaf| leaf.split_path().0 == "active")
        {
            domain = Domain::and(vec![domain, Domain::leaf("active", Operator::Eq, json!(true))]);
        }

        let mut condition = self
            .compile_domain(model.clone(), &domain, &mut tables, alias.clone())
            .await?;
        if let Some(rule) = self.rule_domain(&model.name, mode).await? {
            let rule = self
                .compile_domain(model.clone(), &rule, &mut tables, alias)
                .await?;
            condition = Sql::join([condition, rule], " AND ").wrap();
        }
        Ok((tables, condition))
    }
}

/// Whether a relational leaf value names records instead of giving ids
fn names_value(value: &Value) -> bool {
    match value {
        Value::String(_) => true,
        Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_string),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(kind: Field, name: &str) -> Field {
        let mut field = kind;
        field.name = name.to_string();
        field
    }

    #[test]
    fn test_null_and_negative_comparisons() {
        let name = field(Field::char("Name"), "name");
        let column = Sql::column("t", "name");
        let sql = compile_comparison(column.clone(), &name, "m", Operator::Eq, &json!(null), SqlDialect::SQLite, 10).unwrap();
        assert_eq!(sql.text(), "\"t\".\"name\" IS NULL");

        let sql = compile_comparison(column.clone(), &name, "m", Operator::Ne, &json!("x"), SqlDialect::SQLite, 10).unwrap();
        assert_eq!(sql.text(), "(\"t\".\"name\" != ? OR \"t\".\"name\" IS NULL)");
        assert_eq!(sql.params(), &[DatabaseValue::String("x".into())]);
    }

    #[test]
    fn test_in_lists() {
        let id = field(Field::integer("ID"), "id");
        let column = Sql::column("t", "id");
        let empty = compile_comparison(column.clone(), &id, "m", Operator::In, &json!([]), SqlDialect::PostgreSQL, 10).unwrap();
        assert_eq!(empty.text(), "(1 = 0)");
        let none = compile_comparison(column.clone(), &id, "m", Operator::NotIn, &json!([]), SqlDialect::PostgreSQL, 10).unwrap();
        assert_eq!(none.text(), "(1 = 1)");

        let chunked = compile_comparison(column, &id, "m", Operator::In, &json!([1, 2, 3]), SqlDialect::PostgreSQL, 2).unwrap();
        assert_eq!(chunked.text(), "(\"t\".\"id\" IN (?, ?) OR \"t\".\"id\" IN (?))");
        assert_eq!(chunked.params().len(), 3);
    }

    #[test]
    fn test_ilike_per_dialect() {
        let name = field(Field::char("Name"), "name");
        let column = Sql::column("t", "name");
        let pg = compile_comparison(column.clone(), &name, "m", Operator::ILike, &json!("%a%"), SqlDialect::PostgreSQL, 10).unwrap();
        assert_eq!(pg.text(), "\"t\".\"name\" ILIKE ?");
        let lite = compile_comparison(column, &name, "m", Operator::ILike, &json!("%a%"), SqlDialect::SQLite, 10).unwrap();
        assert_eq!(lite.text(), "LOWER(\"t\".\"name\") LIKE LOWER(?)");
    }

    #[test]
    fn test_boolean_false_includes_null() {
        let active = field(Field::boolean("Active"), "active");
        let column = Sql::column("t", "active");
        let sql = compile_comparison(column.clone(), &active, "m", Operator::Eq, &json!(false), SqlDialect::SQLite, 10).unwrap();
        assert_eq!(sql.text(), "(\"t\".\"active\" = ? OR \"t\".\"active\" IS NULL)");
        let sql = compile_comparison(column, &active, "m", Operator::Eq, &json!(true), SqlDialect::SQLite, 10).unwrap();
        assert_eq!(sql.text(), "\"t\".\"active\" = ?");
    }

    #[test]
    fn test_join_aliases_are_deduplicated() {
        let mut tables = QueryTables::new("res_user");
        let a = tables.join_many2one("res_user", "company", "res_company");
        let b = tables.join_many2one("res_user", "company", "res_company");
        assert_eq!(a, b);
        assert_eq!(tables.joins().len(), 1);
        let sub = tables.subquery("res_group");
        assert_eq!(sub.main_alias(), "_s2");
        tables.absorb(&sub);
        assert_eq!(tables.join_many2one("res_user", "parent", "res_user"), "_j3");
    }
}
