//! Schema synchronizer
//!
//! [`Transaction::auto_init`] compares the declared fields of a model with
//! the live catalog and applies the smallest set of changes that makes the
//! table match: missing columns, type changes, nullability, indexes,
//! foreign keys, SQL constraints, many2many join tables and tree bounds.
//! Running it twice in a row changes nothing the second time.
//!
//! Every applied change is returned as a short description and logged at
//! `info`; changes that can not be applied safely are logged at `warn` and
//! skipped, never forced.

pub mod postgres;
pub mod sqlite;
pub mod table;
pub(crate) mod tree;

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::backends::SqlDialect;
use crate::error::OrmResult;
use crate::fields::conversion::is_empty_value;
use crate::fields::sql_type::TypeChange;
use crate::fields::{Field, FieldKind, OnDelete, SqlType};
use crate::model::{Model, SqlConstraintKind};
use crate::query::Sql;
use crate::transaction::Transaction;

pub use postgres::PostgresCatalog;
pub use sqlite::SqliteCatalog;

/// Suffix of a column being replaced by a column of another type
const MOVED_SUFFIX: &str = "_moved";

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// Type as reported by the catalog
    pub sql_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyInfo {
    /// SQLite foreign keys have no name
    pub name: Option<String>,
    pub column: String,
    pub table: String,
    pub on_delete: OnDelete,
}

/// Live description of one table
#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    /// Names of the CHECK constraints, PostgreSQL only
    pub checks: Vec<String>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn foreign_key(&self, column: &str) -> Option<&ForeignKeyInfo> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }

    pub fn has_check(&self, name: &str) -> bool {
        self.checks.iter().any(|c| c == name)
    }
}

/// Catalog introspection queries of one dialect
///
/// Each query selects normalized columns so [`Transaction::table_info`]
/// reads both backends the same way:
/// - `table_exists`: one count
/// - `columns`: `name`, `type`, `notnull`
/// - `indexes`: `name`, `column`, `is_unique`, one row per indexed column
/// - `foreign_keys`: `name`, `column`, `target`, `on_delete`
/// - `checks`: `name`
pub trait Catalog: Send + Sync {
    fn table_exists(&self, table: &str) -> Sql;
    fn columns(&self, table: &str) -> Sql;
    fn indexes(&self, table: &str) -> Sql;
    fn foreign_keys(&self, table: &str) -> Sql;
    fn checks(&self, table: &str) -> Option<Sql>;
}

pub fn catalog(dialect: SqlDialect) -> &'static dyn Catalog {
    match dialect {
        SqlDialect::PostgreSQL => &PostgresCatalog,
        SqlDialect::SQLite => &SqliteCatalog,
    }
}

impl Transaction {
    pub async fn table_exists(&mut self, table: &str) -> OrmResult<bool> {
        let sql = catalog(self.dialect()).table_exists(table);
        Ok(self.fetch_count(&sql).await? > 0)
    }

    /// Read the live description of `table`
    pub async fn table_info(&mut self, table: &str) -> OrmResult<TableInfo> {
        let catalog = catalog(self.dialect());
        let mut info = TableInfo::default();

        for row in self.fetch_all(&catalog.columns(table)).await? {
            let Some(name) = row.get_string("name") else {
                continue;
            };
            let not_null = row.get("notnull").and_then(|v| v.as_bool()).unwrap_or(false);
            info.columns.push(ColumnInfo {
                name,
                sql_type: row.get_string("type").unwrap_or_default(),
                nullable: !not_null,
            });
        }

        for row in self.fetch_all(&catalog.indexes(table)).await? {
            let (Some(name), Some(column)) = (row.get_string("name"), row.get_string("column")) else {
                continue;
            };
            let unique = row.get("is_unique").and_then(|v| v.as_bool()).unwrap_or(false);
            match info.indexes.iter_mut().find(|i| i.name == name) {
                Some(index) => index.columns.push(column),
                None => info.indexes.push(IndexInfo {
                    name,
                    columns: vec![column],
                    unique,
                }),
            }
        }

        for row in self.fetch_all(&catalog.foreign_keys(table)).await? {
            let (Some(column), Some(target)) = (row.get_string("column"), row.get_string("target")) else {
                continue;
            };
            let on_delete = row
                .get_string("on_delete")
                .and_then(|policy| policy.parse().ok())
                .unwrap_or(OnDelete::Restrict);
            info.foreign_keys.push(ForeignKeyInfo {
                name: row.get_string("name"),
                column,
                table: target,
                on_delete,
            });
        }

        if let Some(sql) = catalog.checks(table) {
            info.checks = self
                .fetch_all(&sql)
                .await?
                .iter()
                .filter_map(|row| row.get_string("name"))
                .collect();
        }
        Ok(info)
    }

    /// Bring the tables of every registered model in line with their
    /// declarations. Tables are created first so foreign keys can point to
    /// any of them.
    pub async fn synchronize_schema(&mut self) -> OrmResult<Vec<String>> {
        let models: Vec<Arc<Model>> = self.registry().models().collect();
        let mut changes = Vec::new();
        for model in &models {
            if !self.table_exists(&model.table).await? {
                self.execute(&table::create_table(&model.table, self.dialect()))
                    .await?;
                info!("{}: created table {}", model.name, model.table);
                changes.push(format!("create table {}", model.table));
            }
        }
        for model in &models {
            changes.extend(self.auto_init(model).await?);
        }
        if changes.is_empty() {
            debug!("Schema of {} models is up to date", models.len());
        }
        Ok(changes)
    }

    /// Synchronize the table of one model with its declaration
    pub fn auto_init<'a>(&'a mut self, model: &'a Arc<Model>) -> BoxFuture<'a, OrmResult<Vec<String>>> {
        Box::pin(async move {
            let mut changes = Vec::new();
            if !self.table_exists(&model.table).await? {
                self.execute(&table::create_table(&model.table, self.dialect()))
                    .await?;
                changes.push(format!("create table {}", model.table));
            }

            let info = self.table_info(&model.table).await?;
            for field in model.stored_fields() {
                if field.name == "id" {
                    continue;
                }
                match info.column(&field.name) {
                    None => changes.push(self.add_column(model, field).await?),
                    Some(column) => {
                        if let Some(change) = self.change_column_type(model, field, column, &info).await? {
                            changes.push(change);
                        }
                    }
                }
            }

            let info = self.table_info(&model.table).await?;
            changes.extend(self.sync_nullability(model, &info).await?);
            changes.extend(self.sync_indexes(model, &info).await?);
            changes.extend(self.sync_foreign_keys(model, &info).await?);
            changes.extend(self.sync_constraints(model, &info).await?);
            changes.extend(self.sync_relations(model).await?);
            changes.extend(self.sync_trees(model).await?);

            for change in &changes {
                info!("{}: {}", model.name, change);
            }
            Ok(changes)
        })
    }

    async fn add_column(&mut self, model: &Model, field: &Field) -> OrmResult<String> {
        let Some(ty) = field.sql_type() else {
            return Ok(String::new());
        };
        let reference = match field.many2one_info() {
            Some(m2o) => table::references(field, &self.model(&m2o.relation)?.table),
            None => None,
        };
        let sql = table::add_column(&model.table, &field.name, &ty, self.dialect(), reference);
        self.execute(&sql).await?;
        Ok(format!("add column {} {}", field.name, ty.to_sql(self.dialect())))
    }

    async fn change_column_type(
        &mut self,
        model: &Model,
        field: &Field,
        column: &ColumnInfo,
        info: &TableInfo,
    ) -> OrmResult<Option<String>> {
        let Some(declared) = field.sql_type() else {
            return Ok(None);
        };
        let Some(current) = SqlType::parse(&column.sql_type) else {
            warn!(
                "{}: column {} has unknown type {}, left unchanged",
                model.name, field.name, column.sql_type
            );
            return Ok(None);
        };
        let dialect = self.dialect();
        match declared.change_from(&current) {
            TypeChange::Same => Ok(None),
            TypeChange::Widen if dialect.supports_alter_type() => {
                self.execute(&table::alter_type(&model.table, &field.name, &declared, dialect))
                    .await?;
                Ok(Some(format!(
                    "alter column {} type {} to {}",
                    field.name,
                    column.sql_type,
                    declared.to_sql(dialect)
                )))
            }
            TypeChange::Widen => self.move_column(model, field, &declared, info).await.map(Some),
            TypeChange::Narrow => {
                if let Some(size) = declared.size {
                    let mut sql = Sql::new("SELECT COUNT(*) FROM ");
                    sql.push_ident(&model.table)
                        .push(" WHERE LENGTH(")
                        .push_ident(&field.name)
                        .push(") > ")
                        .push_param(size as i64);
                    if self.fetch_count(&sql).await? > 0 {
                        warn!(
                            "{}: unable to shrink column {} to {}, some values are longer",
                            model.name,
                            field.name,
                            declared.to_sql(dialect)
                        );
                        return Ok(None);
                    }
                }
                self.move_column(model, field, &declared, info).await.map(Some)
            }
            TypeChange::Incompatible => {
                warn!(
                    "{}: unable to convert column {} from {} to {}",
                    model.name,
                    field.name,
                    column.sql_type,
                    declared.to_sql(dialect)
                );
                Ok(None)
            }
        }
    }

    /// Replace a column by one of another type, keeping its data
    async fn move_column(
        &mut self,
        model: &Model,
        field: &Field,
        declared: &SqlType,
        info: &TableInfo,
    ) -> OrmResult<String> {
        let dialect = self.dialect();
        let moved = format!("{}{}", field.name, MOVED_SUFFIX);
        for index in info.indexes.iter().filter(|i| i.columns.contains(&field.name)) {
            if !index.unique {
                self.execute(&table::drop_index(&index.name)).await?;
            }
        }
        self.execute(&table::rename_column(&model.table, &field.name, &moved))
            .await?;
        self.execute(&table::add_column(&model.table, &field.name, declared, dialect, None))
            .await?;
        self.execute(&table::copy_column(&model.table, &moved, &field.name, declared, dialect))
            .await?;
        self.execute(&table::drop_column(&model.table, &moved)).await?;
        Ok(format!(
            "move column {} to type {}",
            field.name,
            declared.to_sql(dialect)
        ))
    }

    async fn sync_nullability(&mut self, model: &Model, info: &TableInfo) -> OrmResult<Vec<String>> {
        let mut changes = Vec::new();
        let dialect = self.dialect();
        for field in model.stored_fields() {
            if field.name == "id" {
                continue;
            }
            let Some(column) = info.column(&field.name) else {
                continue;
            };
            if !field.required {
                if !column.nullable && dialect.supports_alter_not_null() {
                    self.execute(&table::set_not_null(&model.table, &field.name, false))
                        .await?;
                    changes.push(format!("drop not null on {}", field.name));
                }
                continue;
            }
            if !column.nullable {
                continue;
            }

            let mut nulls = Sql::new("SELECT COUNT(*) FROM ");
            nulls
                .push_ident(&model.table)
                .push(" WHERE ")
                .push_ident(&field.name)
                .push(" IS NULL");
            if self.fetch_count(&nulls).await? > 0 {
                let default = self.default_value(model, field).await?;
                if !is_empty_value(&default) || matches!(field.kind, FieldKind::Boolean) {
                    let mut fill = Sql::new("UPDATE ");
                    fill.push_ident(&model.table)
                        .push(" SET ")
                        .push_ident(&field.name)
                        .push(" = ")
                        .push_param(field.to_db(&model.name, &default)?)
                        .push(" WHERE ")
                        .push_ident(&field.name)
                        .push(" IS NULL");
                    let filled = self.execute(&fill).await?;
                    changes.push(format!("fill {} empty values of {}", filled, field.name));
                }
            }

            if !dialect.supports_alter_not_null() {
                debug!("{}: not null on {} is enforced by the ORM only", model.name, field.name);
                continue;
            }
            if self.fetch_count(&nulls).await? > 0 {
                warn!(
                    "{}: unable to set column {} as NOT NULL, there are empty values",
                    model.name, field.name
                );
                continue;
            }
            self.execute(&table::set_not_null(&model.table, &field.name, true))
                .await?;
            changes.push(format!("set not null on {}", field.name));
        }

        if dialect.supports_alter_not_null() {
            for column in &info.columns {
                if column.name == "id" || column.nullable || model.field(&column.name).is_some() {
                    continue;
                }
                self.execute(&table::set_not_null(&model.table, &column.name, false))
                    .await?;
                changes.push(format!("drop not null on undeclared column {}", column.name));
            }
        }
        Ok(changes)
    }

    async fn sync_indexes(&mut self, model: &Model, info: &TableInfo) -> OrmResult<Vec<String>> {
        let mut changes = Vec::new();
        for field in model.stored_fields() {
            if field.name == "id" {
                continue;
            }
            let name = table::index_name(&model.table, &field.name);
            match (field.select, info.index(&name).is_some()) {
                (true, false) => {
                    self.execute(&table::create_index(&model.table, &name, &[&field.name], false))
                        .await?;
                    changes.push(format!("create index {}", name));
                }
                (false, true) => {
                    self.execute(&table::drop_index(&name)).await?;
                    changes.push(format!("drop index {}", name));
                }
                _ => {}
            }
        }
        Ok(changes)
    }

    async fn sync_foreign_keys(&mut self, model: &Model, info: &TableInfo) -> OrmResult<Vec<String>> {
        let mut changes = Vec::new();
        let dialect = self.dialect();
        for field in model.stored_fields() {
            let (Some(m2o), Some(policy)) = (field.many2one_info(), field.ondelete()) else {
                continue;
            };
            let target = self.model(&m2o.relation)?.table.clone();
            let existing = info.foreign_key(&field.name).cloned();
            if let Some(existing) = &existing {
                if existing.table == target && existing.on_delete == policy {
                    continue;
                }
            }
            if !dialect.supports_alter_foreign_key() {
                warn!(
                    "{}: foreign key of {} should be {} ON DELETE {}, not altered on {}",
                    model.name,
                    field.name,
                    target,
                    policy.as_sql(),
                    dialect
                );
                continue;
            }
            if let Some(name) = existing.as_ref().and_then(|fk| fk.name.clone()) {
                self.execute(&table::drop_constraint(&model.table, &name)).await?;
            }
            let Some(reference) = table::references(field, &target) else {
                continue;
            };
            self.execute(&table::add_foreign_key(&model.table, &field.name, reference))
                .await?;
            changes.push(format!(
                "foreign key {} on delete {}",
                field.name,
                policy.as_sql()
            ));
        }
        Ok(changes)
    }

    async fn sync_constraints(&mut self, model: &Model, info: &TableInfo) -> OrmResult<Vec<String>> {
        let mut changes = Vec::new();
        for constraint in &model.sql_constraints {
            let name = model.constraint_name(constraint);
            match &constraint.kind {
                SqlConstraintKind::Unique(columns) => {
                    if info.index(&name).is_some() {
                        continue;
                    }
                    let mut duplicates = Sql::new("SELECT COUNT(*) FROM (SELECT 1 FROM ");
                    duplicates.push_ident(&model.table).push(" GROUP BY ");
                    for (i, column) in columns.iter().enumerate() {
                        if i > 0 {
                            duplicates.push(", ");
                        }
                        duplicates.push_ident(column);
                    }
                    duplicates.push(" HAVING COUNT(*) > 1) AS \"duplicates\"");
                    if self.fetch_count(&duplicates).await? > 0 {
                        warn!(
                            "{}: unable to add constraint {}, existing rows are not unique",
                            model.name, name
                        );
                        continue;
                    }
                    let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
                    self.execute(&table::create_index(&model.table, &name, &refs, true))
                        .await?;
                    changes.push(format!("add unique constraint {}", name));
                }
                SqlConstraintKind::Check(expression) => {
                    if !self.dialect().supports_add_check() {
                        debug!("{}: check {} is not added on {}", model.name, name, self.dialect());
                        continue;
                    }
                    if info.has_check(&name) {
                        continue;
                    }
                    let savepoint = self.savepoint().await?;
                    match self.execute(&table::add_check(&model.table, &name, expression)).await {
                        Ok(_) => {
                            self.release_savepoint(&savepoint).await?;
                            changes.push(format!("add check constraint {}", name));
                        }
                        Err(e) => {
                            self.rollback_to_savepoint(&savepoint).await?;
                            warn!("{}: unable to add constraint {}: {}", model.name, name, e);
                        }
                    }
                }
            }
        }
        Ok(changes)
    }

    /// Reverse columns of one2many fields and join tables of many2many fields
    async fn sync_relations(&mut self, model: &Model) -> OrmResult<Vec<String>> {
        let mut changes = Vec::new();
        for field in model.fields() {
            match &field.kind {
                FieldKind::One2Many(o2m) => {
                    let target = self.model(&o2m.relation)?;
                    if !self.table_exists(&target.table).await? {
                        continue;
                    }
                    let info = self.table_info(&target.table).await?;
                    if info.column(&o2m.field).is_none() {
                        let reverse = target.require_field(&o2m.field)?.clone();
                        changes.push(self.add_column(&target, &reverse).await?);
                    }
                }
                FieldKind::Many2Many(m2m) => {
                    let target = self.model(&m2m.relation)?.table.clone();
                    if !self.table_exists(&m2m.table).await? {
                        let sql = table::create_relation_table(
                            &m2m.table,
                            (&m2m.origin, &model.table),
                            (&m2m.target, &target),
                        );
                        self.execute(&sql).await?;
                        changes.push(format!("create relation table {}", m2m.table));
                    }
                    let info = self.table_info(&m2m.table).await?;
                    for column in [&m2m.origin, &m2m.target] {
                        let name = table::index_name(&m2m.table, column);
                        if info.index(&name).is_none() {
                            self.execute(&table::create_index(&m2m.table, &name, &[column], false))
                                .await?;
                            changes.push(format!("create index {}", name));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(changes)
    }

    async fn sync_trees(&mut self, model: &Model) -> OrmResult<Vec<String>> {
        let mut changes = Vec::new();
        for field in model.fields() {
            let Some((left, _)) = field.tree_columns() else {
                continue;
            };
            let mut unset = Sql::new("SELECT COUNT(*) FROM ");
            unset
                .push_ident(&model.table)
                .push(" WHERE ")
                .push_ident(left)
                .push(" IS NULL OR ")
                .push_ident(left)
                .push(" = 0");
            if self.fetch_count(&unset).await? > 0 {
                self.rebuild_tree(model, field).await?;
                changes.push(format!("rebuild tree of {}", field.name));
            }
        }
        Ok(changes)
    }
}
