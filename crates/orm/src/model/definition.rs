//! Model definitions
//!
//! A [`ModelDefinition`] is the declarative, mutable description of a model
//! built by application code. The registry merges definitions that share a
//! name, resolves `inherit` bases, runs setup hooks and freezes the result
//! into an immutable [`Model`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::method::ModelMethod;
use crate::domain::OrderItem;
use crate::error::{ModelError, OrmResult};
use crate::fields::{Field, FieldKind, OnDelete};
use crate::query::OrderDirection;
use crate::security::{table_name, validate_check_expression, validate_identifier};

/// Bookkeeping columns maintained when access logging is on
pub const LOG_ACCESS_FIELDS: [&str; 4] = ["create_uid", "create_date", "write_uid", "write_date"];

/// Model the bookkeeping user columns point to
pub const USER_MODEL: &str = "res.user";

/// Database-enforced constraint
#[derive(Debug, Clone, PartialEq)]
pub enum SqlConstraintKind {
    Unique(Vec<String>),
    Check(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlConstraint {
    /// Identifier, the physical name is `<table>_<name>`
    pub name: String,
    pub kind: SqlConstraintKind,
    /// Message (and translation key) reported on violation
    pub message: String,
}

/// Constraint checked by a model method answering a boolean
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub method: String,
    pub message: String,
}

/// Hook run once on the definition before it is frozen
pub type SetupHook = Arc<dyn Fn(&mut ModelDefinition) + Send + Sync>;

#[derive(Clone)]
pub struct ModelDefinition {
    pub name: String,
    pub description: String,
    /// Base model whose definition this one starts from
    pub inherit: Option<String>,
    pub table: Option<String>,
    pub fields: Vec<(String, Field)>,
    /// `(parent model, many2one field)` delegations
    pub inherits: Vec<(String, String)>,
    pub rec_name: String,
    pub order: Vec<OrderItem>,
    pub order_name: Option<String>,
    pub log_access: Option<bool>,
    pub sql_constraints: Vec<SqlConstraint>,
    pub constraints: Vec<Constraint>,
    pub methods: HashMap<String, Arc<dyn ModelMethod>>,
    pub setup: Vec<SetupHook>,
    /// Process caches reset by every write on this model
    pub caches: Vec<String>,
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("name", &self.name)
            .field("inherit", &self.inherit)
            .field("fields", &self.fields.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            inherit: None,
            table: None,
            fields: Vec::new(),
            inherits: Vec::new(),
            rec_name: "name".to_string(),
            order: vec![OrderItem::new("id", OrderDirection::Asc)],
            order_name: None,
            log_access: None,
            sql_constraints: Vec::new(),
            constraints: Vec::new(),
            methods: HashMap::new(),
            setup: Vec::new(),
            caches: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Start from the fields, methods and constraints of `base`
    pub fn inherit(mut self, base: impl Into<String>) -> Self {
        self.inherit = Some(base.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Add or replace a field
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.set_field(name, field);
        self
    }

    pub fn set_field(&mut self, name: impl Into<String>, field: Field) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = field,
            None => self.fields.push((name, field)),
        }
    }

    /// Delegate the fields of `parent` through the many2one `field`.
    ///
    /// The link field is added as a required cascading many2one when the
    /// definition does not declare it.
    pub fn inherits(mut self, parent: impl Into<String>, field: impl Into<String>) -> Self {
        let parent = parent.into();
        let field = field.into();
        if !self.fields.iter().any(|(n, _)| *n == field) {
            let link = Field::many2one(parent.clone(), parent.clone())
                .required()
                .on_delete(OnDelete::Cascade);
            self.fields.push((field.clone(), link));
        }
        self.inherits.push((parent, field));
        self
    }

    pub fn rec_name(mut self, field: impl Into<String>) -> Self {
        self.rec_name = field.into();
        self
    }

    pub fn order(mut self, order: Vec<OrderItem>) -> Self {
        self.order = order;
        self
    }

    /// Field used when another model orders by a many2one to this one
    pub fn order_name(mut self, field: impl Into<String>) -> Self {
        self.order_name = Some(field.into());
        self
    }

    pub fn log_access(mut self, enabled: bool) -> Self {
        self.log_access = Some(enabled);
        self
    }

    pub fn unique(mut self, name: &str, columns: &[&str], message: impl Into<String>) -> Self {
        self.sql_constraints.push(SqlConstraint {
            name: name.to_string(),
            kind: SqlConstraintKind::Unique(columns.iter().map(|c| c.to_string()).collect()),
            message: message.into(),
        });
        self
    }

    pub fn check(mut self, name: &str, expression: &str, message: impl Into<String>) -> Self {
        self.sql_constraints.push(SqlConstraint {
            name: name.to_string(),
            kind: SqlConstraintKind::Check(expression.to_string()),
            message: message.into(),
        });
        self
    }

    /// Method answering `true` when the records are valid
    pub fn constraint(mut self, method: impl Into<String>, message: impl Into<String>) -> Self {
        self.constraints.push(Constraint {
            method: method.into(),
            message: message.into(),
        });
        self
    }

    pub fn method(mut self, name: impl Into<String>, method: Arc<dyn ModelMethod>) -> Self {
        self.methods.insert(name.into(), method);
        self
    }

    pub fn setup<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ModelDefinition) + Send + Sync + 'static,
    {
        self.setup.push(Arc::new(hook));
        self
    }

    /// Reset the process cache `cache` on every write of this model
    pub fn invalidates(mut self, cache: impl Into<String>) -> Self {
        self.caches.push(cache.into());
        self
    }

    /// Fold an extension of the same model into this definition
    pub fn extend(&mut self, other: ModelDefinition) {
        for (name, field) in other.fields {
            self.set_field(name, field);
        }
        for (parent, field) in other.inherits {
            if !self.inherits.iter().any(|(p, _)| *p == parent) {
                self.inherits.push((parent, field));
            }
        }
        if other.description != other.name {
            self.description = other.description;
        }
        if other.table.is_some() {
            self.table = other.table;
        }
        if other.rec_name != "name" {
            self.rec_name = other.rec_name;
        }
        if other.order_name.is_some() {
            self.order_name = other.order_name;
        }
        if other.log_access.is_some() {
            self.log_access = other.log_access;
        }
        self.sql_constraints.extend(other.sql_constraints);
        self.constraints.extend(other.constraints);
        self.methods.extend(other.methods);
        self.setup.extend(other.setup);
        self.caches.extend(other.caches);
    }

    /// Copy of `base` renamed to this definition's name, extended by it
    pub fn derive_from(base: &ModelDefinition, own: ModelDefinition) -> ModelDefinition {
        let mut merged = base.clone();
        merged.name = own.name.clone();
        merged.description = own.name.clone();
        merged.table = None;
        merged.inherit = None;
        merged.extend(own);
        merged
    }

    /// Freeze into a model; `default_log_access` applies when unset
    pub fn freeze(mut self, default_log_access: bool) -> OrmResult<Model> {
        for hook in self.setup.clone() {
            hook(&mut self);
        }

        let table = match &self.table {
            Some(table) => table.clone(),
            None => table_name(&self.name),
        };
        validate_identifier(&table)?;

        let log_access = self.log_access.unwrap_or(default_log_access);
        let mut fields: Vec<Arc<Field>> = Vec::with_capacity(self.fields.len() + 5);
        let mut id = Field::integer("ID").readonly();
        id.name = "id".to_string();
        fields.push(Arc::new(id));

        let mut tree_columns = Vec::new();
        for (name, mut field) in self.fields {
            if name == "id" {
                return Err(ModelError::Programming(format!(
                    "Model '{}' can not redefine field 'id'",
                    self.name
                )));
            }
            if field.is_stored() {
                validate_identifier(&name)?;
            }
            if let Some((left, right)) = field.tree_columns() {
                tree_columns.push(left.to_string());
                tree_columns.push(right.to_string());
            }
            field.name = name;
            fields.push(Arc::new(field));
        }

        for column in tree_columns {
            if !fields.iter().any(|f| f.name == column) {
                let mut field = Field::integer(column.clone()).readonly().select();
                field.name = column;
                fields.push(Arc::new(field));
            }
        }

        if log_access {
            for name in LOG_ACCESS_FIELDS {
                if fields.iter().any(|f| f.name == name) {
                    continue;
                }
                let mut field = match name {
                    "create_uid" => Field::many2one("Created by", USER_MODEL),
                    "write_uid" => Field::many2one("Last modified by", USER_MODEL),
                    "create_date" => Field::datetime("Created on"),
                    _ => Field::datetime("Last modified on"),
                }
                .readonly();
                field.name = name.to_string();
                fields.push(Arc::new(field));
            }
        }

        for constraint in &self.sql_constraints {
            validate_identifier(&format!("{}_{}", table, constraint.name))?;
            if let SqlConstraintKind::Check(expression) = &constraint.kind {
                validate_check_expression(expression)?;
            }
        }

        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        Ok(Model {
            name: self.name,
            description: self.description,
            table,
            fields,
            index,
            inherits: self.inherits,
            inherited: HashMap::new(),
            rec_name: self.rec_name,
            order: self.order,
            order_name: self.order_name,
            log_access,
            sql_constraints: self.sql_constraints,
            constraints: self.constraints,
            methods: self.methods,
            caches: self.caches,
        })
    }
}

/// Field reached through an `inherits` delegation
#[derive(Debug, Clone)]
pub struct InheritedField {
    /// Directly delegated parent model
    pub parent: String,
    /// Many2one column of this model pointing to the parent
    pub link: String,
    pub field: Arc<Field>,
}

/// Frozen model descriptor
#[derive(Clone)]
pub struct Model {
    pub name: String,
    pub description: String,
    pub table: String,
    fields: Vec<Arc<Field>>,
    index: HashMap<String, usize>,
    pub inherits: Vec<(String, String)>,
    pub(crate) inherited: HashMap<String, InheritedField>,
    pub rec_name: String,
    pub order: Vec<OrderItem>,
    pub order_name: Option<String>,
    pub log_access: bool,
    pub sql_constraints: Vec<SqlConstraint>,
    pub constraints: Vec<Constraint>,
    pub methods: HashMap<String, Arc<dyn ModelMethod>>,
    pub caches: Vec<String>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("fields", &self.fields.iter().map(|f| &f.name).collect::<Vec<_>>())
            .finish()
    }
}

impl Model {
    /// Own field, including `id` and the bookkeeping fields
    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.index.get(name).map(|i| &self.fields[*i])
    }

    pub fn fields(&self) -> impl Iterator<Item = &Arc<Field>> {
        self.fields.iter()
    }

    /// Field delegated to an `inherits` parent
    pub fn inherited_field(&self, name: &str) -> Option<&InheritedField> {
        self.inherited.get(name)
    }

    pub fn inherited_fields(&self) -> impl Iterator<Item = (&String, &InheritedField)> {
        self.inherited.iter()
    }

    /// Own or delegated field
    pub fn any_field(&self, name: &str) -> Option<&Arc<Field>> {
        self.field(name)
            .or_else(|| self.inherited.get(name).map(|i| &i.field))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.any_field(name).is_some()
    }

    /// Every field name: own fields in declaration order, then delegated ones
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.iter().map(|f| f.name.clone()).collect();
        let mut inherited: Vec<&String> = self.inherited.keys().collect();
        inherited.sort();
        names.extend(inherited.into_iter().cloned());
        names
    }

    pub fn require_field(&self, name: &str) -> OrmResult<&Arc<Field>> {
        self.any_field(name)
            .ok_or_else(|| ModelError::unknown_field(&self.name, name))
    }

    pub fn method(&self, name: &str) -> OrmResult<&Arc<dyn ModelMethod>> {
        self.methods.get(name).ok_or_else(|| {
            ModelError::Programming(format!(
                "Model '{}' has no method '{}'",
                self.name, name
            ))
        })
    }

    /// Own fields with a column
    pub fn stored_fields(&self) -> impl Iterator<Item = &Arc<Field>> {
        self.fields.iter().filter(|f| f.is_stored())
    }

    /// Self-referencing many2one used by `child_of`, preferring tree links
    pub fn tree_parent(&self) -> Option<&Arc<Field>> {
        let self_links: Vec<&Arc<Field>> = self
            .fields
            .iter()
            .filter(|f| matches!(&f.kind, FieldKind::Many2One(m2o) if m2o.relation == self.name))
            .collect();
        self_links
            .iter()
            .find(|f| f.tree_columns().is_some())
            .or_else(|| self_links.iter().find(|f| f.name == "parent"))
            .or_else(|| self_links.first())
            .copied()
    }

    /// Whether searches hide inactive records by default
    pub fn has_active(&self) -> bool {
        matches!(self.any_field("active").map(|f| &f.kind), Some(FieldKind::Boolean))
    }

    /// Physical constraint name
    pub fn constraint_name(&self, constraint: &SqlConstraint) -> String {
        format!("{}_{}", self.table, constraint.name)
    }

    /// `ir.translation` name of a field
    pub fn translation_name(&self, field: &str) -> String {
        format!("{},{}", self.name, field)
    }

    /// Value of a static default, if any
    pub fn static_default(&self, field: &str) -> Option<Value> {
        match self.any_field(field).and_then(|f| f.default.as_ref()) {
            Some(crate::fields::DefaultValue::Static(value)) => Some(value.clone()),
            _ => None,
        }
    }
}
