//! Field descriptors
//!
//! A [`Field`] describes one column or relation of a model: its type, the
//! constraints checked on write and how values move between the application
//! (JSON) and storage ([`DatabaseValue`](crate::backends::DatabaseValue)).
//! Fields are built once with the builder methods below and frozen behind an
//! `Arc` when the model is registered.

pub mod commands;
pub mod conversion;
pub mod sql_type;

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::domain::Domain;
use crate::query::OrderDirection;

pub use commands::X2ManyCommand;
pub use sql_type::SqlType;

/// Delete policy of a many2one foreign key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    Restrict,
    SetNull,
}

impl OnDelete {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::Cascade => "CASCADE",
            OnDelete::Restrict => "RESTRICT",
            OnDelete::SetNull => "SET NULL",
        }
    }
}

impl fmt::Display for OnDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for OnDelete {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('_', " ").as_str() {
            "CASCADE" => Ok(OnDelete::Cascade),
            "RESTRICT" | "NO ACTION" => Ok(OnDelete::Restrict),
            "SET NULL" => Ok(OnDelete::SetNull),
            other => Err(format!("Unknown ondelete policy '{}'", other)),
        }
    }
}

/// Allowed values of a selection or the model list of a reference
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Literal `(key, label)` pairs
    Static(Vec<(String, String)>),
    /// Name of a model method returning `[[key, label], ...]`
    Method(String),
}

impl Selection {
    /// JSON wire form: a list of pairs, or the method name
    pub fn to_json(&self) -> Value {
        match self {
            Selection::Static(pairs) => Value::Array(
                pairs
                    .iter()
                    .map(|(k, l)| Value::Array(vec![Value::from(k.as_str()), Value::from(l.as_str())]))
                    .collect(),
            ),
            Selection::Method(name) => Value::String(name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Many2One {
    pub relation: String,
    /// Policy as declared; read the effective one with [`Field::ondelete`]
    pub declared_ondelete: OnDelete,
    /// MPTT interval columns when the field is a tree parent link
    pub left: Option<String>,
    pub right: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct One2Many {
    pub relation: String,
    /// Many2one column on the target pointing back to this model
    pub field: String,
    pub order: Option<Vec<(String, OrderDirection)>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Many2Many {
    pub relation: String,
    /// Join table
    pub table: String,
    /// Join table column pointing to this model
    pub origin: String,
    /// Join table column pointing to the target model
    pub target: String,
    pub order: Option<Vec<(String, OrderDirection)>>,
}

/// Computed field backed by model methods
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub result: Box<FieldKind>,
    pub getter: String,
    pub setter: Option<String>,
    pub searcher: Option<String>,
}

/// Semantic type of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Boolean,
    Integer,
    BigInteger,
    Char,
    Text,
    Float,
    Numeric,
    Date,
    DateTime,
    Time,
    Binary,
    Selection(Selection),
    /// `"model,id"` string pointing to any of the listed models
    Reference(Selection),
    /// JSON object stored as text
    Dict,
    Many2One(Many2One),
    One2Many(One2Many),
    Many2Many(Many2Many),
    Function(Function),
    /// Value kept in `ir.property`, with per-record overrides of a default
    Property(Box<FieldKind>),
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::BigInteger => "bigint",
            FieldKind::Char => "char",
            FieldKind::Text => "text",
            FieldKind::Float => "float",
            FieldKind::Numeric => "numeric",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::Time => "time",
            FieldKind::Binary => "binary",
            FieldKind::Selection(_) => "selection",
            FieldKind::Reference(_) => "reference",
            FieldKind::Dict => "dict",
            FieldKind::Many2One(_) => "many2one",
            FieldKind::One2Many(_) => "one2many",
            FieldKind::Many2Many(_) => "many2many",
            FieldKind::Function(_) => "function",
            FieldKind::Property(_) => "property",
        }
    }

    /// The kind values are shaped like: function and property fields
    /// answer with the kind they compute or store
    pub fn value_kind(&self) -> &FieldKind {
        match self {
            FieldKind::Function(function) => function.result.value_kind(),
            FieldKind::Property(inner) => inner.value_kind(),
            kind => kind,
        }
    }

    /// Target model of relational kinds
    pub fn relation(&self) -> Option<&str> {
        match self.value_kind() {
            FieldKind::Many2One(m2o) => Some(&m2o.relation),
            FieldKind::One2Many(o2m) => Some(&o2m.relation),
            FieldKind::Many2Many(m2m) => Some(&m2m.relation),
            _ => None,
        }
    }

    pub fn is_x2many(&self) -> bool {
        matches!(self, FieldKind::One2Many(_) | FieldKind::Many2Many(_))
    }

    /// Whether the value is read and written through SQL LIKE as text
    pub fn is_textual(&self) -> bool {
        matches!(
            self.value_kind(),
            FieldKind::Char | FieldKind::Text | FieldKind::Selection(_) | FieldKind::Reference(_)
        )
    }
}

/// Default value provider
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Static(Value),
    /// Model method called with no ids, returning the value
    Method(String),
}

/// One column or relation of a model
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Set when the field is added to a model
    pub name: String,
    pub kind: FieldKind,
    pub string: String,
    pub help: String,
    pub required: bool,
    pub readonly: bool,
    /// Indexed column
    pub select: bool,
    pub translate: bool,
    pub size: Option<usize>,
    pub digits: Option<(u32, u32)>,
    pub domain: Domain,
    pub states: Value,
    pub default: Option<DefaultValue>,
    /// Order in which deferred setters run
    pub priority: i32,
}

impl Field {
    pub fn new(string: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: String::new(),
            kind,
            string: string.into(),
            help: String::new(),
            required: false,
            readonly: false,
            select: false,
            translate: false,
            size: None,
            digits: None,
            domain: Domain::default(),
            states: Value::Object(Default::default()),
            default: None,
            priority: 0,
        }
    }

    pub fn boolean(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Boolean)
    }

    pub fn integer(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Integer)
    }

    pub fn bigint(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::BigInteger)
    }

    pub fn char(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Char)
    }

    pub fn text(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Text)
    }

    pub fn float(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Float)
    }

    pub fn numeric(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Numeric)
    }

    pub fn date(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Date)
    }

    pub fn datetime(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::DateTime)
    }

    pub fn time(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Time)
    }

    pub fn binary(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Binary)
    }

    pub fn dict(string: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Dict)
    }

    pub fn selection<K, L>(string: impl Into<String>, pairs: Vec<(K, L)>) -> Self
    where
        K: Into<String>,
        L: Into<String>,
    {
        let pairs = pairs.into_iter().map(|(k, l)| (k.into(), l.into())).collect();
        Self::new(string, FieldKind::Selection(Selection::Static(pairs)))
    }

    /// Selection whose pairs come from a model method at validation time
    pub fn selection_method(string: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(string, FieldKind::Selection(Selection::Method(method.into())))
    }

    pub fn reference<K, L>(string: impl Into<String>, models: Vec<(K, L)>) -> Self
    where
        K: Into<String>,
        L: Into<String>,
    {
        let pairs = models.into_iter().map(|(k, l)| (k.into(), l.into())).collect();
        Self::new(string, FieldKind::Reference(Selection::Static(pairs)))
    }

    pub fn many2one(string: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::new(
            string,
            FieldKind::Many2One(Many2One {
                relation: relation.into(),
                declared_ondelete: OnDelete::SetNull,
                left: None,
                right: None,
            }),
        )
    }

    pub fn one2many(
        string: impl Into<String>,
        relation: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::new(
            string,
            FieldKind::One2Many(One2Many {
                relation: relation.into(),
                field: field.into(),
                order: None,
            }),
        )
    }

    pub fn many2many(
        string: impl Into<String>,
        relation: impl Into<String>,
        table: impl Into<String>,
        origin: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::new(
            string,
            FieldKind::Many2Many(Many2Many {
                relation: relation.into(),
                table: table.into(),
                origin: origin.into(),
                target: target.into(),
                order: None,
            }),
        )
    }

    /// Computed field shaped like `result`, read through the `getter` method
    pub fn function(result: Field, getter: impl Into<String>) -> Self {
        let Field {
            kind,
            string,
            help,
            size,
            digits,
            ..
        } = result;
        let mut field = Self::new(
            string,
            FieldKind::Function(Function {
                result: Box::new(kind),
                getter: getter.into(),
                setter: None,
                searcher: None,
            }),
        );
        field.help = help;
        field.size = size;
        field.digits = digits;
        field.readonly = true;
        field
    }

    /// Field stored in `ir.property` instead of a column
    pub fn property(inner: Field) -> Self {
        let Field {
            kind,
            string,
            help,
            size,
            digits,
            ..
        } = inner;
        let mut field = Self::new(string, FieldKind::Property(Box::new(kind)));
        field.help = help;
        field.size = size;
        field.digits = digits;
        field
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn select(mut self) -> Self {
        self.select = true;
        self
    }

    pub fn translate(mut self) -> Self {
        self.translate = true;
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn digits(mut self, precision: u32, scale: u32) -> Self {
        self.digits = Some((precision, scale));
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    pub fn states(mut self, states: Value) -> Self {
        self.states = states;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Static(value));
        self
    }

    pub fn default_method(mut self, method: impl Into<String>) -> Self {
        self.default = Some(DefaultValue::Method(method.into()));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Declare the delete policy of a many2one
    pub fn on_delete(mut self, policy: OnDelete) -> Self {
        if let FieldKind::Many2One(m2o) = &mut self.kind {
            m2o.declared_ondelete = policy;
        }
        self
    }

    /// Name the MPTT columns of a self-referencing many2one
    pub fn tree(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        if let FieldKind::Many2One(m2o) = &mut self.kind {
            m2o.left = Some(left.into());
            m2o.right = Some(right.into());
        }
        self
    }

    /// Order of x2many values
    pub fn order(mut self, order: Vec<(&str, OrderDirection)>) -> Self {
        let order = order
            .into_iter()
            .map(|(f, d)| (f.to_string(), d))
            .collect::<Vec<_>>();
        match &mut self.kind {
            FieldKind::One2Many(o2m) => o2m.order = Some(order),
            FieldKind::Many2Many(m2m) => m2m.order = Some(order),
            _ => {}
        }
        self
    }

    pub fn setter(mut self, method: impl Into<String>) -> Self {
        if let FieldKind::Function(function) = &mut self.kind {
            function.setter = Some(method.into());
            self.readonly = false;
        }
        self
    }

    pub fn searcher(mut self, method: impl Into<String>) -> Self {
        if let FieldKind::Function(function) = &mut self.kind {
            function.searcher = Some(method.into());
        }
        self
    }

    /// Effective delete policy. A required link can not be nulled, so a
    /// declared `SET NULL` becomes `RESTRICT` whatever the builder order.
    pub fn ondelete(&self) -> Option<OnDelete> {
        match &self.kind {
            FieldKind::Many2One(m2o) => Some(
                if self.required && m2o.declared_ondelete == OnDelete::SetNull {
                    OnDelete::Restrict
                } else {
                    m2o.declared_ondelete
                },
            ),
            _ => None,
        }
    }

    /// Whether the field has a column in the model's table
    pub fn is_stored(&self) -> bool {
        !matches!(
            self.kind,
            FieldKind::One2Many(_)
                | FieldKind::Many2Many(_)
                | FieldKind::Function(_)
                | FieldKind::Property(_)
        )
    }

    /// Column type, `None` for fields without a column
    pub fn sql_type(&self) -> Option<SqlType> {
        if !self.is_stored() {
            return None;
        }
        SqlType::for_kind(&self.kind, self.size)
    }

    pub fn many2one_info(&self) -> Option<&Many2One> {
        match &self.kind {
            FieldKind::Many2One(m2o) => Some(m2o),
            _ => None,
        }
    }

    /// MPTT columns when the field is a tree link
    pub fn tree_columns(&self) -> Option<(&str, &str)> {
        match &self.kind {
            FieldKind::Many2One(Many2One {
                left: Some(left),
                right: Some(right),
                ..
            }) => Some((left, right)),
            _ => None,
        }
    }
}
