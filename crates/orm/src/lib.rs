//! # oerp-orm: object-relational engine for business applications
//!
//! Declarative models with typed fields, a domain language compiled to
//! parameterized SQL, schema synchronization on load, access control and
//! record rules, translations, properties and fixtures.
//!
//! A [`Registry`] holds the frozen models of one database; every operation
//! runs on a [`Transaction`] opened from it for one request.

pub mod backends;
pub mod browse;
pub mod config;
pub mod context;
pub mod crud;
pub mod domain;
pub mod error;
pub mod fields;
pub mod ir;
pub mod model;
pub mod query;
pub mod schema;
pub mod security;
pub mod transaction;

// Re-export core traits and types
pub use backends::{DatabaseValue, Row, SqlDialect};
pub use browse::{Record, RecordSet, Related};
pub use config::{OrmConfig, PoolConfig};
pub use context::Context;
pub use crud::ImportResult;
pub use domain::{Domain, Leaf, Operator, OrderItem};
pub use error::{ModelError, ModelResult, OrmError, OrmResult};
pub use fields::{DefaultValue, Field, FieldKind, OnDelete, Selection, X2ManyCommand};
pub use ir::{AccessMode, XmlId};
pub use model::{
    constant, method, Model, ModelDefinition, ModelMethod, Registry, RegistryBuilder, Values,
    WorkflowHook,
};
pub use query::{OrderDirection, Sql};
pub use transaction::{IsolationLevel, Transaction, TransactionConfig, ROOT_USER};
