//! Models
//!
//! - `definition`: declarative [`ModelDefinition`] builder and the frozen [`Model`]
//! - `method`: bound methods ([`ModelMethod`]) models delegate behaviour to
//! - `registry`: the per-database [`Registry`] and its lifecycle
//! - `hooks`: the [`WorkflowHook`] seam notified by the CRUD orchestrator

pub mod definition;
pub mod hooks;
pub mod method;
pub mod registry;

pub use definition::{
    Constraint, InheritedField, Model, ModelDefinition, SqlConstraint, SqlConstraintKind,
    LOG_ACCESS_FIELDS, USER_MODEL,
};
pub use hooks::WorkflowHook;
pub use method::{constant, method, FnMethod, ModelMethod};
pub use registry::{Registry, RegistryBuilder};

/// Values of one record keyed by field name
pub type Values = serde_json::Map<String, serde_json::Value>;
