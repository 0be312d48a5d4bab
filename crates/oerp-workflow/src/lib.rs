//! # oerp-workflow: per-record state machines for oerp models
//!
//! A [`Workflow`] attaches activities and transitions to a model. The
//! [`WorkflowEngine`] is registered on the ORM registry as its
//! [`WorkflowHook`](oerp_orm::WorkflowHook): record creation starts the
//! `on_create` workflows, writes re-evaluate the running instances and
//! deletions are refused while an instance is still running.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use oerp_orm::{Context, Field, ModelDefinition, OrmConfig, Registry, ROOT_USER};
//! use oerp_workflow::{Activity, Condition, Transition, Workflow, WorkflowEngine};
//! use serde_json::json;
//!
//! # async fn demo() -> oerp_orm::OrmResult<()> {
//! let order = Workflow::new("sale.order.basic", "sale.order")
//!     .activity(Activity::new("draft").start())
//!     .activity(Activity::new("done").stop().write(json!({"state": "done"}).as_object().cloned().unwrap()))
//!     .transition(
//!         Transition::new("draft", "done")
//!             .signal("confirm")
//!             .condition(Condition::field("partner")),
//!     );
//! let engine = Arc::new(WorkflowEngine::new(vec![order])?);
//!
//! let registry = Registry::builder(OrmConfig::new("sqlite::memory:"))
//!     .models(vec![ModelDefinition::new("sale.order")
//!         .field("partner", Field::char("Partner"))
//!         .field("state", Field::char("State"))])
//!     .with_workflow(engine)
//!     .load()
//!     .await?;
//!
//! let mut tx = registry.begin(ROOT_USER, Context::new()).await?;
//! let id = tx.create("sale.order", json!({"partner": "Acme"}).as_object().cloned().unwrap()).await?;
//! tx.trg_validate("sale.order", id, "confirm").await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod condition;
pub mod definition;
pub mod engine;
pub mod error;
pub mod storage;

pub use condition::{Comparison, Condition, Operand, Resolver};
pub use definition::{
    Action, Activity, ActivityKind, JoinMode, SplitMode, Transition, TransitionTrigger, Workflow,
};
pub use engine::WorkflowEngine;
pub use error::{WorkflowError, WorkflowResult};
pub use storage::{InstanceState, WorkitemState};
