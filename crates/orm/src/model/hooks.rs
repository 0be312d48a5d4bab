//! Workflow seam
//!
//! The CRUD orchestrator notifies a registered [`WorkflowHook`] after
//! creations and writes and before deletions. The hook may bring its own
//! models (instance and workitem tables), installed with the registry.
//! Signals, redirections and triggers reach it through the `trg_*` methods
//! of [`Transaction`].

use async_trait::async_trait;

use super::definition::ModelDefinition;
use crate::error::OrmResult;
use crate::transaction::Transaction;

#[async_trait]
pub trait WorkflowHook: Send + Sync {
    /// Models persisted by the hook
    fn models(&self) -> Vec<ModelDefinition> {
        Vec::new()
    }

    async fn trg_create(&self, _tx: &mut Transaction, _model: &str, _id: i64) -> OrmResult<()> {
        Ok(())
    }

    async fn trg_write(&self, _tx: &mut Transaction, _model: &str, _id: i64) -> OrmResult<()> {
        Ok(())
    }

    async fn trg_delete(&self, _tx: &mut Transaction, _model: &str, _id: i64) -> OrmResult<()> {
        Ok(())
    }

    /// Send a signal to the running instances of a record
    async fn trg_validate(
        &self,
        _tx: &mut Transaction,
        _model: &str,
        _id: i64,
        _signal: &str,
    ) -> OrmResult<bool> {
        Ok(false)
    }

    async fn trg_redirect(
        &self,
        _tx: &mut Transaction,
        _model: &str,
        _old_id: i64,
        _new_id: i64,
    ) -> OrmResult<()> {
        Ok(())
    }

    async fn trg_trigger(&self, _tx: &mut Transaction, _model: &str, _id: i64) -> OrmResult<()> {
        Ok(())
    }

    /// Whether any of the records still has a non-terminal instance
    async fn has_running(
        &self,
        _tx: &mut Transaction,
        _model: &str,
        _ids: &[i64],
    ) -> OrmResult<bool> {
        Ok(false)
    }
}

impl Transaction {
    /// Send `signal` to the workflows of a record; false without a
    /// workflow engine or a running instance
    pub async fn trg_validate(&mut self, model: &str, id: i64, signal: &str) -> OrmResult<bool> {
        self.model(model)?;
        match self.registry().workflow().cloned() {
            Some(hook) => hook.trg_validate(self, model, id, signal).await,
            None => Ok(false),
        }
    }

    /// Hand the subflows waiting on `old_id` over to `new_id`
    pub async fn trg_redirect(&mut self, model: &str, old_id: i64, new_id: i64) -> OrmResult<()> {
        self.model(model)?;
        match self.registry().workflow().cloned() {
            Some(hook) => hook.trg_redirect(self, model, old_id, new_id).await,
            None => Ok(()),
        }
    }

    /// Wake the workflows waiting on a record
    pub async fn trg_trigger(&mut self, model: &str, id: i64) -> OrmResult<()> {
        self.model(model)?;
        match self.registry().workflow().cloned() {
            Some(hook) => hook.trg_trigger(self, model, id).await,
            None => Ok(()),
        }
    }
}
