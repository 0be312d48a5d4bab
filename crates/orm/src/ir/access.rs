//! Model access control
//!
//! `ir.model.access` lines grant read/write/create/delete on a model, to a
//! group or to everybody. A model without any line is open; otherwise a
//! user needs one granting line that is group-less or names one of the
//! user's groups.

use std::fmt;

use oerp_cache::cache_key;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ModelError, OrmResult};
use crate::query::Sql;
use crate::transaction::Transaction;

pub const ACCESS_CACHE: &str = "ir.model.access.check";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
    Create,
    Delete,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::Create => "create",
            AccessMode::Delete => "delete",
        }
    }

    /// Permission column of access lines and rule groups
    pub fn column(&self) -> &'static str {
        match self {
            AccessMode::Read => "perm_read",
            AccessMode::Write => "perm_write",
            AccessMode::Create => "perm_create",
            AccessMode::Delete => "perm_delete",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Transaction {
    /// Fail with an access error unless the user may `mode` on `model`
    pub async fn check_access(&mut self, model: &str, mode: AccessMode) -> OrmResult<()> {
        if self.is_superuser() {
            return Ok(());
        }
        let key = cache_key(&(model, mode, self.user()));
        let granted = match self.cache_get::<bool>(ACCESS_CACHE, &key) {
            Some(granted) => granted,
            None => {
                let granted = self.compute_access(model, mode).await?;
                self.cache_put(ACCESS_CACHE, &key, &granted);
                granted
            }
        };
        if granted {
            return Ok(());
        }
        debug!("user {} denied {} on {}", self.user(), mode, model);
        let message = match mode {
            AccessMode::Read => "You can not read this document!",
            AccessMode::Write => "You can not write in this document!",
            AccessMode::Create => "You can not create this kind of document!",
            AccessMode::Delete => "You can not delete this document!",
        };
        Err(self
            .localize(ModelError::access(model, mode.as_str(), message))
            .await)
    }

    async fn compute_access(&mut self, model: &str, mode: AccessMode) -> OrmResult<bool> {
        let mut count = Sql::new("SELECT COUNT(*) FROM \"ir_model_access\" WHERE \"model\" = ");
        count.push_param(model);
        if self.fetch_count(&count).await? == 0 {
            return Ok(true);
        }

        let groups = self.user_groups().await?;
        let mut sql = Sql::new("SELECT COUNT(*) FROM \"ir_model_access\" WHERE \"model\" = ");
        sql.push_param(model)
            .push(" AND ")
            .push_ident(mode.column())
            .push(" = ")
            .push_param(true)
            .push(" AND (\"group\" IS NULL");
        if !groups.is_empty() {
            sql.push(" OR \"group\" IN ")
                .append(Sql::value_list(groups.iter().copied()));
        }
        sql.push(")");
        Ok(self.fetch_count(&sql).await? > 0)
    }
}
