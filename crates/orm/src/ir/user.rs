//! Users and groups

use serde_json::Value;
use tracing::info;

use crate::backends::{DatabaseValue, SqlDialect};
use crate::error::OrmResult;
use crate::query::Sql;
use crate::transaction::{Transaction, ROOT_USER};

/// Groups of a user
pub const GROUPS_CACHE: &str = "res.user.groups";

/// Id of the administrator created with the database
pub const ADMIN_USER: i64 = 1;

impl Transaction {
    /// Groups of the current user
    pub async fn user_groups(&mut self) -> OrmResult<Vec<i64>> {
        let key = self.user().to_string();
        if let Some(groups) = self.cache_get::<Vec<i64>>(GROUPS_CACHE, &key) {
            return Ok(groups);
        }
        let mut sql = Sql::new("SELECT \"group\" FROM \"res_user_group_rel\" WHERE \"user\" = ");
        sql.push_param(self.user()).push(" ORDER BY \"group\"");
        let groups = self.fetch_ids(&sql).await?;
        self.cache_put(GROUPS_CACHE, &key, &groups);
        Ok(groups)
    }

    /// Stored value of a field of the current user, for rule placeholders
    pub(crate) async fn user_value(&mut self, field: &str) -> OrmResult<Value> {
        if field == "id" {
            return Ok(Value::from(self.user()));
        }
        if field == "groups" {
            let groups = self.user_groups().await?;
            return Ok(Value::from(groups));
        }
        let model = self.model(crate::model::USER_MODEL)?;
        let column = model.require_field(field)?.clone();
        let mut sql = Sql::new("SELECT ");
        sql.push_ident(&column.name)
            .push(" FROM \"res_user\" WHERE \"id\" = ")
            .push_param(self.user());
        let row = self.fetch_optional(&sql).await?;
        Ok(row
            .and_then(|row| row.get_by_index(0).map(|value| column.from_db(value)))
            .unwrap_or(Value::Null))
    }
}

/// Create the superuser and the administrator when missing
pub(crate) async fn install_users(tx: &mut Transaction) -> OrmResult<()> {
    let users = [
        (ROOT_USER, "Root", "root", false),
        (ADMIN_USER, "Administrator", "admin", true),
    ];
    let mut created = false;
    for (id, name, login, active) in users {
        let mut exists = Sql::new("SELECT COUNT(*) FROM \"res_user\" WHERE \"id\" = ");
        exists.push_param(id);
        if tx.fetch_count(&exists).await? > 0 {
            continue;
        }
        let mut insert = Sql::new(
            "INSERT INTO \"res_user\" (\"id\", \"name\", \"login\", \"active\") VALUES ",
        );
        insert.append(Sql::value_list::<_, DatabaseValue>([
            id.into(),
            name.into(),
            login.into(),
            active.into(),
        ]));
        tx.execute(&insert).await?;
        info!("Created user '{}' ({})", login, id);
        created = true;
    }
    if created && tx.dialect() == SqlDialect::PostgreSQL {
        tx.execute(&Sql::new(
            "SELECT setval('res_user_id_seq', (SELECT MAX(\"id\") FROM \"res_user\"))",
        ))
        .await?;
    }
    Ok(())
}
