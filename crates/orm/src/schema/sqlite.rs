//! SQLite catalog queries over `sqlite_master` and the pragma functions

use super::Catalog;
use crate::query::Sql;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteCatalog;

impl Catalog for SqliteCatalog {
    fn table_exists(&self, table: &str) -> Sql {
        let mut sql = Sql::new("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ");
        sql.push_param(table);
        sql
    }

    fn columns(&self, table: &str) -> Sql {
        let mut sql = Sql::new("SELECT name, type, \"notnull\" AS \"notnull\" FROM pragma_table_info(");
        sql.push_param(table).push(") ORDER BY cid");
        sql
    }

    fn indexes(&self, table: &str) -> Sql {
        let mut sql = Sql::new(
            "SELECT il.name AS name, ii.name AS \"column\", il.\"unique\" AS is_unique \
             FROM pragma_index_list(",
        );
        sql.push_param(table).push(
            ") AS il JOIN pragma_index_info(il.name) AS ii \
             WHERE il.origin != 'pk' ORDER BY il.name, ii.seqno",
        );
        sql
    }

    fn foreign_keys(&self, table: &str) -> Sql {
        let mut sql = Sql::new(
            "SELECT NULL AS name, \"from\" AS \"column\", \"table\" AS target, on_delete \
             FROM pragma_foreign_key_list(",
        );
        sql.push_param(table).push(") ORDER BY id, seq");
        sql
    }

    fn checks(&self, _table: &str) -> Option<Sql> {
        None
    }
}
