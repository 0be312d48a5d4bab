//! PostgreSQL catalog queries over `pg_catalog`

use super::Catalog;
use crate::query::Sql;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresCatalog;

impl Catalog for PostgresCatalog {
    fn table_exists(&self, table: &str) -> Sql {
        let mut sql = Sql::new(
            "SELECT COUNT(*) FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relkind = 'r' AND n.nspname = current_schema() AND c.relname = ",
        );
        sql.push_param(table);
        sql
    }

    fn columns(&self, table: &str) -> Sql {
        let mut sql = Sql::new(
            "SELECT a.attname::text AS name, \
             format_type(a.atttypid, a.atttypmod)::text AS type, \
             a.attnotnull AS notnull \
             FROM pg_attribute a \
             JOIN pg_class c ON c.oid = a.attrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE a.attnum > 0 AND NOT a.attisdropped \
             AND n.nspname = current_schema() AND c.relname = ",
        );
        sql.push_param(table).push(" ORDER BY a.attnum");
        sql
    }

    fn indexes(&self, table: &str) -> Sql {
        let mut sql = Sql::new(
            "SELECT i.relname::text AS name, a.attname::text AS column, \
             ix.indisunique AS is_unique \
             FROM pg_index ix \
             JOIN pg_class t ON t.oid = ix.indrelid \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
             WHERE NOT ix.indisprimary AND n.nspname = current_schema() AND t.relname = ",
        );
        sql.push_param(table).push(" ORDER BY i.relname, a.attnum");
        sql
    }

    fn foreign_keys(&self, table: &str) -> Sql {
        let mut sql = Sql::new(
            "SELECT con.conname::text AS name, a.attname::text AS column, \
             ref.relname::text AS target, \
             CASE con.confdeltype WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL' \
             WHEN 'r' THEN 'RESTRICT' ELSE 'NO ACTION' END AS on_delete \
             FROM pg_constraint con \
             JOIN pg_class t ON t.oid = con.conrelid \
             JOIN pg_class ref ON ref.oid = con.confrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = con.conkey[1] \
             WHERE con.contype = 'f' AND n.nspname = current_schema() AND t.relname = ",
        );
        sql.push_param(table);
        sql
    }

    fn checks(&self, table: &str) -> Option<Sql> {
        let mut sql = Sql::new(
            "SELECT con.conname::text AS name FROM pg_constraint con \
             JOIN pg_class t ON t.oid = con.conrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             WHERE con.contype = 'c' AND n.nspname = current_schema() AND t.relname = ",
        );
        sql.push_param(table);
        Some(sql)
    }
}
