//! DDL statements
//!
//! Every statement the synchronizer runs is built here, identifiers quoted.

use crate::backends::SqlDialect;
use crate::fields::{Field, SqlType};
use crate::query::Sql;

/// Name of the index kept on a selected column
pub fn index_name(table: &str, column: &str) -> String {
    format!("{}_{}_index", table, column)
}

/// Name of the foreign key of a many2one column
pub fn foreign_key_name(table: &str, column: &str) -> String {
    format!("{}_{}_fkey", table, column)
}

pub fn create_table(table: &str, dialect: SqlDialect) -> Sql {
    let mut sql = Sql::new("CREATE TABLE ");
    sql.push_ident(table).push(" (").push(dialect.id_column()).push(")");
    sql
}

/// `REFERENCES "target" ("id") ON DELETE ...` clause of a many2one
pub fn references(field: &Field, target_table: &str) -> Option<Sql> {
    let policy = field.ondelete()?;
    let mut sql = Sql::new("REFERENCES ");
    sql.push_ident(target_table)
        .push(" (\"id\") ON DELETE ")
        .push(policy.as_sql());
    Some(sql)
}

/// `ALTER TABLE .. ADD COLUMN`, SQLite gets the foreign key inline
pub fn add_column(
    table: &str,
    column: &str,
    ty: &SqlType,
    dialect: SqlDialect,
    reference: Option<Sql>,
) -> Sql {
    let mut sql = Sql::new("ALTER TABLE ");
    sql.push_ident(table)
        .push(" ADD COLUMN ")
        .push_ident(column)
        .push(" ")
        .push(&ty.to_sql(dialect));
    if let (SqlDialect::SQLite, Some(reference)) = (dialect, reference) {
        sql.push(" ").append(reference);
    }
    sql
}

pub fn rename_column(table: &str, from: &str, to: &str) -> Sql {
    let mut sql = Sql::new("ALTER TABLE ");
    sql.push_ident(table)
        .push(" RENAME COLUMN ")
        .push_ident(from)
        .push(" TO ")
        .push_ident(to);
    sql
}

pub fn drop_column(table: &str, column: &str) -> Sql {
    let mut sql = Sql::new("ALTER TABLE ");
    sql.push_ident(table).push(" DROP COLUMN ").push_ident(column);
    sql
}

/// Copy `from` into `to`, converted to the type of `to`
pub fn copy_column(table: &str, from: &str, to: &str, ty: &SqlType, dialect: SqlDialect) -> Sql {
    let mut sql = Sql::new("UPDATE ");
    sql.push_ident(table)
        .push(" SET ")
        .push_ident(to)
        .push(" = CAST(")
        .push_ident(from)
        .push(" AS ")
        .push(&ty.to_sql(dialect))
        .push(")");
    sql
}

pub fn alter_type(table: &str, column: &str, ty: &SqlType, dialect: SqlDialect) -> Sql {
    let mut sql = Sql::new("ALTER TABLE ");
    sql.push_ident(table)
        .push(" ALTER COLUMN ")
        .push_ident(column)
        .push(" TYPE ")
        .push(&ty.to_sql(dialect));
    sql
}

pub fn set_not_null(table: &str, column: &str, required: bool) -> Sql {
    let mut sql = Sql::new("ALTER TABLE ");
    sql.push_ident(table)
        .push(" ALTER COLUMN ")
        .push_ident(column)
        .push(if required { " SET NOT NULL" } else { " DROP NOT NULL" });
    sql
}

pub fn create_index(table: &str, name: &str, columns: &[&str], unique: bool) -> Sql {
    let mut sql = Sql::new(if unique {
        "CREATE UNIQUE INDEX IF NOT EXISTS "
    } else {
        "CREATE INDEX IF NOT EXISTS "
    });
    sql.push_ident(name).push(" ON ").push_ident(table).push(" (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            sql.push(", ");
        }
        sql.push_ident(column);
    }
    sql.push(")");
    sql
}

pub fn drop_index(name: &str) -> Sql {
    let mut sql = Sql::new("DROP INDEX IF EXISTS ");
    sql.push_ident(name);
    sql
}

pub fn add_foreign_key(table: &str, column: &str, reference: Sql) -> Sql {
    let mut sql = Sql::new("ALTER TABLE ");
    sql.push_ident(table)
        .push(" ADD CONSTRAINT ")
        .push_ident(&foreign_key_name(table, column))
        .push(" FOREIGN KEY (")
        .push_ident(column)
        .push(") ")
        .append(reference);
    sql
}

pub fn add_check(table: &str, name: &str, expression: &str) -> Sql {
    let mut sql = Sql::new("ALTER TABLE ");
    sql.push_ident(table)
        .push(" ADD CONSTRAINT ")
        .push_ident(name)
        .push(" CHECK (")
        .push(expression)
        .push(")");
    sql
}

pub fn drop_constraint(table: &str, name: &str) -> Sql {
    let mut sql = Sql::new("ALTER TABLE ");
    sql.push_ident(table).push(" DROP CONSTRAINT ").push_ident(name);
    sql
}

/// Join table of a many2many: two cascading foreign keys
pub fn create_relation_table(
    table: &str,
    origin: (&str, &str),
    target: (&str, &str),
) -> Sql {
    let mut sql = Sql::new("CREATE TABLE ");
    sql.push_ident(table).push(" (");
    for (i, (column, referenced)) in [origin, target].into_iter().enumerate() {
        if i > 0 {
            sql.push(", ");
        }
        sql.push_ident(column)
            .push(" INTEGER NOT NULL REFERENCES ")
            .push_ident(referenced)
            .push(" (\"id\") ON DELETE CASCADE");
    }
    sql.push(")");
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::sql_type::SqlBase;

    #[test]
    fn test_sqlite_inlines_references() {
        let mut field = Field::many2one("Parent", "test.tree").required();
        field.name = "parent".into();
        let ty = SqlType::new(SqlBase::Integer);
        let sql = add_column("test_tree", "parent", &ty, SqlDialect::SQLite, references(&field, "test_tree"));
        assert_eq!(
            sql.text(),
            "ALTER TABLE \"test_tree\" ADD COLUMN \"parent\" INTEGER REFERENCES \"test_tree\" (\"id\") ON DELETE RESTRICT"
        );
        let pg = add_column("test_tree", "parent", &ty, SqlDialect::PostgreSQL, references(&field, "test_tree"));
        assert_eq!(pg.text(), "ALTER TABLE \"test_tree\" ADD COLUMN \"parent\" INTEGER");
    }

    #[test]
    fn test_relation_table() {
        let sql = create_relation_table("res_user_group_rel", ("user", "res_user"), ("group", "res_group"));
        assert_eq!(
            sql.text(),
            "CREATE TABLE \"res_user_group_rel\" (\"user\" INTEGER NOT NULL REFERENCES \"res_user\" (\"id\") ON DELETE CASCADE, \"group\" INTEGER NOT NULL REFERENCES \"res_group\" (\"id\") ON DELETE CASCADE)"
        );
    }
}
