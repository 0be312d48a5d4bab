//! Query Builder SQL generation

use super::builder::*;
use super::types::*;
use crate::backends::SqlDialect;

fn push_where(sql: &mut Sql, conditions: &[Sql]) {
    if !conditions.is_empty() {
        sql.push(" WHERE ");
        sql.append(Sql::join(conditions.iter().cloned(), " AND "));
    }
}

impl SelectQuery {
    /// Generate the statement. SQLite needs a LIMIT before any OFFSET.
    pub fn to_sql(&self, dialect: SqlDialect) -> Sql {
        let mut sql = Sql::new(if self.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        });

        if self.columns.is_empty() {
            sql.push("*");
        } else {
            sql.append(Sql::join(self.columns.iter().cloned(), ", "));
        }

        sql.push(" FROM ").append(self.from.to_sql());

        for join in &self.joins {
            sql.push(" ")
                .push(&join.join_type.to_string())
                .push(" ")
                .append(join.table.to_sql())
                .push(" ON ")
                .append(join.on.clone());
        }

        push_where(&mut sql, &self.conditions);

        if !self.order_by.is_empty() {
            sql.push(" ORDER BY ")
                .append(Sql::join(self.order_by.iter().cloned(), ", "));
        }

        match (self.limit, dialect) {
            (Some(limit), _) => {
                sql.push(&format!(" LIMIT {}", limit));
            }
            (None, SqlDialect::SQLite) if self.offset > 0 => {
                sql.push(" LIMIT -1");
            }
            _ => {}
        }

        if self.offset > 0 {
            sql.push(&format!(" OFFSET {}", self.offset));
        }

        sql
    }
}

impl InsertQuery {
    pub fn to_sql(&self) -> Sql {
        let mut sql = Sql::new("INSERT INTO ");
        sql.push_ident(&self.table);

        if self.columns.is_empty() {
            sql.push(" DEFAULT VALUES");
        } else {
            sql.push(" (")
                .append(Sql::join(self.columns.iter().map(|c| Sql::ident(c)), ", "))
                .push(") VALUES (")
                .append(Sql::join(self.values.iter().cloned(), ", "))
                .push(")");
        }

        if let Some(returning) = &self.returning {
            sql.push(" RETURNING ").push_ident(returning);
        }
        sql
    }
}

impl UpdateQuery {
    pub fn to_sql(&self) -> Sql {
        let mut sql = Sql::new("UPDATE ");
        sql.push_ident(&self.table).push(" SET ");
        let sets = self.sets.iter().map(|(column, value)| {
            let mut set = Sql::ident(column);
            set.push(" = ").append(value.clone());
            set
        });
        sql.append(Sql::join(sets, ", "));
        push_where(&mut sql, &self.conditions);
        sql
    }
}

impl DeleteQuery {
    pub fn to_sql(&self) -> Sql {
        let mut sql = Sql::new("DELETE FROM ");
        sql.push_ident(&self.table);
        push_where(&mut sql, &self.conditions);
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_with_join_and_paging() {
        let query = SelectQuery::new(TableRef::plain("test_m2o"))
            .column(Sql::column("test_m2o", "id"))
            .join(JoinClause {
                join_type: JoinType::Left,
                table: TableRef::new("test_target", "t1"),
                on: {
                    let mut on = Sql::column("t1", "id");
                    on.push(" = ").append(Sql::column("test_m2o", "target"));
                    on
                },
            })
            .filter({
                let mut c = Sql::column("t1", "name");
                c.push(" = ").push_param("x");
                c
            })
            .order_by(Sql::new("\"t1\".\"name\" ASC"))
            .offset(10);

        let pg = query.to_sql(SqlDialect::PostgreSQL);
        assert_eq!(
            pg.render(SqlDialect::PostgreSQL),
            "SELECT \"test_m2o\".\"id\" FROM \"test_m2o\" LEFT JOIN \"test_target\" AS \"t1\" \
             ON \"t1\".\"id\" = \"test_m2o\".\"target\" WHERE \"t1\".\"name\" = $1 \
             ORDER BY \"t1\".\"name\" ASC OFFSET 10"
        );
        let lite = query.to_sql(SqlDialect::SQLite);
        assert!(lite.text().ends_with("LIMIT -1 OFFSET 10"));
    }

    #[test]
    fn test_insert_update_delete() {
        let insert = InsertQuery::new("test_char")
            .set("char", Sql::param("hello"))
            .set("parent", Sql::param(crate::backends::DatabaseValue::Null))
            .returning("id")
            .to_sql();
        assert_eq!(
            insert.text(),
            "INSERT INTO \"test_char\" (\"char\", \"parent\") VALUES (?, NULL) RETURNING \"id\""
        );

        let update = UpdateQuery::new("test_char")
            .set("char", Sql::param("x"))
            .filter(Sql::new("\"id\" IN (1, 2)"))
            .to_sql();
        assert_eq!(
            update.text(),
            "UPDATE \"test_char\" SET \"char\" = ? WHERE \"id\" IN (1, 2)"
        );

        let delete = DeleteQuery::new("test_char").to_sql();
        assert_eq!(delete.text(), "DELETE FROM \"test_char\"");
    }
}
