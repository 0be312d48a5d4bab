//! Query Builder Types - SQL fragments, table references and ordering

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backends::{DatabaseValue, SqlDialect};
use crate::security::escape_identifier;

/// A piece of SQL with `?` markers and the values bound to them.
///
/// Fragments compose without ever formatting a value into the text; the
/// markers are turned into the dialect's placeholders by [`Sql::render`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sql {
    text: String,
    params: Vec<DatabaseValue>,
}

impl Sql {
    /// Raw SQL text without parameters
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// A single bound value; NULL is emitted literally
    pub fn param(value: impl Into<DatabaseValue>) -> Self {
        let mut sql = Sql::default();
        sql.push_param(value);
        sql
    }

    /// A quoted identifier
    pub fn ident(name: &str) -> Self {
        Sql::new(escape_identifier(name))
    }

    /// `"alias"."column"`
    pub fn column(alias: &str, column: &str) -> Self {
        Sql::new(format!(
            "{}.{}",
            escape_identifier(alias),
            escape_identifier(column)
        ))
    }

    pub fn push(&mut self, text: &str) -> &mut Self {
        self.text.push_str(text);
        self
    }

    pub fn push_ident(&mut self, name: &str) -> &mut Self {
        self.text.push_str(&escape_identifier(name));
        self
    }

    pub fn push_param(&mut self, value: impl Into<DatabaseValue>) -> &mut Self {
        match value.into() {
            DatabaseValue::Null => self.text.push_str("NULL"),
            value => {
                self.text.push('?');
                self.params.push(value);
            }
        }
        self
    }

    pub fn append(&mut self, other: Sql) -> &mut Self {
        self.text.push_str(&other.text);
        self.params.extend(other.params);
        self
    }

    /// Join fragments with a separator
    pub fn join<I>(parts: I, separator: &str) -> Sql
    where
        I: IntoIterator<Item = Sql>,
    {
        let mut sql = Sql::default();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                sql.push(separator);
            }
            sql.append(part);
        }
        sql
    }

    /// `(a, b, c)` list of bound values
    pub fn value_list<I, V>(values: I) -> Sql
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let mut sql = Sql::new("(");
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                sql.push(", ");
            }
            sql.push_param(value);
        }
        sql.push(")");
        sql
    }

    /// Wrap in parentheses
    pub fn wrap(self) -> Sql {
        let mut sql = Sql::new("(");
        sql.append(self);
        sql.push(")");
        sql
    }

    /// Always-true condition
    pub fn truth() -> Sql {
        Sql::new("(1 = 1)")
    }

    /// Always-false condition
    pub fn falsehood() -> Sql {
        Sql::new("(1 = 0)")
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[DatabaseValue] {
        &self.params
    }

    pub fn into_params(self) -> Vec<DatabaseValue> {
        self.params
    }

    /// Final SQL text with the dialect's placeholders.
    ///
    /// Markers inside quoted identifiers or string literals are left alone.
    pub fn render(&self, dialect: SqlDialect) -> String {
        let mut out = String::with_capacity(self.text.len() + self.params.len() * 2);
        let mut index = 0;
        let mut in_identifier = false;
        let mut in_literal = false;
        for c in self.text.chars() {
            match c {
                '"' if !in_literal => in_identifier = !in_identifier,
                '\'' if !in_identifier => in_literal = !in_literal,
                '?' if !in_identifier && !in_literal => {
                    out.push_str(&dialect.parameter_placeholder(index));
                    index += 1;
                    continue;
                }
                _ => {}
            }
            out.push(c);
        }
        out
    }
}

impl fmt::Display for Sql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// A table with the alias it is known by inside one query
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub table: String,
    pub alias: String,
}

impl TableRef {
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
        }
    }

    /// Reference a table under its own name
    pub fn plain(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            alias: table.clone(),
            table,
        }
    }

    pub fn to_sql(&self) -> Sql {
        if self.table == self.alias {
            Sql::ident(&self.table)
        } else {
            let mut sql = Sql::ident(&self.table);
            sql.push(" AS ").push_ident(&self.alias);
            sql
        }
    }
}

/// Join types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
        }
    }
}

/// Join clause
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Sql,
}

/// Order by direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn reverse(self) -> Self {
        match self {
            OrderDirection::Asc => OrderDirection::Desc,
            OrderDirection::Desc => OrderDirection::Asc,
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

impl FromStr for OrderDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ASC" => Ok(OrderDirection::Asc),
            "DESC" => Ok(OrderDirection::Desc),
            other => Err(format!("Invalid order direction '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_placeholders() {
        let mut sql = Sql::new("SELECT ");
        sql.push_ident("id")
            .push(" FROM ")
            .push_ident("t?")
            .push(" WHERE ")
            .append(Sql::column("t?", "a"))
            .push(" = ")
            .push_param(1i64)
            .push(" AND b IN ")
            .append(Sql::value_list(vec![2i64, 3]));

        assert_eq!(
            sql.render(SqlDialect::PostgreSQL),
            "SELECT \"id\" FROM \"t?\" WHERE \"t?\".\"a\" = $1 AND b IN ($2, $3)"
        );
        assert_eq!(sql.params().len(), 3);
        assert!(sql.render(SqlDialect::SQLite).ends_with("= ? AND b IN (?, ?)"));
    }

    #[test]
    fn test_null_is_literal() {
        let mut sql = Sql::new("UPDATE t SET a = ");
        sql.push_param(DatabaseValue::Null);
        assert_eq!(sql.text(), "UPDATE t SET a = NULL");
        assert!(sql.params().is_empty());
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("desc".parse::<OrderDirection>().unwrap(), OrderDirection::Desc);
        assert!("sideways".parse::<OrderDirection>().is_err());
    }
}
