//! Column types and their spelling per dialect

use once_cell::sync::Lazy;
use regex::Regex;

use super::FieldKind;
use crate::backends::SqlDialect;

static SIZED_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z0-9 ]+)(?:\((\d+)(?:\s*,\s*\d+)?\))?([a-z ]*)$").unwrap());

/// Column type family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlBase {
    Boolean,
    Integer,
    BigInt,
    Varchar,
    Text,
    Float,
    Numeric,
    Date,
    Timestamp,
    Time,
    Blob,
}

/// Declared column type: family plus optional size (varchar only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlType {
    pub base: SqlBase,
    pub size: Option<usize>,
}

/// How an existing column relates to the declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeChange {
    Same,
    /// Every existing value fits the new type
    Widen,
    /// Only a shorter varchar; values may not fit
    Narrow,
    /// No lossless conversion exists
    Incompatible,
}

impl SqlType {
    pub fn new(base: SqlBase) -> Self {
        Self { base, size: None }
    }

    pub fn for_kind(kind: &FieldKind, size: Option<usize>) -> Option<Self> {
        let base = match kind {
            FieldKind::Boolean => SqlBase::Boolean,
            FieldKind::Integer | FieldKind::Many2One(_) => SqlBase::Integer,
            FieldKind::BigInteger => SqlBase::BigInt,
            FieldKind::Char => {
                return Some(SqlType {
                    base: SqlBase::Varchar,
                    size,
                })
            }
            FieldKind::Selection(_) | FieldKind::Reference(_) => SqlBase::Varchar,
            FieldKind::Text | FieldKind::Dict => SqlBase::Text,
            FieldKind::Float => SqlBase::Float,
            FieldKind::Numeric => SqlBase::Numeric,
            FieldKind::Date => SqlBase::Date,
            FieldKind::DateTime => SqlBase::Timestamp,
            FieldKind::Time => SqlBase::Time,
            FieldKind::Binary => SqlBase::Blob,
            FieldKind::One2Many(_)
            | FieldKind::Many2Many(_)
            | FieldKind::Function(_)
            | FieldKind::Property(_) => return None,
        };
        Some(SqlType::new(base))
    }

    /// Type as written in DDL
    pub fn to_sql(&self, dialect: SqlDialect) -> String {
        let pg = dialect == SqlDialect::PostgreSQL;
        match self.base {
            SqlBase::Boolean => "BOOLEAN".to_string(),
            SqlBase::Integer => "INTEGER".to_string(),
            SqlBase::BigInt => "BIGINT".to_string(),
            SqlBase::Varchar => match self.size {
                Some(size) => format!("VARCHAR({})", size),
                None => "VARCHAR".to_string(),
            },
            SqlBase::Text => "TEXT".to_string(),
            SqlBase::Float if pg => "DOUBLE PRECISION".to_string(),
            SqlBase::Float => "FLOAT".to_string(),
            SqlBase::Numeric => "NUMERIC".to_string(),
            SqlBase::Date => "DATE".to_string(),
            SqlBase::Timestamp if pg => "TIMESTAMP(0)".to_string(),
            SqlBase::Timestamp => "TIMESTAMP".to_string(),
            SqlBase::Time => "TIME".to_string(),
            SqlBase::Blob if pg => "BYTEA".to_string(),
            SqlBase::Blob => "BLOB".to_string(),
        }
    }

    /// Parse a catalog type name (`format_type` output or SQLite declared type)
    pub fn parse(declared: &str) -> Option<Self> {
        let lower = declared.to_lowercase();
        let captures = SIZED_TYPE.captures(lower.trim())?;
        let mut name = captures.get(1)?.as_str().trim().to_string();
        if let Some(suffix) = captures.get(3) {
            if !suffix.as_str().trim().is_empty() {
                name = format!("{} {}", name, suffix.as_str().trim());
            }
        }
        let size = captures.get(2).and_then(|m| m.as_str().parse().ok());

        let base = match name.as_str() {
            "boolean" | "bool" => SqlBase::Boolean,
            "integer" | "int" | "int4" | "smallint" | "serial" => SqlBase::Integer,
            "bigint" | "int8" | "bigserial" => SqlBase::BigInt,
            "character varying" | "varchar" | "character" | "char" => {
                return Some(SqlType {
                    base: SqlBase::Varchar,
                    size,
                })
            }
            "text" => SqlBase::Text,
            "double precision" | "float" | "float8" | "real" | "double" => SqlBase::Float,
            "numeric" | "decimal" => SqlBase::Numeric,
            "date" => SqlBase::Date,
            "bytea" | "blob" => SqlBase::Blob,
            n if n.starts_with("timestamp") || n == "datetime" => SqlBase::Timestamp,
            n if n.starts_with("time") => SqlBase::Time,
            _ => return None,
        };
        Some(SqlType::new(base))
    }

    /// Classify the change from the `current` column type to `self`
    pub fn change_from(&self, current: &SqlType) -> TypeChange {
        use SqlBase::*;
        if self == current {
            return TypeChange::Same;
        }
        match (current.base, self.base) {
            (Varchar, Varchar) => match (current.size, self.size) {
                (_, None) => TypeChange::Widen,
                (Some(old), Some(new)) if new >= old => TypeChange::Widen,
                _ => TypeChange::Narrow,
            },
            (Integer, BigInt)
            | (Integer, Float)
            | (Integer, Numeric)
            | (BigInt, Numeric)
            | (Float, Numeric)
            | (Numeric, Float)
            | (Varchar, Text) => TypeChange::Widen,
            (Text, Varchar) if self.size.is_none() => TypeChange::Widen,
            (Text, Varchar) => TypeChange::Narrow,
            _ => TypeChange::Incompatible,
        }
    }

    /// Expression selecting this column so every backend decodes it
    pub fn select_expression(&self, column: crate::query::Sql, dialect: SqlDialect) -> crate::query::Sql {
        if self.base == SqlBase::Numeric && dialect == SqlDialect::PostgreSQL {
            let mut sql = crate::query::Sql::new("CAST(");
            sql.append(column).push(" AS DOUBLE PRECISION)");
            sql
        } else {
            column
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog_names() {
        assert_eq!(
            SqlType::parse("character varying(64)"),
            Some(SqlType {
                base: SqlBase::Varchar,
                size: Some(64)
            })
        );
        assert_eq!(
            SqlType::parse("VARCHAR"),
            Some(SqlType::new(SqlBase::Varchar))
        );
        assert_eq!(
            SqlType::parse("timestamp(0) without time zone"),
            Some(SqlType::new(SqlBase::Timestamp))
        );
        assert_eq!(
            SqlType::parse("time without time zone"),
            Some(SqlType::new(SqlBase::Time))
        );
        assert_eq!(SqlType::parse("numeric(16,2)"), Some(SqlType::new(SqlBase::Numeric)));
        assert_eq!(SqlType::parse("DOUBLE PRECISION"), Some(SqlType::new(SqlBase::Float)));
        assert_eq!(SqlType::parse("geometry"), None);
    }

    #[test]
    fn test_round_trip_through_ddl() {
        for dialect in [SqlDialect::PostgreSQL, SqlDialect::SQLite] {
            for base in [
                SqlBase::Boolean,
                SqlBase::Integer,
                SqlBase::BigInt,
                SqlBase::Text,
                SqlBase::Float,
                SqlBase::Numeric,
                SqlBase::Date,
                SqlBase::Timestamp,
                SqlBase::Time,
                SqlBase::Blob,
            ] {
                let ty = SqlType::new(base);
                assert_eq!(SqlType::parse(&ty.to_sql(dialect)), Some(ty), "{:?}", base);
            }
        }
    }

    #[test]
    fn test_change_classification() {
        let v = |size| SqlType {
            base: SqlBase::Varchar,
            size,
        };
        assert_eq!(v(Some(10)).change_from(&v(Some(10))), TypeChange::Same);
        assert_eq!(v(Some(20)).change_from(&v(Some(10))), TypeChange::Widen);
        assert_eq!(v(None).change_from(&v(Some(10))), TypeChange::Widen);
        assert_eq!(v(Some(5)).change_from(&v(Some(10))), TypeChange::Narrow);
        assert_eq!(
            SqlType::new(SqlBase::BigInt).change_from(&SqlType::new(SqlBase::Integer)),
            TypeChange::Widen
        );
        assert_eq!(
            SqlType::new(SqlBase::Integer).change_from(&v(None)),
            TypeChange::Incompatible
        );
    }
}
