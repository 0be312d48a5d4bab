//! Query Builder Module - parameterized SQL fragments and statement builders

pub mod builder;
pub mod sql_generation;
pub mod types;

pub use builder::{DeleteQuery, InsertQuery, SelectQuery, UpdateQuery};
pub use types::{JoinClause, JoinType, OrderDirection, Sql, TableRef};
