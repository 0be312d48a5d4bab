//! Query Builder - statement builders for SELECT, INSERT, UPDATE and DELETE

use super::types::*;

/// SELECT statement builder
#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub(crate) distinct: bool,
    pub(crate) columns: Vec<Sql>,
    pub(crate) from: TableRef,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) conditions: Vec<Sql>,
    pub(crate) order_by: Vec<Sql>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: usize,
}

impl SelectQuery {
    pub fn new(from: TableRef) -> Self {
        Self {
            distinct: false,
            columns: Vec::new(),
            from,
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn column(mut self, column: Sql) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns<I: IntoIterator<Item = Sql>>(mut self, columns: I) -> Self {
        self.columns.extend(columns);
        self
    }

    pub fn join(mut self, join: JoinClause) -> Self {
        self.joins.push(join);
        self
    }

    pub fn joins<I: IntoIterator<Item = JoinClause>>(mut self, joins: I) -> Self {
        self.joins.extend(joins);
        self
    }

    /// Add a condition, AND-ed with the others
    pub fn filter(mut self, condition: Sql) -> Self {
        if !condition.is_empty() {
            self.conditions.push(condition);
        }
        self
    }

    pub fn order_by(mut self, expression: Sql) -> Self {
        self.order_by.push(expression);
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// INSERT statement builder
#[derive(Debug, Clone)]
pub struct InsertQuery {
    pub(crate) table: String,
    pub(crate) columns: Vec<String>,
    pub(crate) values: Vec<Sql>,
    pub(crate) returning: Option<String>,
}

impl InsertQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
            returning: None,
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: Sql) -> Self {
        self.columns.push(column.into());
        self.values.push(value);
        self
    }

    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning = Some(column.into());
        self
    }
}

/// UPDATE statement builder
#[derive(Debug, Clone)]
pub struct UpdateQuery {
    pub(crate) table: String,
    pub(crate) sets: Vec<(String, Sql)>,
    pub(crate) conditions: Vec<Sql>,
}

impl UpdateQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sets: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: Sql) -> Self {
        self.sets.push((column.into(), value));
        self
    }

    pub fn filter(mut self, condition: Sql) -> Self {
        if !condition.is_empty() {
            self.conditions.push(condition);
        }
        self
    }

    pub fn has_sets(&self) -> bool {
        !self.sets.is_empty()
    }
}

/// DELETE statement builder
#[derive(Debug, Clone)]
pub struct DeleteQuery {
    pub(crate) table: String,
    pub(crate) conditions: Vec<Sql>,
}

impl DeleteQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            conditions: Vec::new(),
        }
    }

    pub fn filter(mut self, condition: Sql) -> Self {
        if !condition.is_empty() {
            self.conditions.push(condition);
        }
        self
    }
}
