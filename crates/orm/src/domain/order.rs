//! Search ordering
//!
//! An order is a list of `(field path, direction)` pairs. Plain columns
//! order directly; a many2one orders by the target's `order_name` or record
//! name, resolved recursively through joins, delegated fields join their
//! parent table.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::compiler::QueryTables;
use crate::error::{ModelError, OrmResult};
use crate::fields::FieldKind;
use crate::model::Model;
use crate::query::{OrderDirection, Sql};
use crate::transaction::Transaction;

/// Many2one hops followed before falling back to the id
const MAX_ORDER_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub field: String,
    pub direction: OrderDirection,
}

impl OrderItem {
    pub fn new(field: impl Into<String>, direction: OrderDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, OrderDirection::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, OrderDirection::Desc)
    }

    /// Parse `"name desc, id"`
    pub fn parse_list(order: &str) -> OrmResult<Vec<OrderItem>> {
        order
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut words = part.split_whitespace();
                let field = words.next().unwrap_or_default();
                let direction = match words.next() {
                    Some(direction) => direction
                        .parse()
                        .map_err(|e: String| ModelError::Programming(e))?,
                    None => OrderDirection::Asc,
                };
                if words.next().is_some() {
                    return Err(ModelError::Programming(format!(
                        "Invalid order clause '{}'",
                        part
                    )));
                }
                Ok(OrderItem::new(field, direction))
            })
            .collect()
    }
}

impl fmt::Display for OrderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.direction)
    }
}

impl Transaction {
    /// ORDER BY expressions for `items`, adding the joins they need
    pub fn compile_order(
        &self,
        model: &Arc<Model>,
        alias: &str,
        items: &[OrderItem],
        tables: &mut QueryTables,
    ) -> OrmResult<Vec<Sql>> {
        let mut clauses = Vec::new();
        for item in items {
            clauses.extend(self.order_path(
                model.clone(),
                alias,
                &item.field,
                item.direction,
                tables,
                0,
            )?);
        }
        Ok(clauses)
    }

    fn order_path(
        &self,
        model: Arc<Model>,
        alias: &str,
        path: &str,
        direction: OrderDirection,
        tables: &mut QueryTables,
        depth: usize,
    ) -> OrmResult<Vec<Sql>> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let (owner, alias, field) = self.resolve_field(model, alias, head, tables)?;

        match (&field.kind, rest) {
            (FieldKind::Many2One(m2o), rest) => {
                let target = self.model(&m2o.relation)?;
                let join = tables.join_many2one(&alias, &field.name, &target.table);
                let next = match rest {
                    Some(rest) => rest.to_string(),
                    None => target
                        .order_name
                        .clone()
                        .unwrap_or_else(|| target.rec_name.clone()),
                };
                if depth >= MAX_ORDER_DEPTH || !target.has_field(next.split('.').next().unwrap_or_default()) {
                    return Ok(vec![ordered(Sql::column(&join, "id"), direction)]);
                }
                self.order_path(target, &join, &next, direction, tables, depth + 1)
            }
            (_, Some(_)) => Err(ModelError::Programming(format!(
                "Field '{}' of '{}' is not a many2one and can not be followed in an order",
                field.name, owner.name
            ))),
            (_, None) if field.is_stored() => {
                Ok(vec![ordered(Sql::column(&alias, &field.name), direction)])
            }
            _ => Err(ModelError::Programming(format!(
                "Field '{}' of '{}' can not be used for ordering",
                field.name, owner.name
            ))),
        }
    }
}

fn ordered(mut column: Sql, direction: OrderDirection) -> Sql {
    column.push(" ").push(&direction.to_string());
    column
}
