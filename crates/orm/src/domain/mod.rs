//! Domain expressions
//!
//! A domain is the structured filter language of `search`: a JSON list whose
//! optional first element is `"AND"` or `"OR"` (AND when absent), followed by
//! leaves `[field_path, operator, value]` or nested domains.
//!
//! ```json
//! ["OR", ["name", "ilike", "%foo%"], [["parent.name", "=", "bar"], ["active", "=", true]]]
//! ```
//!
//! Parsing and serializing round-trip exactly.

pub mod compiler;
pub mod eval;
pub mod order;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ModelError, OrmResult};

pub use compiler::QueryTables;
pub use order::OrderItem;

/// Comparison operator of a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Like,
    ILike,
    NotLike,
    NotILike,
    In,
    NotIn,
    Lt,
    Gt,
    Le,
    Ge,
    ChildOf,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Like => "like",
            Operator::ILike => "ilike",
            Operator::NotLike => "not like",
            Operator::NotILike => "not ilike",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::ChildOf => "child_of",
        }
    }

    /// Operators whose result also holds for rows without a value
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            Operator::Ne | Operator::NotLike | Operator::NotILike | Operator::NotIn
        )
    }

    /// Positive counterpart of a negative operator
    pub fn positive(&self) -> Operator {
        match self {
            Operator::Ne => Operator::Eq,
            Operator::NotLike => Operator::Like,
            Operator::NotILike => Operator::ILike,
            Operator::NotIn => Operator::In,
            other => *other,
        }
    }

    pub fn is_like(&self) -> bool {
        matches!(
            self,
            Operator::Like | Operator::ILike | Operator::NotLike | Operator::NotILike
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_lowercase().as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "like" => Operator::Like,
            "ilike" => Operator::ILike,
            "not like" => Operator::NotLike,
            "not ilike" => Operator::NotILike,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            "<" => Operator::Lt,
            ">" => Operator::Gt,
            "<=" => Operator::Le,
            ">=" => Operator::Ge,
            "child_of" => Operator::ChildOf,
            other => {
                return Err(ModelError::Programming(format!(
                    "Unknown domain operator '{}'",
                    other
                )))
            }
        };
        Ok(op)
    }
}

/// `[field_path, operator, value]`
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// Field name, possibly dotted through relations (`parent.name`)
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Leaf {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// First path element and the rest, if any
    pub fn split_path(&self) -> (&str, Option<&str>) {
        match self.field.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (self.field.as_str(), None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainNode {
    Leaf(Leaf),
    Group(Domain),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Domain {
    /// `None` when the list carried no explicit operator (implicit AND)
    pub operator: Option<BoolOp>,
    pub nodes: Vec<DomainNode>,
}

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Domain with a single leaf
    pub fn leaf(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Domain {
            operator: None,
            nodes: vec![DomainNode::Leaf(Leaf::new(field, operator, value))],
        }
    }

    pub fn and(domains: Vec<Domain>) -> Self {
        Self::combine(BoolOp::And, domains)
    }

    pub fn or(domains: Vec<Domain>) -> Self {
        Self::combine(BoolOp::Or, domains)
    }

    fn combine(op: BoolOp, domains: Vec<Domain>) -> Self {
        let mut nodes: Vec<DomainNode> = domains
            .into_iter()
            .filter(|d| !d.is_empty())
            .map(DomainNode::Group)
            .collect();
        match nodes.len() {
            0 => Domain::default(),
            1 => match nodes.pop() {
                Some(DomainNode::Group(domain)) => domain,
                _ => Domain::default(),
            },
            _ => Domain {
                operator: Some(op),
                nodes,
            },
        }
    }

    /// Append a leaf (builder style)
    pub fn push(mut self, leaf: Leaf) -> Self {
        self.nodes.push(DomainNode::Leaf(leaf));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn bool_op(&self) -> BoolOp {
        self.operator.unwrap_or(BoolOp::And)
    }

    /// Parse the JSON form; malformed input is a programming error
    pub fn from_json(value: &Value) -> OrmResult<Self> {
        let items = value.as_array().ok_or_else(|| {
            ModelError::Programming(format!("Domain must be a list, got {}", value))
        })?;

        let mut domain = Domain::default();
        let mut rest = items.as_slice();
        if let Some(Value::String(op)) = rest.first() {
            let op = match op.as_str() {
                "AND" => Some(BoolOp::And),
                "OR" => Some(BoolOp::Or),
                _ => None,
            };
            if let Some(op) = op {
                domain.operator = Some(op);
                rest = &rest[1..];
            }
        }

        if domain.operator.is_none() && Self::is_leaf(items) {
            return Ok(Domain {
                operator: None,
                nodes: vec![DomainNode::Leaf(Self::parse_leaf(items)?)],
            });
        }

        for item in rest {
            let parts = item.as_array().ok_or_else(|| {
                ModelError::Programming(format!("Invalid domain element {}", item))
            })?;
            if Self::is_leaf(parts) {
                domain.nodes.push(DomainNode::Leaf(Self::parse_leaf(parts)?));
            } else {
                domain.nodes.push(DomainNode::Group(Self::from_json(item)?));
            }
        }
        Ok(domain)
    }

    fn is_leaf(parts: &[Value]) -> bool {
        matches!(
            parts,
            [Value::String(field), Value::String(_), _] if field != "AND" && field != "OR"
        )
    }

    fn parse_leaf(parts: &[Value]) -> OrmResult<Leaf> {
        match parts {
            [Value::String(field), Value::String(op), value] => {
                Ok(Leaf::new(field.clone(), op.parse()?, value.clone()))
            }
            _ => Err(ModelError::Programming(format!(
                "Invalid domain leaf {}",
                Value::Array(parts.to_vec())
            ))),
        }
    }

    /// JSON form, inverse of [`Domain::from_json`]
    pub fn to_json(&self) -> Value {
        let mut items = Vec::with_capacity(self.nodes.len() + 1);
        match self.operator {
            Some(BoolOp::And) => items.push(Value::from("AND")),
            Some(BoolOp::Or) => items.push(Value::from("OR")),
            None => {}
        }
        for node in &self.nodes {
            items.push(match node {
                DomainNode::Leaf(leaf) => Value::Array(vec![
                    Value::String(leaf.field.clone()),
                    Value::from(leaf.operator.as_str()),
                    leaf.value.clone(),
                ]),
                DomainNode::Group(domain) => domain.to_json(),
            });
        }
        Value::Array(items)
    }

    /// Rewrite every leaf value
    pub fn map_values<F>(&self, f: &mut F) -> Domain
    where
        F: FnMut(&Value) -> Value,
    {
        Domain {
            operator: self.operator,
            nodes: self
                .nodes
                .iter()
                .map(|node| match node {
                    DomainNode::Leaf(leaf) => DomainNode::Leaf(Leaf {
                        field: leaf.field.clone(),
                        operator: leaf.operator,
                        value: f(&leaf.value),
                    }),
                    DomainNode::Group(domain) => DomainNode::Group(domain.map_values(f)),
                })
                .collect(),
        }
    }

    /// Every leaf, depth first
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut leaves = Vec::new();
        for node in &self.nodes {
            match node {
                DomainNode::Leaf(leaf) => leaves.push(leaf),
                DomainNode::Group(domain) => leaves.extend(domain.leaves()),
            }
        }
        leaves
    }
}

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Domain::from_json(&value).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<Value> for Domain {
    type Error = ModelError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Domain::from_json(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_is_exact() {
        let samples = vec![
            json!([]),
            json!([["name", "=", "x"]]),
            json!(["AND", ["name", "=", "x"], ["id", ">", 3]]),
            json!(["OR", ["name", "ilike", "%a%"], [["parent.name", "not in", ["b", null]], ["active", "=", true]]]),
            json!([["name", "child_of", [5]], ["OR", ["a", "<=", 1.5], ["b", "!=", false]]]),
        ];
        for sample in samples {
            let domain = Domain::from_json(&sample).unwrap();
            assert_eq!(domain.to_json(), sample);
        }
    }

    #[test]
    fn test_bare_leaf_is_accepted() {
        let domain = Domain::from_json(&json!(["name", "=", "x"])).unwrap();
        assert_eq!(domain.leaves().len(), 1);
        assert_eq!(domain.leaves()[0].operator, Operator::Eq);
    }

    #[test]
    fn test_malformed_domains_are_programming_errors() {
        assert!(matches!(
            Domain::from_json(&json!("name = x")),
            Err(ModelError::Programming(_))
        ));
        assert!(matches!(
            Domain::from_json(&json!([["name", "~=", "x"]])),
            Err(ModelError::Programming(_))
        ));
        assert!(matches!(
            Domain::from_json(&json!([["name", "="]])),
            Err(ModelError::Programming(_))
        ));
    }

    #[test]
    fn test_combine_skips_empty_parts() {
        let a = Domain::leaf("a", Operator::Eq, json!(1));
        assert_eq!(Domain::and(vec![a.clone(), Domain::new()]), a);
        let both = Domain::and(vec![a.clone(), Domain::leaf("b", Operator::Eq, json!(2))]);
        assert_eq!(both.to_json(), json!(["AND", [["a", "=", 1]], [["b", "=", 2]]]));
    }

    #[test]
    fn test_serde() {
        let domain: Domain = serde_json::from_str(r#"[["id", "in", [1, 2]]]"#).unwrap();
        assert_eq!(serde_json::to_string(&domain).unwrap(), r#"[["id","in",[1,2]]]"#);
    }
}
