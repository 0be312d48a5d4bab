//! Transition conditions
//!
//! Conditions are a small typed expression tree over the fields and the
//! methods of the record the workflow runs on. They are evaluated by
//! [`Condition::evaluate`] through a [`Resolver`] that supplies field values
//! and method results; nothing is ever parsed or executed as code.
//!
//! ```
//! use oerp_workflow::{Comparison, Condition};
//! use serde_json::json;
//!
//! let condition = Condition::all(vec![
//!     Condition::compare("amount", Comparison::Gt, json!(100)),
//!     Condition::not(Condition::field("blocked")),
//! ]);
//! assert_eq!(condition.fields(), vec!["amount", "blocked"]);
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use oerp_orm::domain::eval::matches;
use oerp_orm::fields::conversion::is_empty_value;
use oerp_orm::{OrmResult, Operator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source of the values a condition refers to
#[async_trait]
pub trait Resolver: Send {
    /// Current value of a field of the record
    async fn field(&mut self, name: &str) -> OrmResult<Value>;

    /// Result of a method of the model called on the record
    async fn call(&mut self, method: &str) -> OrmResult<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(Value),
    Field(String),
    Method(String),
}

impl Operand {
    fn resolve<'a>(&'a self, resolver: &'a mut dyn Resolver) -> BoxFuture<'a, OrmResult<Value>> {
        Box::pin(async move {
            match self {
                Operand::Value(value) => Ok(value.clone()),
                Operand::Field(name) => resolver.field(name).await,
                Operand::Method(name) => resolver.call(name).await,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl Comparison {
    fn operator(self) -> Operator {
        match self {
            Comparison::Eq => Operator::Eq,
            Comparison::Ne => Operator::Ne,
            Comparison::Lt => Operator::Lt,
            Comparison::Le => Operator::Le,
            Comparison::Gt => Operator::Gt,
            Comparison::Ge => Operator::Ge,
            Comparison::In => Operator::In,
            Comparison::NotIn => Operator::NotIn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    Never,
    /// The operand is set (not null, not false)
    Truthy(Operand),
    Compare(Operand, Comparison, Operand),
    Not(Box<Condition>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    /// Field `name` is set
    pub fn field(name: impl Into<String>) -> Self {
        Condition::Truthy(Operand::Field(name.into()))
    }

    /// Method `name` returns a true value
    pub fn method(name: impl Into<String>) -> Self {
        Condition::Truthy(Operand::Method(name.into()))
    }

    /// Compare field `name` with a constant
    pub fn compare(name: impl Into<String>, comparison: Comparison, value: Value) -> Self {
        Condition::Compare(Operand::Field(name.into()), comparison, Operand::Value(value))
    }

    pub fn eq(name: impl Into<String>, value: Value) -> Self {
        Self::compare(name, Comparison::Eq, value)
    }

    pub fn not(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::All(conditions)
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Any(conditions)
    }

    /// Fields read by the condition, in order of first use
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, fields: &mut Vec<&'a str>) {
        let mut push = |operand: &'a Operand| {
            if let Operand::Field(name) = operand {
                if !fields.contains(&name.as_str()) {
                    fields.push(name.as_str());
                }
            }
        };
        match self {
            Condition::Always | Condition::Never => {}
            Condition::Truthy(operand) => push(operand),
            Condition::Compare(left, _, right) => {
                push(left);
                push(right);
            }
            Condition::Not(inner) => inner.collect_fields(fields),
            Condition::All(items) | Condition::Any(items) => {
                for item in items {
                    item.collect_fields(fields);
                }
            }
        }
    }

    /// Evaluate with short-circuiting `All`/`Any`
    pub fn evaluate<'a>(&'a self, resolver: &'a mut dyn Resolver) -> BoxFuture<'a, OrmResult<bool>> {
        Box::pin(async move {
            match self {
                Condition::Always => Ok(true),
                Condition::Never => Ok(false),
                Condition::Truthy(operand) => {
                    let value = operand.resolve(resolver).await?;
                    Ok(is_true(&value))
                }
                Condition::Compare(left, comparison, right) => {
                    let left = left.resolve(resolver).await?;
                    let right = right.resolve(resolver).await?;
                    Ok(matches(comparison.operator(), &left, &right))
                }
                Condition::Not(inner) => Ok(!inner.evaluate(resolver).await?),
                Condition::All(items) => {
                    for item in items {
                        if !item.evaluate(resolver).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Condition::Any(items) => {
                    for item in items {
                        if item.evaluate(resolver).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            }
        })
    }
}

/// Truth value of a field or method result
pub fn is_true(value: &Value) -> bool {
    if is_empty_value(value) {
        return false;
    }
    match value {
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    struct Fixed {
        fields: Map<String, Value>,
        calls: Vec<String>,
    }

    #[async_trait]
    impl Resolver for Fixed {
        async fn field(&mut self, name: &str) -> OrmResult<Value> {
            Ok(self.fields.get(name).cloned().unwrap_or(Value::Null))
        }

        async fn call(&mut self, method: &str) -> OrmResult<Value> {
            self.calls.push(method.to_string());
            Ok(json!(method == "is_paid"))
        }
    }

    fn record(values: Value) -> Fixed {
        Fixed {
            fields: values.as_object().cloned().unwrap_or_default(),
            calls: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_comparisons() {
        let mut env = record(json!({"state": "draft", "amount": 150, "partner": null}));

        assert!(Condition::eq("state", json!("draft")).evaluate(&mut env).await.unwrap());
        assert!(Condition::compare("amount", Comparison::Gt, json!(100))
            .evaluate(&mut env)
            .await
            .unwrap());
        assert!(!Condition::compare("amount", Comparison::Le, json!(100))
            .evaluate(&mut env)
            .await
            .unwrap());
        assert!(Condition::compare("state", Comparison::In, json!(["draft", "open"]))
            .evaluate(&mut env)
            .await
            .unwrap());
        assert!(!Condition::field("partner").evaluate(&mut env).await.unwrap());
        assert!(Condition::not(Condition::field("partner"))
            .evaluate(&mut env)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_combinators_short_circuit() {
        let mut env = record(json!({"ok": true}));

        let any = Condition::any(vec![Condition::field("ok"), Condition::method("is_paid")]);
        assert!(any.evaluate(&mut env).await.unwrap());
        assert!(env.calls.is_empty());

        let all = Condition::all(vec![Condition::field("ok"), Condition::method("is_late")]);
        assert!(!all.evaluate(&mut env).await.unwrap());
        assert_eq!(env.calls, vec!["is_late"]);

        assert!(Condition::All(vec![]).evaluate(&mut env).await.unwrap());
        assert!(!Condition::Any(vec![]).evaluate(&mut env).await.unwrap());
    }

    #[test]
    fn test_truth_values() {
        for value in [json!(null), json!(false), json!(0), json!(""), json!([])] {
            assert!(!is_true(&value), "{} should be false", value);
        }
        for value in [json!(true), json!(3), json!("x"), json!([1])] {
            assert!(is_true(&value), "{} should be true", value);
        }
    }

    #[test]
    fn test_serialized_form() {
        let condition = Condition::all(vec![
            Condition::eq("state", json!("open")),
            Condition::method("is_paid"),
        ]);
        let text = serde_json::to_string(&condition).unwrap();
        let back: Condition = serde_json::from_str(&text).unwrap();
        assert_eq!(back, condition);

        let parsed: Condition = serde_json::from_value(json!({
            "compare": [{"field": "amount"}, "ge", {"value": 10}]
        }))
        .unwrap();
        assert_eq!(parsed, Condition::compare("amount", Comparison::Ge, json!(10)));
    }
}
