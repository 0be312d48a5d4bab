//! Per-request context
//!
//! Carries the language of the request and free-form keys read by the ORM
//! (`active_test`, `read_delta`, `_skip_workflow`, `loading_fixture`) or by
//! model methods.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Language of translatable values and messages, `None` for the default
    pub language: Option<String>,
    #[serde(flatten)]
    values: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(default),
            Some(Value::Null) | None => default,
            Some(_) => true,
        }
    }

    /// Whether searches hide records whose `active` field is false
    pub fn active_test(&self) -> bool {
        self.flag("active_test", true)
    }

    pub fn skip_workflow(&self) -> bool {
        self.flag("_skip_workflow", false)
    }

    pub fn loading_fixture(&self) -> bool {
        self.flag("loading_fixture", false)
    }

    /// Age of the client's copy of the records, in seconds
    pub fn read_delta(&self) -> Option<Duration> {
        self.values
            .get("read_delta")
            .and_then(Value::as_f64)
            .filter(|secs| *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Language to use, falling back to `default`
    pub fn language_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.language.as_deref().unwrap_or(default)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flags() {
        let ctx = Context::new();
        assert!(ctx.active_test());
        assert!(!ctx.skip_workflow());
        let ctx = ctx.with("active_test", json!(false)).with("_skip_workflow", json!(1));
        assert!(!ctx.active_test());
        assert!(ctx.skip_workflow());
    }

    #[test]
    fn test_read_delta() {
        let ctx = Context::new().with("read_delta", json!(2.5));
        assert_eq!(ctx.read_delta(), Some(Duration::from_millis(2500)));
        assert_eq!(Context::new().read_delta(), None);
    }

    #[test]
    fn test_serde_flattens_keys() {
        let ctx = Context::new().with_language("fr_FR").with("company", json!(3));
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json, json!({"language": "fr_FR", "company": 3}));
        let back: Context = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }
}
