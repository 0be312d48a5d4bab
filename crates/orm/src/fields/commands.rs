//! Mutation verbs of one2many and many2many values.
//!
//! A write of an x2many field carries a list of commands:
//!
//! ```json
//! [["create", {"name": "child"}], ["add", [4, 5]], ["delete_all"]]
//! ```
//!
//! The numeric tuple codes `(0, 0, vals)` .. `(6, 0, ids)` are accepted as
//! well, and a bare list of ids means `set`.

use serde_json::{Map, Value};

use super::conversion::id_from_value;
use crate::error::{ModelError, OrmResult};

#[derive(Debug, Clone, PartialEq)]
pub enum X2ManyCommand {
    /// Create a target record and link it
    Create(Map<String, Value>),
    /// Write values on linked target records
    Write(Vec<i64>, Map<String, Value>),
    /// Delete target records
    Delete(Vec<i64>),
    /// Delete every linked target record
    DeleteAll,
    /// Remove links, keep the records
    Unlink(Vec<i64>),
    /// Remove every link
    UnlinkAll,
    /// Link existing records
    Add(Vec<i64>),
    /// Replace the links with exactly these records
    Set(Vec<i64>),
}

fn ids_of(value: Option<&Value>) -> Vec<i64> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(id_from_value).collect(),
        Some(value) => id_from_value(value).into_iter().collect(),
        None => Vec::new(),
    }
}

fn values_of(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

impl X2ManyCommand {
    /// Parse the value written to an x2many field
    pub fn parse_list(model: &str, field: &str, value: &Value) -> OrmResult<Vec<Self>> {
        let items = match value {
            Value::Null | Value::Bool(false) => return Ok(Vec::new()),
            Value::Array(items) => items,
            other => {
                return Err(ModelError::validation(
                    model,
                    Some(field),
                    format!("Invalid x2many value {} for field '{}'", other, field),
                ))
            }
        };

        if !items.is_empty() && items.iter().all(|item| item.is_number()) {
            return Ok(vec![X2ManyCommand::Set(ids_of(Some(value)))]);
        }

        items
            .iter()
            .map(|item| Self::parse(item).ok_or_else(|| {
                ModelError::validation(
                    model,
                    Some(field),
                    format!("Invalid x2many command {} for field '{}'", item, field),
                )
            }))
            .collect()
    }

    fn parse(item: &Value) -> Option<Self> {
        let parts = item.as_array()?;
        let verb = parts.first()?;
        let command = match verb {
            Value::String(verb) => match verb.as_str() {
                "create" => X2ManyCommand::Create(values_of(parts.get(1))),
                "write" => X2ManyCommand::Write(ids_of(parts.get(1)), values_of(parts.get(2))),
                "delete" => X2ManyCommand::Delete(ids_of(parts.get(1))),
                "delete_all" => X2ManyCommand::DeleteAll,
                "unlink" => X2ManyCommand::Unlink(ids_of(parts.get(1))),
                "unlink_all" => X2ManyCommand::UnlinkAll,
                "add" => X2ManyCommand::Add(ids_of(parts.get(1))),
                "set" => X2ManyCommand::Set(ids_of(parts.get(1))),
                _ => return None,
            },
            Value::Number(code) => match code.as_i64()? {
                0 => X2ManyCommand::Create(values_of(parts.get(2))),
                1 => X2ManyCommand::Write(ids_of(parts.get(1)), values_of(parts.get(2))),
                2 => X2ManyCommand::Delete(ids_of(parts.get(1))),
                3 => X2ManyCommand::Unlink(ids_of(parts.get(1))),
                4 => X2ManyCommand::Add(ids_of(parts.get(1))),
                5 => X2ManyCommand::UnlinkAll,
                6 => X2ManyCommand::Set(ids_of(parts.get(2))),
                _ => return None,
            },
            _ => return None,
        };
        Some(command)
    }

    /// JSON form using the verb names
    pub fn to_json(&self) -> Value {
        use serde_json::json;
        match self {
            X2ManyCommand::Create(values) => json!(["create", values]),
            X2ManyCommand::Write(ids, values) => json!(["write", ids, values]),
            X2ManyCommand::Delete(ids) => json!(["delete", ids]),
            X2ManyCommand::DeleteAll => json!(["delete_all"]),
            X2ManyCommand::Unlink(ids) => json!(["unlink", ids]),
            X2ManyCommand::UnlinkAll => json!(["unlink_all"]),
            X2ManyCommand::Add(ids) => json!(["add", ids]),
            X2ManyCommand::Set(ids) => json!(["set", ids]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verbs() {
        let commands = X2ManyCommand::parse_list(
            "test.o2m",
            "targets",
            &json!([["create", {"name": "a"}], ["add", [1, 2]], ["delete_all"], ["write", 3, {"name": "b"}]]),
        )
        .unwrap();
        assert_eq!(commands.len(), 4);
        assert!(matches!(&commands[0], X2ManyCommand::Create(v) if v["name"] == "a"));
        assert_eq!(commands[1], X2ManyCommand::Add(vec![1, 2]));
        assert_eq!(commands[2], X2ManyCommand::DeleteAll);
        assert!(matches!(&commands[3], X2ManyCommand::Write(ids, _) if ids == &vec![3]));
    }

    #[test]
    fn test_numeric_codes_and_bare_ids() {
        let commands =
            X2ManyCommand::parse_list("m", "f", &json!([[6, 0, [7, 8]], [5], [4, 9]])).unwrap();
        assert_eq!(
            commands,
            vec![
                X2ManyCommand::Set(vec![7, 8]),
                X2ManyCommand::UnlinkAll,
                X2ManyCommand::Add(vec![9])
            ]
        );
        assert_eq!(
            X2ManyCommand::parse_list("m", "f", &json!([1, 2])).unwrap(),
            vec![X2ManyCommand::Set(vec![1, 2])]
        );
    }

    #[test]
    fn test_unknown_verb_is_rejected() {
        let err = X2ManyCommand::parse_list("m", "f", &json!([["explode", [1]]])).unwrap_err();
        assert!(matches!(err, ModelError::Validation { .. }));
    }
}
