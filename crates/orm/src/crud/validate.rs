//! Value checks and model constraints

use serde_json::{json, Value};
use tracing::debug;

use crate::domain::{Domain, Operator};
use crate::error::{ModelError, OrmResult};
use crate::fields::conversion::{id_from_value, is_empty_value};
use crate::fields::{Field, FieldKind, Selection};
use crate::ir::translation::ERROR;
use crate::model::{Model, SqlConstraintKind, Values};
use crate::transaction::Transaction;

impl Transaction {
    /// Keys allowed by a selection, calling the method of dynamic ones
    pub(crate) async fn selection_pairs(
        &mut self,
        model: &str,
        selection: &Selection,
    ) -> OrmResult<Vec<(String, String)>> {
        match selection {
            Selection::Static(pairs) => Ok(pairs.clone()),
            Selection::Method(method) => {
                let result = self.call(model, method, &[], Value::Null).await?;
                let pairs = result
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|pair| {
                                let pair = pair.as_array()?;
                                let key = pair.first()?.as_str()?.to_string();
                                let label = pair
                                    .get(1)
                                    .and_then(Value::as_str)
                                    .unwrap_or(&key)
                                    .to_string();
                                Some((key, label))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(pairs)
            }
        }
    }

    /// Check written values against their fields: type, size, selection
    /// and required. Delegated fields are checked by their parent.
    pub(crate) async fn check_values(&mut self, model: &Model, values: &Values) -> OrmResult<()> {
        for (name, value) in values {
            let field = match model.field(name) {
                Some(field) => field.clone(),
                None if model.inherited_field(name).is_some() => continue,
                None => return Err(ModelError::unknown_field(&model.name, name)),
            };
            if field.required && is_empty_value(value) && !matches!(field.kind, FieldKind::Boolean) {
                return Err(self.required_error(model, &field).await);
            }
            if is_empty_value(value) {
                continue;
            }
            match field.kind.value_kind() {
                FieldKind::One2Many(_) | FieldKind::Many2Many(_) => continue,
                FieldKind::Selection(selection) => {
                    let key = value.as_str().unwrap_or_default();
                    let pairs = self.selection_pairs(&model.name, selection).await?;
                    if !pairs.iter().any(|(k, _)| k == key) {
                        return Err(self
                            .localize(ModelError::validation(
                                &model.name,
                                Some(&field.name),
                                format!("Value '{}' is not allowed for field \"{}\"", value, field.string),
                            ))
                            .await);
                    }
                }
                FieldKind::Reference(selection) => {
                    let target = value
                        .as_str()
                        .and_then(|s| s.split_once(','))
                        .filter(|(_, id)| id.trim().parse::<i64>().is_ok())
                        .map(|(model, _)| model.to_string());
                    let pairs = self.selection_pairs(&model.name, selection).await?;
                    if !target.map(|t| pairs.iter().any(|(k, _)| *k == t)).unwrap_or(false) {
                        return Err(self
                            .localize(ModelError::validation(
                                &model.name,
                                Some(&field.name),
                                format!("Invalid reference '{}' for field \"{}\"", value, field.string),
                            ))
                            .await);
                    }
                }
                _ => {}
            }
            if let (Some(size), Some(text)) = (field.size, value.as_str()) {
                if text.chars().count() > size {
                    return Err(self
                        .localize(ModelError::validation(
                            &model.name,
                            Some(&field.name),
                            format!("Value of field \"{}\" is too long", field.string),
                        ))
                        .await);
                }
            }
            if field.is_stored() {
                field.to_db(&model.name, value)?;
            }
        }
        Ok(())
    }

    /// Fail when a required own column gets no value on creation
    pub(crate) async fn check_required(&mut self, model: &Model, values: &Values) -> OrmResult<()> {
        for field in model.stored_fields() {
            if !field.required || crate::crud::is_magic_field(model, &field.name) {
                continue;
            }
            if matches!(field.kind, FieldKind::Boolean) {
                continue;
            }
            if values.get(&field.name).map(is_empty_value).unwrap_or(true) {
                let field = field.clone();
                return Err(self.required_error(model, &field).await);
            }
        }
        Ok(())
    }

    async fn required_error(&mut self, model: &Model, field: &Field) -> ModelError {
        self.localize(ModelError::validation(
            &model.name,
            Some(&field.name),
            format!("Field \"{}\" is required", field.string),
        ))
        .await
    }

    /// Run the constraint methods of `model` on `ids`
    pub(crate) async fn validate(&mut self, model: &Model, ids: &[i64]) -> OrmResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        for constraint in &model.constraints {
            let result = self.call(&model.name, &constraint.method, ids, Value::Null).await?;
            let passed = match result {
                Value::Bool(b) => b,
                Value::Null => false,
                Value::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
                _ => true,
            };
            if !passed {
                debug!("{} constraint {} failed on {:?}", model.name, constraint.method, ids);
                return Err(self
                    .localize(ModelError::validation(&model.name, None, constraint.message.clone()))
                    .await);
            }
        }
        Ok(())
    }

    /// Check the relational values of `ids` against the domains of their
    /// fields; only the fields in `written` when given
    pub(crate) async fn check_field_domains(
        &mut self,
        model: &Model,
        ids: &[i64],
        written: Option<&Values>,
    ) -> OrmResult<()> {
        let fields: Vec<_> = model
            .fields()
            .filter(|f| !f.domain.is_empty() && f.kind.relation().is_some())
            .filter(|f| written.map(|v| v.contains_key(&f.name)).unwrap_or(true))
            .cloned()
            .collect();
        for field in fields {
            let Some(relation) = field.kind.relation().map(str::to_string) else {
                continue;
            };
            let rows = self.read(&model.name, ids, Some(&[field.name.as_str()])).await?;
            let mut targets = Vec::new();
            for row in &rows {
                match (field.kind.value_kind(), row.get(&field.name)) {
                    (FieldKind::Many2One(_), Some(value)) => targets.extend(id_from_value(value)),
                    (_, Some(Value::Array(items))) => targets.extend(items.iter().filter_map(id_from_value)),
                    _ => {}
                }
            }
            targets.sort_unstable();
            targets.dedup();
            if targets.is_empty() {
                continue;
            }

            let domain = Domain::and(vec![
                Domain::leaf("id", Operator::In, json!(targets)),
                field.domain.clone(),
            ]);
            let context = self.context().clone().with("active_test", json!(false));
            let previous = self.set_context(context);
            let found = self.search(&relation, &domain, 0, None, None).await;
            self.set_context(previous);
            if found?.len() != targets.len() {
                debug!("{}.{} out of its domain for {:?}", model.name, field.name, ids);
                return Err(self
                    .localize(ModelError::validation(
                        &model.name,
                        Some(&field.name),
                        format!("The value of field \"{}\" does not match its domain", field.string),
                    ))
                    .await);
            }
        }
        Ok(())
    }

    /// Replace a storage constraint violation by the message declared on the
    /// model, translated. Other errors pass through.
    pub(crate) async fn map_integrity(&mut self, model: &Model, err: ModelError) -> ModelError {
        let ModelError::Integrity { constraint, message } = &err else {
            return err;
        };
        let declared = model.sql_constraints.iter().find(|declared| {
            if constraint.as_deref() == Some(model.constraint_name(declared).as_str()) {
                return true;
            }
            // SQLite names the columns: "UNIQUE constraint failed: t.a, t.b"
            match (&declared.kind, message.split_once("UNIQUE constraint failed:")) {
                (SqlConstraintKind::Unique(columns), Some((_, failed))) => {
                    let failed: Vec<&str> = failed
                        .split(',')
                        .map(|c| c.trim().rsplit('.').next().unwrap_or_default())
                        .collect();
                    failed.len() == columns.len() && columns.iter().all(|c| failed.contains(&c.as_str()))
                }
                _ => false,
            }
        });
        let Some(declared) = declared else {
            return err;
        };
        let name = model.constraint_name(declared);
        let translated = match self.translating() {
            true => self
                .translate(None, ERROR, Some(&declared.message))
                .await
                .ok()
                .flatten(),
            false => None,
        };
        ModelError::Integrity {
            constraint: Some(name),
            message: translated.unwrap_or_else(|| declared.message.clone()),
        }
    }
}
