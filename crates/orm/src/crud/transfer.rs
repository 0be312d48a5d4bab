//! Tabular export and import
//!
//! Columns are field paths: `name`, `partner.name`, `lines.product`. A
//! `:id` suffix on the last step reads or writes `module.fs_id`
//! identifiers instead of display names. One2many and many2many values are
//! spread over follow-up rows whose own columns are left empty.

use std::str::FromStr;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::{Domain, Operator};
use crate::error::{ModelError, OrmResult};
use crate::fields::conversion::is_empty_value;
use crate::fields::{Field, FieldKind};
use crate::ir::access::AccessMode;
use crate::ir::model_data::XmlId;
use crate::model::{Model, Values};
use crate::transaction::Transaction;

const XML_ID_SUFFIX: &str = ":id";

/// Outcome of [`Transaction::import_data`]
#[derive(Debug, Clone, PartialEq)]
pub struct ImportResult {
    /// Records created or updated before the first failure
    pub imported: usize,
    /// Index of the failing row and the reason
    pub error: Option<(usize, String)>,
}

/// `a.b.c` as its steps
fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// Step name without the identifier suffix, and whether it had one
fn step_name(step: &str) -> (&str, bool) {
    match step.strip_suffix(XML_ID_SUFFIX) {
        Some(name) => (name, true),
        None => (step, false),
    }
}

fn is_empty_cell(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().is_empty(),
        other => is_empty_value(other),
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn ids_of(value: &Value) -> Vec<i64> {
    match value {
        Value::Array(items) => items.iter().filter_map(Value::as_i64).collect(),
        other => other.as_i64().into_iter().collect(),
    }
}

impl Transaction {
    /// One row per record of `ids`, plus follow-up rows for the extra
    /// values of x2many columns
    pub async fn export_data(&mut self, model: &str, ids: &[i64], paths: &[&str]) -> OrmResult<Vec<Vec<Value>>> {
        self.check_access(model, AccessMode::Read).await?;
        let paths: Vec<Vec<String>> = paths.iter().map(|p| split_path(p)).collect();
        let mut rows = Vec::new();
        for id in ids {
            rows.extend(self.export_row(model, *id, &paths).await?);
        }
        Ok(rows)
    }

    fn export_row<'a>(
        &'a mut self,
        model: &'a str,
        id: i64,
        paths: &'a [Vec<String>],
    ) -> BoxFuture<'a, OrmResult<Vec<Vec<Value>>>> {
        Box::pin(async move {
            let mut data = vec![Value::Null; paths.len()];
            let mut lines: Vec<Vec<Value>> = Vec::new();
            let mut done: Vec<Vec<Vec<String>>> = Vec::new();

            for (position, path) in paths.iter().enumerate() {
                let mut current = self.model(model)?;
                let mut record = id;
                for (depth, step) in path.iter().enumerate() {
                    let (name, xml_id) = step_name(step);
                    let last = depth + 1 == path.len();
                    if name == "id" {
                        data[position] = match xml_id {
                            true => self.xml_id_cell(&current.name, record).await?,
                            false => json!(record),
                        };
                        break;
                    }
                    let field = current.require_field(name)?.clone();
                    let value = self.export_value(&current.name, record, name).await?;

                    if field.kind.value_kind().is_x2many() {
                        let relation = field.kind.relation().unwrap_or_default().to_string();
                        let children = ids_of(&value);
                        if last {
                            data[position] = self.relation_cell(&relation, &children, xml_id).await?;
                            break;
                        }
                        let prefix = &path[..=depth];
                        let child_paths: Vec<Vec<String>> = paths
                            .iter()
                            .map(|other| match other.len() > depth && other[..=depth] == *prefix {
                                true => other[depth + 1..].to_vec(),
                                false => Vec::new(),
                            })
                            .collect();
                        if done.contains(&child_paths) {
                            break;
                        }
                        done.push(child_paths.clone());
                        let mut first = true;
                        for child in children {
                            let child_lines = self.export_row(&relation, child, &child_paths).await?;
                            let mut child_lines = child_lines.into_iter();
                            if first {
                                if let Some(head) = child_lines.next() {
                                    for (cell, value) in data.iter_mut().zip(head) {
                                        if !value.is_null() {
                                            *cell = value;
                                        }
                                    }
                                }
                                first = false;
                            }
                            lines.extend(child_lines);
                        }
                        break;
                    }

                    if let FieldKind::Many2One(m2o) = field.kind.value_kind() {
                        let Some(target) = value.as_i64() else {
                            break;
                        };
                        if last {
                            data[position] = self.relation_cell(&m2o.relation, &[target], xml_id).await?;
                            break;
                        }
                        current = self.model(&m2o.relation)?;
                        record = target;
                        continue;
                    }
                    if last {
                        data[position] = value;
                    }
                    break;
                }
            }
            let mut rows = vec![data];
            rows.extend(lines);
            Ok(rows)
        })
    }

    async fn export_value(&mut self, model: &str, id: i64, field: &str) -> OrmResult<Value> {
        let rows = self.read(model, &[id], Some(&[field])).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(field))
            .unwrap_or(Value::Null))
    }

    async fn xml_id_cell(&mut self, model: &str, id: i64) -> OrmResult<Value> {
        Ok(self
            .xml_ids(model, &[id])
            .await?
            .remove(&id)
            .map(Value::String)
            .unwrap_or(Value::Null))
    }

    /// Display names (or identifiers) of related records, comma separated
    async fn relation_cell(&mut self, relation: &str, ids: &[i64], xml_id: bool) -> OrmResult<Value> {
        if ids.is_empty() {
            return Ok(Value::Null);
        }
        let names: Vec<String> = match xml_id {
            true => {
                let found = self.xml_ids(relation, ids).await?;
                ids.iter().filter_map(|id| found.get(id).cloned()).collect()
            }
            false => self.name_get(relation, ids).await?.into_iter().map(|(_, name)| name).collect(),
        };
        Ok(Value::String(names.join(",")))
    }

    /// Create (or update, for rows with a `module.fs_id` in an `id`
    /// column) one record per group of rows. Stops at the first failing
    /// row, whose changes are rolled back.
    pub async fn import_data(&mut self, model: &str, paths: &[&str], rows: &[Vec<Value>]) -> OrmResult<ImportResult> {
        let definition = self.model(model)?;
        let paths: Vec<Vec<String>> = paths.iter().map(|p| split_path(p)).collect();
        let mut imported = 0;
        let mut position = 0;
        while position < rows.len() {
            let savepoint = self.savepoint().await?;
            let outcome = self.import_record(&definition, &paths, rows, position).await;
            match outcome {
                Ok(consumed) => {
                    self.release_savepoint(&savepoint).await?;
                    imported += 1;
                    position += consumed.max(1);
                }
                Err(e) if e.is_user_error() => {
                    self.rollback_to_savepoint(&savepoint).await?;
                    warn!("import into {} stopped at row {}: {}", model, position, e);
                    return Ok(ImportResult {
                        imported,
                        error: Some((position, e.to_string())),
                    });
                }
                Err(e) => {
                    self.rollback_to_savepoint(&savepoint).await?;
                    return Err(e);
                }
            }
        }
        debug!("imported {} {} records", imported, model);
        Ok(ImportResult { imported, error: None })
    }

    /// Import the record starting at `position`, returning how many rows it
    /// spanned
    async fn import_record(
        &mut self,
        model: &Model,
        paths: &[Vec<String>],
        rows: &[Vec<Value>],
        position: usize,
    ) -> OrmResult<usize> {
        let (values, consumed, xml_id) = self.import_lines(&model.name, paths, rows, &[], position).await?;
        match xml_id {
            Some(xml_id) => {
                let XmlId { module, fs_id } = XmlId::from_str(&xml_id)?;
                self.load_fixture(&module, &fs_id, &model.name, values).await?;
            }
            None => {
                self.create(&model.name, values).await?;
            }
        }
        Ok(consumed)
    }

    /// Values of the record at `position` for the columns under `prefix`,
    /// the number of rows it spans and its identifier
    fn import_lines<'a>(
        &'a mut self,
        model: &'a str,
        paths: &'a [Vec<String>],
        rows: &'a [Vec<Value>],
        prefix: &'a [String],
        position: usize,
    ) -> BoxFuture<'a, OrmResult<(Values, usize, Option<String>)>> {
        Box::pin(async move {
            let definition = self.model(model)?;
            let line = &rows[position];
            let mut values = Values::new();
            let mut xml_id = None;
            let mut todo: Vec<String> = Vec::new();

            for (column, path) in paths.iter().enumerate() {
                if path.len() <= prefix.len() || path[..prefix.len()] != *prefix {
                    continue;
                }
                let step = &path[prefix.len()];
                if path.len() > prefix.len() + 1 {
                    if !todo.contains(step) {
                        todo.push(step.clone());
                    }
                    continue;
                }
                let cell = line.get(column).cloned().unwrap_or(Value::Null);
                let (name, by_xml_id) = step_name(step);
                if name == "id" {
                    if !is_empty_cell(&cell) {
                        xml_id = Some(cell_text(&cell));
                    }
                    continue;
                }
                let field = definition.require_field(name)?.clone();
                let value = self.import_cell(&definition, &field, &cell, by_xml_id).await?;
                values.insert(name.to_string(), value);
            }

            let mut spanned = 1;
            for step in todo {
                let field = definition.require_field(&step)?.clone();
                let FieldKind::One2Many(o2m) = field.kind.value_kind() else {
                    return Err(ModelError::Programming(format!(
                        "Column path through '{}' of '{}' needs a one2many",
                        step, model
                    )));
                };
                let relation = o2m.relation.clone();
                let mut child_prefix = prefix.to_vec();
                child_prefix.push(step.clone());

                let mut commands = Vec::new();
                let mut offset = 0;
                loop {
                    let (child, consumed, _) = self
                        .import_lines(&relation, paths, rows, &child_prefix, position + offset)
                        .await?;
                    if !child.values().all(Value::is_null) {
                        commands.push(json!(["create", child]));
                    }
                    offset += consumed.max(1);
                    spanned = spanned.max(offset);
                    let Some(next) = rows.get(position + offset) else {
                        break;
                    };
                    // a follow-up row leaves the outer columns empty
                    let continues = paths.iter().enumerate().all(|(column, path)| {
                        path.len() > prefix.len() + 1
                            || next.get(column).map(is_empty_cell).unwrap_or(true)
                    });
                    if !continues {
                        break;
                    }
                }
                values.insert(step.clone(), Value::Array(commands));
            }
            Ok((values, spanned, xml_id))
        })
    }

    /// Value written for one cell
    async fn import_cell(&mut self, model: &Model, field: &Field, cell: &Value, by_xml_id: bool) -> OrmResult<Value> {
        if is_empty_cell(cell) {
            return Ok(match field.kind.value_kind() {
                FieldKind::Boolean => Value::Bool(false),
                FieldKind::Many2Many(_) => json!([["set", []]]),
                _ => Value::Null,
            });
        }
        let text = cell_text(cell);
        let invalid = |what: &str| {
            ModelError::validation(
                &model.name,
                Some(&field.name),
                format!("Invalid {} '{}' for field \"{}\"", what, text, field.string),
            )
        };
        let value = match field.kind.value_kind() {
            FieldKind::Integer | FieldKind::BigInteger => match cell {
                Value::Number(n) if n.is_i64() => cell.clone(),
                _ => json!(text.parse::<i64>().map_err(|_| invalid("integer"))?),
            },
            FieldKind::Float | FieldKind::Numeric => match cell {
                Value::Number(_) => cell.clone(),
                _ => json!(text.parse::<f64>().map_err(|_| invalid("number"))?),
            },
            FieldKind::Boolean => match cell {
                Value::Bool(b) => Value::Bool(*b),
                _ => Value::Bool(matches!(
                    text.to_lowercase().as_str(),
                    "1" | "true" | "yes" | "y" | "t"
                )),
            },
            FieldKind::Selection(selection) => {
                let pairs = self.selection_pairs(&model.name, selection).await?;
                let key = pairs
                    .into_iter()
                    .find(|(key, label)| *key == text || *label == text)
                    .map(|(key, _)| key)
                    .ok_or_else(|| invalid("selection"))?;
                Value::String(key)
            }
            FieldKind::Many2One(m2o) => {
                let id = self.resolve_cell(&m2o.relation, &text, by_xml_id).await?;
                json!(id.ok_or_else(|| invalid("reference"))?)
            }
            FieldKind::Many2Many(m2m) => {
                let mut ids = Vec::new();
                for word in text.split(',').map(str::trim).filter(|w| !w.is_empty()) {
                    let id = self.resolve_cell(&m2m.relation, word, by_xml_id).await?;
                    ids.push(id.ok_or_else(|| invalid("reference"))?);
                }
                json!([["set", ids]])
            }
            FieldKind::One2Many(_) => {
                return Err(ModelError::Programming(format!(
                    "One2many '{}' of '{}' is imported through its sub-fields",
                    field.name, model.name
                )))
            }
            _ => match cell {
                Value::String(_) => Value::String(text),
                other => other.clone(),
            },
        };
        Ok(value)
    }

    /// Record of `relation` named by a cell, by identifier or exact name
    async fn resolve_cell(&mut self, relation: &str, text: &str, by_xml_id: bool) -> OrmResult<Option<i64>> {
        if by_xml_id {
            let parsed: XmlId = text.parse()?;
            return Ok(self
                .xml_id_lookup(&parsed)
                .await?
                .filter(|(model, _)| model == relation)
                .map(|(_, id)| id));
        }
        let found = self
            .name_search(relation, text, &Domain::new(), Operator::Eq, Some(1))
            .await?;
        Ok(found.first().map(|(id, _)| *id))
    }
}
