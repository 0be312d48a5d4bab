//! CRUD orchestrator
//!
//! Every public operation of the ORM is a method on [`Transaction`]:
//!
//! - `create`, `read`, `write`, `delete`, `copy`
//! - `search`, `search_count`, `search_read`, `name_get`, `name_search`
//! - `default_get`, `fields_get`
//! - `export_data`, `import_data`
//!
//! Operations check model access first, then record rules, and run on id
//! chunks bounded by the `in_max` setting. Recursive entry points return
//! boxed futures since they call each other through relations and
//! delegated parents.

mod copy;
mod create;
mod defaults;
mod delete;
mod describe;
mod read;
mod relations;
mod search;
mod transfer;
mod validate;
mod write;

pub use transfer::ImportResult;

use std::collections::HashSet;

use crate::fields::{Field, FieldKind};
use crate::model::{Model, Values, LOG_ACCESS_FIELDS};
use crate::query::Sql;

/// `"column" IN (...)` for one chunk of ids
pub(crate) fn ids_in(column: Sql, ids: &[i64]) -> Sql {
    let mut sql = column;
    sql.push(" IN ").append(Sql::value_list(ids.iter().copied()));
    sql
}

/// Ids without duplicates, first occurrence kept
pub(crate) fn unique_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Fields the ORM maintains itself and never takes from callers
pub(crate) fn is_magic_field(model: &Model, name: &str) -> bool {
    if name == "id" || LOG_ACCESS_FIELDS.contains(&name) {
        return true;
    }
    model
        .fields()
        .filter_map(|f| f.tree_columns())
        .any(|(left, right)| left == name || right == name)
}

/// Where a written value goes
pub(crate) struct SplitValues {
    /// Own columns
    pub direct: Vec<(std::sync::Arc<Field>, serde_json::Value)>,
    /// Relations, function setters and properties, applied after the row
    pub deferred: Vec<(std::sync::Arc<Field>, serde_json::Value)>,
    /// Values of fields delegated to each `inherits` parent
    pub delegated: Vec<(String, String, Values)>,
}

impl SplitValues {
    pub(crate) fn new(model: &Model, values: &Values) -> Self {
        let mut split = SplitValues {
            direct: Vec::new(),
            deferred: Vec::new(),
            delegated: model
                .inherits
                .iter()
                .map(|(parent, link)| (parent.clone(), link.clone(), Values::new()))
                .collect(),
        };
        for (name, value) in values {
            if is_magic_field(model, name) {
                continue;
            }
            if let Some(field) = model.field(name) {
                match &field.kind {
                    FieldKind::One2Many(_)
                    | FieldKind::Many2Many(_)
                    | FieldKind::Function(_)
                    | FieldKind::Property(_) => split.deferred.push((field.clone(), value.clone())),
                    _ => split.direct.push((field.clone(), value.clone())),
                }
            } else if let Some(inherited) = model.inherited_field(name) {
                if let Some((_, _, values)) = split
                    .delegated
                    .iter_mut()
                    .find(|(parent, link, _)| *parent == inherited.parent && *link == inherited.link)
                {
                    values.insert(name.clone(), value.clone());
                }
            }
        }
        split
            .deferred
            .sort_by(|(a, _), (b, _)| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        split
    }
}
