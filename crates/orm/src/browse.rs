//! Record access by id
//!
//! A [`RecordSet`] is an ordered list of ids of one model; each of its
//! [`Record`]s remembers its siblings. Reading a field on one record loads
//! that field for every sibling still missing it, through the browse cache
//! of the transaction. Relational values come back as new record sets,
//! built when the field is read.

use std::sync::Arc;

use serde_json::Value;

use crate::error::OrmResult;
use crate::fields::FieldKind;
use crate::transaction::Transaction;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    model: String,
    ids: Arc<[i64]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    model: String,
    id: i64,
    siblings: Arc<[i64]>,
}

/// Value of a relational field
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// Empty many2one, or a target that no longer exists
    None,
    One(Record),
    Many(RecordSet),
}

impl Transaction {
    /// Records of `model` for `ids`, in that order
    pub fn browse(&self, model: &str, ids: &[i64]) -> OrmResult<RecordSet> {
        let model = self.model(model)?;
        Ok(RecordSet {
            model: model.name.clone(),
            ids: ids.into(),
        })
    }
}

impl RecordSet {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn records(&self) -> Vec<Record> {
        self.ids
            .iter()
            .map(|id| Record {
                model: self.model.clone(),
                id: *id,
                siblings: self.ids.clone(),
            })
            .collect()
    }

    pub fn first(&self) -> Option<Record> {
        self.records().into_iter().next()
    }
}

impl Record {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Value of `field`; `Null` when the record does not exist anymore
    pub async fn get(&self, tx: &mut Transaction, field: &str) -> OrmResult<Value> {
        let model = tx.model(&self.model)?;
        if field == "id" {
            return Ok(Value::from(self.id));
        }
        model.require_field(field)?;
        if let Some(value) = tx.records.get(&(self.model.clone(), self.id)).and_then(|v| v.get(field)) {
            return Ok(value.clone());
        }
        let rows = tx.read(&self.model, &self.siblings, Some(&[field])).await?;
        Ok(rows
            .into_iter()
            .find(|row| row.get("id").and_then(Value::as_i64) == Some(self.id))
            .and_then(|mut row| row.remove(field))
            .unwrap_or(Value::Null))
    }

    /// Relational `field` as records: a many2one gives one record, an
    /// x2many a record set
    pub async fn get_related(&self, tx: &mut Transaction, field: &str) -> OrmResult<Related> {
        let model = tx.model(&self.model)?;
        let definition = model.require_field(field)?.clone();
        let value = self.get(tx, field).await?;
        match definition.kind.value_kind() {
            FieldKind::Many2One(m2o) => {
                let Some(id) = value.as_i64() else {
                    return Ok(Related::None);
                };
                // siblings pointing to the same model load together
                let mut targets = Vec::new();
                for sibling in self.siblings.iter() {
                    let linked = tx
                        .records
                        .get(&(self.model.clone(), *sibling))
                        .and_then(|values| values.get(field))
                        .and_then(Value::as_i64);
                    if let Some(linked) = linked {
                        if !targets.contains(&linked) {
                            targets.push(linked);
                        }
                    }
                }
                if !targets.contains(&id) {
                    targets.push(id);
                }
                Ok(Related::One(Record {
                    model: m2o.relation.clone(),
                    id,
                    siblings: targets.into(),
                }))
            }
            FieldKind::One2Many(_) | FieldKind::Many2Many(_) => {
                let relation = definition.kind.relation().unwrap_or_default().to_string();
                let ids: Vec<i64> = value
                    .as_array()
                    .map(|items| items.iter().filter_map(Value::as_i64).collect())
                    .unwrap_or_default();
                Ok(Related::Many(RecordSet {
                    model: relation,
                    ids: ids.into(),
                }))
            }
            _ => Err(crate::error::ModelError::Programming(format!(
                "Field '{}' of '{}' is not relational",
                field, self.model
            ))),
        }
    }
}

impl Related {
    /// The single record of a many2one value
    pub fn record(&self) -> Option<&Record> {
        match self {
            Related::One(record) => Some(record),
            _ => None,
        }
    }

    /// The records of an x2many value
    pub fn records(&self) -> Option<&RecordSet> {
        match self {
            Related::Many(set) => Some(set),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_share_siblings() {
        let set = RecordSet {
            model: "res.partner".into(),
            ids: vec![3, 1, 2].into(),
        };
        let records = set.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].id(), 1);
        assert_eq!(&*records[2].siblings, &[3, 1, 2]);
        assert_eq!(set.first().map(|r| r.id()), Some(3));
    }
}
