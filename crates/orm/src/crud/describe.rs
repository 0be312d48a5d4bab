use serde_json::{json, Value};

use crate::error::OrmResult;
use crate::fields::{Field, FieldKind};
use crate::ir::access::AccessMode;
use crate::ir::translation::{FIELD, HELP, SELECTION};
use crate::model::{Model, Values};
use crate::transaction::Transaction;

impl Transaction {
    /// Description of `fields` (every field when `None`) for clients,
    /// labels translated in the request language
    pub async fn fields_get(&mut self, model: &str, fields: Option<&[&str]>) -> OrmResult<Values> {
        let definition = self.model(model)?;
        self.check_access(&definition.name, AccessMode::Read).await?;
        let names: Vec<String> = match fields {
            Some(fields) => fields.iter().map(|f| f.to_string()).collect(),
            None => definition.field_names(),
        };
        let mut result = Values::new();
        for name in names {
            let (owner, field) = match (definition.field(&name), definition.inherited_field(&name)) {
                (Some(field), _) => (definition.clone(), field.clone()),
                (None, Some(inherited)) => (self.model(&inherited.parent)?, inherited.field.clone()),
                (None, None) => {
                    definition.require_field(&name)?;
                    continue;
                }
            };
            let description = self.describe_field(&owner, &field).await?;
            result.insert(name, Value::Object(description));
        }
        Ok(result)
    }

    async fn describe_field(&mut self, model: &Model, field: &Field) -> OrmResult<Values> {
        let translating = self.translating();
        let source = model.translation_name(&field.name);
        let kind = field.kind.value_kind();

        let mut string = field.string.clone();
        let mut help = field.help.clone();
        if translating {
            if let Some(label) = self.translate(Some(&source), FIELD, Some(&field.string)).await? {
                string = label;
            }
            if !help.is_empty() {
                if let Some(translated) = self.translate(Some(&source), HELP, Some(&field.help)).await? {
                    help = translated;
                }
            }
        }

        let mut description = Values::new();
        description.insert("type".into(), json!(kind.type_name()));
        description.insert("string".into(), json!(string));
        if !help.is_empty() {
            description.insert("help".into(), json!(help));
        }
        for (key, flag) in [
            ("required", field.required),
            ("readonly", field.readonly),
            ("select", field.select),
            ("translate", field.translate),
        ] {
            if flag {
                description.insert(key.into(), json!(true));
            }
        }
        if let Some(size) = field.size {
            description.insert("size".into(), json!(size));
        }
        if let Some((precision, scale)) = field.digits {
            description.insert("digits".into(), json!([precision, scale]));
        }
        if !field.states.is_null() && field.states != json!({}) {
            description.insert("states".into(), field.states.clone());
        }
        if !field.domain.is_empty() {
            description.insert("domain".into(), field.domain.to_json());
        }
        match &field.kind {
            FieldKind::Function(function) => {
                description.insert("function".into(), json!(function.getter));
                if function.setter.is_none() {
                    description.insert("readonly".into(), json!(true));
                }
            }
            FieldKind::Property(_) => {
                description.insert("property".into(), json!(true));
            }
            _ => {}
        }
        if let Some(relation) = kind.relation() {
            description.insert("relation".into(), json!(relation));
        }
        if let FieldKind::One2Many(o2m) = kind {
            description.insert("relation_field".into(), json!(o2m.field));
        }
        if let FieldKind::Selection(selection) | FieldKind::Reference(selection) = kind {
            let mut pairs = Vec::new();
            for (key, label) in self.selection_pairs(&model.name, selection).await? {
                let label = match translating {
                    true => self
                        .translate(Some(&source), SELECTION, Some(&label))
                        .await?
                        .unwrap_or(label),
                    false => label,
                };
                pairs.push(json!([key, label]));
            }
            description.insert("selection".into(), Value::Array(pairs));
        }
        Ok(description)
    }
}
