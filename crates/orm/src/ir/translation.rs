//! Translations
//!
//! `ir.translation` rows are keyed by `(name, lang, type, res_id)`:
//!
//! - `model`: value of a translatable field, `name = "model,field"`
//! - `field`: label of a field, `res_id = 0`
//! - `help`: tooltip of a field, `res_id = 0`
//! - `selection`: label of a selection key, `src` is the source label
//! - `error`: user-facing error message, `src` is the untranslated message

use std::collections::HashMap;

use oerp_cache::cache_key;
use tracing::debug;

use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};
use crate::model::Model;
use crate::query::Sql;
use crate::transaction::Transaction;

pub const TRANSLATION_CACHE: &str = "ir.translation.get";

/// Translation kinds
pub const MODEL: &str = "model";
pub const FIELD: &str = "field";
pub const HELP: &str = "help";
pub const SELECTION: &str = "selection";
pub const ERROR: &str = "error";

impl Transaction {
    /// Translation of `src` (or of the resource-less entry `name`) in the
    /// request language
    pub async fn translate(
        &mut self,
        name: Option<&str>,
        kind: &str,
        src: Option<&str>,
    ) -> OrmResult<Option<String>> {
        let lang = self.language();
        let key = cache_key(&(name, kind, &lang, src));
        if let Some(hit) = self.cache_get::<Option<String>>(TRANSLATION_CACHE, &key) {
            return Ok(hit);
        }
        let mut sql = Sql::new("SELECT \"value\" FROM \"ir_translation\" WHERE \"type\" = ");
        sql.push_param(kind)
            .push(" AND \"lang\" = ")
            .push_param(lang.as_str())
            .push(" AND \"res_id\" = 0");
        if let Some(name) = name {
            sql.push(" AND \"name\" = ").push_param(name);
        }
        if let Some(src) = src {
            sql.push(" AND \"src\" = ").push_param(src);
        }
        sql.push(" ORDER BY \"id\"");
        let value = self
            .fetch_optional(&sql)
            .await?
            .and_then(|row| row.get_string("value"))
            .filter(|value| !value.is_empty());
        self.cache_put(TRANSLATION_CACHE, &key, &value);
        Ok(value)
    }

    /// Translate the message of a validation or access error. Lookup
    /// failures leave the error as it is.
    pub async fn localize(&mut self, err: ModelError) -> ModelError {
        if !self.translating() {
            return err;
        }
        let Some(key) = err.message_key().map(str::to_string) else {
            return err;
        };
        match self.translate(None, ERROR, Some(&key)).await {
            Ok(Some(translated)) => err.with_translation(translated),
            Ok(None) => err,
            Err(lookup) => {
                debug!("error message lookup failed: {}", lookup);
                err
            }
        }
    }

    /// Translated values of `field` for `ids` in the request language
    pub(crate) async fn read_translations(
        &mut self,
        model: &Model,
        field: &str,
        ids: &[i64],
    ) -> OrmResult<HashMap<i64, String>> {
        let mut found = HashMap::new();
        let lang = self.language();
        let name = model.translation_name(field);
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new(
                "SELECT \"res_id\", \"value\" FROM \"ir_translation\" WHERE \"type\" = ",
            );
            sql.push_param(MODEL)
                .push(" AND \"name\" = ")
                .push_param(name.as_str())
                .push(" AND \"lang\" = ")
                .push_param(lang.as_str())
                .push(" AND \"res_id\" IN ")
                .append(Sql::value_list(chunk.iter().copied()));
            for row in self.fetch_all(&sql).await? {
                let value = row.get_string("value").filter(|v| !v.is_empty());
                if let (Some(id), Some(value)) = (row.get_opt_i64("res_id"), value) {
                    found.insert(id, value);
                }
            }
        }
        Ok(found)
    }

    /// Store the translation of one value, `src` being the stored value
    pub(crate) async fn set_translation(
        &mut self,
        model: &Model,
        field: &str,
        id: i64,
        lang: &str,
        src: Option<&str>,
        value: &str,
    ) -> OrmResult<()> {
        let name = model.translation_name(field);
        let mut update = Sql::new("UPDATE \"ir_translation\" SET \"value\" = ");
        update
            .push_param(value)
            .push(", \"fuzzy\" = ")
            .push_param(false)
            .push(" WHERE \"type\" = ")
            .push_param(MODEL)
            .push(" AND \"name\" = ")
            .push_param(name.as_str())
            .push(" AND \"lang\" = ")
            .push_param(lang)
            .push(" AND \"res_id\" = ")
            .push_param(id);
        if self.execute(&update).await? == 0 {
            let mut insert = Sql::new(
                "INSERT INTO \"ir_translation\" (\"name\", \"lang\", \"type\", \"src\", \"value\", \"res_id\", \"fuzzy\") VALUES ",
            );
            insert.append(Sql::value_list::<_, DatabaseValue>([
                name.into(),
                lang.into(),
                MODEL.into(),
                src.into(),
                value.into(),
                id.into(),
                false.into(),
            ]));
            self.execute(&insert).await?;
        }
        self.cache_reset(TRANSLATION_CACHE);
        Ok(())
    }

    /// Mark the translations of `field` fuzzy after its source changed
    pub(crate) async fn mark_translations_fuzzy(
        &mut self,
        model: &Model,
        field: &str,
        ids: &[i64],
        src: Option<&str>,
    ) -> OrmResult<()> {
        let name = model.translation_name(field);
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new("UPDATE \"ir_translation\" SET \"fuzzy\" = ");
            sql.push_param(true)
                .push(", \"src\" = ")
                .push_param(src)
                .push(" WHERE \"type\" = ")
                .push_param(MODEL)
                .push(" AND \"name\" = ")
                .push_param(name.as_str())
                .push(" AND \"res_id\" IN ")
                .append(Sql::value_list(chunk.iter().copied()));
            self.execute(&sql).await?;
        }
        Ok(())
    }

    /// Drop the value translations of deleted records
    pub(crate) async fn delete_translations(&mut self, model: &Model, ids: &[i64]) -> OrmResult<()> {
        let names: Vec<String> = model
            .fields()
            .filter(|f| f.translate)
            .map(|f| model.translation_name(&f.name))
            .collect();
        if names.is_empty() {
            return Ok(());
        }
        for chunk in ids.chunks(self.in_max()) {
            let mut sql = Sql::new("DELETE FROM \"ir_translation\" WHERE \"type\" = ");
            sql.push_param(MODEL)
                .push(" AND \"name\" IN ")
                .append(Sql::value_list(names.iter().map(String::as_str)))
                .push(" AND \"res_id\" IN ")
                .append(Sql::value_list(chunk.iter().copied()));
            self.execute(&sql).await?;
        }
        self.cache_reset(TRANSLATION_CACHE);
        Ok(())
    }

    /// Duplicate the value translations of `from` onto `to`
    pub(crate) async fn copy_translations(&mut self, model: &Model, from: i64, to: i64) -> OrmResult<()> {
        let translatable: Vec<String> = model
            .fields()
            .filter(|f| f.translate && f.is_stored())
            .map(|f| f.name.clone())
            .collect();
        for field in translatable {
            let name = model.translation_name(&field);
            let mut sql = Sql::new(
                "SELECT \"lang\", \"src\", \"value\", \"fuzzy\" FROM \"ir_translation\" WHERE \"type\" = ",
            );
            sql.push_param(MODEL)
                .push(" AND \"name\" = ")
                .push_param(name.as_str())
                .push(" AND \"res_id\" = ")
                .push_param(from);
            for row in self.fetch_all(&sql).await? {
                let mut insert = Sql::new(
                    "INSERT INTO \"ir_translation\" (\"name\", \"lang\", \"type\", \"src\", \"value\", \"res_id\", \"fuzzy\") VALUES ",
                );
                insert.append(Sql::value_list::<_, DatabaseValue>([
                    name.as_str().into(),
                    row.get_string("lang").into(),
                    MODEL.into(),
                    row.get_string("src").into(),
                    row.get_string("value").into(),
                    to.into(),
                    row.get("fuzzy")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false)
                        .into(),
                ]));
                self.execute(&insert).await?;
            }
        }
        self.cache_reset(TRANSLATION_CACHE);
        Ok(())
    }
}
