//! Model registry
//!
//! The registry owns the state shared by every request on one database: the
//! frozen models, the connection pool, the process caches and the workflow
//! hook. Lifecycle:
//!
//! ```ignore
//! let registry = Registry::builder(config).model(def).load().await?;
//! let mut tx = registry.begin(uid, Context::new()).await?;
//! // ...
//! tx.commit().await?;
//! registry.close().await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use oerp_cache::{Cache, CacheConfig};
use tracing::{debug, info};

use super::definition::{InheritedField, Model, ModelDefinition, LOG_ACCESS_FIELDS};
use super::hooks::WorkflowHook;
use crate::backends::{self, DatabasePool, SqlDialect};
use crate::config::OrmConfig;
use crate::context::Context;
use crate::error::{ModelError, OrmResult};
use crate::fields::{Field, FieldKind};
use crate::security::validate_identifier;
use crate::transaction::{Transaction, TransactionConfig, ROOT_USER};

static MEMORY_DATABASES: AtomicUsize = AtomicUsize::new(0);

fn database_name(url: &str) -> String {
    if url.contains(":memory:") || url.contains("mode=memory") {
        let n = MEMORY_DATABASES.fetch_add(1, Ordering::SeqCst);
        return format!("memory-{}", n);
    }
    let without_query = url.split('?').next().unwrap_or(url);
    without_query
        .rsplit(['/', ':'])
        .find(|part| !part.is_empty())
        .unwrap_or(without_query)
        .to_string()
}

pub struct RegistryBuilder {
    config: OrmConfig,
    definitions: Vec<ModelDefinition>,
    workflow: Option<Arc<dyn WorkflowHook>>,
    cache: Option<Cache>,
    database: Option<String>,
}

impl RegistryBuilder {
    pub fn model(mut self, definition: ModelDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn models<I>(mut self, definitions: I) -> Self
    where
        I: IntoIterator<Item = ModelDefinition>,
    {
        self.definitions.extend(definitions);
        self
    }

    /// Register the workflow engine; its models are installed too
    pub fn with_workflow(mut self, hook: Arc<dyn WorkflowHook>) -> Self {
        self.workflow = Some(hook);
        self
    }

    /// Share a process cache between registries
    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Name keying this database in the process cache
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    /// Merge, freeze and cross-check the definitions without connecting
    pub fn build_models(&self) -> OrmResult<HashMap<String, Arc<Model>>> {
        let mut definitions = crate::ir::definitions();
        if let Some(hook) = &self.workflow {
            definitions.extend(hook.models());
        }
        definitions.extend(self.definitions.iter().cloned());
        let (models, _) = resolve(definitions, self.config.log_access)?;
        Ok(models)
    }

    /// Connect, synchronize the schema and install the base records
    pub async fn load(self) -> OrmResult<Arc<Registry>> {
        self.config.validate()?;
        let mut definitions = crate::ir::definitions();
        if let Some(hook) = &self.workflow {
            definitions.extend(hook.models());
        }
        definitions.extend(self.definitions);
        let (models, names) = resolve(definitions, self.config.log_access)?;

        let pool = backends::connect(&self.config.database_url, &self.config.pool).await?;
        let database = self
            .database
            .unwrap_or_else(|| database_name(&self.config.database_url));
        let cache = self
            .cache
            .unwrap_or_else(|| Cache::new(CacheConfig::default()));

        for model in models.values() {
            for name in &model.caches {
                cache.bind(&model.name, name);
            }
        }

        let registry = Arc::new(Registry {
            dialect: pool.dialect(),
            database,
            config: self.config,
            pool,
            models,
            names,
            cache,
            workflow: self.workflow,
        });

        let mut tx = registry.begin(ROOT_USER, Context::new()).await?;
        tx.synchronize_schema().await?;
        crate::ir::install(&mut tx).await?;
        tx.commit().await?;

        info!(
            "Registry for '{}' loaded with {} models",
            registry.database,
            registry.names.len()
        );
        Ok(registry)
    }
}

pub struct Registry {
    database: String,
    config: OrmConfig,
    pool: Arc<dyn DatabasePool>,
    dialect: SqlDialect,
    models: HashMap<String, Arc<Model>>,
    /// Model names in registration order
    names: Vec<String>,
    cache: Cache,
    workflow: Option<Arc<dyn WorkflowHook>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("database", &self.database)
            .field("dialect", &self.dialect)
            .field("models", &self.names)
            .finish()
    }
}

impl Registry {
    pub fn builder(config: OrmConfig) -> RegistryBuilder {
        RegistryBuilder {
            config,
            definitions: Vec::new(),
            workflow: None,
            cache: None,
            database: None,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn pool(&self) -> &Arc<dyn DatabasePool> {
        &self.pool
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn workflow(&self) -> Option<&Arc<dyn WorkflowHook>> {
        self.workflow.as_ref()
    }

    pub fn model(&self, name: &str) -> OrmResult<Arc<Model>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::unknown_model(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Model names in registration order
    pub fn model_names(&self) -> &[String] {
        &self.names
    }

    pub fn models(&self) -> impl Iterator<Item = Arc<Model>> + '_ {
        self.names.iter().filter_map(|n| self.models.get(n).cloned())
    }

    /// Stored many2one fields of any model pointing to `target`
    pub fn referencing(&self, target: &str) -> Vec<(Arc<Model>, Arc<crate::fields::Field>)> {
        let mut found = Vec::new();
        for model in self.models() {
            for field in model.stored_fields() {
                if matches!(&field.kind, FieldKind::Many2One(m2o) if m2o.relation == target) {
                    found.push((model.clone(), field.clone()));
                }
            }
        }
        found
    }

    /// Start a request. Every cache of the database is dropped first.
    pub async fn begin(self: &Arc<Self>, user: i64, context: Context) -> OrmResult<Transaction> {
        self.begin_with(user, context, TransactionConfig::default()).await
    }

    pub async fn begin_with(
        self: &Arc<Self>,
        user: i64,
        context: Context,
        config: TransactionConfig,
    ) -> OrmResult<Transaction> {
        self.cache.clear(&self.database);
        Transaction::begin(self.clone(), user, context, config).await
    }

    /// Drop the caches of the database and close the pool
    pub async fn close(&self) -> OrmResult<()> {
        self.cache.clear(&self.database);
        self.pool.close().await?;
        info!("Registry for '{}' closed", self.database);
        Ok(())
    }
}

/// Merge the definitions by name and freeze them
fn resolve(
    definitions: Vec<ModelDefinition>,
    log_access: bool,
) -> OrmResult<(HashMap<String, Arc<Model>>, Vec<String>)> {
    let mut merged: Vec<ModelDefinition> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for definition in definitions {
        let definition = match definition.inherit.clone() {
            Some(base) if base != definition.name => {
                let base = positions.get(&base).map(|i| &merged[*i]).ok_or_else(|| {
                    ModelError::Programming(format!(
                        "Model '{}' inherits unknown model '{}'",
                        definition.name, base
                    ))
                })?;
                ModelDefinition::derive_from(base, definition)
            }
            _ => definition,
        };
        match positions.get(&definition.name) {
            Some(i) => merged[*i].extend(definition),
            None => {
                positions.insert(definition.name.clone(), merged.len());
                merged.push(definition);
            }
        }
    }

    let names: Vec<String> = merged.iter().map(|d| d.name.clone()).collect();
    let mut models: HashMap<String, Model> = HashMap::new();
    for definition in merged {
        let model = definition.freeze(log_access)?;
        models.insert(model.name.clone(), model);
    }

    check_relations(&models)?;

    let mut inherited = HashMap::new();
    for name in &names {
        inherited.insert(name.clone(), inherited_fields(&models, name, 0)?);
    }
    for (name, fields) in inherited {
        if let Some(model) = models.get_mut(&name) {
            model.inherited = fields;
        }
    }

    debug!("Resolved {} models", names.len());
    Ok((
        models.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        names,
    ))
}

fn check_relations(models: &HashMap<String, Model>) -> OrmResult<()> {
    let known = |model: &Model, field: &Field, target: &str| -> OrmResult<()> {
        if models.contains_key(target) {
            Ok(())
        } else {
            Err(ModelError::Programming(format!(
                "Field '{}' of '{}' points to unknown model '{}'",
                field.name, model.name, target
            )))
        }
    };

    for model in models.values() {
        for field in model.fields() {
            match field.kind.value_kind() {
                FieldKind::Many2One(m2o) => known(model, field, &m2o.relation)?,
                FieldKind::One2Many(o2m) => {
                    known(model, field, &o2m.relation)?;
                    if !matches!(field.kind, FieldKind::One2Many(_)) {
                        continue;
                    }
                    let reverse = models[&o2m.relation].field(&o2m.field);
                    if !matches!(reverse.map(|f| &f.kind), Some(FieldKind::Many2One(_))) {
                        return Err(ModelError::Programming(format!(
                            "One2many '{}' of '{}' needs many2one '{}' on '{}'",
                            field.name, model.name, o2m.field, o2m.relation
                        )));
                    }
                }
                FieldKind::Many2Many(m2m) => {
                    known(model, field, &m2m.relation)?;
                    validate_identifier(&m2m.table)?;
                    validate_identifier(&m2m.origin)?;
                    validate_identifier(&m2m.target)?;
                }
                _ => {}
            }
        }
        for (parent, link) in &model.inherits {
            if !models.contains_key(parent) {
                return Err(ModelError::Programming(format!(
                    "Model '{}' inherits unknown model '{}'",
                    model.name, parent
                )));
            }
            if model.field(link).and_then(|f| f.many2one_info()).is_none() {
                return Err(ModelError::Programming(format!(
                    "Model '{}' delegates through '{}' which is not a many2one",
                    model.name, link
                )));
            }
        }
    }
    Ok(())
}

fn inherited_fields(
    models: &HashMap<String, Model>,
    name: &str,
    depth: usize,
) -> OrmResult<HashMap<String, InheritedField>> {
    if depth > 8 {
        return Err(ModelError::Programming(format!(
            "Delegation loop through '{}'",
            name
        )));
    }
    let model = &models[name];
    let mut result = HashMap::new();
    for (parent_name, link) in &model.inherits {
        let parent = &models[parent_name];
        let mut candidates: Vec<Arc<Field>> = parent.fields().cloned().collect();
        candidates.extend(
            inherited_fields(models, parent_name, depth + 1)?
                .into_values()
                .map(|i| i.field),
        );
        for field in candidates {
            if field.name == "id"
                || LOG_ACCESS_FIELDS.contains(&field.name.as_str())
                || model.field(&field.name).is_some()
                || result.contains_key(&field.name)
            {
                continue;
            }
            result.insert(
                field.name.clone(),
                InheritedField {
                    parent: parent_name.clone(),
                    link: link.clone(),
                    field,
                },
            );
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(defs: Vec<ModelDefinition>) -> OrmResult<HashMap<String, Arc<Model>>> {
        Registry::builder(OrmConfig::default()).models(defs).build_models()
    }

    #[test]
    fn test_database_names() {
        assert_eq!(database_name("postgres://u:p@localhost/erp"), "erp");
        assert_eq!(database_name("sqlite://data/erp.db"), "erp.db");
        assert_ne!(database_name("sqlite::memory:"), database_name("sqlite::memory:"));
    }

    #[test]
    fn test_unknown_relation_is_a_programming_error() {
        let result = build(vec![
            ModelDefinition::new("test.a").field("b", Field::many2one("B", "test.missing"))
        ]);
        assert!(matches!(result, Err(ModelError::Programming(_))));
    }

    #[test]
    fn test_one2many_needs_reverse_field() {
        let result = build(vec![
            ModelDefinition::new("test.parent")
                .field("children", Field::one2many("Children", "test.child", "parent")),
            ModelDefinition::new("test.child").field("name", Field::char("Name")),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_delegated_fields() {
        let models = build(vec![
            ModelDefinition::new("test.party").field("name", Field::char("Name")),
            ModelDefinition::new("test.employee")
                .inherits("test.party", "party")
                .field("badge", Field::char("Badge")),
            ModelDefinition::new("test.manager")
                .inherits("test.employee", "employee")
                .field("level", Field::integer("Level")),
        ])
        .unwrap();
        let manager = &models["test.manager"];
        let name = manager.inherited_field("name").unwrap();
        assert_eq!(name.parent, "test.employee");
        assert_eq!(name.link, "employee");
        assert!(manager.inherited_field("badge").is_some());
        assert!(manager.inherited_field("create_uid").is_none());
    }

    #[test]
    fn test_inherit_copies_base() {
        let models = build(vec![
            ModelDefinition::new("test.base").field("name", Field::char("Name")),
            ModelDefinition::new("test.derived")
                .inherit("test.base")
                .field("extra", Field::integer("Extra")),
        ])
        .unwrap();
        let derived = &models["test.derived"];
        assert_eq!(derived.table, "test_derived");
        assert!(derived.field("name").is_some());
        assert!(models["test.base"].field("extra").is_none());
    }
}
