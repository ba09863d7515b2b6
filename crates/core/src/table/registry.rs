//! Configuration-driven construction of table managers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::{Configuration, DatabaseConfig};
use crate::error::{Result, TestbedError};
use crate::table::{ReadOnlyTableManager, TableManager, TableManagerDispatcher, READ_ONLY_TYPE_TAG};

/// Builds a manager for one configured database.
pub type TableManagerFactory =
    Arc<dyn Fn(&str, &DatabaseConfig) -> Result<Arc<dyn TableManager>> + Send + Sync>;

/// Table manager factories keyed by lower-cased type tag.
///
/// The read-only manager is always registered.
#[derive(Clone)]
pub struct TableManagerRegistry {
    factories: BTreeMap<String, TableManagerFactory>,
}

impl std::fmt::Debug for TableManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableManagerRegistry")
            .field("types", &self.type_tags())
            .finish()
    }
}

impl Default for TableManagerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register(READ_ONLY_TYPE_TAG, |database, _config| {
            Ok(Arc::new(ReadOnlyTableManager::new(database)) as Arc<dyn TableManager>)
        });
        registry
    }
}

impl TableManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_tag: &str, factory: F)
    where
        F: Fn(&str, &DatabaseConfig) -> Result<Arc<dyn TableManager>> + Send + Sync + 'static,
    {
        self.factories
            .insert(type_tag.to_lowercase(), Arc::new(factory));
    }

    pub fn with<F>(mut self, type_tag: &str, factory: F) -> Self
    where
        F: Fn(&str, &DatabaseConfig) -> Result<Arc<dyn TableManager>> + Send + Sync + 'static,
    {
        self.register(type_tag, factory);
        self
    }

    pub fn type_tags(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build one manager per configured database.
    ///
    /// If any database fails, the managers built so far are closed before
    /// the error is returned.
    pub fn build_dispatcher(&self, config: &Configuration) -> Result<TableManagerDispatcher> {
        let mut dispatcher = TableManagerDispatcher::new();
        for (database, db_config) in &config.databases {
            match self.build_manager(database, db_config) {
                Ok(manager) => dispatcher.register(manager),
                Err(err) => {
                    dispatcher.close_all();
                    return Err(err);
                }
            }
        }
        Ok(dispatcher)
    }

    fn build_manager(
        &self,
        database: &str,
        db_config: &DatabaseConfig,
    ) -> Result<Arc<dyn TableManager>> {
        let type_tag = db_config.table_manager_type.to_lowercase();
        let factory = self
            .factories
            .get(&type_tag)
            .ok_or_else(|| TestbedError::UnknownTableManagerType {
                type_tag: db_config.table_manager_type.clone(),
                database: database.to_string(),
                known: self.type_tags(),
            })?;
        debug!(database = %database, type_tag = %type_tag, "creating table manager");
        factory(database, db_config)
    }
}
