//! Selecting the table manager responsible for a definition.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, TestbedError};
use crate::table::{TableDefinition, TableHandle, TableManager};

/// Table managers keyed by database name.
///
/// Built once per suite and read-only afterwards. Iteration order is the
/// database name order, so every query over it is deterministic.
#[derive(Clone, Default)]
pub struct TableManagerDispatcher {
    managers: BTreeMap<String, Arc<dyn TableManager>>,
}

impl std::fmt::Debug for TableManagerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.managers
                    .iter()
                    .map(|(db, m)| (db, (m.type_tag(), m.definition_kind()))),
            )
            .finish()
    }
}

impl TableManagerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `manager` under its database name, replacing any previous one.
    pub fn register(&mut self, manager: Arc<dyn TableManager>) {
        let database = manager.database_name().to_string();
        if self.managers.insert(database.clone(), manager).is_some() {
            warn!(database = %database, "replacing table manager");
        }
    }

    pub fn with_manager(mut self, manager: Arc<dyn TableManager>) -> Self {
        self.register(manager);
        self
    }

    /// Resolve the manager that creates tables of `definition` for `handle`.
    ///
    /// A single manager for the definition kind wins regardless of the
    /// handle's database. With several candidates the handle must name one.
    pub fn resolve(
        &self,
        definition: &TableDefinition,
        handle: &TableHandle,
    ) -> Result<Arc<dyn TableManager>> {
        let kind = definition.kind();
        let candidates: Vec<(&String, &Arc<dyn TableManager>)> = self
            .managers
            .iter()
            .filter(|(_, m)| m.definition_kind() == kind)
            .collect();

        match candidates.as_slice() {
            [] => Err(TestbedError::NoTableManager {
                handle: handle.clone(),
                kind: kind.to_string(),
            }),
            [(_, only)] => Ok(Arc::clone(only)),
            many => {
                let Some(database) = handle.database() else {
                    return Err(TestbedError::AmbiguousTableManager {
                        handle: handle.clone(),
                        kind: kind.to_string(),
                        databases: many.iter().map(|(db, _)| (*db).clone()).collect(),
                    });
                };
                let manager =
                    self.managers
                        .get(database)
                        .ok_or_else(|| TestbedError::UnknownDatabase {
                            handle: handle.clone(),
                            database: database.to_string(),
                        })?;
                if manager.definition_kind() != kind {
                    return Err(TestbedError::DefinitionKindMismatch {
                        handle: handle.clone(),
                        database: database.to_string(),
                        expected: kind.to_string(),
                        actual: manager.definition_kind().to_string(),
                    });
                }
                debug!(table = %handle, database, "resolved table manager");
                Ok(Arc::clone(manager))
            }
        }
    }

    pub fn manager_for(&self, database: &str) -> Option<Arc<dyn TableManager>> {
        self.managers.get(database).cloned()
    }

    pub fn all_managers(&self) -> impl Iterator<Item = &Arc<dyn TableManager>> {
        self.managers.values()
    }

    pub fn database_names(&self) -> Vec<String> {
        self.managers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Close every manager. Called once, after all cleanup has finished.
    pub fn close_all(&self) {
        for (database, manager) in &self.managers {
            debug!(database = %database, "closing table manager");
            manager.close();
        }
    }
}
