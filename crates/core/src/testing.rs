//! In-memory doubles for exercising the lifecycle without a database.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, TestbedError};
use crate::requirement::MutableTableState;
use crate::table::{
    immutable_table_name, mutable_table_name, StaleTableSweep, TableDefinition, TableHandle,
    TableInstance, TableManager, TableName, TableNameGenerator,
};

/// Something a [`RecordingTableManager`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEvent {
    CreatedImmutable(TableName),
    CreatedMutable(TableName, MutableTableState),
    Dropped(TableName),
    SweptStaleTables,
    Closed,
}

#[derive(Debug, thiserror::Error)]
#[error("injected failure: {0}")]
struct InjectedFailure(String);

/// A table manager that records calls instead of touching a database.
///
/// Creates and drops can be made to fail for chosen logical table names.
#[derive(Debug)]
pub struct RecordingTableManager {
    database: String,
    kind: String,
    events: Mutex<Vec<TableEvent>>,
    fail_create: BTreeSet<String>,
    fail_drop: BTreeSet<String>,
    sweep: StaleTableSweep,
    closed: AtomicBool,
    generator: TableNameGenerator,
}

impl RecordingTableManager {
    pub const TYPE_TAG: &'static str = "recording";

    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            kind: "relational".to_string(),
            events: Mutex::new(Vec::new()),
            fail_create: BTreeSet::new(),
            fail_drop: BTreeSet::new(),
            sweep: StaleTableSweep::new(),
            closed: AtomicBool::new(false),
            generator: TableNameGenerator,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn failing_create_of(mut self, table: impl Into<String>) -> Self {
        self.fail_create.insert(table.into());
        self
    }

    pub fn failing_drop_of(mut self, table: impl Into<String>) -> Self {
        self.fail_drop.insert(table.into());
        self
    }

    fn record(&self, event: TableEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    fn check_create(&self, handle: &TableHandle) -> Result<()> {
        if self.fail_create.contains(handle.name()) {
            return Err(TestbedError::backend(
                &self.database,
                InjectedFailure(format!("create {}", handle.name())),
            ));
        }
        Ok(())
    }

    pub fn events(&self) -> Vec<TableEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn created_immutable(&self) -> Vec<TableName> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TableEvent::CreatedImmutable(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn created_mutable(&self) -> Vec<(TableName, MutableTableState)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TableEvent::CreatedMutable(n, s) => Some((n, s)),
                _ => None,
            })
            .collect()
    }

    pub fn dropped(&self) -> Vec<TableName> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TableEvent::Dropped(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn sweep_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TableEvent::SweptStaleTables))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl TableManager for RecordingTableManager {
    fn create_immutable(
        &self,
        definition: &Arc<TableDefinition>,
        handle: &TableHandle,
    ) -> Result<TableInstance> {
        self.check_create(handle)?;
        let name = immutable_table_name(&self.database, handle);
        self.record(TableEvent::CreatedImmutable(name.clone()));
        Ok(TableInstance::new(name, Arc::clone(definition)))
    }

    fn create_mutable(
        &self,
        definition: &Arc<TableDefinition>,
        state: MutableTableState,
        handle: &TableHandle,
    ) -> Result<TableInstance> {
        self.check_create(handle)?;
        let name = mutable_table_name(&self.database, handle, &self.generator);
        self.record(TableEvent::CreatedMutable(name.clone(), state));
        Ok(TableInstance::new(name, Arc::clone(definition)))
    }

    fn drop_table(&self, name: &TableName) -> Result<()> {
        if self.fail_drop.contains(name.name()) {
            return Err(TestbedError::backend(
                &self.database,
                InjectedFailure(format!("drop {}", name.name_in_database())),
            ));
        }
        self.record(TableEvent::Dropped(name.clone()));
        Ok(())
    }

    fn drop_stale_mutable_tables(&self) {
        self.sweep
            .run_once(|| self.record(TableEvent::SweptStaleTables));
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    fn definition_kind(&self) -> &str {
        &self.kind
    }

    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.record(TableEvent::Closed);
    }
}
