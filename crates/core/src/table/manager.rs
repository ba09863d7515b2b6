//! The backend contract for creating and dropping tables.

use std::sync::Arc;

use crate::error::{Result, TestbedError};
use crate::requirement::MutableTableState;
use crate::table::{TableDefinition, TableHandle, TableInstance, TableName, TableNameGenerator};

/// A database-specific table manager.
///
/// One manager exists per configured database. Managers are shared across
/// test threads for the lifetime of a suite, so every method takes `&self`;
/// implementations guard their connection internally.
pub trait TableManager: Send + Sync {
    /// Create (or reuse) a suite-scoped table under its logical name.
    fn create_immutable(
        &self,
        definition: &Arc<TableDefinition>,
        handle: &TableHandle,
    ) -> Result<TableInstance>;

    /// Create a test-scoped table under a generated name.
    fn create_mutable(
        &self,
        definition: &Arc<TableDefinition>,
        state: MutableTableState,
        handle: &TableHandle,
    ) -> Result<TableInstance>;

    fn drop_table(&self, name: &TableName) -> Result<()>;

    /// Drop leftover mutable tables from earlier crashed runs. Runs at most
    /// once per manager instance; errors are swallowed per table.
    fn drop_stale_mutable_tables(&self);

    fn database_name(&self) -> &str;

    /// Definition kind this manager handles.
    fn definition_kind(&self) -> &str;

    /// Configuration tag that selects this manager type.
    fn type_tag(&self) -> &str;

    fn close(&self) {}
}

/// Physical name for an immutable table: the logical name itself.
pub fn immutable_table_name(manager_database: &str, handle: &TableHandle) -> TableName {
    TableName::new(
        handle.database().unwrap_or(manager_database),
        handle.schema().map(str::to_string),
        handle.name(),
        handle.name(),
    )
}

/// Physical name for a mutable table: a fresh generated name.
pub fn mutable_table_name(
    manager_database: &str,
    handle: &TableHandle,
    generator: &TableNameGenerator,
) -> TableName {
    TableName::new(
        handle.database().unwrap_or(manager_database),
        handle.schema().map(str::to_string),
        handle.name(),
        generator.generate_mutable_name(handle.name()),
    )
}

/// Type tag of [`ReadOnlyTableManager`], the default for unconfigured databases.
pub const READ_ONLY_TYPE_TAG: &str = "read_only";

/// Definition kind owned by [`ReadOnlyTableManager`]. No real definition
/// uses it, so read-only databases never compete in dispatch.
pub const READ_ONLY_DEFINITION_KIND: &str = "read_only";

/// A manager for databases that must never be written to.
#[derive(Debug, Clone)]
pub struct ReadOnlyTableManager {
    database: String,
}

impl ReadOnlyTableManager {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }

    fn refuse<T>(&self, operation: String) -> Result<T> {
        Err(TestbedError::ReadOnly {
            database: self.database.clone(),
            operation,
        })
    }
}

impl TableManager for ReadOnlyTableManager {
    fn create_immutable(
        &self,
        _definition: &Arc<TableDefinition>,
        handle: &TableHandle,
    ) -> Result<TableInstance> {
        self.refuse(format!("create immutable table {handle}"))
    }

    fn create_mutable(
        &self,
        _definition: &Arc<TableDefinition>,
        _state: MutableTableState,
        handle: &TableHandle,
    ) -> Result<TableInstance> {
        self.refuse(format!("create mutable table {handle}"))
    }

    fn drop_table(&self, name: &TableName) -> Result<()> {
        self.refuse(format!("drop table {name}"))
    }

    fn drop_stale_mutable_tables(&self) {}

    fn database_name(&self) -> &str {
        &self.database
    }

    fn definition_kind(&self) -> &str {
        READ_ONLY_DEFINITION_KIND
    }

    fn type_tag(&self) -> &str {
        READ_ONLY_TYPE_TAG
    }
}
