//! Table identity, naming, definitions, managers and dispatch.

mod definition;
mod dispatch;
mod handle;
mod instance;
mod manager;
mod name;
mod registry;

pub use definition::{DataValue, TableDefinition, TableDefinitionsRepository, NAME_MARKER};
pub use dispatch::TableManagerDispatcher;
pub use handle::TableHandle;
pub use instance::{ImmutableTablesState, MutableTablesState, TableInstance, TablesState};
pub use manager::{
    immutable_table_name, mutable_table_name, ReadOnlyTableManager, TableManager,
    READ_ONLY_DEFINITION_KIND, READ_ONLY_TYPE_TAG,
};
pub use name::{
    is_mutable_name, StaleTableSweep, TableName, TableNameGenerator, MUTABLE_TABLE_PREFIX,
};
pub use registry::{TableManagerFactory, TableManagerRegistry};
