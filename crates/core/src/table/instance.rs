//! Created tables and the per-pass collections that hold them.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{Result, TestbedError};
use crate::table::{TableDefinition, TableHandle, TableName};

/// A live table created by a table manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInstance {
    name: TableName,
    definition: Arc<TableDefinition>,
}

impl TableInstance {
    pub fn new(name: TableName, definition: Arc<TableDefinition>) -> Self {
        Self { name, definition }
    }

    pub fn table_name(&self) -> &TableName {
        &self.name
    }

    pub fn definition(&self) -> &Arc<TableDefinition> {
        &self.definition
    }

    pub fn name(&self) -> &str {
        self.name.name()
    }

    pub fn database(&self) -> &str {
        self.name.database()
    }

    pub fn schema(&self) -> Option<&str> {
        self.name.schema()
    }

    pub fn name_in_database(&self) -> String {
        self.name.name_in_database()
    }
}

/// Tables produced by one fulfillment pass, queryable by handle.
#[derive(Debug, Clone)]
pub struct TablesState {
    description: &'static str,
    tables: Vec<TableInstance>,
}

impl TablesState {
    pub fn new(description: &'static str, tables: Vec<TableInstance>) -> Self {
        Self {
            description,
            tables,
        }
    }

    /// The single table matching `handle`.
    pub fn get(&self, handle: &TableHandle) -> Result<&TableInstance> {
        let found: Vec<&TableInstance> =
            self.tables.iter().filter(|t| matches(t, handle)).collect();
        match found.as_slice() {
            [] => Err(TestbedError::TableNotFound {
                description: self.description.to_string(),
                handle: handle.clone(),
            }),
            [only] => Ok(only),
            many => Err(TestbedError::AmbiguousTable {
                description: self.description.to_string(),
                handle: handle.clone(),
                candidates: many.iter().map(|t| t.table_name().to_string()).collect(),
            }),
        }
    }

    pub fn get_by_name(&self, name: &str) -> Result<&TableInstance> {
        self.get(&TableHandle::new(name))
    }

    pub fn get_for(&self, definition: &TableDefinition) -> Result<&TableInstance> {
        self.get(definition.handle())
    }

    pub fn table_names(&self, database: &str) -> Vec<TableName> {
        self.tables
            .iter()
            .filter(|t| t.database().eq_ignore_ascii_case(database))
            .map(|t| t.table_name().clone())
            .collect()
    }

    /// Logical name to physical name for every table in `database`.
    pub fn name_in_database_map(&self, database: &str) -> BTreeMap<String, String> {
        self.table_names(database)
            .into_iter()
            .map(|n| (n.name().to_string(), n.name_in_database()))
            .collect()
    }

    pub fn database_names(&self) -> BTreeSet<String> {
        self.tables.iter().map(|t| t.database().to_string()).collect()
    }

    pub fn tables(&self) -> &[TableInstance] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn matches(table: &TableInstance, handle: &TableHandle) -> bool {
    if !table.name().eq_ignore_ascii_case(handle.name()) {
        return false;
    }
    match (handle.schema(), table.schema()) {
        (Some(wanted), Some(actual)) if !wanted.eq_ignore_ascii_case(actual) => return false,
        (Some(_), None) => return false,
        (None, Some(_)) if handle.requires_no_schema() => return false,
        _ => {}
    }
    handle
        .database()
        .map_or(true, |db| db.eq_ignore_ascii_case(table.database()))
}

macro_rules! tables_state_newtype {
    ($(#[$doc:meta])* $name:ident, $description:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name(TablesState);

        impl $name {
            pub fn new(tables: Vec<TableInstance>) -> Self {
                Self(TablesState::new($description, tables))
            }
        }

        impl Deref for $name {
            type Target = TablesState;

            fn deref(&self) -> &TablesState {
                &self.0
            }
        }
    };
}

tables_state_newtype!(
    /// Suite-scoped tables created by the immutable tables fulfiller.
    ImmutableTablesState,
    "immutable table"
);

tables_state_newtype!(
    /// Test-scoped tables created by the mutable tables fulfiller.
    MutableTablesState,
    "mutable table"
);
