//! Table definitions and the process-wide definitions repository.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TestbedError};
use crate::table::TableHandle;

/// Marker replaced by the physical table name in create templates.
pub const NAME_MARKER: &str = "%NAME%";

/// A single cell of table data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "null"),
            DataValue::Bool(b) => write!(f, "{b}"),
            DataValue::Int(i) => write!(f, "{i}"),
            DataValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Int(v)
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Bool(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::Text(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::Text(v)
    }
}

/// Static description of a table: default identity, definition kind, DDL
/// template and the rows loaded when the table is populated.
///
/// `kind` takes the place of a runtime definition class. Each table manager
/// declares the kind it handles and dispatch matches on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableDefinition {
    handle: TableHandle,
    kind: String,
    create_template: String,
    rows: Vec<Vec<DataValue>>,
}

impl TableDefinition {
    pub fn new(
        handle: TableHandle,
        kind: impl Into<String>,
        create_template: impl Into<String>,
        rows: Vec<Vec<DataValue>>,
    ) -> Self {
        Self {
            handle,
            kind: kind.into(),
            create_template: create_template.into(),
            rows,
        }
    }

    pub fn handle(&self) -> &TableHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn create_template(&self) -> &str {
        &self.create_template
    }

    /// The create template with [`NAME_MARKER`] replaced by `name_in_database`.
    pub fn create_statement(&self, name_in_database: &str) -> String {
        self.create_template.replace(NAME_MARKER, name_in_database)
    }

    pub fn rows(&self) -> &[Vec<DataValue>] {
        &self.rows
    }
}

// ──────────────────────────────────────────────
// Repository
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DefinitionKey {
    name: String,
    schema: Option<String>,
}

impl DefinitionKey {
    fn of(handle: &TableHandle) -> Self {
        Self {
            name: handle.name().to_string(),
            schema: handle.schema().map(str::to_string),
        }
    }

    fn name_only(&self) -> Self {
        Self {
            name: self.name.clone(),
            schema: None,
        }
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Table definitions keyed by `(name, schema)`.
///
/// Populated at start-up and read-only afterwards. The lock only serialises
/// registration; a duplicate key is always rejected.
#[derive(Debug, Default)]
pub struct TableDefinitionsRepository {
    definitions: RwLock<BTreeMap<DefinitionKey, Arc<TableDefinition>>>,
}

impl TableDefinitionsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide repository shared by code that has no context at hand.
    pub fn global() -> &'static TableDefinitionsRepository {
        static GLOBAL: OnceLock<TableDefinitionsRepository> = OnceLock::new();
        GLOBAL.get_or_init(TableDefinitionsRepository::new)
    }

    pub fn register(&self, definition: TableDefinition) -> Result<Arc<TableDefinition>> {
        let key = DefinitionKey::of(definition.handle());
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if definitions.contains_key(&key) {
            return Err(TestbedError::DuplicateTableDefinition {
                key: key.to_string(),
            });
        }
        let definition = Arc::new(definition);
        definitions.insert(key, Arc::clone(&definition));
        Ok(definition)
    }

    /// Look up by full `(name, schema)` key, then by name alone.
    pub fn get(&self, handle: &TableHandle) -> Result<Arc<TableDefinition>> {
        let key = DefinitionKey::of(handle);
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        definitions
            .get(&key)
            .or_else(|| definitions.get(&key.name_only()))
            .cloned()
            .ok_or_else(|| TestbedError::UnknownTableDefinition {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, handle: &TableHandle) -> bool {
        self.get(handle).is_ok()
    }

    pub fn len(&self) -> usize {
        self.definitions
            .read()
            .map(|d| d.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
