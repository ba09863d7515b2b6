//! Suite configuration.
//!
//! Configuration arrives as TOML text (the runner decides where it comes
//! from) and is parsed into [`Configuration`].
//!
//! # Example
//!
//! ```toml
//! [databases.psql]
//! table_manager_type = "relational"
//! skip_create_schema = false
//!
//! [databases.psql.properties]
//! url = "memory://psql"
//!
//! [databases.warehouse]
//! # table_manager_type defaults to "read_only"
//!
//! [command]
//! suite = ["true"]
//! test = []
//!
//! [properties]
//! region = "eu"
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TestbedError};
use crate::table::READ_ONLY_TYPE_TAG;

// ── Types ─────────────────────────────────────────────────────────────────────

/// Top-level suite configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Databases keyed by name; each gets one table manager.
    pub databases: BTreeMap<String, DatabaseConfig>,
    /// Shell commands run before the suite and before each test.
    pub command: CommandConfig,
    /// Free-form values for requirement providers.
    pub properties: BTreeMap<String, String>,
}

/// `[databases.<name>]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Selects the table manager implementation, case-insensitive.
    pub table_manager_type: String,
    /// Skip `CREATE SCHEMA IF NOT EXISTS` before creating schema-qualified tables.
    pub skip_create_schema: bool,
    /// Backend-specific settings (connection URL and so on).
    pub properties: BTreeMap<String, String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            table_manager_type: READ_ONLY_TYPE_TAG.to_string(),
            skip_create_schema: false,
            properties: BTreeMap::new(),
        }
    }
}

impl DatabaseConfig {
    pub fn with_type(table_manager_type: impl Into<String>) -> Self {
        Self {
            table_manager_type: table_manager_type.into(),
            ..Self::default()
        }
    }
}

/// `[command]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub suite: Vec<String>,
    pub test: Vec<String>,
}

// ── Functions ─────────────────────────────────────────────────────────────────

impl Configuration {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TestbedError::Config(e.to_string()))
    }

    pub fn with_database(mut self, name: impl Into<String>, database: DatabaseConfig) -> Self {
        self.databases.insert(name.into(), database);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.get(name)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Every configured value under its dotted key, e.g.
    /// `databases.psql.table_manager_type`.
    pub fn list_keys(&self) -> BTreeMap<String, String> {
        let mut keys = BTreeMap::new();
        for (name, db) in &self.databases {
            keys.insert(
                format!("databases.{name}.table_manager_type"),
                db.table_manager_type.clone(),
            );
            keys.insert(
                format!("databases.{name}.skip_create_schema"),
                db.skip_create_schema.to_string(),
            );
            for (key, value) in &db.properties {
                keys.insert(format!("databases.{name}.properties.{key}"), value.clone());
            }
        }
        if !self.command.suite.is_empty() {
            keys.insert("command.suite".to_string(), self.command.suite.join(", "));
        }
        if !self.command.test.is_empty() {
            keys.insert("command.test".to_string(), self.command.test.join(", "));
        }
        for (key, value) in &self.properties {
            keys.insert(format!("properties.{key}"), value.clone());
        }
        keys
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.list_keys().remove(key)
    }
}
