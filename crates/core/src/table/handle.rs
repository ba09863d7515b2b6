//! Abstract table identity: database, schema and logical name.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TestbedError};

/// Identifies a table independently of its physical name in a database.
///
/// A handle without a schema matches a table in any schema unless it is
/// built with [`TableHandle::with_no_schema`], which requires the table to
/// have no schema at all. The two settings are mutually exclusive and the
/// builder methods keep them so.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableHandle {
    database: Option<String>,
    schema: Option<String>,
    name: String,
    no_schema: bool,
}

impl TableHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            database: None,
            schema: None,
            name: name.into(),
            no_schema: false,
        }
    }

    /// Parse `name`, `schema.name` or `database.schema.name`.
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(TestbedError::InvalidTableHandle {
                text: text.to_string(),
                reason: "empty name segment".to_string(),
            });
        }
        match parts.as_slice() {
            [name] => Ok(Self::new(*name)),
            [schema, name] => Ok(Self::new(*name).in_schema(*schema)),
            [database, schema, name] => Ok(Self::new(*name)
                .in_database(*database)
                .in_schema(*schema)),
            _ => Err(TestbedError::InvalidTableHandle {
                text: text.to_string(),
                reason: "expected at most two occurrences of '.'".to_string(),
            }),
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            no_schema: false,
            ..self.clone()
        }
    }

    /// Pin the handle to a database. The no-schema requirement is kept.
    pub fn in_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            ..self.clone()
        }
    }

    pub fn in_schema(&self, schema: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            no_schema: false,
            ..self.clone()
        }
    }

    pub fn with_no_schema(&self) -> Self {
        Self {
            schema: None,
            no_schema: true,
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn requires_no_schema(&self) -> bool {
        self.no_schema
    }
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(db) = &self.database {
            write!(f, "{db}.")?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{schema}.")?;
        }
        write!(f, "{}", self.name)?;
        if self.no_schema {
            write!(f, " (no schema)")?;
        }
        Ok(())
    }
}
