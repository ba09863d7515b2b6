//! Builder for relational table definitions.

use testbed_core::table::{DataValue, NAME_MARKER};
use testbed_core::{Result, TableDefinition, TableHandle, TestbedError};

/// Definition kind handled by [`crate::RelationalTableManager`].
pub const RELATIONAL_DEFINITION_KIND: &str = "relational";

/// Builds a [`TableDefinition`] of kind [`RELATIONAL_DEFINITION_KIND`].
///
/// ```
/// use testbed_core::table::DataValue;
/// use testbed_sql::RelationalDefinitionBuilder;
///
/// let nation = RelationalDefinitionBuilder::new("nation")
///     .create_template("CREATE TABLE %NAME% (n_nationkey BIGINT, n_name VARCHAR(25))")
///     .row([DataValue::Int(0), DataValue::from("ALGERIA")])
///     .build()
///     .unwrap();
/// assert_eq!(nation.rows().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct RelationalDefinitionBuilder {
    handle: TableHandle,
    create_template: Option<String>,
    rows: Vec<Vec<DataValue>>,
}

impl RelationalDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            handle: TableHandle::new(name),
            create_template: None,
            rows: Vec::new(),
        }
    }

    /// Default schema of the table.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.handle = self.handle.in_schema(schema);
        self
    }

    /// DDL with `%NAME%` where the physical table name goes.
    pub fn create_template(mut self, template: impl Into<String>) -> Self {
        self.create_template = Some(template.into());
        self
    }

    pub fn row(mut self, row: impl IntoIterator<Item = DataValue>) -> Self {
        self.rows.push(row.into_iter().collect());
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Vec<DataValue>>) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn build(self) -> Result<TableDefinition> {
        let Some(template) = self.create_template else {
            return Err(TestbedError::Config(format!(
                "table definition {} has no create template",
                self.handle
            )));
        };
        if !template.contains(NAME_MARKER) {
            return Err(TestbedError::Config(format!(
                "create template of {} does not contain {NAME_MARKER}",
                self.handle
            )));
        }
        if let Some(first) = self.rows.first() {
            if let Some(row) = self.rows.iter().position(|r| r.len() != first.len()) {
                return Err(TestbedError::Config(format!(
                    "row {row} of {} has {} values, expected {}",
                    self.handle,
                    self.rows[row].len(),
                    first.len()
                )));
            }
        }
        Ok(TableDefinition::new(
            self.handle,
            RELATIONAL_DEFINITION_KIND,
            template,
            self.rows,
        ))
    }
}
