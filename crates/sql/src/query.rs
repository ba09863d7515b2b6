//! The executor contract the relational table manager talks to.

use std::fmt;

use testbed_core::table::DataValue;

/// Errors raised by a [`QueryExecutor`].
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("cannot parse '{sql}': {reason}")]
    Syntax { sql: String, reason: String },

    #[error("table '{table}' does not exist")]
    TableNotFound { table: String },

    #[error("table '{table}' already exists")]
    TableExists { table: String },

    #[error("schema '{schema}' does not exist")]
    SchemaNotFound { schema: String },

    #[error("row {row} has {actual} values, table '{table}' has {expected} columns")]
    ColumnCount {
        table: String,
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("connection is closed")]
    Closed,

    /// The backend rejected the statement for its own reasons.
    #[error("statement rejected: {0}")]
    Rejected(String),
}

/// Rows returned by a query, or the number of rows a statement changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DataValue>>,
    pub updated: Option<u64>,
}

impl QueryResult {
    pub fn updated(count: u64) -> Self {
        Self {
            updated: Some(count),
            ..Self::default()
        }
    }

    pub fn rows(columns: Vec<String>, rows: Vec<Vec<DataValue>>) -> Self {
        Self {
            columns,
            rows,
            updated: None,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The single value of a one-row, one-column result.
    pub fn scalar(&self) -> Option<&DataValue> {
        match self.rows.as_slice() {
            [row] if row.len() == 1 => row.first(),
            _ => None,
        }
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.updated {
            return write!(f, "{n} rows updated");
        }
        writeln!(f, "{}", self.columns.join(" | "))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }
        Ok(())
    }
}

/// A connection to one database.
pub trait QueryExecutor: Send {
    fn execute_query(&mut self, sql: &str) -> Result<QueryResult, QueryError>;

    /// Every table in the database, schema-qualified where a schema applies.
    fn table_names(&mut self) -> Result<Vec<String>, QueryError>;

    fn close(&mut self) {}
}
