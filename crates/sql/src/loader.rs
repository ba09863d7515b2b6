//! Batched `INSERT ... VALUES` loading.

use testbed_core::table::DataValue;
use tracing::debug;

use crate::query::{QueryError, QueryExecutor};

/// Rows handed to the loader per batch.
pub const BATCH_ROWS: usize = 10_000;

/// Rows rendered into a single `INSERT` statement.
pub const ROWS_PER_INSERT: usize = 100;

/// Render one value as a SQL literal.
pub fn sql_literal(value: &DataValue) -> String {
    match value {
        DataValue::Null => "null".to_string(),
        DataValue::Bool(b) => b.to_string(),
        DataValue::Int(i) => i.to_string(),
        DataValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

/// Split `rows` into multi-row `INSERT` statements for `table`.
///
/// Every row must have `columns` values.
pub fn insert_statements(
    table: &str,
    columns: usize,
    rows: &[Vec<DataValue>],
) -> Result<Vec<String>, QueryError> {
    let mut statements = Vec::with_capacity(rows.len().div_ceil(ROWS_PER_INSERT));
    for (chunk_index, chunk) in rows.chunks(ROWS_PER_INSERT).enumerate() {
        let mut tuples = Vec::with_capacity(chunk.len());
        for (offset, row) in chunk.iter().enumerate() {
            if row.len() != columns {
                return Err(QueryError::ColumnCount {
                    table: table.to_string(),
                    row: chunk_index * ROWS_PER_INSERT + offset,
                    expected: columns,
                    actual: row.len(),
                });
            }
            let values: Vec<String> = row.iter().map(sql_literal).collect();
            tuples.push(format!("({})", values.join(", ")));
        }
        statements.push(format!("INSERT INTO {table} VALUES {}", tuples.join(", ")));
    }
    Ok(statements)
}

/// Loads rows into one table through an executor.
///
/// The column count is fixed by the first row seen.
pub struct InsertLoader<'a> {
    executor: &'a mut dyn QueryExecutor,
    table: String,
    columns: Option<usize>,
    loaded: usize,
}

impl<'a> InsertLoader<'a> {
    pub fn new(executor: &'a mut dyn QueryExecutor, table: impl Into<String>) -> Self {
        Self {
            executor,
            table: table.into(),
            columns: None,
            loaded: 0,
        }
    }

    /// Insert one batch of rows.
    pub fn load(&mut self, batch: &[Vec<DataValue>]) -> Result<(), QueryError> {
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let columns = *self.columns.get_or_insert(first.len());
        let statements = insert_statements(&self.table, columns, batch).map_err(|e| match e {
            QueryError::ColumnCount {
                table,
                row,
                expected,
                actual,
            } => QueryError::ColumnCount {
                table,
                row: self.loaded + row,
                expected,
                actual,
            },
            other => other,
        })?;
        for statement in statements {
            self.executor.execute_query(&statement)?;
        }
        self.loaded += batch.len();
        Ok(())
    }

    /// Insert `rows` in batches of [`BATCH_ROWS`].
    pub fn load_all(mut self, rows: &[Vec<DataValue>]) -> Result<usize, QueryError> {
        for batch in rows.chunks(BATCH_ROWS) {
            self.load(batch)?;
            debug!(table = %self.table, loaded = self.loaded, "loaded batch");
        }
        Ok(self.loaded)
    }
}
