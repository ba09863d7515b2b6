//! Error types shared by every part of the fulfillment lifecycle.

use crate::table::TableHandle;

/// Boxed error returned by test bodies, hooks and backend executors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout `testbed-core`.
pub type Result<T, E = TestbedError> = std::result::Result<T, E>;

/// All errors raised while resolving, fulfilling and unwinding requirements.
#[derive(Debug, thiserror::Error)]
pub enum TestbedError {
    // ── Configuration errors ──
    /// No registered table manager handles the definition kind.
    #[error("no table manager found for table {handle} (definition kind '{kind}')")]
    NoTableManager { handle: TableHandle, kind: String },

    /// Several managers handle the definition kind and the handle names no database.
    #[error(
        "multiple databases found for table {handle}, definition kind '{kind}'. Pick a database from {databases:?}"
    )]
    AmbiguousTableManager {
        handle: TableHandle,
        kind: String,
        databases: Vec<String>,
    },

    /// The handle names a database that has no table manager.
    #[error("no table manager registered for database '{database}' (table {handle})")]
    UnknownDatabase { handle: TableHandle, database: String },

    /// The manager registered for a database handles another definition kind.
    #[error(
        "table manager for database '{database}' handles '{actual}' definitions, table {handle} requires '{expected}'"
    )]
    DefinitionKindMismatch {
        handle: TableHandle,
        database: String,
        expected: String,
        actual: String,
    },

    #[error("duplicated table definition: {key}")]
    DuplicateTableDefinition { key: String },

    #[error("no table definition for: {key}")]
    UnknownTableDefinition { key: String },

    #[error("unknown table manager type '{type_tag}' for database '{database}'; expecting one of {known:?}")]
    UnknownTableManagerType {
        type_tag: String,
        database: String,
        known: Vec<String>,
    },

    #[error("invalid table handle '{text}': {reason}")]
    InvalidTableHandle { text: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    // ── Lookup errors ──
    #[error("no {description} instance found for name {handle}")]
    TableNotFound {
        description: String,
        handle: TableHandle,
    },

    #[error(
        "multiple {description} instances found for {handle}, please use more detailed table handle. Found {candidates:?}"
    )]
    AmbiguousTable {
        description: String,
        handle: TableHandle,
        candidates: Vec<String>,
    },

    /// A value was requested from a context that never bound it.
    #[error("no binding for {type_name} (name: {name:?})")]
    MissingBinding {
        type_name: &'static str,
        name: Option<String>,
    },

    // ── Lifecycle invariants ──
    /// The context stack and the list of successful fulfillers drifted apart.
    #[error("context stack holds {actual} contexts but {fulfillers} fulfillers succeeded (expected {fulfillers} + 1)")]
    ContextStackInvariant { actual: usize, fulfillers: usize },

    #[error("test context is not set on this thread")]
    ContextNotSet,

    #[error("test context is already set on this thread")]
    ContextAlreadySet,

    #[error("suite lifecycle is not started")]
    SuiteNotStarted,

    #[error("suite lifecycle is already started")]
    SuiteAlreadyStarted,

    // ── Fulfillment errors ──
    /// A table manager refuses the operation.
    #[error("database '{database}' is read only, cannot {operation}")]
    ReadOnly { database: String, operation: String },

    /// A backend create/drop/query call failed.
    #[error("backend error on database '{database}': {source}")]
    Backend {
        database: String,
        #[source]
        source: BoxError,
    },

    #[error("command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    /// A user fulfiller failed.
    #[error("fulfiller '{fulfiller}' failed: {source}")]
    Fulfillment {
        fulfiller: String,
        #[source]
        source: BoxError,
    },

    /// A before/after-with-context hook failed.
    #[error("{phase} hook failed for test '{test}': {source}")]
    Hook {
        phase: &'static str,
        test: String,
        #[source]
        source: BoxError,
    },
}

impl TestbedError {
    /// Wrap a backend failure for `database`.
    pub fn backend(database: impl Into<String>, source: impl Into<BoxError>) -> Self {
        TestbedError::Backend {
            database: database.into(),
            source: source.into(),
        }
    }

    /// True for bookkeeping failures that indicate a lifecycle bug.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            TestbedError::ContextStackInvariant { .. }
                | TestbedError::ContextNotSet
                | TestbedError::ContextAlreadySet
        )
    }
}
