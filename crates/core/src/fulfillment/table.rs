//! Built-in fulfillers for immutable (suite) and mutable (test) tables.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::{State, TestContext};
use crate::error::Result;
use crate::fulfillment::{RequirementFulfiller, TestStatus};
use crate::requirement::{ImmutableTableRequirement, MutableTableRequirement, MutableTableState, RequirementSet, TableRequirement};
use crate::table::{
    ImmutableTablesState, MutableTablesState, TableInstance, TableManager,
    TableManagerDispatcher, TableName,
};

/// How a table requirement kind is created by its manager.
pub trait ProvisionTable: TableRequirement {
    fn provision(&self, manager: &dyn TableManager) -> Result<TableInstance>;

    /// True when `provision` actually created something to drop later.
    fn creates_table(&self) -> bool {
        true
    }
}

impl ProvisionTable for ImmutableTableRequirement {
    fn provision(&self, manager: &dyn TableManager) -> Result<TableInstance> {
        manager.create_immutable(self.definition(), self.handle())
    }
}

impl ProvisionTable for MutableTableRequirement {
    fn provision(&self, manager: &dyn TableManager) -> Result<TableInstance> {
        manager.create_mutable(self.definition(), self.state(), self.handle())
    }

    fn creates_table(&self) -> bool {
        self.state() != MutableTableState::Prepared
    }
}

/// Shared fulfillment for both table requirement kinds.
///
/// Every requirement of kind `R` is resolved to its manager and pinned to
/// that manager's database; identical pinned requirements collapse to one
/// table. Each manager sweeps stale tables before its first create.
pub struct TableRequirementFulfiller<R> {
    created: Vec<TableName>,
    _kind: PhantomData<fn() -> R>,
}

impl<R> Default for TableRequirementFulfiller<R> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            _kind: PhantomData,
        }
    }
}

impl<R: ProvisionTable> TableRequirementFulfiller<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables this fulfiller created and is responsible for.
    pub fn created(&self) -> &[TableName] {
        &self.created
    }

    pub fn fulfill_tables(
        &mut self,
        requirements: &RequirementSet,
        context: &TestContext,
    ) -> Result<Vec<TableInstance>> {
        let mut pinned: BTreeMap<R, Arc<dyn TableManager>> = BTreeMap::new();
        let mut tables = requirements.tables::<R>().peekable();
        if tables.peek().is_none() {
            return Ok(Vec::new());
        }
        let dispatcher = context.get::<TableManagerDispatcher>()?;
        for requirement in tables {
            let manager = dispatcher.resolve(requirement.definition(), requirement.handle())?;
            pinned
                .entry(requirement.with_database(manager.database_name()))
                .or_insert(manager);
        }

        let mut instances = Vec::with_capacity(pinned.len());
        for (requirement, manager) in pinned {
            manager.drop_stale_mutable_tables();
            let instance = requirement.provision(manager.as_ref())?;
            debug!(
                table = %requirement.handle(),
                name_in_database = %instance.name_in_database(),
                "created table"
            );
            if requirement.creates_table() {
                self.created.push(instance.table_name().clone());
            }
            instances.push(instance);
        }
        Ok(instances)
    }
}

// ──────────────────────────────────────────────
// Immutable tables
// ──────────────────────────────────────────────

/// Creates suite-scoped tables. They outlive the pipeline and are released
/// only when their manager closes, so cleanup does nothing.
#[derive(Default)]
pub struct ImmutableTablesFulfiller {
    tables: TableRequirementFulfiller<ImmutableTableRequirement>,
}

impl ImmutableTablesFulfiller {
    pub const NAME: &'static str = "immutable-tables";

    pub fn new() -> Self {
        Self::default()
    }
}

impl RequirementFulfiller for ImmutableTablesFulfiller {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fulfill(&mut self, requirements: &RequirementSet, context: &TestContext) -> Result<Vec<State>> {
        let instances = self.tables.fulfill_tables(requirements, context)?;
        Ok(vec![State::new(ImmutableTablesState::new(instances))])
    }

    fn cleanup(&mut self, _status: TestStatus, _context: &TestContext) -> Result<()> {
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Mutable tables
// ──────────────────────────────────────────────

/// Creates test-scoped throwaway tables and drops them after a passing test.
///
/// Tables of a failed test stay in place for inspection; the next run's
/// stale sweep removes them.
#[derive(Default)]
pub struct MutableTablesFulfiller {
    tables: TableRequirementFulfiller<MutableTableRequirement>,
}

impl MutableTablesFulfiller {
    pub const NAME: &'static str = "mutable-tables";

    pub fn new() -> Self {
        Self::default()
    }
}

impl RequirementFulfiller for MutableTablesFulfiller {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fulfill(&mut self, requirements: &RequirementSet, context: &TestContext) -> Result<Vec<State>> {
        let instances = self.tables.fulfill_tables(requirements, context)?;
        Ok(vec![State::new(MutableTablesState::new(instances))])
    }

    fn cleanup(&mut self, status: TestStatus, context: &TestContext) -> Result<()> {
        if status == TestStatus::Failure {
            if !self.tables.created().is_empty() {
                info!(
                    tables = self.tables.created().len(),
                    "test failed, keeping mutable tables"
                );
            }
            return Ok(());
        }
        if self.tables.created().is_empty() {
            return Ok(());
        }

        let dispatcher = context.get::<TableManagerDispatcher>()?;
        for manager in dispatcher.all_managers() {
            let database = manager.database_name();
            for name in self
                .tables
                .created()
                .iter()
                .filter(|n| n.database().eq_ignore_ascii_case(database))
            {
                debug!(database, table = %name.name_in_database(), "dropping mutable table");
                if let Err(err) = manager.drop_table(name) {
                    warn!(
                        database,
                        table = %name.name_in_database(),
                        error = %err,
                        "could not drop mutable table"
                    );
                }
            }
        }
        Ok(())
    }
}
