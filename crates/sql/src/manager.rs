//! The default table manager for relational databases.

use std::sync::{Arc, Mutex, MutexGuard};

use testbed_core::config::DatabaseConfig;
use testbed_core::table::{
    immutable_table_name, is_mutable_name, mutable_table_name, StaleTableSweep, TableName,
    TableNameGenerator,
};
use testbed_core::{
    MutableTableState, Result, TableDefinition, TableHandle, TableInstance, TableManager,
    TableManagerRegistry, TestbedError,
};
use tracing::{debug, info, warn};

use crate::definition::RELATIONAL_DEFINITION_KIND;
use crate::loader::InsertLoader;
use crate::memory::MemoryServer;
use crate::query::{QueryError, QueryExecutor};

/// Configuration tag selecting [`RelationalTableManager`].
pub const RELATIONAL_TYPE_TAG: &str = "relational";

/// Creates, loads and drops tables through a [`QueryExecutor`].
///
/// Immutable tables keep their logical name. Without a schema they are
/// dropped and recreated on every suite start; with a schema an existing
/// table is reused as is. Mutable tables get generated names and are loaded
/// according to the requested [`MutableTableState`].
pub struct RelationalTableManager {
    database: String,
    skip_create_schema: bool,
    executor: Mutex<Box<dyn QueryExecutor>>,
    generator: TableNameGenerator,
    sweep: StaleTableSweep,
}

impl std::fmt::Debug for RelationalTableManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalTableManager")
            .field("database", &self.database)
            .field("skip_create_schema", &self.skip_create_schema)
            .field("swept", &self.sweep.has_run())
            .finish()
    }
}

impl RelationalTableManager {
    pub fn new(database: impl Into<String>, executor: Box<dyn QueryExecutor>) -> Self {
        Self {
            database: database.into(),
            skip_create_schema: false,
            executor: Mutex::new(executor),
            generator: TableNameGenerator,
            sweep: StaleTableSweep::new(),
        }
    }

    pub fn from_config(
        database: impl Into<String>,
        config: &DatabaseConfig,
        executor: Box<dyn QueryExecutor>,
    ) -> Self {
        Self::new(database, executor).with_skip_create_schema(config.skip_create_schema)
    }

    pub fn with_skip_create_schema(mut self, skip: bool) -> Self {
        self.skip_create_schema = skip;
        self
    }

    fn executor(&self) -> MutexGuard<'_, Box<dyn QueryExecutor>> {
        self.executor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn backend(&self, error: QueryError) -> TestbedError {
        TestbedError::backend(self.database.clone(), error)
    }

    fn table_exists(&self, executor: &mut dyn QueryExecutor, name: &TableName) -> Result<bool> {
        let wanted = name.name_in_database();
        let tables = executor.table_names().map_err(|e| self.backend(e))?;
        Ok(tables.iter().any(|t| t.eq_ignore_ascii_case(&wanted)))
    }

    fn create_table(
        &self,
        executor: &mut dyn QueryExecutor,
        definition: &TableDefinition,
        name: &TableName,
    ) -> Result<()> {
        if let (Some(schema), false) = (name.schema(), self.skip_create_schema) {
            executor
                .execute_query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
                .map_err(|e| self.backend(e))?;
        }
        let ddl = definition.create_statement(&name.name_in_database());
        executor.execute_query(&ddl).map_err(|e| self.backend(e))?;
        debug!(table = %name, "created table");
        Ok(())
    }

    fn load_table(
        &self,
        executor: &mut dyn QueryExecutor,
        definition: &TableDefinition,
        name: &TableName,
    ) -> Result<()> {
        let loaded = InsertLoader::new(executor, name.name_in_database())
            .load_all(definition.rows())
            .map_err(|e| self.backend(e))?;
        debug!(table = %name, rows = loaded, "loaded table");
        Ok(())
    }
}

impl TableManager for RelationalTableManager {
    fn create_immutable(
        &self,
        definition: &Arc<TableDefinition>,
        handle: &TableHandle,
    ) -> Result<TableInstance> {
        let name = immutable_table_name(&self.database, handle);
        let mut executor = self.executor();
        let executor: &mut dyn QueryExecutor = executor.as_mut();

        if name.schema().is_none() {
            if let Err(e) = executor.execute_query(&format!("DROP TABLE {}", name.name_in_database())) {
                debug!(table = %name, error = %e, "ignoring drop failure before recreate");
            }
            self.create_table(executor, definition, &name)?;
            self.load_table(executor, definition, &name)?;
        } else if self.table_exists(executor, &name)? {
            info!(table = %name, "immutable table already exists, skipping creation");
        } else {
            self.create_table(executor, definition, &name)?;
            self.load_table(executor, definition, &name)?;
        }
        Ok(TableInstance::new(name, Arc::clone(definition)))
    }

    fn create_mutable(
        &self,
        definition: &Arc<TableDefinition>,
        state: MutableTableState,
        handle: &TableHandle,
    ) -> Result<TableInstance> {
        let name = mutable_table_name(&self.database, handle, &self.generator);
        if state != MutableTableState::Prepared {
            let mut executor = self.executor();
            let executor: &mut dyn QueryExecutor = executor.as_mut();
            self.create_table(executor, definition, &name)?;
            if state == MutableTableState::Loaded {
                self.load_table(executor, definition, &name)?;
            }
        }
        Ok(TableInstance::new(name, Arc::clone(definition)))
    }

    fn drop_table(&self, name: &TableName) -> Result<()> {
        self.executor()
            .execute_query(&format!("DROP TABLE {}", name.name_in_database()))
            .map_err(|e| self.backend(e))?;
        debug!(table = %name, "dropped table");
        Ok(())
    }

    fn drop_stale_mutable_tables(&self) {
        self.sweep.run_once(|| {
            let mut executor = self.executor();
            let tables = match executor.table_names() {
                Ok(tables) => tables,
                Err(e) => {
                    warn!(database = %self.database, error = %e, "cannot list tables for stale sweep");
                    return;
                }
            };
            for listed in tables {
                let bare = listed.rsplit('.').next().unwrap_or(&listed);
                if !is_mutable_name(bare) {
                    continue;
                }
                match executor.execute_query(&format!("DROP TABLE {listed}")) {
                    Ok(_) => debug!(database = %self.database, table = %listed, "dropped stale table"),
                    Err(e) => {
                        warn!(database = %self.database, table = %listed, error = %e, "cannot drop stale table")
                    }
                }
            }
        });
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    fn definition_kind(&self) -> &str {
        RELATIONAL_DEFINITION_KIND
    }

    fn type_tag(&self) -> &str {
        RELATIONAL_TYPE_TAG
    }

    fn close(&self) {
        self.executor().close();
    }
}

/// Register [`RelationalTableManager`] under [`RELATIONAL_TYPE_TAG`], opening
/// one executor per configured database with `connect`.
pub fn register_relational<C>(registry: TableManagerRegistry, connect: C) -> TableManagerRegistry
where
    C: Fn(&str, &DatabaseConfig) -> Result<Box<dyn QueryExecutor>> + Send + Sync + 'static,
{
    registry.with(RELATIONAL_TYPE_TAG, move |database, config| {
        let executor = connect(database, config)?;
        Ok(Arc::new(RelationalTableManager::from_config(database, config, executor))
            as Arc<dyn TableManager>)
    })
}

/// A registry whose relational databases live on `server`.
pub fn memory_registry(server: &MemoryServer) -> TableManagerRegistry {
    let server = server.clone();
    register_relational(TableManagerRegistry::new(), move |database, _| {
        Ok(Box::new(server.connect(database)) as Box<dyn QueryExecutor>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::RelationalDefinitionBuilder;
    use testbed_core::conformance::run_conformance_suite;
    use testbed_core::table::DataValue;

    fn nation() -> Arc<TableDefinition> {
        Arc::new(
            RelationalDefinitionBuilder::new("nation")
                .create_template("CREATE TABLE %NAME% (n_nationkey BIGINT, n_name VARCHAR(25))")
                .row([DataValue::Int(0), DataValue::from("ALGERIA")])
                .row([DataValue::Int(1), DataValue::from("ARGENTINA")])
                .row([DataValue::Int(2), DataValue::from("BRAZIL")])
                .build()
                .unwrap(),
        )
    }

    fn manager(server: &MemoryServer) -> RelationalTableManager {
        RelationalTableManager::new("db", Box::new(server.connect("db")))
    }

    fn statements_like(server: &MemoryServer, prefix: &str) -> Vec<String> {
        server
            .statements("db")
            .into_iter()
            .filter(|s| s.starts_with(prefix))
            .collect()
    }

    #[test]
    fn passes_conformance_suite() {
        let server = MemoryServer::new();
        let report = run_conformance_suite(|| manager(&server), nation());
        assert_eq!(report.failed, 0, "{report}");
        assert!(report.total >= 8);
    }

    #[test]
    fn schemaless_immutable_table_is_recreated() {
        let server = MemoryServer::new();
        let def = nation();
        manager(&server).create_immutable(&def, def.handle()).unwrap();
        let instance = manager(&server).create_immutable(&def, def.handle()).unwrap();

        assert_eq!(instance.name_in_database(), "nation");
        assert_eq!(server.row_count("db", "nation"), Some(3));
        // the first drop fails silently, the second one succeeds
        assert_eq!(statements_like(&server, "DROP TABLE nation").len(), 2);
        assert_eq!(statements_like(&server, "CREATE TABLE nation").len(), 2);
    }

    #[test]
    fn schema_qualified_immutable_table_is_reused() {
        let server = MemoryServer::new();
        let def = nation();
        let handle = def.handle().in_schema("tpch");
        manager(&server).create_immutable(&def, &handle).unwrap();
        let instance = manager(&server).create_immutable(&def, &handle).unwrap();

        assert_eq!(instance.name_in_database(), "tpch.nation");
        assert_eq!(server.row_count("db", "tpch.nation"), Some(3));
        assert_eq!(statements_like(&server, "CREATE TABLE").len(), 1);
        assert!(statements_like(&server, "DROP").is_empty());
        assert_eq!(statements_like(&server, "CREATE SCHEMA IF NOT EXISTS tpch").len(), 1);
    }

    #[test]
    fn skip_create_schema_issues_no_schema_ddl() {
        let server = MemoryServer::new();
        let def = nation();
        let manager = manager(&server).with_skip_create_schema(true);
        let err = manager
            .create_immutable(&def, &def.handle().in_schema("tpch"))
            .unwrap_err();
        assert!(matches!(err, TestbedError::Backend { ref database, .. } if database == "db"));
        assert!(err.to_string().contains("schema 'tpch' does not exist"), "{err}");
        assert!(statements_like(&server, "CREATE SCHEMA").is_empty());
    }

    #[test]
    fn mutable_states_control_creation_and_loading() {
        let server = MemoryServer::new();
        let def = nation();
        let manager = manager(&server);

        let prepared = manager
            .create_mutable(&def, MutableTableState::Prepared, def.handle())
            .unwrap();
        assert!(prepared.table_name().is_mutable());
        assert!(server.statements("db").is_empty());

        let created = manager
            .create_mutable(&def, MutableTableState::Created, def.handle())
            .unwrap();
        assert_eq!(server.row_count("db", &created.name_in_database()), Some(0));

        let loaded = manager
            .create_mutable(&def, MutableTableState::Loaded, def.handle())
            .unwrap();
        assert_eq!(server.row_count("db", &loaded.name_in_database()), Some(3));
        assert_ne!(created.name_in_database(), loaded.name_in_database());

        manager.drop_table(loaded.table_name()).unwrap();
        assert_eq!(server.row_count("db", &loaded.name_in_database()), None);
        assert!(manager.drop_table(loaded.table_name()).is_err());
    }

    #[test]
    fn stale_sweep_drops_listed_names_once() {
        let server = MemoryServer::new();
        let def = nation();
        let first = manager(&server);
        first.create_immutable(&def, def.handle()).unwrap();
        let stale = first
            .create_mutable(&def, MutableTableState::Created, &def.handle().in_schema("s"))
            .unwrap();
        first
            .create_mutable(&def, MutableTableState::Loaded, def.handle())
            .unwrap();

        let second = manager(&server);
        second.drop_stale_mutable_tables();
        assert_eq!(server.table_names("db"), vec!["nation"]);
        assert!(server
            .statements("db")
            .contains(&format!("DROP TABLE {}", stale.name_in_database())));

        let fresh = second
            .create_mutable(&def, MutableTableState::Created, def.handle())
            .unwrap();
        second.drop_stale_mutable_tables();
        assert_eq!(server.row_count("db", &fresh.name_in_database()), Some(0));
    }

    #[test]
    fn stale_sweep_ignores_drop_failures() {
        let server = MemoryServer::new();
        let def = nation();
        manager(&server)
            .create_mutable(&def, MutableTableState::Created, def.handle())
            .unwrap();
        manager(&server)
            .create_mutable(&def, MutableTableState::Created, def.handle())
            .unwrap();
        server.reject_statements_containing("drop table");

        manager(&server).drop_stale_mutable_tables();
        assert_eq!(server.table_names("db").len(), 2);
        assert_eq!(statements_like(&server, "DROP TABLE").len(), 2);
    }

    #[test]
    fn closed_manager_rejects_work() {
        let server = MemoryServer::new();
        let def = nation();
        let manager = manager(&server);
        manager.close();
        let err = manager
            .create_mutable(&def, MutableTableState::Created, def.handle())
            .unwrap_err();
        assert!(err.to_string().contains("connection is closed"), "{err}");
    }

    #[test]
    fn registry_builds_managers_from_config() {
        let server = MemoryServer::new();
        let config = testbed_core::Configuration::default()
            .with_database("a", DatabaseConfig::with_type("RELATIONAL"))
            .with_database("b", DatabaseConfig::with_type("relational"));
        let dispatcher = memory_registry(&server).build_dispatcher(&config).unwrap();
        assert_eq!(dispatcher.database_names(), vec!["a", "b"]);

        let def = nation();
        let handle = def.handle().in_database("b");
        let manager = dispatcher.resolve(&def, &handle).unwrap();
        manager.create_immutable(&def, &handle).unwrap();
        assert_eq!(server.row_count("b", "nation"), Some(3));
        assert_eq!(server.row_count("a", "nation"), None);
    }
}
