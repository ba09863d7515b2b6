use std::sync::Arc;

use super::ConformanceCheck;
use crate::requirement::MutableTableState;
use crate::table::{TableDefinition, TableManager};

const SCHEMA: &str = "conformance";

pub(super) fn run_identity_checks<M, F>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Vec<ConformanceCheck>
where
    M: TableManager,
    F: Fn() -> M,
{
    vec![
        ConformanceCheck::from_result(
            "identity",
            "logical_name_and_schema_preserved",
            logical_name_and_schema_preserved(factory, definition),
        ),
        ConformanceCheck::from_result(
            "identity",
            "manager_database_fills_missing_database",
            manager_database_fills_missing_database(factory, definition),
        ),
        ConformanceCheck::from_result(
            "identity",
            "immutable_table_keeps_its_name",
            immutable_table_keeps_its_name(factory, definition),
        ),
    ]
}

fn logical_name_and_schema_preserved<M: TableManager, F: Fn() -> M>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Result<(), String> {
    let manager = factory();
    let handle = definition.handle().in_schema(SCHEMA);
    let instance = manager
        .create_mutable(definition, MutableTableState::Created, &handle)
        .map_err(|e| e.to_string())?;
    let name = instance.table_name();
    if name.name() != definition.name() {
        return Err(format!(
            "logical name '{}' differs from '{}'",
            name.name(),
            definition.name()
        ));
    }
    if name.schema() != Some(SCHEMA) {
        return Err(format!("schema {:?} differs from {SCHEMA:?}", name.schema()));
    }
    if !name.name_in_database().starts_with(&format!("{SCHEMA}.")) {
        return Err(format!(
            "name in database '{}' is not qualified by schema '{SCHEMA}'",
            name.name_in_database()
        ));
    }
    Ok(())
}

fn manager_database_fills_missing_database<M: TableManager, F: Fn() -> M>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Result<(), String> {
    let manager = factory();
    let instance = manager
        .create_mutable(definition, MutableTableState::Prepared, definition.handle())
        .map_err(|e| e.to_string())?;
    if instance.database() != manager.database_name() {
        return Err(format!(
            "table database '{}' differs from manager database '{}'",
            instance.database(),
            manager.database_name()
        ));
    }
    Ok(())
}

fn immutable_table_keeps_its_name<M: TableManager, F: Fn() -> M>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Result<(), String> {
    let manager = factory();
    let instance = manager
        .create_immutable(definition, definition.handle())
        .map_err(|e| e.to_string())?;
    let in_db = instance.table_name().schemaless_name_in_database();
    if in_db != definition.name() {
        return Err(format!(
            "immutable table created as '{in_db}', expected '{}'",
            definition.name()
        ));
    }
    if instance.table_name().is_mutable() {
        return Err(format!("immutable table '{in_db}' looks mutable"));
    }
    Ok(())
}
