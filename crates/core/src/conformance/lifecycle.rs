use std::sync::Arc;

use super::ConformanceCheck;
use crate::requirement::MutableTableState;
use crate::table::{TableDefinition, TableManager};

pub(super) fn run_lifecycle_checks<M, F>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Vec<ConformanceCheck>
where
    M: TableManager,
    F: Fn() -> M,
{
    vec![
        ConformanceCheck::from_result(
            "lifecycle",
            "created_tables_can_be_dropped",
            created_tables_can_be_dropped(factory, definition),
        ),
        ConformanceCheck::from_result(
            "lifecycle",
            "stale_sweep_is_repeatable",
            stale_sweep_is_repeatable(factory, definition),
        ),
        ConformanceCheck::from_result(
            "lifecycle",
            "reports_definition_kind",
            reports_definition_kind(factory, definition),
        ),
    ]
}

fn created_tables_can_be_dropped<M: TableManager, F: Fn() -> M>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Result<(), String> {
    let manager = factory();
    for state in [MutableTableState::Created, MutableTableState::Loaded] {
        let instance = manager
            .create_mutable(definition, state, definition.handle())
            .map_err(|e| format!("create {state:?}: {e}"))?;
        manager
            .drop_table(instance.table_name())
            .map_err(|e| format!("drop {state:?}: {e}"))?;
    }
    manager.close();
    Ok(())
}

fn stale_sweep_is_repeatable<M: TableManager, F: Fn() -> M>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Result<(), String> {
    let manager = factory();
    manager.drop_stale_mutable_tables();
    manager.drop_stale_mutable_tables();
    manager
        .create_mutable(definition, MutableTableState::Created, definition.handle())
        .map_err(|e| format!("create after sweep: {e}"))?;
    manager.drop_stale_mutable_tables();
    Ok(())
}

fn reports_definition_kind<M: TableManager, F: Fn() -> M>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Result<(), String> {
    let manager = factory();
    if manager.definition_kind() != definition.kind() {
        return Err(format!(
            "manager handles '{}', definition is '{}'",
            manager.definition_kind(),
            definition.kind()
        ));
    }
    Ok(())
}
