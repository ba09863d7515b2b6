use std::sync::Arc;

use super::ConformanceCheck;
use crate::requirement::MutableTableState;
use crate::table::{is_mutable_name, TableDefinition, TableManager, MUTABLE_TABLE_PREFIX};

pub(super) fn run_naming_checks<M, F>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Vec<ConformanceCheck>
where
    M: TableManager,
    F: Fn() -> M,
{
    vec![
        ConformanceCheck::from_result(
            "naming",
            "mutable_name_carries_prefix",
            mutable_name_carries_prefix(factory, definition),
        ),
        ConformanceCheck::from_result(
            "naming",
            "mutable_names_are_unique",
            mutable_names_are_unique(factory, definition),
        ),
        ConformanceCheck::from_result(
            "naming",
            "mutable_name_embeds_logical_name",
            mutable_name_embeds_logical_name(factory, definition),
        ),
    ]
}

fn mutable_name_carries_prefix<M: TableManager, F: Fn() -> M>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Result<(), String> {
    let manager = factory();
    let instance = manager
        .create_mutable(definition, MutableTableState::Created, definition.handle())
        .map_err(|e| e.to_string())?;
    let generated = instance.table_name().schemaless_name_in_database();
    if !generated.starts_with(MUTABLE_TABLE_PREFIX) || !is_mutable_name(generated) {
        return Err(format!(
            "generated name '{generated}' does not start with '{MUTABLE_TABLE_PREFIX}'"
        ));
    }
    if generated != generated.to_lowercase() {
        return Err(format!("generated name '{generated}' is not lower case"));
    }
    Ok(())
}

fn mutable_names_are_unique<M: TableManager, F: Fn() -> M>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Result<(), String> {
    let manager = factory();
    let mut seen = std::collections::BTreeSet::new();
    for _ in 0..5 {
        let instance = manager
            .create_mutable(definition, MutableTableState::Prepared, definition.handle())
            .map_err(|e| e.to_string())?;
        let generated = instance.table_name().schemaless_name_in_database().to_string();
        if !seen.insert(generated.clone()) {
            return Err(format!("name '{generated}' generated twice"));
        }
    }
    Ok(())
}

fn mutable_name_embeds_logical_name<M: TableManager, F: Fn() -> M>(
    factory: &F,
    definition: &Arc<TableDefinition>,
) -> Result<(), String> {
    let manager = factory();
    let instance = manager
        .create_mutable(definition, MutableTableState::Prepared, definition.handle())
        .map_err(|e| e.to_string())?;
    let generated = instance.table_name().schemaless_name_in_database();
    let logical = definition.name().to_lowercase();
    if !generated.contains(&logical) {
        return Err(format!(
            "generated name '{generated}' does not contain '{logical}'"
        ));
    }
    Ok(())
}
