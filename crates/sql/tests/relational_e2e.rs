//! Suites run through the harness against in-memory relational databases.

use std::sync::{Arc, Mutex};

use testbed_core::config::DatabaseConfig;
use testbed_core::table::{DataValue, ImmutableTablesState, MutableTablesState, TableDefinition};
use testbed_core::{
    Configuration, Harness, ImmutableTableRequirement, MutableTableRequirement, MutableTableState,
    Requirement, RunOptions, SuiteLifecycle, TestCase, TestOutcome,
};
use testbed_sql::{
    memory_registry, MemoryServer, QueryExecutor, RelationalDefinitionBuilder, RELATIONAL_TYPE_TAG,
};

fn nation() -> Arc<TableDefinition> {
    Arc::new(
        RelationalDefinitionBuilder::new("nation")
            .create_template("CREATE TABLE %NAME% (n_nationkey BIGINT, n_name VARCHAR(25))")
            .rows((0..25).map(|i| vec![DataValue::Int(i), DataValue::from(format!("nation {i}"))]))
            .build()
            .unwrap(),
    )
}

fn harness(server: &MemoryServer) -> Harness {
    let config = Configuration::default()
        .with_database("warehouse", DatabaseConfig::with_type(RELATIONAL_TYPE_TAG));
    Harness::new(
        SuiteLifecycle::builder(config)
            .table_managers(memory_registry(server))
            .build(),
    )
}

fn count(server: &MemoryServer, table: &str) -> Result<i64, Box<dyn std::error::Error + Send + Sync>> {
    let result = server
        .connect("warehouse")
        .execute_query(&format!("SELECT COUNT(*) FROM {table}"))?;
    match result.scalar() {
        Some(DataValue::Int(n)) => Ok(*n),
        other => Err(format!("unexpected count {other:?}").into()),
    }
}

#[test]
fn mutable_states_are_visible_to_test_code() {
    let server = MemoryServer::new();
    let def = nation();

    let created = {
        let server = server.clone();
        TestCase::new("created_is_empty", move |ctx| {
            let table = ctx.get::<MutableTablesState>()?.get_by_name("nation")?.name_in_database();
            assert_eq!(count(&server, &table)?, 0);
            Ok(())
        })
        .requires(Requirement::from(
            MutableTableRequirement::builder(Arc::clone(&def))
                .with_state(MutableTableState::Created)
                .build(),
        ))
    };
    let loaded = {
        let server = server.clone();
        TestCase::new("loaded_has_rows", move |ctx| {
            let table = ctx.get::<MutableTablesState>()?.get_by_name("nation")?.name_in_database();
            assert_eq!(count(&server, &table)?, 25);
            Ok(())
        })
        .requires(Requirement::from(MutableTableRequirement::new(Arc::clone(&def))))
    };

    let report = harness(&server).run(vec![created, loaded], &RunOptions::default());
    assert!(report.is_success(), "{report}");
    // both mutable tables were dropped after passing
    assert!(server.table_names("warehouse").is_empty());
}

#[test]
fn immutable_table_is_created_once_and_shared() {
    let server = MemoryServer::new();
    let def = nation();
    let cases: Vec<TestCase> = (0..3)
        .map(|i| {
            let server = server.clone();
            TestCase::new(format!("reader_{i}"), move |ctx| {
                let tables = ctx.get::<ImmutableTablesState>()?;
                assert_eq!(tables.get_by_name("nation")?.name_in_database(), "nation");
                assert_eq!(count(&server, "nation")?, 25);
                Ok(())
            })
            .requires(Requirement::from(ImmutableTableRequirement::new(Arc::clone(&def))))
        })
        .collect();

    let report = harness(&server).run(cases, &RunOptions { threads: 2, ..RunOptions::default() });
    assert_eq!(report.succeeded, 3, "{report}");
    let creates = server
        .statements("warehouse")
        .into_iter()
        .filter(|s| s.starts_with("CREATE TABLE nation"))
        .count();
    assert_eq!(creates, 1);
    assert_eq!(server.table_names("warehouse"), vec!["nation"]);
}

#[test]
fn failed_test_keeps_its_table_until_the_next_sweep() {
    let server = MemoryServer::new();
    let def = nation();
    let kept = Arc::new(Mutex::new(None::<String>));

    let failing = {
        let kept = Arc::clone(&kept);
        TestCase::new("fails", move |ctx| {
            let table = ctx.get::<MutableTablesState>()?.get_by_name("nation")?.name_in_database();
            *kept.lock().unwrap() = Some(table);
            Err("expected 26 rows".into())
        })
        .requires(Requirement::from(MutableTableRequirement::new(Arc::clone(&def))))
    };
    let report = harness(&server).run(vec![failing], &RunOptions::default());
    assert_eq!(report.tests[0].outcome, TestOutcome::Failure);
    assert_eq!(report.tests[0].message.as_deref(), Some("expected 26 rows"));

    let table = kept.lock().unwrap().clone().unwrap();
    assert_eq!(server.row_count("warehouse", &table), Some(25));
    assert!(!server
        .statements("warehouse")
        .iter()
        .any(|s| s.starts_with("DROP TABLE testbed_mut_")));

    // the next suite sweeps the leftover before creating its own tables
    let next = TestCase::new("passes", |_| Ok(()))
        .requires(Requirement::from(MutableTableRequirement::new(Arc::clone(&def))));
    let report = harness(&server).run(vec![next], &RunOptions::default());
    assert!(report.is_success(), "{report}");
    assert_eq!(server.row_count("warehouse", &table), None);
    assert!(server.table_names("warehouse").is_empty());
}

#[test]
fn schema_qualified_tables_create_their_schema() {
    let server = MemoryServer::new();
    let def = nation();
    let case = TestCase::new("in_schema", |ctx| {
        let table = ctx.get::<MutableTablesState>()?.get_by_name("nation")?.name_in_database();
        assert!(table.starts_with("tpch.testbed_mut_nation_"), "{table}");
        Ok(())
    })
    .requires(Requirement::from(
        MutableTableRequirement::builder(def)
            .with_schema("tpch")
            .build(),
    ));

    let report = harness(&server).run(vec![case], &RunOptions::default());
    assert!(report.is_success(), "{report}");
    assert!(server.has_schema("warehouse", "tpch"));
}

#[test]
fn backend_failure_fails_the_test_with_the_database_name() {
    let server = MemoryServer::new();
    server.reject_statements_containing("insert into");
    let case = TestCase::new("load", |_| Ok(()))
        .requires(Requirement::from(MutableTableRequirement::new(nation())));

    let report = harness(&server).run(vec![case], &RunOptions::default());
    assert_eq!(report.failed, 1);
    let message = report.tests[0].message.as_deref().unwrap();
    assert!(message.contains("database 'warehouse'"), "{message}");
    assert!(message.contains("statement rejected"), "{message}");
}
