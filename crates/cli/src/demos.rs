//! The bundled demo suite run by `testbed run`.
//!
//! Tests reach the in-memory server through a suite binding and check the
//! tables the lifecycle provisioned for them.

use std::sync::Arc;

use testbed_core::table::{DataValue, ImmutableTablesState, MutableTablesState, TableInstance};
use testbed_core::{
    BoxError, Configuration, CustomRequirement, FulfillerRegistration, ImmutableTableRequirement,
    MutableTableRequirement, MutableTableState, Requirement, RequirementFulfiller, RequirementSet,
    Requirements, State, TableDefinition, TestCase, TestContext, TestStatus, TestbedError,
};
use testbed_sql::{InsertLoader, MemoryServer, QueryExecutor, RelationalDefinitionBuilder};

/// Property naming the schema the `region` table lives in.
pub const REGION_SCHEMA_PROPERTY: &str = "demo.region_schema";

const NATIONS: [&str; 5] = ["ALGERIA", "ARGENTINA", "BRAZIL", "CANADA", "EGYPT"];
const REGIONS: [&str; 5] = ["AFRICA", "AMERICA", "ASIA", "EUROPE", "MIDDLE EAST"];

struct Definitions {
    nation: Arc<TableDefinition>,
    region: Arc<TableDefinition>,
    orders: Arc<TableDefinition>,
}

fn definitions() -> Result<Definitions, TestbedError> {
    let nation = RelationalDefinitionBuilder::new("nation")
        .create_template("CREATE TABLE %NAME% (n_nationkey BIGINT, n_name VARCHAR(25), n_regionkey BIGINT)")
        .rows(NATIONS.iter().zip(0i64..).map(|(name, key)| {
            vec![DataValue::Int(key), DataValue::from(*name), DataValue::Int(key % 3)]
        }))
        .build()?;
    let region = RelationalDefinitionBuilder::new("region")
        .create_template("CREATE TABLE %NAME% (r_regionkey BIGINT, r_name VARCHAR(25))")
        .rows(REGIONS.iter().zip(0i64..).map(|(name, key)| {
            vec![DataValue::Int(key), DataValue::from(*name)]
        }))
        .build()?;
    let orders = RelationalDefinitionBuilder::new("orders")
        .create_template("CREATE TABLE %NAME% (o_orderkey BIGINT, o_status VARCHAR(1), o_comment VARCHAR(79))")
        .row([DataValue::Int(1), DataValue::from("O"), DataValue::from("it's urgent")])
        .row([DataValue::Int(2), DataValue::from("F"), DataValue::Null])
        .build()?;
    Ok(Definitions {
        nation: Arc::new(nation),
        region: Arc::new(region),
        orders: Arc::new(orders),
    })
}

fn count(ctx: &TestContext, table: &TableInstance) -> Result<i64, BoxError> {
    let server = ctx.get::<MemoryServer>()?;
    let result = server
        .connect(table.database())
        .execute_query(&format!("SELECT COUNT(*) FROM {}", table.name_in_database()))?;
    match result.scalar() {
        Some(DataValue::Int(n)) => Ok(*n),
        other => Err(format!("COUNT(*) returned {other:?}").into()),
    }
}

fn expect_rows(ctx: &TestContext, table: &TableInstance, expected: i64) -> Result<(), BoxError> {
    let actual = count(ctx, table)?;
    if actual != expected {
        return Err(format!(
            "expected {expected} rows in {}, found {actual}",
            table.name_in_database()
        )
        .into());
    }
    Ok(())
}

/// The demo test records.
pub fn demo_cases() -> Result<Vec<TestCase>, TestbedError> {
    let defs = definitions()?;

    let nation_is_loaded = TestCase::new("nation_is_loaded", |ctx| {
        let tables = ctx.get::<ImmutableTablesState>()?;
        expect_rows(ctx, tables.get_by_name("nation")?, NATIONS.len() as i64)
    })
    .in_group("smoke")
    .in_group("tpch")
    .requires(Requirement::from(ImmutableTableRequirement::new(Arc::clone(&defs.nation))));

    let region = Arc::clone(&defs.region);
    let region_in_configured_schema = TestCase::new("region_in_configured_schema", |ctx| {
        let tables = ctx.get::<ImmutableTablesState>()?;
        let region = tables.get_by_name("region")?;
        if region.schema().is_none() {
            return Err("region was created without a schema".into());
        }
        expect_rows(ctx, region, REGIONS.len() as i64)
    })
    .in_group("tpch")
    .requires(move |config: &Configuration| {
        let schema = config.property(REGION_SCHEMA_PROPERTY).unwrap_or("tpch");
        let handle = region.handle().in_schema(schema);
        Requirement::from(ImmutableTableRequirement::new(Arc::clone(&region)).with_handle(handle))
    });

    let orders_start_empty = TestCase::new("orders_start_empty", |ctx| {
        let tables = ctx.get::<MutableTablesState>()?;
        let orders = tables.get_by_name("orders")?;
        expect_rows(ctx, orders, 0)?;
        let server = ctx.get::<MemoryServer>()?;
        server
            .connect(orders.database())
            .execute_query(&format!("INSERT INTO {} VALUES (7, 'O', null)", orders.name_in_database()))?;
        expect_rows(ctx, orders, 1)
    })
    .in_group("smoke")
    .requires(Requirement::from(
        MutableTableRequirement::builder(Arc::clone(&defs.orders))
            .with_state(MutableTableState::Created)
            .build(),
    ));

    let orders_in_each_state = TestCase::new("orders_in_each_state", |ctx| {
        let tables = ctx.get::<MutableTablesState>()?;
        let orders = tables.get_by_name("orders")?;
        let loaded = count(ctx, orders)?;
        if loaded != 0 && loaded != 2 {
            return Err(format!("unexpected row count {loaded}").into());
        }
        Ok(())
    })
    .requires(Requirements::any_of([
        Requirement::from(
            MutableTableRequirement::builder(Arc::clone(&defs.orders))
                .with_state(MutableTableState::Created)
                .build(),
        ),
        Requirement::from(MutableTableRequirement::new(Arc::clone(&defs.orders))),
    ]));

    let seeded_orders = TestCase::new("seeded_orders", |ctx| {
        let seeded = ctx.get::<SeededRows>()?;
        let tables = ctx.get::<MutableTablesState>()?;
        expect_rows(ctx, tables.get_by_name("orders")?, 2 + seeded.0 as i64)
    })
    .requires(Requirements::compose([
        Requirement::from(MutableTableRequirement::new(Arc::clone(&defs.orders))),
        Requirement::from(
            CustomRequirement::new(SeedRowsFulfiller::KIND)
                .with_param("table", "orders")
                .with_param("rows", "3"),
        ),
    ]));

    Ok(vec![
        nation_is_loaded,
        region_in_configured_schema,
        orders_start_empty,
        orders_in_each_state,
        seeded_orders,
    ])
}

// ──────────────────────────────────────────────
// Seed rows fulfiller
// ──────────────────────────────────────────────

/// Number of rows added by [`SeedRowsFulfiller`].
#[derive(Debug, Clone, Copy)]
pub struct SeededRows(pub usize);

/// Appends generated rows to a mutable table created earlier in the same
/// pipeline. Handles `seed` custom requirements with `table` and `rows`
/// parameters.
#[derive(Debug, Default)]
pub struct SeedRowsFulfiller;

impl SeedRowsFulfiller {
    pub const KIND: &'static str = "seed";
    pub const NAME: &'static str = "seed-rows";

    pub fn registration() -> FulfillerRegistration {
        FulfillerRegistration::new(Self::NAME, 10, || -> Box<dyn RequirementFulfiller> {
            Box::new(SeedRowsFulfiller)
        })
    }

    fn fail(source: impl Into<BoxError>) -> TestbedError {
        TestbedError::Fulfillment {
            fulfiller: Self::NAME.to_string(),
            source: source.into(),
        }
    }
}

impl RequirementFulfiller for SeedRowsFulfiller {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fulfill(
        &mut self,
        requirements: &RequirementSet,
        context: &TestContext,
    ) -> testbed_core::Result<Vec<State>> {
        let mut seeded = 0;
        for requirement in requirements.custom(Self::KIND) {
            let table = requirement
                .params
                .get("table")
                .ok_or_else(|| Self::fail("missing 'table' parameter"))?;
            let rows: usize = requirement
                .params
                .get("rows")
                .map_or(Ok(1), |r| r.parse())
                .map_err(Self::fail)?;

            let tables = context.get::<MutableTablesState>()?;
            let instance = tables.get_by_name(table)?;
            let server = context.get::<MemoryServer>()?;
            let mut connection = server.connect(instance.database());
            let generated: Vec<Vec<DataValue>> = (0..rows as i64)
                .map(|i| vec![DataValue::Int(1000 + i), DataValue::from("P"), DataValue::Null])
                .collect();
            InsertLoader::new(&mut connection, instance.name_in_database())
                .load_all(&generated)
                .map_err(|e| TestbedError::backend(instance.database(), e))?;
            seeded += rows;
        }
        Ok(vec![State::new(SeededRows(seeded))])
    }

    fn cleanup(&mut self, _status: TestStatus, _context: &TestContext) -> testbed_core::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testbed_core::config::DatabaseConfig;
    use testbed_core::{Harness, RunOptions, SuiteLifecycle};
    use testbed_sql::{memory_registry, RELATIONAL_TYPE_TAG};

    fn harness(server: &MemoryServer, config: Configuration) -> Harness {
        let bound = server.clone();
        Harness::new(
            SuiteLifecycle::builder(config)
                .table_managers(memory_registry(server))
                .test_fulfiller(SeedRowsFulfiller::registration())
                .bind_suite(move |_| vec![State::new(bound.clone())])
                .build(),
        )
    }

    fn memory_config() -> Configuration {
        Configuration::default().with_database("memory", DatabaseConfig::with_type(RELATIONAL_TYPE_TAG))
    }

    #[test]
    fn demo_suite_passes() {
        let server = MemoryServer::new();
        let report = harness(&server, memory_config()).run(demo_cases().unwrap(), &RunOptions::default());
        assert!(report.is_success(), "{report}");
        // orders_in_each_state runs once per state
        assert_eq!(report.tests.len(), 6);
        // only the immutable tables survive
        assert_eq!(server.table_names("memory"), vec!["nation", "tpch.region"]);
    }

    #[test]
    fn region_schema_comes_from_configuration() {
        let server = MemoryServer::new();
        let config = memory_config().with_property(REGION_SCHEMA_PROPERTY, "geo");
        let report = harness(&server, config).run(demo_cases().unwrap(), &RunOptions::default());
        assert!(report.is_success(), "{report}");
        assert!(server.has_schema("memory", "geo"));
        assert_eq!(server.row_count("memory", "geo.region"), Some(REGIONS.len()));
    }

    #[test]
    fn seed_fulfiller_needs_a_table_parameter() {
        let server = MemoryServer::new();
        let case = TestCase::new("bad_seed", |_| Ok(()))
            .requires(Requirement::from(CustomRequirement::new(SeedRowsFulfiller::KIND)));
        let report = harness(&server, memory_config()).run(vec![case], &RunOptions::default());
        assert_eq!(report.failed, 1);
        let message = report.tests[0].message.as_deref().unwrap();
        assert!(message.contains("fulfiller 'seed-rows' failed"), "{message}");
    }
}
