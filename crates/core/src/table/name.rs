//! Physical table names and the mutable-name generator.

use std::fmt;
use std::sync::Once;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

/// Prefix carried by every generated mutable table name.
pub const MUTABLE_TABLE_PREFIX: &str = "testbed_mut_";

const RANDOM_SUFFIX_LEN: usize = 8;

/// The resolved name of a created table.
///
/// `name` is the logical name test code refers to; `name_in_database` is
/// what the backend actually holds, a generated name for mutable tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TableName {
    database: String,
    schema: Option<String>,
    name: String,
    name_in_database: String,
}

impl TableName {
    pub fn new(
        database: impl Into<String>,
        schema: Option<String>,
        name: impl Into<String>,
        name_in_database: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema,
            name: name.into(),
            name_in_database: name_in_database.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema-qualified physical name, e.g. `sales.testbed_mut_orders_x1y2z3w4`.
    pub fn name_in_database(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name_in_database),
            None => self.name_in_database.clone(),
        }
    }

    pub fn schemaless_name_in_database(&self) -> &str {
        &self.name_in_database
    }

    pub fn is_mutable(&self) -> bool {
        is_mutable_name(&self.name_in_database)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.database, self.name_in_database())
    }
}

/// Generates collision-free names for throwaway tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableNameGenerator;

impl TableNameGenerator {
    pub fn generate_mutable_name(&self, base_name: &str) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!("{MUTABLE_TABLE_PREFIX}{base_name}_{suffix}").to_lowercase()
    }

    pub fn is_mutable_name(&self, candidate: &str) -> bool {
        is_mutable_name(candidate)
    }
}

/// True when `candidate` was produced by [`TableNameGenerator`].
pub fn is_mutable_name(candidate: &str) -> bool {
    candidate.starts_with(MUTABLE_TABLE_PREFIX)
}

/// Run-once guard for a manager's stale-table sweep.
///
/// Callers that arrive while the sweep is running block until it has
/// finished, so no table created afterwards can be swept.
#[derive(Debug)]
pub struct StaleTableSweep {
    once: Once,
}

impl Default for StaleTableSweep {
    fn default() -> Self {
        Self::new()
    }
}

impl StaleTableSweep {
    pub fn new() -> Self {
        Self { once: Once::new() }
    }

    /// Runs `sweep` the first time it is called and returns `true`; later
    /// calls do nothing and return `false`.
    pub fn run_once(&self, sweep: impl FnOnce()) -> bool {
        let mut ran = false;
        self.once.call_once(|| {
            sweep();
            ran = true;
        });
        ran
    }

    pub fn has_run(&self) -> bool {
        self.once.is_completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_names_are_recognised() {
        let generator = TableNameGenerator;
        for base in ["orders", "Line_Items", "x", ""] {
            let name = generator.generate_mutable_name(base);
            assert!(generator.is_mutable_name(&name), "{name}");
            assert_eq!(name, name.to_lowercase());
            assert!(name.starts_with(MUTABLE_TABLE_PREFIX));
        }
    }

    #[test]
    fn user_names_are_not_mutable() {
        for name in ["orders", "testbed_orders", "mut_orders", "testbed_mu", ""] {
            assert!(!is_mutable_name(name), "{name}");
        }
    }

    #[test]
    fn prefix_match_is_case_sensitive() {
        assert!(is_mutable_name("testbed_mut_orders_ab12cd34"));
        assert!(!is_mutable_name("TESTBED_MUT_ORDERS_AB12CD34"));
        assert!(!is_mutable_name("Testbed_Mut_orders"));
    }

    #[test]
    fn generated_names_do_not_collide() {
        let generator = TableNameGenerator;
        let names: HashSet<String> = (0..500)
            .map(|_| generator.generate_mutable_name("t"))
            .collect();
        assert_eq!(names.len(), 500);
    }

    #[test]
    fn name_in_database_is_schema_qualified() {
        let n = TableName::new("db", Some("s".into()), "t", "testbed_mut_t_abc");
        assert_eq!(n.name_in_database(), "s.testbed_mut_t_abc");
        assert_eq!(n.schemaless_name_in_database(), "testbed_mut_t_abc");
        assert!(n.is_mutable());

        let n = TableName::new("db", None, "t", "t");
        assert_eq!(n.name_in_database(), "t");
        assert!(!n.is_mutable());
    }

    #[test]
    fn sweep_runs_at_most_once() {
        let sweep = StaleTableSweep::new();
        let mut calls = 0;
        assert!(sweep.run_once(|| calls += 1));
        assert!(!sweep.run_once(|| calls += 1));
        assert!(sweep.has_run());
        assert_eq!(calls, 1);
    }

    #[test]
    fn concurrent_callers_wait_for_the_running_sweep() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let sweep = &StaleTableSweep::new();
        let finished = &AtomicBool::new(false);
        let (entered_tx, entered_rx) = mpsc::channel();

        thread::scope(|scope| {
            scope.spawn(move || {
                sweep.run_once(|| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(100));
                    finished.store(true, Ordering::SeqCst);
                });
            });
            scope.spawn(move || {
                entered_rx.recv().unwrap();
                assert!(!sweep.run_once(|| panic!("second sweep")));
                // returns only once the first sweep is complete
                assert!(finished.load(Ordering::SeqCst));
                assert!(sweep.has_run());
            });
        });
    }
}
