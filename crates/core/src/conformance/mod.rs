//! Conformance checks for `TableManager` implementations.
//!
//! Backend crates call [`run_conformance_suite`] with a factory that builds a
//! fresh manager for every check and a definition the manager can create:
//!
//! ```ignore
//! use testbed_core::conformance::run_conformance_suite;
//!
//! #[test]
//! fn memory_conformance() {
//!     let report = run_conformance_suite(|| memory_manager("db"), nation_definition());
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```
//!
//! The suite covers:
//!
//! - **Naming**: generated mutable names carry the prefix and never repeat
//! - **Identity**: logical name, schema and database survive creation
//! - **Lifecycle**: created tables can be dropped, the stale sweep can be
//!   invoked repeatedly, the declared definition kind matches

mod identity;
mod lifecycle;
mod naming;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::table::{TableDefinition, TableManager};

/// Result of a single conformance check.
#[derive(Debug, Clone, Serialize)]
pub struct ConformanceCheck {
    /// Check category (e.g. "naming", "identity").
    pub category: String,
    pub name: String,
    pub passed: bool,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConformanceCheck {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance run.
#[derive(Debug, Clone, Serialize)]
pub struct ConformanceReport {
    pub checks: Vec<ConformanceCheck>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for c in self.checks.iter().filter(|c| !c.passed) {
            writeln!(
                f,
                "  FAIL [{}/{}]: {}",
                c.category,
                c.name,
                c.message.as_deref().unwrap_or("(no message)")
            )?;
        }
        Ok(())
    }
}

/// Run every check against managers built by `factory`.
///
/// `definition` must be of the kind the manager handles and must not name a
/// database.
pub fn run_conformance_suite<M, F>(factory: F, definition: Arc<TableDefinition>) -> ConformanceReport
where
    M: TableManager,
    F: Fn() -> M,
{
    let mut checks = Vec::new();

    checks.extend(naming::run_naming_checks(&factory, &definition));
    checks.extend(identity::run_identity_checks(&factory, &definition));
    checks.extend(lifecycle::run_lifecycle_checks(&factory, &definition));

    let passed = checks.iter().filter(|c| c.passed).count();
    let total = checks.len();
    ConformanceReport {
        checks,
        passed,
        failed: total - passed,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ReadOnlyTableManager, TableHandle};
    use crate::testing::RecordingTableManager;

    fn definition() -> Arc<TableDefinition> {
        Arc::new(TableDefinition::new(
            TableHandle::new("nation"),
            "relational",
            "CREATE TABLE %NAME% (id INT)",
            vec![],
        ))
    }

    #[test]
    fn recording_manager_conforms() {
        let report = run_conformance_suite(|| RecordingTableManager::new("db"), definition());
        assert_eq!(report.failed, 0, "{report}");
        assert_eq!(report.total, report.checks.len());
        assert!(report.total >= 8);
    }

    #[test]
    fn read_only_manager_fails_creation_checks() {
        let report = run_conformance_suite(|| ReadOnlyTableManager::new("db"), definition());
        assert!(report.failed > 0);
        let text = report.to_string();
        assert!(text.contains("FAIL [naming/"), "{text}");
        assert!(text.contains("read only"), "{text}");
    }
}
