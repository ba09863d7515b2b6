//! A minimal host harness: expands, selects and runs plain test records
//! through a [`SuiteLifecycle`].

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, info_span, warn};

use crate::fulfillment::TestStatus;
use crate::lifecycle::SuiteLifecycle;
use crate::resolver::{ExpandedTest, RequirementsExpander, TestCase, TestInvocation};

// ──────────────────────────────────────────────
// Selection
// ──────────────────────────────────────────────

/// Filters expanded tests by name and group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSelector {
    pub tests: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub excluded_groups: BTreeSet<String>,
}

impl TestSelector {
    pub fn matches(&self, test: &ExpandedTest) -> bool {
        let groups = test.case().groups();
        let name_ok = self.tests.is_empty() || self.tests.contains(test.name());
        let group_ok = self.groups.is_empty() || !self.groups.is_disjoint(groups);
        let not_excluded = self.excluded_groups.is_disjoint(groups);
        name_ok && group_ok && not_excluded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Worker threads for the test phase; `0` and `1` both run sequentially.
    pub threads: usize,
    pub selector: TestSelector,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            selector: TestSelector::default(),
        }
    }
}

// ──────────────────────────────────────────────
// Report
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestOutcome {
    Success,
    Failure,
    Skipped,
}

impl From<TestStatus> for TestOutcome {
    fn from(status: TestStatus) -> Self {
        match status {
            TestStatus::Success => TestOutcome::Success,
            TestStatus::Failure => TestOutcome::Failure,
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Success => write!(f, "SUCCESS"),
            TestOutcome::Failure => write!(f, "FAILURE"),
            TestOutcome::Skipped => write!(f, "SKIPPED"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRecord {
    pub name: String,
    pub groups: Vec<String>,
    pub outcome: TestOutcome,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of one harness run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub tests: Vec<TestRecord>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Suite initialisation or teardown failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite_error: Option<String>,
}

impl SuiteReport {
    fn from_records(tests: Vec<TestRecord>, suite_error: Option<String>) -> Self {
        let count = |o: TestOutcome| tests.iter().filter(|t| t.outcome == o).count();
        Self {
            succeeded: count(TestOutcome::Success),
            failed: count(TestOutcome::Failure),
            skipped: count(TestOutcome::Skipped),
            tests,
            suite_error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.suite_error.is_none()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} SUCCEEDED / {} FAILED / {} SKIPPED",
            self.succeeded, self.failed, self.skipped
        )
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.tests {
            write!(f, "{:<8} {}", t.outcome.to_string(), t.name)?;
            if let Some(msg) = &t.message {
                write!(f, ": {msg}")?;
            }
            writeln!(f)?;
        }
        if let Some(err) = &self.suite_error {
            writeln!(f, "suite error: {err}")?;
        }
        write!(f, "{}", self.summary())
    }
}

// ──────────────────────────────────────────────
// Harness
// ──────────────────────────────────────────────

pub struct Harness {
    lifecycle: SuiteLifecycle,
    expander: Mutex<RequirementsExpander>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

fn group_list(test: &ExpandedTest) -> Vec<String> {
    test.case().groups().iter().cloned().collect()
}

impl Harness {
    pub fn new(lifecycle: SuiteLifecycle) -> Self {
        let expander = RequirementsExpander::new(lifecycle.resolver());
        Self {
            lifecycle,
            expander: Mutex::new(expander),
        }
    }

    pub fn lifecycle(&self) -> &SuiteLifecycle {
        &self.lifecycle
    }

    /// Expand `cases` and keep the invocations `selector` accepts.
    pub fn plan(&self, cases: Vec<TestCase>, selector: &TestSelector) -> Vec<ExpandedTest> {
        let declared = cases.into_iter().map(TestInvocation::declared).collect();
        let expanded = self
            .expander
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .expand(declared);
        expanded
            .into_iter()
            .filter_map(|invocation| match invocation {
                TestInvocation::Expanded(test) => Some(test),
                TestInvocation::Declared(_) => None,
            })
            .filter(|test| selector.matches(test))
            .collect()
    }

    /// Run the whole suite and report every selected test.
    pub fn run(&self, cases: Vec<TestCase>, options: &RunOptions) -> SuiteReport {
        let tests = self.plan(cases, &options.selector);
        let invocations: Vec<TestInvocation> =
            tests.iter().cloned().map(TestInvocation::Expanded).collect();

        if let Err(err) = self.lifecycle.on_start(&invocations) {
            error!(error = %err, "suite initialisation failed, skipping {} tests", tests.len());
            let records = tests
                .iter()
                .map(|test| TestRecord {
                    name: test.display_name(),
                    groups: group_list(test),
                    outcome: TestOutcome::Skipped,
                    duration_ms: 0,
                    message: Some(err.to_string()),
                })
                .collect();
            let report = SuiteReport::from_records(records, Some(err.to_string()));
            info!("{}", report.summary());
            return report;
        }

        let records = self.run_tests(&tests, options.threads);
        let status = if records.iter().all(|r| r.outcome != TestOutcome::Failure) {
            TestStatus::Success
        } else {
            TestStatus::Failure
        };
        let suite_error = match self.lifecycle.on_finish(status) {
            Ok(()) => None,
            Err(err) => {
                warn!(error = %err, "suite cleanup failed");
                Some(err.to_string())
            }
        };

        let report = SuiteReport::from_records(records, suite_error);
        info!("{}", report.summary());
        report
    }

    fn run_tests(&self, tests: &[ExpandedTest], threads: usize) -> Vec<TestRecord> {
        let total = tests.len();
        if threads <= 1 || total <= 1 {
            return tests
                .iter()
                .enumerate()
                .map(|(i, test)| self.run_one(i, total, test))
                .collect();
        }

        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<(usize, TestRecord)>> = Mutex::new(Vec::with_capacity(total));
        std::thread::scope(|scope| {
            for _ in 0..threads.min(total) {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(test) = tests.get(i) else {
                        break;
                    };
                    let record = self.run_one(i, total, test);
                    results
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push((i, record));
                });
            }
        });

        let mut results = results
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, record)| record).collect()
    }

    fn run_one(&self, index: usize, total: usize, test: &ExpandedTest) -> TestRecord {
        let name = test.display_name();
        let span = info_span!("test", name = %name);
        let _entered = span.enter();
        info!("[{} of {}] {}", index + 1, total, name);
        let started = Instant::now();

        let (outcome, message) = match self.lifecycle.on_test_start(test) {
            Err(err) => (TestOutcome::Failure, Some(err.to_string())),
            Ok(active) => {
                let body = test.case().body();
                let result = match active.context() {
                    Ok(ctx) => panic::catch_unwind(AssertUnwindSafe(|| body(ctx)))
                        .unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into())),
                    Err(err) => Err(err.into()),
                };
                let (status, mut message) = match result {
                    Ok(()) => (TestStatus::Success, None),
                    Err(err) => (TestStatus::Failure, Some(err.to_string())),
                };
                let finish = self.lifecycle.on_test_finish(active, status);
                if let Some(err) = finish.error {
                    message.get_or_insert_with(|| err.to_string());
                }
                (TestOutcome::from(finish.status), message)
            }
        };

        let elapsed = started.elapsed();
        if elapsed >= Duration::from_secs(1) {
            info!("{} in {:.1}s", outcome, elapsed.as_secs_f64());
        } else {
            info!("{}", outcome);
        }
        TestRecord {
            name,
            groups: group_list(test),
            outcome,
            duration_ms: elapsed.as_millis(),
            message,
        }
    }
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::context::ambient;
    use crate::requirement::{CustomRequirement, Requirement, Requirements};

    fn harness() -> Harness {
        Harness::new(SuiteLifecycle::builder(Configuration::default()).build())
    }

    fn ok(name: &str) -> TestCase {
        TestCase::new(name, |_| Ok(()))
    }

    #[test]
    fn selector_combines_names_groups_and_exclusions() {
        let h = harness();
        let cases = vec![
            ok("a").in_group("smoke"),
            ok("b").in_group("smoke").in_group("slow"),
            ok("c").in_group("nightly"),
        ];
        let names = |selector: TestSelector| -> Vec<String> {
            h.plan(cases.clone(), &selector)
                .iter()
                .map(ExpandedTest::display_name)
                .collect()
        };

        assert_eq!(names(TestSelector::default()), vec!["a", "b", "c"]);
        assert_eq!(
            names(TestSelector {
                groups: ["smoke".to_string()].into(),
                ..TestSelector::default()
            }),
            vec!["a", "b"]
        );
        assert_eq!(
            names(TestSelector {
                groups: ["smoke".to_string()].into(),
                excluded_groups: ["slow".to_string()].into(),
                ..TestSelector::default()
            }),
            vec!["a"]
        );
        assert_eq!(
            names(TestSelector {
                tests: ["c".to_string()].into(),
                ..TestSelector::default()
            }),
            vec!["c"]
        );
    }

    #[test]
    fn report_counts_outcomes_and_catches_panics() {
        let report = harness().run(
            vec![
                ok("passes"),
                TestCase::new("errors", |_| Err("bad row count".into())),
                TestCase::new("panics", |_| panic!("kaboom")),
            ],
            &RunOptions::default(),
        );
        assert_eq!((report.succeeded, report.failed, report.skipped), (1, 2, 0));
        assert!(!report.is_success());
        assert_eq!(report.tests[1].message.as_deref(), Some("bad row count"));
        assert_eq!(report.tests[2].message.as_deref(), Some("panicked: kaboom"));
        assert!(report.to_string().ends_with("1 SUCCEEDED / 2 FAILED / 0 SKIPPED"));
        assert!(ambient::current_if_set().is_none());
    }

    #[test]
    fn alternatives_run_once_per_set() {
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let recorder = std::sync::Arc::clone(&seen);
        let case = TestCase::new("variants", move |ctx| {
            let info = ctx.get::<crate::lifecycle::TestInfo>()?;
            recorder.lock().unwrap().push(info.display_name.clone());
            Ok(())
        })
        .requires(Requirements::any_of([
            Requirement::from(CustomRequirement::new("x")),
            Requirement::from(CustomRequirement::new("y")),
        ]));
        let report = harness().run(vec![case], &RunOptions::default());
        assert!(report.is_success());
        assert_eq!(*seen.lock().unwrap(), vec!["variants [1]", "variants [2]"]);
    }

    #[test]
    fn parallel_run_keeps_declaration_order() {
        let cases: Vec<TestCase> = (0..12)
            .map(|i| {
                TestCase::new(format!("t{i:02}"), move |ctx| {
                    assert!(ambient::current()?.ptr_eq(ctx));
                    if i % 5 == 4 {
                        return Err(format!("t{i:02} failed").into());
                    }
                    Ok(())
                })
            })
            .collect();
        let report = harness().run(
            cases,
            &RunOptions {
                threads: 4,
                ..RunOptions::default()
            },
        );
        let names: Vec<&str> = report.tests.iter().map(|t| t.name.as_str()).collect();
        let expected: Vec<String> = (0..12).map(|i| format!("t{i:02}")).collect();
        assert_eq!(names, expected);
        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded, 10);
    }

    #[test]
    fn failed_suite_start_skips_everything() {
        let config = Configuration::default().with_database(
            "db",
            crate::config::DatabaseConfig::with_type("no-such-manager"),
        );
        let h = Harness::new(SuiteLifecycle::builder(config).build());
        let report = h.run(vec![ok("a"), ok("b")], &RunOptions::default());
        assert_eq!(report.skipped, 2);
        assert!(report.suite_error.as_deref().unwrap().contains("no-such-manager"));
        assert!(report.tests.iter().all(|t| t.outcome == TestOutcome::Skipped));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["tests"][0]["outcome"], "SKIPPED");
    }
}
