//! Suite and test lifecycle: the two fulfillment pipelines plus hooks.
//!
//! ```text
//! on_start ─ suite pipeline ─┬─ on_test_start ─ test pipeline ─ before hooks
//!                            │      body
//!                            ├─ on_test_finish ─ after hooks ─ test cleanup
//!                            ⋮
//! on_finish ─ suite cleanup ─┘
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::context::{ambient, State, TestContext};
use crate::error::{Result, TestbedError};
use crate::fulfillment::{
    collect_fulfillers, FulfilledContexts, FulfillerRegistration, FulfillmentLevel,
    FulfillmentPipeline, ImmutableTablesFulfiller, MutableTablesFulfiller, RequirementFulfiller,
    SuiteCommandFulfiller, TestCommandFulfiller, TestStatus,
};
use crate::requirement::RequirementSet;
use crate::resolver::{ExpandedTest, TestCase, TestInvocation, TestSpecificRequirementsResolver};
use crate::table::{TableDefinitionsRepository, TableManagerRegistry};

// ── Types ────────────────────────────────────────────────────────────

/// Identity of the running test, bound in every test base context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInfo {
    pub name: String,
    pub display_name: String,
    pub groups: BTreeSet<String>,
}

/// Extra states for the suite base context.
pub type SuiteBinding = Arc<dyn Fn(&Configuration) -> Vec<State> + Send + Sync>;

/// Extra states for each test base context.
pub type TestBinding = Arc<dyn Fn(&Configuration, &TestInfo) -> Vec<State> + Send + Sync>;

/// A test between `on_test_start` and `on_test_finish`.
///
/// Its context stack is published on the current thread; it must be handed
/// back to [`SuiteLifecycle::on_test_finish`] on the same thread.
pub struct ActiveTest {
    case: Arc<TestCase>,
    info: TestInfo,
    contexts: FulfilledContexts,
}

impl ActiveTest {
    /// The innermost test scope, as seen by the test body.
    pub fn context(&self) -> Result<&TestContext> {
        self.contexts.top()
    }

    pub fn info(&self) -> &TestInfo {
        &self.info
    }

    pub fn case(&self) -> &Arc<TestCase> {
        &self.case
    }
}

impl fmt::Debug for ActiveTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveTest")
            .field("test", &self.info.display_name)
            .field("contexts", &self.contexts)
            .finish()
    }
}

/// How a test ended after its after-hooks and cleanup.
#[derive(Debug)]
pub struct TestFinish {
    pub status: TestStatus,
    /// First after-hook or cleanup error, if any.
    pub error: Option<TestbedError>,
}

/// Drives the suite pipeline once and the test pipeline per test.
pub struct SuiteLifecycle {
    config: Arc<Configuration>,
    registry: TableManagerRegistry,
    definitions: Arc<TableDefinitionsRepository>,
    suite_pipeline: FulfillmentPipeline,
    test_pipeline: FulfillmentPipeline,
    suite_bindings: Vec<SuiteBinding>,
    test_bindings: Vec<TestBinding>,
    suite: Mutex<Option<FulfilledContexts>>,
    suite_top: Mutex<Option<TestContext>>,
}

/// Builder for [`SuiteLifecycle`].
pub struct SuiteLifecycleBuilder {
    config: Arc<Configuration>,
    registry: TableManagerRegistry,
    definitions: Arc<TableDefinitionsRepository>,
    suite_fulfillers: Vec<FulfillerRegistration>,
    test_fulfillers: Vec<FulfillerRegistration>,
    suite_bindings: Vec<SuiteBinding>,
    test_bindings: Vec<TestBinding>,
}

// ── Functions ────────────────────────────────────────────────────────

fn builtin<F>(name: &str) -> FulfillerRegistration
where
    F: RequirementFulfiller + Default + 'static,
{
    FulfillerRegistration::new(name, 0, || -> Box<dyn RequirementFulfiller> {
        Box::new(F::default())
    })
}

fn suite_builtins() -> Vec<FulfillerRegistration> {
    vec![
        builtin::<ImmutableTablesFulfiller>(ImmutableTablesFulfiller::NAME),
        builtin::<SuiteCommandFulfiller>(SuiteCommandFulfiller::NAME),
    ]
}

fn test_builtins() -> Vec<FulfillerRegistration> {
    vec![
        builtin::<MutableTablesFulfiller>(MutableTablesFulfiller::NAME),
        builtin::<TestCommandFulfiller>(TestCommandFulfiller::NAME),
    ]
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SuiteLifecycleBuilder {
    pub fn table_managers(mut self, registry: TableManagerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn definitions(mut self, definitions: Arc<TableDefinitionsRepository>) -> Self {
        self.definitions = definitions;
        self
    }

    pub fn suite_fulfiller(mut self, registration: FulfillerRegistration) -> Self {
        self.suite_fulfillers.push(registration);
        self
    }

    pub fn test_fulfiller(mut self, registration: FulfillerRegistration) -> Self {
        self.test_fulfillers.push(registration);
        self
    }

    pub fn bind_suite<F>(mut self, binding: F) -> Self
    where
        F: Fn(&Configuration) -> Vec<State> + Send + Sync + 'static,
    {
        self.suite_bindings.push(Arc::new(binding));
        self
    }

    pub fn bind_test<F>(mut self, binding: F) -> Self
    where
        F: Fn(&Configuration, &TestInfo) -> Vec<State> + Send + Sync + 'static,
    {
        self.test_bindings.push(Arc::new(binding));
        self
    }

    pub fn build(self) -> SuiteLifecycle {
        let suite = collect_fulfillers(&suite_builtins(), &self.suite_fulfillers);
        let test = collect_fulfillers(&test_builtins(), &self.test_fulfillers);
        SuiteLifecycle {
            config: self.config,
            registry: self.registry,
            definitions: self.definitions,
            suite_pipeline: FulfillmentPipeline::new(FulfillmentLevel::Suite, suite),
            test_pipeline: FulfillmentPipeline::new(FulfillmentLevel::Test, test),
            suite_bindings: self.suite_bindings,
            test_bindings: self.test_bindings,
            suite: Mutex::new(None),
            suite_top: Mutex::new(None),
        }
    }
}

impl SuiteLifecycle {
    pub fn builder(config: Configuration) -> SuiteLifecycleBuilder {
        SuiteLifecycleBuilder {
            config: Arc::new(config),
            registry: TableManagerRegistry::new(),
            definitions: Arc::new(TableDefinitionsRepository::new()),
            suite_fulfillers: Vec::new(),
            test_fulfillers: Vec::new(),
            suite_bindings: Vec::new(),
            test_bindings: Vec::new(),
        }
    }

    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    pub fn resolver(&self) -> TestSpecificRequirementsResolver {
        TestSpecificRequirementsResolver::new(Arc::clone(&self.config))
    }

    pub fn suite_fulfiller_names(&self) -> Vec<&str> {
        self.suite_pipeline.fulfiller_names()
    }

    pub fn test_fulfiller_names(&self) -> Vec<&str> {
        self.test_pipeline.fulfiller_names()
    }

    /// Union of every requirement set of every invocation.
    fn suite_requirements(&self, invocations: &[TestInvocation]) -> RequirementSet {
        let resolver = self.resolver();
        let mut all = RequirementSet::new();
        for invocation in invocations {
            match invocation {
                TestInvocation::Expanded(test) => all = all.union(test.requirements()),
                TestInvocation::Declared(case) => {
                    for set in resolver.resolve(case) {
                        all = all.union(&set);
                    }
                }
            }
        }
        all
    }

    /// Build the table managers and run the suite pipeline.
    pub fn on_start(&self, invocations: &[TestInvocation]) -> Result<()> {
        let mut suite = locked(&self.suite);
        if suite.is_some() {
            return Err(TestbedError::SuiteAlreadyStarted);
        }

        info!("configuration:");
        for (key, value) in self.config.list_keys() {
            info!("  {key} -> {value}");
        }

        let requirements = self.suite_requirements(invocations);
        debug!(requirements = requirements.len(), "suite requirements resolved");

        let dispatcher = self.registry.build_dispatcher(&self.config)?;
        let mut states = vec![
            State::from_arc(Arc::clone(&self.config)),
            State::new(dispatcher),
            State::from_arc(Arc::clone(&self.definitions)),
        ];
        for binding in &self.suite_bindings {
            states.extend(binding(&self.config));
        }

        let base = TestContext::root("suite", states);
        let fulfilled = self.suite_pipeline.fulfill(base, &requirements)?;
        *locked(&self.suite_top) = Some(fulfilled.top()?.clone());
        *suite = Some(fulfilled);
        Ok(())
    }

    /// Fulfill the test's requirements on top of the suite scope, publish the
    /// stack on this thread and run the before hooks.
    pub fn on_test_start(&self, test: &ExpandedTest) -> Result<ActiveTest> {
        let suite_top = locked(&self.suite_top)
            .clone()
            .ok_or(TestbedError::SuiteNotStarted)?;

        let info = TestInfo {
            name: test.name().to_string(),
            display_name: test.display_name(),
            groups: test.case().groups().clone(),
        };
        let mut states = vec![State::new(info.clone())];
        for binding in &self.test_bindings {
            states.extend(binding(&self.config, &info));
        }

        let base = suite_top.child(format!("test:{}", info.display_name), states);
        let mut contexts = self.test_pipeline.fulfill(base, test.requirements())?;
        let top = contexts.top()?.clone();

        if let Err(err) = ambient::assert_not_set() {
            if let Err(cleanup_err) = contexts.cleanup(TestStatus::Failure) {
                warn!(error = %cleanup_err, "test cleanup failed");
            }
            return Err(err);
        }
        ambient::push_all(contexts.stack());

        for hook in test.case().before_hooks() {
            if let Err(source) = hook(&top) {
                warn!(test = %info.display_name, error = %source, "before hook failed");
                if let Err(err) = ambient::pop_all() {
                    warn!(error = %err, "context was not published");
                }
                if let Err(cleanup_err) = contexts.cleanup(TestStatus::Failure) {
                    warn!(error = %cleanup_err, "test cleanup failed");
                }
                return Err(TestbedError::Hook {
                    phase: "before",
                    test: info.display_name,
                    source,
                });
            }
        }

        Ok(ActiveTest {
            case: Arc::clone(test.case()),
            info,
            contexts,
        })
    }

    /// Run the after hooks, unpublish the stack and clean up the test scope.
    ///
    /// A failing after hook turns a success into a failure; nothing turns a
    /// failure into a success.
    pub fn on_test_finish(&self, active: ActiveTest, status: TestStatus) -> TestFinish {
        let ActiveTest {
            case,
            info,
            mut contexts,
        } = active;
        let mut status = status;
        let mut error = None;

        if let Ok(top) = contexts.top().cloned() {
            for hook in case.after_hooks() {
                if let Err(source) = hook(&top) {
                    warn!(test = %info.display_name, error = %source, "after hook failed");
                    status = TestStatus::Failure;
                    error.get_or_insert(TestbedError::Hook {
                        phase: "after",
                        test: info.display_name.clone(),
                        source,
                    });
                }
            }
        }

        if let Err(err) = ambient::pop_all() {
            warn!(error = %err, "context was not published");
            status = TestStatus::Failure;
            error.get_or_insert(err);
        }
        if let Err(err) = contexts.cleanup(status) {
            status = TestStatus::Failure;
            error.get_or_insert(err);
        }
        TestFinish { status, error }
    }

    /// Clean up the suite scope and close the table managers.
    pub fn on_finish(&self, status: TestStatus) -> Result<()> {
        let mut fulfilled = locked(&self.suite)
            .take()
            .ok_or(TestbedError::SuiteNotStarted)?;
        locked(&self.suite_top).take();
        fulfilled.cleanup(status)
    }

    pub fn is_started(&self) -> bool {
        locked(&self.suite).is_some()
    }
}

impl fmt::Debug for SuiteLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuiteLifecycle")
            .field("suite_fulfillers", &self.suite_fulfiller_names())
            .field("test_fulfillers", &self.test_fulfiller_names())
            .field("table_managers", &self.registry)
            .finish()
    }
}
