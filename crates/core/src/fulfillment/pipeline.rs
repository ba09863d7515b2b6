//! The fulfillment state machine.
//!
//! ```text
//! NotStarted -> Fulfilling(0) -> ... -> Fulfilling(n-1) -> Fulfilled
//!            -> CleaningUp(n-1) -> ... -> CleaningUp(0) -> Done
//! ```
//!
//! A failure in `Fulfilling(i)` jumps straight to `CleaningUp(i-1)`, so only
//! fulfillers that succeeded are ever asked to clean up.

use std::fmt;

use tracing::{debug, warn};

use crate::context::{ambient, ContextStack, TestContext};
use crate::error::{Result, TestbedError};
use crate::fulfillment::{FulfillerRegistration, RequirementFulfiller, TestStatus};
use crate::requirement::RequirementSet;
use crate::table::TableManagerDispatcher;

/// Scope a pipeline runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentLevel {
    Suite,
    Test,
}

impl fmt::Display for FulfillmentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FulfillmentLevel::Suite => write!(f, "suite"),
            FulfillmentLevel::Test => write!(f, "test"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    /// Running `fulfill` on the fulfiller at this index.
    Fulfilling(usize),
    Fulfilled,
    /// Running `cleanup` on the fulfiller at this index.
    CleaningUp(usize),
    Done,
}

/// An ordered list of fulfillers for one level.
#[derive(Debug, Clone)]
pub struct FulfillmentPipeline {
    level: FulfillmentLevel,
    fulfillers: Vec<FulfillerRegistration>,
}

impl FulfillmentPipeline {
    pub fn new(level: FulfillmentLevel, fulfillers: Vec<FulfillerRegistration>) -> Self {
        Self { level, fulfillers }
    }

    pub fn level(&self) -> FulfillmentLevel {
        self.level
    }

    pub fn fulfiller_names(&self) -> Vec<&str> {
        self.fulfillers.iter().map(|r| r.name.as_str()).collect()
    }

    /// Run every fulfiller in order on top of `base`.
    ///
    /// On failure the fulfillers that already succeeded are cleaned up in
    /// reverse with [`TestStatus::Failure`] and the original error is
    /// returned unchanged.
    pub fn fulfill(
        &self,
        base: TestContext,
        requirements: &RequirementSet,
    ) -> Result<FulfilledContexts> {
        let mut run = FulfilledContexts {
            level: self.level,
            state: PipelineState::NotStarted,
            stack: ContextStack::new(base),
            successful: Vec::new(),
        };

        for (index, registration) in self.fulfillers.iter().enumerate() {
            run.state = PipelineState::Fulfilling(index);
            let mut fulfiller = registration.build();
            let top = run.top()?.clone();
            debug!(level = %self.level, fulfiller = %registration.name, "fulfilling");

            match ambient::run_with(&top, || fulfiller.fulfill(requirements, &top)) {
                Ok(states) => {
                    run.stack.push(top.child(registration.name.clone(), states));
                    run.successful.push(fulfiller);
                }
                Err(err) => {
                    warn!(
                        level = %self.level,
                        fulfiller = %registration.name,
                        error = %err,
                        "fulfillment failed, unwinding {} fulfillers",
                        run.successful.len()
                    );
                    if let Err(cleanup_err) = run.cleanup(TestStatus::Failure) {
                        warn!(error = %cleanup_err, "cleanup after failed fulfillment also failed");
                    }
                    return Err(err);
                }
            }
        }

        run.state = PipelineState::Fulfilled;
        Ok(run)
    }
}

/// The context stack produced by a successful pipeline run, plus the
/// fulfillers that must be cleaned up.
pub struct FulfilledContexts {
    level: FulfillmentLevel,
    state: PipelineState,
    stack: ContextStack,
    successful: Vec<Box<dyn RequirementFulfiller>>,
}

impl FulfilledContexts {
    pub fn level(&self) -> FulfillmentLevel {
        self.level
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stack(&self) -> &ContextStack {
        &self.stack
    }

    /// The innermost context; test code and child pipelines build on it.
    pub fn top(&self) -> Result<&TestContext> {
        self.stack.top().ok_or(TestbedError::ContextStackInvariant {
            actual: 0,
            fulfillers: self.successful.len(),
        })
    }

    pub fn fulfiller_names(&self) -> Vec<&str> {
        self.successful.iter().map(|f| f.name()).collect()
    }

    fn check_invariant(&self) -> Result<()> {
        if self.stack.len() != self.successful.len() + 1 {
            return Err(TestbedError::ContextStackInvariant {
                actual: self.stack.len(),
                fulfillers: self.successful.len(),
            });
        }
        Ok(())
    }

    /// Unwind the stack in reverse: for each successful fulfiller, pop its
    /// context, run its cleanup against that context and close it. Then
    /// close the base context; at suite level the table managers close first.
    ///
    /// A failing cleanup does not stop the unwind; the first error is
    /// returned once every fulfiller has been visited. An invariant
    /// violation aborts before anything is touched.
    pub fn cleanup(&mut self, status: TestStatus) -> Result<()> {
        if self.state == PipelineState::Done {
            return Ok(());
        }
        self.check_invariant()?;

        let mut first_error = None;
        while let Some(mut fulfiller) = self.successful.pop() {
            self.state = PipelineState::CleaningUp(self.successful.len());
            let Some(context) = self.stack.pop() else {
                break;
            };
            debug!(level = %self.level, fulfiller = fulfiller.name(), %status, "cleaning up");
            let result = ambient::run_with(&context, || fulfiller.cleanup(status, &context));
            context.close();
            if let Err(err) = result {
                warn!(fulfiller = fulfiller.name(), error = %err, "cleanup failed");
                first_error.get_or_insert(err);
            }
        }

        if let Some(base) = self.stack.pop() {
            if self.level == FulfillmentLevel::Suite {
                if let Some(dispatcher) = base.optional::<TableManagerDispatcher>() {
                    dispatcher.close_all();
                }
            }
            base.close();
        }
        self.state = PipelineState::Done;

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for FulfilledContexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FulfilledContexts")
            .field("level", &self.level)
            .field("state", &self.state)
            .field("contexts", &self.stack.len())
            .field("fulfillers", &self.fulfiller_names())
            .finish()
    }
}

impl Drop for FulfilledContexts {
    fn drop(&mut self) {
        if self.state != PipelineState::Done {
            warn!(
                level = %self.level,
                state = ?self.state,
                "fulfilled contexts dropped without cleanup"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::State;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Debug, PartialEq)]
    struct Produced(&'static str);

    struct Scripted {
        name: &'static str,
        fail_fulfill: bool,
        fail_cleanup: bool,
        log: Log,
    }

    impl RequirementFulfiller for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn fulfill(&mut self, _: &RequirementSet, context: &TestContext) -> Result<Vec<State>> {
            let seen = context
                .optional::<Produced>()
                .map(|p| p.0)
                .unwrap_or("-");
            self.log
                .lock()
                .unwrap()
                .push(format!("fulfill {} sees {}", self.name, seen));
            assert!(ambient::current().unwrap().ptr_eq(context));
            if self.fail_fulfill {
                return Err(TestbedError::Config(format!("{} broke", self.name)));
            }
            Ok(vec![State::new(Produced(self.name))])
        }

        fn cleanup(&mut self, status: TestStatus, context: &TestContext) -> Result<()> {
            let own = context.get::<Produced>().unwrap().0;
            self.log
                .lock()
                .unwrap()
                .push(format!("cleanup {} {} with {}", self.name, status, own));
            if self.fail_cleanup {
                return Err(TestbedError::Config(format!("{} cleanup broke", self.name)));
            }
            Ok(())
        }
    }

    fn scripted(
        name: &'static str,
        log: &Log,
        fail_fulfill: bool,
        fail_cleanup: bool,
    ) -> FulfillerRegistration {
        let log = Arc::clone(log);
        FulfillerRegistration::new(name, 0, move || -> Box<dyn RequirementFulfiller> {
            Box::new(Scripted {
                name,
                fail_fulfill,
                fail_cleanup,
                log: Arc::clone(&log),
            })
        })
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn base() -> TestContext {
        TestContext::root("base", Vec::new())
    }

    #[test]
    fn successful_run_stacks_contexts_and_cleans_up_in_reverse() {
        let log = Log::default();
        let pipeline = FulfillmentPipeline::new(
            FulfillmentLevel::Test,
            vec![
                scripted("A", &log, false, false),
                scripted("B", &log, false, false),
                scripted("C", &log, false, false),
            ],
        );
        let mut run = pipeline.fulfill(base(), &RequirementSet::new()).unwrap();
        assert_eq!(run.state(), PipelineState::Fulfilled);
        assert_eq!(run.stack().len(), 4);
        assert_eq!(run.fulfiller_names(), vec!["A", "B", "C"]);
        assert_eq!(run.top().unwrap().get::<Produced>().unwrap().0, "C");

        let contexts: Vec<TestContext> = run.stack().iter().cloned().collect();
        run.cleanup(TestStatus::Success).unwrap();
        assert_eq!(run.state(), PipelineState::Done);
        assert!(contexts.iter().all(TestContext::is_closed));

        assert_eq!(
            entries(&log),
            vec![
                "fulfill A sees -",
                "fulfill B sees A",
                "fulfill C sees B",
                "cleanup C SUCCESS with C",
                "cleanup B SUCCESS with B",
                "cleanup A SUCCESS with A",
            ]
        );
    }

    #[test]
    fn failure_unwinds_only_prior_successes_and_returns_original_error() {
        let log = Log::default();
        let pipeline = FulfillmentPipeline::new(
            FulfillmentLevel::Test,
            vec![
                scripted("A", &log, false, false),
                scripted("B", &log, true, false),
                scripted("C", &log, false, false),
            ],
        );
        let base = base();
        let err = pipeline.fulfill(base.clone(), &RequirementSet::new()).unwrap_err();
        assert_eq!(err.to_string(), "configuration error: B broke");
        assert!(base.is_closed());
        assert_eq!(
            entries(&log),
            vec![
                "fulfill A sees -",
                "fulfill B sees A",
                "cleanup A FAILURE with A",
            ]
        );
    }

    #[test]
    fn failure_in_first_fulfiller_cleans_nothing() {
        let log = Log::default();
        let pipeline = FulfillmentPipeline::new(
            FulfillmentLevel::Test,
            vec![scripted("A", &log, true, false), scripted("B", &log, false, false)],
        );
        assert!(pipeline.fulfill(base(), &RequirementSet::new()).is_err());
        assert_eq!(entries(&log), vec!["fulfill A sees -"]);
    }

    #[test]
    fn cleanup_continues_past_errors_and_reports_the_first() {
        let log = Log::default();
        let pipeline = FulfillmentPipeline::new(
            FulfillmentLevel::Test,
            vec![
                scripted("A", &log, false, true),
                scripted("B", &log, false, true),
                scripted("C", &log, false, false),
            ],
        );
        let mut run = pipeline.fulfill(base(), &RequirementSet::new()).unwrap();
        let err = run.cleanup(TestStatus::Failure).unwrap_err();
        assert_eq!(err.to_string(), "configuration error: B cleanup broke");
        assert_eq!(entries(&log).len(), 6);
        assert_eq!(run.state(), PipelineState::Done);
        run.cleanup(TestStatus::Failure).unwrap();
    }

    #[test]
    fn corrupted_stack_is_an_invariant_violation() {
        let log = Log::default();
        let pipeline = FulfillmentPipeline::new(
            FulfillmentLevel::Test,
            vec![scripted("A", &log, false, false)],
        );
        let mut run = pipeline.fulfill(base(), &RequirementSet::new()).unwrap();
        let extra = run.top().unwrap().child("rogue", Vec::new());
        run.stack.push(extra);

        let err = run.cleanup(TestStatus::Success).unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(matches!(
            err,
            TestbedError::ContextStackInvariant { actual: 3, fulfillers: 1 }
        ));
        assert_eq!(entries(&log), vec!["fulfill A sees -"]);

        run.stack.pop();
        run.cleanup(TestStatus::Success).unwrap();
    }

    #[test]
    fn suite_level_closes_table_managers_before_base() {
        use crate::testing::RecordingTableManager;

        let manager = Arc::new(RecordingTableManager::new("db"));
        let dispatcher = TableManagerDispatcher::new().with_manager(manager.clone());
        let base = TestContext::root("suite", vec![State::new(dispatcher)]);
        let closed_before_base = Arc::new(Mutex::new(None));
        {
            let manager = Arc::clone(&manager);
            let closed_before_base = Arc::clone(&closed_before_base);
            base.register_close_callback(move || {
                *closed_before_base.lock().unwrap() = Some(manager.is_closed());
            });
        }

        let mut run = FulfillmentPipeline::new(FulfillmentLevel::Suite, Vec::new())
            .fulfill(base, &RequirementSet::new())
            .unwrap();
        run.cleanup(TestStatus::Success).unwrap();
        assert_eq!(*closed_before_base.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_level_leaves_table_managers_open() {
        use crate::testing::RecordingTableManager;

        let manager = Arc::new(RecordingTableManager::new("db"));
        let dispatcher = TableManagerDispatcher::new().with_manager(manager.clone());
        let suite = TestContext::root("suite", vec![State::new(dispatcher)]);
        let mut run = FulfillmentPipeline::new(FulfillmentLevel::Test, Vec::new())
            .fulfill(suite.child("test", Vec::new()), &RequirementSet::new())
            .unwrap();
        run.cleanup(TestStatus::Success).unwrap();
        assert!(!manager.is_closed());
        assert!(!suite.is_closed());
    }
}
