//! Fulfillers turn requirement sets into live resources and context states.
//!
//! Fulfillers run in a fixed order per scope (suite or test). Each receives
//! the whole requirement set of its scope, picks out what it understands
//! and returns the [`State`]s to bind in a new child context. Cleanup is the
//! mirror image and runs against the context the fulfiller produced.

mod command;
mod pipeline;
mod table;

pub use command::{SuiteCommandFulfiller, TestCommandFulfiller};
pub use pipeline::{FulfilledContexts, FulfillmentLevel, FulfillmentPipeline, PipelineState};
pub use table::{ImmutableTablesFulfiller, MutableTablesFulfiller, TableRequirementFulfiller};

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::context::{State, TestContext};
use crate::error::Result;
use crate::requirement::RequirementSet;

/// Outcome a scope is cleaned up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Success,
    Failure,
}

impl TestStatus {
    /// `Failure` is sticky: combining never turns a failure into a success.
    pub fn and(self, other: TestStatus) -> TestStatus {
        match (self, other) {
            (TestStatus::Success, TestStatus::Success) => TestStatus::Success,
            _ => TestStatus::Failure,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Success => write!(f, "SUCCESS"),
            TestStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

/// A pluggable step of the fulfillment pipeline.
///
/// A fresh instance is built for every pipeline run, so implementations can
/// keep whatever they created in `fulfill` for use in `cleanup`.
pub trait RequirementFulfiller: Send {
    fn name(&self) -> &str;

    /// Materialise the requirements this fulfiller handles. `context` is the
    /// top of the stack at the time of the call.
    fn fulfill(&mut self, requirements: &RequirementSet, context: &TestContext)
        -> Result<Vec<State>>;

    /// Release what `fulfill` acquired. `context` is the scope built from the
    /// states `fulfill` returned.
    fn cleanup(&mut self, status: TestStatus, context: &TestContext) -> Result<()>;
}

/// Builds a fulfiller for one pipeline run.
pub type FulfillerFactory = Arc<dyn Fn() -> Box<dyn RequirementFulfiller> + Send + Sync>;

/// A fulfiller type and its position in the pipeline.
///
/// Lower priorities run first. Fulfillers with a negative priority run
/// before the built-in fulfillers; zero and above run after them. Ties keep
/// registration order.
#[derive(Clone)]
pub struct FulfillerRegistration {
    pub name: String,
    pub priority: i32,
    pub factory: FulfillerFactory,
}

impl FulfillerRegistration {
    pub fn new<F>(name: impl Into<String>, priority: i32, factory: F) -> Self
    where
        F: Fn() -> Box<dyn RequirementFulfiller> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            factory: Arc::new(factory),
        }
    }

    pub fn build(&self) -> Box<dyn RequirementFulfiller> {
        (self.factory)()
    }
}

impl fmt::Debug for FulfillerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FulfillerRegistration")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Merge built-in and user fulfillers into the pipeline order.
///
/// User fulfillers are sorted by ascending priority (stable), then the
/// built-ins are inserted right before the first user fulfiller whose
/// priority is zero or more.
pub fn collect_fulfillers(
    builtins: &[FulfillerRegistration],
    user: &[FulfillerRegistration],
) -> Vec<FulfillerRegistration> {
    let mut ordered: Vec<FulfillerRegistration> = user.to_vec();
    ordered.sort_by_key(|r| r.priority);
    let split = ordered
        .iter()
        .position(|r| r.priority >= 0)
        .unwrap_or(ordered.len());
    ordered.splice(split..split, builtins.iter().cloned());
    ordered
}
