#![allow(clippy::result_large_err)]
//! testbed-core: requirement fulfillment for integration test suites.
//!
//! Tests declare what they need (tables, setup commands, custom resources);
//! the lifecycle provisions it before each suite and test, exposes the
//! results through layered contexts, and unwinds everything in reverse.
//!
//! # Public API
//!
//! Key types are re-exported at the crate root for convenience:
//!
//! - [`Requirement`], [`Requirements`], [`RequirementSet`] -- what tests declare
//! - [`TestCase`], [`RequirementsExpander`] -- test records and their expansion
//! - [`SuiteLifecycle`], [`Harness`] -- driving a suite
//! - [`TestContext`], [`State`] -- the layered dependency context
//! - [`TableManager`], [`TableManagerDispatcher`], [`TableManagerRegistry`]
//!   -- backend integration
//! - [`TestbedError`] -- the error type

pub mod config;
pub mod conformance;
pub mod context;
pub mod error;
pub mod fulfillment;
pub mod harness;
pub mod lifecycle;
pub mod requirement;
pub mod resolver;
pub mod table;
pub mod testing;

// ── Convenience re-exports: key types ────────────────────────────────

pub use config::{CommandConfig, Configuration, DatabaseConfig};
pub use context::{State, TestContext};
pub use error::{BoxError, Result, TestbedError};
pub use fulfillment::{FulfillerRegistration, RequirementFulfiller, TestStatus};
pub use requirement::{
    CommandRequirement, CustomRequirement, ImmutableTableRequirement, MutableTableRequirement,
    MutableTableState, Requirement, RequirementSet, Requirements,
};
pub use resolver::{RequirementsExpander, RequirementsProvider, TestCase, TestInvocation};
pub use table::{
    TableDefinition, TableHandle, TableInstance, TableManager, TableManagerDispatcher,
    TableManagerRegistry,
};

// ── Convenience re-exports: drivers ──────────────────────────────────

pub use harness::{Harness, RunOptions, SuiteReport, TestOutcome, TestSelector};
pub use lifecycle::{SuiteLifecycle, TestInfo};
