//! Fulfillers that run setup shell commands.

use std::collections::BTreeSet;
use std::process::{Command, Stdio};

use tracing::info;

use crate::context::{State, TestContext};
use crate::error::{Result, TestbedError};
use crate::fulfillment::{RequirementFulfiller, TestStatus};
use crate::requirement::{CommandScope, RequirementSet};

/// Run `command`, split on whitespace, with all standard streams discarded.
pub fn execute(command: &str) -> Result<()> {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(TestbedError::CommandFailed {
            command: command.to_string(),
            reason: "empty command".to_string(),
        });
    };
    info!(command, "executing command");
    let status = Command::new(program)
        .args(parts)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| TestbedError::CommandFailed {
            command: command.to_string(),
            reason: e.to_string(),
        })?;
    if !status.success() {
        return Err(TestbedError::CommandFailed {
            command: command.to_string(),
            reason: format!("exited with {status}"),
        });
    }
    Ok(())
}

fn run_commands(requirements: &RequirementSet, scope: CommandScope) -> Result<()> {
    let distinct: BTreeSet<_> = requirements.commands(scope).collect();
    for requirement in distinct {
        for command in &requirement.commands {
            execute(command)?;
        }
    }
    Ok(())
}

/// Runs suite-scoped setup commands once before the suite.
#[derive(Debug, Default)]
pub struct SuiteCommandFulfiller;

impl SuiteCommandFulfiller {
    pub const NAME: &'static str = "suite-commands";
}

impl RequirementFulfiller for SuiteCommandFulfiller {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fulfill(&mut self, requirements: &RequirementSet, _context: &TestContext) -> Result<Vec<State>> {
        run_commands(requirements, CommandScope::Suite)?;
        Ok(Vec::new())
    }

    fn cleanup(&mut self, _status: TestStatus, _context: &TestContext) -> Result<()> {
        Ok(())
    }
}

/// Runs test-scoped setup commands before every test.
#[derive(Debug, Default)]
pub struct TestCommandFulfiller;

impl TestCommandFulfiller {
    pub const NAME: &'static str = "test-commands";
}

impl RequirementFulfiller for TestCommandFulfiller {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fulfill(&mut self, requirements: &RequirementSet, _context: &TestContext) -> Result<Vec<State>> {
        run_commands(requirements, CommandScope::Test)?;
        Ok(Vec::new())
    }

    fn cleanup(&mut self, _status: TestStatus, _context: &TestContext) -> Result<()> {
        Ok(())
    }
}
