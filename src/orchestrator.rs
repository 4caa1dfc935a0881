use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::outputs::StackOutputs;
use crate::parameters::ParameterSet;
use crate::stack::{Capability, StackState};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),

    #[error("Stack not found: {0}")]
    NotFoundError(String),

    #[error("Template rejected: {0}")]
    InvalidTemplate(String),
}

/// Everything a create or update call sends for one stack.
#[derive(Debug, Clone, Copy)]
pub struct StackRequest<'a> {
    pub stack_name: &'a str,
    pub template_body: &'a str,
    pub parameters: &'a ParameterSet,
    pub capabilities: &'a [Capability],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Started,
    NoChanges,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackSummary {
    pub name: String,
    pub state: StackState,
}

/// The subset of the orchestration service the deployer drives.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Current state; a stack that does not exist is `Absent`, not an error.
    async fn describe_stack(&self, stack_name: &str) -> Result<StackState, Error>;

    async fn create_stack(&self, request: &StackRequest<'_>) -> Result<(), Error>;

    async fn update_stack(&self, request: &StackRequest<'_>) -> Result<UpdateOutcome, Error>;

    async fn delete_stack(&self, stack_name: &str) -> Result<(), Error>;

    /// Live (not deleted) stacks whose name starts with `prefix`.
    async fn list_stacks(&self, prefix: &str) -> Result<Vec<StackSummary>, Error>;

    async fn get_outputs(&self, stack_name: &str) -> Result<StackOutputs, Error>;

    async fn validate_template(&self, template_body: &str) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The stack settled in the requested state.
    Reached(StackState),
    /// The stack settled in some other terminal state.
    Settled(StackState),
    /// The bound elapsed; carries the last observed state.
    TimedOut(StackState),
}

/// Polls `stack_name` until it reaches a terminal state or `policy.timeout`
/// elapses. `Absent` satisfies a `DeleteComplete` target.
pub async fn wait_for_state<O: Orchestrator + ?Sized>(
    orchestrator: &O,
    stack_name: &str,
    target: StackState,
    policy: &WaitPolicy,
) -> Result<WaitOutcome, Error> {
    let deadline = Instant::now() + policy.timeout;

    loop {
        let state = orchestrator.describe_stack(stack_name).await?;
        debug!(stack = stack_name, state = %state, "Polled stack state");

        let reached = state == target
            || (target == StackState::DeleteComplete && state == StackState::Absent);
        if reached {
            return Ok(WaitOutcome::Reached(state));
        }
        if state.is_terminal() {
            return Ok(WaitOutcome::Settled(state));
        }
        if Instant::now() + policy.poll_interval > deadline {
            return Ok(WaitOutcome::TimedOut(state));
        }

        sleep(policy.poll_interval).await;
    }
}
