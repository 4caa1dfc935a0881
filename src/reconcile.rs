use std::collections::HashSet;
use std::fs;
use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::orchestrator::{
    self, wait_for_state, Orchestrator, StackRequest, UpdateOutcome, WaitOutcome, WaitPolicy,
};
use crate::outputs::StackOutputs;
use crate::parameters::ParameterSet;
use crate::stack::{StackDescriptor, StackState};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Unable to read template {path}: {reason}")]
    TemplateUnreadable { path: String, reason: String },

    #[error("A reconciliation of {0} is already in flight")]
    AlreadyInFlight(String),

    #[error("Stack {stack} ended in {state} instead of {expected}")]
    OperationFailed {
        stack: String,
        state: StackState,
        expected: StackState,
    },

    #[error("Orchestration call for {stack} failed: {source}")]
    Service {
        stack: String,
        #[source]
        source: orchestrator::Error,
    },
}

/// What the reconciler did to the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Recreated,
    Updated,
    Unchanged,
    /// An operation started elsewhere was still running; nothing was sent.
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub stack_name: String,
    pub action: Action,
    /// Last observed state. An in-progress state here means the wait timed out.
    pub state: StackState,
    pub timed_out: bool,
    pub outputs: StackOutputs,
}

pub struct Reconciler<'a> {
    orchestrator: &'a dyn Orchestrator,
    wait_policy: WaitPolicy,
    delete_wait_policy: WaitPolicy,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases a stack name from the in-flight set when dropped.
struct InFlight<'r> {
    names: &'r Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

enum Settled {
    Done(StackState),
    TimedOut(StackState),
}

impl<'a> Reconciler<'a> {
    pub fn new(
        orchestrator: &'a dyn Orchestrator,
        wait_policy: WaitPolicy,
        delete_wait_policy: WaitPolicy,
    ) -> Self {
        return Self {
            orchestrator,
            wait_policy,
            delete_wait_policy,
            in_flight: Mutex::new(HashSet::new()),
        };
    }

    /// Drives the stack named by `descriptor` to the template and parameters given.
    ///
    /// - absent: create
    /// - create/update in progress: wait for it to settle first
    /// - failed or deleting: delete, wait (timeout tolerated), create
    /// - complete: update, where "no changes" counts as success
    ///
    /// Every wait that times out is logged and the run carries on. After a
    /// create or update the operation is assumed to finish on its own; an
    /// operation already in flight is left alone.
    pub async fn reconcile(
        &self,
        descriptor: &StackDescriptor,
        parameters: &ParameterSet,
    ) -> Result<Reconciliation, Error> {
        let _guard = self.claim(&descriptor.name)?;
        let name = descriptor.name.as_str();

        let template_body = match fs::read_to_string(&descriptor.template) {
            Ok(body) => body,
            Err(error) => {
                return Err(Error::TemplateUnreadable {
                    path: descriptor.template.display().to_string(),
                    reason: error.to_string(),
                })
            }
        };
        let request = StackRequest {
            stack_name: name,
            template_body: &template_body,
            parameters,
            capabilities: &descriptor.capabilities,
        };

        let mut state = self.describe(name).await?;
        info!(stack = name, state = %state, "Reconciling stack");

        if matches!(state, StackState::CreateInProgress | StackState::UpdateInProgress) {
            let expected = match state {
                StackState::CreateInProgress => StackState::CreateComplete,
                _ => StackState::UpdateComplete,
            };
            info!(stack = name, state = %state, "Waiting for the in-flight operation to settle");
            state = match self.wait(name, expected, &self.wait_policy).await? {
                WaitOutcome::Reached(settled) | WaitOutcome::Settled(settled) => settled,
                WaitOutcome::TimedOut(current) => {
                    warn!(
                        stack = name,
                        state = %current,
                        "In-flight operation did not settle, leaving the stack as it is"
                    );
                    return self.finish(name, Action::Deferred, Settled::TimedOut(current)).await;
                }
            };
        }

        let (action, settled) = match state {
            StackState::Absent | StackState::DeleteComplete => {
                (Action::Created, self.create(&request).await?)
            }
            StackState::Failed | StackState::DeleteInProgress => {
                self.delete(name).await?;
                (Action::Recreated, self.create(&request).await?)
            }
            StackState::CreateComplete | StackState::UpdateComplete => {
                match self.update(&request).await? {
                    Some(settled) => (Action::Updated, settled),
                    None => (Action::Unchanged, Settled::Done(state)),
                }
            }
            StackState::CreateInProgress | StackState::UpdateInProgress => {
                (Action::Deferred, Settled::TimedOut(state))
            }
        };

        return self.finish(name, action, settled).await;
    }

    async fn finish(
        &self,
        name: &str,
        action: Action,
        settled: Settled,
    ) -> Result<Reconciliation, Error> {
        let (state, timed_out) = match settled {
            Settled::Done(state) => (state, false),
            Settled::TimedOut(state) => (state, true),
        };

        let outputs = match self.orchestrator.get_outputs(name).await {
            Ok(outputs) => outputs,
            Err(error) if timed_out => {
                warn!(stack = name, "Outputs unavailable while an operation is running: {}", error);
                StackOutputs::new()
            }
            Err(source) => {
                return Err(Error::Service {
                    stack: name.to_string(),
                    source,
                })
            }
        };

        info!(
            stack = name,
            state = %state,
            action = ?action,
            outputs = outputs.len(),
            "Stack reconciled"
        );
        return Ok(Reconciliation {
            stack_name: name.to_string(),
            action,
            state,
            timed_out,
            outputs,
        });
    }

    fn claim(&self, name: &str) -> Result<InFlight<'_>, Error> {
        let mut names = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !names.insert(name.to_string()) {
            return Err(Error::AlreadyInFlight(name.to_string()));
        }

        return Ok(InFlight {
            names: &self.in_flight,
            name: name.to_string(),
        });
    }

    async fn describe(&self, name: &str) -> Result<StackState, Error> {
        return self
            .orchestrator
            .describe_stack(name)
            .await
            .map_err(|source| Error::Service {
                stack: name.to_string(),
                source,
            });
    }

    async fn wait(
        &self,
        name: &str,
        target: StackState,
        policy: &WaitPolicy,
    ) -> Result<WaitOutcome, Error> {
        return wait_for_state(self.orchestrator, name, target, policy)
            .await
            .map_err(|source| Error::Service {
                stack: name.to_string(),
                source,
            });
    }

    async fn create(&self, request: &StackRequest<'_>) -> Result<Settled, Error> {
        let name = request.stack_name;
        info!(stack = name, "Creating stack");
        if let Err(source) = self.orchestrator.create_stack(request).await {
            return Err(Error::Service {
                stack: name.to_string(),
                source,
            });
        }

        return self.settle(name, StackState::CreateComplete).await;
    }

    /// `None` when the service reports nothing to update.
    async fn update(&self, request: &StackRequest<'_>) -> Result<Option<Settled>, Error> {
        let name = request.stack_name;
        info!(stack = name, "Updating stack");
        let outcome = match self.orchestrator.update_stack(request).await {
            Ok(outcome) => outcome,
            Err(source) => {
                return Err(Error::Service {
                    stack: name.to_string(),
                    source,
                })
            }
        };

        return match outcome {
            UpdateOutcome::NoChanges => {
                info!(stack = name, "No changes to apply");
                Ok(None)
            }
            UpdateOutcome::Started => {
                Ok(Some(self.settle(name, StackState::UpdateComplete).await?))
            }
        };
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        warn!(stack = name, "Stack cannot be reconciled in place, deleting it");
        if let Err(source) = self.orchestrator.delete_stack(name).await {
            return Err(Error::Service {
                stack: name.to_string(),
                source,
            });
        }

        let policy = &self.delete_wait_policy;
        match self.wait(name, StackState::DeleteComplete, policy).await? {
            WaitOutcome::Reached(_) => info!(stack = name, "Stack deleted"),
            WaitOutcome::Settled(state) | WaitOutcome::TimedOut(state) => {
                warn!(
                    stack = name,
                    state = %state,
                    "Deletion not confirmed, continuing with create"
                )
            }
        }

        return Ok(());
    }

    async fn settle(&self, name: &str, expected: StackState) -> Result<Settled, Error> {
        return match self.wait(name, expected, &self.wait_policy).await? {
            WaitOutcome::Reached(state) => Ok(Settled::Done(state)),
            WaitOutcome::Settled(state) => Err(Error::OperationFailed {
                stack: name.to_string(),
                state,
                expected,
            }),
            WaitOutcome::TimedOut(state) => {
                warn!(
                    stack = name,
                    state = %state,
                    "Timed out waiting for {}, assuming it completes on its own", expected
                );
                Ok(Settled::TimedOut(state))
            }
        };
    }
}
