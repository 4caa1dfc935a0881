//! In-memory stand-ins for the remote services, used by unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::identity::{self, Identity};
use crate::orchestrator::{self, Orchestrator, StackRequest, StackSummary, UpdateOutcome};
use crate::outputs::StackOutputs;
use crate::parameters::ParameterSet;
use crate::process::{self, CommandOutput, CommandRunner};
use crate::stack::StackState;
use crate::store::{self, ArtifactStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Describe(String),
    Create(String),
    Update(String),
    Delete(String),
    List(String),
    Outputs(String),
    Validate,
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        matches!(self, Call::Create(_) | Call::Update(_) | Call::Delete(_))
    }
}

#[derive(Debug, Clone)]
struct FakeStack {
    state: StackState,
    /// Describes left before `state` flips to the pending state.
    pending: Option<(usize, StackState)>,
    applied: Option<(String, ParameterSet)>,
}

#[derive(Default)]
struct Behaviour {
    create_result: Option<StackState>,
    stuck_deleting: bool,
    fail_listing: bool,
}

/// Simulates stack lifecycles: every mutation passes through one in-progress
/// poll before settling.
#[derive(Default)]
pub struct FakeOrchestrator {
    stacks: Mutex<HashMap<String, FakeStack>>,
    outputs: Mutex<HashMap<String, StackOutputs>>,
    calls: Mutex<Vec<Call>>,
    behaviour: Mutex<Behaviour>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, name: &str, state: StackState) {
        self.stacks.lock().unwrap().insert(
            name.to_string(),
            FakeStack {
                state,
                pending: None,
                applied: None,
            },
        );
    }

    pub fn seed_applied(
        &self,
        name: &str,
        state: StackState,
        template: &str,
        parameters: &ParameterSet,
    ) {
        self.stacks.lock().unwrap().insert(
            name.to_string(),
            FakeStack {
                state,
                pending: None,
                applied: Some((template.to_string(), parameters.clone())),
            },
        );
    }

    pub fn settle_after(&self, name: &str, polls: usize, state: StackState) {
        if let Some(stack) = self.stacks.lock().unwrap().get_mut(name) {
            stack.pending = Some((polls, state));
        }
    }

    pub fn set_outputs(&self, name: &str, outputs: StackOutputs) {
        self.outputs.lock().unwrap().insert(name.to_string(), outputs);
    }

    pub fn fail_creates_with(&self, state: StackState) {
        self.behaviour.lock().unwrap().create_result = Some(state);
    }

    pub fn keep_deleting(&self) {
        self.behaviour.lock().unwrap().stuck_deleting = true;
    }

    pub fn fail_listing(&self) {
        self.behaviour.lock().unwrap().fail_listing = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn describe_stack(&self, stack_name: &str) -> Result<StackState, orchestrator::Error> {
        self.record(Call::Describe(stack_name.to_string()));

        let mut stacks = self.stacks.lock().unwrap();
        let Some(stack) = stacks.get_mut(stack_name) else {
            return Ok(StackState::Absent);
        };
        match stack.pending {
            Some((0, next)) => {
                stack.state = next;
                stack.pending = None;
            }
            Some((remaining, next)) => stack.pending = Some((remaining - 1, next)),
            None => (),
        }

        if stack.state == StackState::Absent || stack.state == StackState::DeleteComplete {
            let state = stack.state;
            stacks.remove(stack_name);
            return Ok(if state == StackState::DeleteComplete { StackState::Absent } else { state });
        }
        return Ok(stack.state);
    }

    async fn create_stack(&self, request: &StackRequest<'_>) -> Result<(), orchestrator::Error> {
        self.record(Call::Create(request.stack_name.to_string()));

        let result = self
            .behaviour
            .lock()
            .unwrap()
            .create_result
            .unwrap_or(StackState::CreateComplete);
        let mut stacks = self.stacks.lock().unwrap();
        // A stack still deleting past the caller's wait window is treated as
        // gone by the time the create lands.
        let occupied = stacks
            .get(request.stack_name)
            .map_or(false, |stack| stack.state != StackState::DeleteInProgress);
        if occupied {
            return Err(orchestrator::Error::ServiceError(format!(
                "Stack [{}] already exists",
                request.stack_name
            )));
        }
        stacks.insert(
            request.stack_name.to_string(),
            FakeStack {
                state: StackState::CreateInProgress,
                pending: Some((1, result)),
                applied: Some((request.template_body.to_string(), request.parameters.clone())),
            },
        );
        return Ok(());
    }

    async fn update_stack(
        &self,
        request: &StackRequest<'_>,
    ) -> Result<UpdateOutcome, orchestrator::Error> {
        self.record(Call::Update(request.stack_name.to_string()));

        let mut stacks = self.stacks.lock().unwrap();
        let Some(stack) = stacks.get_mut(request.stack_name) else {
            return Err(orchestrator::Error::NotFoundError(request.stack_name.to_string()));
        };
        let desired = (request.template_body.to_string(), request.parameters.clone());
        if stack.applied.as_ref() == Some(&desired) {
            return Ok(UpdateOutcome::NoChanges);
        }

        stack.state = StackState::UpdateInProgress;
        stack.pending = Some((1, StackState::UpdateComplete));
        stack.applied = Some(desired);
        return Ok(UpdateOutcome::Started);
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), orchestrator::Error> {
        self.record(Call::Delete(stack_name.to_string()));

        let stuck = self.behaviour.lock().unwrap().stuck_deleting;
        if let Some(stack) = self.stacks.lock().unwrap().get_mut(stack_name) {
            stack.state = StackState::DeleteInProgress;
            stack.pending = if stuck {
                None
            } else {
                Some((1, StackState::DeleteComplete))
            };
        }
        return Ok(());
    }

    async fn list_stacks(&self, prefix: &str) -> Result<Vec<StackSummary>, orchestrator::Error> {
        self.record(Call::List(prefix.to_string()));

        if self.behaviour.lock().unwrap().fail_listing {
            return Err(orchestrator::Error::ServiceError("throttled".to_string()));
        }
        let mut summaries: Vec<StackSummary> = self
            .stacks
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, stack)| StackSummary {
                name: name.clone(),
                state: stack.state,
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        return Ok(summaries);
    }

    async fn get_outputs(&self, stack_name: &str) -> Result<StackOutputs, orchestrator::Error> {
        self.record(Call::Outputs(stack_name.to_string()));

        if !self.stacks.lock().unwrap().contains_key(stack_name) {
            return Err(orchestrator::Error::NotFoundError(stack_name.to_string()));
        }
        return Ok(self
            .outputs
            .lock()
            .unwrap()
            .get(stack_name)
            .cloned()
            .unwrap_or_default());
    }

    async fn validate_template(&self, template_body: &str) -> Result<(), orchestrator::Error> {
        self.record(Call::Validate);

        if template_body.contains("INVALID") {
            return Err(orchestrator::Error::InvalidTemplate(
                "Template format error: unsupported structure".to_string(),
            ));
        }
        return Ok(());
    }
}

#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<HashMap<String, Vec<(String, Vec<u8>)>>>,
    versioned: Mutex<HashSet<String>>,
    failing_keys: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts_to(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .get(bucket)
            .map(|objects| objects.iter().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.iter().find(|(existing, _)| existing == key))
            .map(|(_, body)| body.clone())
    }

    pub fn buckets(&self) -> Vec<String> {
        let mut buckets: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        buckets.sort();
        buckets
    }

    pub fn is_versioned(&self, bucket: &str) -> bool {
        self.versioned.lock().unwrap().contains(bucket)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn create_bucket(&self, bucket: &str, _region: &str) -> Result<(), store::Error> {
        self.objects.lock().unwrap().insert(bucket.to_string(), Vec::new());
        return Ok(());
    }

    async fn enable_versioning(&self, bucket: &str) -> Result<(), store::Error> {
        self.versioned.lock().unwrap().insert(bucket.to_string());
        return Ok(());
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), store::Error> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(store::Error::ServiceError("Access Denied".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .push((key.to_string(), body));
        return Ok(());
    }

    async fn delete_bucket(&self, bucket: &str, _force: bool) -> Result<(), store::Error> {
        self.objects.lock().unwrap().remove(bucket);
        self.deleted.lock().unwrap().push(bucket.to_string());
        return Ok(());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// Answers every program with exit status 0 unless told otherwise. A runtime
/// `-m pip install ... -t <dir>` drops a marker module into `<dir>`.
#[derive(Default)]
pub struct FakeRunner {
    responses: Mutex<HashMap<String, CommandOutput>>,
    missing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, program: &str, output: CommandOutput) {
        self.responses.lock().unwrap().insert(program.to_string(), output);
    }

    pub fn missing(&self, program: &str) {
        self.missing.lock().unwrap().insert(program.to_string());
    }

    /// `program` never exits, like a process still running when the run is interrupted.
    pub fn hang(&self, program: &str) {
        self.hanging.lock().unwrap().insert(program.to_string());
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, process::Error> {
        self.invocations.lock().unwrap().push(Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            cwd: cwd.map(Path::to_path_buf),
        });

        if self.missing.lock().unwrap().contains(program) {
            return Err(process::Error::NotFound(program.to_string()));
        }

        let hangs = self.hanging.lock().unwrap().contains(program);
        if hangs {
            futures::future::pending::<()>().await;
        }

        if args.iter().any(|arg| arg == "pip") {
            if let Some(position) = args.iter().position(|arg| arg == "-t") {
                if let Some(target) = args.get(position + 1) {
                    let marker = Path::new(target).join("vendored.py");
                    std::fs::write(marker, "# dependency\n").unwrap();
                }
            }
        }

        return Ok(self
            .responses
            .lock()
            .unwrap()
            .get(program)
            .cloned()
            .unwrap_or(CommandOutput {
                status: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            }));
    }
}

pub struct FakeIdentity {
    arn: Option<String>,
}

impl FakeIdentity {
    pub fn resolved() -> Self {
        Self {
            arn: Some("arn:aws:iam::123456789012:user/deployer".to_string()),
        }
    }

    pub fn unresolved() -> Self {
        Self { arn: None }
    }
}

#[async_trait]
impl Identity for FakeIdentity {
    async fn caller_identity(&self) -> Result<String, identity::Error> {
        match &self.arn {
            Some(arn) => Ok(arn.clone()),
            None => Err(identity::Error::Unresolved("ExpiredToken".to_string())),
        }
    }
}
