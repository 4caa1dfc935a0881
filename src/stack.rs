use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Remote lifecycle state of a stack, collapsed onto the states the reconciler
/// distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackState {
    Absent,
    CreateInProgress,
    CreateComplete,
    UpdateInProgress,
    UpdateComplete,
    Failed,
    DeleteInProgress,
    DeleteComplete,
}

impl StackState {
    pub fn from_status(status: &str) -> Self {
        match status {
            "CREATE_IN_PROGRESS" => StackState::CreateInProgress,
            "CREATE_COMPLETE" => StackState::CreateComplete,
            "UPDATE_IN_PROGRESS"
            | "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS"
            | "IMPORT_IN_PROGRESS" => StackState::UpdateInProgress,
            "UPDATE_COMPLETE" | "IMPORT_COMPLETE" => StackState::UpdateComplete,
            "DELETE_IN_PROGRESS" => StackState::DeleteInProgress,
            "DELETE_COMPLETE" => StackState::DeleteComplete,
            // *_FAILED, every *ROLLBACK* variant, REVIEW_IN_PROGRESS and anything new
            _ => StackState::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StackState::Absent => "ABSENT",
            StackState::CreateInProgress => "CREATE_IN_PROGRESS",
            StackState::CreateComplete => "CREATE_COMPLETE",
            StackState::UpdateInProgress => "UPDATE_IN_PROGRESS",
            StackState::UpdateComplete => "UPDATE_COMPLETE",
            StackState::Failed => "FAILED",
            StackState::DeleteInProgress => "DELETE_IN_PROGRESS",
            StackState::DeleteComplete => "DELETE_COMPLETE",
        }
    }

    /// Whether the in-flight operation (if any) has finished.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            StackState::CreateInProgress
                | StackState::UpdateInProgress
                | StackState::DeleteInProgress
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, StackState::CreateComplete | StackState::UpdateComplete)
    }
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "CAPABILITY_IAM")]
    Iam,
    #[serde(rename = "CAPABILITY_NAMED_IAM")]
    NamedIam,
    #[serde(rename = "CAPABILITY_AUTO_EXPAND")]
    AutoExpand,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Iam => "CAPABILITY_IAM",
            Capability::NamedIam => "CAPABILITY_NAMED_IAM",
            Capability::AutoExpand => "CAPABILITY_AUTO_EXPAND",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackDescriptor {
    pub name: String,
    pub template: PathBuf,
    pub parameter_file: PathBuf,
    pub capabilities: Vec<Capability>,
}

impl StackDescriptor {
    pub fn new(
        prefix: &str,
        environment: &str,
        role: &str,
        template: PathBuf,
        parameter_file: PathBuf,
        capabilities: Vec<Capability>,
    ) -> Self {
        return Self {
            name: stack_name(prefix, environment, role),
            template,
            parameter_file,
            capabilities,
        };
    }
}

pub fn stack_name(prefix: &str, environment: &str, role: &str) -> String {
    return format!("{}-{}-{}", prefix, environment, role);
}
