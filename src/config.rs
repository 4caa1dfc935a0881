use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, io, path::Path, path::PathBuf};
use validator::{Validate, ValidationError};

use crate::orchestrator::WaitPolicy;
use crate::outputs;
use crate::parameters;
use crate::stack::{Capability, StackDescriptor};

pub const DEFAULT_ENVIRONMENT: &str = "prod";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PROJECT_FILE: &str = "deploy.yaml";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Invalid environment name `{0}`: use letters, digits and hyphens")]
    InvalidEnvironment(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamOutput {
    /// Parameter key on the dependent stack.
    pub parameter: String,
    /// Output key on the upstream stack.
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    #[validate(custom = "validate_name_segment")]
    pub role: String,

    #[validate(custom = "validate_template_file")]
    pub template: PathBuf,

    #[serde(default)]
    pub capabilities: Vec<Capability>,

    #[serde(default)]
    pub upstream_outputs: Vec<UpstreamOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FunctionConfig {
    #[validate(custom = "validate_name_segment")]
    pub name: String,

    pub source: PathBuf,

    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefault {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    #[validate(custom = "validate_name_segment")]
    pub prefix: String,

    pub parameters_dir: PathBuf,

    pub work_dir: PathBuf,

    #[validate]
    pub infrastructure: StackConfig,

    #[validate]
    pub monitoring: StackConfig,

    #[validate]
    pub functions: Vec<FunctionConfig>,

    pub default_parameters: Vec<ParameterDefault>,

    pub dashboards: Vec<PathBuf>,

    pub notable_output: String,

    pub required_tools: Vec<String>,

    #[validate(length(min = 1))]
    pub runtime: String,

    #[validate(length(min = 1))]
    pub linter: String,

    #[validate(custom = "validate_command")]
    pub test_command: Option<Vec<String>>,

    #[validate(length(min = 1))]
    pub entry_point: String,

    #[validate(range(min = 1))]
    pub wait_timeout_secs: u64,

    #[validate(range(min = 1))]
    pub delete_wait_timeout_secs: u64,

    #[validate(range(min = 1))]
    pub poll_interval_secs: u64,

    pub cleanup_artifact_bucket: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        let function = |name: &str| FunctionConfig {
            name: name.to_string(),
            source: PathBuf::from(format!("lambda-functions/{}/lambda_function.py", name)),
            manifest: Some(PathBuf::from(format!("lambda-functions/{}/requirements.txt", name))),
        };
        let upstream = |key: &str| UpstreamOutput {
            parameter: key.to_string(),
            output: key.to_string(),
        };

        Self {
            prefix: "infra-monitoring".to_string(),
            parameters_dir: PathBuf::from("parameters"),
            work_dir: PathBuf::from(".deploy"),
            infrastructure: StackConfig {
                role: "infrastructure".to_string(),
                template: PathBuf::from("cloudformation/infrastructure.yaml"),
                capabilities: vec![Capability::NamedIam],
                upstream_outputs: Vec::new(),
            },
            monitoring: StackConfig {
                role: "monitoring".to_string(),
                template: PathBuf::from("cloudformation/monitoring-stack.yaml"),
                capabilities: vec![Capability::NamedIam],
                upstream_outputs: vec![
                    upstream("AlertTopicArn"),
                    upstream("IncidentResponseFunctionArn"),
                    upstream("HealthCheckerFunctionArn"),
                ],
            },
            functions: vec![
                function("incident-response"),
                function("health-checker"),
                function("alert-processor"),
            ],
            default_parameters: vec![
                ParameterDefault {
                    key: "ProjectName".to_string(),
                    value: "{prefix}".to_string(),
                },
                ParameterDefault {
                    key: "AlertEmail".to_string(),
                    value: "alerts+{environment}@example.com".to_string(),
                },
            ],
            dashboards: vec![
                PathBuf::from("dashboards/main-dashboard.json"),
                PathBuf::from("dashboards/ec2-dashboard.json"),
                PathBuf::from("dashboards/rds-dashboard.json"),
            ],
            notable_output: "DashboardURL".to_string(),
            required_tools: vec!["cfn-lint".to_string()],
            runtime: "python3".to_string(),
            linter: "cfn-lint".to_string(),
            test_command: None,
            entry_point: "lambda_function.py".to_string(),
            wait_timeout_secs: 1800,
            delete_wait_timeout_secs: 900,
            poll_interval_secs: 10,
            cleanup_artifact_bucket: true,
        }
    }
}

pub fn parse(path: &Path) -> Result<ProjectConfig, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    let config: ProjectConfig = match serde_yaml::from_str(&contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    match config.validate() {
        Ok(_) => (),
        Err(error) => return Err(Error::ValidationError(error.to_string())),
    }

    return Ok(config);
}

/// Like [`parse`], but a missing file yields the built-in project layout.
pub fn parse_or_default(path: &Path) -> Result<ProjectConfig, Error> {
    return match parse(path) {
        Err(Error::FileNotFound(_)) => Ok(ProjectConfig::default()),
        other => other,
    };
}

fn validate_name_segment(value: &str) -> Result<(), ValidationError> {
    if !is_name_segment(value) {
        return Err(ValidationError::new(
            "Names must start with a letter and contain only letters, digits and hyphens",
        ));
    }

    return Ok(());
}

fn is_name_segment(value: &str) -> bool {
    let mut chars = value.chars();
    return match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
        }
        _ => false,
    };
}

fn validate_template_file(template: &PathBuf) -> Result<(), ValidationError> {
    let file_extension = match template.extension() {
        Some(extension) => extension,
        None => {
            return Err(ValidationError::new(
                "Unable to parse the extension of the template location",
            ))
        }
    };
    if file_extension != "yaml" && file_extension != "yml" && file_extension != "json" {
        return Err(ValidationError::new(
            "The template location has to end with `.yaml`, `.yml` or `.json`",
        ));
    }

    return Ok(());
}

fn validate_command(command: &Vec<String>) -> Result<(), ValidationError> {
    if command.is_empty() || command[0].is_empty() {
        return Err(ValidationError::new("The test command needs a program"));
    }

    return Ok(());
}

/// The immutable settings of one invocation.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub environment: String,
    pub region: String,
    pub validate_only: bool,
    pub skip_tests: bool,
    pub project_root: PathBuf,
    pub project: ProjectConfig,
}

impl DeploymentConfig {
    pub fn new(
        environment: String,
        region: String,
        validate_only: bool,
        skip_tests: bool,
        project_root: PathBuf,
        project: ProjectConfig,
    ) -> Result<Self, Error> {
        if !is_name_segment(&environment) {
            return Err(Error::InvalidEnvironment(environment));
        }

        return Ok(Self {
            environment,
            region,
            validate_only,
            skip_tests,
            project_root,
            project,
        });
    }

    pub fn path(&self, relative: &Path) -> PathBuf {
        return self.project_root.join(relative);
    }

    fn descriptor(&self, stack: &StackConfig, parameter_file: PathBuf) -> StackDescriptor {
        return StackDescriptor::new(
            &self.project.prefix,
            &self.environment,
            &stack.role,
            self.path(&stack.template),
            parameter_file,
            stack.capabilities.clone(),
        );
    }

    pub fn infrastructure_stack(&self) -> StackDescriptor {
        let parameters_dir = self.path(&self.project.parameters_dir);
        let parameter_file = parameters::parameter_file_path(&parameters_dir, &self.environment);
        return self.descriptor(&self.project.infrastructure, parameter_file);
    }

    pub fn monitoring_stack(&self) -> StackDescriptor {
        let parameter_file = self.path(&self.project.parameters_dir).join(format!(
            "{}-{}.json",
            self.environment, self.project.monitoring.role
        ));
        return self.descriptor(&self.project.monitoring, parameter_file);
    }

    pub fn templates(&self) -> Vec<PathBuf> {
        return vec![
            self.path(&self.project.infrastructure.template),
            self.path(&self.project.monitoring.template),
        ];
    }

    pub fn dashboards(&self) -> Vec<PathBuf> {
        return self.project.dashboards.iter().map(|path| self.path(path)).collect();
    }

    pub fn parameter_defaults(&self) -> Vec<(String, String)> {
        return self
            .project
            .default_parameters
            .iter()
            .map(|default| {
                let value = default.value.replace("{prefix}", &self.project.prefix);
                (default.key.clone(), value)
            })
            .collect();
    }

    /// Prefix shared by every stack this environment manages.
    pub fn stack_filter(&self) -> String {
        return format!("{}-{}-", self.project.prefix, self.environment);
    }

    pub fn outputs_cache_path(&self) -> PathBuf {
        let work_dir = self.path(&self.project.work_dir);
        return outputs::cache_path(&work_dir, &self.infrastructure_stack().name);
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        return WaitPolicy {
            timeout: Duration::from_secs(self.project.wait_timeout_secs),
            poll_interval: Duration::from_secs(self.project.poll_interval_secs),
        };
    }

    pub fn delete_wait_policy(&self) -> WaitPolicy {
        return WaitPolicy {
            timeout: Duration::from_secs(self.project.delete_wait_timeout_secs),
            poll_interval: Duration::from_secs(self.project.poll_interval_secs),
        };
    }
}
