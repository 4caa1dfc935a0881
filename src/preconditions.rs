use tracing::{info, warn};

use crate::config::DeploymentConfig;
use crate::identity::Identity;
use crate::process::{self, CommandRunner};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Required tool `{0}` is not installed or not invocable")]
    MissingTool(String),

    #[error("Required runtime `{0}` is not installed")]
    MissingRuntime(String),

    #[error("Credentials do not resolve to a valid identity: {0}")]
    InvalidCredentials(String),
}

/// Checks every capability the run needs before any remote mutation happens.
/// The first missing capability aborts the run.
pub async fn check(
    config: &DeploymentConfig,
    runner: &dyn CommandRunner,
    identity: &dyn Identity,
) -> Result<(), Error> {
    for tool in &config.project.required_tools {
        if !invocable(runner, tool).await {
            return Err(Error::MissingTool(tool.clone()));
        }
    }

    match identity.caller_identity().await {
        Ok(arn) => info!(identity = %arn, "Resolved caller identity"),
        Err(error) => return Err(Error::InvalidCredentials(error.to_string())),
    }

    if !invocable(runner, &config.project.runtime).await {
        return Err(Error::MissingRuntime(config.project.runtime.clone()));
    }

    info!("All preconditions satisfied");
    return Ok(());
}

async fn invocable(runner: &dyn CommandRunner, program: &str) -> bool {
    return match runner.run(program, &["--version".to_string()], None).await {
        Ok(output) if output.success() => true,
        Ok(output) => {
            warn!(program, status = ?output.status, "Version probe failed");
            false
        }
        Err(process::Error::NotFound(_)) => false,
        Err(error) => {
            warn!(program, "Version probe failed: {}", error);
            false
        }
    };
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::check;
    use super::Error;
    use crate::config::{DeploymentConfig, ProjectConfig};
    use crate::process::CommandOutput;
    use crate::testing::{FakeIdentity, FakeRunner};

    fn config() -> DeploymentConfig {
        DeploymentConfig::new(
            "prod".to_string(),
            "us-east-1".to_string(),
            false,
            false,
            PathBuf::from("."),
            ProjectConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn passes_when_everything_is_present() {
        let runner = FakeRunner::new();

        let result = check(&config(), &runner, &FakeIdentity::resolved()).await;
        assert_eq!(Ok(()), result);
        let programs: Vec<String> = runner.invocations().into_iter().map(|i| i.program).collect();
        assert_eq!(vec!["cfn-lint".to_string(), "python3".to_string()], programs);
    }

    #[tokio::test]
    async fn missing_tool_is_named() {
        let runner = FakeRunner::new();
        runner.missing("cfn-lint");

        let result = check(&config(), &runner, &FakeIdentity::resolved()).await;
        assert_eq!(Err(Error::MissingTool("cfn-lint".to_string())), result);
    }

    #[tokio::test]
    async fn failing_version_probe_counts_as_missing() {
        let runner = FakeRunner::new();
        runner.respond(
            "python3",
            CommandOutput {
                status: Some(127),
                ..CommandOutput::default()
            },
        );

        let result = check(&config(), &runner, &FakeIdentity::resolved()).await;
        assert_eq!(Err(Error::MissingRuntime("python3".to_string())), result);
    }

    #[tokio::test]
    async fn unresolved_identity_fails_before_runtime_probe() {
        let runner = FakeRunner::new();

        let result = check(&config(), &runner, &FakeIdentity::unresolved()).await;
        match result.err().unwrap() {
            Error::InvalidCredentials(_) => {}
            _ => panic!("Expected `InvalidCredentials` error"),
        }
        assert_eq!(1, runner.invocations().len());
    }
}
