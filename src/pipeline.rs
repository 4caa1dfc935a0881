use std::fs;
use std::future::Future;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::{self, DeploymentConfig};
use crate::dependent;
use crate::identity::Identity;
use crate::orchestrator::Orchestrator;
use crate::outputs;
use crate::package::{FunctionUnit, PackageReport, Packager};
use crate::parameters;
use crate::preconditions;
use crate::process::CommandRunner;
use crate::reconcile::{self, Reconciler, Reconciliation};
use crate::store::{self, artifact_bucket_name, ArtifactStore};
use crate::summary::{self, StackReport};
use crate::validate::{self, ValidationReport};

/// Parameter through which the infrastructure stack learns the artifact bucket.
pub const ARTIFACT_BUCKET_PARAMETER: &str = "ArtifactBucket";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Precondition(#[from] preconditions::Error),

    #[error(transparent)]
    Validation(#[from] validate::Error),

    #[error("Tests failed: {0}")]
    TestsFailed(String),

    #[error("Artifact store: {0}")]
    Store(#[from] store::Error),

    #[error(transparent)]
    Parameters(#[from] parameters::Error),

    #[error(transparent)]
    Reconcile(#[from] reconcile::Error),

    #[error(transparent)]
    Dependent(#[from] dependent::Error),

    #[error(transparent)]
    Outputs(#[from] outputs::Error),

    #[error("Interrupted")]
    Interrupted,

    #[error("Unable to prepare {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The remote services and local tools a run talks to.
pub struct Services<'a> {
    pub orchestrator: &'a dyn Orchestrator,
    pub store: &'a dyn ArtifactStore,
    pub runner: &'a dyn CommandRunner,
    pub identity: &'a dyn Identity,
}

#[derive(Debug)]
pub struct DeploymentReport {
    pub bucket: String,
    pub packages: PackageReport,
    pub infrastructure: Reconciliation,
    pub monitoring: Reconciliation,
    pub summary: Vec<StackReport>,
}

#[derive(Debug)]
pub enum Outcome {
    Validated(ValidationReport),
    Deployed(DeploymentReport),
}

/// Preconditions, validation, tests, artifact publishing, both stacks, summary.
/// Nothing is mutated until preconditions, validation and tests have passed.
///
/// When `interrupt` resolves the run stops at its current step. Local staging
/// is released with the step and the artifact bucket is still torn down.
pub async fn run<I>(
    config: &DeploymentConfig,
    services: &Services<'_>,
    now: DateTime<Utc>,
    interrupt: I,
) -> Result<Outcome, Error>
where
    I: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    info!(environment = %config.environment, region = %config.region, "Starting deployment");

    let validation = tokio::select! {
        result = verify(config, services) => result?,
        _ = &mut interrupt => {
            warn!("Interrupted before any change");
            return Err(Error::Interrupted);
        }
    };
    if config.validate_only {
        info!("Validation only, stopping before any change");
        return Ok(Outcome::Validated(validation));
    }

    let bucket = artifact_bucket_name(&config.project.prefix, &config.environment, now);
    services.store.create_bucket(&bucket, &config.region).await?;
    info!(bucket = %bucket, "Created artifact bucket");

    let result = tokio::select! {
        result = deploy(config, services, &bucket) => result,
        _ = &mut interrupt => {
            warn!(bucket = %bucket, "Interrupted, releasing resources");
            Err(Error::Interrupted)
        }
    };

    if config.project.cleanup_artifact_bucket {
        match services.store.delete_bucket(&bucket, true).await {
            Ok(_) => info!(bucket = %bucket, "Removed artifact bucket"),
            Err(error) => warn!(bucket = %bucket, "Unable to remove artifact bucket: {}", error),
        }
    }

    return result.map(Outcome::Deployed);
}

/// Everything that must pass before the first change.
async fn verify(
    config: &DeploymentConfig,
    services: &Services<'_>,
) -> Result<ValidationReport, Error> {
    preconditions::check(config, services.runner, services.identity).await?;
    let validation = validate::validate(config, services.orchestrator, services.runner).await?;

    if config.validate_only {
        return Ok(validation);
    }
    if config.skip_tests {
        info!("Skipping tests");
    } else {
        run_tests(config, services.runner).await?;
    }

    return Ok(validation);
}

async fn deploy(
    config: &DeploymentConfig,
    services: &Services<'_>,
    bucket: &str,
) -> Result<DeploymentReport, Error> {
    services.store.enable_versioning(bucket).await?;

    let staging_root = config.path(&config.project.work_dir).join("build");
    if let Err(source) = fs::create_dir_all(&staging_root) {
        return Err(Error::Io {
            path: staging_root.display().to_string(),
            source,
        });
    }
    let packages = Packager::new(
        services.store,
        services.runner,
        config.project.runtime.clone(),
        config.project.entry_point.clone(),
    )
    .with_staging_root(staging_root)
    .package_all(bucket, &FunctionUnit::from_config(config))
    .await;
    for (unit, err) in &packages.failed {
        error!(unit = %unit, "Artifact not published: {}", err);
    }

    let infrastructure = config.infrastructure_stack();
    let mut parameters = parameters::resolve(
        &config.environment,
        &infrastructure.parameter_file,
        &config.parameter_defaults(),
    )?;
    parameters.set(ARTIFACT_BUCKET_PARAMETER, bucket);

    let reconciler = Reconciler::new(
        services.orchestrator,
        config.wait_policy(),
        config.delete_wait_policy(),
    );
    let infrastructure_result = reconciler.reconcile(&infrastructure, &parameters).await?;

    let monitoring = config.monitoring_stack();
    let cache = outputs::write(&config.outputs_cache_path(), &infrastructure_result.outputs)?;
    let monitoring_result = dependent::deploy(
        &reconciler,
        &config.environment,
        &monitoring,
        cache.path(),
        &config.project.monitoring.upstream_outputs,
    )
    .await?;
    drop(cache);

    let summary = summary::collect(
        services.orchestrator,
        &config.stack_filter(),
        &[infrastructure.name.clone(), monitoring.name.clone()],
        &config.project.notable_output,
    )
    .await;

    return Ok(DeploymentReport {
        bucket: bucket.to_string(),
        packages,
        infrastructure: infrastructure_result,
        monitoring: monitoring_result,
        summary,
    });
}

async fn run_tests(config: &DeploymentConfig, runner: &dyn CommandRunner) -> Result<(), Error> {
    let command = match &config.project.test_command {
        Some(command) if !command.is_empty() => command,
        _ => {
            info!("No test command configured");
            return Ok(());
        }
    };

    info!(command = ?command, "Running tests");
    let cwd = Some(config.project_root.as_path());
    let output = match runner.run(&command[0], &command[1..], cwd).await {
        Ok(output) => output,
        Err(error) => return Err(Error::TestsFailed(error.to_string())),
    };
    if !output.success() {
        let detail = if output.stderr.trim().is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        return Err(Error::TestsFailed(detail.trim().to_string()));
    }

    info!("Tests passed");
    return Ok(());
}
