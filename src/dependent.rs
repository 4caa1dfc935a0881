use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::config::UpstreamOutput;
use crate::outputs::{self, StackOutputs};
use crate::parameters::{self, ParameterSet};
use crate::reconcile::{self, Reconciler, Reconciliation};
use crate::stack::StackDescriptor;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("No outputs snapshot from the upstream stack at {0}")]
    MissingUpstreamOutputs(String),

    #[error(transparent)]
    Outputs(#[from] outputs::Error),

    #[error(transparent)]
    Parameters(#[from] parameters::Error),

    #[error("Unable to record parameters at {path}: {reason}")]
    ParameterFile { path: String, reason: String },

    #[error(transparent)]
    Reconcile(#[from] reconcile::Error),
}

/// Builds the dependent stack's parameters: `Environment` first, then one
/// entry per mapping. Outputs the upstream did not produce become empty values
/// and a mapping onto `Environment` is ignored.
pub fn derive_parameters(
    environment: &str,
    snapshot: &StackOutputs,
    mappings: &[UpstreamOutput],
) -> Result<ParameterSet, Error> {
    let mut pairs = vec![(parameters::ENVIRONMENT_KEY.to_string(), environment.to_string())];
    for mapping in mappings {
        if mapping.parameter == parameters::ENVIRONMENT_KEY {
            warn!(output = %mapping.output, "The environment parameter is not taken from upstream");
            continue;
        }
        let value = match snapshot.get(&mapping.output) {
            Some(value) => value.to_string(),
            None => {
                warn!(
                    output = %mapping.output,
                    parameter = %mapping.parameter,
                    "Upstream output missing, passing an empty value"
                );
                String::new()
            }
        };
        pairs.push((mapping.parameter.clone(), value));
    }

    return Ok(ParameterSet::from_pairs(pairs)?);
}

/// Reconciles `descriptor` with parameters taken from the outputs snapshot the
/// upstream reconciliation cached at `snapshot_path`. Without a snapshot no
/// call reaches the orchestration service.
pub async fn deploy(
    reconciler: &Reconciler<'_>,
    environment: &str,
    descriptor: &StackDescriptor,
    snapshot_path: &Path,
    mappings: &[UpstreamOutput],
) -> Result<Reconciliation, Error> {
    let snapshot = match outputs::read(snapshot_path)? {
        Some(snapshot) => snapshot,
        None => return Err(Error::MissingUpstreamOutputs(snapshot_path.display().to_string())),
    };

    let parameters = derive_parameters(environment, &snapshot, mappings)?;
    record(&descriptor.parameter_file, &parameters)?;
    info!(stack = %descriptor.name, parameters = parameters.len(), "Deploying dependent stack");

    return Ok(reconciler.reconcile(descriptor, &parameters).await?);
}

fn record(path: &Path, parameters: &ParameterSet) -> Result<(), Error> {
    let record_error = |error: std::io::Error| Error::ParameterFile {
        path: path.display().to_string(),
        reason: error.to_string(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(record_error)?;
    }
    fs::write(path, parameters.to_json()).map_err(record_error)?;

    return Ok(());
}
