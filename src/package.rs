use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::DeploymentConfig;
use crate::process::CommandRunner;
use crate::store::{artifact_key, ArtifactStore};

/// Manifest used for units that ship without one.
pub const DEFAULT_MANIFEST: &str = "boto3\n";

const MANIFEST_NAME: &str = "requirements.txt";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Unable to stage {unit}: {reason}")]
    Staging { unit: String, reason: String },

    #[error("Unable to install dependencies of {unit}: {reason}")]
    Dependencies { unit: String, reason: String },

    #[error("Unable to archive {unit}: {reason}")]
    Archive { unit: String, reason: String },

    #[error("Unable to publish {unit}: {reason}")]
    Publish { unit: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionUnit {
    pub name: String,
    pub source: PathBuf,
    pub manifest: Option<PathBuf>,
}

impl FunctionUnit {
    pub fn from_config(config: &DeploymentConfig) -> Vec<FunctionUnit> {
        return config
            .project
            .functions
            .iter()
            .map(|function| FunctionUnit {
                name: function.name.clone(),
                source: config.path(&function.source),
                manifest: function
                    .manifest
                    .as_ref()
                    .map(|manifest| config.path(manifest)),
            })
            .collect();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub unit: String,
    pub bucket: String,
    pub key: String,
    pub size: usize,
}

#[derive(Debug, Default)]
pub struct PackageReport {
    pub published: Vec<Artifact>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

pub struct Packager<'a> {
    store: &'a dyn ArtifactStore,
    runner: &'a dyn CommandRunner,
    runtime: String,
    entry_point: String,
    staging_root: PathBuf,
}

impl<'a> Packager<'a> {
    pub fn new(
        store: &'a dyn ArtifactStore,
        runner: &'a dyn CommandRunner,
        runtime: impl Into<String>,
        entry_point: impl Into<String>,
    ) -> Self {
        return Self {
            store,
            runner,
            runtime: runtime.into(),
            entry_point: entry_point.into(),
            staging_root: std::env::temp_dir(),
        };
    }

    /// Directory under which per-unit staging directories are created.
    pub fn with_staging_root(mut self, staging_root: PathBuf) -> Self {
        self.staging_root = staging_root;
        return self;
    }

    /// Packages and publishes every unit. A unit without source is skipped and
    /// a failing unit is recorded; neither stops the others.
    pub async fn package_all(&self, bucket: &str, units: &[FunctionUnit]) -> PackageReport {
        let mut report = PackageReport::default();

        for unit in units {
            if !unit.source.is_file() {
                warn!(
                    unit = %unit.name,
                    source = %unit.source.display(),
                    "Source not found, skipping"
                );
                report.skipped.push(unit.name.clone());
                continue;
            }

            match self.package(bucket, unit).await {
                Ok(artifact) => {
                    info!(
                        unit = %unit.name,
                        key = %artifact.key,
                        bytes = artifact.size,
                        "Published artifact"
                    );
                    report.published.push(artifact);
                }
                Err(err) => {
                    error!(unit = %unit.name, "{}", err);
                    report.failed.push((unit.name.clone(), err));
                }
            }
        }

        return report;
    }

    pub async fn package(&self, bucket: &str, unit: &FunctionUnit) -> Result<Artifact, Error> {
        let staging_error = |error: io::Error| Error::Staging {
            unit: unit.name.clone(),
            reason: error.to_string(),
        };

        // Removed when dropped: on return, on `?`, and when the run is interrupted.
        let staging = tempfile::Builder::new()
            .prefix(&format!("{}-", unit.name))
            .tempdir_in(&self.staging_root)
            .map_err(staging_error)?;
        let package_dir = staging.path().join("package");
        fs::create_dir_all(&package_dir).map_err(staging_error)?;

        fs::copy(&unit.source, package_dir.join(&self.entry_point)).map_err(staging_error)?;

        let manifest = staging.path().join(MANIFEST_NAME);
        match &unit.manifest {
            Some(provided) if provided.is_file() => {
                fs::copy(provided, &manifest).map_err(staging_error)?;
            }
            _ => {
                info!(unit = %unit.name, "No dependency manifest, using the default");
                fs::write(&manifest, DEFAULT_MANIFEST).map_err(staging_error)?;
            }
        }

        self.install_dependencies(unit, &manifest, &package_dir).await?;

        let archive = archive(&package_dir).map_err(|reason| Error::Archive {
            unit: unit.name.clone(),
            reason,
        })?;
        let size = archive.len();

        let key = artifact_key(&unit.name);
        if let Err(error) = self.store.put_object(bucket, &key, archive).await {
            return Err(Error::Publish {
                unit: unit.name.clone(),
                reason: error.to_string(),
            });
        }

        return Ok(Artifact {
            unit: unit.name.clone(),
            bucket: bucket.to_string(),
            key,
            size,
        });
    }

    async fn install_dependencies(
        &self,
        unit: &FunctionUnit,
        manifest: &Path,
        target: &Path,
    ) -> Result<(), Error> {
        let contents = fs::read_to_string(manifest).map_err(|error| Error::Staging {
            unit: unit.name.clone(),
            reason: error.to_string(),
        })?;
        let has_requirements = contents
            .lines()
            .map(str::trim)
            .any(|line| !line.is_empty() && !line.starts_with('#'));
        if !has_requirements {
            return Ok(());
        }

        let args: Vec<String> = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "-r".to_string(),
            manifest.display().to_string(),
            "-t".to_string(),
            target.display().to_string(),
            "--quiet".to_string(),
            "--disable-pip-version-check".to_string(),
        ];
        let output = match self.runner.run(&self.runtime, &args, None).await {
            Ok(output) => output,
            Err(error) => {
                return Err(Error::Dependencies {
                    unit: unit.name.clone(),
                    reason: error.to_string(),
                })
            }
        };
        if !output.success() {
            return Err(Error::Dependencies {
                unit: unit.name.clone(),
                reason: output.stderr.trim().to_string(),
            });
        }

        return Ok(());
    }
}

/// Zips the contents of `dir` (entries relative to it, in name order).
/// Directories are traversable (0755) and files readable (0644) by the runtime.
pub fn archive(dir: &Path) -> Result<Vec<u8>, String> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let file_options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    let directory_options = FileOptions::default().unix_permissions(0o755);

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|error| error.to_string())?;
        let relative = entry.path().strip_prefix(dir).map_err(|error| error.to_string())?;
        let name = relative.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            writer
                .add_directory(name, directory_options)
                .map_err(|error| error.to_string())?;
            continue;
        }

        writer.start_file(name, file_options).map_err(|error| error.to_string())?;
        let contents = fs::read(entry.path()).map_err(|error| error.to_string())?;
        writer.write_all(&contents).map_err(|error| error.to_string())?;
    }

    let cursor = writer.finish().map_err(|error| error.to_string())?;
    return Ok(cursor.into_inner());
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;
    use std::time::Duration;

    use tempfile::tempdir;

    use super::archive;
    use super::Error;
    use super::FunctionUnit;
    use super::Packager;
    use crate::process::CommandOutput;
    use crate::testing::{FakeRunner, FakeStore};

    fn unit(dir: &Path, name: &str, with_source: bool) -> FunctionUnit {
        let source = dir.join(format!("{}.py", name));
        if with_source {
            fs::write(&source, "def lambda_handler(event, context):\n    return {}\n").unwrap();
        }
        FunctionUnit {
            name: name.to_string(),
            source,
            manifest: None,
        }
    }

    fn entries(archive: Vec<u8>) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        (0..archive.len())
            .map(|index| archive.by_index(index).unwrap().name().to_string())
            .collect()
    }

    fn staging_is_empty(root: &Path) -> bool {
        fs::read_dir(root).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn missing_source_is_skipped_and_present_unit_is_published() {
        let project = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let store = FakeStore::new();
        let runner = FakeRunner::new();
        let units = vec![
            unit(project.path(), "incident-response", true),
            unit(project.path(), "health-checker", false),
        ];

        let report = Packager::new(&store, &runner, "python3", "lambda_function.py")
            .with_staging_root(staging.path().to_path_buf())
            .package_all("bucket", &units)
            .await;

        assert_eq!(1, report.published.len());
        assert_eq!("lambda/incident-response.zip", report.published[0].key);
        assert_eq!(vec!["health-checker".to_string()], report.skipped);
        assert_eq!(true, report.failed.is_empty());
        assert_eq!(true, staging_is_empty(staging.path()));
    }

    #[tokio::test]
    async fn archive_contains_entry_point_and_dependencies() {
        let project = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let store = FakeStore::new();
        let runner = FakeRunner::new();
        let units = vec![unit(project.path(), "alert-processor", true)];

        Packager::new(&store, &runner, "python3", "lambda_function.py")
            .with_staging_root(staging.path().to_path_buf())
            .package_all("bucket", &units)
            .await;

        let body = store.object("bucket", "lambda/alert-processor.zip").unwrap();
        assert_eq!(
            vec!["lambda_function.py".to_string(), "vendored.py".to_string()],
            entries(body)
        );
        let invocation = &runner.invocations()[0];
        assert_eq!("python3", invocation.program);
        assert_eq!(true, invocation.args.contains(&"pip".to_string()));
    }

    #[tokio::test]
    async fn comment_only_manifest_skips_installation() {
        let project = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let store = FakeStore::new();
        let runner = FakeRunner::new();
        let mut function = unit(project.path(), "health-checker", true);
        let manifest = project.path().join("requirements.txt");
        fs::write(&manifest, "# nothing beyond the runtime\n").unwrap();
        function.manifest = Some(manifest);

        let report = Packager::new(&store, &runner, "python3", "lambda_function.py")
            .with_staging_root(staging.path().to_path_buf())
            .package_all("bucket", &[function])
            .await;

        assert_eq!(1, report.published.len());
        assert_eq!(0, runner.invocations().len());
    }

    #[tokio::test]
    async fn publish_failure_only_affects_its_unit() {
        let project = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let store = FakeStore::new();
        store.fail_puts_to("lambda/incident-response.zip");
        let runner = FakeRunner::new();
        let units = vec![
            unit(project.path(), "incident-response", true),
            unit(project.path(), "health-checker", true),
        ];

        let report = Packager::new(&store, &runner, "python3", "lambda_function.py")
            .with_staging_root(staging.path().to_path_buf())
            .package_all("bucket", &units)
            .await;

        assert_eq!(1, report.published.len());
        assert_eq!("health-checker", report.published[0].unit);
        match &report.failed[0] {
            (name, Error::Publish { .. }) => assert_eq!("incident-response", name),
            _ => panic!("Expected `Publish` error"),
        }
        assert_eq!(true, staging_is_empty(staging.path()));
    }

    #[tokio::test]
    async fn failed_install_still_cleans_staging() {
        let project = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let store = FakeStore::new();
        let runner = FakeRunner::new();
        runner.respond(
            "python3",
            CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: "No matching distribution found for boto4".to_string(),
            },
        );

        let report = Packager::new(&store, &runner, "python3", "lambda_function.py")
            .with_staging_root(staging.path().to_path_buf())
            .package_all("bucket", &[unit(project.path(), "incident-response", true)])
            .await;

        match &report.failed[0].1 {
            Error::Dependencies { reason, .. } => {
                assert_eq!("No matching distribution found for boto4", reason)
            }
            _ => panic!("Expected `Dependencies` error"),
        }
        assert_eq!(true, store.keys("bucket").is_empty());
        assert_eq!(true, staging_is_empty(staging.path()));
    }

    #[test]
    fn archived_directories_are_traversable() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boto3")).unwrap();
        fs::write(dir.path().join("boto3/__init__.py"), "").unwrap();
        fs::write(dir.path().join("lambda_function.py"), "").unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(archive(dir.path()).unwrap())).unwrap();

        let directory = archive.by_name("boto3/").unwrap();
        assert_eq!(true, directory.is_dir());
        assert_eq!(0o755, directory.unix_mode().unwrap() & 0o777);
        drop(directory);
        let module = archive.by_name("boto3/__init__.py").unwrap();
        assert_eq!(0o644, module.unix_mode().unwrap() & 0o777);
    }

    #[tokio::test]
    async fn interrupted_packaging_leaves_no_staging_behind() {
        let project = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let store = FakeStore::new();
        let runner = FakeRunner::new();
        runner.hang("python3");
        let units = vec![unit(project.path(), "incident-response", true)];
        let packager = Packager::new(&store, &runner, "python3", "lambda_function.py")
            .with_staging_root(staging.path().to_path_buf());

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            packager.package_all("bucket", &units),
        )
        .await;

        assert_eq!(true, result.is_err());
        assert_eq!(1, runner.invocations().len());
        assert_eq!(true, staging_is_empty(staging.path()));
        assert_eq!(true, store.keys("bucket").is_empty());
    }
}
