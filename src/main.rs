use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cfn_stack_deployer::cloudformation::{self, CloudFormation};
use cfn_stack_deployer::config::{
    self, DeploymentConfig, DEFAULT_ENVIRONMENT, DEFAULT_PROJECT_FILE, DEFAULT_REGION,
};
use cfn_stack_deployer::identity::StsIdentity;
use cfn_stack_deployer::pipeline::{self, Outcome, Services};
use cfn_stack_deployer::process::SystemRunner;
use cfn_stack_deployer::s3::S3Store;
use cfn_stack_deployer::summary;
use chrono::Utc;
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "cfn-stack-deployer",
    version,
    about = "Validate templates, publish function artifacts and reconcile the \
             infrastructure and monitoring stacks."
)]
struct Cli {
    /// Environment to deploy (dev, staging, prod, ...).
    #[arg(short, long, default_value = DEFAULT_ENVIRONMENT)]
    environment: String,

    /// Region the stacks and the artifact bucket live in.
    #[arg(short, long, default_value = DEFAULT_REGION)]
    region: String,

    /// Stop after validating the templates.
    #[arg(long, default_value_t = false)]
    validate_only: bool,

    /// Do not run the project test command.
    #[arg(long, default_value_t = false)]
    skip_tests: bool,

    /// Project file; the built-in layout is used when the default one is absent.
    #[arg(short, long, default_value = DEFAULT_PROJECT_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    return match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(pipeline::Error::Interrupted) => {
            warn!("Interrupted");
            ExitCode::from(130)
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::from(1)
        }
    };
}

async fn run(cli: Cli) -> Result<(), pipeline::Error> {
    let project = if cli.config == Path::new(DEFAULT_PROJECT_FILE) {
        config::parse_or_default(&cli.config)?
    } else {
        config::parse(&cli.config)?
    };
    let project_root = match cli.config.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let config = DeploymentConfig::new(
        cli.environment,
        cli.region,
        cli.validate_only,
        cli.skip_tests,
        project_root,
        project,
    )?;

    let sdk_config = cloudformation::load_sdk_config(&config.region).await;
    let orchestrator = CloudFormation::new(&sdk_config);
    let store = S3Store::new(&sdk_config);
    let identity = StsIdentity::new(&sdk_config);
    let runner = SystemRunner;
    let services = Services {
        orchestrator: &orchestrator,
        store: &store,
        runner: &runner,
        identity: &identity,
    };

    let interrupt = async {
        // Without a signal handler the run can only end on its own.
        if tokio::signal::ctrl_c().await.is_err() {
            futures::future::pending::<()>().await;
        }
    };

    match pipeline::run(&config, &services, Utc::now(), interrupt).await? {
        Outcome::Validated(report) => {
            println!(
                "Validated {} template(s) and {} document(s) with {} warning(s)",
                report.templates,
                report.documents,
                report.warnings.len()
            );
        }
        Outcome::Deployed(report) => {
            let notable_output = &config.project.notable_output;
            print!("{}", summary::render(&report.summary, notable_output));
            if !report.packages.skipped.is_empty() {
                println!("Skipped functions: {}", report.packages.skipped.join(", "));
            }
            for (unit, err) in &report.packages.failed {
                println!("Failed function {}: {}", unit, err);
            }
        }
    }

    return Ok(());
}
