use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bigquery_mcp_server::deploy::{
    candidate_sources, patch_openapi, provision_credentials, AzCliHostResolver, AzdEnvStore,
    ExistingValuePolicy, PatchOutcome, PatchRequest, ProvisionOutcome,
};

#[derive(Parser, Debug)]
#[command(version, about = "Deployment lifecycle hooks for the BigQuery MCP server")]
struct CliArgs {
    /// azd environment to operate on. Defaults to the selected one.
    #[clap(long, global = true)]
    pub environment: Option<String>,

    #[command(subcommand)]
    command: DeployCommand,
}

#[derive(Subcommand, Debug)]
enum DeployCommand {
    /// Publishes the service account key (base64) and its project id to the
    /// deployment environment. Runs before provisioning.
    ProvisionCredentials {
        /// Replace values that are already set.
        #[clap(long)]
        force: bool,

        /// Env file searched for credentials.
        #[clap(long, default_value = ".env")]
        env_file: PathBuf,
    },

    /// Points the `servers:` block of the OpenAPI document at the deployed
    /// app. Runs after deployment and never fails the deployment.
    PatchOpenapi {
        /// Resource group of the container app. Read from
        /// AZURE_RESOURCE_GROUP when omitted.
        #[clap(long)]
        resource_group: Option<String>,

        /// Container app name. Read from AZURE_CONTAINER_APP_NAME when
        /// omitted.
        #[clap(long)]
        app_name: Option<String>,

        /// OpenAPI document to rewrite.
        #[clap(long, default_value = "openapi.yaml")]
        file: PathBuf,
    },
}

fn make_store(environment: Option<String>) -> AzdEnvStore {
    match environment {
        Some(environment) => AzdEnvStore::new().with_environment(environment),
        None => AzdEnvStore::new(),
    }
}

fn run_provision_credentials(store: &mut AzdEnvStore, force: bool, env_file: PathBuf) -> ExitCode {
    let base_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            error!("Cannot determine the working directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let sources = match candidate_sources(|key| std::env::var(key).ok(), Some(&env_file), &base_dir)
    {
        Ok(sources) => sources,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let policy = if force {
        ExistingValuePolicy::Overwrite
    } else {
        ExistingValuePolicy::Skip
    };

    match provision_credentials(store, &sources, policy) {
        Ok(ProvisionOutcome::AlreadyProvisioned) => {
            info!("Credentials already provisioned");
            ExitCode::SUCCESS
        }
        Ok(ProvisionOutcome::Provisioned {
            origin, project_id, ..
        }) => {
            info!(
                "Provisioned credentials for project {} from {}",
                project_id, origin
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    let logging = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init();
    if let Err(e) = logging {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let mut store = make_store(cli_args.environment);

    match cli_args.command {
        DeployCommand::ProvisionCredentials { force, env_file } => {
            run_provision_credentials(&mut store, force, env_file)
        }
        DeployCommand::PatchOpenapi {
            resource_group,
            app_name,
            file,
        } => {
            let request = PatchRequest {
                resource_group,
                app_name,
                document: file,
            };
            match patch_openapi(&store, &AzCliHostResolver, &request) {
                PatchOutcome::Patched { url } => info!("OpenAPI servers set to {}", url),
                PatchOutcome::Skipped { reason } => info!("OpenAPI left unchanged: {}", reason),
            }
            ExitCode::SUCCESS
        }
    }
}
