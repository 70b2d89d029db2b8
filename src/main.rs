mod config;
mod docker;
mod error;
mod gns3;
mod matcher;
mod models;
mod orchestrator;
mod poller;
mod sanitizer;
mod topology;
mod utils;

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Config, RunConfig, Transport};
use docker::DockerFileWriter;
use error::ProvisionError;
use gns3::Gns3Client;
use models::RunState;
use orchestrator::{Orchestrator, RunOptions};
use poller::{DeviceQuery, EapiClient, EosDevices, SshClient};
use sanitizer::{Sanitizer, SanitizerRules};

/// Exit status for a run that aborted before any node was created
const EXIT_FATAL: i32 = 2;
/// Exit status for a run that finished with failed or skipped entities
const EXIT_PARTIAL: i32 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing; stdout is reserved for the run report
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ptov_lab=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load and validate configuration before touching any remote system
    let cfg = Config::load();
    let run = RunConfig::from_config(&cfg)?;
    tracing::info!("Starting ptov-lab");
    tracing::info!("Lab server: {} (GNS3 :{}, Docker :{})", run.server, run.gns3_port, run.docker_port);
    tracing::info!("Project: {}", run.project);
    tracing::info!("Switches: {} via {:?}", run.devices.len(), run.transport);

    let sanitizer = match &run.sanitizer_rules {
        Some(path) => {
            tracing::info!("Sanitizer rules: {}", path);
            Sanitizer::from_file(Path::new(path))?
        }
        None => Sanitizer::new(SanitizerRules::default())?,
    };

    let timeout = run.request_timeout_secs;
    let query: Arc<dyn DeviceQuery> = match run.transport {
        Transport::Eapi => Arc::new(EosDevices::new(EapiClient::new(run.credentials, timeout)?)),
        Transport::Ssh => Arc::new(EosDevices::new(SshClient::new(run.credentials, timeout))),
    };
    let platform = Arc::new(Gns3Client::new(
        &run.server,
        run.gns3_port,
        run.gns3_user,
        run.gns3_password,
        timeout,
    )?);
    let files = Arc::new(DockerFileWriter::new(&run.server, run.docker_port, timeout)?);

    let orchestrator = Orchestrator::new(
        query,
        platform,
        files,
        sanitizer,
        RunOptions {
            project: run.project.clone(),
            max_workers: run.max_workers,
            reuse_project: run.reuse_project,
            close_project: run.close_project,
        },
    );

    match orchestrator.run(&run.devices).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.state != RunState::Done {
                std::process::exit(EXIT_PARTIAL);
            }
            if let Some(url) = &result.project_url {
                tracing::info!("Lab ready at {}", url);
            }
            Ok(())
        }
        Err(error) => {
            report_fatal(&error)?;
            std::process::exit(EXIT_FATAL);
        }
    }
}

fn report_fatal(error: &ProvisionError) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "error": error }))?);
    Ok(())
}
