// src/main.rs

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;

mod config;
mod orchestrator;
mod pipeline;
mod server;
mod sys;

use crate::config::AgentConfig;
use crate::orchestrator::{Orchestrator, StageAdapters};
use crate::server::PipelineAgentService;
use crate::server::slipway_pipeline::pipeline_agent_server::PipelineAgentServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt::init();
    let config = AgentConfig::load();

    match std::env::args().nth(1).as_deref() {
        // One-shot mode: run a single build and exit with a stage-specific code.
        Some("deploy") => {
            let Some(revision) = std::env::args().nth(2) else {
                eprintln!("usage: slipway-agent deploy <revision>");
                std::process::exit(2);
            };
            let adapters = StageAdapters::system(&config);
            let orchestrator = Orchestrator::new(config, adapters);
            let (build, code) = orchestrator.deploy_once(&revision).await;
            tracing::info!(build_id = %build.id, status = %build.status, "one-shot deploy finished");
            std::process::exit(code);
        }
        None | Some("serve") => serve(config).await,
        Some(other) => {
            eprintln!(
                "unknown command '{}'; expected 'serve' or 'deploy <revision>'",
                other
            );
            std::process::exit(2);
        }
    }
}

async fn serve(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    // ==============================================================================
    // 1. Secure Socket Initialization
    // ==============================================================================

    let socket_path = config.socket_path.clone();
    let socket_dir = Path::new(&socket_path).parent().unwrap();

    // Ensure the runtime directory exists
    if !socket_dir.exists() {
        fs::create_dir_all(socket_dir)?;
    }

    // Clean up existing socket file if it exists from a previous crash/run
    if Path::new(&socket_path).exists() {
        fs::remove_file(&socket_path)?;
    }

    // Bind to the Unix Domain Socket
    let uds = UnixListener::bind(&socket_path)?;

    // 🛡️ SECURITY BOUNDARY: Restrict socket permissions
    // 0o660 (rw-rw----) allows the root owner (Agent) and the group (which the
    // webhook receiver belongs to) to communicate, while denying all other
    // users on the system.
    let mut perms = fs::metadata(&socket_path)?.permissions();
    perms.set_mode(0o660);
    fs::set_permissions(&socket_path, perms)?;

    let uds_stream = UnixListenerStream::new(uds);

    // ==============================================================================
    // 2. Dependency Injection & Service Start
    // ==============================================================================

    // The orchestrator owns the queue and the single build worker; the gRPC
    // service is a thin surface over it.
    let adapters = StageAdapters::system(&config);
    let orchestrator = Orchestrator::new(config, adapters);
    orchestrator.spawn_worker();

    let service = PipelineAgentService::new(orchestrator);

    tracing::info!("⚙️ Slipway deploy agent listening on {}", socket_path);

    Server::builder()
        .add_service(PipelineAgentServer::new(service))
        .serve_with_incoming(uds_stream)
        .await?;

    Ok(())
}
