//! dkmcp — policy-enforced Docker access for AI assistants over MCP.
//!
//! Binds an SSE/HTTP JSON-RPC transport on localhost, interposes the
//! security policy on every tool call, and talks to the Docker Engine API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;

use dkmcp::config::Config;
use dkmcp::dispatch::ToolContext;
use dkmcp::docker::{ContainerRuntime, DockerRuntime};
use dkmcp::host::{HostCommandRunner, HostToolsManager};
use dkmcp::logging::{self, Verbosity};
use dkmcp::policy::Policy;
use dkmcp::session::SessionRegistry;
use dkmcp::{audit, transport};

#[derive(FromArgs, Debug)]
/// dkmcp MCP server
struct Args {
    /// path to the YAML config file
    #[argh(option)]
    config: Option<PathBuf>,

    /// listen port (overrides config)
    #[argh(option)]
    port: Option<u16>,

    /// listen host (overrides config)
    #[argh(option)]
    host: Option<String>,

    /// write logs to this file
    #[argh(option)]
    log_file: Option<PathBuf>,

    /// also log to stdout when --log-file is set
    #[argh(switch)]
    log_also_stdout: bool,

    /// increase verbosity (repeat up to -v -v -v -v)
    #[argh(switch, short = 'v')]
    verbose: u8,

    /// promote staged host tools at boot
    #[argh(switch)]
    sync: bool,

    /// docker socket path (default: the daemon's default socket)
    #[argh(option)]
    socket: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dkmcp: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Args = argh::from_env();
    let verbosity = Verbosity::new(args.verbose);

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.server.port = u32::from(port);
    }
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    config.validate()?;

    logging::init(
        &config.logging,
        verbosity,
        args.log_file.as_deref(),
        args.log_also_stdout,
    )?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.security.mode,
        verbosity = verbosity.tier(),
        "Starting dkmcp server"
    );

    let runtime = match &args.socket {
        Some(socket) => DockerRuntime::connect_socket(socket)?,
        None => DockerRuntime::connect()?,
    };
    runtime.ping().await?;
    tracing::info!("Docker daemon reachable");

    let policy = Policy::from_config(&config.security, &config.host_access.workspace_root);
    tracing::info!(
        mode = %policy.mode().as_str(),
        blocked_rules = policy.blocked_rules().len(),
        "Security policy loaded"
    );

    let audit = audit::AuditLog::from_config(&config.audit)?;

    let host_tools = HostToolsManager::from_config(&config.host_access.host_tools);
    if let Some(manager) = &host_tools {
        if args.sync {
            let promoted = manager.sync()?;
            tracing::info!(promoted, "Host-tool sync complete");
        }
    }
    let host_commands = HostCommandRunner::from_config(
        &config.host_access.host_commands,
        &config.host_access.workspace_root,
    );

    let ctx = Arc::new(ToolContext {
        policy: Arc::new(policy),
        docker: Arc::new(runtime) as Arc<dyn ContainerRuntime>,
        host_tools,
        host_commands,
        audit,
    });

    let state = transport::AppState::new(ctx, verbosity);
    let sessions = state.sessions.clone();
    let app = transport::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.port()).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(sessions))
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for ctrl-c, cancel every session, report noise sources, then give
/// SSE writers a grace period to terminate before the listener closes.
async fn shutdown_signal(sessions: SessionRegistry) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received, cancelling sessions");

    let report = sessions.shutdown().await;
    for (user_agent, count) in report {
        tracing::info!(user_agent = %user_agent, count, "Uninitialized sessions at shutdown");
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
}
