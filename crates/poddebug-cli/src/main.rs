//! poddebug - attach a local TCP endpoint to a debug port inside a cluster
//!
//! Each subcommand is an independent process; session state shared between
//! them lives in the on-disk registry managed by `poddebug-session`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use poddebug_session::{DebugStatus, SessionError, SessionManager};
use poddebug_store::{SessionKey, SessionStore};
use poddebug_tunnel::{ApiServerClient, ClusterClient};

mod context;
mod output;

use output::OutputFormat;

/// Debug a component running in a remote cluster
#[derive(Parser, Debug)]
#[command(name = "poddebug")]
#[command(about = "Forward a local port to a component's debug port", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "human", global = true)]
    output: OutputFormat,

    /// Cluster debug proxy address (host:port)
    #[arg(long, env = "PODDEBUG_CLUSTER", default_value = "127.0.0.1:6443", global = true)]
    cluster: String,

    #[command(flatten)]
    identity: context::IdentityArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forward a local port to the component's debug port
    PortForward {
        /// Debug port inside the target container
        #[arg(long = "port", default_value_t = 5858)]
        remote_port: u16,

        /// Local port to bind (an ephemeral port is chosen when omitted)
        #[arg(long)]
        local_port: Option<u16>,
    },

    /// Display debug info of the component
    Info,

    /// Stop the debug session of the component
    Stop,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.output;

    init_logging(&cli.log_level);

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::render_error(format, &format!("{:#}", e));
            1
        }
    };
    std::process::exit(exit_code);
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let project_dir = std::env::current_dir().context("Failed to resolve working directory")?;
    let key = context::resolve_identity(&cli.identity, &project_dir)?;
    debug!(key = %key, "resolved component identity");

    let store = SessionStore::new().context("Failed to open the session store")?;
    let cluster: Arc<dyn ClusterClient> = Arc::new(ApiServerClient::new(cli.cluster.clone()));
    let manager = SessionManager::new(store, cluster);

    match cli.command {
        Commands::PortForward {
            remote_port,
            local_port,
        } => port_forward(&manager, &key, remote_port, local_port, cli.output).await,
        Commands::Info => info(&manager, &key, cli.output).await,
        Commands::Stop => stop(&manager, &key, cli.output).await,
    }
}

async fn port_forward(
    manager: &SessionManager,
    key: &SessionKey,
    remote_port: u16,
    local_port: Option<u16>,
    format: OutputFormat,
) -> Result<i32> {
    let session = match manager.start(key, remote_port, local_port).await {
        Ok(session) => session,
        Err(e @ SessionError::AlreadyDebugging { .. }) => {
            output::render_error(format, &e.to_string());
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    output::render_session(
        format,
        &format!(
            "Started port forwarding at ports - {}:{}",
            session.local_port, session.remote_port
        ),
        &session,
    );

    wait_for_shutdown().await;

    // The record may already be gone if a concurrent stop signaled us
    match manager.stop(key).await {
        Ok(()) | Err(SessionError::NotDebugging { .. }) => {}
        Err(e) => return Err(e.into()),
    }
    output::render_message(format, "Stopped port forwarding");
    Ok(0)
}

async fn info(manager: &SessionManager, key: &SessionKey, format: OutputFormat) -> Result<i32> {
    match manager.info(key).await? {
        DebugStatus::Running { session } => {
            output::render_session(
                format,
                &format!(
                    "Debug is running for the component on the local port : {}",
                    session.local_port
                ),
                &session,
            );
            Ok(0)
        }
        DebugStatus::NotAlive { .. } | DebugStatus::NotDebugging => {
            output::render_error(
                format,
                &format!("debug is not running for the component {}", key.component),
            );
            Ok(1)
        }
    }
}

async fn stop(manager: &SessionManager, key: &SessionKey, format: OutputFormat) -> Result<i32> {
    match manager.stop(key).await {
        Ok(()) => {
            output::render_message(
                format,
                &format!("Stopped debug session for the component {}", key.component),
            );
            Ok(0)
        }
        Err(e @ SessionError::NotDebugging { .. }) => {
            output::render_error(format, &e.to_string());
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

/// Block until ctrl-c or, on Unix, SIGTERM from a `poddebug stop` elsewhere
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
