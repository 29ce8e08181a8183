//! CLI entry point for hosting or joining a meshlink session.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use meshlink_session::{Client, Discovery, Host, MdnsDiscovery, SessionEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::MeshNodeConfig;
use logging::MeshLogFormatter;

/// meshlink: host or join a peer-to-peer mesh session.
#[derive(Parser, Debug)]
#[command(name = "meshlink", version, about = "Host or join a meshlink mesh session")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file path.
    #[arg(long, global = true, default_value = "meshlink.yaml")]
    config: PathBuf,

    /// Local address to bind the discovery/coordinator/node listeners to.
    #[arg(long, global = true)]
    bind_ip: Option<IpAddr>,

    /// Session identifier: the host's session name, or a client's username.
    #[arg(long, global = true)]
    identifier: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new session and wait for members to join before starting the mesh.
    Host,
    /// Join an existing session advertised over mDNS.
    Join {
        /// The session name to join, as advertised by its host.
        session_name: String,
        /// The 6-digit passcode the host displayed.
        passcode: String,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = MeshNodeConfig::load(Some(&args.config))?;
    if let Some(bind_ip) = args.bind_ip {
        config.bind_ip = bind_ip;
    }
    if args.identifier.is_some() {
        config.identifier = args.identifier.clone();
    }
    if let Some(log_level) = args.log_level.clone() {
        config.log_level = log_level;
    }

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("meshlink_cmd={}", config.log_level).parse()?)
        .add_directive(format!("meshlink_session={}", config.log_level).parse()?)
        .add_directive(format!("meshlink_node={}", config.log_level).parse()?)
        .add_directive(format!("meshlink_coordinator={}", config.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .event_format(MeshLogFormatter::new("meshlink".to_string()))
        .init();

    info!("starting meshlink node v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Host => run_host(config).await,
        Command::Join { session_name, passcode } => run_join(config, session_name, passcode).await,
    }
}

async fn run_host(config: MeshNodeConfig) -> anyhow::Result<()> {
    let discovery: Arc<dyn Discovery> = Arc::new(MdnsDiscovery::new()?);

    let host = Host::create(config.bind_ip, config.identifier.clone(), discovery).await?;
    let mut events = host.subscribe();

    info!(
        identifier = %host.identifier,
        passcode = %host.passcode,
        discovery_port = host.discovery_port(),
        coordinator_port = host.coordinator_port(),
        node_port = host.node_port(),
        "session created, share the passcode with members"
    );

    println!("Session name: {}", host.identifier);
    println!("Passcode:     {}", host.passcode);
    println!("Press Ctrl-C to start the mesh once everyone has joined.");

    tokio::signal::ctrl_c().await?;
    info!("starting mesh with {} member(s)", host.authenticated_members().await.len());
    host.start_mesh().await?;

    run_event_loop(&mut events).await
}

async fn run_join(config: MeshNodeConfig, session_name: String, passcode: String) -> anyhow::Result<()> {
    let discovery = MdnsDiscovery::new()?;

    let client = Client::create(config.bind_ip, config.identifier.clone()).await?;
    client.connect_session(&discovery, &session_name, &passcode).await?;

    let mut events = client.subscribe();
    info!(identifier = %client.identifier, session_name, "joined session");

    run_event_loop(&mut events).await
}

async fn run_event_loop(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down");
                return Ok(());
            }
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::MemberJoined { user_name, ip, port }) => {
                        info!(user_name, %ip, port, "member joined");
                    }
                    Ok(SessionEvent::CoordinatorError(error)) => {
                        warn!(error, "coordinator rejected a handshake attempt");
                    }
                    Ok(SessionEvent::SessionStarted) => {
                        info!("mesh fully formed");
                    }
                    Ok(SessionEvent::Message { from, body, broadcast }) => {
                        info!(from, broadcast, "{}", body);
                    }
                    Ok(SessionEvent::Disconnected { user_name }) => {
                        warn!(user_name, "neighbor disconnected");
                    }
                    Ok(SessionEvent::Reconnected { user_name }) => {
                        info!(user_name, "neighbor reconnected");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event receiver lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("event stream closed, shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}
