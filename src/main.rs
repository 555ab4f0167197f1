use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gesher_agent::agent::GesherAgent;
use gesher_agent::client;
use gesher_agent::config::Config;
use gesher_agent::soul::StatePatch;

/// Gesher-El - autonomous agent daemon with a local control socket
#[derive(Parser, Debug)]
#[command(name = "gesher-agent", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (memory/ and logs/ live under it)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Control socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Start with autonomous mode switched on
    #[arg(long)]
    autonomous: bool,

    /// Log filter, e.g. "debug" or "gesher_agent=trace" (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one JSON request to a running daemon and print the response
    Send {
        /// Request object, e.g. '{"cmd":"status"}'
        request: String,
    },
}

fn init_tracing(
    level: Option<&str>,
    log_file: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env();
    if let Some(home) = args.home {
        config.home = home;
    }
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if args.autonomous {
        config.autonomous_mode = true;
    }

    if let Some(Command::Send { request }) = args.command {
        init_tracing(args.log_level.as_deref(), None)?;
        let request: serde_json::Value = serde_json::from_str(&request)?;
        let reply = client::send_request(&config.socket_path, &request).await?;
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    let paths = config.paths();
    paths.ensure()?;
    init_tracing(args.log_level.as_deref(), Some(&paths.daemon_log))?;

    info!(
        name = %config.name,
        home = %config.home.display(),
        socket = %config.socket_path.display(),
        local_model = %config.brain.local_model,
        "starting gesher agent"
    );

    let agent = match GesherAgent::new(config) {
        Ok(agent) => agent,
        Err(e) if e.is_fatal() => {
            error!(error = %e, "soul state cannot be recovered, refusing to start");
            return Err(e.into());
        }
        Err(e) => {
            error!(error = %e, "failed to start gesher agent");
            return Err(e.into());
        }
    };
    if args.autonomous {
        agent.mind().lock().await.soul.apply(StatePatch {
            autonomous_mode: Some(true),
            ..Default::default()
        })?;
    }

    agent.run().await?;
    Ok(())
}
