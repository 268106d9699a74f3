#![deny(unsafe_code)]

//! PawLink CLI: command-line control plane.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pawlink_config::AppConfig;
use pawlink_core::ipc::{IpcClient, server::socket_path_from_config};
use pawlink_core::{Bridge, Daemon, ParamValue, Params};
use pawlink_remote::HeartbeatService;

/// PawLink: bridge between robot front-ends and the controller.
#[derive(Parser)]
#[command(name = "pawlink", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "pawlink.toml")]
    config: PathBuf,

    /// Daemon socket, overriding `daemon.socket_path`.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge daemon in the foreground.
    Start,

    /// Stop a running daemon.
    Stop,

    /// Show daemon and link status.
    Status,

    /// Send a command to the controller through the daemon.
    Send {
        /// Command name, e.g. `move`, `camera`, `status`.
        command: String,

        /// Parameters as `key=value`; `true`/`false` and numbers are typed.
        #[arg(value_parser = parse_param)]
        params: Vec<(String, ParamValue)>,
    },

    /// Follow status events from the daemon.
    Watch {
        /// Exit after this many events.
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Print raw JSON events.
        #[arg(long)]
        json: bool,
    },

    /// Show captured daemon logs.
    Logs {
        /// Only the newest N entries.
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Run as a hardware remote: hold a link and emit heartbeats.
    Remote {
        /// Remote identifier, overriding `heartbeat.remote_id`.
        #[arg(long)]
        remote_id: Option<String>,

        /// Reported signal strength in dBm, overriding `heartbeat.signal_strength`.
        #[arg(long, allow_hyphen_values = true)]
        signal: Option<f64>,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    let level = match cli.verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let socket = cli
        .socket
        .clone()
        .unwrap_or_else(|| socket_path_from_config(&config));

    // Long-running commands log at the configured level; one-shot client
    // commands stay quiet unless asked.
    let logs = match &cli.command {
        Commands::Start => {
            pawlink_core::logging::install(&level, config.logging.capture_capacity)
        }
        Commands::Remote { .. } => {
            init_tracing(&level);
            None
        }
        _ => {
            init_tracing(if cli.verbose == 0 { "warn" } else { level.as_str() });
            None
        }
    };

    match cli.command {
        Commands::Start => cmd_start(config, socket, logs).await?,
        Commands::Stop => cmd_stop(&IpcClient::new(socket)).await?,
        Commands::Status => cmd_status(&IpcClient::new(socket)).await?,
        Commands::Send { command, params } => {
            cmd_send(&IpcClient::new(socket), &command, params.into_iter().collect()).await?
        }
        Commands::Watch { count, json } => cmd_watch(&IpcClient::new(socket), count, json).await?,
        Commands::Logs { limit } => cmd_logs(&IpcClient::new(socket), limit).await?,
        Commands::Remote { remote_id, signal } => cmd_remote(config, remote_id, signal).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .try_init();
}

async fn cmd_start(
    config: AppConfig,
    socket: PathBuf,
    logs: Option<pawlink_core::LogReader>,
) -> Result<()> {
    info!("Starting PawLink daemon");
    let mut daemon = Daemon::new(config).with_socket_path(socket);
    if let Some(logs) = logs {
        daemon = daemon.with_log_reader(logs);
    }
    daemon.run().await?;
    Ok(())
}

async fn cmd_stop(client: &IpcClient) -> Result<()> {
    let resp = client.stop().await?;
    println!("{}", resp.message);
    Ok(())
}

async fn cmd_status(client: &IpcClient) -> Result<()> {
    let status = client.status().await?;
    println!("PawLink daemon v{} ({})", status.version, status.git_hash);
    println!("  pid:         {}", status.pid);
    println!("  uptime:      {}s", status.uptime_secs);
    println!("  controller:  {}", status.endpoint);
    match status.link_id {
        Some(id) => println!("  link:        {} (link #{id})", status.link_state),
        None => println!("  link:        {}", status.link_state),
    }
    println!("  attempts:    {}", status.connect_attempts);
    if let Some(age) = status.last_activity_secs {
        println!("  last frame:  {age}s ago");
    }
    println!("  front-ends:  {}", status.front_ends);
    println!("  log level:   {}", status.log_level);
    Ok(())
}

async fn cmd_send(client: &IpcClient, command: &str, params: Params) -> Result<()> {
    let outcome = client.command(command, params).await?;
    if outcome.accepted {
        match outcome.link_id {
            Some(link_id) => println!("accepted on link #{link_id}"),
            None => println!("accepted"),
        }
        return Ok(());
    }
    let reason = outcome.reason.unwrap_or_else(|| "rejected".to_string());
    if outcome.retryable {
        bail!("command rejected: {reason} (retry later)");
    }
    bail!("command rejected: {reason}");
}

async fn cmd_watch(client: &IpcClient, count: Option<usize>, json: bool) -> Result<()> {
    let mut events = client.events().await?;
    let mut seen = 0;
    while let Some(event) = events.next_event().await {
        let event = event?;
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{event}");
        }
        seen += 1;
        if count.is_some_and(|n| seen >= n) {
            break;
        }
    }
    Ok(())
}

async fn cmd_logs(client: &IpcClient, limit: Option<usize>) -> Result<()> {
    let logs = client.logs(limit).await?;
    for entry in &logs.entries {
        println!(
            "{:>10} {:>5} {}: {}",
            entry.timestamp, entry.level, entry.target, entry.message
        );
    }
    if logs.entries.len() < logs.total {
        println!("({} of {} entries)", logs.entries.len(), logs.total);
    }
    Ok(())
}

async fn cmd_remote(
    mut config: AppConfig,
    remote_id: Option<String>,
    signal: Option<f64>,
) -> Result<()> {
    if let Some(id) = remote_id {
        config.heartbeat.remote_id = id;
    }
    if let Some(dbm) = signal {
        config.heartbeat.signal_strength = dbm;
    }
    config.validate()?;

    info!(
        remote_id = %config.heartbeat.remote_id,
        endpoint = %config.controller.endpoint,
        "Starting remote"
    );
    let bridge = Bridge::start(&config);
    let (service, handle) = HeartbeatService::from_config(bridge.dispatcher(), &config.heartbeat);
    let heartbeat = tokio::spawn(service.run());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, stopping remote");

    handle.shutdown().await?;
    heartbeat.await?;
    bridge.shutdown().await;

    let counts = handle.counts();
    println!("heartbeats sent: {}, skipped: {}", counts.sent, counts.skipped);
    Ok(())
}

fn cmd_config(path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else if path.exists() {
        println!("Configuration at '{}' is valid.", path.display());
    } else {
        println!(
            "No configuration at '{}'; defaults are valid.",
            path.display()
        );
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}

fn parse_param(s: &str) -> Result<(String, ParamValue), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("missing parameter name in {s:?}"));
    }
    let Ok(value) = value.parse::<ParamValue>();
    Ok((key.to_string(), value))
}
