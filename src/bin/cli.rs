//! cellsock CLI - Command-line interface
//!
//! Drives the modem core against the built-in simulated modem and manages
//! the configuration file.

use anyhow::Context;
use cellsock_core::cli::{format_payload, print_exit_codes};
use cellsock_core::config::{self, ConfigError, LogFormat};
use cellsock_core::core::netinfo::derive_hwaddr;
use cellsock_core::{
    AppConfig, BringupReport, CliResult, EventBroadcaster, ExitCodes, LoggingConfig, ModemDevice,
    ModemError, NetdevSnapshot, NetdevState, OutputFormat, PingReply, SetUp, SimulatedModem,
    SimulatedPin, SocketEvent, SocketKind,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// cellsock CLI
#[derive(Parser, Debug)]
#[command(
    name = "cellsock",
    version,
    about = "NB-IoT modem driver core with multiplexed AT sockets",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "CELLSOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring up a simulated modem and echo data through one socket
    Simulate {
        /// Remote host name or IPv4 address
        #[arg(long, default_value = "93.184.216.34")]
        host: String,

        /// Remote port
        #[arg(short, long, default_value_t = 7)]
        port: u16,

        /// Socket slot
        #[arg(short, long, default_value_t = 0)]
        slot: u8,

        /// Use UDP instead of TCP
        #[arg(long)]
        udp: bool,

        /// Payload to send
        #[arg(short, long, default_value = "hello")]
        message: String,

        /// Also ping this host
        #[arg(long)]
        ping: Option<String>,

        /// Skip settle and poll delays
        #[arg(long)]
        fast: bool,
    },

    /// Derive the interface hardware address from an IMEI
    Hwaddr {
        /// 15-digit IMEI
        imei: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show exit code table
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration file location
    Path,
}

/// Outcome of `simulate`
#[derive(Debug, Serialize)]
struct SimulateReport {
    bringup: BringupReport,
    slot: u8,
    device_socket: Option<i32>,
    remote: String,
    sent: usize,
    received: Vec<String>,
    ping: Option<PingReply>,
    netdev: NetdevSnapshot,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => return finish(&cli, CliResult::from(err)),
    };

    let _guard = init_logging(&app_config.logging, cli.verbose, cli.quiet);
    tracing::debug!("Starting cellsock v{}", cellsock_core::VERSION);

    let result = match run(&cli, app_config).await {
        Ok(()) => CliResult::success(),
        Err(err) => classify(err),
    };
    finish(&cli, result)
}

fn finish(cli: &Cli, result: CliResult) -> ExitCode {
    if let Some(msg) = result.message() {
        if result.is_success() {
            if !cli.quiet {
                println!("{msg}");
            }
        } else {
            eprintln!("Error: {msg}");
        }
    }
    result.to_exit_code()
}

fn config_path(cli: &Cli) -> Result<PathBuf, ConfigError> {
    cli.config
        .clone()
        .or_else(config::config_file)
        .ok_or(ConfigError::NoConfigDir)
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    AppConfig::load_from(&config_path(cli)?)
}

fn init_logging(config: &LoggingConfig, verbose: bool, quiet: bool) -> Option<WorkerGuard> {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        config.level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let json = config.format == LogFormat::Json;
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    let (file_layer, guard) = match (config.file, config.directory.as_ref()) {
        (true, Some(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, "cellsock.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    guard
}

/// Map an error to its exit code
fn classify(err: anyhow::Error) -> CliResult {
    let err = match err.downcast::<ModemError>() {
        Ok(err) => return err.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<ConfigError>() {
        Ok(err) => return err.into(),
        Err(err) => err,
    };
    match err.downcast::<std::io::Error>() {
        Ok(err) => err.into(),
        Err(err) => CliResult::error(ExitCodes::ERROR, format!("{err:#}")),
    }
}

async fn run(cli: &Cli, config: AppConfig) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Simulate {
            host,
            port,
            slot,
            udp,
            message,
            ping,
            fast,
        } => {
            let kind = if *udp { SocketKind::Udp } else { SocketKind::Tcp };
            let report = simulate(
                config,
                host,
                *port,
                *slot,
                kind,
                message.as_bytes(),
                ping.as_deref(),
                *fast,
                cli.format,
            )
            .await?;
            print_simulate(cli, &report)?;
        }
        Commands::Hwaddr { imei } => {
            let hwaddr = derive_hwaddr(imei)?;
            let text = hwaddr
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(":");
            match cli.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({ "imei": imei, "hwaddr": text, "bytes": hwaddr })
                ),
                OutputFormat::Hex => println!("{}", hex::encode(hwaddr)),
                OutputFormat::Text => println!("{text}"),
            }
        }
        Commands::Config { action } => handle_config(cli, &config, action)?,
        Commands::ExitCodes => print_exit_codes(),
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn simulate(
    mut config: AppConfig,
    host: &str,
    port: u16,
    slot: u8,
    kind: SocketKind,
    payload: &[u8],
    ping_host: Option<&str>,
    fast: bool,
    format: OutputFormat,
) -> anyhow::Result<SimulateReport> {
    if fast {
        config.modem.bringup.settle_delay_ms = 0;
        config.modem.bringup.poll_interval_ms = 0;
    }

    let sim = Arc::new(SimulatedModem::healthy());
    let netdev = Arc::new(NetdevState::new(&config.modem.name));
    let events = Arc::new(EventBroadcaster::default());
    let mut rx = events.subscribe();

    let mut builder = ModemDevice::builder(config.modem.clone())
        .netdev(netdev.clone())
        .events(events.clone());
    if config.modem.power_pin.is_some() {
        builder = builder.power_pin(Arc::new(SimulatedPin::new()));
    }
    let device = builder.build(sim.clone());

    let bringup = match device.set_up().await? {
        SetUp::Completed(report) => report,
        SetUp::Started(handle) => handle.wait().await?,
        SetUp::AlreadyUp | SetUp::InProgress => {
            anyhow::bail!("device {} was already being brought up", device.name())
        }
    };
    tracing::info!(attempts = bringup.attempts, "modem up");

    let remote = if host.parse::<std::net::Ipv4Addr>().is_ok() {
        host.to_string()
    } else {
        device.resolve_domain(host).await?
    };

    let sockets = device.sockets();
    sockets.connect(slot, &remote, port, kind, true).await?;
    let sent = sockets.send(slot, payload, kind).await?;
    let device_socket = sockets.table().device_socket(slot);

    if let Some(id) = device_socket {
        sim.deliver(id, &remote, port, payload).await;
    }

    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            SocketEvent::DataReceived { data, .. } => received.push(format_payload(&data, format)),
            SocketEvent::ClosedByPeer { slot } => tracing::info!(slot, "closed by peer"),
        }
    }

    let ping = match ping_host {
        Some(target) => Some(device.ping(target, 32, Duration::ZERO).await?),
        None => None,
    };

    sockets.close(slot).await?;
    device.set_down();

    Ok(SimulateReport {
        bringup,
        slot,
        device_socket,
        remote: format!("{remote}:{port}"),
        sent,
        received,
        ping,
        netdev: netdev.snapshot(),
    })
}

fn print_simulate(cli: &Cli, report: &SimulateReport) -> anyhow::Result<()> {
    if cli.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    println!("Bring-up:");
    println!("  attempts: {}", report.bringup.attempts);
    println!(
        "  address:  {}",
        report.bringup.ip_address.as_deref().unwrap_or("-")
    );
    if cli.verbose {
        for t in &report.bringup.history {
            println!(
                "  [{}] #{} {} -> {}{}",
                t.timestamp.format("%H:%M:%S%.3f"),
                t.attempt,
                t.from,
                t.to,
                t.error.as_ref().map(|e| format!(" ({e})")).unwrap_or_default()
            );
        }
    }

    println!("Socket {} -> {}:", report.slot, report.remote);
    if let Some(id) = report.device_socket {
        println!("  modem socket: {id}");
    }
    println!("  sent:     {} bytes", report.sent);
    for data in &report.received {
        println!("  received: {data}");
    }

    if let Some(ping) = &report.ping {
        println!(
            "Ping {}: ttl={} time={} ms",
            ping.ip_addr, ping.ttl, ping.time_ms
        );
    }

    let netdev = &report.netdev;
    println!("Interface {}:", netdev.name);
    println!("  up: {}  link: {}  dhcp: {}", netdev.up, netdev.link_up, netdev.dhcp);
    println!("  hwaddr: {}", netdev.hwaddr_string());
    if let Some(addr) = netdev.ipaddr {
        println!("  inet:   {addr}");
    }

    Ok(())
}

fn handle_config(cli: &Cli, config: &AppConfig, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            _ => print!("{}", config.to_toml_string()?),
        },
        ConfigAction::Init { force } => {
            let path = config_path(cli)?;
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force)", path.display());
            }
            AppConfig::default()
                .save_to(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            if !cli.quiet {
                println!("Wrote {}", path.display());
            }
        }
        ConfigAction::Path => println!("{}", config_path(cli)?.display()),
    }
    Ok(())
}
