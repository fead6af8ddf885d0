use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midi_manipulator::config::ConfigWatcher;
use midi_manipulator::transport::find_port;
use midi_manipulator::{
    BacklightTables, Command, DeviceConfig, DeviceManager, HealthRegistry, MidiTransport,
    MidirTransport, RawBacklightConfig, Signal,
};

/// MIDI Manipulator - typed signals from MIDI controllers, backlight control back to them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to device configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to backlight configuration file (YAML or JSON)
    #[arg(short, long, default_value = "backlight.yaml")]
    backlight: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Run a single device with default settings and log its signals
    #[arg(long, value_name = "DEVICE_NAME")]
    probe: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    let transport = Arc::new(MidirTransport::default());

    if args.list_ports {
        list_ports_formatted(transport.as_ref());
        return Ok(());
    }

    info!("Starting MIDI Manipulator v{}...", env!("CARGO_PKG_VERSION"));

    let raw_backlight = RawBacklightConfig::load(&args.backlight).await?;
    let backlight = BacklightTables::compile(&raw_backlight)
        .with_context(|| format!("Invalid backlight config: {}", args.backlight.display()))?;
    info!("Backlight configuration compiled from {}", args.backlight.display());

    let health = Arc::new(HealthRegistry::new());
    let (manager, signals) = DeviceManager::new(transport, Arc::new(backlight), health);

    match args.probe {
        Some(device_name) => run_probe(manager, signals, device_name, shutdown_signal()).await,
        None => {
            let (watcher, initial_config) = ConfigWatcher::new(&args.config).await?;
            info!("Configuration loaded successfully with hot-reload enabled");

            manager.update_devices(initial_config.midi_devices).await;
            run_app(manager, signals, watcher, shutdown_signal()).await
        }
    }?;

    info!("MIDI Manipulator shutdown complete");
    Ok(())
}

/// Main loop: signals out on stdout, commands in on stdin, config reloads
async fn run_app(
    manager: DeviceManager,
    mut signals: tokio::sync::mpsc::Receiver<Signal>,
    mut config_watcher: ConfigWatcher,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    info!("Ready to process MIDI events!");

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(signal) = signals.recv() => {
                match serde_json::to_string(&signal) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!("Failed to serialize signal: {}", e),
                }
            }

            line = commands.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => handle_command_line(&manager, &line).await,
                    Ok(None) => {
                        info!("Command input closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read command input: {}", e);
                        stdin_open = false;
                    }
                }
            }

            Some(new_config) = config_watcher.next_config() => {
                info!("🔄 Applying reloaded configuration...");
                manager.update_devices(new_config.midi_devices).await;
            }

            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
        }
    }

    manager.close().await;
    Ok(())
}

async fn handle_command_line(manager: &DeviceManager, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let command: Command = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => {
            warn!("Dropping unknown or malformed command: {} ({})", line, e);
            return;
        }
    };

    let alias = command.device_alias().to_string();
    if let Err(e) = manager.execute_on_device(&alias, &command).await {
        warn!(device = %alias, code = command.code(), "Command failed: {}", e);
    }
}

/// Run one device with default settings and log everything it emits
async fn run_probe(
    manager: DeviceManager,
    mut signals: tokio::sync::mpsc::Receiver<Signal>,
    device_name: String,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let mut config = DeviceConfig::with_name(device_name.clone());
    config.startup_delay = 200;

    info!("🔍 Probing device '{}'", device_name);
    manager.update_devices(vec![config]).await;

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(signal) = signals.recv() => {
                info!(code = signal.code(), "Received {}: {:?}", signal.description(), signal);
            }
            _ = &mut shutdown => break,
        }
    }

    manager.close().await;
    Ok(())
}

fn list_ports_formatted(transport: &dyn MidiTransport) {
    use colored::*;

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    let inputs = transport.input_ports();
    let outputs = transport.output_ports();

    for (title, ports) in [("Input Ports:", &inputs), ("Output Ports:", &outputs)] {
        println!("\n{}", title.bold());
        if ports.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for port in ports.iter() {
            let marker = if find_port(port, &inputs).is_some() && find_port(port, &outputs).is_some() {
                "[IN/OUT]".green()
            } else {
                "[ONE-WAY]".yellow()
            };
            println!("  {} {}", marker, port);
        }
    }

    println!();
    debug!("Listed {} input and {} output ports", inputs.len(), outputs.len());
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
