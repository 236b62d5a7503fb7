// ble-print-bridge: command-line driver for the BLE session core.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use ble_print_bridge_lib::commands;
use ble_print_bridge_lib::config::AppConfig;
use ble_print_bridge_lib::core::bluetooth::constants::DEFAULT_SCAN_DURATION_SECS;
use ble_print_bridge_lib::core::bluetooth::{
    BleStack, BluestStack, SessionEvent, SimulatedPeripheral, SimulatedStack,
};
use ble_print_bridge_lib::logging;
use ble_print_bridge_lib::state::AppState;
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

const DEMO_PRINTER_ID: &str = "SIM-PRINTER";

#[derive(Parser)]
#[command(name = "ble-print-bridge")]
#[command(about = "Discover, connect to and print on a BLE printer", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file, defaults to the platform config directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use an in-process demo printer instead of the bluetooth adapter
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby devices
    Scan {
        #[arg(short, long, default_value_t = DEFAULT_SCAN_DURATION_SECS)]
        seconds: u64,
    },
    /// Read the battery level of a device
    Battery {
        #[arg(short, long)]
        device: String,
        #[arg(long, default_value_t = DEFAULT_SCAN_DURATION_SECS)]
        scan_seconds: u64,
    },
    /// Send a file to a printer
    Print {
        #[arg(short, long)]
        device: String,
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_SCAN_DURATION_SECS)]
        scan_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    let config = AppConfig::load_config(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    logging::init(&config.logging);

    let stack: Arc<dyn BleStack> = if cli.simulate {
        info!("Using simulated printer {}", DEMO_PRINTER_ID);
        Arc::new(SimulatedStack::new().with_peripheral(SimulatedPeripheral::printer(DEMO_PRINTER_ID, "Demo Printer")))
    } else {
        Arc::new(BluestStack::new())
    };
    let app_state = AppState::new(stack, config.session).map_err(|e| anyhow!(e.user_message()))?;

    let result = run(cli.command, &app_state).await;
    commands::shutdown(&app_state).await;
    result
}

async fn run(command: Commands, app_state: &AppState) -> Result<()> {
    match command {
        Commands::Scan { seconds } => {
            commands::toggle_search(app_state).await.map_err(|e| anyhow!(e))?;
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            commands::toggle_search(app_state).await.map_err(|e| anyhow!(e))?;

            let devices = commands::list_devices(app_state).await;
            println!("Found {} device(s)", devices.len());
            for device in devices {
                let rssi = device.rssi.map(|r| r.to_string()).unwrap_or_else(|| "?".to_string());
                println!("{:<40} {:>4} dBm  {}", device.id, rssi, device.name);
            }
        }
        Commands::Battery { device, scan_seconds } => {
            discover(app_state, &device, scan_seconds).await?;
            commands::connect_to_device(&device, app_state).await.map_err(|e| anyhow!(e))?;
            let message = commands::read_battery(app_state).await.map_err(|e| anyhow!(e))?;
            println!("{message}");
        }
        Commands::Print { device, file, scan_seconds } => {
            let payload = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            discover(app_state, &device, scan_seconds).await?;
            commands::connect_to_device(&device, app_state).await.map_err(|e| anyhow!(e))?;
            let message = commands::print_payload(&payload, app_state).await.map_err(|e| anyhow!(e))?;
            println!("{message}");
        }
    }
    Ok(())
}

/// Runs discovery until `device_id` shows up in the list or `seconds` elapse.
async fn discover(app_state: &AppState, device_id: &str, seconds: u64) -> Result<()> {
    let mut events = {
        let mut session = app_state.session.lock().await;
        let events = session.subscribe_events();
        session.start_discovery().await.map_err(|e| anyhow!(e.user_message()))?;
        if session.devices().iter().any(|d| d.id == device_id) {
            return Ok(());
        }
        events
    };

    let wait = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::DevicesUpdated(devices)) if devices.iter().any(|d| d.id == device_id) => {
                    return Ok(());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} session events", skipped),
                Err(RecvError::Closed) => bail!("session event stream closed"),
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(seconds), wait)
        .await
        .map_err(|_| anyhow!("Device {} not found within {}s", device_id, seconds))?
}
