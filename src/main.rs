//! CLI entry point for the trainer bridge.
//!
//! `serve` owns the Bluetooth session and listens on a local socket. The
//! other subcommands are thin clients of a running bridge.
//!
//! ```bash
//! trainer_bridge serve
//! trainer_bridge devices
//! trainer_bridge connect AA:BB:CC:DD:EE:FF
//! trainer_bridge stream
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;
use trainer_bridge::domain::settings::SettingsService;
use trainer_bridge::infrastructure::bluetooth::platform::{BtleTransport, PlatformConfig};
use trainer_bridge::infrastructure::bluetooth::{SessionManager, StreamingSession};
use trainer_bridge::infrastructure::ipc::{BridgeClient, BridgeServer};
use trainer_bridge::infrastructure::logging;

#[derive(Parser)]
#[command(name = "trainer_bridge")]
#[command(about = "Relay indoor bike metrics from a BLE trainer to a local consumer", long_about = None)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Serve,
    /// Scan for nearby BLE devices
    Devices,
    /// Connect the bridge to a device
    Connect {
        /// Device address as reported by `devices`
        address: String,
    },
    /// Disconnect the current device
    Disconnect,
    /// Print metrics as JSON lines until interrupted
    Stream,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_service = match cli.settings {
        Some(path) => SettingsService::with_path(path),
        None => SettingsService::new()?,
    };
    let _logging_guard = logging::init_logger(&settings_service.get().log_settings)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(cli.command.unwrap_or(Commands::Serve), settings_service))
}

async fn run(command: Commands, settings_service: SettingsService) -> Result<()> {
    let socket = settings_service.get().socket_name.clone();

    match command {
        Commands::Serve => serve(settings_service).await,
        Commands::Devices => {
            let devices = BridgeClient::new(socket).devices().await?;
            for device in devices {
                println!("{}", serde_json::to_string(&device)?);
            }
            Ok(())
        }
        Commands::Connect { address } => {
            let reply = BridgeClient::new(socket).connect(&address).await?;
            println!("{}", serde_json::to_string(&reply)?);
            Ok(())
        }
        Commands::Disconnect => {
            let reply = BridgeClient::new(socket).disconnect().await?;
            println!("{}", serde_json::to_string(&reply)?);
            Ok(())
        }
        Commands::Stream => {
            let mut stream = BridgeClient::new(socket).open_stream().await?;
            loop {
                tokio::select! {
                    line = stream.next_line() => match line? {
                        Some(line) => println!("{}", line),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            Ok(())
        }
    }
}

async fn serve(settings_service: SettingsService) -> Result<()> {
    info!("Starting trainer bridge");

    let (candidates, config, socket) = {
        let settings = settings_service.get();
        (
            settings.candidate_uuids()?,
            PlatformConfig {
                scan_duration: settings.scan_duration(),
                connect_timeout: settings.connect_timeout(),
                subscribe_timeout: settings.subscribe_timeout(),
            },
            settings.socket_name.clone(),
        )
    };
    info!(
        path = %settings_service.path().display(),
        candidates = candidates.len(),
        "Settings loaded"
    );

    let transport = BtleTransport::new(config).await?;
    let manager = Arc::new(SessionManager::new(Arc::new(transport)));
    let streaming = Arc::new(StreamingSession::new(manager.clone(), candidates));
    let server = Arc::new(BridgeServer::new(
        manager.clone(),
        streaming,
        Arc::new(Mutex::new(settings_service)),
    ));

    let result = tokio::select! {
        result = server.run(&socket) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };

    manager.shutdown().await;
    result
}
