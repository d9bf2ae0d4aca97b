//! Robot teleop server: entry point.
//!
//! This binary owns the motor and servo controllers on the robot's serial
//! ports, streams the onboard camera, and lets any number of operators drive
//! the robot over WebSocket.
//!
//! # Usage
//!
//! ```text
//! teleop-server [OPTIONS]
//!
//! Options:
//!   --config       <PATH>   Config file [default: platform config dir]
//!   --bind         <ADDR>   WebSocket bind address [default: from config, 0.0.0.0]
//!   --port         <PORT>   WebSocket port [default: from config, 5001]
//!   --log-level    <FILTER> Log filter when RUST_LOG is unset [default: from config, info]
//!   --backend      <NAME>   Capture backend: piped | device
//!   --write-config <PATH>   Write the effective config to PATH and exit
//! ```
//!
//! # Precedence
//!
//! `RUST_LOG` beats `--log-level`; command-line flags (or their environment
//! variables) beat the config file; the config file beats built-in defaults.
//!
//! | Variable            | Flag          |
//! |---------------------|---------------|
//! | `TELEOP_CONFIG`     | `--config`    |
//! | `TELEOP_BIND`       | `--bind`      |
//! | `TELEOP_PORT`       | `--port`      |
//! | `TELEOP_LOG_LEVEL`  | `--log-level` |
//! | `TELEOP_BACKEND`    | `--backend`   |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use teleop_server::application::{
    BroadcastSink, DeviceManager, DeviceSettings, FramePipeline, TeleopService,
};
use teleop_server::domain::{AppConfig, CaptureBackend};
use teleop_server::infrastructure::capture::DefaultSourceFactory;
use teleop_server::infrastructure::run_server;
use teleop_server::infrastructure::serial::{LinkOpener, SerialLinkOpener};
use teleop_server::infrastructure::storage::{load_config, save_config};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Robot teleop server.
///
/// Every flag is optional; an unset flag leaves the config file value alone.
#[derive(Debug, Parser)]
#[command(
    name = "teleop-server",
    about = "Serial motor/servo control and camera streaming for a teleoperated robot",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, env = "TELEOP_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the WebSocket server to.
    #[arg(long, env = "TELEOP_BIND")]
    bind: Option<String>,

    /// TCP port for the WebSocket server.
    #[arg(long, env = "TELEOP_PORT")]
    port: Option<u16>,

    /// `tracing` filter used when `RUST_LOG` is not set, e.g. `debug`.
    #[arg(long, env = "TELEOP_LOG_LEVEL")]
    log_level: Option<String>,

    /// Camera capture backend.
    #[arg(long, env = "TELEOP_BACKEND")]
    backend: Option<CaptureBackend>,

    /// Write the effective configuration to this path and exit.
    #[arg(long)]
    write_config: Option<PathBuf>,
}

impl Cli {
    /// Loads the config file and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the bind address is not a valid IP address.
    fn into_config(self) -> anyhow::Result<(AppConfig, SocketAddr)> {
        let config = load_config(self.config.as_deref()).context("failed to load configuration")?;
        self.apply(config)
    }

    fn apply(self, mut config: AppConfig) -> anyhow::Result<(AppConfig, SocketAddr)> {
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }
        if let Some(backend) = self.backend {
            config.stream.backend = backend;
        }

        let bind_addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid WebSocket bind address: '{}:{}'",
                    config.server.bind_address, config.server.port
                )
            })?;

        Ok((config, bind_addr))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and merged over the config file.
/// 2. `tracing_subscriber` is initialised (`RUST_LOG`, else the configured level).
/// 3. The device manager is created and its reconnect loop started; the loop's
///    first pass discovers both controllers.
/// 4. The frame pipeline is created idle; it starts with the first operator.
/// 5. A Ctrl+C handler clears the shared `running` flag.
/// 6. [`run_server`] accepts operators until the flag is cleared, after which
///    the stream is stopped and every motor and servo gets a stop command.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let write_path = cli.write_config.clone();
    let (config, bind_addr) = cli.into_config()?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    let fallback_level = config.server.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_level)),
        )
        .init();

    if let Some(path) = write_path {
        save_config(&config, &path)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        info!("wrote configuration to {}", path.display());
        return Ok(());
    }

    info!(
        backend = config.stream.backend.as_str(),
        "teleop server starting on ws://{bind_addr}"
    );

    // ── Wiring ────────────────────────────────────────────────────────────────
    let sink = Arc::new(BroadcastSink::new());

    let opener: Arc<dyn LinkOpener> = Arc::new(SerialLinkOpener::new(config.serial.baud_rate));
    let devices = Arc::new(DeviceManager::new(
        opener,
        DeviceSettings::from(&config),
        Arc::clone(&sink),
    ));
    devices.spawn_reconnect_loop();

    let stream_config = config
        .stream
        .stream_config()
        .context("invalid [stream] settings")?;
    let factory = Arc::new(DefaultSourceFactory::new(config.stream.clone()));
    let pipeline = Arc::new(
        FramePipeline::new(factory, Arc::clone(&sink), stream_config)
            .with_stop_grace(Duration::from_millis(config.stream.stop_timeout_ms)),
    );

    let service = Arc::new(TeleopService::new(
        devices,
        pipeline,
        sink,
        config.server.calibrate_servos_on_connect,
    ));

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Main server loop ──────────────────────────────────────────────────────
    let served = run_server(bind_addr, Arc::clone(&service), running).await;

    service.shutdown().await;
    served?;

    info!("teleop server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli {
            config: None,
            bind: None,
            port: None,
            log_level: None,
            backend: None,
            write_config: None,
        }
    }

    #[test]
    fn test_cli_without_flags_overrides_nothing() {
        // Arrange
        let cli = Cli::parse_from(["teleop-server"]);

        // Assert
        assert!(cli.bind.is_none());
        assert!(cli.port.is_none());
        assert!(cli.backend.is_none());
        assert!(cli.write_config.is_none());
    }

    #[test]
    fn test_cli_port_override() {
        let cli = Cli::parse_from(["teleop-server", "--port", "6000"]);
        assert_eq!(cli.port, Some(6000));
    }

    #[test]
    fn test_cli_backend_parses_device() {
        let cli = Cli::parse_from(["teleop-server", "--backend", "device"]);
        assert_eq!(cli.backend, Some(CaptureBackend::Device));
    }

    #[test]
    fn test_cli_rejects_unknown_backend() {
        let result = Cli::try_parse_from(["teleop-server", "--backend", "webcam"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_defaults_bind_all_interfaces_on_5001() {
        // Arrange
        let cli = Cli::parse_from(["teleop-server"]);

        // Act
        let (config, addr) = cli.apply(AppConfig::default()).unwrap();

        // Assert
        assert_eq!(addr.to_string(), "0.0.0.0:5001");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_apply_flags_override_config_file_values() {
        // Arrange: a config file that moved the port
        let mut file_config = AppConfig::default();
        file_config.server.port = 7000;
        file_config.server.log_level = "warn".to_string();
        let cli = Cli::parse_from([
            "teleop-server",
            "--bind",
            "127.0.0.1",
            "--port",
            "8080",
            "--log-level",
            "debug",
            "--backend",
            "device",
        ]);

        // Act
        let (config, addr) = cli.apply(file_config).unwrap();

        // Assert
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.stream.backend, CaptureBackend::Device);
    }

    #[test]
    fn test_apply_keeps_config_file_values_without_flags() {
        let mut file_config = AppConfig::default();
        file_config.server.port = 7000;

        let (_, addr) = bare_cli().apply(file_config).unwrap();

        assert_eq!(addr.port(), 7000);
    }

    #[test]
    fn test_apply_invalid_bind_returns_error() {
        // Arrange
        let cli = Cli {
            bind: Some("not.an.ip".to_string()),
            ..bare_cli()
        };

        // Act
        let result = cli.apply(AppConfig::default());

        // Assert: must return an error, not panic
        assert!(result.is_err());
    }

    #[test]
    fn test_into_config_missing_file_uses_defaults() {
        // Arrange
        let path = std::env::temp_dir().join(format!(
            "teleop-missing-{}/config.toml",
            std::process::id()
        ));
        let cli = Cli {
            config: Some(path),
            ..bare_cli()
        };

        // Act
        let (config, _) = cli.into_config().unwrap();

        // Assert
        assert_eq!(config, AppConfig::default());
    }
}
