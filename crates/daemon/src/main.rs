use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::{env, fmt, process::ExitCode};
use tokio::net::UnixDatagram;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tcctl::actuator::GpioActuator;
use tcctl::config::{Config, ConfigErrorKind, ConfigStore};
use tcctl::daemon::{self, Controller, StopReason};
use tcctl::protocol::DEFAULT_SOCKET_PATH;
use tcctl::sensor::DEFAULT_THERMAL_ZONE;

const DEFAULT_CONFIG_PATH: &str = "/etc/tcctl/tcctl.conf";

// ---------------------------------------------------------------------------
// Fatal errors and exit codes
// ---------------------------------------------------------------------------

/// Startup or runtime failures that end the process, each with its own exit
/// code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fatal {
    ConfigSource = 2,
    Sensor = 3,
    Actuator = 4,
    Channel = 5,
    Reactor = 6,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigSource => write!(f, "config source unavailable"),
            Self::Sensor => write!(f, "sensor unavailable"),
            Self::Actuator => write!(f, "actuator init failed"),
            Self::Channel => write!(f, "control socket bind failed"),
            Self::Reactor => write!(f, "event loop failed"),
        }
    }
}

impl From<Fatal> for ExitCode {
    fn from(fatal: Fatal) -> Self {
        ExitCode::from(fatal as u8)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

struct Settings {
    config_path: PathBuf,
    socket_path: PathBuf,
    temp_path: PathBuf,
}

impl Settings {
    fn from_env() -> Self {
        let path = |key: &str, default: &str| {
            env::var_os(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };
        Self {
            config_path: path("TCCTL_CONFIG", DEFAULT_CONFIG_PATH),
            socket_path: path("TCCTL_SOCKET", DEFAULT_SOCKET_PATH),
            temp_path: path("TCCTL_TEMP_PATH", DEFAULT_THERMAL_ZONE),
        }
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env();

    match serve(&settings).await {
        Ok(reason) => {
            info!(?reason, "tcctld stopped");
            ExitCode::SUCCESS
        }
        Err((fatal, e)) => {
            error!("{fatal}: {e:#}");
            fatal.into()
        }
    }
}

/// Initial configuration. An unreadable source is fatal; a malformed one is
/// logged and the defaults stay active.
fn initial_config(path: &Path) -> Result<Config, Fatal> {
    let mut store = ConfigStore::default();
    match store.reload_from(path) {
        Ok(()) => {
            info!(path = %path.display(), "config loaded");
            for warning in store.active().warnings() {
                warn!("config: {warning}");
            }
        }
        Err(e) if e.kind == ConfigErrorKind::Unavailable => return Err(Fatal::ConfigSource),
        Err(e) => {
            error!(
                path = %path.display(),
                line = e.line,
                entry = e.entry,
                "config rejected, using defaults: {e}"
            );
        }
    }
    Ok(store.active().clone())
}

#[cfg(feature = "sim")]
fn open_sensor(settings: &Settings) -> Result<tcctl::sensor::SimulatedZone> {
    info!(ignored = %settings.temp_path.display(), "sim feature enabled, not reading thermal zone");
    Ok(tcctl::sensor::SimulatedZone::new(30.0))
}

#[cfg(not(feature = "sim"))]
fn open_sensor(settings: &Settings) -> Result<tcctl::sensor::ThermalZone> {
    tcctl::sensor::ThermalZone::open(&settings.temp_path)
}

/// Bind the control socket, replacing a stale socket file left by a previous
/// run.
fn bind_socket(path: &Path) -> Result<UnixDatagram> {
    if path.exists() {
        warn!(path = %path.display(), "removing stale control socket");
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
    }
    UnixDatagram::bind(path).with_context(|| format!("failed to bind {}", path.display()))
}

/// Translate SIGTERM/SIGINT into the loop's cancellation flag.
fn watch_signals() -> Result<watch::Receiver<bool>> {
    let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = term.recv() => info!("SIGTERM received"),
            _ = int.recv() => info!("SIGINT received"),
        }
        let _ = tx.send(true);
        // keep the sender alive so the loop sees the flag rather than a closed channel
        std::future::pending::<()>().await;
    });

    Ok(rx)
}

async fn serve(settings: &Settings) -> Result<StopReason, (Fatal, anyhow::Error)> {
    let config = initial_config(&settings.config_path).map_err(|fatal| {
        (
            fatal,
            anyhow::anyhow!("cannot read {}", settings.config_path.display()),
        )
    })?;

    let sensor = open_sensor(settings).map_err(|e| (Fatal::Sensor, e))?;
    let actuator = GpioActuator::new().map_err(|e| (Fatal::Actuator, e))?;

    let mut controller = Controller::new(config, actuator, sensor, &settings.config_path);
    // fail-safe start: Idle keeps the fan off until the first sample
    controller.apply_phase();

    let socket = bind_socket(&settings.socket_path).map_err(|e| (Fatal::Channel, e))?;
    info!(
        socket = %settings.socket_path.display(),
        config = %controller.config_path().display(),
        interval = controller.config().update_interval,
        "tcctld running"
    );

    let result = match watch_signals() {
        Ok(shutdown) => daemon::run(&mut controller, &socket, shutdown)
            .await
            .map_err(|e| (Fatal::Reactor, e)),
        Err(e) => Err((Fatal::Reactor, e)),
    };

    // single shutdown path: exit level, then tear down the socket
    controller.shutdown();
    drop(socket);
    if let Err(e) = std::fs::remove_file(&settings.socket_path) {
        warn!(path = %settings.socket_path.display(), "failed to remove control socket: {e}");
    }

    result
}
