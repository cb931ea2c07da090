use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::{env, process::ExitCode, time::Duration};
use tokio::net::UnixDatagram;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

use tcctl::protocol::DEFAULT_SOCKET_PATH;
use tcctl::{Command, Phase, Response, StatParam, MESSAGE_SIZE};

/// How long to wait for an INFO reply.
const STAT_TIMEOUT: Duration = Duration::from_secs(2);
/// A reload only replies on failure; silence within this window is success.
const RELOAD_GRACE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "tcctl", about = "Control the tcctld thermal cooling daemon")]
struct Cli {
    /// Control socket of the daemon.
    #[arg(long, env = "TCCTL_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Action {
    /// Print one status parameter, or all of them as JSON.
    Stat {
        #[arg(value_enum, default_value_t = StatTarget::All)]
        param: StatTarget,
    },
    /// Force the fan on or off until `auto`.
    Override {
        #[arg(value_enum)]
        level: Level,
    },
    /// Resume automatic control.
    Auto,
    /// Replace the runtime thresholds (°C).
    Trigger { low_temp: u32, trigger_temp: u32 },
    /// Reload the daemon's configuration file.
    Reload,
    /// Stop the daemon.
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatTarget {
    Temperature,
    #[value(name = "low_temp")]
    LowTemp,
    #[value(name = "trigger_temp")]
    TriggerTemp,
    Phase,
    All,
}

impl StatTarget {
    /// `None` queries every parameter.
    fn param(self) -> Option<StatParam> {
        match self {
            Self::Temperature => Some(StatParam::Temperature),
            Self::LowTemp => Some(StatParam::LowTemp),
            Self::TriggerTemp => Some(StatParam::TriggerTemp),
            Self::Phase => Some(StatParam::Phase),
            Self::All => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Level {
    On,
    Off,
}

// ---------------------------------------------------------------------------
// Client socket
// ---------------------------------------------------------------------------

/// Datagram socket bound to a private path so the daemon can reply. The path
/// is removed on drop.
struct Client {
    socket: UnixDatagram,
    local: PathBuf,
    daemon: PathBuf,
}

impl Client {
    fn connect(daemon: PathBuf) -> Result<Self> {
        let local = env::temp_dir().join(format!("tcctl-client-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&local);
        let socket = UnixDatagram::bind(&local)
            .with_context(|| format!("failed to bind {}", local.display()))?;
        Ok(Self {
            socket,
            local,
            daemon,
        })
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.socket
            .send_to(&command.encode(), &self.daemon)
            .await
            .with_context(|| format!("failed to reach tcctld at {}", self.daemon.display()))?;
        tracing::debug!(?command, "sent");
        Ok(())
    }

    /// Next reply, or `None` if nothing arrives within `wait`.
    async fn recv(&self, wait: Duration) -> Result<Option<Response>> {
        let mut buf = [0u8; MESSAGE_SIZE + 1];
        match timeout(wait, self.socket.recv(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(received) => {
                let n = received.context("failed to receive reply")?;
                let response = Response::decode(&buf[..n]).context("malformed reply")?;
                tracing::debug!(?response, "received");
                Ok(Some(response))
            }
        }
    }

    async fn stat(&self, param: StatParam) -> Result<u32> {
        self.send(Command::Stat(param.id())).await?;
        match self.recv(STAT_TIMEOUT).await? {
            Some(Response::Info { param: id, value }) if id == param.id() => Ok(value),
            Some(other) => bail!("unexpected reply {other:?}"),
            None => bail!("no reply from tcctld for `{}`", param.name()),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.local);
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StatusReport {
    temperature: u32,
    low_temp: u32,
    trigger_temp: u32,
    phase: Phase,
}

fn render(param: StatParam, value: u32) -> String {
    match param {
        StatParam::Phase => Phase::from_ordinal(value).to_string(),
        _ => value.to_string(),
    }
}

async fn execute(action: Action, daemon: &Path) -> Result<()> {
    let client = Client::connect(daemon.to_path_buf())?;

    match action {
        Action::Stat { param } => match param.param() {
            Some(param) => println!("{}", render(param, client.stat(param).await?)),
            None => {
                let report = StatusReport {
                    temperature: client.stat(StatParam::Temperature).await?,
                    low_temp: client.stat(StatParam::LowTemp).await?,
                    trigger_temp: client.stat(StatParam::TriggerTemp).await?,
                    phase: Phase::from_ordinal(client.stat(StatParam::Phase).await?),
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        },
        Action::Reload => {
            client.send(Command::Reload).await?;
            match client.recv(RELOAD_GRACE).await? {
                None => println!("reload accepted"),
                Some(Response::ConfigError { line, entry }) if line == 0 => {
                    bail!("config source unavailable (entry {entry})")
                }
                Some(Response::ConfigError { line, entry }) => {
                    bail!("config rejected at line {line} (entry {entry})")
                }
                Some(other) => bail!("unexpected reply {other:?}"),
            }
        }
        Action::Override { level } => {
            client.send(Command::Override(level == Level::On)).await?
        }
        Action::Auto => client.send(Command::Auto).await?,
        Action::Trigger {
            low_temp,
            trigger_temp,
        } => {
            client
                .send(Command::Trigger {
                    low_temp,
                    trigger_temp,
                })
                .await?
        }
        Action::Kill => client.send(Command::Kill).await?,
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match execute(cli.command, &cli.socket).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tcctl: {e:#}");
            ExitCode::FAILURE
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
