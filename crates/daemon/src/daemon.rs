//! Controller context and the single-threaded event loop.
//!
//! The [`Controller`] owns every piece of mutable state (configuration,
//! runtime status, gateway handles). The loop waits for a command datagram or
//! the update interval, dispatches at most one command, then runs one control
//! step:
//!
//! ```text
//!   wait(cmd | timeout | shutdown) ──▶ dispatch cmd ──▶ step ──▶ actuate ──▶ sample
//!        ▲                                                                     │
//!        └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sample taken at the end of an iteration feeds the step of the next.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::UnixDatagram;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::actuator::Actuator;
use crate::config::{Config, ConfigError, ConfigStore};
use crate::control::{step, Phase};
use crate::protocol::{Command, Response, MESSAGE_SIZE};
use crate::sensor::{to_celsius, Sensor};
use crate::state::Status;

/// Why the event loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// KILL received on the control socket.
    Kill,
    /// Termination signal.
    Signal,
}

/// Result of dispatching one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dispatch {
    pub reply: Option<Response>,
    pub shutdown: bool,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller<A, S> {
    store: ConfigStore,
    status: Status,
    actuator: A,
    sensor: S,
    config_path: PathBuf,
}

impl<A: Actuator, S: Sensor> Controller<A, S> {
    pub fn new(config: Config, actuator: A, sensor: S, config_path: impl Into<PathBuf>) -> Self {
        Self {
            status: Status::new(&config),
            store: ConfigStore::new(config),
            actuator,
            sensor,
            config_path: config_path.into(),
        }
    }

    pub fn config(&self) -> &Config {
        self.store.active()
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Drive the output to the level of the current phase without stepping.
    /// Used once at startup so the fan is in a known state.
    pub fn apply_phase(&mut self) {
        self.actuate(self.status.phase.is_active());
    }

    /// Apply one command to the controller state.
    pub fn handle(&mut self, command: Command) -> Dispatch {
        match command {
            Command::Stat(param) => {
                let value = self.status.get(param);
                debug!(param, value, "stat");
                Dispatch {
                    reply: Some(Response::Info { param, value }),
                    shutdown: false,
                }
            }
            Command::Override(on) => {
                let phase = if on {
                    Phase::OverrideRun
                } else {
                    Phase::OverrideIdle
                };
                self.set_phase(phase, "override");
                Dispatch::default()
            }
            Command::Auto => {
                self.set_phase(Phase::Run, "resume automatic");
                Dispatch::default()
            }
            Command::Trigger {
                low_temp,
                trigger_temp,
            } => {
                info!(low_temp, trigger_temp, "thresholds overridden");
                self.status.low_temp = low_temp;
                self.status.trigger_temp = trigger_temp;
                Dispatch::default()
            }
            Command::Reload => match self.reload() {
                Ok(()) => Dispatch::default(),
                Err(e) => Dispatch {
                    reply: Some(Response::ConfigError {
                        line: e.line,
                        entry: e.entry,
                    }),
                    shutdown: false,
                },
            },
            Command::Kill => {
                info!("shutdown requested over control socket");
                Dispatch {
                    reply: None,
                    shutdown: true,
                }
            }
        }
    }

    /// Reload the configuration source. On success the runtime thresholds
    /// are re-mirrored and an output pin change takes effect; on failure the
    /// active configuration is untouched.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        let previous = self.store.active().clone();

        if let Err(e) = self.store.reload_from(&self.config_path) {
            error!(
                path = %self.config_path.display(),
                line = e.line,
                entry = e.entry,
                "config reload rejected: {e}"
            );
            return Err(e);
        }

        self.status.mirror(self.store.active());
        for warning in self.store.active().warnings() {
            warn!("config: {warning}");
        }

        let current = self.store.active();
        if let Some(old_pin) = previous.output_pin.filter(|&p| current.output_pin != Some(p)) {
            // leave the old pin inactive before letting go of it
            if let Err(e) = self.actuator.set(old_pin, previous.invert_output) {
                warn!(pin = old_pin, "failed to clear previous output pin: {e:#}");
            }
            self.actuator.release(old_pin);
        }

        info!(
            path = %self.config_path.display(),
            low_temp = current.low_temp,
            trigger_temp = current.trigger_temp,
            hysteresis_drop = current.hysteresis_drop,
            update_interval = current.update_interval,
            output_pin = ?current.output_pin,
            stopped = current.stopped,
            "config applied"
        );
        Ok(())
    }

    /// One control-loop iteration: step on the previous sample, actuate,
    /// then sample for the next iteration.
    pub fn tick(&mut self) {
        if self.config().stopped {
            debug!(phase = %self.status.phase, "automatic control stopped");
        } else {
            let thresholds = self.status.thresholds(self.store.active());
            let transition = step(self.status.phase, self.status.last_temperature, &thresholds);
            if transition.phase != self.status.phase {
                info!(
                    from = %self.status.phase,
                    to = %transition.phase,
                    temperature = self.status.last_temperature,
                    "phase change"
                );
                self.status.phase = transition.phase;
            }
        }

        self.actuate(self.status.phase.is_active());
        self.sample();
    }

    /// Final output write on the shutdown path.
    pub fn shutdown(&mut self) {
        let stay_on = self.config().stay_on_at_exit;
        info!(stay_on, "driving exit level");
        self.actuate(stay_on);
    }

    fn set_phase(&mut self, phase: Phase, reason: &str) {
        info!(from = %self.status.phase, to = %phase, "{reason}");
        self.status.phase = phase;
    }

    fn actuate(&mut self, active: bool) {
        let config = self.store.active();
        let Some(pin) = config.output_pin else {
            debug!(active, "no output pin configured, skipping write");
            return;
        };
        let level = active != config.invert_output;
        if let Err(e) = self.actuator.set(pin, level) {
            warn!(pin, active, "output write failed: {e:#}");
        }
    }

    fn sample(&mut self) {
        match self.sensor.read() {
            Ok(millidegrees) => {
                if self.status.record_sample(to_celsius(millidegrees)) {
                    info!(
                        temperature = self.status.last_temperature,
                        "sensor recovered, resuming automatic control"
                    );
                }
            }
            Err(e) => {
                warn!(
                    failures = self.status.sensor_failures + 1,
                    "sensor read failed: {e:#}"
                );
                if self.status.record_sensor_failure() {
                    error!("sensor unavailable, failing safe with output on");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run until KILL or a shutdown signal. Returns an error only when waiting on
/// the socket itself fails. The caller performs the shutdown sequence.
pub async fn run<A: Actuator, S: Sensor>(
    controller: &mut Controller<A, S>,
    socket: &UnixDatagram,
    mut shutdown: watch::Receiver<bool>,
) -> Result<StopReason> {
    // one spare byte so oversized datagrams show up as the wrong size
    let mut buf = [0u8; MESSAGE_SIZE + 1];

    loop {
        if *shutdown.borrow() {
            return Ok(StopReason::Signal);
        }

        let wait = controller.config().poll_interval();

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    // sender gone: nobody can ask us to stop any more except KILL
                    warn!("shutdown channel closed");
                    return Ok(StopReason::Signal);
                }
                continue;
            }
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = received.context("control socket receive failed")?;
                match Command::decode(&buf[..len]) {
                    Ok(command) => {
                        let dispatch = controller.handle(command);
                        if let Some(reply) = dispatch.reply {
                            send_reply(socket, &peer, reply);
                        }
                        if dispatch.shutdown {
                            return Ok(StopReason::Kill);
                        }
                    }
                    Err(e) => warn!(len, "dropping datagram: {e}"),
                }
            }
            _ = tokio::time::sleep(wait) => {}
        }

        controller.tick();
    }
}

/// Never waits on the peer; a full peer queue drops the reply.
fn send_reply(socket: &UnixDatagram, peer: &tokio::net::unix::SocketAddr, reply: Response) {
    let Some(path) = peer.as_pathname() else {
        warn!(?reply, "sender has no socket path, dropping reply");
        return;
    };
    match socket.try_send_to(&reply.encode(), path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            warn!(path = %path.display(), ?reply, "peer queue full, dropping reply");
        }
        Err(e) => warn!(path = %path.display(), "failed to send reply: {e}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
