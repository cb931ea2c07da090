//! Thermal cooling controller: drives a fan output from a temperature sensor
//! with hysteresis, and accepts operator commands over a local datagram
//! socket.

pub mod actuator;
pub mod config;
pub mod control;
pub mod daemon;
pub mod parse;
pub mod protocol;
pub mod sensor;
pub mod state;

pub use config::{Config, ConfigError, ConfigStore};
pub use control::{step, Phase, Thresholds, Transition};
pub use daemon::{Controller, StopReason};
pub use protocol::{Command, Response, WireError, MESSAGE_SIZE};
pub use state::{StatParam, Status};
