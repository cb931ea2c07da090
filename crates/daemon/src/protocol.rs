//! Fixed-size datagram codec for the control socket.
//!
//! Wire format (native byte order, no framing; the socket keeps datagram
//! boundaries):
//! ```text
//! ┌──────────────┬──────────────┬──────────────┐
//! │ tag (i32)    │ param1 (4B)  │ param2 (4B)  │
//! └──────────────┴──────────────┴──────────────┘
//! ```
//!
//! Requests and responses share the layout. A datagram of any other length
//! is rejected as a whole.

use std::fmt;

/// Size of every request and response.
pub const MESSAGE_SIZE: usize = 12;

/// Default path of the daemon's control socket.
pub const DEFAULT_SOCKET_PATH: &str = "/run/tcctl.sock";

pub type Frame = [u8; MESSAGE_SIZE];

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

const TAG_STAT: i32 = 0;
const TAG_OVRD: i32 = 1;
const TAG_AUTO: i32 = 2;
const TAG_TRIG: i32 = 3;
const TAG_CONF: i32 = 4;
const TAG_KILL: i32 = 5;
const TAG_INFO: i32 = 6;
const TAG_CERR: i32 = 7;

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// Request sent to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Read one status parameter by id.
    Stat(u32),
    /// Force the output on (`true`) or off until resumed.
    Override(bool),
    /// Resume automatic control.
    Auto,
    /// Replace the runtime thresholds.
    Trigger { low_temp: u32, trigger_temp: u32 },
    /// Reload the configuration source.
    Reload,
    Kill,
}

/// Reply sent by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Info { param: u32, value: u32 },
    ConfigError { line: i32, entry: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Datagram length differs from [`MESSAGE_SIZE`].
    Size(usize),
    /// Tag not valid in this direction.
    UnknownTag(i32),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size(n) => write!(f, "datagram is {n} bytes, expected {MESSAGE_SIZE}"),
            Self::UnknownTag(tag) => write!(f, "unknown message tag {tag}"),
        }
    }
}

impl std::error::Error for WireError {}

// ---------------------------------------------------------------------------
// Raw layout helpers
// ---------------------------------------------------------------------------

fn encode_raw(tag: i32, param1: [u8; 4], param2: [u8; 4]) -> Frame {
    let mut frame = [0u8; MESSAGE_SIZE];
    frame[0..4].copy_from_slice(&tag.to_ne_bytes());
    frame[4..8].copy_from_slice(&param1);
    frame[8..12].copy_from_slice(&param2);
    frame
}

fn decode_raw(bytes: &[u8]) -> Result<(i32, [u8; 4], [u8; 4]), WireError> {
    let frame: &Frame = bytes.try_into().map_err(|_| WireError::Size(bytes.len()))?;
    let word = |at: usize| [frame[at], frame[at + 1], frame[at + 2], frame[at + 3]];
    Ok((i32::from_ne_bytes(word(0)), word(4), word(8)))
}

fn uint(word: [u8; 4]) -> u32 {
    u32::from_ne_bytes(word)
}

fn sint(word: [u8; 4]) -> i32 {
    i32::from_ne_bytes(word)
}

// ---------------------------------------------------------------------------
// Command codec
// ---------------------------------------------------------------------------

impl Command {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (tag, p1, p2) = decode_raw(bytes)?;
        match tag {
            TAG_STAT => Ok(Self::Stat(uint(p1))),
            TAG_OVRD => Ok(Self::Override(sint(p1) != 0)),
            TAG_AUTO => Ok(Self::Auto),
            TAG_TRIG => Ok(Self::Trigger {
                low_temp: uint(p1),
                trigger_temp: uint(p2),
            }),
            TAG_CONF => Ok(Self::Reload),
            TAG_KILL => Ok(Self::Kill),
            other => Err(WireError::UnknownTag(other)),
        }
    }

    pub fn encode(&self) -> Frame {
        let zero = [0u8; 4];
        match *self {
            Self::Stat(id) => encode_raw(TAG_STAT, id.to_ne_bytes(), zero),
            Self::Override(on) => encode_raw(TAG_OVRD, i32::from(on).to_ne_bytes(), zero),
            Self::Auto => encode_raw(TAG_AUTO, zero, zero),
            Self::Trigger {
                low_temp,
                trigger_temp,
            } => encode_raw(TAG_TRIG, low_temp.to_ne_bytes(), trigger_temp.to_ne_bytes()),
            Self::Reload => encode_raw(TAG_CONF, zero, zero),
            Self::Kill => encode_raw(TAG_KILL, zero, zero),
        }
    }
}

// ---------------------------------------------------------------------------
// Response codec
// ---------------------------------------------------------------------------

impl Response {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (tag, p1, p2) = decode_raw(bytes)?;
        match tag {
            TAG_INFO => Ok(Self::Info {
                param: uint(p1),
                value: uint(p2),
            }),
            TAG_CERR => Ok(Self::ConfigError {
                line: sint(p1),
                entry: sint(p2),
            }),
            other => Err(WireError::UnknownTag(other)),
        }
    }

    pub fn encode(&self) -> Frame {
        match *self {
            Self::Info { param, value } => {
                encode_raw(TAG_INFO, param.to_ne_bytes(), value.to_ne_bytes())
            }
            Self::ConfigError { line, entry } => {
                encode_raw(TAG_CERR, line.to_ne_bytes(), entry.to_ne_bytes())
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
