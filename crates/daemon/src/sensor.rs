//! Temperature sources.
//!
//! Sensors report millidegrees Celsius, the unit the kernel thermal
//! framework uses; the controller works in whole degrees.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default kernel thermal zone (the SoC sensor on a Raspberry Pi).
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

pub trait Sensor {
    /// Current temperature in millidegrees Celsius.
    fn read(&mut self) -> Result<u32>;
}

/// Whole degrees from millidegrees, truncating.
pub fn to_celsius(millidegrees: u32) -> u32 {
    millidegrees / 1000
}

// ---------------------------------------------------------------------------
// sysfs thermal zone
// ---------------------------------------------------------------------------

/// Reads a sysfs `temp` attribute, e.g. `45123\n`.
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    /// Open `path`, checking it can be read once so a wrong path fails at
    /// startup rather than on every cycle.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut zone = Self {
            path: path.as_ref().to_path_buf(),
        };
        let millidegrees = zone.read()?;
        tracing::info!(
            path = %zone.path.display(),
            celsius = to_celsius(millidegrees),
            "thermal zone opened"
        );
        Ok(zone)
    }
}

impl Sensor for ThermalZone {
    fn read(&mut self) -> Result<u32> {
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        parse_millidegrees(&contents)
            .with_context(|| format!("unexpected contents in {}", self.path.display()))
    }
}

/// Parse a sysfs temperature attribute. The kernel value is signed; readings
/// below zero clamp to 0.
fn parse_millidegrees(contents: &str) -> Result<u32> {
    let value = contents.trim();
    anyhow::ensure!(!value.is_empty(), "empty temperature reading");
    let millidegrees: i32 = value
        .parse()
        .with_context(|| format!("invalid temperature reading {value:?}"))?;
    Ok(u32::try_from(millidegrees).unwrap_or(0))
}

// ---------------------------------------------------------------------------
// Simulated thermal zone
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method.
#[cfg(feature = "sim")]
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// CPU-like temperature for development hosts: a mean-reverting random walk
/// around a slowly oscillating load, plus per-reading noise.
#[cfg(feature = "sim")]
pub struct SimulatedZone {
    /// Current "true" temperature in °C.
    temp: f64,
    ambient: f64,
    /// Peak load contribution above ambient.
    load_amplitude: f64,
    /// Samples per full load cycle.
    load_period: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    mean_reversion: f64,
    tick: u64,
}

#[cfg(feature = "sim")]
impl SimulatedZone {
    pub fn new(ambient: f64) -> Self {
        tracing::info!(ambient, "simulated thermal zone");
        Self {
            temp: ambient,
            ambient,
            load_amplitude: 20.0,
            load_period: 120.0,
            walk_sigma: 0.4,
            noise_sigma: 0.3,
            mean_reversion: 0.1,
            tick: 0,
        }
    }

    fn target(&self) -> f64 {
        let phase = (self.tick as f64 / self.load_period) * std::f64::consts::TAU;
        self.ambient + self.load_amplitude * (0.5 - 0.5 * phase.cos())
    }
}

#[cfg(feature = "sim")]
impl Sensor for SimulatedZone {
    fn read(&mut self) -> Result<u32> {
        self.tick += 1;
        let target = self.target();
        self.temp += (target - self.temp) * self.mean_reversion + self.walk_sigma * approx_std_normal();
        let reading = self.temp + self.noise_sigma * approx_std_normal();
        Ok((reading.max(0.0) * 1000.0) as u32)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
