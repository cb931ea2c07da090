//! Runtime status reported over STAT, and the sensor-failure fallback.

use serde::Serialize;

use crate::config::Config;
use crate::control::{Phase, Thresholds};

/// Consecutive failed sensor samples after which an automatic phase gives up
/// and falls back to `Fail`.
pub const SENSOR_FAILURE_LIMIT: u32 = 3;

// ---------------------------------------------------------------------------
// Status parameters (STAT ids)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum StatParam {
    Temperature = 0,
    LowTemp = 1,
    TriggerTemp = 2,
    Phase = 3,
}

impl StatParam {
    pub const ALL: [StatParam; 4] = [
        Self::Temperature,
        Self::LowTemp,
        Self::TriggerTemp,
        Self::Phase,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::LowTemp => "low_temp",
            Self::TriggerTemp => "trigger_temp",
            Self::Phase => "phase",
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime status
// ---------------------------------------------------------------------------

/// What the controller currently believes. Thresholds start out mirrored from
/// the configuration but can be overwritten independently by TRIG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Most recent sample in whole °C.
    pub last_temperature: u32,
    pub low_temp: u32,
    pub trigger_temp: u32,
    pub phase: Phase,
    /// Consecutive failed samples; reset by any successful one.
    pub sensor_failures: u32,
}

impl Status {
    pub fn new(config: &Config) -> Self {
        Self {
            last_temperature: 0,
            low_temp: config.low_temp,
            trigger_temp: config.trigger_temp,
            phase: Phase::Idle,
            sensor_failures: 0,
        }
    }

    /// Copy thresholds from a freshly applied configuration.
    pub fn mirror(&mut self, config: &Config) {
        self.low_temp = config.low_temp;
        self.trigger_temp = config.trigger_temp;
    }

    pub fn thresholds(&self, config: &Config) -> Thresholds {
        Thresholds {
            low_temp: self.low_temp,
            trigger_temp: self.trigger_temp,
            hysteresis_drop: config.hysteresis_drop,
        }
    }

    /// Value reported for a STAT id; unknown ids read as 0.
    pub fn get(&self, id: u32) -> u32 {
        match StatParam::from_id(id) {
            Some(StatParam::Temperature) => self.last_temperature,
            Some(StatParam::LowTemp) => self.low_temp,
            Some(StatParam::TriggerTemp) => self.trigger_temp,
            Some(StatParam::Phase) => self.phase.ordinal(),
            None => 0,
        }
    }

    /// Record a successful sample. Returns true when this recovered the
    /// controller from `Fail`.
    pub fn record_sample(&mut self, celsius: u32) -> bool {
        self.last_temperature = celsius;
        self.sensor_failures = 0;

        if self.phase == Phase::Fail {
            self.phase = Phase::Run;
            true
        } else {
            false
        }
    }

    /// Record a failed sample. Returns true when this pushed the controller
    /// into `Fail`.
    pub fn record_sensor_failure(&mut self) -> bool {
        self.sensor_failures = self.sensor_failures.saturating_add(1);

        if self.sensor_failures >= SENSOR_FAILURE_LIMIT && self.phase.is_automatic() {
            self.phase = Phase::Fail;
            true
        } else {
            false
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
