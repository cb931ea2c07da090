//! Hysteresis phase model for the cooling output.
//!
//! ## Phase transitions (automatic phases)
//!
//! ```text
//!            [t >= low]              [t >= trig]
//! LowTemp ──────────────▶ Idle ──────────────────▶ HighTemp
//!    ▲                                              │    ▲
//!    │                                   [t < trig] │    │ [t >= trig]
//!    │                                              ▼    │
//!    └───────────────[t <= trig - hyst]────────────── Run
//! ```
//!
//! `LowTemp -> Idle` and `HighTemp -> Run` cascade: the rule of the phase
//! entered is evaluated again within the same step. Override phases and
//! `Fail` never move on temperature alone.

use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Controller phase. The discriminants are the ordinals reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum Phase {
    LowTemp = 0,
    Idle = 1,
    Run = 2,
    HighTemp = 3,
    OverrideIdle = 4,
    OverrideRun = 5,
    Fail = 6,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Self::LowTemp,
        Self::Idle,
        Self::Run,
        Self::HighTemp,
        Self::OverrideIdle,
        Self::OverrideRun,
        Self::Fail,
    ];

    pub fn ordinal(self) -> u32 {
        self as u32
    }

    /// Map a wire ordinal back to a phase. Anything unrecognized is `Fail`,
    /// which keeps the output on.
    pub fn from_ordinal(ordinal: u32) -> Self {
        Self::ALL
            .into_iter()
            .find(|p| p.ordinal() == ordinal)
            .unwrap_or(Self::Fail)
    }

    /// Whether the output is driven active while in this phase.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::LowTemp | Self::Idle | Self::OverrideIdle)
    }

    /// Phases that follow the temperature.
    pub fn is_automatic(self) -> bool {
        matches!(self, Self::LowTemp | Self::Idle | Self::Run | Self::HighTemp)
    }

    pub fn is_override(self) -> bool {
        matches!(self, Self::OverrideIdle | Self::OverrideRun)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LowTemp => "LOW_TEMP",
            Self::Idle => "IDLE",
            Self::Run => "RUN",
            Self::HighTemp => "HIGH_TEMP",
            Self::OverrideIdle => "OVERRIDE_IDLE",
            Self::OverrideRun => "OVERRIDE_RUN",
            Self::Fail => "FAIL",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// Temperatures (whole °C) the transition function compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub low_temp: u32,
    pub trigger_temp: u32,
    pub hysteresis_drop: u32,
}

impl Thresholds {
    /// Temperature at or below which `Run` releases to `LowTemp`.
    pub fn release_temp(&self) -> u32 {
        self.trigger_temp.saturating_sub(self.hysteresis_drop)
    }
}

/// Result of one step: the phase to move to and the logical output level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub phase: Phase,
    pub active: bool,
}

/// Apply the phase rules once for `temperature`.
pub fn step(phase: Phase, temperature: u32, thresholds: &Thresholds) -> Transition {
    let next = match phase {
        Phase::LowTemp if temperature >= thresholds.low_temp => idle_rule(temperature, thresholds),
        Phase::LowTemp => Phase::LowTemp,
        Phase::Idle => idle_rule(temperature, thresholds),
        Phase::HighTemp if temperature < thresholds.trigger_temp => {
            run_rule(temperature, thresholds)
        }
        Phase::HighTemp => Phase::HighTemp,
        Phase::Run => run_rule(temperature, thresholds),
        Phase::OverrideIdle | Phase::OverrideRun | Phase::Fail => phase,
    };

    Transition {
        phase: next,
        active: next.is_active(),
    }
}

fn idle_rule(temperature: u32, thresholds: &Thresholds) -> Phase {
    if temperature >= thresholds.trigger_temp {
        Phase::HighTemp
    } else {
        Phase::Idle
    }
}

fn run_rule(temperature: u32, thresholds: &Thresholds) -> Phase {
    if temperature >= thresholds.trigger_temp {
        Phase::HighTemp
    } else if temperature <= thresholds.release_temp() {
        Phase::LowTemp
    } else {
        Phase::Run
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TH: Thresholds = Thresholds {
        low_temp: 29,
        trigger_temp: 33,
        hysteresis_drop: 2,
    };

    fn next(phase: Phase, t: u32) -> Phase {
        step(phase, t, &TH).phase
    }

    // -- Scenario ---------------------------------------------------------

    #[test]
    fn sample_sequence_follows_hysteresis() {
        let mut phase = Phase::Idle;
        let mut phases = Vec::new();
        let mut levels = Vec::new();

        for t in [30, 34, 34, 32, 30] {
            let tr = step(phase, t, &TH);
            phase = tr.phase;
            phases.push(tr.phase);
            levels.push(tr.active);
        }

        assert_eq!(
            phases,
            [
                Phase::Idle,
                Phase::HighTemp,
                Phase::HighTemp,
                Phase::Run,
                Phase::LowTemp
            ]
        );
        assert_eq!(levels, [false, true, true, true, false]);
    }

    // -- LowTemp ----------------------------------------------------------

    #[test]
    fn low_temp_stays_below_floor() {
        assert_eq!(next(Phase::LowTemp, 28), Phase::LowTemp);
    }

    #[test]
    fn low_temp_rises_to_idle() {
        assert_eq!(next(Phase::LowTemp, 29), Phase::Idle);
    }

    #[test]
    fn low_temp_cascades_through_idle() {
        let tr = step(Phase::LowTemp, 40, &TH);
        assert_eq!(tr.phase, Phase::HighTemp);
        assert!(tr.active);
    }

    // -- Idle -------------------------------------------------------------

    #[test]
    fn idle_below_trigger_stays_off() {
        let tr = step(Phase::Idle, 32, &TH);
        assert_eq!(tr, Transition { phase: Phase::Idle, active: false });
    }

    #[test]
    fn idle_never_drops_to_low_temp() {
        assert_eq!(next(Phase::Idle, 0), Phase::Idle);
    }

    #[test]
    fn idle_at_trigger_goes_high() {
        assert_eq!(next(Phase::Idle, 33), Phase::HighTemp);
    }

    // -- HighTemp ---------------------------------------------------------

    #[test]
    fn high_temp_holds_at_trigger() {
        assert_eq!(next(Phase::HighTemp, 33), Phase::HighTemp);
    }

    #[test]
    fn high_temp_drops_into_band() {
        let tr = step(Phase::HighTemp, 32, &TH);
        assert_eq!(tr, Transition { phase: Phase::Run, active: true });
    }

    #[test]
    fn high_temp_cascades_through_run() {
        let tr = step(Phase::HighTemp, 31, &TH);
        assert_eq!(tr, Transition { phase: Phase::LowTemp, active: false });
    }

    // -- Run --------------------------------------------------------------

    #[test]
    fn run_inside_band_stays_on() {
        assert_eq!(next(Phase::Run, 32), Phase::Run);
    }

    #[test]
    fn run_at_trigger_goes_high() {
        assert_eq!(next(Phase::Run, 33), Phase::HighTemp);
    }

    #[test]
    fn run_at_release_point_turns_off() {
        assert_eq!(next(Phase::Run, 31), Phase::LowTemp);
    }

    #[test]
    fn release_point_saturates() {
        let th = Thresholds {
            low_temp: 0,
            trigger_temp: 5,
            hysteresis_drop: 50,
        };
        assert_eq!(th.release_temp(), 0);
        assert_eq!(step(Phase::Run, 1, &th).phase, Phase::Run);
        assert_eq!(step(Phase::Run, 0, &th).phase, Phase::LowTemp);
    }

    // -- Overrides and Fail -----------------------------------------------

    #[test]
    fn overrides_ignore_temperature() {
        for t in [0, 31, 33, 200] {
            assert_eq!(
                step(Phase::OverrideRun, t, &TH),
                Transition { phase: Phase::OverrideRun, active: true }
            );
            assert_eq!(
                step(Phase::OverrideIdle, t, &TH),
                Transition { phase: Phase::OverrideIdle, active: false }
            );
        }
    }

    #[test]
    fn fail_forces_output_on() {
        assert_eq!(
            step(Phase::Fail, 0, &TH),
            Transition { phase: Phase::Fail, active: true }
        );
    }

    // -- Phase helpers ----------------------------------------------------

    #[test]
    fn ordinals_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::from_ordinal(phase.ordinal()), phase);
        }
        assert_eq!(Phase::HighTemp.ordinal(), 3);
    }

    #[test]
    fn unknown_ordinal_is_fail() {
        assert_eq!(Phase::from_ordinal(7), Phase::Fail);
        assert_eq!(Phase::from_ordinal(u32::MAX), Phase::Fail);
    }

    #[test]
    fn phase_display_and_serialize() {
        assert_eq!(Phase::OverrideRun.to_string(), "OVERRIDE_RUN");
        assert_eq!(
            serde_json::to_value(Phase::HighTemp).unwrap(),
            serde_json::json!("high_temp")
        );
    }
}
