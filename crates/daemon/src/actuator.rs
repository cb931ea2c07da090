//! Fan output via GPIO. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation records levels and logs changes.

use anyhow::Result;
use std::collections::HashMap;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// Digital output capability the controller drives. `level` is the physical
/// pin level; output inversion is applied by the caller.
pub trait Actuator {
    fn set(&mut self, pin: u32, level: bool) -> Result<()>;

    /// Stop driving `pin`. The pin keeps its last level.
    fn release(&mut self, pin: u32);
}

// ---------------------------------------------------------------------------
// Real GPIO output (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct GpioActuator {
    gpio: Gpio,
    pins: HashMap<u32, OutputPin>, // claimed lazily on first write
}

#[cfg(feature = "gpio")]
impl GpioActuator {
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new().context("failed to open GPIO peripheral")?;
        Ok(Self {
            gpio,
            pins: HashMap::new(),
        })
    }

    fn claim(&mut self, pin: u32) -> Result<&mut OutputPin> {
        if !self.pins.contains_key(&pin) {
            let bcm = u8::try_from(pin).with_context(|| format!("gpio {pin} out of range"))?;
            let mut output = self
                .gpio
                .get(bcm)
                .with_context(|| format!("failed to claim gpio {pin}"))?
                .into_output_low();
            // The exit level must survive process teardown.
            output.set_reset_on_drop(false);
            self.pins.insert(pin, output);
            tracing::info!(pin, "gpio output claimed");
        }
        self.pins
            .get_mut(&pin)
            .with_context(|| format!("gpio {pin} not claimed"))
    }
}

#[cfg(feature = "gpio")]
impl Actuator for GpioActuator {
    fn set(&mut self, pin: u32, level: bool) -> Result<()> {
        let output = self.claim(pin)?;
        if level {
            output.set_high();
        } else {
            output.set_low();
        }
        tracing::debug!(pin, level, "gpio write");
        Ok(())
    }

    fn release(&mut self, pin: u32) {
        if self.pins.remove(&pin).is_some() {
            tracing::info!(pin, "gpio output released");
        }
    }
}

// ---------------------------------------------------------------------------
// Mock output (development — no hardware, logs state changes)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct GpioActuator {
    pub(crate) pins: HashMap<u32, bool>, // pin -> last physical level
}

#[cfg(not(feature = "gpio"))]
impl GpioActuator {
    pub fn new() -> Result<Self> {
        tracing::info!("[mock-gpio] output initialised (no hardware)");
        Ok(Self {
            pins: HashMap::new(),
        })
    }
}

#[cfg(not(feature = "gpio"))]
impl Actuator for GpioActuator {
    fn set(&mut self, pin: u32, level: bool) -> Result<()> {
        let previous = self.pins.insert(pin, level);
        if previous != Some(level) {
            tracing::info!(pin, "[mock-gpio] set {}", if level { "HIGH" } else { "LOW" });
        }
        Ok(())
    }

    fn release(&mut self, pin: u32) {
        if self.pins.remove(&pin).is_some() {
            tracing::info!(pin, "[mock-gpio] released");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    #[test]
    fn new_has_no_claimed_pins() {
        let out = GpioActuator::new().unwrap();
        assert!(out.pins.is_empty());
    }

    #[test]
    fn set_claims_pin() {
        let mut out = GpioActuator::new().unwrap();
        out.set(17, true).unwrap();
        assert_eq!(out.pins.get(&17), Some(&true));
    }

    #[test]
    fn set_overwrites_level() {
        let mut out = GpioActuator::new().unwrap();
        out.set(17, true).unwrap();
        out.set(17, false).unwrap();
        assert_eq!(out.pins.get(&17), Some(&false));
        assert_eq!(out.pins.len(), 1);
    }

    #[test]
    fn release_forgets_pin() {
        let mut out = GpioActuator::new().unwrap();
        out.set(17, true).unwrap();
        out.set(27, true).unwrap();
        out.release(17);
        assert!(!out.pins.contains_key(&17));
        assert!(out.pins.contains_key(&27));
    }

    #[test]
    fn release_unknown_pin_does_not_panic() {
        let mut out = GpioActuator::new().unwrap();
        out.release(5);
        assert!(out.pins.is_empty());
    }
}
