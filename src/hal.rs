//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer for the node status indicator
//! ==============================================================================
//!
//! purpose:
//!     the status LED shows whether the last send reached the hub.
//!     on:  last reading accepted
//!     off: send failed, loop error, offline, or shutting down
//!
//! design philosophy:
//!     - "Compile Anywhere": the node builds on any machine. without the
//!       `hardware` feature the indicator only logs.
//!     - On the Pi (feature="hardware") it drives a GPIO output through rppal.
//!
//! relationships:
//!     - used by: agent (set on/off per iteration, off on shutdown)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait StatusIndicator: Send + Sync {
    fn set(&self, on: bool) -> Result<()>;
    fn is_on(&self) -> bool;
}

// ==============================================================================================
// MOCK IMPLEMENTATION (no hardware access)
// ==============================================================================================
#[derive(Default)]
pub struct LogIndicator {
    state: AtomicBool,
}

impl LogIndicator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusIndicator for LogIndicator {
    fn set(&self, on: bool) -> Result<()> {
        let was = self.state.swap(on, Ordering::SeqCst);
        if was != on {
            tracing::debug!("[MOCK LED] Status {}", if on { "ON" } else { "OFF" });
        }
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct GpioIndicator {
    pin: std::sync::Mutex<rppal::gpio::OutputPin>,
    state: AtomicBool,
}

#[cfg(feature = "hardware")]
impl GpioIndicator {
    pub fn new(pin: u8) -> Result<Self> {
        use anyhow::Context;

        let mut output = rppal::gpio::Gpio::new()
            .context("failed to open gpio")?
            .get(pin)
            .with_context(|| format!("failed to claim gpio {}", pin))?
            .into_output();
        output.set_low();
        tracing::info!("Using REAL HARDWARE status LED on gpio {}", pin);
        Ok(Self { pin: std::sync::Mutex::new(output), state: AtomicBool::new(false) })
    }
}

#[cfg(feature = "hardware")]
impl StatusIndicator for GpioIndicator {
    fn set(&self, on: bool) -> Result<()> {
        let mut pin = self
            .pin
            .lock()
            .map_err(|_| anyhow::anyhow!("status led lock poisoned"))?;
        if on {
            pin.set_high();
        } else {
            pin.set_low();
        }
        self.state.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }
}

/// pick the indicator for this build
pub fn status_indicator(pin: Option<u8>) -> Result<Box<dyn StatusIndicator>> {
    #[cfg(feature = "hardware")]
    if let Some(pin) = pin {
        return Ok(Box::new(GpioIndicator::new(pin)?));
    }

    match pin {
        Some(pin) => tracing::info!("Using MOCK status LED (gpio {} ignored without hardware)", pin),
        None => tracing::info!("Using MOCK status LED"),
    }
    Ok(Box::new(LogIndicator::new()))
}
