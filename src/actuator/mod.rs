//! Pan/tilt servos.
//!
//! The session only sees the [`PanTilt`] trait. On a Raspberry Pi with the
//! `rpi` feature the PCA9685 driver runs over `/dev/i2c-*`; everywhere else
//! [`SimulatedPanTilt`] stands in and just remembers the angles.

pub mod pca9685;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::ActuatorError;

/// Which servo an angle is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServoChannel {
    Pan,
    Tilt,
}

impl ServoChannel {
    /// PWM output the servo is wired to on the pan/tilt HAT
    pub fn pwm_channel(self) -> u8 {
        match self {
            Self::Pan => 1,
            Self::Tilt => 0,
        }
    }
}

impl fmt::Display for ServoChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pan => write!(f, "pan"),
            Self::Tilt => write!(f, "tilt"),
        }
    }
}

pub trait PanTilt: Send {
    /// Drive one servo to `degrees` (0..=180).
    fn set_angle(&mut self, channel: ServoChannel, degrees: i32) -> Result<(), ActuatorError>;

    /// Return the hardware to an idle, unpowered state.
    fn release(&mut self);
}

/// Observable state of a [`SimulatedPanTilt`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedState {
    pub pan: Option<i32>,
    pub tilt: Option<i32>,
    pub moves: u32,
    pub releases: u32,
}

/// In-memory pan/tilt. Clones share state, so a test can keep a handle
/// while the session owns the actuator.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPanTilt {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedPanTilt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SimulatedState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl PanTilt for SimulatedPanTilt {
    fn set_angle(&mut self, channel: ServoChannel, degrees: i32) -> Result<(), ActuatorError> {
        if !(0..=180).contains(&degrees) {
            return Err(ActuatorError::AngleOutOfRange { channel, degrees });
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| ActuatorError::Bus("simulated servo state poisoned".into()))?;
        match channel {
            ServoChannel::Pan => state.pan = Some(degrees),
            ServoChannel::Tilt => state.tilt = Some(degrees),
        }
        state.moves += 1;
        debug!("Simulated {} servo → {}°", channel, degrees);
        Ok(())
    }

    fn release(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.releases += 1;
        }
        info!("Simulated servos released");
    }
}

/// Open the real servo controller on `/dev/i2c-1`.
#[cfg(feature = "rpi")]
pub fn open_hardware() -> anyhow::Result<Box<dyn PanTilt>> {
    use anyhow::Context;

    let bus = linux_embedded_hal::I2cdev::new("/dev/i2c-1").context("Failed to open /dev/i2c-1")?;
    let driver = pca9685::Pca9685::new(bus, pca9685::DEFAULT_ADDRESS)
        .map_err(|e| anyhow::anyhow!("PCA9685 init failed: {}", e))?;
    Ok(Box::new(driver))
}
