//! PCA9685 16-channel PWM controller driving hobby servos at 50 Hz.
//!
//! Generic over any `embedded_hal::i2c::I2c` bus.

use embedded_hal::i2c::{Error as _, I2c};
use std::time::Duration;
use tracing::{info, warn};

use super::{PanTilt, ServoChannel};
use crate::error::ActuatorError;

pub const DEFAULT_ADDRESS: u8 = 0x40;

const MODE1: u8 = 0x00;
const MODE2: u8 = 0x01;
const PRESCALE: u8 = 0xFE;
const LED0_ON_L: u8 = 0x06;

const OSCILLATOR_HZ: f32 = 25_000_000.0;
const SERVO_FREQ_HZ: f32 = 50.0;
/// One PWM period at 50 Hz
const PERIOD_US: u32 = 20_000;
/// Pulse width at 0° and the span up to 180°
const PULSE_MIN_US: u32 = 501;
const PULSE_SPAN_US: u32 = 2000;

pub struct Pca9685<I2C> {
    bus: I2C,
    address: u8,
}

impl<I2C: I2c> Pca9685<I2C> {
    /// Wake the controller and set the servo PWM frequency.
    pub fn new(bus: I2C, address: u8) -> Result<Self, ActuatorError> {
        let mut driver = Self { bus, address };
        driver.write(MODE1, 0x00)?;
        driver.set_frequency(SERVO_FREQ_HZ)?;
        info!("PCA9685 ready at 0x{:02x}", address);
        Ok(driver)
    }

    pub fn release_bus(self) -> I2C {
        self.bus
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), ActuatorError> {
        self.bus
            .write(self.address, &[reg, value])
            .map_err(|e| ActuatorError::Bus(format!("write 0x{:02x}: {:?}", reg, e.kind())))
    }

    fn read(&mut self, reg: u8) -> Result<u8, ActuatorError> {
        let mut buf = [0u8; 1];
        self.bus
            .write_read(self.address, &[reg], &mut buf)
            .map_err(|e| ActuatorError::Bus(format!("read 0x{:02x}: {:?}", reg, e.kind())))?;
        Ok(buf[0])
    }

    fn set_frequency(&mut self, hz: f32) -> Result<(), ActuatorError> {
        let prescale = (OSCILLATOR_HZ / 4096.0 / hz - 1.0 + 0.5).floor() as u8;
        let old_mode = self.read(MODE1)?;
        // Prescale can only be written while asleep
        self.write(MODE1, (old_mode & 0x7F) | 0x10)?;
        self.write(PRESCALE, prescale)?;
        self.write(MODE1, old_mode)?;
        std::thread::sleep(Duration::from_millis(5));
        self.write(MODE1, old_mode | 0x80)?;
        self.write(MODE2, 0x04)
    }

    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<(), ActuatorError> {
        let base = LED0_ON_L + 4 * channel;
        self.write(base, (on & 0xFF) as u8)?;
        self.write(base + 1, (on >> 8) as u8)?;
        self.write(base + 2, (off & 0xFF) as u8)?;
        self.write(base + 3, (off >> 8) as u8)
    }
}

/// PWM off-tick for a servo angle
pub fn angle_to_ticks(degrees: u32) -> u16 {
    let pulse_us = PULSE_MIN_US + degrees * PULSE_SPAN_US / 180;
    (pulse_us * 4096 / PERIOD_US) as u16
}

impl<I2C: I2c + Send> PanTilt for Pca9685<I2C> {
    fn set_angle(&mut self, channel: ServoChannel, degrees: i32) -> Result<(), ActuatorError> {
        if !(0..=180).contains(&degrees) {
            return Err(ActuatorError::AngleOutOfRange { channel, degrees });
        }
        let ticks = angle_to_ticks(degrees as u32);
        self.set_pwm(channel.pwm_channel(), 0, ticks)
    }

    fn release(&mut self) {
        if let Err(e) = self.write(MODE2, 0x00) {
            warn!("Failed to release PCA9685: {}", e);
        }
    }
}
