//! Agent configuration.
//!
//! Built once at startup: defaults, then an optional JSON file, then command
//! line flags, then [`AgentConfig::validate`]. Every field in the file is
//! optional and unknown keys are rejected.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::capture::libcamera;
use crate::capture::Rotation;
use crate::error::ConfigError;
use crate::settings::{SettingName, SettingsSnapshot};

/// Longest camera name that fits in a DNS-SD style label
pub const MAX_NAME_LEN: usize = 63;

/// Where frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    /// Synthetic moving gradient
    #[default]
    Test,
    /// `libcamera-still` on a Raspberry Pi
    Libcamera,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name advertised to peers
    pub camera_name: String,
    /// Default peer port for the frame channel
    pub frame_port: u16,
    /// Control (WebSocket) endpoint port
    pub control_port: u16,
    /// UDP port beacons are sent to
    pub beacon_port: u16,
    /// Beacon destination, broadcast by default
    pub beacon_addr: Ipv4Addr,
    /// Whether the camera has pan/tilt servos
    pub pan_tilt_enabled: bool,
    /// How long one advertise attempt waits for a peer
    pub advertise_timeout_secs: u64,
    /// Upper bound on a single frame write
    pub write_timeout_secs: u64,
    pub source: CaptureSource,
    /// Program run for `source = libcamera`
    pub libcamera_program: String,
    /// Clockwise rotation applied to every frame (0, 90, 180, 270)
    pub rotation: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Resolution selected before any peer changes it
    pub initial_resolution: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            camera_name: "picam".to_string(),
            frame_port: 7896,
            control_port: 7895,
            beacon_port: 9999,
            beacon_addr: Ipv4Addr::BROADCAST,
            pan_tilt_enabled: true,
            advertise_timeout_secs: 3,
            write_timeout_secs: 5,
            source: CaptureSource::Test,
            libcamera_program: libcamera::DEFAULT_PROGRAM.to_string(),
            // Camera is mounted upside down on the pan/tilt bracket
            rotation: 180,
            jpeg_quality: 85,
            initial_resolution: "720x480".to_string(),
        }
    }
}

/// Partial configuration from a file or the command line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub camera_name: Option<String>,
    pub frame_port: Option<u16>,
    pub control_port: Option<u16>,
    pub beacon_port: Option<u16>,
    pub beacon_addr: Option<Ipv4Addr>,
    pub pan_tilt_enabled: Option<bool>,
    pub advertise_timeout_secs: Option<u64>,
    pub write_timeout_secs: Option<u64>,
    pub source: Option<CaptureSource>,
    pub libcamera_program: Option<String>,
    pub rotation: Option<u32>,
    pub jpeg_quality: Option<u8>,
    pub initial_resolution: Option<String>,
}

impl ConfigOverrides {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl AgentConfig {
    /// Defaults, then `file` if given, then `cli`, validated.
    pub fn load(file: Option<&Path>, cli: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = file {
            config.merge(ConfigOverrides::from_file(path)?);
        }
        config.merge(cli);
        config.validate()?;
        Ok(config)
    }

    /// Overwrite every field the overrides set.
    pub fn merge(&mut self, o: ConfigOverrides) {
        if let Some(v) = o.camera_name {
            self.camera_name = v;
        }
        if let Some(v) = o.frame_port {
            self.frame_port = v;
        }
        if let Some(v) = o.control_port {
            self.control_port = v;
        }
        if let Some(v) = o.beacon_port {
            self.beacon_port = v;
        }
        if let Some(v) = o.beacon_addr {
            self.beacon_addr = v;
        }
        if let Some(v) = o.pan_tilt_enabled {
            self.pan_tilt_enabled = v;
        }
        if let Some(v) = o.advertise_timeout_secs {
            self.advertise_timeout_secs = v;
        }
        if let Some(v) = o.write_timeout_secs {
            self.write_timeout_secs = v;
        }
        if let Some(v) = o.source {
            self.source = v;
        }
        if let Some(v) = o.libcamera_program {
            self.libcamera_program = v;
        }
        if let Some(v) = o.rotation {
            self.rotation = v;
        }
        if let Some(v) = o.jpeg_quality {
            self.jpeg_quality = v;
        }
        if let Some(v) = o.initial_resolution {
            self.initial_resolution = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.camera_name.trim().is_empty() {
            return invalid("camera_name must not be empty".into());
        }
        if self.camera_name.len() > MAX_NAME_LEN {
            return invalid(format!(
                "camera_name is {} bytes, at most {} allowed",
                self.camera_name.len(),
                MAX_NAME_LEN
            ));
        }
        for (field, port) in [
            ("frame_port", self.frame_port),
            ("control_port", self.control_port),
            ("beacon_port", self.beacon_port),
        ] {
            if port == 0 {
                return invalid(format!("{} must not be 0", field));
            }
        }
        if self.control_port == self.frame_port {
            return invalid(format!(
                "control_port and frame_port are both {}",
                self.frame_port
            ));
        }
        if self.advertise_timeout_secs == 0 {
            return invalid("advertise_timeout_secs must be at least 1".into());
        }
        if self.write_timeout_secs == 0 {
            return invalid("write_timeout_secs must be at least 1".into());
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return invalid(format!("jpeg_quality {} outside 1..=100", self.jpeg_quality));
        }
        if Rotation::from_degrees(self.rotation).is_none() {
            return invalid(format!(
                "rotation {} is not one of 0, 90, 180, 270",
                self.rotation
            ));
        }
        if self.source == CaptureSource::Libcamera && self.libcamera_program.trim().is_empty() {
            return invalid("libcamera_program must not be empty".into());
        }
        SettingsSnapshot::defaults(self.pan_tilt_enabled)
            .set_raw(SettingName::Resolution, &self.initial_resolution)
            .map_err(|e| ConfigError::Invalid(format!("initial_resolution: {}", e)))?;
        Ok(())
    }

    pub fn advertise_timeout(&self) -> Duration {
        Duration::from_secs(self.advertise_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn beacon_target(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.beacon_addr), self.beacon_port)
    }

    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.control_port)
    }

    pub fn rotation(&self) -> Rotation {
        Rotation::from_degrees(self.rotation).unwrap_or_default()
    }

    /// Settings the first session starts from.
    pub fn initial_snapshot(&self) -> SettingsSnapshot {
        let mut snapshot = SettingsSnapshot::defaults(self.pan_tilt_enabled);
        // Checked by validate(); a bad value leaves the catalog default
        let _ = snapshot.set_raw(SettingName::Resolution, &self.initial_resolution);
        snapshot
    }
}
