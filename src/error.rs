use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::actuator::ServoChannel;
use crate::settings::SettingName;

/// Discovery / handshake failures
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No peer made contact before the deadline. Recoverable: advertise again.
    #[error("no peer contacted us within {0:?}")]
    Timeout(Duration),
    #[error("failed to bind control endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("discovery I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Frame channel failures. Fatal to the session that hit them.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect frame channel to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("frame write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("frame write timed out after {0:?}")]
    Timeout(Duration),
    #[error("frame read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("stream ended inside a frame ({got} of {expected} bytes)")]
    Truncated { expected: usize, got: usize },
    #[error("frame channel is closed")]
    Closed,
}

/// Camera collaborator failures
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("capture failed: {0}")]
    Failed(String),
    #[error("image encoding failed: {0}")]
    Encode(String),
    #[error("unsupported setting: {0}")]
    Unsupported(String),
    #[error("capture stage stopped")]
    Stopped,
}

/// Pan/tilt collaborator failures
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("servo bus error: {0}")]
    Bus(String),
    #[error("{channel} angle {degrees} outside 0..=180")]
    AngleOutOfRange { channel: ServoChannel, degrees: i32 },
}

/// A settings update that cannot be applied. Reported to the peer as a
/// rejection; the session keeps streaming.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("pan/tilt is disabled on this camera")]
    PanTiltDisabled,
    #[error("pan/tilt capability flag cannot be changed remotely")]
    CapabilityChanged,
    #[error("setting {0} is missing")]
    Missing(SettingName),
    #[error("setting {0} has the wrong shape")]
    WrongShape(SettingName),
    #[error("bounds or choices of {0} are read-only")]
    BoundsChanged(SettingName),
    #[error("{name} value {value} outside {min}..={max}")]
    OutOfBounds {
        name: SettingName,
        value: i32,
        min: i32,
        max: i32,
    },
    #[error("{name} value {value} is not one of the available choices")]
    NotAvailable { name: SettingName, value: String },
    #[error("{name} cannot take value {value:?}")]
    Unparseable { name: SettingName, value: String },
    #[error("camera rejected settings: {0}")]
    Capture(#[from] CaptureError),
    #[error("servo rejected settings: {0}")]
    Actuator(#[from] ActuatorError),
}

/// Configuration that cannot be loaded or makes no sense
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What the orchestrator sees from a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("frame capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("session is not connected")]
    NotConnected,
    #[error("session has already been established")]
    AlreadyEstablished,
}

impl SessionError {
    /// True for the one outcome the orchestrator retries in place.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Discovery(DiscoveryError::Timeout(_)))
    }
}
