use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::settings::SettingsSnapshot;

/// Protocol revision carried in every beacon
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest control message we will decode (1 MB)
pub const MAX_CONTROL_SIZE: u64 = 1024 * 1024;

/// Message types sent over the control (WebSocket) channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// First message from a peer. `address` overrides the socket's remote IP
    /// as the frame destination; `frame_port` overrides the configured port.
    Contact {
        address: Option<IpAddr>,
        frame_port: Option<u16>,
    },
    /// Reply to `Contact`: the camera's current settings
    Snapshot(SettingsSnapshot),
    /// Peer wants these settings applied
    Update(SettingsSnapshot),
    /// Outcome of an `Update`, carrying the settings now in effect
    UpdateReply {
        accepted: bool,
        settings: SettingsSnapshot,
        reason: Option<String>,
    },
    /// Peer is done; end the session
    Disconnect,
    /// Error
    Error { message: String },
}

/// Name advertisement broadcast over UDP while waiting for a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub version: u8,
    pub name: String,
    pub control_port: u16,
}

impl Beacon {
    pub fn new(name: String, control_port: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            name,
            control_port,
        }
    }
}

fn codec() -> impl bincode::Options {
    use bincode::Options;
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_CONTROL_SIZE)
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    use bincode::Options;
    Ok(codec().serialize(msg)?)
}

pub fn decode<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T> {
    use bincode::Options;
    Ok(codec().deserialize(data)?)
}
