//! One peer connection, from advertising to teardown.
//!
//! ```text
//! Idle ──establish──▶ Advertising ──contact──▶ Connected ──▶ Disconnected
//!                      │    ▲
//!                      └────┘ timeout (caller retries)
//! ```
//!
//! While connected, every [`Session::step`] sends exactly one frame and then
//! handles at most one pending settings message. Nothing runs concurrently
//! inside a session. `Disconnected` is terminal; the orchestrator starts a
//! fresh session for the next peer.

pub mod hardware;

use chrono::{DateTime, Local};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::discovery::{Advertiser, ControlChannel};
use crate::error::SessionError;
use crate::protocol::ControlMessage;
use crate::settings::SettingsSnapshot;
use crate::sync::{Serviced, SettingsSynchronizer};
use crate::transport::FrameChannel;

pub use hardware::Hardware;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Advertising,
    Connected,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Advertising => write!(f, "advertising"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Frame channel failed
    Transport,
    /// Camera failed to produce a frame
    Capture,
    /// Peer sent `Disconnect`
    PeerRequest,
    /// Local shutdown (Ctrl-C)
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "frame channel failed"),
            Self::Capture => write!(f, "capture failed"),
            Self::PeerRequest => write!(f, "peer disconnected"),
            Self::Shutdown => write!(f, "shutting down"),
        }
    }
}

/// Where frames go, for the frame-channel connect
#[derive(Debug, Clone, Copy)]
pub struct LinkParams {
    /// Used when the peer does not ask for a specific port
    pub frame_port: u16,
    pub write_timeout: Duration,
}

/// Everything that exists only while connected
struct Link {
    control: ControlChannel,
    frames: FrameChannel,
    connected_at: DateTime<Local>,
}

pub struct Session {
    state: SessionState,
    sync: SettingsSynchronizer,
    hardware: Hardware,
    link: Option<Link>,
    reason: Option<DisconnectReason>,
}

impl Session {
    pub fn new(snapshot: SettingsSnapshot, hardware: Hardware) -> Self {
        Self {
            state: SessionState::Idle,
            sync: SettingsSynchronizer::new(snapshot),
            hardware,
            link: None,
            reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Set once the session is disconnected
    pub fn reason(&self) -> Option<DisconnectReason> {
        self.reason
    }

    pub fn snapshot(&self) -> &SettingsSnapshot {
        self.sync.snapshot()
    }

    pub fn connected_at(&self) -> Option<DateTime<Local>> {
        self.link.as_ref().map(|l| l.connected_at)
    }

    pub fn frames_sent(&self) -> u64 {
        self.link.as_ref().map(|l| l.frames.frames_sent()).unwrap_or(0)
    }

    /// Hand the settings and hardware back for the next session.
    pub fn into_parts(self) -> (SettingsSnapshot, Hardware) {
        (self.sync.into_snapshot(), self.hardware)
    }

    /// Advertise once for up to `wait`, then bring the link up.
    ///
    /// On [`DiscoveryError::Timeout`](crate::error::DiscoveryError::Timeout)
    /// the session stays `Advertising` and may be established again.
    pub async fn establish(
        &mut self,
        advertiser: &mut Advertiser,
        params: LinkParams,
        wait: Duration,
    ) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Advertising => {}
            SessionState::Connected | SessionState::Disconnected => {
                return Err(SessionError::AlreadyEstablished)
            }
        }
        self.state = SessionState::Advertising;
        info!("📡 Advertising {:?} for {:?}", advertiser.name(), wait);

        let handshake = advertiser.advertise(self.sync.snapshot(), wait).await?;

        if let Err(e) = self.hardware.apply(self.sync.snapshot()).await {
            warn!("Initial settings not fully applied: {}", e);
        }

        let frame_addr = SocketAddr::new(
            handshake.peer_ip,
            handshake.frame_port.unwrap_or(params.frame_port),
        );
        let frames = match FrameChannel::connect(frame_addr, params.write_timeout).await {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Frame channel to {} failed: {}", frame_addr, e);
                self.teardown(DisconnectReason::Transport).await;
                return Err(e.into());
            }
        };

        self.hardware.capture.resume();
        self.link = Some(Link {
            control: handshake.control,
            frames,
            connected_at: Local::now(),
        });
        self.state = SessionState::Connected;
        info!("🔗 Streaming to {}", frame_addr);
        Ok(())
    }

    /// One cycle: send one frame, then handle at most one settings message.
    /// Returns the state after the cycle.
    pub async fn step(&mut self) -> Result<SessionState, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }

        let frame = match self.hardware.capture.next_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Capture failed: {}", e);
                self.teardown(DisconnectReason::Capture).await;
                return Err(e.into());
            }
        };

        let link = self.link.as_mut().ok_or(SessionError::NotConnected)?;
        if let Err(e) = link.frames.send(&frame.jpeg).await {
            warn!(
                "Frame {} not delivered to {}: {}",
                frame.seq,
                link.frames.peer(),
                e
            );
            self.teardown(DisconnectReason::Transport).await;
            return Err(e.into());
        }

        match self.sync.service(&mut link.control, &mut self.hardware).await {
            Serviced::Idle => {}
            Serviced::Applied(outcome) => {
                debug!("Update handled (accepted: {})", outcome.accepted)
            }
            Serviced::DisconnectRequested => {
                self.teardown(DisconnectReason::PeerRequest).await;
            }
        }
        Ok(self.state)
    }

    /// Step until the session ends or `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<DisconnectReason, SessionError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.disconnect().await;
                    return Ok(DisconnectReason::Shutdown);
                }
                result = self.step() => {
                    if result? == SessionState::Disconnected {
                        return Ok(self.reason.unwrap_or(DisconnectReason::PeerRequest));
                    }
                }
            }
        }
    }

    /// End the session from our side. No-op once disconnected.
    pub async fn disconnect(&mut self) {
        if self.state != SessionState::Disconnected {
            self.teardown(DisconnectReason::Shutdown).await;
        }
    }

    async fn teardown(&mut self, reason: DisconnectReason) {
        self.hardware.capture.pause();
        if self.sync.pan_tilt_enabled() {
            self.hardware.release();
        }

        if let Some(link) = self.link.take() {
            if reason == DisconnectReason::Shutdown {
                if let Err(e) = link.control.reply(&ControlMessage::Disconnect) {
                    debug!("Could not tell {} we are leaving: {}", link.control.peer(), e);
                }
            }
            let sent = link.frames.frames_sent();
            let uptime = Local::now().signed_duration_since(link.connected_at);
            link.frames.close().await;
            info!(
                "👋 Session with {} ended ({}): {} frames in {}s",
                link.control.peer(),
                reason,
                sent,
                uptime.num_seconds()
            );
        }

        self.state = SessionState::Disconnected;
        self.reason = Some(reason);
    }
}
