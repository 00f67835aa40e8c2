//! Discovery and handshake.
//!
//! [`Advertiser::advertise`] is a bounded wait: it registers the camera name
//! on the beacon, accepts the first peer that sends a `Contact` on the control
//! endpoint, answers it with the current settings, and hands back the peer's
//! address plus the open [`ControlChannel`]. If nobody shows up before the
//! deadline it returns [`DiscoveryError::Timeout`] and the caller decides
//! whether to try again. Connections are handshaken side by side, so one
//! that never speaks cannot hold up a real peer.

pub mod beacon;
pub mod control;

use futures_util::stream::FuturesUnordered;
use futures_util::{SinkExt, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;
use crate::protocol::{self, Beacon, ControlMessage};
use crate::settings::SettingsSnapshot;

pub use beacon::{listen_for, BeaconTask};
pub use control::{ControlChannel, Inbound};

/// How long a connection gets to upgrade and send `Contact`
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of a successful contact
pub struct Handshake {
    /// Where the frame channel should connect
    pub peer_ip: IpAddr,
    /// Frame port requested by the peer, if it overrode the default
    pub frame_port: Option<u16>,
    pub control: ControlChannel,
}

pub struct Advertiser {
    name: String,
    listener: TcpListener,
    beacon_target: SocketAddr,
}

impl Advertiser {
    /// Bind the control endpoint. The name is only advertised while
    /// [`advertise`](Self::advertise) is running.
    pub async fn bind(
        name: String,
        control_addr: SocketAddr,
        beacon_target: SocketAddr,
    ) -> Result<Self, DiscoveryError> {
        let listener = TcpListener::bind(control_addr)
            .await
            .map_err(|source| DiscoveryError::Bind {
                addr: control_addr,
                source,
            })?;
        debug!("Control endpoint listening on {}", listener.local_addr()?);

        Ok(Self {
            name,
            listener,
            beacon_target,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.listener.local_addr()?)
    }

    /// Advertise and wait up to `wait` for a peer to make contact.
    pub async fn advertise(
        &mut self,
        snapshot: &SettingsSnapshot,
        wait: Duration,
    ) -> Result<Handshake, DiscoveryError> {
        let control_port = self.local_addr()?.port();
        let beacon =
            BeaconTask::start(Beacon::new(self.name.clone(), control_port), self.beacon_target)
                .await?;

        let result = timeout(wait, self.accept_contact(snapshot)).await;
        beacon.stop();

        match result {
            Ok(handshake) => handshake,
            Err(_) => {
                debug!("No peer contact within {:?}", wait);
                Err(DiscoveryError::Timeout(wait))
            }
        }
    }

    async fn accept_contact(
        &self,
        snapshot: &SettingsSnapshot,
    ) -> Result<Handshake, DiscoveryError> {
        // Several connections may be mid-handshake; the first Contact wins
        let mut pending = FuturesUnordered::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, remote) = accepted?;
                    debug!("Connection from {}", remote);
                    pending.push(async move {
                        let result = timeout(HANDSHAKE_TIMEOUT, handshake(stream, remote, snapshot)).await;
                        (remote, result)
                    });
                }
                Some((remote, result)) = pending.next(), if !pending.is_empty() => match result {
                    Ok(Ok(handshake)) => {
                        info!(
                            "🤝 Peer {} made contact (frames to {})",
                            remote, handshake.peer_ip
                        );
                        return Ok(handshake);
                    }
                    Ok(Err(e)) => warn!("Dropping contact from {}: {}", remote, e),
                    Err(_) => warn!(
                        "Dropping contact from {}: no Contact within {:?}",
                        remote, HANDSHAKE_TIMEOUT
                    ),
                },
            }
        }
    }
}

async fn handshake(
    stream: TcpStream,
    remote: SocketAddr,
    snapshot: &SettingsSnapshot,
) -> Result<Handshake, DiscoveryError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| DiscoveryError::Protocol(format!("websocket upgrade failed: {}", e)))?;
    let (mut sink, mut source) = ws.split();

    let data = loop {
        match source.next().await {
            Some(Ok(WsMessage::Binary(data))) => break data,
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(DiscoveryError::Protocol("closed before contact".into()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(DiscoveryError::Protocol(e.to_string())),
        }
    };

    let (address, frame_port) = match protocol::decode::<ControlMessage>(&data) {
        Ok(ControlMessage::Contact {
            address,
            frame_port,
        }) => (address, frame_port),
        Ok(_) | Err(_) => {
            let reply = protocol::encode(&ControlMessage::Error {
                message: "expected Contact".into(),
            })
            .map_err(|e| DiscoveryError::Protocol(e.to_string()))?;
            let _ = sink.send(WsMessage::Binary(reply)).await;
            let _ = sink.close().await;
            return Err(DiscoveryError::Protocol("first message was not Contact".into()));
        }
    };

    let reply = protocol::encode(&ControlMessage::Snapshot(snapshot.clone()))
        .map_err(|e| DiscoveryError::Protocol(e.to_string()))?;
    sink.send(WsMessage::Binary(reply))
        .await
        .map_err(|e| DiscoveryError::Protocol(e.to_string()))?;

    Ok(Handshake {
        peer_ip: address.unwrap_or_else(|| remote.ip()),
        frame_port,
        control: ControlChannel::spawn(sink, source, remote),
    })
}
