//! Request/reply channel to the connected peer.
//!
//! The WebSocket is split into a reader task that decodes peer messages into
//! a queue and a writer task that drains replies onto the socket. The session
//! only ever touches the queues, so checking for settings traffic is a
//! `try_recv` and never waits on the network.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::Message as WsMessage, WebSocketStream};
use tracing::{debug, warn};

use crate::error::DiscoveryError;
use crate::protocol::{self, ControlMessage};
use crate::settings::SettingsSnapshot;

pub(crate) type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
pub(crate) type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// A peer message the session has to act on
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Settings the peer wants applied
    Update(SettingsSnapshot),
    /// Peer asked to end the session
    Disconnect,
}

pub struct ControlChannel {
    peer: SocketAddr,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
}

impl ControlChannel {
    pub(crate) fn spawn(sink: WsSink, source: WsSource, peer: SocketAddr) -> Self {
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(write_loop(sink, out_rx));
        let reader = tokio::spawn(read_loop(source, in_tx, out_tx.clone(), peer));

        Self {
            peer,
            inbound: in_rx,
            outbound: out_tx,
            reader,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Next pending peer message, if any. Never waits.
    pub fn poll(&mut self) -> Option<Inbound> {
        self.inbound.try_recv().ok()
    }

    /// Queue a message to the peer.
    pub fn reply(&self, msg: &ControlMessage) -> Result<(), DiscoveryError> {
        let data = protocol::encode(msg).map_err(|e| DiscoveryError::Protocol(e.to_string()))?;
        self.outbound
            .send(data)
            .map_err(|_| DiscoveryError::Protocol("control channel closed".into()))
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        // The writer flushes queued replies and closes once the last sender is gone.
        self.reader.abort();
    }
}

async fn write_loop(mut sink: WsSink, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(data) = rx.recv().await {
        if sink.send(WsMessage::Binary(data)).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut source: WsSource,
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    peer: SocketAddr,
) {
    while let Some(msg) = source.next().await {
        match msg {
            Ok(WsMessage::Binary(data)) => {
                let inbound_msg = match protocol::decode::<ControlMessage>(&data) {
                    Ok(ControlMessage::Update(settings)) => Inbound::Update(settings),
                    Ok(ControlMessage::Disconnect) => Inbound::Disconnect,
                    Ok(other) => {
                        warn!("Unexpected control message from {}: {:?}", peer, other);
                        send_error(&outbound, "unexpected message");
                        continue;
                    }
                    Err(e) => {
                        warn!("Undecodable control message from {}: {}", peer, e);
                        send_error(&outbound, "malformed message");
                        continue;
                    }
                };
                let done = inbound_msg == Inbound::Disconnect;
                if inbound.send(inbound_msg).is_err() || done {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
    debug!("Control channel from {} closed", peer);
}

fn send_error(outbound: &mpsc::UnboundedSender<Vec<u8>>, message: &str) {
    let msg = ControlMessage::Error {
        message: message.to_string(),
    };
    if let Ok(data) = protocol::encode(&msg) {
        let _ = outbound.send(data);
    }
}
