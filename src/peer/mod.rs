//! The other end: find a camera, take its frames, change its settings.
//!
//! Used by `picam view` and the end-to-end tests.

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{client_async, tungstenite::Message as WsMessage};
use tracing::{debug, info};

use crate::discovery::control::{WsSink, WsSource};
use crate::discovery::listen_for;
use crate::error::TransportError;
use crate::protocol::{self, ControlMessage};
use crate::settings::SettingsSnapshot;
use crate::transport::FrameReader;

/// Frames read ahead of the caller
const FRAME_BUFFER: usize = 8;

/// Wait for a beacon from the camera called `name`; returns its control endpoint.
pub async fn discover(name: &str, beacon_port: u16, wait: Duration) -> Result<SocketAddr> {
    let listen = SocketAddr::from((Ipv4Addr::UNSPECIFIED, beacon_port));
    let addr = listen_for(name, listen, wait)
        .await
        .with_context(|| format!("Camera {:?} not found", name))?;
    info!("📷 Found {:?} at {}", name, addr);
    Ok(addr)
}

/// Answer to an update request
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReply {
    pub accepted: bool,
    pub settings: SettingsSnapshot,
    pub reason: Option<String>,
}

pub struct PeerClient {
    camera: SocketAddr,
    sink: WsSink,
    source: WsSource,
    frames: mpsc::Receiver<Result<Vec<u8>, TransportError>>,
    reader: JoinHandle<()>,
    settings: SettingsSnapshot,
}

impl PeerClient {
    /// Contact the camera at `control` and wait for its frame connection
    /// on `frame_bind`.
    pub async fn contact(control: SocketAddr, frame_bind: SocketAddr, wait: Duration) -> Result<Self> {
        let listener = TcpListener::bind(frame_bind)
            .await
            .with_context(|| format!("Failed to bind frame listener on {}", frame_bind))?;
        let frame_port = listener.local_addr()?.port();

        let stream = TcpStream::connect(control)
            .await
            .with_context(|| format!("Failed to reach camera at {}", control))?;
        let (ws, _) = client_async(format!("ws://{}", control), stream)
            .await
            .context("WebSocket handshake with camera failed")?;
        let (mut sink, mut source) = ws.split();

        send(
            &mut sink,
            &ControlMessage::Contact {
                address: None,
                frame_port: Some(frame_port),
            },
        )
        .await?;

        let settings = match recv(&mut source).await? {
            ControlMessage::Snapshot(settings) => settings,
            ControlMessage::Error { message } => bail!("Camera refused contact: {}", message),
            other => bail!("Expected settings snapshot, got {:?}", other),
        };

        let (stream, from) = timeout(wait, listener.accept())
            .await
            .context("Camera never opened the frame channel")??;
        debug!("Frame channel from {}", from);

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
        let reader = tokio::spawn(read_frames(FrameReader::new(stream), frame_tx));

        Ok(Self {
            camera: control,
            sink,
            source,
            frames: frame_rx,
            reader,
            settings,
        })
    }

    pub fn camera(&self) -> SocketAddr {
        self.camera
    }

    /// Settings the camera last reported
    pub fn settings(&self) -> &SettingsSnapshot {
        &self.settings
    }

    /// Next JPEG frame, or `None` once the camera closes the frame channel.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.frames.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e).context("Frame channel broke"),
            None => Ok(None),
        }
    }

    /// Ask the camera to apply `request` and wait for its verdict.
    pub async fn update(&mut self, request: SettingsSnapshot) -> Result<UpdateReply> {
        send(&mut self.sink, &ControlMessage::Update(request)).await?;
        loop {
            match recv(&mut self.source).await? {
                ControlMessage::UpdateReply {
                    accepted,
                    settings,
                    reason,
                } => {
                    self.settings = settings.clone();
                    return Ok(UpdateReply {
                        accepted,
                        settings,
                        reason,
                    });
                }
                ControlMessage::Error { message } => bail!("Camera error: {}", message),
                ControlMessage::Disconnect => bail!("Camera ended the session"),
                other => debug!("Ignoring {:?} while waiting for update reply", other),
            }
        }
    }

    /// Tell the camera we are done. Frames already in flight can still be
    /// read until the camera closes the frame channel.
    pub async fn disconnect(&mut self) -> Result<()> {
        send(&mut self.sink, &ControlMessage::Disconnect).await?;
        let _ = self.sink.close().await;
        Ok(())
    }
}

impl Drop for PeerClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames(
    mut reader: FrameReader<TcpStream>,
    tx: mpsc::Sender<Result<Vec<u8>, TransportError>>,
) {
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                if tx.send(Ok(frame)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}

async fn send(sink: &mut WsSink, msg: &ControlMessage) -> Result<()> {
    let data = protocol::encode(msg)?;
    sink.send(WsMessage::Binary(data))
        .await
        .context("Failed to send to camera")
}

async fn recv(source: &mut WsSource) -> Result<ControlMessage> {
    loop {
        match source.next().await {
            Some(Ok(WsMessage::Binary(data))) => return protocol::decode(&data),
            Some(Ok(WsMessage::Close(_))) | None => bail!("Camera closed the control channel"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e).context("Control channel error"),
        }
    }
}
