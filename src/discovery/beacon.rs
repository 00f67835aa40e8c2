//! UDP name advertisement.
//!
//! While the camera waits for a peer it sends a small bincode [`Beacon`]
//! to the beacon address (broadcast by default) once a second. Peers listen
//! on the beacon port, match on the name, and combine the datagram's source
//! IP with the advertised control port.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, info};

use crate::error::DiscoveryError;
use crate::protocol::{self, Beacon, PROTOCOL_VERSION};

pub const BEACON_INTERVAL: Duration = Duration::from_secs(1);

/// A running advertisement. The name is deregistered when this is stopped or dropped.
pub struct BeaconTask {
    name: String,
    handle: JoinHandle<()>,
}

impl BeaconTask {
    pub async fn start(beacon: Beacon, target: SocketAddr) -> Result<Self, DiscoveryError> {
        let bind: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.set_broadcast(true)?;
        let data =
            protocol::encode(&beacon).map_err(|e| DiscoveryError::Protocol(e.to_string()))?;

        let name = beacon.name.clone();
        info!(
            "📡 Advertising {:?} (control port {}) to {}",
            name, beacon.control_port, target
        );

        let handle = tokio::spawn(async move {
            let mut ticker = interval(BEACON_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = socket.send_to(&data, target).await {
                    // No route / no interface yet: keep trying until stopped
                    debug!("Beacon send to {} failed: {}", target, e);
                }
            }
        });

        Ok(Self { name, handle })
    }

    pub fn stop(self) {
        // Drop does the work
    }
}

impl Drop for BeaconTask {
    fn drop(&mut self) {
        self.handle.abort();
        debug!("Stopped advertising {:?}", self.name);
    }
}

/// Peer side: wait for a beacon carrying `name` and return the camera's
/// control endpoint.
pub async fn listen_for(
    name: &str,
    listen: SocketAddr,
    wait: Duration,
) -> Result<SocketAddr, DiscoveryError> {
    let socket = UdpSocket::bind(listen)
        .await
        .map_err(|source| DiscoveryError::Bind {
            addr: listen,
            source,
        })?;

    let search = async {
        let mut buf = [0u8; 512];
        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            match protocol::decode::<Beacon>(&buf[..n]) {
                Ok(beacon) if beacon.version != PROTOCOL_VERSION => debug!(
                    "Ignoring protocol v{} beacon for {:?} from {}",
                    beacon.version, beacon.name, from
                ),
                Ok(beacon) if beacon.name == name => {
                    return Ok::<_, DiscoveryError>(SocketAddr::new(
                        from.ip(),
                        beacon.control_port,
                    ));
                }
                Ok(beacon) => debug!("Ignoring beacon for {:?} from {}", beacon.name, from),
                Err(_) => debug!("Ignoring non-beacon datagram from {}", from),
            }
        }
    };

    timeout(wait, search)
        .await
        .map_err(|_| DiscoveryError::Timeout(wait))?
}
