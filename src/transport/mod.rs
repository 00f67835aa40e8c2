//! Frame channel: a dedicated TCP stream from the camera to the peer.
//!
//! Wire format, repeated once per frame with no separators:
//!
//! ```text
//! ┌────────────────────┬──────────────────────────┐
//! │ Length (4 bytes)   │ JPEG payload             │
//! │ little-endian u32  │ (length bytes)           │
//! └────────────────────┴──────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Size of the length prefix in front of every frame
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest frame a reader will accept (64 MB)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Prefix `payload` with its little-endian u32 length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge(payload.len()))?;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode one frame from the front of `buf`.
///
/// Returns the payload and the number of bytes consumed, or `None` if `buf`
/// does not yet hold a complete frame.
pub fn decode_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    let prefix: [u8; LENGTH_PREFIX_LEN] = buf.get(..LENGTH_PREFIX_LEN)?.try_into().ok()?;
    let len = u32::from_le_bytes(prefix) as usize;
    let end = LENGTH_PREFIX_LEN.checked_add(len)?;
    let payload = buf.get(LENGTH_PREFIX_LEN..end)?;
    Some((payload, end))
}

/// Sending half of the frame channel (camera side)
pub struct FrameChannel {
    stream: BufWriter<TcpStream>,
    peer: SocketAddr,
    write_timeout: Duration,
    frames_sent: u64,
    closed: bool,
}

impl FrameChannel {
    /// Open the frame connection to the peer.
    pub async fn connect(
        addr: SocketAddr,
        write_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream = timeout(write_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Connect {
                addr,
                source: std::io::ErrorKind::TimedOut.into(),
            })?
            .map_err(|source| TransportError::Connect { addr, source })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not set TCP_NODELAY on frame channel: {}", e);
        }
        debug!("Frame channel connected to {}", addr);

        Ok(Self {
            stream: BufWriter::new(stream),
            peer: addr,
            write_timeout,
            frames_sent: 0,
            closed: false,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Write one length-prefixed frame and flush it.
    ///
    /// Any failure closes the channel; later calls return [`TransportError::Closed`].
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let result = self.write_frame(payload).await;
        if result.is_err() {
            self.closed = true;
        } else {
            self.frames_sent += 1;
        }
        result
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| TransportError::FrameTooLarge(payload.len()))?;

        let limit = self.write_timeout;
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(&len.to_le_bytes()).await?;
            stream.write_all(payload).await?;
            stream.flush().await
        };

        match timeout(limit, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Write(e)),
            Err(_) => Err(TransportError::Timeout(limit)),
        }
    }

    /// Shut the connection down. Errors are ignored; the peer may already be gone.
    pub async fn close(mut self) {
        self.closed = true;
        let _ = self.stream.shutdown().await;
    }
}

/// Receiving half of the frame channel (peer side)
pub struct FrameReader<R> {
    reader: R,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_len: MAX_FRAME_LEN,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` means the stream ended cleanly on a frame boundary.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        let got = read_full(&mut self.reader, &mut prefix).await?;
        if got == 0 {
            return Ok(None);
        }
        if got < LENGTH_PREFIX_LEN {
            return Err(TransportError::Truncated {
                expected: LENGTH_PREFIX_LEN,
                got,
            });
        }

        let len = u32::from_le_bytes(prefix) as usize;
        if len > self.max_len {
            return Err(TransportError::FrameTooLarge(len));
        }

        let mut payload = vec![0u8; len];
        let got = read_full(&mut self.reader, &mut payload).await?;
        if got < len {
            return Err(TransportError::Truncated { expected: len, got });
        }
        Ok(Some(payload))
    }
}

/// Fill `buf` unless EOF comes first; returns how many bytes were read.
async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(TransportError::Read)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_encode_prefixes_little_endian_length() {
        let buf = encode_frame(b"jpeg").unwrap();
        assert_eq!(&buf[..4], &[4, 0, 0, 0]);
        assert_eq!(&buf[4..], b"jpeg");
    }

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let buf = encode_frame(&[7u8; 300]).unwrap();
        assert!(decode_frame(&buf[..3]).is_none());
        assert!(decode_frame(&buf[..200]).is_none());

        let (payload, used) = decode_frame(&buf).unwrap();
        assert_eq!(payload.len(), 300);
        assert_eq!(used, 304);
    }

    #[tokio::test]
    async fn test_reader_handles_back_to_back_frames() {
        let mut wire = encode_frame(b"first").unwrap();
        wire.extend(encode_frame(b"").unwrap());
        wire.extend(encode_frame(b"third frame").unwrap());

        let mut reader = FrameReader::new(&wire[..]);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"first");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"third frame");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_reports_truncation() {
        let wire = encode_frame(b"cut short").unwrap();
        let mut reader = FrameReader::new(&wire[..8]);
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::Truncated { expected: 9, got: 4 })
        ));
    }

    #[tokio::test]
    async fn test_reader_rejects_oversized_prefix() {
        let wire = encode_frame(&[0u8; 64]).unwrap();
        let mut reader = FrameReader::new(&wire[..]).with_max_len(16);
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::FrameTooLarge(64))
        ));
    }

    #[tokio::test]
    async fn test_channel_delivers_frames_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let receiver = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = FrameReader::new(stream);
            let mut frames = Vec::new();
            while let Some(frame) = reader.read_frame().await.unwrap() {
                frames.push(frame);
            }
            frames
        });

        let mut channel = FrameChannel::connect(addr, Duration::from_secs(2))
            .await
            .unwrap();
        for i in 0..5u8 {
            channel.send(&vec![i; 1000 * i as usize]).await.unwrap();
        }
        assert_eq!(channel.frames_sent(), 5);
        channel.close().await;

        let frames = receiver.await.unwrap();
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.len(), 1000 * i);
            assert!(frame.iter().all(|&b| b == i as u8));
        }
    }

    #[tokio::test]
    async fn test_send_fails_once_peer_is_gone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut channel = FrameChannel::connect(addr, Duration::from_secs(2))
            .await
            .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
        drop(listener);

        // The first writes may land in the socket buffer before the reset arrives.
        let payload = vec![0u8; 64 * 1024];
        let mut failed = false;
        for _ in 0..200 {
            if channel.send(&payload).await.is_err() {
                failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(failed);
        assert!(matches!(
            channel.send(b"again").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            FrameChannel::connect(addr, Duration::from_secs(2)).await,
            Err(TransportError::Connect { .. })
        ));
    }
}
