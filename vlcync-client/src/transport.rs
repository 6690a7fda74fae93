//! Relay transport: TCP connect, header-size handshake, encrypted length-prefixed frames.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

use vlcync_core::protocol::{is_welcome, parse_header_announcement};
use vlcync_core::wire::{self, parse_length_prefix};
use vlcync_core::{Packet, SessionCodec};

use crate::error::{ClientError, TransportError};

/// Upper bound on the bare pre-handshake envelope.
const ANNOUNCEMENT_MAX_LEN: usize = 4096;

/// Connection lifecycle, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingWelcome,
    Connected,
    Disconnecting,
    Lost,
}

impl ConnectionState {
    /// Disconnecting or lost: background loops should wind down.
    pub fn is_closing(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnecting | ConnectionState::Lost | ConnectionState::Disconnected
        )
    }
}

/// Result of one receive call.
#[derive(Debug)]
pub enum Received {
    Packet(Packet),
    /// Peer ended the stream between frames.
    Closed,
    /// Socket reported would-block before any byte of a frame arrived; call again.
    Retry,
}

enum Fill {
    Full,
    Eof,
    WouldBlock,
}

/// Read side of an established session.
pub struct FrameReader<R = OwnedReadHalf> {
    half: R,
    codec: Arc<SessionCodec>,
    header_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(half: R, codec: Arc<SessionCodec>, header_size: usize) -> Self {
        Self {
            half,
            codec,
            header_size,
        }
    }

    /// Read one frame: exactly `header_size` bytes of length prefix, then exactly that many
    /// envelope bytes. Short reads are normal and are looped over.
    pub async fn receive(&mut self) -> Result<Received, TransportError> {
        let mut header = vec![0u8; self.header_size];
        match fill(&mut self.half, &mut header, true).await? {
            Fill::Eof => return Ok(Received::Closed),
            Fill::WouldBlock => return Ok(Received::Retry),
            Fill::Full => {}
        }
        let len = parse_length_prefix(&header)?;
        let mut envelope = vec![0u8; len];
        fill(&mut self.half, &mut envelope, false).await?;
        let packet = wire::open_envelope(&self.codec, &envelope)?;
        Ok(Received::Packet(packet))
    }
}

/// Fill `buf` completely. EOF or would-block are only tolerated before the first byte
/// of a frame; anywhere else the stream is broken.
async fn fill<R: AsyncRead + Unpin>(
    half: &mut R,
    buf: &mut [u8],
    frame_start: bool,
) -> Result<Fill, TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        match half.read(&mut buf[filled..]).await {
            Ok(0) if filled == 0 && frame_start => return Ok(Fill::Eof),
            Ok(0) => return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if filled == 0 && frame_start {
                    return Ok(Fill::WouldBlock);
                }
                tokio::task::yield_now().await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Fill::Full)
}

/// Write side of an established session. Owned by a single writer task so frames never interleave.
pub struct FrameWriter {
    half: OwnedWriteHalf,
    codec: Arc<SessionCodec>,
    header_size: usize,
    username: String,
}

impl FrameWriter {
    pub async fn send(&mut self, message: &str, for_vlc: bool) -> Result<(), TransportError> {
        let packet = Packet::new(self.username.as_str(), message, for_vlc);
        let frame = wire::encode_frame(&self.codec, &packet, self.header_size)?;
        self.half.write_all(&frame).await?;
        self.half.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.half.shutdown().await;
    }
}

/// An authenticated relay connection.
pub struct Connection {
    pub reader: FrameReader,
    pub writer: FrameWriter,
    pub header_size: usize,
    pub welcome: Packet,
}

/// Connect and run the handshake: read the bare `HEADER_SIZE=<n>` envelope, send our identity
/// framed with that width, then wait for the welcome packet.
pub async fn connect(
    addr: &str,
    username: &str,
    codec: Arc<SessionCodec>,
    state: &watch::Sender<ConnectionState>,
) -> Result<Connection, ClientError> {
    state.send_replace(ConnectionState::Connecting);
    let result = handshake(addr, username, codec, state).await;
    if result.is_err() {
        state.send_replace(ConnectionState::Disconnected);
    }
    result
}

async fn handshake(
    addr: &str,
    username: &str,
    codec: Arc<SessionCodec>,
    state: &watch::Sender<ConnectionState>,
) -> Result<Connection, ClientError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    let _ = stream.set_nodelay(true);
    info!(%addr, "established connection with relay");

    let header_size = read_announcement(&mut stream, &codec).await?;
    debug!(header_size, "received session header");

    let (read_half, write_half) = stream.into_split();
    let mut writer = FrameWriter {
        half: write_half,
        codec: codec.clone(),
        header_size,
        username: username.to_string(),
    };
    let mut reader = FrameReader::new(read_half, codec, header_size);

    let identity = Packet::identity(username);
    writer
        .send(&identity.message, identity.for_vlc)
        .await
        .map_err(|e| ClientError::Handshake(format!("could not send identity: {e}")))?;
    state.send_replace(ConnectionState::AwaitingWelcome);

    loop {
        match reader.receive().await {
            Ok(Received::Retry) => continue,
            Ok(Received::Closed) => {
                return Err(ClientError::Handshake(
                    "connection closed before welcome, try again".to_string(),
                ))
            }
            Ok(Received::Packet(welcome)) => {
                if !is_welcome(&welcome.message) {
                    return Err(ClientError::Handshake(welcome.message));
                }
                state.send_replace(ConnectionState::Connected);
                info!(username, "joined relay session");
                return Ok(Connection {
                    reader,
                    writer,
                    header_size,
                    welcome,
                });
            }
            Err(e) if e.is_decrypt() => {
                return Err(ClientError::Handshake(
                    "could not decrypt welcome (wrong session password?)".to_string(),
                ))
            }
            Err(e) => return Err(ClientError::Handshake(e.to_string())),
        }
    }
}

async fn read_announcement(
    stream: &mut TcpStream,
    codec: &SessionCodec,
) -> Result<usize, ClientError> {
    let mut buf = vec![0u8; ANNOUNCEMENT_MAX_LEN];
    let n = loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                return Err(ClientError::Handshake(
                    "established connection but no response from relay".to_string(),
                ))
            }
            Ok(n) => break n,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                continue
            }
            Err(e) => return Err(ClientError::Handshake(e.to_string())),
        }
    };
    let announcement = wire::open_envelope(codec, &buf[..n]).map_err(|e| {
        ClientError::Handshake(format!("unreadable header size announcement: {e}"))
    })?;
    parse_header_announcement(&announcement.message).ok_or_else(|| {
        ClientError::Handshake(format!(
            "expected header size announcement, got {:?}",
            announcement.message
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    fn codec() -> Arc<SessionCodec> {
        Arc::new(SessionCodec::from_password("pw").unwrap())
    }

    #[tokio::test]
    async fn frame_split_across_writes() {
        let codec = codec();
        let frame = wire::encode_frame(&codec, &Packet::chat("bob", "hello there"), 10).unwrap();
        let (client, mut server) = duplex(64);
        let mut reader = FrameReader::new(client, codec, 10);
        tokio::spawn(async move {
            for piece in frame.chunks(3) {
                server.write_all(piece).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });
        match reader.receive().await.unwrap() {
            Received::Packet(p) => assert_eq!(p.message, "hello there"),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_between_frames_is_closed() {
        let (client, server) = duplex(64);
        drop(server);
        let mut reader = FrameReader::new(client, codec(), 10);
        assert!(matches!(reader.receive().await.unwrap(), Received::Closed));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_error() {
        let codec = codec();
        let frame = wire::encode_frame(&codec, &Packet::chat("bob", "cut off"), 10).unwrap();
        let (client, mut server) = duplex(1024);
        server.write_all(&frame[..frame.len() - 4]).await.unwrap();
        drop(server);
        let mut reader = FrameReader::new(client, codec, 10);
        assert!(matches!(
            reader.receive().await,
            Err(TransportError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn wrong_password_is_decrypt_error() {
        let frame = wire::encode_frame(&codec(), &Packet::chat("bob", "secret"), 10).unwrap();
        let (client, mut server) = duplex(1024);
        server.write_all(&frame).await.unwrap();
        let stranger = Arc::new(SessionCodec::from_password("other").unwrap());
        let mut reader = FrameReader::new(client, stranger, 10);
        assert!(reader.receive().await.unwrap_err().is_decrypt());
    }

    #[test]
    fn closing_states() {
        assert!(ConnectionState::Lost.is_closing());
        assert!(ConnectionState::Disconnecting.is_closing());
        assert!(!ConnectionState::Connected.is_closing());
        assert!(!ConnectionState::AwaitingWelcome.is_closing());
    }
}
