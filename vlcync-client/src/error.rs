//! Client error taxonomy.

use vlcync_core::{FrameDecodeError, FrameEncodeError};

/// Failure on an established relay connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad frame: {0}")]
    Frame(#[from] FrameDecodeError),
    #[error("could not encode frame: {0}")]
    Encode(#[from] FrameEncodeError),
}

impl TransportError {
    /// Decryption failure: wrong session password or tampered traffic.
    pub fn is_decrypt(&self) -> bool {
        matches!(self, TransportError::Frame(FrameDecodeError::Decrypt))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection error: {0}")]
    Transport(#[from] TransportError),
    #[error("media player unreachable: {0}")]
    PlayerUnreachable(String),
    #[error("unexpected media player response: {0}")]
    PlayerProtocol(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
