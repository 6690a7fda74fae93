//! Application packet: the plaintext carried inside every encrypted envelope.

use serde::{Deserialize, Serialize};

/// One relay message. Encoding is bincode; framing and encryption live in the wire module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Sender's display name, as announced during the handshake.
    pub username: String,
    /// Chat text, a control phrase, or a playback directive.
    pub message: String,
    /// Playback directive for the media player rather than chat.
    pub for_vlc: bool,
}

impl Packet {
    pub fn new(username: impl Into<String>, message: impl Into<String>, for_vlc: bool) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
            for_vlc,
        }
    }

    /// Identity packet sent right after the header-size announcement.
    pub fn identity(username: impl Into<String>) -> Self {
        Self::new(username, String::new(), false)
    }

    pub fn chat(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(username, message, false)
    }

    pub fn directive(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(username, message, true)
    }
}
