//! Framing: decimal length prefix (space-padded to the session header size) + encrypted envelope.
//! Envelope layout: 16-byte nonce, 16-byte tag, ciphertext of the bincode-encoded packet.

use crate::cipher::{CipherError, Sealed, SessionCodec, NONCE_LEN, TAG_LEN};
use crate::packet::Packet;

/// Bytes in front of the ciphertext.
pub const ENVELOPE_OVERHEAD: usize = NONCE_LEN + TAG_LEN;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024; // 16 MiB

/// Serialize and encrypt a packet into an envelope (no length prefix).
/// Sent bare only once, before the header size is known.
pub fn seal_envelope(codec: &SessionCodec, packet: &Packet) -> Result<Vec<u8>, FrameEncodeError> {
    let plain = bincode::serialize(packet).map_err(FrameEncodeError::Encode)?;
    let sealed = codec.encrypt(&plain).map_err(FrameEncodeError::Cipher)?;
    let mut out = Vec::with_capacity(ENVELOPE_OVERHEAD + sealed.ciphertext.len());
    out.extend_from_slice(&sealed.nonce);
    out.extend_from_slice(&sealed.tag);
    out.extend_from_slice(&sealed.ciphertext);
    Ok(out)
}

/// Encode a packet into a complete frame: length prefix + envelope.
/// The declared length is always the exact envelope length.
pub fn encode_frame(
    codec: &SessionCodec,
    packet: &Packet,
    header_size: usize,
) -> Result<Vec<u8>, FrameEncodeError> {
    let envelope = seal_envelope(codec, packet)?;
    if envelope.len() > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = encode_length_prefix(envelope.len(), header_size)?;
    out.extend_from_slice(&envelope);
    Ok(out)
}

/// Left-aligned decimal, padded with spaces to `header_size` bytes.
pub fn encode_length_prefix(len: usize, header_size: usize) -> Result<Vec<u8>, FrameEncodeError> {
    let digits = len.to_string();
    if digits.len() > header_size {
        return Err(FrameEncodeError::TooLarge);
    }
    Ok(format!("{digits:<header_size$}").into_bytes())
}

/// Parse the declared envelope length from exactly one header's worth of bytes.
pub fn parse_length_prefix(header: &[u8]) -> Result<usize, FrameDecodeError> {
    let text = std::str::from_utf8(header).map_err(|_| FrameDecodeError::BadLength)?;
    let len: usize = text
        .trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0')
        .parse()
        .map_err(|_| FrameDecodeError::BadLength)?;
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len)
}

/// Decrypt and deserialize one envelope.
pub fn open_envelope(codec: &SessionCodec, envelope: &[u8]) -> Result<Packet, FrameDecodeError> {
    if envelope.len() < ENVELOPE_OVERHEAD {
        return Err(FrameDecodeError::Truncated);
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&envelope[..NONCE_LEN]);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&envelope[NONCE_LEN..ENVELOPE_OVERHEAD]);
    let sealed = Sealed {
        nonce,
        tag,
        ciphertext: envelope[ENVELOPE_OVERHEAD..].to_vec(),
    };
    let plain = codec.decrypt(&sealed).map_err(|_| FrameDecodeError::Decrypt)?;
    bincode::deserialize(&plain).map_err(FrameDecodeError::Decode)
}

/// Error encoding a packet into a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("cipher error: {0}")]
    Cipher(CipherError),
    #[error("frame too large")]
    TooLarge,
}

/// Error decoding a frame. `Decrypt` is fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("malformed length prefix")]
    BadLength,
    #[error("frame too large")]
    TooLarge,
    #[error("envelope shorter than nonce and tag")]
    Truncated,
    #[error("decryption failed")]
    Decrypt,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SessionCodec {
        SessionCodec::from_password("test-password").unwrap()
    }

    #[test]
    fn roundtrip_packet() {
        let codec = codec();
        let packet = Packet::directive("alice", "seek 120");
        let frame = encode_frame(&codec, &packet, 10).unwrap();
        let len = parse_length_prefix(&frame[..10]).unwrap();
        assert_eq!(len, frame.len() - 10);
        assert_eq!(open_envelope(&codec, &frame[10..]).unwrap(), packet);
    }

    #[test]
    fn prefix_is_space_padded_decimal() {
        assert_eq!(encode_length_prefix(42, 6).unwrap(), b"42    ");
        assert_eq!(parse_length_prefix(b"42    ").unwrap(), 42);
    }

    #[test]
    fn prefix_wider_than_header_rejected() {
        assert!(matches!(
            encode_length_prefix(123_456, 4),
            Err(FrameEncodeError::TooLarge)
        ));
    }

    #[test]
    fn bare_envelope_has_no_prefix() {
        let codec = codec();
        let envelope = seal_envelope(&codec, &Packet::chat("server", "HEADER_SIZE=10")).unwrap();
        assert_eq!(
            open_envelope(&codec, &envelope).unwrap().message,
            "HEADER_SIZE=10"
        );
    }

    #[test]
    fn malformed_length_is_distinct_from_decrypt_failure() {
        assert!(matches!(
            parse_length_prefix(b"12ab      "),
            Err(FrameDecodeError::BadLength)
        ));

        let envelope = seal_envelope(&codec(), &Packet::chat("a", "b")).unwrap();
        let stranger = SessionCodec::from_password("other-password").unwrap();
        assert!(matches!(
            open_envelope(&stranger, &envelope),
            Err(FrameDecodeError::Decrypt)
        ));
    }

    #[test]
    fn tampered_tag_fails_decrypt() {
        let codec = codec();
        let mut envelope = seal_envelope(&codec, &Packet::chat("a", "b")).unwrap();
        envelope[NONCE_LEN] ^= 0xff;
        assert!(matches!(
            open_envelope(&codec, &envelope),
            Err(FrameDecodeError::Decrypt)
        ));
    }

    #[test]
    fn short_envelope_truncated() {
        assert!(matches!(
            open_envelope(&codec(), &[0u8; 20]),
            Err(FrameDecodeError::Truncated)
        ));
    }

    #[test]
    fn oversized_declared_length() {
        assert!(matches!(
            parse_length_prefix(b"999999999 "),
            Err(FrameDecodeError::TooLarge)
        ));
    }
}
