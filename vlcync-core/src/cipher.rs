//! Session cipher: password-derived key, AES-256-GCM with 16-byte nonces and detached tags.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Nonce length on the wire.
pub const NONCE_LEN: usize = 16;
/// Authentication tag length on the wire.
pub const TAG_LEN: usize = 16;

type SessionAead = AesGcm<Aes256, U16>;

/// Derive a 32-byte session key from the shared session password.
/// Every participant typing the same password derives the same key.
pub fn derive_session_key(password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"vlcync-session-v1");
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// Output of one encryption: fresh random nonce, ciphertext and detached tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// One codec per session, bound to the session key.
pub struct SessionCodec {
    aead: SessionAead,
}

impl SessionCodec {
    pub fn new(key: &[u8; 32]) -> Result<Self, CipherError> {
        let aead = SessionAead::new_from_slice(key).map_err(|_| CipherError::Key)?;
        Ok(Self { aead })
    }

    pub fn from_password(password: &str) -> Result<Self, CipherError> {
        Self::new(&derive_session_key(password))
    }

    /// Encrypt under a fresh random 128-bit nonce. Nonces are never reused within a session.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let mut ciphertext = plaintext.to_vec();
        let tag = self
            .aead
            .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut ciphertext)
            .map_err(|_| CipherError::Encrypt)?;
        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(&tag);
        Ok(Sealed {
            nonce,
            ciphertext,
            tag: tag_bytes,
        })
    }

    /// Decrypt and authenticate. Wrong key or tampered bytes fail with `CipherError::Decrypt`.
    pub fn decrypt(&self, sealed: &Sealed) -> Result<Vec<u8>, CipherError> {
        let mut plaintext = sealed.ciphertext.clone();
        self.aead
            .decrypt_in_place_detached(
                GenericArray::from_slice(&sealed.nonce),
                b"",
                &mut plaintext,
                GenericArray::from_slice(&sealed.tag),
            )
            .map_err(|_| CipherError::Decrypt)?;
        Ok(plaintext)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_same_key() {
        assert_eq!(derive_session_key("hunter2"), derive_session_key("hunter2"));
        assert_ne!(derive_session_key("hunter2"), derive_session_key("hunter3"));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let codec = SessionCodec::from_password("movie night").unwrap();
        let sealed = codec.encrypt(b"hello vlcync").unwrap();
        assert_eq!(codec.decrypt(&sealed).unwrap(), b"hello vlcync");
    }

    #[test]
    fn nonces_are_fresh() {
        let codec = SessionCodec::from_password("pw").unwrap();
        let a = codec.encrypt(b"same").unwrap();
        let b = codec.encrypt(b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = SessionCodec::from_password("right")
            .unwrap()
            .encrypt(b"secret")
            .unwrap();
        let other = SessionCodec::from_password("wrong").unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn tampered_tag_fails() {
        let codec = SessionCodec::from_password("pw").unwrap();
        let mut sealed = codec.encrypt(b"secret").unwrap();
        sealed.tag[0] ^= 0x01;
        assert!(matches!(codec.decrypt(&sealed), Err(CipherError::Decrypt)));
    }
}
