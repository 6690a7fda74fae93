//! VLCync session protocol.
//! Host-driven: no I/O; host passes packets and user actions in and carries out the returned actions.

pub mod cipher;
pub mod digest;
pub mod packet;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod wire;

pub use cipher::{CipherError, SessionCodec};
pub use digest::{digest_file, Algorithm};
pub use packet::Packet;
pub use playback::PlaybackState;
pub use protocol::Directive;
pub use session::{SessionAction, SessionCore, VoteState};
pub use wire::{encode_frame, open_envelope, FrameDecodeError, FrameEncodeError};
