//! VLCync client: relay transport, session controller and local media player backends.

pub mod config;
pub mod error;
pub mod player;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{ClientError, TransportError};
pub use player::{BackendKind, PlaybackController};
pub use session::{Session, SessionEvent, SessionHandle};
pub use transport::ConnectionState;
