//! Local media player control. One backend is chosen per session and never switched.
//!
//! - `rc.rs` - line-oriented control socket (`--extraintf rc`)
//! - `http.rs` - HTTP status/command interface (`--extraintf http`)

mod http;
mod rc;

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use vlcync_core::protocol;
use vlcync_core::PlaybackState;

use crate::config::PlayerConfig;
use crate::error::ClientError;
use crate::session::SessionHandle;

pub use http::{HttpPlayer, PlayerStatus};
pub use rc::{RcObservation, RcPlayer};

/// Capability interface of a playback backend.
#[async_trait]
pub trait PlaybackController: Send + Sync {
    /// Launch the player on `path` and start the background poller. No-op while already playing.
    async fn begin_playback(&self, path: &Path) -> Result<(), ClientError>;

    /// Apply a peer's directive (`seek <t>`, or anything else to toggle play/pause) without
    /// re-broadcasting it.
    async fn outside_input(&self, directive: &str) -> Result<(), ClientError>;

    /// Stop polling. Called when the session ends.
    async fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Rc,
    Http,
}

impl BackendKind {
    /// Unset or unrecognized values select the HTTP backend.
    pub fn from_config(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "rc" => BackendKind::Rc,
            _ => BackendKind::Http,
        }
    }
}

/// Build the configured backend for a session.
pub fn build(
    config: &PlayerConfig,
    session: SessionHandle,
) -> Result<Arc<dyn PlaybackController>, ClientError> {
    validate_executable(&config.executable)?;
    let kind = config.backend();
    debug!(?kind, "using playback backend");
    Ok(match kind {
        BackendKind::Rc => Arc::new(RcPlayer::new(config, session)),
        BackendKind::Http => Arc::new(HttpPlayer::new(config, session)?),
    })
}

/// Fail fast when the player is configured by explicit path and nothing is there.
/// A bare program name is left to the PATH lookup at launch (except on Windows).
pub fn validate_executable(path: &Path) -> Result<(), ClientError> {
    let explicit = cfg!(windows) || path.is_absolute() || path.components().count() > 1;
    if explicit && !path.exists() {
        return Err(ClientError::Config(format!(
            "unable to locate media player executable at {}, please correct it in the config",
            path.display()
        )));
    }
    Ok(())
}

/// Start the player detached; it outlives the session.
fn launch(executable: &Path, args: &[String]) -> Result<(), ClientError> {
    info!(executable = %executable.display(), "launching media player");
    Command::new(executable)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(drop)
        .map_err(|e| {
            ClientError::Config(format!(
                "could not launch {}: {e}",
                executable.display()
            ))
        })
}

/// Playback state shared by a backend, its poller task and the session's receive loop.
struct Shared {
    session: SessionHandle,
    state: Mutex<PlaybackState>,
    active: AtomicBool,
}

impl Shared {
    fn new(session: SessionHandle) -> Self {
        Self {
            session,
            state: Mutex::new(PlaybackState::new(false)),
            active: AtomicBool::new(false),
        }
    }

    /// Claim the playback slot. False if playback is already running.
    fn try_activate(&self) -> bool {
        !self.active.swap(true, Ordering::SeqCst)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn should_poll(&self) -> bool {
        self.is_active() && !self.session.is_closing()
    }

    /// Fresh tracker for a new playback.
    async fn reset(&self) {
        *self.state.lock().await = PlaybackState::new(true);
    }

    /// Feed observed position and play state through the tracker and broadcast what it
    /// reports: `seek <t>` for a local seek, `play_directive` for a play/pause transition.
    async fn reconcile(&self, position: Option<u64>, playing: Option<bool>, play_directive: &str) {
        let (seek, toggled) = {
            let mut state = self.state.lock().await;
            let seek = position.and_then(|t| state.observe_position(t));
            let toggled = playing.is_some_and(|p| state.observe_playing(p));
            (seek, toggled)
        };
        if let Some(t) = seek {
            debug!(position = t, "local seek detected");
            let _ = self.session.send(protocol::seek(t), true);
        }
        if toggled {
            debug!(directive = play_directive, "local play state changed");
            let _ = self.session.send(play_directive, true);
        }
    }

    /// Player unreachable: stop polling and close the session.
    fn player_closed(&self, reason: &str) {
        info!("media player closed: {reason}");
        self.deactivate();
        self.session.player_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_defaults_to_http() {
        assert_eq!(BackendKind::from_config(None), BackendKind::Http);
        assert_eq!(BackendKind::from_config(Some(" RC ")), BackendKind::Rc);
        assert_eq!(BackendKind::from_config(Some("telnet")), BackendKind::Http);
    }

    #[test]
    fn missing_explicit_executable_is_config_error() {
        assert!(matches!(
            validate_executable(Path::new("/nonexistent/vlc")),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            validate_executable(Path::new("bin/vlc-not-here")),
            Err(ClientError::Config(_))
        ));
    }

    #[cfg(not(windows))]
    #[test]
    fn bare_program_name_is_left_to_path_lookup() {
        assert!(validate_executable(Path::new("vlc")).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn build_rejects_missing_player() {
        let (session, _out, _events) = SessionHandle::detached();
        let config = PlayerConfig {
            executable: "/nonexistent/vlc".into(),
            ..PlayerConfig::default()
        };
        assert!(matches!(
            build(&config, session),
            Err(ClientError::Config(_))
        ));
    }
}
