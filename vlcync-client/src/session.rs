//! Session controller: receive loop, single writer task, and the foreground user actions.
//! Protocol decisions are made by `SessionCore`; this module only carries them out.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vlcync_core::session::CLIENT_NAME;
use vlcync_core::{digest_file, Algorithm, SessionAction, SessionCodec, SessionCore, VoteState};

use crate::config::{Config, ServerConfig};
use crate::error::ClientError;
use crate::player::{self, PlaybackController};
use crate::transport::{self, ConnectionState, FrameReader, FrameWriter, Received};

/// Everything a front-end needs to render. Subscribe via the receiver returned by `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Chat { from: String, text: String },
    Notice { from: String, text: String },
    /// The relay went away without us asking.
    ConnectionLost,
    /// The session ended because we asked it to.
    Disconnected,
    /// The local media player stopped answering; the session is being closed.
    PlayerClosed,
}

impl SessionEvent {
    pub fn notice(text: impl Into<String>) -> Self {
        SessionEvent::Notice {
            from: CLIENT_NAME.to_string(),
            text: text.into(),
        }
    }
}

#[derive(Debug)]
struct Outbound {
    message: String,
    for_vlc: bool,
}

/// Cloneable link into a live session, shared with the player backend.
#[derive(Clone)]
pub struct SessionHandle {
    outbox: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    disconnect_intent: Arc<AtomicBool>,
}

impl SessionHandle {
    fn new(
        outbox: mpsc::UnboundedSender<Outbound>,
        events: mpsc::UnboundedSender<SessionEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            outbox,
            events,
            state: Arc::new(state),
            disconnect_intent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a message for the relay. Frames are written by one task, in queue order.
    pub fn send(&self, message: impl Into<String>, for_vlc: bool) -> Result<(), ClientError> {
        if self.is_closing() {
            return Err(ClientError::NotConnected);
        }
        self.outbox
            .send(Outbound {
                message: message.into(),
                for_vlc,
            })
            .map_err(|_| ClientError::NotConnected)
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_closing(&self) -> bool {
        self.connection_state().is_closing()
    }

    /// Intentional disconnect. The intent flag is set before the socket is closed so the
    /// receive loop does not report a lost connection.
    pub fn disconnect(&self) {
        self.disconnect_intent.store(true, Ordering::SeqCst);
        self.state.send_if_modified(|s| {
            if s.is_closing() {
                return false;
            }
            *s = ConnectionState::Disconnecting;
            true
        });
    }

    /// The local player went away: tell the front-end and close the session. No retry.
    pub fn player_closed(&self) {
        self.emit(SessionEvent::PlayerClosed);
        self.disconnect();
    }

    pub fn disconnect_intended(&self) -> bool {
        self.disconnect_intent.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
impl SessionHandle {
    /// A connected handle with no socket behind it; outbound messages land in the returned receiver.
    pub(crate) fn detached() -> (
        Self,
        mpsc::UnboundedReceiver<(String, bool)>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        let (flat_tx, flat_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(o) = out_rx.recv().await {
                let _ = flat_tx.send((o.message, o.for_vlc));
            }
        });
        (Self::new(out_tx, ev_tx, state_tx), flat_rx, ev_rx)
    }
}

/// Resolves once the session starts closing (or the state channel is gone).
async fn closing(state: &mut watch::Receiver<ConnectionState>) {
    loop {
        let is_closing = state.borrow_and_update().is_closing();
        if is_closing || state.changed().await.is_err() {
            return;
        }
    }
}

/// One live relay session. Dropped state (votes, selection) does not carry over to the next.
pub struct Session {
    handle: SessionHandle,
    core: Arc<Mutex<SessionCore>>,
    player: Arc<dyn PlaybackController>,
    algorithm: Algorithm,
    receiver: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    /// Connect to the configured relay with the configured player backend.
    pub async fn connect(
        config: &Config,
        username: &str,
        password: &str,
    ) -> Result<(Session, mpsc::UnboundedReceiver<SessionEvent>), ClientError> {
        let player_config = config.player.clone();
        Self::connect_with(
            &config.server,
            username,
            password,
            config.hash.algorithm(),
            move |handle| player::build(&player_config, handle),
        )
        .await
    }

    /// Connect with a caller-supplied player backend.
    pub async fn connect_with<F>(
        server: &ServerConfig,
        username: &str,
        password: &str,
        algorithm: Algorithm,
        make_player: F,
    ) -> Result<(Session, mpsc::UnboundedReceiver<SessionEvent>), ClientError>
    where
        F: FnOnce(SessionHandle) -> Result<Arc<dyn PlaybackController>, ClientError>,
    {
        let codec = Arc::new(
            SessionCodec::from_password(password)
                .map_err(|e| ClientError::Config(format!("session key: {e}")))?,
        );
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let conn = match tokio::time::timeout(
            server.handshake_timeout(),
            transport::connect(&server.addr, username, codec, &state_tx),
        )
        .await
        {
            Ok(conn) => conn?,
            Err(_) => {
                state_tx.send_replace(ConnectionState::Disconnected);
                return Err(ClientError::Handshake(
                    "timed out waiting for the relay".to_string(),
                ));
            }
        };

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(out_tx, ev_tx, state_tx);
        let player = match make_player(handle.clone()) {
            Ok(player) => player,
            Err(e) => {
                handle.state.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        let core = Arc::new(Mutex::new(SessionCore::new()));

        handle.emit(SessionEvent::Chat {
            from: conn.welcome.username,
            text: conn.welcome.message,
        });

        let writer = tokio::spawn(run_writer(conn.writer, out_rx, handle.subscribe()));
        let receiver = tokio::spawn(run_receiver(
            conn.reader,
            core.clone(),
            player.clone(),
            handle.clone(),
        ));

        Ok((
            Session {
                handle,
                core,
                player,
                algorithm,
                receiver,
                writer,
            },
            ev_rx,
        ))
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.handle.subscribe()
    }

    pub async fn vote_state(&self) -> VoteState {
        self.core.lock().await.vote_state()
    }

    /// Digest the file and announce it to the relay.
    pub async fn select_media(&self, path: impl Into<PathBuf>) -> Result<(), ClientError> {
        let path = path.into();
        let target = path.clone();
        let algorithm = self.algorithm;
        let digest = tokio::task::spawn_blocking(move || digest_file(&target, algorithm))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let digest = match digest {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %path.display(), "could not hash file: {e}");
                self.handle
                    .emit(SessionEvent::notice(format!("Could not read {}: {e}", path.display())));
                return Err(e.into());
            }
        };
        debug!(path = %path.display(), %digest, "hashed selected file");
        self.select_media_with_digest(path, &digest).await
    }

    /// Announce a file whose digest the caller already computed.
    pub async fn select_media_with_digest(
        &self,
        path: PathBuf,
        digest: &str,
    ) -> Result<(), ClientError> {
        info!(path = %path.display(), "selected file");
        let actions = self.core.lock().await.on_file_selected(path, digest);
        dispatch(actions, self.player.as_ref(), &self.handle).await;
        Ok(())
    }

    pub async fn toggle_vote(&self) {
        let actions = self.core.lock().await.toggle_vote();
        dispatch(actions, self.player.as_ref(), &self.handle).await;
    }

    pub fn send_chat(&self, text: &str) -> Result<(), ClientError> {
        self.handle.send(text, false)
    }

    /// Intentional disconnect. Returns once the receive loop has fully exited, so a new
    /// session can be started without a stale loop racing it.
    pub async fn disconnect(self) {
        self.handle.disconnect();
        self.join().await;
        info!("safely disconnected from relay");
    }

    /// Wait for the session to end on its own (lost connection or player closed).
    pub async fn closed(self) {
        self.join().await;
    }

    async fn join(self) {
        if let Err(e) = self.receiver.await {
            error!("receive loop panicked: {e}");
        }
        if let Err(e) = self.writer.await {
            error!("writer task panicked: {e}");
        }
    }
}

/// Carry out core actions. Failures become notices; they never end the session.
async fn dispatch(
    actions: Vec<SessionAction>,
    player: &dyn PlaybackController,
    handle: &SessionHandle,
) {
    for action in actions {
        let result = match action {
            SessionAction::Send { message, for_vlc } => handle.send(message, for_vlc),
            SessionAction::Chat { from, text } => {
                handle.emit(SessionEvent::Chat { from, text });
                Ok(())
            }
            SessionAction::Notice { from, text } => {
                handle.emit(SessionEvent::Notice { from, text });
                Ok(())
            }
            SessionAction::BeginPlayback(path) => player.begin_playback(&path).await,
            SessionAction::ForwardToPlayer(directive) => player.outside_input(&directive).await,
        };
        if let Err(e) = result {
            warn!("could not handle session action: {e}");
            handle.emit(SessionEvent::notice(e.to_string()));
        }
    }
}

async fn run_receiver(
    mut reader: FrameReader,
    core: Arc<Mutex<SessionCore>>,
    player: Arc<dyn PlaybackController>,
    handle: SessionHandle,
) {
    let mut state = handle.subscribe();
    loop {
        let received = tokio::select! {
            r = reader.receive() => r,
            _ = closing(&mut state) => break,
        };
        match received {
            Ok(Received::Retry) => continue,
            Ok(Received::Closed) => {
                info!("relay closed the connection");
                break;
            }
            Ok(Received::Packet(packet)) => {
                info!(from = %packet.username, for_vlc = packet.for_vlc, "received => {}", packet.message);
                let actions = core.lock().await.on_packet(packet);
                dispatch(actions, player.as_ref(), &handle).await;
            }
            Err(e) => {
                error!("receive failed: {e}");
                break;
            }
        }
    }

    player.stop().await;
    if handle.disconnect_intended() {
        handle.state.send_replace(ConnectionState::Disconnected);
        handle.emit(SessionEvent::Disconnected);
    } else {
        error!("connection lost");
        handle.state.send_replace(ConnectionState::Lost);
        handle.emit(SessionEvent::ConnectionLost);
        handle.state.send_replace(ConnectionState::Disconnected);
    }
}

async fn run_writer(
    mut writer: FrameWriter,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
    mut state: watch::Receiver<ConnectionState>,
) {
    loop {
        let next = tokio::select! {
            next = outbox.recv() => next,
            _ = closing(&mut state) => break,
        };
        let Some(out) = next else { break };
        debug!(for_vlc = out.for_vlc, "sending => {}", out.message);
        if let Err(e) = writer.send(&out.message, out.for_vlc).await {
            error!("send failed: {e}");
            writer.shutdown().await;
            return;
        }
    }
    // Flush whatever was queued before the disconnect.
    while let Ok(out) = outbox.try_recv() {
        if let Err(e) = writer.send(&out.message, out.for_vlc).await {
            debug!("dropping queued message after close: {e}");
            break;
        }
    }
    writer.shutdown().await;
    debug!("writer task ended");
}
