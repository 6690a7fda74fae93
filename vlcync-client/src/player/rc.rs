//! Line-protocol backend: one short-lived loopback TCP connection per command.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use vlcync_core::protocol::{self, Directive};

use super::{launch, PlaybackController, Shared};
use crate::config::{PlayerConfig, RcConfig};
use crate::error::ClientError;
use crate::session::SessionHandle;

/// One meaningful line of player output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcObservation {
    /// Current position in seconds.
    Position(u64),
    /// Play (true) or pause (false) reported by a status change line.
    PlayState(bool),
}

pub struct RcPlayer {
    executable: PathBuf,
    addr: String,
    settings: RcConfig,
    startup_delay: Duration,
    shared: Arc<Shared>,
}

impl RcPlayer {
    pub fn new(config: &PlayerConfig, session: SessionHandle) -> Self {
        Self {
            executable: config.executable.clone(),
            addr: format!("{}:{}", config.host, config.rc.port),
            settings: config.rc.clone(),
            startup_delay: config.startup_delay(),
            shared: Arc::new(Shared::new(session)),
        }
    }

    fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            "--extraintf".to_string(),
            "rc".to_string(),
            "--rc-host".to_string(),
            self.addr.clone(),
        ];
        if cfg!(windows) {
            args.push("--rc-quiet".to_string());
        }
        args
    }

    async fn transceive(&self, command: &str) -> Result<String, ClientError> {
        transceive(&self.addr, command, &self.settings).await
    }
}

#[async_trait]
impl PlaybackController for RcPlayer {
    async fn begin_playback(&self, path: &Path) -> Result<(), ClientError> {
        if !self.shared.try_activate() {
            debug!("playback already active");
            return Ok(());
        }
        let started = async {
            launch(&self.executable, &self.launch_args())?;
            sleep(self.startup_delay).await;
            self.transceive(&format!("add {}", path.display())).await?;
            Ok::<_, ClientError>(())
        }
        .await;
        if let Err(e) = started {
            self.shared.deactivate();
            return Err(e);
        }

        self.shared.reset().await;
        tokio::spawn(poll_status(
            self.shared.clone(),
            self.addr.clone(),
            self.settings.clone(),
        ));
        Ok(())
    }

    async fn outside_input(&self, directive: &str) -> Result<(), ClientError> {
        if !self.shared.is_active() {
            debug!(directive, "no active playback, ignoring directive");
            return Ok(());
        }
        match Directive::parse(directive).map_err(|e| ClientError::PlayerProtocol(e.to_string()))? {
            Directive::Seek(t) => {
                self.shared.state.lock().await.begin_local_seek(t);
                self.transceive(&protocol::seek(t)).await?;
            }
            Directive::TogglePlay => {
                self.shared.state.lock().await.toggle_local();
                self.transceive(protocol::PAUSE).await?;
            }
        }
        Ok(())
    }

    async fn stop(&self) {
        self.shared.deactivate();
    }
}

/// Sample position every poll interval until playback stops or the player goes away.
async fn poll_status(shared: Arc<Shared>, addr: String, settings: RcConfig) {
    while shared.should_poll() {
        match transceive(&addr, "get_time", &settings).await {
            Ok(raw) => {
                for observation in parse_status(&raw) {
                    match observation {
                        RcObservation::Position(t) => {
                            shared.reconcile(Some(t), None, protocol::PAUSE).await
                        }
                        RcObservation::PlayState(p) => {
                            shared.reconcile(None, Some(p), protocol::PAUSE).await
                        }
                    }
                }
            }
            Err(ClientError::PlayerUnreachable(reason)) => {
                shared.player_closed(&reason);
                break;
            }
            Err(e) => warn!("status poll failed: {e}"),
        }
        sleep(settings.poll_interval()).await;
    }
    debug!("rc poller stopped");
}

/// Send one command line and collect the reply until the player goes quiet.
async fn transceive(addr: &str, command: &str, settings: &RcConfig) -> Result<String, ClientError> {
    let unreachable = |e: std::io::Error| ClientError::PlayerUnreachable(format!("{addr}: {e}"));
    let mut stream = match timeout(settings.connect_timeout(), TcpStream::connect(addr)).await {
        Ok(s) => s.map_err(unreachable)?,
        Err(_) => {
            return Err(ClientError::PlayerUnreachable(format!(
                "{addr}: connect timed out"
            )))
        }
    };
    stream
        .write_all(format!("{command}\n").as_bytes())
        .await
        .map_err(unreachable)?;

    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match timeout(settings.read_timeout(), stream.read(&mut buf)).await {
            Err(_) | Ok(Ok(0)) => break,
            Ok(Ok(n)) => response.extend_from_slice(&buf[..n]),
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                continue
            }
            Ok(Err(e)) => return Err(unreachable(e)),
        }
    }
    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// Extract positions and play-state changes from a reply. A trailing line without a
/// terminator is incomplete and ignored.
pub fn parse_status(raw: &str) -> Vec<RcObservation> {
    let complete = match raw.rfind('\n') {
        Some(i) => &raw[..=i],
        None => return Vec::new(),
    };
    complete
        .lines()
        .filter_map(|line| {
            let line = line.trim_start_matches('>').trim();
            if line.contains("status change") {
                if line.contains("pause") {
                    Some(RcObservation::PlayState(false))
                } else if line.contains("play") {
                    Some(RcObservation::PlayState(true))
                } else {
                    None
                }
            } else if !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit()) {
                line.parse().ok().map(RcObservation::Position)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionEvent;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn settings() -> RcConfig {
        RcConfig {
            port: 0,
            read_timeout_ms: 20,
            poll_interval_ms: 5,
            connect_timeout_ms: 200,
        }
    }

    /// Fake control port answering each `get_time` with the next scripted reply.
    async fn fake_rc(replies: Vec<&'static str>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut replies = replies.into_iter();
            loop {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 256];
                let n = sock.read(&mut buf).await.unwrap();
                let _ = cmd_tx.send(String::from_utf8_lossy(&buf[..n]).trim().to_string());
                match replies.next() {
                    Some(r) => sock.write_all(r.as_bytes()).await.unwrap(),
                    // Script exhausted: simulate the player exiting.
                    None => return,
                }
            }
        });
        (addr, cmd_rx)
    }

    #[test]
    fn parse_positions_and_state() {
        let raw = "12\r\nstatus change: ( pause state: 4 )\r\n13\r\nstatus change: ( play state: 3 )\r\n";
        assert_eq!(
            parse_status(raw),
            vec![
                RcObservation::Position(12),
                RcObservation::PlayState(false),
                RcObservation::Position(13),
                RcObservation::PlayState(true),
            ]
        );
    }

    #[test]
    fn parse_ignores_partial_and_noise() {
        assert_eq!(parse_status("> 42\r\nfoo\r\n4"), vec![RcObservation::Position(42)]);
        assert!(parse_status("17").is_empty());
        assert!(parse_status("status change: ( new input: file:///a.mkv )\n").is_empty());
    }

    #[tokio::test]
    async fn transceive_collects_reply() {
        let (addr, mut cmds) = fake_rc(vec!["10\r\n"]).await;
        let reply = transceive(&addr, "get_time", &settings()).await.unwrap();
        assert_eq!(reply, "10\r\n");
        assert_eq!(cmds.recv().await.unwrap(), "get_time");
    }

    #[tokio::test]
    async fn refused_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(
            transceive(&addr, "get_time", &settings()).await,
            Err(ClientError::PlayerUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn poller_broadcasts_jump_and_pause_then_closes() {
        let (addr, _cmds) = fake_rc(vec![
            "10\r\n",
            "11\r\n",
            "40\r\n",
            "41\r\nstatus change: ( pause state: 4 )\r\n",
            "41\r\n",
        ])
        .await;
        let (session, mut out, mut events) = SessionHandle::detached();
        let shared = Arc::new(Shared::new(session.clone()));
        assert!(shared.try_activate());
        shared.reset().await;
        shared.state.lock().await.observe_position(10);

        poll_status(shared.clone(), addr, settings()).await;

        assert_eq!(out.recv().await.unwrap(), ("seek 40".to_string(), true));
        assert_eq!(out.recv().await.unwrap(), ("pause".to_string(), true));
        assert!(out.try_recv().is_err());
        assert_eq!(events.recv().await, Some(SessionEvent::PlayerClosed));
        assert!(!shared.is_active());
        assert!(session.disconnect_intended());
    }

    #[tokio::test]
    async fn peer_seek_is_not_echoed() {
        let (addr, mut cmds) = fake_rc(vec!["", "", "120\r\n", "121\r\n"]).await;
        let (session, mut out, _events) = SessionHandle::detached();
        let config = PlayerConfig {
            rc: settings(),
            ..PlayerConfig::default()
        };
        let mut player = RcPlayer::new(&config, session);
        player.addr = addr.clone();
        assert!(player.shared.try_activate());
        player.shared.reset().await;

        player.outside_input("seek 120").await.unwrap();
        assert_eq!(cmds.recv().await.unwrap(), "seek 120");
        assert!(player.shared.state.lock().await.is_position_volatile());
        player.outside_input("pause").await.unwrap();
        assert_eq!(cmds.recv().await.unwrap(), "pause");

        poll_status(player.shared.clone(), addr, settings()).await;
        let sent: Vec<_> = std::iter::from_fn(|| out.try_recv().ok()).collect();
        assert!(sent.is_empty(), "unexpected broadcasts: {sent:?}");
    }

    #[tokio::test]
    async fn directives_ignored_before_playback() {
        let (session, _out, _events) = SessionHandle::detached();
        let player = RcPlayer::new(&PlayerConfig::default(), session);
        player.outside_input("seek 5").await.unwrap();
        assert!(!player.shared.state.lock().await.is_position_volatile());
    }

    #[tokio::test]
    async fn launch_args_expose_control_port() {
        let (session, _out, _events) = SessionHandle::detached();
        let player = RcPlayer::new(&PlayerConfig::default(), session);
        let args = player.launch_args();
        assert_eq!(&args[..4], ["--extraintf", "rc", "--rc-host", "127.0.0.1:44500"]);
    }

    fn launchable(addr: &str, session: SessionHandle) -> RcPlayer {
        let config = PlayerConfig {
            executable: PathBuf::from("/bin/true"),
            startup_delay_ms: 0,
            rc: settings(),
            ..PlayerConfig::default()
        };
        let mut player = RcPlayer::new(&config, session);
        player.addr = addr.to_string();
        player
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn begin_playback_adds_file_once() {
        let mut script = vec![""];
        script.extend(std::iter::repeat("0\r\n").take(200));
        let (addr, mut cmds) = fake_rc(script).await;
        let (session, _out, _events) = SessionHandle::detached();
        let player = launchable(&addr, session);

        player.begin_playback(Path::new("/media/a.mkv")).await.unwrap();
        assert!(player.shared.is_active());
        assert_eq!(cmds.recv().await.unwrap(), "add /media/a.mkv");

        player.begin_playback(Path::new("/media/b.mkv")).await.unwrap();
        player.stop().await;
        sleep(Duration::from_millis(50)).await;
        let rest: Vec<String> = std::iter::from_fn(|| cmds.try_recv().ok()).collect();
        assert!(rest.iter().all(|c| c == "get_time"), "unexpected commands: {rest:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_start_releases_playback_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let (session, _out, _events) = SessionHandle::detached();
        let player = launchable(&addr, session);

        let err = player.begin_playback(Path::new("/media/a.mkv")).await;
        assert!(matches!(err, Err(ClientError::PlayerUnreachable(_))));
        assert!(!player.shared.is_active());
    }

    #[tokio::test]
    async fn missing_executable_fails_launch() {
        let (session, _out, _events) = SessionHandle::detached();
        let config = PlayerConfig {
            executable: PathBuf::from("/nonexistent/vlc"),
            startup_delay_ms: 0,
            rc: settings(),
            ..PlayerConfig::default()
        };
        let player = RcPlayer::new(&config, session);
        let err = player.begin_playback(Path::new("/media/a.mkv")).await;
        assert!(matches!(err, Err(ClientError::Config(_))));
        assert!(!player.shared.is_active());
    }
}
