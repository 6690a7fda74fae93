//! HTTP backend: the player's web interface, polled for status and driven by query commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use vlcync_core::protocol::{self, Directive};

use super::{launch, PlaybackController, Shared};
use crate::config::{HttpConfig, PlayerConfig};
use crate::error::ClientError;
use crate::session::SessionHandle;

const PASSWORD_LEN: usize = 32;
const STARTUP_RETRY: Duration = Duration::from_millis(250);

/// The fields of `status.xml` we care about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlayerStatus {
    #[serde(default)]
    pub state: String,
    /// Position in whole seconds.
    #[serde(default)]
    pub time: u64,
}

impl PlayerStatus {
    /// `Some(true)` while playing, `Some(false)` while paused, `None` for any other state
    /// (stopped, opening, buffering).
    pub fn playing(&self) -> Option<bool> {
        match self.state.as_str() {
            "playing" => Some(true),
            "paused" => Some(false),
            _ => None,
        }
    }
}

pub fn parse_status(xml: &str) -> Result<PlayerStatus, ClientError> {
    quick_xml::de::from_str(xml)
        .map_err(|e| ClientError::PlayerProtocol(format!("bad status document: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Status,
    Begin(String),
    TogglePlay,
    Seek(u64),
}

impl Command {
    fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Command::Status => Vec::new(),
            Command::Begin(uri) => vec![("command", "in_play".into()), ("input", uri.clone())],
            Command::TogglePlay => vec![("command", "pl_pause".into())],
            Command::Seek(t) => vec![("command", "seek".into()), ("val", t.to_string())],
        }
    }
}

/// Authenticated access to one player instance's status endpoint.
struct HttpEndpoint {
    client: Client,
    url: String,
    password: String,
}

impl HttpEndpoint {
    /// Issue a command and return the status document that comes back with it.
    async fn request(&self, command: &Command) -> Result<PlayerStatus, ClientError> {
        let mut req = self
            .client
            .get(&self.url)
            .basic_auth("", Some(&self.password));
        let query = command.query();
        if !query.is_empty() {
            req = req.query(&query);
        }
        let body = req
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(classify)?
            .text()
            .await
            .map_err(classify)?;
        parse_status(&body)
    }
}

fn classify(e: reqwest::Error) -> ClientError {
    if e.is_connect() || e.is_timeout() {
        ClientError::PlayerUnreachable(e.to_string())
    } else {
        ClientError::PlayerProtocol(e.to_string())
    }
}

pub struct HttpPlayer {
    executable: PathBuf,
    host: String,
    settings: HttpConfig,
    startup_delay: Duration,
    client: Client,
    url: String,
    /// Set once the player answers under this playback's token.
    endpoint: Mutex<Option<Arc<HttpEndpoint>>>,
    shared: Arc<Shared>,
}

/// Fresh access token for one playback.
fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

impl HttpPlayer {
    pub fn new(config: &PlayerConfig, session: SessionHandle) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.http.request_timeout())
            .build()
            .map_err(|e| ClientError::Config(format!("http client: {e}")))?;
        Ok(Self {
            executable: config.executable.clone(),
            host: config.host.clone(),
            settings: config.http.clone(),
            startup_delay: config.startup_delay(),
            client,
            url: format!(
                "http://{}:{}/requests/status.xml",
                config.host, config.http.port
            ),
            endpoint: Mutex::new(None),
            shared: Arc::new(Shared::new(session)),
        })
    }

    fn new_endpoint(&self) -> Arc<HttpEndpoint> {
        Arc::new(HttpEndpoint {
            client: self.client.clone(),
            url: self.url.clone(),
            password: generate_password(),
        })
    }

    fn launch_args(&self, password: &str) -> Vec<String> {
        vec![
            "--extraintf".to_string(),
            "http".to_string(),
            "--http-host".to_string(),
            self.host.clone(),
            "--http-port".to_string(),
            self.settings.port.to_string(),
            "--http-password".to_string(),
            password.to_string(),
        ]
    }

    /// Poll the status endpoint until it answers or the startup timeout runs out.
    async fn wait_until_reachable(&self, endpoint: &HttpEndpoint) -> Result<(), ClientError> {
        let deadline = Instant::now() + self.settings.startup_timeout();
        loop {
            match endpoint.request(&Command::Status).await {
                Ok(_) => return Ok(()),
                Err(ClientError::PlayerUnreachable(reason)) if Instant::now() < deadline => {
                    debug!("player web interface not up yet: {reason}");
                    sleep(STARTUP_RETRY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn start(&self, endpoint: &HttpEndpoint, path: &Path) -> Result<(), ClientError> {
        launch(&self.executable, &self.launch_args(&endpoint.password))?;
        self.wait_until_reachable(endpoint).await?;
        endpoint.request(&Command::Begin(media_uri(path)?)).await?;
        sleep(self.startup_delay).await;
        Ok(())
    }
}

/// `file://` URI for a local path, resolved against the working directory.
fn media_uri(path: &Path) -> Result<String, ClientError> {
    let absolute = std::path::absolute(path)?;
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|()| ClientError::Config(format!("not a valid media path: {}", path.display())))
}

#[async_trait]
impl PlaybackController for HttpPlayer {
    async fn begin_playback(&self, path: &Path) -> Result<(), ClientError> {
        if !self.shared.try_activate() {
            debug!("playback already active");
            return Ok(());
        }
        let endpoint = self.new_endpoint();
        if let Err(e) = self.start(&endpoint, path).await {
            self.shared.deactivate();
            return Err(e);
        }
        *self.endpoint.lock().await = Some(endpoint.clone());
        self.shared.reset().await;
        tokio::spawn(poll_status(
            self.shared.clone(),
            endpoint,
            self.settings.poll_interval(),
        ));
        Ok(())
    }

    async fn outside_input(&self, directive: &str) -> Result<(), ClientError> {
        if !self.shared.is_active() {
            debug!(directive, "no active playback, ignoring directive");
            return Ok(());
        }
        let Some(endpoint) = self.endpoint.lock().await.clone() else {
            debug!(directive, "player not started yet, ignoring directive");
            return Ok(());
        };
        let command = match Directive::parse(directive)
            .map_err(|e| ClientError::PlayerProtocol(e.to_string()))?
        {
            Directive::Seek(t) => {
                self.shared.state.lock().await.begin_local_seek(t);
                Command::Seek(t)
            }
            Directive::TogglePlay => {
                self.shared.state.lock().await.toggle_local();
                Command::TogglePlay
            }
        };
        endpoint.request(&command).await?;
        Ok(())
    }

    async fn stop(&self) {
        self.shared.deactivate();
    }
}

async fn poll_status(shared: Arc<Shared>, endpoint: Arc<HttpEndpoint>, interval: Duration) {
    while shared.should_poll() {
        match endpoint.request(&Command::Status).await {
            Ok(status) => {
                shared
                    .reconcile(Some(status.time), status.playing(), protocol::TOGGLE_PLAY)
                    .await
            }
            Err(ClientError::PlayerUnreachable(reason)) => {
                shared.player_closed(&reason);
                break;
            }
            Err(e) => warn!("status poll failed: {e}"),
        }
        sleep(interval).await;
    }
    debug!("http poller stopped");
}
