//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vlcync_core::Algorithm;

use crate::player::BackendKind;

/// Client configuration. File: ~/.config/vlcync/config.toml or /etc/vlcync/config.toml.
/// Env overrides: VLCYNC_SERVER, VLCYNC_USERNAME, VLCYNC_BACKEND, VLCYNC_PLAYER.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub hash: HashConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Relay address as host:port (default 127.0.0.1:42000).
    #[serde(default = "default_server_addr")]
    pub addr: String,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    #[serde(default = "default_username")]
    pub username: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashConfig {
    /// crc32, md5, sha1 or sha256; anything else means crc32.
    #[serde(default)]
    pub algorithm: Option<String>,
}

/// Local media player settings shared by both backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerConfig {
    /// "rc" or "http" (default http).
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    /// Loopback address the player's control interface binds to.
    #[serde(default = "default_player_host")]
    pub host: String,
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    #[serde(default)]
    pub rc: RcConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RcConfig {
    #[serde(default = "default_player_port")]
    pub port: u16,
    /// Silence after which a reply is considered complete.
    #[serde(default = "default_rc_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_rc_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_rc_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_player_port")]
    pub port: u16,
    #[serde(default = "default_http_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_http_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long to wait for the HTTP interface to come up after launch.
    #[serde(default = "default_http_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

fn default_server_addr() -> String {
    "127.0.0.1:42000".to_string()
}
fn default_handshake_timeout_ms() -> u64 {
    10_000
}
fn default_username() -> String {
    "new_user".to_string()
}
fn default_executable() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Program Files\VideoLAN\VLC\vlc.exe")
    } else {
        PathBuf::from("vlc")
    }
}
fn default_player_host() -> String {
    "127.0.0.1".to_string()
}
fn default_startup_delay_ms() -> u64 {
    2_000
}
fn default_player_port() -> u16 {
    44500
}
fn default_rc_read_timeout_ms() -> u64 {
    50
}
fn default_rc_poll_interval_ms() -> u64 {
    1_000
}
fn default_rc_connect_timeout_ms() -> u64 {
    1_000
}
fn default_http_request_timeout_ms() -> u64 {
    1_000
}
fn default_http_poll_interval_ms() -> u64 {
    750
}
fn default_http_startup_timeout_ms() -> u64 {
    10_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            backend: None,
            executable: default_executable(),
            host: default_player_host(),
            startup_delay_ms: default_startup_delay_ms(),
            rc: RcConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for RcConfig {
    fn default() -> Self {
        Self {
            port: default_player_port(),
            read_timeout_ms: default_rc_read_timeout_ms(),
            poll_interval_ms: default_rc_poll_interval_ms(),
            connect_timeout_ms: default_rc_connect_timeout_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_player_port(),
            request_timeout_ms: default_http_request_timeout_ms(),
            poll_interval_ms: default_http_poll_interval_ms(),
            startup_timeout_ms: default_http_startup_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl HashConfig {
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl PlayerConfig {
    pub fn backend(&self) -> BackendKind {
        BackendKind::from_config(self.backend.as_deref())
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

impl RcConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Load config: merge default, then config file (explicit path or first one found), then env vars.
pub fn load(explicit: Option<&Path>) -> Config {
    let mut c = load_file(explicit).unwrap_or_default();
    if let Ok(s) = std::env::var("VLCYNC_SERVER") {
        c.server.addr = s;
    }
    if let Ok(s) = std::env::var("VLCYNC_USERNAME") {
        c.user.username = s;
    }
    if let Ok(s) = std::env::var("VLCYNC_BACKEND") {
        c.player.backend = Some(s);
    }
    if let Ok(s) = std::env::var("VLCYNC_PLAYER") {
        c.player.executable = PathBuf::from(s);
    }
    c
}

fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(p) = explicit {
        return vec![p.to_path_buf()];
    }
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/vlcync/config.toml"));
    }
    out.push(PathBuf::from("/etc/vlcync/config.toml"));
    out
}

fn load_file(explicit: Option<&Path>) -> Option<Config> {
    for p in config_paths(explicit) {
        if p.exists() {
            match std::fs::read_to_string(&p).map(|s| toml::from_str::<Config>(&s)) {
                Ok(Ok(c)) => {
                    tracing::debug!(path = %p.display(), "loaded config");
                    return Some(c);
                }
                Ok(Err(e)) => tracing::warn!(path = %p.display(), "invalid config, using defaults: {e}"),
                Err(e) => tracing::warn!(path = %p.display(), "unreadable config, using defaults: {e}"),
            }
            break;
        }
    }
    None
}
