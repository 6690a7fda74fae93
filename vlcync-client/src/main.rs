// VLCync terminal client: join a relay session, pick a file, vote, watch in sync.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use vlcync_client::{config, player, Session, SessionEvent};

#[derive(Parser, Debug)]
#[command(name = "vlcync", version, about = "Watch local media in sync through a relay")]
struct Cli {
    /// Config file (default: ~/.config/vlcync/config.toml, then /etc/vlcync/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Relay address as host:port
    #[arg(short, long)]
    server: Option<String>,
    #[arg(short, long)]
    username: Option<String>,
    /// Shared session password
    #[arg(short, long, env = "VLCYNC_PASSWORD", hide_env_values = true)]
    password: String,
    /// Player backend: rc or http
    #[arg(long)]
    backend: Option<String>,
    /// Media player executable
    #[arg(long)]
    player: Option<PathBuf>,
}

enum Ending {
    Quit,
    Closed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref());
    if let Some(server) = cli.server {
        cfg.server.addr = server;
    }
    if let Some(username) = cli.username {
        cfg.user.username = username;
    }
    if let Some(backend) = cli.backend {
        cfg.player.backend = Some(backend);
    }
    if let Some(executable) = cli.player {
        cfg.player.executable = executable;
    }
    player::validate_executable(&cfg.player.executable)?;

    let username = cfg.user.username.clone();
    let (session, mut events) = Session::connect(&cfg, &username, &cli.password)
        .await
        .with_context(|| format!("could not join relay at {}", cfg.server.addr))?;
    println!("Commands: /select <file>, /vote, /quit. Anything else is sent as chat.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut lost = false;

    let ending = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Chat { from, text }) | Some(SessionEvent::Notice { from, text }) => {
                    println!("{from}: {text}");
                }
                Some(SessionEvent::PlayerClosed) => println!("Media player closed, leaving the session."),
                Some(SessionEvent::ConnectionLost) => {
                    lost = true;
                    break Ending::Closed;
                }
                Some(SessionEvent::Disconnected) | None => break Ending::Closed,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break Ending::Quit };
                let line = line.trim();
                if line == "/quit" {
                    break Ending::Quit;
                } else if line == "/vote" {
                    session.toggle_vote().await;
                } else if let Some(path) = line.strip_prefix("/select ") {
                    if let Err(e) = session.select_media(path.trim()).await {
                        eprintln!("{e}");
                    }
                } else if !line.is_empty() {
                    if let Err(e) = session.send_chat(line) {
                        eprintln!("{e}");
                    }
                }
            }
            r = &mut shutdown => {
                r?;
                break Ending::Quit;
            }
        }
    };

    match ending {
        Ending::Quit => session.disconnect().await,
        Ending::Closed => session.closed().await,
    }
    if lost {
        bail!("connection to relay lost");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
