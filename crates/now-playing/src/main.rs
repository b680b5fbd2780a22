//! `moe-now-playing`: prints what LISTEN.moe is playing, live.
//!
//! Connects to the radio gateway, keeps the socket alive, and prints a
//! line for every track change until Ctrl-C.
//!
//! # Env vars
//!
//! | Variable         | Description                                 | Default                        |
//! |------------------|---------------------------------------------|--------------------------------|
//! | `MOE_SOCKET_URL` | Gateway URL, overrides the library's URL    | `wss://listen.moe/gateway_v2`  |
//! | `MOE_TOKEN`      | Bearer token sent in the handshake          | (anonymous)                    |
//! | `RUST_LOG`       | `tracing` filter, overrides `log.filter`    | `info`                         |

mod display;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use moe_domain::config::{Config, ConfigSeverity, Library, LogConfig};
use moe_socket::{ConflatedListener, ConnectionManagerBuilder, StaticToken, WsTransport};
use tracing_subscriber::EnvFilter;

/// Live now-playing feed for LISTEN.moe.
#[derive(Debug, Parser)]
#[command(name = "moe-now-playing", version, about)]
struct Cli {
    /// Path to a TOML config file.  Missing files fall back to defaults.
    #[arg(long, default_value = "moe.toml")]
    config: PathBuf,

    /// Radio library to follow (`jpop` or `kpop`).
    #[arg(long)]
    library: Option<Library>,

    /// Gateway URL; takes precedence over `--library`.
    #[arg(long, env = "MOE_SOCKET_URL")]
    url: Option<String>,

    /// Bearer token for the handshake.
    #[arg(long, env = "MOE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Validate the resolved config and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(library) = cli.library {
        config.socket.library = library;
        config.socket.url = None;
    }
    if let Some(url) = cli.url.clone() {
        config.socket.url = Some(url);
    }
    if cli.json_logs {
        config.log.json = true;
    }

    init_tracing(&config.log);

    log_issues(&config);
    config
        .ensure_valid()
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;
    if cli.check {
        println!("Config OK ({})", cli.config.display());
        return Ok(());
    }

    // ── Build connection manager ─────────────────────────────────────
    let token = cli
        .token
        .filter(|t| !t.trim().is_empty())
        .or_else(|| config.auth.token_from_env());
    let auth = match token {
        Some(token) => StaticToken::new(token).with_prefix(config.auth.token_prefix.clone()),
        None => StaticToken::anonymous(),
    };

    let listener = Arc::new(ConflatedListener::new());
    let mut updates = listener.subscribe();

    let manager = ConnectionManagerBuilder::from_config(&config.socket)
        .transport(Arc::new(WsTransport))
        .auth(auth)
        .listener(&listener)
        .build()?;

    tracing::info!(
        url = %manager.url(),
        library = config.socket.library.as_str(),
        "starting moe-now-playing"
    );
    manager.connect();

    // ── Run ──────────────────────────────────────────────────────────
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = updates.borrow_and_update().clone();
                if let Some(result) = latest {
                    println!("{}", display::render(&result));
                }
            }
        }
    }

    manager.disconnect();
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));

    // Logs go to stderr so stdout carries only the track feed.
    if log.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

fn log_issues(config: &Config) {
    for issue in config.validate() {
        match issue.severity {
            ConfigSeverity::Error => tracing::error!(field = %issue.field, "{}", issue.message),
            ConfigSeverity::Warning => tracing::warn!(field = %issue.field, "{}", issue.message),
        }
    }
}
