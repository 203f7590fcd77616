mod remote;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use presence::identity::{MemorySessionStorage, SessionStorage};
use presence::pointer::InputEvent;
use presence::publisher::Publisher;
use presence::render::{Viewport, render};
use presence::store::RealtimeStore;
use presence::subscriber::CursorFeed;
use presence::{PresenceConfig, PresenceSession};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::remote::RemoteStore;
use crate::storage::JsonFileStorage;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    #[error("timed out waiting for websocket frame")]
    Timeout,
    #[error("health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error("could not subscribe to `{0}`")]
    SubscribeFailed(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "cursorcast-cli", about = "Shared-cursor participant for a cursorcast server")]
struct Cli {
    #[arg(long, env = "CURSORCAST_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    /// Keep the participant id in this file across runs.
    #[arg(long, env = "CURSORCAST_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the server is up.
    Ping,
    /// Print the remote cursors visible in a viewport, one JSON line per update.
    Watch(WatchArgs),
    /// Move a cursor around a circle.
    Wander(WanderArgs),
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[arg(long, default_value_t = 1280.0)]
    width: f64,
    #[arg(long, default_value_t = 800.0)]
    height: f64,
    #[arg(long, default_value_t = 0.0)]
    scroll_x: f64,
    #[arg(long, default_value_t = 0.0)]
    scroll_y: f64,
    /// Exit after the first snapshot.
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[derive(Args, Debug)]
struct WanderArgs {
    /// Seconds to move before leaving.
    #[arg(long, default_value_t = 10.0)]
    duration: f64,
    /// Pointer events per second. Anything above ~60 gets coalesced.
    #[arg(long, default_value_t = 120.0)]
    hz: f64,
    #[arg(long, default_value_t = 400.0)]
    center_x: f64,
    #[arg(long, default_value_t = 300.0)]
    center_y: f64,
    #[arg(long, default_value_t = 150.0)]
    radius: f64,
    /// Drop the socket without clearing the record, like a crashed tab.
    #[arg(long, default_value_t = false)]
    abrupt: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let storage: Box<dyn SessionStorage> = match &cli.session_file {
        Some(path) => Box::new(JsonFileStorage::new(path)),
        None => Box::new(MemorySessionStorage::new()),
    };

    match cli.command {
        Command::Ping => run_ping(&cli.base_url).await,
        Command::Watch(args) => run_watch(&cli.base_url, storage.as_ref(), args).await,
        Command::Wander(args) => run_wander(&cli.base_url, storage.as_ref(), args).await,
    }
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn open_session(base_url: &str, storage: &dyn SessionStorage) -> Result<PresenceSession, CliError> {
    let store = RemoteStore::connect(&ws_url(base_url)?).await?;
    let connection_id = store.connection_id();
    let store: Arc<dyn RealtimeStore> = Arc::new(store);
    let session = PresenceSession::open(storage, store, PresenceConfig::from_env());
    info!(participant = %session.participant(), ?connection_id, "cli: session open");
    Ok(session)
}

async fn run_watch(base_url: &str, storage: &dyn SessionStorage, args: WatchArgs) -> Result<(), CliError> {
    let session = open_session(base_url, storage).await?;
    let mut feed = CursorFeed::open(&session).await;
    if !feed.is_live() {
        return Err(CliError::SubscribeFailed(session.config().collection.clone()));
    }

    let mut viewport = Viewport::new(args.width, args.height);
    viewport.on_scroll(args.scroll_x, args.scroll_y);
    let margin = session.config().viewport_margin;

    while let Some(visible) = feed.next_update().await {
        let markers = render(visible, &viewport, margin);
        println!("{}", serde_json::to_string(&markers)?);
        if args.once {
            break;
        }
    }
    feed.close();
    Ok(())
}

async fn run_wander(base_url: &str, storage: &dyn SessionStorage, args: WanderArgs) -> Result<(), CliError> {
    let mut session = open_session(base_url, storage).await?;
    let (tx, rx) = mpsc::channel(256);
    let publisher = Publisher::new(&mut session);

    if args.abrupt {
        // Dropping the publisher mid-run skips the graceful clear.
        tokio::select! {
            () = publisher.run(rx) => {}
            () = wander(tx, &args) => {}
        }
        warn!("cli: leaving without clearing, the server removes the record");
    } else {
        // Closing the channel makes the publisher clear the record.
        tokio::join!(publisher.run(rx), wander(tx, &args));
        info!("cli: record cleared");
    }
    Ok(())
}

/// Feed pointer moves along a circle, one lap every four seconds.
async fn wander(tx: mpsc::Sender<InputEvent>, args: &WanderArgs) {
    let hz = args.hz.clamp(1.0, 1000.0);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / hz));
    let started = tokio::time::Instant::now();
    let duration = Duration::from_secs_f64(args.duration.max(0.0));

    while started.elapsed() < duration {
        ticker.tick().await;
        let (x, y) = circle_point(args, started.elapsed().as_secs_f64());
        if tx.send(InputEvent::pointer_at_page(x, y)).await.is_err() {
            break;
        }
    }
}

fn circle_point(args: &WanderArgs, elapsed_secs: f64) -> (f64, f64) {
    let angle = elapsed_secs / 4.0 * std::f64::consts::TAU;
    (args.center_x + args.radius * angle.cos(), args.center_y + args.radius * angle.sin())
}

fn ws_url(base_url: &str) -> Result<String, CliError> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws"));
    }

    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}
