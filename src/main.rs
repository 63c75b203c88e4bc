use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use seatsync::channel::WsSource;
use seatsync::config::{ConfigError, SyncConfig};
use seatsync::model::GuestFilter;
use seatsync::room::{Room, RoomError, RoomView, SurfaceRole};
use seatsync::store::{CanonicalStore, HttpStore, StoreError};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "seatsync", about = "Venue seating layout sync client")]
struct Cli {
    /// Overrides SEATSYNC_BASE_URL. The websocket URL is re-derived unless
    /// SEATSYNC_WS_URL is set.
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, env = "SEATSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join an event and log every reconciled view until interrupted.
    Watch {
        event_id: Uuid,
        /// Join as a check-in surface instead of an editor.
        #[arg(long, default_value_t = false)]
        check_in: bool,
    },
    /// List guests for an event.
    Guests {
        event_id: Uuid,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        checked_in: Option<bool>,
    },
    /// Attendance counters for an event.
    Summary { event_id: Uuid },
    CheckIn { event_id: Uuid, guest_id: Uuid },
    CheckOut { event_id: Uuid, guest_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_owned();
        if std::env::var("SEATSYNC_WS_URL").is_err() {
            config.ws_url = seatsync::config::ws_url(&config.base_url)?;
        }
    }
    if cli.token.is_some() {
        config.token = cli.token;
    }

    let store = Arc::new(HttpStore::from_config(&config)?);
    match cli.command {
        Command::Watch { event_id, check_in } => {
            let role = if check_in { SurfaceRole::CheckIn } else { SurfaceRole::Editor };
            run_watch(config, store, event_id, role).await
        }
        Command::Guests { event_id, search, checked_in } => {
            let filter = GuestFilter { search, checked_in };
            print_json(&store.pull_guests(event_id, &filter).await?)
        }
        Command::Summary { event_id } => print_json(&store.pull_summary(event_id).await?),
        Command::CheckIn { event_id, guest_id } => print_json(&store.check_in(event_id, guest_id).await?),
        Command::CheckOut { event_id, guest_id } => print_json(&store.check_out(event_id, guest_id).await?),
    }
}

async fn run_watch(
    config: SyncConfig,
    store: Arc<HttpStore>,
    event_id: Uuid,
    role: SurfaceRole,
) -> Result<(), CliError> {
    let source = Arc::new(WsSource::from_config(&config));
    let room = Room::spawn(event_id, role, store, source, config);
    tracing::info!(event_id = %room.event_id(), ?role, "watching event");
    let mut views = room.watch();

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                log_view(&view);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(%event_id, "interrupted; leaving event");
                room.close().await?;
                break;
            }
        }
    }
    Ok(())
}

fn log_view(view: &RoomView) {
    tracing::info!(
        revision = view.revision,
        status = ?view.status,
        stale = view.stale,
        tables = view.summary.total_tables,
        seats = view.summary.total_seats,
        assigned = view.summary.assigned_seats,
        guests = view.summary.total_guests,
        checked_in = view.summary.checked_in,
        "view updated"
    );
    if let Some(notice) = &view.last_notice {
        tracing::warn!(code = notice.code, retryable = notice.retryable, "{}", notice.message);
    }
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
