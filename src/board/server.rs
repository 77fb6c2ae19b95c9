use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use super::api::{self, AppState, SharedState};
use super::db::{BoardDb, DbHandle};
use super::models::TableSchema;
use super::service::BoardService;
use super::ws::{self, BoardChannels, DEFAULT_CHANNEL_CAPACITY};
use crate::board_config::{BoardDefinition, GridboardConfig};

/// Configuration for the board server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub channel_capacity: usize,
    /// Table schemas synced into storage before boards are registered.
    pub tables: Vec<TableSchema>,
    pub boards: Vec<BoardDefinition>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            db_path: PathBuf::from(".gridboard/gridboard.db"),
            dev_mode: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            tables: Vec::new(),
            boards: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_config(config: &GridboardConfig) -> Self {
        let toml = &config.toml;
        Self {
            host: toml.server.host.clone(),
            port: toml.port(),
            db_path: config.db_path(),
            dev_mode: toml.server.dev_mode,
            channel_capacity: toml.sync.channel_capacity.max(1),
            tables: toml.tables.clone(),
            boards: toml.boards.clone(),
        }
    }
}

/// Open storage, sync the configured table schemas and register boards.
pub fn open_state(db: BoardDb, config: &ServerConfig) -> Result<SharedState> {
    for table in &config.tables {
        db.upsert_table_schema(table)
            .with_context(|| format!("Failed to store schema for table '{}'", table.name))?;
    }
    let channels = Arc::new(BoardChannels::new(config.channel_capacity));
    let service = BoardService::open(DbHandle::new(db), &config.boards, channels)
        .context("Failed to open board service")?;
    Ok(Arc::new(AppState::new(Arc::new(service))))
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws/boards/{board}", get(ws::ws_handler))
        .with_state(state)
}

/// Start the board server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = BoardDb::new(&config.db_path).context("Failed to initialize board database")?;
    let state = open_state(db, &config)?;
    let boards = state.service.list_boards()?.len();

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, boards, db = %config.db_path.display(), "server started");
    println!("Gridboard running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
