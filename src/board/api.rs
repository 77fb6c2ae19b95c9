use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::grouping::GroupingState;
use super::models::{Axis, GroupKey, ItemId, OrderRecord};
use super::service::{BoardService, MoveRequest};
use super::viewer::OrderUpdate;
use super::ws::BoardChannels;
use crate::board_config::{BoardDefinition, PUBLIC_ROLE};
use crate::errors::BoardError;

/// Request header carrying the caller's role. Lower is more privileged.
pub const ROLE_HEADER: &str = "x-gridboard-role";
/// Request header carrying the caller's session origin.
pub const ORIGIN_HEADER: &str = "x-gridboard-origin";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub service: Arc<BoardService>,
    pub channels: Arc<BoardChannels>,
}

impl AppState {
    pub fn new(service: Arc<BoardService>) -> Self {
        let channels = service.channels().clone();
        Self { service, channels }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct GridQuery {
    /// Pin the swimlane path's first segment to this value.
    pub swimlane: Option<String>,
    /// Comma-separated list of columns to show.
    pub columns: Option<String>,
}

impl GridQuery {
    fn into_state(self) -> GroupingState {
        GroupingState {
            restrict_columns: self
                .columns
                .map(|c| c.split(',').map(GroupKey::parse_lenient).collect()),
            swimlane_scope: self.swimlane.map(|s| GroupKey::parse_lenient(&s)),
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Conflict(String),
    Unprocessable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        let msg = err.to_string();
        match err {
            BoardError::BoardNotFound { .. } | BoardError::ItemNotFound { .. } => {
                ApiError::NotFound(msg)
            }
            BoardError::BadRequest(_) | BoardError::StaleTarget { .. } => ApiError::BadRequest(msg),
            BoardError::Unauthorized { .. } => ApiError::Forbidden(msg),
            BoardError::MutationInFlight => ApiError::Conflict(msg),
            BoardError::Configuration(_) | BoardError::InvalidJoinPath { .. } => {
                ApiError::Unprocessable(msg)
            }
            BoardError::TransientSync(_) | BoardError::Database(_) | BoardError::Other(_) => {
                tracing::error!(error = %msg, "request failed");
                ApiError::Internal(msg)
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/boards", get(list_boards))
        .route("/api/boards/{board}", get(get_board))
        .route("/api/boards/{board}/config", put(configure_board))
        .route("/api/boards/{board}/grid", get(get_grid))
        .route("/api/boards/{board}/data", get(get_data))
        .route("/api/boards/{board}/orders", get(get_orders))
        .route("/api/boards/{board}/orders/{axis}", put(set_order))
        .route("/api/boards/{board}/move", post(move_item))
        .route("/api/boards/{board}/items", post(create_item))
        .route(
            "/api/boards/{board}/items/{id}",
            patch(update_item).delete(delete_item),
        )
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Role from the request headers; public when absent.
fn role_of(headers: &HeaderMap) -> Result<u8, ApiError> {
    match headers.get(ROLE_HEADER) {
        None => Ok(PUBLIC_ROLE),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u8>().ok())
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid {} header", ROLE_HEADER))),
    }
}

fn origin_of(headers: &HeaderMap) -> Result<Option<Uuid>, ApiError> {
    match headers.get(ORIGIN_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid {} header", ORIGIN_HEADER))),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_boards(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.list_boards()?))
}

async fn get_board(
    State(state): State<SharedState>,
    Path(board): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.board_info(&board)?))
}

async fn configure_board(
    State(state): State<SharedState>,
    Path(board): Path<String>,
    headers: HeaderMap,
    Json(mut definition): Json<BoardDefinition>,
) -> Result<impl IntoResponse, ApiError> {
    let role = role_of(&headers)?;
    let origin = origin_of(&headers)?;
    definition.name = board.clone();
    state.service.configure_board(role, definition, origin).await?;
    Ok(Json(state.service.board_info(&board)?))
}

async fn get_grid(
    State(state): State<SharedState>,
    Path(board): Path<String>,
    Query(query): Query<GridQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let grid = state.service.load_grid(&board, &query.into_state()).await?;
    Ok(Json(grid))
}

async fn get_data(
    State(state): State<SharedState>,
    Path(board): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.load_data(&board).await?))
}

async fn get_orders(
    State(state): State<SharedState>,
    Path(board): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.load_orders(&board).await?))
}

async fn set_order(
    State(state): State<SharedState>,
    Path((board, axis)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<OrderUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let axis = Axis::from_str(&axis).map_err(ApiError::BadRequest)?;
    let role = role_of(&headers)?;
    let origin = req.origin.or(origin_of(&headers)?);
    let order = state
        .service
        .set_axis_order(&board, role, axis, req.order, origin)
        .await?;
    Ok(Json(OrderRecord { axis, order }))
}

async fn move_item(
    State(state): State<SharedState>,
    Path(board): Path<String>,
    headers: HeaderMap,
    Json(mut req): Json<MoveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role = role_of(&headers)?;
    if req.origin.is_none() {
        req.origin = origin_of(&headers)?;
    }
    Ok(Json(state.service.move_item(&board, role, req).await?))
}

async fn create_item(
    State(state): State<SharedState>,
    Path(board): Path<String>,
    headers: HeaderMap,
    Json(attributes): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, ApiError> {
    let role = role_of(&headers)?;
    let origin = origin_of(&headers)?;
    let item = state.service.create_item(&board, role, attributes, origin).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_item(
    State(state): State<SharedState>,
    Path((board, id)): Path<(String, ItemId)>,
    headers: HeaderMap,
    Json(patch): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, ApiError> {
    let role = role_of(&headers)?;
    let origin = origin_of(&headers)?;
    Ok(Json(state.service.update_item(&board, role, id, patch, origin).await?))
}

async fn delete_item(
    State(state): State<SharedState>,
    Path((board, id)): Path<(String, ItemId)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let role = role_of(&headers)?;
    let origin = origin_of(&headers)?;
    state.service.delete_item(&board, role, id, origin).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────
