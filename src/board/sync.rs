//! Change events and the per-viewer sync session.
//!
//! Every mutation a server applies is broadcast as a [`ChangeEvent`] to all
//! viewers of the board, including the one that caused it. A viewer tags its
//! own mutations with its session origin and arms a single-shot suppress flag,
//! so that the echo of its own edit is consumed instead of triggering a
//! refresh. Anything else re-fetches and re-groups.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::{Axis, CellKey, Item, ItemId};
use crate::errors::{BoardError, BoardResult};

/// Default lifetime of an unanswered suppress flag.
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Reorder,
    ConfigChange,
    /// The server dropped events for this subscriber.
    Resync,
}

impl ChangeKind {
    /// Whether viewers must re-fetch items (as opposed to axis orders).
    pub fn touches_items(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub board: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<CellKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<Axis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Uuid>,
    pub emitted_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(board: &str, kind: ChangeKind) -> Self {
        Self {
            board: board.to_string(),
            kind,
            item_id: None,
            cell: None,
            position: None,
            row: None,
            axis: None,
            origin: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn with_item(mut self, id: ItemId) -> Self {
        self.item_id = Some(id);
        self
    }

    pub fn with_cell(mut self, cell: CellKey, position: Option<f64>) -> Self {
        self.cell = Some(cell);
        self.position = position;
        self
    }

    pub fn with_row(mut self, row: Item) -> Self {
        self.item_id = Some(row.id);
        self.row = Some(row);
        self
    }

    pub fn with_axis(mut self, axis: Axis) -> Self {
        self.axis = Some(axis);
        self
    }

    pub fn with_origin(mut self, origin: Option<Uuid>) -> Self {
        self.origin = origin;
        self
    }
}

/// Outcome of a mutation as reported to the session that issued it.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationResult {
    Ok,
    Unauthorized,
    /// The drop target vanished; the server appended instead.
    StaleTarget,
    Error(String),
}

impl MutationResult {
    pub fn from_error(err: &BoardError) -> Self {
        match err {
            BoardError::Unauthorized { .. } => Self::Unauthorized,
            BoardError::StaleTarget { .. } => Self::StaleTarget,
            other => Self::Error(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalResolution {
    /// Keep the optimistic placement (adjusted to the server's answer).
    Applied,
    /// Put the dragged item back where it was.
    Reverted,
}

/// What the viewer should do with an incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Ignored,
    /// Echo of this session's own mutation.
    Consumed,
    RefreshItems,
    RefreshOrder,
    FullRefresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingEcho,
    Applying,
}

/// Sync state of one viewing session. Single-threaded; owned by the viewer.
#[derive(Debug, Clone)]
pub struct SyncSession {
    board: String,
    origin: Uuid,
    state: SessionState,
    suppress_since: Option<Instant>,
    in_flight: bool,
    echo_timeout: Duration,
}

impl SyncSession {
    pub fn new(board: &str) -> Self {
        Self::with_timeout(board, DEFAULT_ECHO_TIMEOUT)
    }

    pub fn with_timeout(board: &str, echo_timeout: Duration) -> Self {
        Self {
            board: board.to_string(),
            origin: Uuid::new_v4(),
            state: SessionState::Idle,
            suppress_since: None,
            in_flight: false,
            echo_timeout,
        }
    }

    pub fn board(&self) -> &str {
        &self.board
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_suppressing(&self) -> bool {
        self.suppress_since.is_some()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Start a local mutation. Re-arms the suppress flag even if an earlier
    /// echo is still outstanding.
    pub fn begin_local(&mut self, now: Instant) -> BoardResult<()> {
        if self.in_flight {
            return Err(BoardError::MutationInFlight);
        }
        self.in_flight = true;
        self.suppress_since = Some(now);
        self.state = SessionState::AwaitingEcho;
        Ok(())
    }

    /// The server answered the in-flight mutation.
    pub fn complete_local(&mut self, result: &MutationResult) -> LocalResolution {
        self.in_flight = false;
        match result {
            MutationResult::Ok | MutationResult::StaleTarget => {
                if self.state != SessionState::Applying && self.suppress_since.is_none() {
                    self.state = SessionState::Idle;
                }
                LocalResolution::Applied
            }
            MutationResult::Unauthorized | MutationResult::Error(_) => {
                self.suppress_since = None;
                if self.state == SessionState::AwaitingEcho {
                    self.state = SessionState::Idle;
                }
                LocalResolution::Reverted
            }
        }
    }

    /// Classify an incoming event.
    pub fn receive(&mut self, event: &ChangeEvent, now: Instant) -> SyncAction {
        if event.board != self.board {
            return SyncAction::Ignored;
        }
        self.expire(now);

        if event.kind == ChangeKind::Resync {
            // The own echo may have been among the dropped events.
            self.suppress_since = None;
            self.state = SessionState::Applying;
            tracing::debug!(board = %self.board, "resync requested by server");
            return SyncAction::FullRefresh;
        }

        if self.suppress_since.is_some() && event.origin == Some(self.origin) {
            self.suppress_since = None;
            if !self.in_flight && self.state == SessionState::AwaitingEcho {
                self.state = SessionState::Idle;
            }
            tracing::debug!(board = %self.board, origin = %self.origin, "consumed own echo");
            return SyncAction::Consumed;
        }

        self.state = SessionState::Applying;
        if event.kind == ChangeKind::ConfigChange {
            SyncAction::FullRefresh
        } else if event.kind.touches_items() {
            SyncAction::RefreshItems
        } else {
            SyncAction::RefreshOrder
        }
    }

    /// The viewer finished re-rendering after a remote event.
    pub fn finish_apply(&mut self) {
        if self.state == SessionState::Applying {
            self.state = if self.suppress_since.is_some() {
                SessionState::AwaitingEcho
            } else {
                SessionState::Idle
            };
        }
    }

    /// Drop a suppress flag whose echo never came. Returns true if one expired.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.suppress_since {
            Some(since) if now.saturating_duration_since(since) >= self.echo_timeout => {
                self.suppress_since = None;
                if self.state == SessionState::AwaitingEcho && !self.in_flight {
                    self.state = SessionState::Idle;
                }
                tracing::debug!(board = %self.board, "echo timeout, suppress flag cleared");
                true
            }
            _ => false,
        }
    }

    /// Channel dropped or a refresh failed: start over from a full fetch.
    pub fn connection_lost(&mut self) -> SyncAction {
        self.suppress_since = None;
        self.state = SessionState::Idle;
        SyncAction::FullRefresh
    }
}
