//! Typed error hierarchy for the board engine.
//!
//! `BoardError` covers configuration, authorization, mutation and sync
//! failures. Storage code uses `anyhow` with context and is folded into
//! `BoardError::Database` at the service boundary.

use thiserror::Error;

use crate::board::models::ItemId;

/// Errors from the board engine and its service layer.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid join path '{path}': {reason}")]
    InvalidJoinPath { path: String, reason: String },

    #[error("Not authorized to modify board '{board}'")]
    Unauthorized { board: String },

    #[error("Item {before_id} is no longer in the target cell")]
    StaleTarget { before_id: ItemId },

    #[error("Event delivery interrupted: {0}")]
    TransientSync(String),

    #[error("Board '{name}' not found")]
    BoardNotFound { name: String },

    #[error("Item {id} not found")]
    ItemNotFound { id: ItemId },

    #[error("A mutation is already in flight for this session")]
    MutationInFlight,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BoardError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidJoinPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Fold an error coming back from a storage closure. Board errors raised
    /// inside the closure keep their variant; anything else is a database error.
    pub fn from_storage(err: anyhow::Error) -> Self {
        match err.downcast::<BoardError>() {
            Ok(board) => board,
            Err(other) => Self::Database(other),
        }
    }

    /// True for errors that a board must refuse to start with.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidJoinPath { .. })
    }
}

pub type BoardResult<T> = std::result::Result<T, BoardError>;
