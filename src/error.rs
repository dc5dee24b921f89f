//! Error taxonomy for the station.
//!
//! Only the first group of variants ever reaches an HTTP caller. The rest are
//! recovered inside the broadcaster and surface through logs and the
//! `last_error` field of `/status`.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StationError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StationError {
    /// A playback command arrived while no tracks are loaded.
    #[error("playlist is empty")]
    EmptyPlaylist,

    /// Jump to an id that is not in the current playlist.
    #[error("id not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// `/control` action outside the known set.
    #[error("unknown action: {0}")]
    UnknownCommand(String),

    #[error("mode must be 'none', 'one' or 'all' (got {0:?})")]
    InvalidLoopMode(String),

    // --- recovered internally -------------------------------------------

    #[error("track {id} unreadable: {reason}")]
    TrackUnreadable { id: String, reason: String },

    #[error("client {0} fell behind and was dropped")]
    ClientOverload(String),

    #[error("decoder did not exit within {0:?}")]
    ProcessTeardownTimeout(Duration),

    #[error("scan failed: {0}")]
    Scan(String),
}

impl StationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StationError::NotFound(_) => StatusCode::NOT_FOUND,
            StationError::EmptyPlaylist
            | StationError::BadRequest(_)
            | StationError::UnknownCommand(_)
            | StationError::InvalidLoopMode(_) => StatusCode::BAD_REQUEST,
            StationError::TrackUnreadable { .. }
            | StationError::ClientOverload(_)
            | StationError::ProcessTeardownTimeout(_)
            | StationError::Scan(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_map_to_client_statuses() {
        assert_eq!(StationError::EmptyPlaylist.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            StationError::NotFound("009".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            StationError::UnknownCommand("rewind".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn loop_mode_message_names_accepted_values() {
        let msg = StationError::InvalidLoopMode("shuffle".into()).to_string();
        assert!(msg.contains("'none', 'one' or 'all'"));
        assert!(msg.contains("shuffle"));
    }
}
