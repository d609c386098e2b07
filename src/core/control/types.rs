//! Control-plane wire types

use crate::core::executor::PoolStatus;
use crate::core::model::{ScrapingRun, Strategy};
use crate::core::phases::SessionReport;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One frame on the status stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusFrame {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub kind: FrameKind,
    pub payload: serde_json::Value,
}

/// Frame kinds on the status stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Tick,
    RunStarted,
    RunFinished,
    PhaseChanged,
    Alert,
}

impl FrameKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::RunStarted => "run_started",
            Self::RunFinished => "run_finished",
            Self::PhaseChanged => "phase_changed",
            Self::Alert => "alert",
        }
    }
}

/// `GET /status` response
#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub pool: PoolStatus,
    pub session: Option<SessionReport>,
    pub recent_runs: Vec<ScrapingRun>,
    pub rss_kb: Option<u64>,
}

/// `POST /phased/start` request
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

/// `POST /phased/start` response
#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
}

/// `POST /phased/pause` request
#[derive(Debug, Default, Deserialize)]
pub struct PauseRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /scraper/{id}/trigger` response
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub run_id: String,
}

/// Structured error body every control response uses on failure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// Control-plane failures mapped onto HTTP statuses
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("{0}")]
    Loader(#[from] crate::core::phases::LoaderError),

    #[error("{0}")]
    Submit(#[from] crate::core::executor::SubmitError),

    #[error("{0}")]
    Store(#[from] crate::core::db::StoreError),

    #[error("run {0} not found")]
    RunNotFound(String),
}

impl ControlError {
    fn parts(&self) -> (StatusCode, &'static str, Option<u64>) {
        use crate::core::executor::SubmitError;
        use crate::core::phases::LoaderError;

        match self {
            Self::Loader(LoaderError::SessionAlreadyActive) => {
                (StatusCode::CONFLICT, "session_already_active", None)
            }
            Self::Loader(LoaderError::NoActiveSession) => {
                (StatusCode::CONFLICT, "no_active_session", None)
            }
            Self::Loader(LoaderError::Store(_)) | Self::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_unavailable",
                Some(5),
            ),
            Self::Submit(SubmitError::UnknownScraper { .. }) => {
                (StatusCode::NOT_FOUND, "unknown_scraper", None)
            }
            Self::Submit(SubmitError::Backpressure { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "backpressure", Some(10))
            }
            Self::Submit(SubmitError::CircuitOpen {
                retry_after_seconds,
            }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "circuit_open",
                Some(*retry_after_seconds),
            ),
            Self::Submit(SubmitError::ShuttingDown) => {
                (StatusCode::SERVICE_UNAVAILABLE, "shutting_down", None)
            }
            Self::Submit(SubmitError::Store(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_unavailable",
                Some(5),
            ),
            Self::RunNotFound(_) => (StatusCode::NOT_FOUND, "run_not_found", None),
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, kind, retry_after_seconds) = self.parts();
        let body = ErrorBody {
            kind: kind.to_string(),
            message: self.to_string(),
            retry_after_seconds,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&FrameKind::RunFinished).unwrap(),
            "\"run_finished\""
        );
    }

    #[test]
    fn error_body_omits_absent_retry_hint() {
        let body = ErrorBody {
            kind: "unknown_scraper".to_string(),
            message: "scraper ca_zz is not registered".to_string(),
            retry_after_seconds: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("retry_after_seconds"));
    }

    #[test]
    fn circuit_open_maps_to_503_with_retry_hint() {
        let err = ControlError::Submit(crate::core::executor::SubmitError::CircuitOpen {
            retry_after_seconds: 30,
        });
        let (status, kind, retry) = err.parts();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(kind, "circuit_open");
        assert_eq!(retry, Some(30));
    }
}
