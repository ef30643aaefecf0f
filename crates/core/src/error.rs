use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// The error taxonomy shared by the rules engine, the internal cron, and crolt.
///
/// `Transport` and action-evaluation failures are deliberately *not* part of this enum where the
/// caller treats them as recoverable, recorded data (e.g. a crolt `Work` record or a `FindRules`
/// disposition) rather than a fatal `Result::Err`.
#[derive(Debug, Error)]
pub enum Error {
  #[error("Invalid input: {0}")]
  InvalidInput(String),
  #[error("Not found: {0}")]
  NotFound(String),
  #[error("Already exists: {0}")]
  AlreadyExists(String),
  #[error("Capacity exceeded: {0}")]
  CapacityExceeded(String),
  #[error("Conflict: {0}")]
  Conflict(String),
  #[error("Timeout: {0}")]
  Timeout(String),
  #[error("Internal error: {0}")]
  Internal(String),

  #[error("Sqlite error: {0}")]
  Sqlite(#[from] rulehub_sqlite::Error),
  #[error("Rusqlite error: {0}")]
  Rusqlite(#[from] rusqlite::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  pub fn status_code(&self) -> StatusCode {
    return match self {
      Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
      Self::NotFound(_) => StatusCode::NOT_FOUND,
      Self::AlreadyExists(_) => StatusCode::CONFLICT,
      Self::CapacityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
      Self::Conflict(_) => StatusCode::CONFLICT,
      Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
      Self::Internal(_) | Self::Sqlite(_) | Self::Rusqlite(_) | Self::Json(_) | Self::Io(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    };
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status_code();
    let body = ErrorBody {
      error: self.to_string(),
    };
    return (status, Json(body)).into_response();
  }
}

pub type Result<T> = std::result::Result<T, Error>;
