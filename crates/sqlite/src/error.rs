use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("Rusqlite error: {0}")]
  Rusqlite(#[from] rusqlite::Error),
  #[error("Connection closed")]
  ConnectionClosed,
  #[error("Close error: {0}")]
  Close(rusqlite::Error),
  #[error("Serde error: {0}")]
  Serde(#[from] serde_rusqlite::Error),
}
