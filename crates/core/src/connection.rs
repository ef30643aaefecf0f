//! SQLite connection bring-up for the two embedded databases: location
//! fact persistence (`rules.db`) and crolt's job KV store (`crolt.db`).

use std::path::PathBuf;

use thiserror::Error;

use crate::data_dir::DataDir;

pub use rulehub_sqlite::Connection;

#[derive(Debug, Error)]
pub enum ConnectionError {
  #[error("Rusqlite error: {0}")]
  Rusqlite(#[from] rusqlite::Error),
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rulehub_sqlite::Error),
}

/// Opens the location facts/rules database, creating it and its schema if
/// needed. `path` of `None` opens an in-memory database (tests, ephemeral
/// CLI runs).
pub fn init_db(path: Option<PathBuf>) -> Result<Connection, ConnectionError> {
  let conn = Connection::new(
    move || -> Result<rusqlite::Connection, ConnectionError> {
      let conn = match &path {
        Some(p) => rusqlite::Connection::open(p)?,
        None => rusqlite::Connection::open_in_memory()?,
      };
      conn.pragma_update(None, "journal_mode", "WAL")?;
      conn.pragma_update(None, "foreign_keys", "ON")?;
      return Ok(conn);
    },
    Some(rulehub_sqlite::connection::Options {
      n_read_threads: match std::thread::available_parallelism() {
        Ok(n) => n.get().clamp(2, 4),
        Err(_) => 2,
      },
      ..Default::default()
    }),
  )?;

  return Ok(conn);
}

/// Convenience for opening the two well-known databases under `data_dir`.
pub async fn open_default_databases(
  data_dir: Option<&DataDir>,
) -> Result<(Connection, Connection), ConnectionError> {
  let rules = init_db(data_dir.map(|d| d.main_db_path()))?;
  let crolt = init_db(data_dir.map(|d| d.crolt_db_path()))?;
  return Ok((rules, crolt));
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_init_db_in_memory() {
    let _conn = init_db(None).unwrap();
  }

  #[tokio::test]
  async fn test_init_db_on_disk_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rules.db");

    let conn = init_db(Some(path.clone()))?;
    conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", ()).await?;
    conn.close().await?;

    let reopened = init_db(Some(path))?;
    let count: Option<i64> = reopened.read_query_value("SELECT count(*) FROM t", ()).await?;
    assert_eq!(count, Some(0));
    return Ok(());
  }
}
