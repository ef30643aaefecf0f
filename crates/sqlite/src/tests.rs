#![allow(clippy::unwrap_used)]

use crate::{Connection, params};

#[tokio::test]
async fn test_open_in_memory_and_roundtrip() {
  let conn = Connection::open_in_memory().unwrap();

  conn
    .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", ())
    .await
    .unwrap();

  conn
    .execute(
      "INSERT INTO t (id, name) VALUES ($1, $2)",
      params!(1, "homer"),
    )
    .await
    .unwrap();

  let rows = conn
    .read_query_rows("SELECT id, name FROM t", ())
    .await
    .unwrap();

  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].get::<String>(1).unwrap(), "homer");
}

#[tokio::test]
async fn test_execute_batch() {
  let conn = Connection::open_in_memory().unwrap();

  conn
    .execute_batch(
      "CREATE TABLE a (id INTEGER); INSERT INTO a VALUES (1); INSERT INTO a VALUES (2);",
    )
    .await
    .unwrap();

  let rows = conn.read_query_rows("SELECT id FROM a", ()).await.unwrap();
  assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_close() {
  let conn = Connection::open_in_memory().unwrap();
  conn.execute("CREATE TABLE t (id INTEGER)", ()).await.unwrap();
  conn.close().await.unwrap();
}
