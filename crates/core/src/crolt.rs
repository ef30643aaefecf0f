//! Crolt: a persistent, partitioned HTTP cron dispatcher backed by an
//! embedded transactional KV store, per §4.7/§6.2.
//!
//! A job lives under three keys in the same `rulehub_sqlite::Connection`:
//! `crolt_jobs` (account, id, schedule, url, method, header, requestBody +
//! next-fire instant), `crolt_work` (the latest fire outcome per job), and
//! `crolt_partitions` (the current owner token + lease deadline). A job's
//! partition is a deterministic function of its `account`, not its `id`,
//! so every job belonging to one account is always claimed by the same
//! worker at a time. Workers claim partitions with a TTL'd owner token and
//! poll their pending set on a jittered interval so overlapping workers do
//! not thunder the herd; each due job is fired as a real HTTP request to
//! its own `url`, and the outcome is persisted as that job's work record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State as AxumState};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{DEFAULT_CROLT_PARTITIONS, DEFAULT_CROLT_WORKERS, DEFAULT_PARTITION_OWNER_TTL};
use crate::cron::Schedule;
use crate::error::{Error, Result};

fn partition_for(account: &str, partitions: u32) -> u32 {
  let mut hash: u32 = 2166136261;
  for byte in account.as_bytes() {
    hash ^= *byte as u32;
    hash = hash.wrapping_mul(16777619);
  }
  return hash % partitions;
}

/// A crolt job as stored, keyed by `(account, id)` (§3/§4.7's `aid`).
#[derive(Debug, Clone)]
struct JobRecord {
  account: String,
  id: String,
  expr: String,
  url: String,
  method: String,
  header: HashMap<String, String>,
  body: Value,
}

/// The outcome of the most recent attempt to fire a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WorkRecord {
  #[serde(rename = "firedAt")]
  fired_at: Option<DateTime<Utc>>,
  #[serde(rename = "httpStatus")]
  http_status: Option<u16>,
  error: Option<String>,
  #[serde(rename = "responseBody")]
  response_body: Option<String>,
}

/// The embedded KV store crolt runs its job bookkeeping on top of.
pub struct Kv {
  conn: rulehub_sqlite::Connection,
  partitions: u32,
}

impl Kv {
  pub fn new(conn: rulehub_sqlite::Connection, partitions: u32) -> Self {
    return Self { conn, partitions };
  }

  pub async fn init(&self) -> Result<()> {
    self
      .conn
      .execute_batch(
        "CREATE TABLE IF NOT EXISTS crolt_jobs (
           partition INTEGER NOT NULL,
           account TEXT NOT NULL,
           id TEXT NOT NULL,
           expr TEXT NOT NULL,
           url TEXT NOT NULL,
           method TEXT NOT NULL,
           header TEXT NOT NULL,
           body TEXT NOT NULL,
           next_fire_utc TEXT NOT NULL,
           PRIMARY KEY (account, id)
         );
         CREATE TABLE IF NOT EXISTS crolt_work (
           account TEXT NOT NULL,
           id TEXT NOT NULL,
           fired_at_utc TEXT,
           http_status INTEGER,
           error TEXT,
           response_body TEXT,
           PRIMARY KEY (account, id)
         );
         CREATE TABLE IF NOT EXISTS crolt_partitions (
           partition INTEGER PRIMARY KEY,
           owner TEXT,
           lease_until_utc TEXT
         );"
          .to_string(),
      )
      .await?;
    return Ok(());
  }

  /// Adds or replaces a job, computing its first `next_fire_utc`. Rejects
  /// an empty `account` or `id` (§4.7).
  #[allow(clippy::too_many_arguments)]
  pub async fn add(
    &self,
    account: String,
    id: String,
    expr: String,
    url: String,
    method: String,
    header: HashMap<String, String>,
    body: Value,
  ) -> Result<()> {
    if account.is_empty() || id.is_empty() {
      return Err(Error::InvalidInput("crolt job requires a non-empty account and id".to_string()));
    }

    let schedule = Schedule::parse(&expr, Utc::now())?;
    let next = schedule_next(&schedule)?;
    let partition = partition_for(&account, self.partitions);

    self
      .conn
      .execute(
        "INSERT INTO crolt_jobs (partition, account, id, expr, url, method, header, body, next_fire_utc)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(account, id) DO UPDATE SET
           partition=excluded.partition, expr=excluded.expr, url=excluded.url, method=excluded.method,
           header=excluded.header, body=excluded.body, next_fire_utc=excluded.next_fire_utc",
        rulehub_sqlite::params!(
          partition as i64,
          account,
          id,
          expr,
          url,
          method,
          serde_json::to_string(&header)?,
          serde_json::to_string(&body)?,
          next.to_rfc3339()
        ),
      )
      .await?;
    return Ok(());
  }

  /// Deletes a job and its work record. Not present is not an error,
  /// mirroring `/rem`'s idempotence (§6.2).
  pub async fn rem(&self, account: &str, id: &str) -> Result<()> {
    self
      .conn
      .execute(
        "DELETE FROM crolt_jobs WHERE account = ?1 AND id = ?2",
        rulehub_sqlite::params!(account.to_string(), id.to_string()),
      )
      .await?;
    self
      .conn
      .execute(
        "DELETE FROM crolt_work WHERE account = ?1 AND id = ?2",
        rulehub_sqlite::params!(account.to_string(), id.to_string()),
      )
      .await?;
    return Ok(());
  }

  /// Returns `{job, work}` for `(account, id)`, or `None` if no job exists.
  pub async fn get(&self, account: &str, id: &str) -> Result<Option<Value>> {
    let job_row: Option<(String, String, String, String, String)> = self
      .conn
      .read_query_value(
        "SELECT expr, url, method, header, body FROM crolt_jobs WHERE account = ?1 AND id = ?2",
        rulehub_sqlite::params!(account.to_string(), id.to_string()),
      )
      .await?;
    let Some((expr, url, method, header, body)) = job_row else {
      return Ok(None);
    };

    let work_row: Option<(Option<String>, Option<i64>, Option<String>, Option<String>)> = self
      .conn
      .read_query_value(
        "SELECT fired_at_utc, http_status, error, response_body FROM crolt_work WHERE account = ?1 AND id = ?2",
        rulehub_sqlite::params!(account.to_string(), id.to_string()),
      )
      .await?;

    let work = match work_row {
      Some((fired_at, http_status, error, response_body)) => serde_json::json!({
        "firedAt": fired_at,
        "httpStatus": http_status,
        "error": error,
        "responseBody": response_body,
      }),
      None => Value::Null,
    };

    return Ok(Some(serde_json::json!({
      "job": {
        "account": account,
        "id": id,
        "schedule": expr,
        "url": url,
        "method": method,
        "header": serde_json::from_str::<HashMap<String, String>>(&header)?,
        "requestBody": serde_json::from_str::<Value>(&body)?,
      },
      "work": work,
    })));
  }

  /// Drops every job, work record, and partition lease (offline `storage
  /// --clear`, §6.5).
  pub async fn clear(&self) -> Result<()> {
    self.conn.execute_batch(
      "DELETE FROM crolt_jobs; DELETE FROM crolt_work; DELETE FROM crolt_partitions;".to_string(),
    ).await?;
    return Ok(());
  }

  /// Attempts to claim ownership of `partition` for `ttl`, succeeding if it
  /// is unowned or its lease has expired.
  async fn claim_partition(&self, partition: u32, owner: &str, ttl: Duration) -> Result<bool> {
    let now = Utc::now();
    let until = now + chrono::Duration::from_std(ttl).unwrap_or_default();

    let n = self
      .conn
      .execute(
        "INSERT INTO crolt_partitions (partition, owner, lease_until_utc) VALUES (?1, ?2, ?3)
         ON CONFLICT(partition) DO UPDATE SET owner=excluded.owner, lease_until_utc=excluded.lease_until_utc
         WHERE crolt_partitions.lease_until_utc IS NULL OR crolt_partitions.lease_until_utc < ?4",
        rulehub_sqlite::params!(partition as i64, owner.to_string(), until.to_rfc3339(), now.to_rfc3339()),
      )
      .await?;
    return Ok(n > 0);
  }

  async fn due_jobs(&self, partition: u32, now: DateTime<Utc>) -> Result<Vec<JobRecord>> {
    let rows: Vec<(String, String, String, String, String, String, String)> = self
      .conn
      .read_query_values(
        "SELECT account, id, expr, url, method, header, body FROM crolt_jobs
         WHERE partition = ?1 AND next_fire_utc <= ?2",
        rulehub_sqlite::params!(partition as i64, now.to_rfc3339()),
      )
      .await?;

    let mut jobs = Vec::with_capacity(rows.len());
    for (account, id, expr, url, method, header, body) in rows {
      jobs.push(JobRecord {
        account,
        id,
        expr,
        url,
        method,
        header: serde_json::from_str(&header)?,
        body: serde_json::from_str(&body)?,
      });
    }
    return Ok(jobs);
  }

  /// Advances a fired job's `next_fire_utc` (or removes it if it was a
  /// one-shot) and persists its work record.
  async fn record_fired(&self, job: &JobRecord, now: DateTime<Utc>, work: WorkRecord) -> Result<()> {
    let schedule = Schedule::parse(&job.expr, now)?;
    match schedule_next_after(&schedule, now) {
      Some(next) => {
        self
          .conn
          .execute(
            "UPDATE crolt_jobs SET next_fire_utc = ?1 WHERE account = ?2 AND id = ?3",
            rulehub_sqlite::params!(next.to_rfc3339(), job.account.clone(), job.id.clone()),
          )
          .await?;
      }
      None => {
        self
          .conn
          .execute(
            "DELETE FROM crolt_jobs WHERE account = ?1 AND id = ?2",
            rulehub_sqlite::params!(job.account.clone(), job.id.clone()),
          )
          .await?;
      }
    }

    self
      .conn
      .execute(
        "INSERT INTO crolt_work (account, id, fired_at_utc, http_status, error, response_body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(account, id) DO UPDATE SET
           fired_at_utc=excluded.fired_at_utc, http_status=excluded.http_status,
           error=excluded.error, response_body=excluded.response_body",
        rulehub_sqlite::params!(
          job.account.clone(),
          job.id.clone(),
          work.fired_at.map(|t| t.to_rfc3339()),
          work.http_status.map(|s| s as i64),
          work.error,
          work.response_body
        ),
      )
      .await?;
    return Ok(());
  }
}

fn schedule_next(schedule: &Schedule) -> Result<DateTime<Utc>> {
  return schedule_next_after(schedule, Utc::now())
    .ok_or_else(|| Error::InvalidInput("schedule has no future occurrence".to_string()));
}

fn schedule_next_after(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
  return match schedule {
    Schedule::Recurring(cron) => cron.after(&after).next(),
    Schedule::Once(when) => {
      if *when > after {
        Some(*when)
      } else {
        None
      }
    }
  };
}

/// Fires `job` as an HTTP request to its own `url`, recording the outcome
/// as a work record rather than failing the worker loop (§4.7, §5:
/// "failures are recorded into the work record, job remains scheduled").
async fn fire_job(client: &reqwest::Client, job: &JobRecord) -> WorkRecord {
  let method = reqwest::Method::from_bytes(job.method.as_bytes()).unwrap_or(reqwest::Method::POST);
  let mut request = client.request(method, job.url.as_str());
  for (key, value) in &job.header {
    request = request.header(key, value);
  }
  request = request.json(&job.body);

  return match request.send().await {
    Ok(response) => {
      let status = response.status().as_u16();
      let body = response.text().await.unwrap_or_default();
      WorkRecord {
        fired_at: Some(Utc::now()),
        http_status: Some(status),
        error: None,
        response_body: Some(body),
      }
    }
    Err(err) => WorkRecord {
      fired_at: Some(Utc::now()),
      http_status: None,
      error: Some(err.to_string()),
      response_body: None,
    },
  };
}

/// Runs `workers` partition-claiming poll loops against `kv`, firing every
/// due job over HTTP via `client`.
pub fn spawn_workers(kv: Arc<Kv>, client: reqwest::Client, workers: usize, partitions: u32, ttl: Duration) {
  for worker in 0..workers {
    let kv = kv.clone();
    let client = client.clone();
    let owner = format!("worker-{worker}");
    tokio::spawn(async move {
      loop {
        for partition in (worker as u32..partitions).step_by(workers.max(1)) {
          if let Ok(true) = kv.claim_partition(partition, &owner, ttl).await {
            let now = Utc::now();
            if let Ok(due) = kv.due_jobs(partition, now).await {
              for job in due {
                let work = fire_job(&client, &job).await;
                let _ = kv.record_fired(&job, now, work).await;
              }
            }
          }
        }

        let jitter = rand::rng().random_range((ttl.as_secs() / 4).max(1)..ttl.as_secs().max(2));
        tokio::time::sleep(Duration::from_secs(jitter)).await;
      }
    });
  }
}

fn default_method() -> String {
  return "POST".to_string();
}

#[derive(Debug, Deserialize)]
struct AddRequest {
  account: String,
  id: String,
  schedule: String,
  url: String,
  #[serde(default = "default_method")]
  method: String,
  #[serde(default)]
  header: HashMap<String, String>,
  #[serde(rename = "requestBody", default)]
  request_body: Value,
}

#[derive(Debug, Deserialize)]
struct AidQuery {
  account: String,
  id: String,
}

async fn handle_add(AxumState(kv): AxumState<Arc<Kv>>, Json(req): Json<AddRequest>) -> Result<Json<Value>> {
  kv.add(req.account, req.id, req.schedule, req.url, req.method, req.header, req.request_body)
    .await?;
  return Ok(Json(serde_json::json!({})));
}

async fn handle_rem(AxumState(kv): AxumState<Arc<Kv>>, Query(q): Query<AidQuery>) -> Result<Json<Value>> {
  kv.rem(&q.account, &q.id).await?;
  return Ok(Json(serde_json::json!({})));
}

async fn handle_get(AxumState(kv): AxumState<Arc<Kv>>, Query(q): Query<AidQuery>) -> Result<Json<Value>> {
  let found = kv
    .get(&q.account, &q.id)
    .await?
    .ok_or_else(|| Error::NotFound(format!("{}/{}", q.account, q.id)))?;
  return Ok(Json(found));
}

/// `POST /add`, `GET /rem?account&id`, `GET /get?account&id` per §6.2.
pub fn router(kv: Arc<Kv>) -> axum::Router {
  return axum::Router::new()
    .route("/add", post(handle_add))
    .route("/rem", get(handle_rem))
    .route("/get", get(handle_get))
    .with_state(kv);
}

pub fn default_partitions() -> u32 {
  return DEFAULT_CROLT_PARTITIONS as u32;
}
pub fn default_workers() -> usize {
  return DEFAULT_CROLT_WORKERS;
}
pub fn default_owner_ttl() -> Duration {
  return DEFAULT_PARTITION_OWNER_TTL;
}

/// HTTP [`crate::cron::Cronner`] adapter dispatching onto a crolt server.
pub struct CroltSimple {
  base_url: url::Url,
  client: reqwest::Client,
}

impl CroltSimple {
  pub fn new(base_url: url::Url) -> Self {
    return Self {
      base_url,
      client: reqwest::Client::new(),
    };
  }
}

#[async_trait::async_trait]
impl crate::cron::Cronner for CroltSimple {
  async fn schedule(&self, id: String, expr: String, job: crate::cron::CronJob) -> Result<()> {
    let url = self
      .base_url
      .join("add")
      .map_err(|err| Error::Internal(format!("invalid crolt base url: {err}")))?;
    self
      .client
      .post(url)
      .json(&serde_json::json!({
        "account": job.account,
        "id": id,
        "schedule": expr,
        "url": job.url,
        "method": job.method,
        "header": job.header,
        "requestBody": job.body,
      }))
      .send()
      .await
      .map_err(|err| Error::Internal(format!("crolt add failed: {err}")))?;
    return Ok(());
  }

  async fn rem(&self, account: &str, id: &str) -> Result<()> {
    let mut url = self
      .base_url
      .join("rem")
      .map_err(|err| Error::Internal(format!("invalid crolt base url: {err}")))?;
    url.query_pairs_mut().append_pair("account", account).append_pair("id", id);
    self
      .client
      .get(url)
      .send()
      .await
      .map_err(|err| Error::Internal(format!("crolt rem failed: {err}")))?;
    return Ok(());
  }

  fn is_persistent(&self) -> bool {
    return true;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partition_for_is_stable() {
    assert_eq!(partition_for("acct-1", 16), partition_for("acct-1", 16));
  }

  async fn test_kv() -> Kv {
    let conn = rulehub_sqlite::Connection::open_in_memory().unwrap();
    let kv = Kv::new(conn, 4);
    kv.init().await.unwrap();
    return kv;
  }

  #[tokio::test]
  async fn test_add_rem_get_round_trip() {
    let kv = test_kv().await;

    kv.add(
      "acct1".to_string(),
      "j1".to_string(),
      "+60s".to_string(),
      "http://example.invalid/hook".to_string(),
      "POST".to_string(),
      HashMap::new(),
      serde_json::json!({"n": 1}),
    )
    .await
    .unwrap();

    let got = kv.get("acct1", "j1").await.unwrap().unwrap();
    assert_eq!(got["job"]["requestBody"]["n"], 1);
    assert_eq!(got["job"]["account"], "acct1");
    assert!(got["work"].is_null());

    kv.rem("acct1", "j1").await.unwrap();
    assert!(kv.get("acct1", "j1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_add_rejects_empty_account() {
    let kv = test_kv().await;
    let err = kv
      .add(
        "".to_string(),
        "j1".to_string(),
        "+60s".to_string(),
        "http://example.invalid/hook".to_string(),
        "POST".to_string(),
        HashMap::new(),
        serde_json::json!({}),
      )
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }

  #[tokio::test]
  async fn test_clear_removes_all_jobs() {
    let kv = test_kv().await;
    kv.add(
      "acct1".to_string(),
      "j1".to_string(),
      "+60s".to_string(),
      "http://example.invalid/hook".to_string(),
      "POST".to_string(),
      HashMap::new(),
      serde_json::json!({}),
    )
    .await
    .unwrap();

    kv.clear().await.unwrap();
    assert!(kv.get("acct1", "j1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_partitioning_is_keyed_by_account_not_id() {
    let kv = test_kv().await;
    // Two different ids under the same account must land in the same
    // partition so a single worker claim covers both.
    kv.add(
      "acct1".to_string(),
      "j1".to_string(),
      "+60s".to_string(),
      "http://example.invalid/hook".to_string(),
      "POST".to_string(),
      HashMap::new(),
      serde_json::json!({}),
    )
    .await
    .unwrap();
    kv.add(
      "acct1".to_string(),
      "j2".to_string(),
      "+60s".to_string(),
      "http://example.invalid/hook".to_string(),
      "POST".to_string(),
      HashMap::new(),
      serde_json::json!({}),
    )
    .await
    .unwrap();

    let rows: Vec<(i64,)> = kv
      .conn
      .read_query_values("SELECT DISTINCT partition FROM crolt_jobs WHERE account = ?1", rulehub_sqlite::params!("acct1".to_string()))
      .await
      .unwrap();
    assert_eq!(rows.len(), 1);
  }
}
