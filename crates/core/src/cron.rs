//! In-memory cron scheduler, per §5.
//!
//! [`Timeline`] keeps entries ordered by next-fire time behind a single
//! armed timer on the head; [`Cronner`] is the abstraction rule-hook code
//! schedules against, with [`InternalCron`] as the in-process
//! implementation. Unlike the teacher's `scheduler.rs`, which rejects a
//! second `add()` for an id already present (`Entry::Occupied` error), add
//! here replaces any existing entry for that id, per §5.2.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::constants::DEFAULT_CRON_CAPACITY;
use crate::error::{Error, Result};

/// A parsed schedule: either a recurring `cron` expression or a single
/// future instant.
#[derive(Clone)]
pub enum Schedule {
  Recurring(Arc<cron::Schedule>),
  Once(DateTime<Utc>),
}

impl Schedule {
  /// Parses the `{cron}`, `!{RFC3339}` or `+{duration}` forms from §6.3.
  pub fn parse(expr: &str, now: DateTime<Utc>) -> Result<Self> {
    if let Some(rest) = expr.strip_prefix('!') {
      let when = DateTime::parse_from_rfc3339(rest)
        .map_err(|err| Error::InvalidInput(format!("invalid RFC3339 schedule '{rest}': {err}")))?;
      return Ok(Schedule::Once(when.with_timezone(&Utc)));
    }

    if let Some(rest) = expr.strip_prefix('+') {
      let duration = parse_duration(rest)?;
      if duration.is_zero() {
        return Err(Error::InvalidInput(
          "relative schedule duration must be positive".to_string(),
        ));
      }
      return Ok(Schedule::Once(now + duration));
    }

    let parsed = cron::Schedule::from_str(expr)
      .map_err(|err| Error::InvalidInput(format!("invalid cron expression '{expr}': {err}")))?;
    return Ok(Schedule::Recurring(Arc::new(parsed)));
  }

  /// Next fire time strictly after `after`, or `None` for an already-fired
  /// one-shot.
  fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    return match self {
      Schedule::Recurring(schedule) => schedule.after(&after).next(),
      Schedule::Once(when) => {
        if *when > after {
          Some(*when)
        } else {
          None
        }
      }
    };
  }
}

/// Parses `"90s"`, `"5m"`, `"2h"`, `"500ms"`, `"10us"`, `"100ns"` (§6.3's
/// unit set: `ns,us,ms,s,m,h`). Non-positive or unit-less input is
/// `InvalidInput`.
fn parse_duration(s: &str) -> Result<Duration> {
  let s = s.trim();
  let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
  let amount: u64 = digits
    .parse()
    .map_err(|_| Error::InvalidInput(format!("invalid duration '{s}'")))?;
  if amount == 0 {
    return Err(Error::InvalidInput(format!(
      "duration '{s}' must be strictly positive"
    )));
  }

  let duration = match unit {
    "ns" => Duration::from_nanos(amount),
    "us" => Duration::from_micros(amount),
    "ms" => Duration::from_millis(amount),
    "s" | "" => Duration::from_secs(amount),
    "m" => Duration::from_secs(amount * 60),
    "h" => Duration::from_secs(amount * 3600),
    other => return Err(Error::InvalidInput(format!("unknown duration unit '{other}'"))),
  };
  return Ok(duration);
}

struct Entry {
  id: String,
  next: DateTime<Utc>,
  schedule: Schedule,
  fact: Value,
}

impl PartialEq for Entry {
  fn eq(&self, other: &Self) -> bool {
    return self.next == other.next;
  }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    return Some(self.cmp(other));
  }
}
impl Ord for Entry {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    // BinaryHeap is a max-heap; reverse so the earliest `next` sorts highest.
    return other.next.cmp(&self.next);
  }
}

/// A fired schedule event: the id and the fact that was registered for it.
#[derive(Debug, Clone)]
pub struct ScheduleEvent {
  pub id: String,
  pub fact: Value,
}

struct Timeline {
  heap: BinaryHeap<Entry>,
  ids: std::collections::HashSet<String>,
  capacity: usize,
}

impl Timeline {
  fn new(capacity: usize) -> Self {
    return Self {
      heap: BinaryHeap::new(),
      ids: std::collections::HashSet::new(),
      capacity,
    };
  }

  /// Adds `id`, replacing any existing entry for that id (§5.2, contrasts
  /// with the teacher's reject-on-duplicate `scheduler.rs`).
  fn add(&mut self, id: String, expr: &str, fact: Value, now: DateTime<Utc>) -> Result<()> {
    let schedule = Schedule::parse(expr, now)?;
    let Some(next) = schedule.next_after(now) else {
      return Err(Error::InvalidInput(format!(
        "schedule '{expr}' has no future occurrence"
      )));
    };

    let replacing = self.ids.contains(&id);
    if !replacing && self.ids.len() >= self.capacity {
      return Err(Error::CapacityExceeded(format!(
        "cron timeline is at its capacity of {}",
        self.capacity
      )));
    }

    self.remove(&id);
    self.ids.insert(id.clone());
    self.heap.push(Entry {
      id,
      next,
      schedule,
      fact,
    });
    return Ok(());
  }

  fn remove(&mut self, id: &str) -> bool {
    if !self.ids.remove(id) {
      return false;
    }
    // Lazily dropped from the heap on pop; rebuild to avoid keeping stale
    // entries around indefinitely.
    let remaining: Vec<Entry> = self.heap.drain().filter(|e| e.id != id).collect();
    self.heap = remaining.into_iter().collect();
    return true;
  }

  fn peek_due(&self, now: DateTime<Utc>) -> bool {
    return matches!(self.heap.peek(), Some(entry) if entry.next <= now);
  }

  fn pop_due(&mut self, now: DateTime<Utc>) -> Option<(String, Value, Option<(Schedule, DateTime<Utc>)>)> {
    let entry = self.heap.peek()?;
    if entry.next > now {
      return None;
    }
    let Entry {
      id, schedule, fact, ..
    } = self.heap.pop().expect("peeked entry must pop");

    let reschedule = schedule.next_after(now).map(|next| (schedule, next));
    if reschedule.is_none() {
      self.ids.remove(&id);
    }
    return Some((id, fact, reschedule));
  }

  fn next_wakeup(&self) -> Option<DateTime<Utc>> {
    return self.heap.peek().map(|e| e.next);
  }
}

/// Close-and-reallocate suspend/resume signal: `suspend()` closes the
/// current channel (waking every waiter with an error) and swaps in a
/// fresh one; `resume()` does the same. Waiters simply re-subscribe after
/// observing a close if they want to keep waiting on the *next* suspend.
struct Broadcaster {
  suspended: Mutex<bool>,
  tx: Mutex<watch::Sender<bool>>,
}

impl Broadcaster {
  fn new() -> (Self, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    return (
      Self {
        suspended: Mutex::new(false),
        tx: Mutex::new(tx),
      },
      rx,
    );
  }

  fn suspend(&self) {
    *self.suspended.lock() = true;
    let _ = self.tx.lock().send(true);
  }

  fn resume(&self) {
    *self.suspended.lock() = false;
    let _ = self.tx.lock().send(false);
  }

  fn is_suspended(&self) -> bool {
    return *self.suspended.lock();
  }
}

/// The crolt job shape carried through [`Cronner::schedule`]. [`InternalCron`]
/// only ever looks at `body` (the fact replayed into the location on fire);
/// [`crate::crolt::CroltSimple`] forwards every field to build the job crolt
/// actually dispatches over HTTP (§4.6/§4.7).
#[derive(Debug, Clone, Default)]
pub struct CronJob {
  pub account: String,
  pub url: String,
  pub method: String,
  pub header: std::collections::HashMap<String, String>,
  pub body: Value,
}

/// Abstraction that rule-hook code schedules one-shot/recurring facts
/// against. [`InternalCron`] is the in-process implementation; an HTTP
/// adapter onto crolt lives in [`crate::crolt::CroltSimple`].
#[async_trait::async_trait]
pub trait Cronner: Send + Sync {
  async fn schedule(&self, id: String, expr: String, job: CronJob) -> Result<()>;
  async fn rem(&self, account: &str, id: &str) -> Result<()>;
  fn is_persistent(&self) -> bool;
}

/// The in-memory scheduler: one background task owns the [`Timeline`] and
/// a single armed `tokio::time::sleep` on the head entry, woken early by
/// mutation through `control_tx`.
pub struct InternalCron {
  control_tx: kanal::AsyncSender<Control>,
  broadcaster: Arc<Broadcaster>,
}

enum Control {
  Add {
    id: String,
    expr: String,
    fact: Value,
    reply: tokio::sync::oneshot::Sender<Result<()>>,
  },
  Rem {
    id: String,
    reply: tokio::sync::oneshot::Sender<()>,
  },
  Kill,
}

impl InternalCron {
  pub fn spawn(capacity: usize, events_tx: kanal::AsyncSender<ScheduleEvent>) -> Arc<Self> {
    let (control_tx, control_rx) = kanal::unbounded_async::<Control>();
    let (broadcaster, mut suspend_rx) = Broadcaster::new();
    let broadcaster = Arc::new(broadcaster);

    tokio::spawn(async move {
      let mut timeline = Timeline::new(capacity);
      loop {
        let sleep_until = timeline.next_wakeup();
        let sleep = async {
          match sleep_until {
            Some(when) => {
              let delta = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
              tokio::time::sleep(delta).await;
            }
            None => std::future::pending::<()>().await,
          }
        };

        tokio::select! {
          _ = sleep => {
            if *suspend_rx.borrow() {
              continue;
            }
            let now = Utc::now();
            while timeline.peek_due(now) {
              let Some((id, fact, reschedule)) = timeline.pop_due(now) else { break; };
              if let Some((schedule, next)) = reschedule {
                timeline.ids.insert(id.clone());
                timeline.heap.push(Entry { id: id.clone(), next, schedule, fact: fact.clone() });
              }
              let _ = events_tx.send(ScheduleEvent { id, fact }).await;
            }
          }
          changed = suspend_rx.changed() => {
            if changed.is_err() {
              break;
            }
          }
          Ok(ctl) = control_rx.recv() => {
            match ctl {
              Control::Add { id, expr, fact, reply } => {
                let result = timeline.add(id, &expr, fact, Utc::now());
                let _ = reply.send(result);
              }
              Control::Rem { id, reply } => {
                timeline.remove(&id);
                let _ = reply.send(());
              }
              Control::Kill => break,
            }
          }
        }
      }
    });

    return Arc::new(Self { control_tx, broadcaster });
  }

  pub fn suspend(&self) {
    self.broadcaster.suspend();
  }

  pub fn resume(&self) {
    self.broadcaster.resume();
  }

  pub fn is_suspended(&self) -> bool {
    return self.broadcaster.is_suspended();
  }

  pub async fn kill(&self) {
    let _ = self.control_tx.send(Control::Kill).await;
  }
}

#[async_trait::async_trait]
impl Cronner for InternalCron {
  async fn schedule(&self, id: String, expr: String, job: CronJob) -> Result<()> {
    let (reply, rx) = tokio::sync::oneshot::channel();
    self
      .control_tx
      .send(Control::Add {
        id,
        expr,
        fact: job.body,
        reply,
      })
      .await
      .map_err(|_| Error::Internal("cron control channel closed".to_string()))?;
    return rx
      .await
      .map_err(|_| Error::Internal("cron scheduler dropped the reply".to_string()))?;
  }

  async fn rem(&self, _account: &str, id: &str) -> Result<()> {
    let (reply, rx) = tokio::sync::oneshot::channel();
    self
      .control_tx
      .send(Control::Rem {
        id: id.to_string(),
        reply,
      })
      .await
      .map_err(|_| Error::Internal("cron control channel closed".to_string()))?;
    let _ = rx.await;
    return Ok(());
  }

  fn is_persistent(&self) -> bool {
    return false;
  }
}

pub fn default_capacity() -> usize {
  return DEFAULT_CRON_CAPACITY;
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_relative_duration() {
    assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
    assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
    assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
    assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
    assert_eq!(parse_duration("500ns").unwrap(), Duration::from_nanos(500));
    assert!(parse_duration("0s").is_err());
    assert!(parse_duration("-1s").is_err());
  }

  #[test]
  fn test_schedule_parse_once_rfc3339() {
    let now = Utc::now();
    let later = (now + chrono::Duration::seconds(60)).to_rfc3339();
    let schedule = Schedule::parse(&format!("!{later}"), now).unwrap();
    assert!(schedule.next_after(now).is_some());
  }

  #[test]
  fn test_timeline_add_replaces_by_id() {
    let mut timeline = Timeline::new(10);
    let now = Utc::now();
    timeline.add("a".to_string(), "+60s", json!({"n": 1}), now).unwrap();
    timeline.add("a".to_string(), "+120s", json!({"n": 2}), now).unwrap();

    assert_eq!(timeline.ids.len(), 1);
    assert_eq!(timeline.heap.len(), 1);
  }

  #[test]
  fn test_timeline_capacity_exceeded() {
    let mut timeline = Timeline::new(1);
    let now = Utc::now();
    timeline.add("a".to_string(), "+60s", json!({}), now).unwrap();
    let err = timeline.add("b".to_string(), "+60s", json!({}), now).unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded(_)));
  }
}
