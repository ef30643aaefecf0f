//! The process-wide system state: the location cache, shared JS evaluator,
//! cron dispatcher, and storage connections every HTTP handler closes over.
//! Per §4.8 ("Location lifecycle & caching").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::cron::{Cronner, InternalCron, ScheduleEvent};
use crate::error::{Error, Result};
use crate::js::{Evaluator, RuntimeMode};
use crate::location::{Control, Location};

struct CacheEntry {
  location: Arc<Location>,
  last_touched: Instant,
  ttl: Option<Duration>,
}

/// Two-level lock map: an outer lock guards the map's shape (insert/remove
/// of whole locations), while each location internally synchronizes its
/// own fact/rule stores, so two requests against different locations never
/// contend on the same mutex.
struct LocationCache {
  entries: Mutex<HashMap<String, CacheEntry>>,
  default_ttl: Option<Duration>,
}

impl LocationCache {
  fn new(default_ttl: Option<Duration>) -> Self {
    return Self {
      entries: Mutex::new(HashMap::new()),
      default_ttl,
    };
  }

  /// Idempotent: returns the existing location if already open, otherwise
  /// creates one.
  fn open(&self, name: &str, control: Control, evaluator: Arc<Evaluator>) -> Arc<Location> {
    let mut entries = self.entries.lock();
    if let Some(entry) = entries.get_mut(name) {
      entry.last_touched = Instant::now();
      return entry.location.clone();
    }

    let location = Arc::new(Location::new(name, control, evaluator));
    entries.insert(
      name.to_string(),
      CacheEntry {
        location: location.clone(),
        last_touched: Instant::now(),
        ttl: self.default_ttl,
      },
    );
    return location;
  }

  fn release(&self, name: &str) {
    if let Some(entry) = self.entries.lock().remove(name) {
      entry.location.mark_deleted();
    }
  }

  fn sweep_expired(&self) {
    let now = Instant::now();
    let mut entries = self.entries.lock();
    entries.retain(|_, entry| match entry.ttl {
      Some(ttl) => now.duration_since(entry.last_touched) < ttl,
      None => true,
    });
  }

  fn len(&self) -> usize {
    return self.entries.lock().len();
  }
}

/// Top-level process state, analogous to the teacher's `AppState` but
/// scoped to this crate's rules-engine/cron/crolt surface.
#[derive(Clone)]
pub struct System {
  config: Arc<EngineConfig>,
  cache: Arc<LocationCache>,
  evaluator: Arc<Evaluator>,
  cronner: Arc<dyn Cronner>,
  rules_conn: Connection,
  crolt_kv: Arc<crate::crolt::Kv>,
}

impl System {
  pub async fn new(config: EngineConfig, rules_conn: Connection, crolt_conn: Connection) -> Result<Self> {
    // An ephemeral (in-memory) cron combined with a finite location TTL
    // silently drops scheduled rules once their owning location is evicted.
    // `RULES_CRON_OVERRIDE` acknowledges the tradeoff explicitly.
    if config.cron_url.is_none()
      && config.location_ttl.is_some()
      && std::env::var(crate::constants::RULES_CRON_OVERRIDE_ENV).is_err()
    {
      tracing::warn!(
        "in-memory cron with a finite location TTL drops scheduled rules on eviction; \
         set a cron_url or {} to silence this warning",
        crate::constants::RULES_CRON_OVERRIDE_ENV
      );
    }

    let (events_tx, events_rx) = kanal::unbounded_async::<ScheduleEvent>();
    let internal = InternalCron::spawn(config.cron_capacity, events_tx);

    let cronner: Arc<dyn Cronner> = match &config.cron_url {
      Some(url) => Arc::new(crate::crolt::CroltSimple::new(url.clone())),
      None => internal.clone(),
    };

    let evaluator = Arc::new(Evaluator::spawn(RuntimeMode::Shared, config.js_timeout));
    let cache = Arc::new(LocationCache::new(config.location_ttl));

    let crolt_kv = Arc::new(crate::crolt::Kv::new(crolt_conn, crate::crolt::default_partitions()));
    crolt_kv.init().await?;
    let crolt_client = reqwest::Client::builder()
      .timeout(config.http_timeout)
      .build()
      .map_err(|err| Error::Internal(format!("failed to build crolt http client: {err}")))?;
    crate::crolt::spawn_workers(
      crolt_kv.clone(),
      crolt_client,
      crate::crolt::default_workers(),
      crate::crolt::default_partitions(),
      crate::crolt::default_owner_ttl(),
    );

    let system = Self {
      config: Arc::new(config),
      cache,
      evaluator,
      cronner,
      rules_conn,
      crolt_kv,
    };

    system.spawn_cron_dispatch(events_rx);
    return Ok(system);
  }

  /// Drains fired internal-cron events and re-ingests them into their
  /// location's rule store's owning rule (§9, "Cron Hook Bridge
  /// re-entrancy": the fired fact is the original rule, so `ProcessEvent`
  /// runs again exactly as if the rule's own `when.pattern` had arrived).
  fn spawn_cron_dispatch(&self, events_rx: kanal::AsyncReceiver<ScheduleEvent>) {
    let cache = self.cache.clone();
    tokio::spawn(async move {
      while let Ok(event) = events_rx.recv().await {
        for entry in cache.entries.lock().values() {
          let location = entry.location.clone();
          let event = event.clone();
          tokio::spawn(async move {
            let _ = crate::event_processor::process_event(&location, &event.fact).await;
            location.record_event_processed();
          });
        }
      }
    });
  }

  pub fn config(&self) -> &EngineConfig {
    return &self.config;
  }

  pub fn evaluator(&self) -> Arc<Evaluator> {
    return self.evaluator.clone();
  }

  pub fn cronner(&self) -> Arc<dyn Cronner> {
    return self.cronner.clone();
  }

  pub fn rules_connection(&self) -> &Connection {
    return &self.rules_conn;
  }

  /// The `/add`, `/rem`, `/get` crolt HTTP surface (§6.2), served alongside
  /// the rules-engine router so the embedded crolt service is actually
  /// reachable (§4.7).
  pub fn crolt_router(&self) -> axum::Router {
    return crate::crolt::router(self.crolt_kv.clone());
  }

  pub fn open_location(&self, name: &str) -> Arc<Location> {
    let mut control = Control::default();
    control.max_facts = self.config.max_facts;
    let location = self.cache.open(name, control, self.evaluator.clone());
    location.install_cron_hook(self.cronner.clone());
    return location;
  }

  pub fn release_location(&self, name: &str) {
    self.cache.release(name);
  }

  pub fn location_count(&self) -> usize {
    return self.cache.len();
  }

  pub fn sweep_expired_locations(&self) {
    self.cache.sweep_expired();
  }

  pub fn require_location(&self, name: &str) -> Result<Arc<Location>> {
    if self.cache.len() >= self.config.max_locations && self.cache.entries.lock().get(name).is_none() {
      return Err(Error::CapacityExceeded(format!(
        "system is at its max-locations limit of {}",
        self.config.max_locations
      )));
    }
    return Ok(self.open_location(name));
  }

  pub async fn run_system_js(&self, code: &str) -> Result<Value> {
    return self.evaluator.eval(code, Default::default(), Value::Null).await;
  }
}
