//! A named, isolated fact/rule store plus the control knobs that govern it,
//! per §3 and §4.4.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::js::Evaluator;
use crate::json::Bindings;
use crate::state::{SearchHit, State};

/// Per-location knobs that shape how facts/rules are stored and how rule
/// actions run.
pub struct Control {
  pub max_facts: usize,
  pub allow_property_variables: bool,
  pub props: Value,
}

impl Default for Control {
  fn default() -> Self {
    return Self {
      max_facts: crate::constants::DEFAULT_MAX_FACTS,
      allow_property_variables: false,
      props: Value::Object(Default::default()),
    };
  }
}

/// Running counters surfaced by `/api/loc/admin` style introspection.
#[derive(Debug, Default)]
pub struct Stats {
  facts_added: AtomicUsize,
  facts_removed: AtomicUsize,
  rules_added: AtomicUsize,
  events_processed: AtomicUsize,
}

impl Stats {
  pub fn snapshot(&self) -> (usize, usize, usize, usize) {
    return (
      self.facts_added.load(Ordering::Relaxed),
      self.facts_removed.load(Ordering::Relaxed),
      self.rules_added.load(Ordering::Relaxed),
      self.events_processed.load(Ordering::Relaxed),
    );
  }
}

/// A named location: one fact store, one rule store, and the evaluator
/// rules' actions run against.
pub struct Location {
  name: String,
  facts: std::sync::Mutex<State>,
  rules: std::sync::Mutex<State>,
  disabled: std::sync::Mutex<std::collections::HashSet<String>>,
  control: Control,
  evaluator: Arc<Evaluator>,
  stats: Stats,
  deleted: AtomicBool,
}

impl Location {
  pub fn new(name: impl Into<String>, control: Control, evaluator: Arc<Evaluator>) -> Self {
    return Self {
      name: name.into(),
      facts: std::sync::Mutex::new(State::new_indexed(control.allow_property_variables)),
      rules: std::sync::Mutex::new(State::new_indexed(control.allow_property_variables)),
      disabled: std::sync::Mutex::new(std::collections::HashSet::new()),
      control,
      evaluator,
      stats: Stats::default(),
      deleted: AtomicBool::new(false),
    };
  }

  pub fn name(&self) -> &str {
    return &self.name;
  }

  pub fn props(&self) -> Value {
    return self.control.props.clone();
  }

  pub fn evaluator(&self) -> &Evaluator {
    return &self.evaluator;
  }

  pub fn is_deleted(&self) -> bool {
    return self.deleted.load(Ordering::Acquire);
  }

  /// Adds a fact, honoring `max_facts` capacity.
  pub fn add_fact(&self, id: Option<String>, fact: Value) -> Result<String> {
    crate::json::validate_fact(&fact, self.control.allow_property_variables)?;

    let mut facts = self.facts.lock().expect("facts lock");
    if facts.count() >= self.control.max_facts {
      return Err(Error::CapacityExceeded(format!(
        "location '{}' is at its max-facts limit of {}",
        self.name, self.control.max_facts
      )));
    }
    let id = facts.add(id, fact)?;
    self.stats.facts_added.fetch_add(1, Ordering::Relaxed);
    return Ok(id);
  }

  pub fn rem_fact(&self, id: &str) -> Option<Value> {
    let removed = self.facts.lock().expect("facts lock").rem(id);
    if removed.is_some() {
      self.stats.facts_removed.fetch_add(1, Ordering::Relaxed);
    }
    return removed;
  }

  pub fn search_facts(&self, pattern: &Value) -> Result<Vec<SearchHit>> {
    return self.facts.lock().expect("facts lock").search(pattern);
  }

  /// Adds a rule. `rule` must be the full `{rule: {when: {...}, ...}}` shape;
  /// rules start enabled.
  pub fn add_rule(&self, id: Option<String>, rule: Value) -> Result<String> {
    if rule.get("rule").and_then(|r| r.get("when")).is_none() {
      return Err(Error::InvalidInput(
        "rule must contain a 'rule.when.pattern' clause".to_string(),
      ));
    }
    let id = self.rules.lock().expect("rules lock").add(id, rule)?;
    self.stats.rules_added.fetch_add(1, Ordering::Relaxed);
    return Ok(id);
  }

  pub fn rem_rule(&self, id: &str) -> Option<Value> {
    self.disabled.lock().expect("disabled lock").remove(id);
    return self.rules.lock().expect("rules lock").rem(id);
  }

  pub fn get_rule(&self, id: &str) -> Option<Value> {
    return self.rules.lock().expect("rules lock").get(id).cloned();
  }

  pub fn list_rules(&self) -> Vec<(String, Value)> {
    return self.rules.lock().expect("rules lock").save();
  }

  pub fn search_rules(&self, pattern: &Value) -> Result<Vec<SearchHit>> {
    return self.rules.lock().expect("rules lock").search(pattern);
  }

  pub fn rule_enabled(&self, id: &str) -> bool {
    return !self.disabled.lock().expect("disabled lock").contains(id);
  }

  pub fn set_rule_enabled(&self, id: &str, enabled: bool) {
    let mut disabled = self.disabled.lock().expect("disabled lock");
    if enabled {
      disabled.remove(id);
    } else {
      disabled.insert(id.to_string());
    }
  }

  pub fn clear(&self) {
    self.facts.lock().expect("facts lock").clear();
    self.rules.lock().expect("rules lock").clear();
    self.disabled.lock().expect("disabled lock").clear();
  }

  pub fn mark_deleted(&self) {
    self.deleted.store(true, Ordering::Release);
  }

  /// Runs free-standing JS (not tied to a rule's action), per `/api/sys/util/js`.
  pub async fn run_javascript(&self, code: &str, bindings: Bindings) -> Result<Value> {
    return self.evaluator.eval(code, bindings, self.props()).await;
  }

  pub fn stats(&self) -> (usize, usize, usize, usize) {
    return self.stats.snapshot();
  }

  pub fn record_event_processed(&self) {
    self.stats.events_processed.fetch_add(1, Ordering::Relaxed);
  }

  /// Wires this location's rule store to `cronner`: a rule carrying a
  /// top-level `schedule` string is registered under its own id. For an
  /// in-process cronner the fact handed back on fire is the rule itself, so
  /// a re-fired rule re-enters `ProcessEvent` the same way any other fact
  /// would (§9, "Cron Hook Bridge re-entrancy"); for an HTTP-backed crolt
  /// cronner the rule's own `account`/`url`/`method`/`header` fields (if
  /// present) become the dispatched job's fields, defaulting `account` to
  /// this location's name.
  pub fn install_cron_hook(&self, cronner: Arc<dyn crate::cron::Cronner>) {
    let mut rules = self.rules.lock().expect("rules lock");
    let location_name = self.name.clone();

    let add_cronner = cronner.clone();
    let add_location_name = location_name.clone();
    rules.add_hook(Box::new(move |id, value| {
      let Some(schedule) = value.get("schedule").and_then(Value::as_str) else {
        return;
      };
      let cronner = add_cronner.clone();
      let id = id.to_string();
      let schedule = schedule.to_string();
      let job = crate::cron::CronJob {
        account: value
          .get("account")
          .and_then(Value::as_str)
          .unwrap_or(&add_location_name)
          .to_string(),
        url: value.get("url").and_then(Value::as_str).unwrap_or_default().to_string(),
        method: value.get("method").and_then(Value::as_str).unwrap_or("POST").to_string(),
        header: value
          .get("header")
          .and_then(Value::as_object)
          .map(|header| {
            header
              .iter()
              .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
              .collect()
          })
          .unwrap_or_default(),
        body: value.clone(),
      };
      tokio::spawn(async move {
        let _ = cronner.schedule(id, schedule, job).await;
      });
    }));

    let rem_cronner = cronner;
    rules.add_rem_hook(Box::new(move |id, value| {
      if value.get("schedule").is_none() {
        return;
      }
      let cronner = rem_cronner.clone();
      let account = value
        .get("account")
        .and_then(Value::as_str)
        .unwrap_or(&location_name)
        .to_string();
      let id = id.to_string();
      tokio::spawn(async move {
        let _ = cronner.rem(&account, &id).await;
      });
    }));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::time::Duration;

  fn test_location() -> Location {
    let evaluator = Arc::new(Evaluator::spawn(crate::js::RuntimeMode::Scoped, Duration::from_secs(5)));
    return Location::new("home", Control::default(), evaluator);
  }

  #[test]
  fn test_add_fact_and_search() {
    let loc = test_location();
    loc.add_fact(None, json!({"likes": "chips"})).unwrap();

    let hits = loc.search_facts(&json!({"likes": "?x"})).unwrap();
    assert_eq!(hits.len(), 1);
  }

  #[test]
  fn test_max_facts_enforced() {
    let mut control = Control::default();
    control.max_facts = 1;
    let evaluator = Arc::new(Evaluator::spawn(crate::js::RuntimeMode::Scoped, Duration::from_secs(5)));
    let loc = Location::new("home", control, evaluator);

    loc.add_fact(None, json!({"a": 1})).unwrap();
    let err = loc.add_fact(None, json!({"a": 2})).unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded(_)));
  }

  #[test]
  fn test_rule_enable_disable() {
    let loc = test_location();
    let id = loc
      .add_rule(
        Some("r1".to_string()),
        json!({"rule": {"when": {"pattern": {"arrived": "?who"}}}}),
      )
      .unwrap();

    assert!(loc.rule_enabled(&id));
    loc.set_rule_enabled(&id, false);
    assert!(!loc.rule_enabled(&id));
  }

  #[test]
  fn test_add_rule_requires_when() {
    let loc = test_location();
    let err = loc.add_rule(None, json!({"rule": {}})).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }
}
