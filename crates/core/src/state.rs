//! A location's fact/rule store, per §4.3. Two strategies share one public
//! surface: [`State::Indexed`] layers a [`PatternIndex`] (for rules' `when`
//! patterns and for facts) and a [`TermIndex`] (for each fact's flattened
//! scalar leaves) over a flat id→value map; [`State::Linear`] only keeps the
//! map and answers searches by scanning and attempting unification.
//!
//! Re-architecture note (§9, "Interface-typed State"): modeled as a sum type
//! with two variants rather than a trait object, since the set of strategies
//! is closed and known at compile time.

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::json::{self, Bindings};
use crate::pattern_index::PatternIndex;
use crate::term_index::TermIndex;

/// A single search hit: the matched entry's id, the stored value, and the
/// bindings produced by unifying the search pattern against it.
#[derive(Debug, Clone)]
pub struct SearchHit {
  pub id: String,
  pub value: Value,
  pub bindings: Bindings,
}

pub type Hook = Box<dyn Fn(&str, &Value) + Send + Sync>;

struct IndexedState {
  entries: IndexMap<String, Value>,
  patterns: PatternIndex,
  terms: TermIndex,
}

struct LinearState {
  entries: IndexMap<String, Value>,
  allow_property_variables: bool,
}

enum Backend {
  Indexed(IndexedState),
  Linear(LinearState),
}

/// A location's fact/rule store.
pub struct State {
  backend: Backend,
  next_id: AtomicU64,
  add_hooks: Vec<Hook>,
  rem_hooks: Vec<Hook>,
}

impl State {
  pub fn new_indexed(allow_property_variables: bool) -> Self {
    return Self {
      backend: Backend::Indexed(IndexedState {
        entries: IndexMap::new(),
        patterns: PatternIndex::new(allow_property_variables),
        terms: TermIndex::new(),
      }),
      next_id: AtomicU64::new(1),
      add_hooks: Vec::new(),
      rem_hooks: Vec::new(),
    };
  }

  pub fn new_linear(allow_property_variables: bool) -> Self {
    return Self {
      backend: Backend::Linear(LinearState {
        entries: IndexMap::new(),
        allow_property_variables,
      }),
      next_id: AtomicU64::new(1),
      add_hooks: Vec::new(),
      rem_hooks: Vec::new(),
    };
  }

  fn fresh_id(&self) -> String {
    return format!("e{}", self.next_id.fetch_add(1, Ordering::SeqCst));
  }

  /// Extracts the pattern to index for a rule-shaped fact: `{rule:{when:{pattern:P}}}`.
  fn rule_when_pattern(value: &Value) -> Option<&Value> {
    return value.get("rule")?.get("when")?.get("pattern");
  }

  /// Adds `value` under `id` (or a freshly generated id). Returns the id.
  pub fn add(&mut self, id: Option<String>, value: Value) -> Result<String> {
    let id = id.unwrap_or_else(|| self.fresh_id());

    match &mut self.backend {
      Backend::Indexed(state) => {
        if let Some(existing) = state.entries.get(&id) {
          Self::deindex(state, &id, existing);
        }

        if let Some(pattern) = Self::rule_when_pattern(&value) {
          state.patterns.add(pattern, id.clone())?;
        } else if let Value::Object(object) = &value {
          state.patterns.add(&Value::Object(object.clone()), id.clone())?;
          for entry in json::flatten_object(object)? {
            state.terms.add(json::encode_scalar(&entry.value), id.clone());
          }
        }

        state.entries.insert(id.clone(), value.clone());
      }
      Backend::Linear(state) => {
        json::validate_fact(&value, state.allow_property_variables).ok();
        state.entries.insert(id.clone(), value.clone());
      }
    }

    for hook in &self.add_hooks {
      hook(&id, &value);
    }

    return Ok(id);
  }

  /// Unifies `pattern`/`value` in the correct pattern-first order: for a
  /// rule search the variables live in the *stored* rule's `when.pattern`
  /// and the query is a concrete event; for a fact search it is the other
  /// way round.
  fn unify_search(pattern: &Value, value: &Value, is_rule_search: bool, bindings: &mut Bindings) -> bool {
    if is_rule_search {
      let rule_pattern = Self::rule_when_pattern(value).unwrap_or(value);
      let event = Self::rule_when_pattern(pattern).unwrap_or(pattern);
      return json::unify(rule_pattern, event, bindings);
    }
    return json::unify(pattern, value, bindings);
  }

  fn deindex(state: &mut IndexedState, id: &str, value: &Value) {
    if let Some(pattern) = Self::rule_when_pattern(value) {
      let _ = state.patterns.remove(pattern, id);
    } else if let Value::Object(object) = value {
      let _ = state.patterns.remove(&Value::Object(object.clone()), id);
      state.terms.rem_id(id);
    }
  }

  pub fn rem(&mut self, id: &str) -> Option<Value> {
    let removed = match &mut self.backend {
      Backend::Indexed(state) => {
        let removed = state.entries.shift_remove(id);
        if let Some(ref value) = removed {
          Self::deindex(state, id, value);
        }
        removed
      }
      Backend::Linear(state) => state.entries.shift_remove(id),
    };

    if let Some(ref value) = removed {
      for hook in &self.rem_hooks {
        hook(id, value);
      }
    }

    return removed;
  }

  pub fn get(&self, id: &str) -> Option<&Value> {
    return match &self.backend {
      Backend::Indexed(state) => state.entries.get(id),
      Backend::Linear(state) => state.entries.get(id),
    };
  }

  pub fn count(&self) -> usize {
    return match &self.backend {
      Backend::Indexed(state) => state.entries.len(),
      Backend::Linear(state) => state.entries.len(),
    };
  }

  pub fn clear(&mut self) {
    match &mut self.backend {
      Backend::Indexed(state) => {
        state.entries.clear();
        state.patterns = PatternIndex::new(false);
        state.terms = TermIndex::new();
      }
      Backend::Linear(state) => state.entries.clear(),
    }
  }

  /// Searches for entries whose (rule-)pattern unifies with `pattern`, or,
  /// for fact search, entries whose value unifies with `pattern`.
  pub fn search(&self, pattern: &Value) -> Result<Vec<SearchHit>> {
    match &self.backend {
      Backend::Indexed(state) => {
        let is_rule_search = Self::rule_when_pattern(pattern).is_some();
        let ids: IndexSet<String> = if let Some(when_pattern) = Self::rule_when_pattern(pattern) {
          state.patterns.search(when_pattern)?
        } else {
          state.patterns.search(pattern)?
        };

        let mut hits = Vec::with_capacity(ids.len());
        for id in ids {
          let Some(value) = state.entries.get(&id) else {
            continue;
          };
          let mut bindings = Bindings::new();
          if Self::unify_search(pattern, value, is_rule_search, &mut bindings) {
            hits.push(SearchHit {
              id,
              value: value.clone(),
              bindings,
            });
          }
        }
        return Ok(hits);
      }
      Backend::Linear(state) => {
        let is_rule_search = Self::rule_when_pattern(pattern).is_some();
        let mut hits = Vec::new();
        for (id, value) in &state.entries {
          let mut bindings = Bindings::new();
          if Self::unify_search(pattern, value, is_rule_search, &mut bindings) {
            hits.push(SearchHit {
              id: id.clone(),
              value: value.clone(),
              bindings,
            });
          }
        }
        return Ok(hits);
      }
    }
  }

  pub fn add_hook(&mut self, hook: Hook) {
    self.add_hooks.push(hook);
  }

  pub fn add_rem_hook(&mut self, hook: Hook) {
    self.rem_hooks.push(hook);
  }

  pub fn load(&mut self, entries: Vec<(String, Value)>) -> Result<()> {
    for (id, value) in entries {
      self.add(Some(id), value)?;
    }
    return Ok(());
  }

  pub fn save(&self) -> Vec<(String, Value)> {
    let entries = match &self.backend {
      Backend::Indexed(state) => &state.entries,
      Backend::Linear(state) => &state.entries,
    };
    return entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_indexed_add_search() {
    let mut state = State::new_indexed(false);
    state.add(None, json!({"likes": "chips"})).unwrap();

    let hits = state.search(&json!({"likes": "?x"})).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].bindings.get("?x"), Some(&json!("chips")));
  }

  #[test]
  fn test_linear_add_search() {
    let mut state = State::new_linear(false);
    state.add(None, json!({"likes": "chips"})).unwrap();

    let hits = state.search(&json!({"likes": "?x"})).unwrap();
    assert_eq!(hits.len(), 1);
  }

  #[test]
  fn test_rem_removes_dangling_refs() {
    let mut state = State::new_indexed(false);
    let id = state.add(None, json!({"likes": "chips"})).unwrap();
    state.rem(&id);

    let hits = state.search(&json!({"likes": "?x"})).unwrap();
    assert!(hits.is_empty());
    assert_eq!(state.count(), 0);
  }

  #[test]
  fn test_hooks_fire_on_mutation() {
    use std::sync::{Arc, Mutex};

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut state = State::new_indexed(false);

    let seen_add = seen.clone();
    state.add_hook(Box::new(move |id, _value| {
      seen_add.lock().unwrap().push(format!("add:{id}"));
    }));

    let seen_rem = seen.clone();
    state.add_rem_hook(Box::new(move |id, _value| {
      seen_rem.lock().unwrap().push(format!("rem:{id}"));
    }));

    let id = state.add(Some("f1".to_string()), json!({"x": 1})).unwrap();
    state.rem(&id);

    let events = seen.lock().unwrap().clone();
    assert_eq!(events, vec!["add:f1".to_string(), "rem:f1".to_string()]);
  }

  #[test]
  fn test_rule_pattern_indexed_by_when() {
    let mut state = State::new_indexed(false);
    state
      .add(
        Some("rule1".to_string()),
        json!({"rule": {"when": {"pattern": {"arrived": "?who"}}}}),
      )
      .unwrap();

    let hits = state
      .search(&json!({"rule": {"when": {"pattern": {"arrived": "homer"}}}}))
      .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "rule1");
  }
}
