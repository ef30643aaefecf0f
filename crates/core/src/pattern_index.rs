//! Discrimination-tree-style pattern index.
//!
//! A recursive trie node carries four maps: `string` (exact-value branches,
//! keyed by [`crate::json::encode_value_key`]), `var` (unconstrained
//! branches, one per variable name, all of which match any value), `map`
//! (one branch per nested object property), and `ids` (the set of
//! rule/pattern ids that terminate at this node).

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::json::{self, PathEntry};

type Id = String;

#[derive(Debug, Default)]
struct Node {
  string: IndexMap<String, Node>,
  var: IndexMap<String, Node>,
  map: IndexMap<String, Node>,
  ids: IndexSet<Id>,
}

/// A trie-backed index from JSON patterns to the ids of the patterns that
/// would match a given fact.
#[derive(Debug, Default)]
pub struct PatternIndex {
  root: Node,
  allow_property_variables: bool,
}

impl PatternIndex {
  pub fn new(allow_property_variables: bool) -> Self {
    return Self {
      root: Node::default(),
      allow_property_variables,
    };
  }

  /// Adds `pattern` under `id`. Adding the same `(pattern, id)` pair twice is
  /// idempotent.
  pub fn add(&mut self, pattern: &Value, id: impl Into<Id>) -> Result<()> {
    let Value::Object(object) = pattern else {
      return Err(Error::InvalidInput("pattern must be a JSON object".to_string()));
    };
    let path = json::flatten_object(object)?;
    let id = id.into();

    let mut node = &mut self.root;
    for entry in &path {
      node = Self::descend_mut(node, entry, self.allow_property_variables)?;
    }
    node.ids.insert(id);
    return Ok(());
  }

  /// Removes `(pattern, id)`. Not present is not an error (mirrors Add,
  /// §4.1).
  pub fn remove(&mut self, pattern: &Value, id: &str) -> Result<()> {
    let Value::Object(object) = pattern else {
      return Err(Error::InvalidInput("pattern must be a JSON object".to_string()));
    };
    let path = json::flatten_object(object)?;
    Self::remove_path(&mut self.root, &path, id, self.allow_property_variables);
    return Ok(());
  }

  /// Returns the union of all ids whose pattern unifies with `fact`.
  pub fn search(&self, fact: &Value) -> Result<IndexSet<Id>> {
    let Value::Object(object) = fact else {
      return Err(Error::InvalidInput("fact must be a JSON object".to_string()));
    };
    let path = json::flatten_object(object)?;

    let mut out = IndexSet::new();
    Self::collect(&self.root, &path, &mut out);
    return Ok(out);
  }

  fn descend_mut<'a>(
    node: &'a mut Node,
    entry: &PathEntry,
    allow_property_variables: bool,
  ) -> Result<&'a mut Node> {
    let map_child = if json::is_variable_str(&entry.property) {
      if !allow_property_variables {
        return Err(Error::InvalidInput(format!(
          "property-variables disabled: '{}' is not a legal pattern key",
          entry.property
        )));
      }
      node.map.entry(entry.property.clone()).or_default()
    } else {
      node.map.entry(entry.property.clone()).or_default()
    };

    if let Some(var_name) = json::variable_name(&entry.value) {
      return Ok(map_child.var.entry(var_name.to_string()).or_default());
    }

    let key = json::encode_value_key(&entry.value)?;
    return Ok(map_child.string.entry(key).or_default());
  }

  fn remove_path(node: &mut Node, path: &[PathEntry], id: &str, allow_property_variables: bool) {
    let Some((head, rest)) = path.split_first() else {
      node.ids.shift_remove(id);
      return;
    };
    let _ = allow_property_variables;

    let Some(map_child) = node.map.get_mut(&head.property) else {
      return;
    };

    if let Some(var_name) = json::variable_name(&head.value) {
      if let Some(child) = map_child.var.get_mut(var_name) {
        Self::remove_path(child, rest, id, allow_property_variables);
        if Self::is_empty(child) {
          map_child.var.shift_remove(var_name);
        }
      }
    } else if let Ok(key) = json::encode_value_key(&head.value) {
      if let Some(child) = map_child.string.get_mut(&key) {
        Self::remove_path(child, rest, id, allow_property_variables);
        if Self::is_empty(child) {
          map_child.string.shift_remove(&key);
        }
      }
    }

    if Self::is_empty(map_child) {
      node.map.shift_remove(&head.property);
    }
  }

  fn is_empty(node: &Node) -> bool {
    return node.ids.is_empty() && node.string.is_empty() && node.var.is_empty() && node.map.is_empty();
  }

  /// Descends one trie level per query property. A stored branch is a
  /// `var` branch when the *added* side had a variable there (matches any
  /// query value); the query side itself may also carry a variable (e.g.
  /// a fact search querying `{"likes": "?x"}`), in which case it matches
  /// every stored branch at that property, not just an exact key.
  ///
  /// A query property the stored pattern never mentioned is not a
  /// mismatch: a pattern is a subset constraint, so the query (fact) is
  /// free to carry extra properties. Every property is therefore tried
  /// both ways — skip it and keep matching the rest against this same
  /// node, and (if a branch exists) descend it — so a fact superset of a
  /// stored pattern's keys still reaches the pattern's terminal ids.
  fn collect(node: &Node, path: &[PathEntry], out: &mut IndexSet<Id>) {
    let Some((head, rest)) = path.split_first() else {
      out.extend(node.ids.iter().cloned());
      return;
    };

    Self::collect(node, rest, out);

    let Some(map_child) = node.map.get(&head.property) else {
      return;
    };

    if json::variable_name(&head.value).is_some() {
      for child in map_child.string.values() {
        Self::collect(child, rest, out);
      }
    } else if let Ok(key) = json::encode_value_key(&head.value) {
      if let Some(child) = map_child.string.get(&key) {
        Self::collect(child, rest, out);
      }
    }

    for child in map_child.var.values() {
      Self::collect(child, rest, out);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_add_search_basic() {
    let mut index = PatternIndex::new(false);
    index.add(&json!({"likes": "?x"}), "p1").unwrap();

    let found = index.search(&json!({"likes": "chips"})).unwrap();
    assert!(found.contains("p1"));
  }

  #[test]
  fn test_disjoint_fact_not_found() {
    let mut index = PatternIndex::new(false);
    index.add(&json!({"likes": "chips"}), "p1").unwrap();

    let found = index.search(&json!({"likes": "soda"})).unwrap();
    assert!(!found.contains("p1"));
  }

  #[test]
  fn test_order_independence() {
    let mut index = PatternIndex::new(false);
    index.add(&json!({"a": 1, "b": "?x"}), "p1").unwrap();

    let found_1 = index.search(&json!({"a": 1, "b": 2})).unwrap();
    let found_2 = index.search(&json!({"b": 2, "a": 1})).unwrap();
    assert_eq!(found_1, found_2);
    assert!(found_1.contains("p1"));
  }

  #[test]
  fn test_remove_restores_empty() {
    let mut index = PatternIndex::new(false);
    let pattern = json!({"likes": "?x"});
    index.add(&pattern, "p1").unwrap();
    index.remove(&pattern, "p1").unwrap();

    let found = index.search(&json!({"likes": "chips"})).unwrap();
    assert!(found.is_empty());
    assert!(index.root.map.is_empty());
  }

  #[test]
  fn test_non_homogeneous_array_rejected() {
    let mut index = PatternIndex::new(false);
    let err = index.add(&json!({"xs": [1, "a"]}), "p1").unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }

  #[test]
  fn test_array_match_sorted_equality() {
    let mut index = PatternIndex::new(false);
    index.add(&json!({"xs": [3, 1, 2]}), "p1").unwrap();

    let found = index.search(&json!({"xs": [1, 2, 3]})).unwrap();
    assert!(found.contains("p1"));
  }

  #[test]
  fn test_fact_with_extra_properties_still_matches() {
    let mut index = PatternIndex::new(false);
    index.add(&json!({"arrived": "?who"}), "p1").unwrap();

    let found = index.search(&json!({"arrived": "homer", "loc": "bar"})).unwrap();
    assert!(found.contains("p1"));
  }

  #[test]
  fn test_property_variable_requires_flag() {
    let mut index = PatternIndex::new(false);
    let err = index.add(&json!({"?prop": "x"}), "p1").unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let mut index = PatternIndex::new(true);
    assert!(index.add(&json!({"?prop": "x"}), "p1").is_ok());
  }
}
