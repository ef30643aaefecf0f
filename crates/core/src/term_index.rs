//! Inverted term index: `term -> ids` with an `id -> terms` reverse table for
//! O(1) removal, per §4.2.

use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct TermIndex {
  forward: IndexMap<String, IndexSet<String>>,
  reverse: IndexMap<String, IndexSet<String>>,
}

impl TermIndex {
  pub fn new() -> Self {
    return Self::default();
  }

  pub fn add(&mut self, term: impl Into<String>, id: impl Into<String>) {
    let term = term.into();
    let id = id.into();

    self.forward.entry(term.clone()).or_default().insert(id.clone());
    self.reverse.entry(id).or_default().insert(term);
  }

  pub fn rem(&mut self, term: &str, id: &str) {
    if let Some(ids) = self.forward.get_mut(term) {
      ids.shift_remove(id);
      if ids.is_empty() {
        self.forward.shift_remove(term);
      }
    }
    if let Some(terms) = self.reverse.get_mut(id) {
      terms.shift_remove(term);
      if terms.is_empty() {
        self.reverse.shift_remove(id);
      }
    }
  }

  /// Removes every `(term, id)` association for `id`.
  pub fn rem_id(&mut self, id: &str) {
    let Some(terms) = self.reverse.shift_remove(id) else {
      return;
    };
    for term in terms {
      if let Some(ids) = self.forward.get_mut(&term) {
        ids.shift_remove(id);
        if ids.is_empty() {
          self.forward.shift_remove(&term);
        }
      }
    }
  }

  /// Removes `id` from exactly the given `terms`, without consulting the
  /// reverse table (used when the caller already knows the term set, e.g.
  /// because it is re-indexing).
  pub fn rem_id_terms(&mut self, terms: &[String], id: &str) {
    for term in terms {
      self.rem(term, id);
    }
  }

  /// Intersection of the id sets for every term in `terms`. Empty `terms` is
  /// `InvalidInput` per §4.2; unknown terms contribute the empty set, so the
  /// intersection short-circuits to empty.
  pub fn search(&self, terms: &[String]) -> Result<IndexSet<String>> {
    if terms.is_empty() {
      return Err(Error::InvalidInput(
        "term index search requires at least one term".to_string(),
      ));
    }

    let mut sets: Vec<&IndexSet<String>> = Vec::with_capacity(terms.len());
    for term in terms {
      match self.forward.get(term) {
        Some(ids) => sets.push(ids),
        None => return Ok(IndexSet::new()),
      }
    }

    sets.sort_by_key(|s| s.len());
    let mut iter = sets.into_iter();
    let Some(first) = iter.next() else {
      return Ok(IndexSet::new());
    };

    let mut result: IndexSet<String> = first.clone();
    for set in iter {
      result.retain(|id| set.contains(id));
      if result.is_empty() {
        break;
      }
    }
    return Ok(result);
  }

  pub fn len(&self) -> usize {
    return self.reverse.len();
  }

  pub fn is_empty(&self) -> bool {
    return self.reverse.is_empty();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_intersection() {
    let mut index = TermIndex::new();
    index.add("homer", "1");
    index.add("homer", "2");
    index.add("simpson", "1");

    let found = index.search(&["homer".to_string(), "simpson".to_string()]).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found.contains("1"));
  }

  #[test]
  fn test_empty_query_fails() {
    let index = TermIndex::new();
    assert!(index.search(&[]).is_err());
  }

  #[test]
  fn test_unknown_term_short_circuits() {
    let mut index = TermIndex::new();
    index.add("homer", "1");

    let found = index
      .search(&["homer".to_string(), "nonexistent".to_string()])
      .unwrap();
    assert!(found.is_empty());
  }

  #[test]
  fn test_rem_id_restores_empty() {
    let mut index = TermIndex::new();
    index.add("homer", "1");
    index.add("simpson", "1");
    index.rem_id("1");

    assert!(index.is_empty());
    assert!(index.search(&["homer".to_string()]).unwrap().is_empty());
  }
}
