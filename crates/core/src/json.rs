//! Helpers for treating [`serde_json::Value`] as the tagged JSON variant the
//! pattern index and unifier need: predicates for "is a pattern variable", for
//! "is a homogeneous, sortable array", and for flattening a JSON object into
//! an ordered sequence of path/value pairs.

use indexmap::IndexMap;
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Mapping from `?name` to a bound JSON value, produced by unification.
pub type Bindings = IndexMap<String, Value>;

/// True if `s` is a pattern variable reference, e.g. `"?x"`.
pub fn is_variable_str(s: &str) -> bool {
  return s.starts_with('?') && s.len() > 1;
}

/// True if `value` is a JSON string that denotes a pattern variable.
pub fn is_variable(value: &Value) -> bool {
  return matches!(value, Value::String(s) if is_variable_str(s));
}

pub fn variable_name(value: &Value) -> Option<&str> {
  if let Value::String(s) = value {
    if is_variable_str(s) {
      return Some(s);
    }
  }
  return None;
}

/// An array is "homogeneous" if every element is the same scalar JSON kind
/// (null/bool/number/string are scalar kinds; nested arrays/objects are not).
pub fn is_homogeneous_array(values: &[Value]) -> bool {
  let Some(first) = values.first() else {
    return true;
  };
  let kind = scalar_kind(first);
  let Some(kind) = kind else {
    return false;
  };
  return values.iter().all(|v| scalar_kind(v) == Some(kind));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
  Null,
  Bool,
  Number,
  String,
}

fn scalar_kind(value: &Value) -> Option<ScalarKind> {
  return match value {
    Value::Null => Some(ScalarKind::Null),
    Value::Bool(_) => Some(ScalarKind::Bool),
    Value::Number(_) => Some(ScalarKind::Number),
    Value::String(_) => Some(ScalarKind::String),
    Value::Array(_) | Value::Object(_) => None,
  };
}

/// Encodes a homogeneous array as a sortable, stable string key usable as a
/// trie branch, e.g. `A:N_1,N_2,N_3` or `A:S_bar,S_foo`.
///
/// Returns `InvalidInput` if the array is not homogeneous/sortable.
pub fn encode_array_key(values: &[Value]) -> Result<String> {
  if !is_homogeneous_array(values) {
    return Err(Error::InvalidInput(
      "array pattern/fact values must be homogeneous scalars".to_string(),
    ));
  }

  let mut encoded: Vec<String> = values.iter().map(encode_scalar).collect();
  encoded.sort();

  return Ok(format!("A:{}", encoded.join(",")));
}

/// Encodes a single scalar JSON value as a trie branch key, e.g. `S_foo`,
/// `N_3.14`, `B_true`, `NULL`.
pub fn encode_scalar(value: &Value) -> String {
  return match value {
    Value::Null => "NULL".to_string(),
    Value::Bool(b) => format!("B_{b}"),
    Value::Number(n) => format!("N_{n}"),
    Value::String(s) => format!("S_{s}"),
    Value::Array(_) | Value::Object(_) => unreachable!("encode_scalar called on non-scalar"),
  };
}

/// A leaf key for the pattern trie's `String`/value map: either a scalar
/// encoding or a homogeneous array encoding.
pub fn encode_value_key(value: &Value) -> Result<String> {
  return match value {
    Value::Array(values) => encode_array_key(values),
    scalar => Ok(encode_scalar(scalar)),
  };
}

/// One step of the flattened property path used to walk the pattern trie.
#[derive(Debug, Clone)]
pub struct PathEntry {
  pub property: String,
  pub value: Value,
}

/// Flattens a JSON object into an ordered sequence of `(property, value)`
/// pairs, ordered lexicographically by key so that two semantically
/// equivalent objects (same keys, different source enumeration order)
/// produce the same flattened sequence, and therefore the same trie path.
///
/// Nested objects recurse with dotted paths (`a.b`); nested arrays of
/// scalars are kept as a single leaf value (matched via
/// [`encode_array_key`]); arrays containing non-scalars are rejected.
pub fn flatten_object(object: &serde_json::Map<String, Value>) -> Result<Vec<PathEntry>> {
  let mut keys: Vec<&String> = object.keys().collect();
  keys.sort();

  let mut out = Vec::with_capacity(object.len());
  for key in keys {
    let value = &object[key];
    flatten_value(key, value, &mut out)?;
  }
  return Ok(out);
}

fn flatten_value(path: &str, value: &Value, out: &mut Vec<PathEntry>) -> Result<()> {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      for key in keys {
        flatten_value(&format!("{path}.{key}"), &map[key], out)?;
      }
    }
    Value::Array(values) => {
      if !values.is_empty() && !is_homogeneous_array(values) {
        return Err(Error::InvalidInput(format!(
          "non-homogeneous array at path '{path}'"
        )));
      }
      out.push(PathEntry {
        property: path.to_string(),
        value: value.clone(),
      });
    }
    scalar => {
      out.push(PathEntry {
        property: path.to_string(),
        value: scalar.clone(),
      });
    }
  }
  return Ok(());
}

/// Attempts to unify a pattern value against a fact value, extending
/// `bindings` in place. Returns `true` on success; on failure `bindings` may
/// have been partially extended by the caller's discretion (callers should
/// clone before attempting unification if they need rollback).
pub fn unify(pattern: &Value, fact: &Value, bindings: &mut Bindings) -> bool {
  if let Some(name) = variable_name(pattern) {
    if let Some(existing) = bindings.get(name) {
      return existing == fact;
    }
    bindings.insert(name.to_string(), fact.clone());
    return true;
  }

  return match (pattern, fact) {
    (Value::Object(p), Value::Object(f)) => {
      for (key, pv) in p {
        let Some(fv) = f.get(key) else {
          return false;
        };
        if !unify(pv, fv, bindings) {
          return false;
        }
      }
      true
    }
    (Value::Array(p), Value::Array(f)) => {
      if p.len() != f.len() {
        return false;
      }
      let mut ps: Vec<&Value> = p.iter().collect();
      let mut fs: Vec<&Value> = f.iter().collect();
      ps.sort_by(cmp_values);
      fs.sort_by(cmp_values);
      for (pv, fv) in ps.into_iter().zip(fs) {
        if pv != fv {
          return false;
        }
      }
      true
    }
    (a, b) => a == b,
  };
}

fn cmp_values(a: &&Value, b: &&Value) -> Ordering {
  return encode_scalar(a).cmp(&encode_scalar(b));
}

/// Constraint from §3: fact objects may not carry a top-level `createdAt`
/// property, and property names starting with `?` are variables, disallowed
/// as fact keys unless `allow_property_variables` is set.
pub fn validate_fact(fact: &Value, allow_property_variables: bool) -> Result<()> {
  let Value::Object(map) = fact else {
    return Err(Error::InvalidInput("fact must be a JSON object".to_string()));
  };

  if map.contains_key("createdAt") {
    return Err(Error::InvalidInput(
      "fact may not declare a top-level 'createdAt' property".to_string(),
    ));
  }

  if !allow_property_variables {
    for key in map.keys() {
      if is_variable_str(key) {
        return Err(Error::InvalidInput(format!(
          "property-variables disabled: '{key}' is not a legal fact key"
        )));
      }
    }
  }

  return Ok(());
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_is_variable() {
    assert!(is_variable(&json!("?x")));
    assert!(!is_variable(&json!("x")));
    assert!(!is_variable(&json!("?")));
    assert!(!is_variable(&json!(42)));
  }

  #[test]
  fn test_homogeneous_array() {
    assert!(is_homogeneous_array(&[json!(1), json!(2), json!(3)]));
    assert!(!is_homogeneous_array(&[json!(1), json!("a")]));
    assert!(!is_homogeneous_array(&[json!([1]), json!([2])]));
  }

  #[test]
  fn test_encode_array_key_order_independent() {
    let a = encode_array_key(&[json!(3), json!(1), json!(2)]).unwrap();
    let b = encode_array_key(&[json!(1), json!(2), json!(3)]).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn test_flatten_object_order_independent() {
    let a = serde_json::json!({"b": 1, "a": 2});
    let b = serde_json::json!({"a": 2, "b": 1});

    let flat_a = flatten_object(a.as_object().unwrap()).unwrap();
    let flat_b = flatten_object(b.as_object().unwrap()).unwrap();

    let paths_a: Vec<_> = flat_a.iter().map(|e| e.property.clone()).collect();
    let paths_b: Vec<_> = flat_b.iter().map(|e| e.property.clone()).collect();
    assert_eq!(paths_a, paths_b);
  }

  #[test]
  fn test_unify_basic() {
    let pattern = json!({"likes": "?x"});
    let fact = json!({"likes": "chips"});
    let mut bindings = Bindings::new();
    assert!(unify(&pattern, &fact, &mut bindings));
    assert_eq!(bindings.get("?x"), Some(&json!("chips")));
  }

  #[test]
  fn test_unify_repeated_variable_must_match() {
    let pattern = json!({"a": "?x", "b": "?x"});
    let fact_ok = json!({"a": 1, "b": 1});
    let fact_bad = json!({"a": 1, "b": 2});

    let mut bindings = Bindings::new();
    assert!(unify(&pattern, &fact_ok, &mut bindings));

    let mut bindings = Bindings::new();
    assert!(!unify(&pattern, &fact_bad, &mut bindings));
  }

  #[test]
  fn test_validate_fact_rejects_created_at() {
    let fact = json!({"createdAt": 1});
    assert!(validate_fact(&fact, false).is_err());
  }

  #[test]
  fn test_validate_fact_rejects_variable_keys_by_default() {
    let fact = json!({"?x": 1});
    assert!(validate_fact(&fact, false).is_err());
    assert!(validate_fact(&fact, true).is_ok());
  }
}
