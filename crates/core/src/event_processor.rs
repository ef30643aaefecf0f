//! Given an event, finds matching rules and evaluates their condition/action
//! pipeline, per §4.4.

use serde::Serialize;
use serde_json::Value;

use crate::constants::DEFAULT_ACTION_INTERPRETER;
use crate::js;
use crate::json::Bindings;
use crate::location::Location;

/// Per-stage outcome of evaluating a rule against an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Disposition {
  Complete,
  PartialFailure,
  Failure,
}

/// One action's outcome under one surviving binding set.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
  pub endpoint: String,
  pub bindings: Bindings,
  pub value: Option<Value>,
  pub error: Option<String>,
}

/// One rule's outcome within a `FindRules` tree.
#[derive(Debug, Clone, Serialize)]
pub struct RuleResult {
  pub rule_id: String,
  pub disposition: Disposition,
  pub binding_sets: usize,
  pub actions: Vec<ActionResult>,
}

/// The tree produced by [`process_event`], recording per-rule, per-stage
/// disposition.
#[derive(Debug, Clone, Serialize)]
pub struct FindRules {
  pub disposition: Disposition,
  pub rules: Vec<RuleResult>,
}

/// Ingests `event` against `location`'s rules. For each matching, enabled
/// rule: unify `when.pattern`, fold the condition to a set of surviving
/// binding sets, then run every action under each surviving set.
pub async fn process_event(location: &Location, event: &Value) -> FindRules {
  let rule_hits = match location.search_rules(&json_pattern_wrapper(event)) {
    Ok(hits) => hits,
    Err(_) => {
      return FindRules {
        disposition: Disposition::Failure,
        rules: Vec::new(),
      };
    }
  };

  let mut rule_results = Vec::new();
  for hit in rule_hits {
    if !location.rule_enabled(&hit.id) {
      continue;
    }
    let Some(rule) = location.get_rule(&hit.id) else {
      continue;
    };

    let binding_sets = vec![hit.bindings.clone()];
    let binding_sets = if let Some(condition) = rule.get("condition") {
      eval_condition(location, condition, binding_sets).await
    } else {
      binding_sets
    };

    let mut actions = Vec::new();
    for bindings in &binding_sets {
      actions.extend(run_actions(location, &rule, bindings).await);
    }

    let disposition = if actions.iter().all(|a| a.error.is_none()) {
      Disposition::Complete
    } else if actions.iter().any(|a| a.error.is_none()) {
      Disposition::PartialFailure
    } else if actions.is_empty() {
      Disposition::Complete
    } else {
      Disposition::Failure
    };

    rule_results.push(RuleResult {
      rule_id: hit.id,
      disposition,
      binding_sets: binding_sets.len(),
      actions,
    });
  }

  let overall = if rule_results.iter().all(|r| r.disposition == Disposition::Complete) {
    Disposition::Complete
  } else if rule_results.iter().any(|r| r.disposition != Disposition::Failure) {
    Disposition::PartialFailure
  } else if rule_results.is_empty() {
    Disposition::Complete
  } else {
    Disposition::Failure
  };

  return FindRules {
    disposition: overall,
    rules: rule_results,
  };
}

fn json_pattern_wrapper(event: &Value) -> Value {
  return serde_json::json!({ "rule": { "when": { "pattern": event } } });
}

async fn eval_condition(
  location: &Location,
  condition: &Value,
  binding_sets: Vec<Bindings>,
) -> Vec<Bindings> {
  if binding_sets.is_empty() {
    return binding_sets;
  }

  if let Some(pattern) = condition.get("pattern") {
    let mut out = Vec::new();
    for bindings in binding_sets {
      let substituted = substitute(pattern, &bindings);
      if let Ok(hits) = location.search_facts(&substituted) {
        for hit in hits {
          let mut extended = bindings.clone();
          for (k, v) in hit.bindings {
            extended.insert(k, v);
          }
          out.push(extended);
        }
      }
    }
    return out;
  }

  if let Some(Value::Array(children)) = condition.get("and") {
    let mut current = binding_sets;
    for child in children {
      current = Box::pin(eval_condition(location, child, current)).await;
      if current.is_empty() {
        break;
      }
    }
    return current;
  }

  if let Some(Value::Array(children)) = condition.get("or") {
    let mut out = Vec::new();
    for child in children {
      out.extend(Box::pin(eval_condition(location, child, binding_sets.clone())).await);
    }
    return out;
  }

  if let Some(Value::String(code)) = condition.get("code") {
    let evaluator = location.evaluator();
    let mut out = Vec::new();
    for bindings in binding_sets {
      match evaluator.eval(code, bindings.clone(), location.props()).await {
        Ok(value) if js::is_falsy(&value) => {}
        Ok(Value::Object(extra)) => {
          let mut extended = bindings;
          for (k, v) in extra {
            extended.insert(k, v);
          }
          out.push(extended);
        }
        Ok(_) => out.push(bindings),
        Err(_) => {}
      }
    }
    return out;
  }

  return binding_sets;
}

async fn run_actions(location: &Location, rule: &Value, bindings: &Bindings) -> Vec<ActionResult> {
  let actions = match (rule.get("action"), rule.get("actions")) {
    (Some(one), _) => vec![one.clone()],
    (None, Some(Value::Array(many))) => many.clone(),
    _ => Vec::new(),
  };

  let mut results = Vec::new();
  for action in actions {
    let endpoint = action
      .get("endpoint")
      .and_then(Value::as_str)
      .unwrap_or(DEFAULT_ACTION_INTERPRETER)
      .to_string();

    let code = action.get("code").and_then(Value::as_str).unwrap_or_default();

    let result = match endpoint.as_str() {
      DEFAULT_ACTION_INTERPRETER => {
        location
          .evaluator()
          .eval(code, bindings.clone(), location.props())
          .await
      }
      other => Err(crate::error::Error::InvalidInput(format!(
        "unknown action interpreter '{other}'"
      ))),
    };

    results.push(match result {
      Ok(value) => ActionResult {
        endpoint,
        bindings: bindings.clone(),
        value: Some(value),
        error: None,
      },
      Err(err) => ActionResult {
        endpoint,
        bindings: bindings.clone(),
        value: None,
        error: Some(err.to_string()),
      },
    });
  }

  return results;
}

/// Substitutes bound variables into a nested condition pattern before
/// searching the fact store, so `{"likes":"?x"}` with `?x` already bound
/// becomes a concrete-value search.
fn substitute(pattern: &Value, bindings: &Bindings) -> Value {
  if let Some(name) = crate::json::variable_name(pattern) {
    if let Some(value) = bindings.get(name) {
      return value.clone();
    }
    return pattern.clone();
  }

  return match pattern {
    Value::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| (k.clone(), substitute(v, bindings)))
        .collect(),
    ),
    Value::Array(values) => Value::Array(values.iter().map(|v| substitute(v, bindings)).collect()),
    other => other.clone(),
  };
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::location::Control;
  use serde_json::json;
  use std::sync::Arc;
  use std::time::Duration;

  fn test_location() -> Location {
    let evaluator = Arc::new(js::Evaluator::spawn(
      crate::js::RuntimeMode::Scoped,
      Duration::from_secs(5),
    ));
    return Location::new("home", Control::default(), evaluator);
  }

  #[tokio::test]
  async fn test_pattern_only_rule_fires() {
    let loc = test_location();
    loc
      .add_rule(
        Some("r1".to_string()),
        json!({
          "rule": {
            "when": {"pattern": {"arrived": "?who"}},
            "action": {"endpoint": "javascript", "code": "return Env.bindings['?who'];"}
          }
        }),
      )
      .unwrap();

    let result = process_event(&loc, &json!({"arrived": "homer"})).await;
    assert_eq!(result.disposition, Disposition::Complete);
    assert_eq!(result.rules.len(), 1);
    assert_eq!(result.rules[0].actions.len(), 1);
  }

  #[tokio::test]
  async fn test_disabled_rule_does_not_fire() {
    let loc = test_location();
    let id = loc
      .add_rule(
        Some("r1".to_string()),
        json!({"rule": {"when": {"pattern": {"arrived": "?who"}}}}),
      )
      .unwrap();
    loc.set_rule_enabled(&id, false);

    let result = process_event(&loc, &json!({"arrived": "homer"})).await;
    assert!(result.rules.is_empty());
  }

  #[tokio::test]
  async fn test_condition_pattern_requires_supporting_fact() {
    let loc = test_location();
    loc
      .add_rule(
        Some("r1".to_string()),
        json!({
          "rule": {
            "when": {"pattern": {"arrived": "?who"}},
            "condition": {"pattern": {"likes": "?what"}}
          }
        }),
      )
      .unwrap();

    let before = process_event(&loc, &json!({"arrived": "homer"})).await;
    assert_eq!(before.rules[0].binding_sets, 0);

    loc.add_fact(None, json!({"likes": "chips"})).unwrap();
    let after = process_event(&loc, &json!({"arrived": "homer"})).await;
    assert_eq!(after.rules[0].binding_sets, 1);
  }
}
