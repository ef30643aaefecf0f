//! The rules-engine HTTP surface, per §6.1.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State as AxumState};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::json::Bindings;
use crate::system::System;

pub fn router(system: System) -> axum::Router {
  return axum::Router::new()
    .route("/api/version", get(version))
    .route("/api/loc/{loc}/facts/add", post(facts_add))
    .route("/api/loc/{loc}/facts/rem", post(facts_rem))
    .route("/api/loc/{loc}/facts/search", post(facts_search))
    .route("/api/loc/{loc}/rules/add", post(rules_add))
    .route("/api/loc/{loc}/rules/list", get(rules_list))
    .route("/api/loc/{loc}/rules/enable", post(rules_enable))
    .route("/api/loc/{loc}/events/ingest", post(events_ingest))
    .route("/api/loc/{loc}/admin/clear", post(admin_clear))
    .route("/api/sys/admin/shutdown", post(sys_shutdown))
    .route("/api/sys/util/js", post(sys_util_js))
    .layer(TraceLayer::new_for_http())
    .with_state(system);
}

async fn version() -> Json<Value> {
  return Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }));
}

#[derive(Deserialize)]
struct AddFactRequest {
  id: Option<String>,
  fact: Value,
}

#[derive(Serialize)]
struct IdResponse {
  id: String,
}

async fn facts_add(
  AxumState(system): AxumState<System>,
  Path(loc): Path<String>,
  Json(req): Json<AddFactRequest>,
) -> Result<Json<IdResponse>> {
  let location = system.require_location(&loc)?;
  let id = location.add_fact(req.id, req.fact)?;
  return Ok(Json(IdResponse { id }));
}

#[derive(Deserialize)]
struct RemFactRequest {
  id: String,
}

async fn facts_rem(
  AxumState(system): AxumState<System>,
  Path(loc): Path<String>,
  Json(req): Json<RemFactRequest>,
) -> Result<Json<Value>> {
  let location = system.require_location(&loc)?;
  let removed = location.rem_fact(&req.id);
  return Ok(Json(serde_json::json!({ "removed": removed.is_some() })));
}

#[derive(Deserialize)]
struct SearchRequest {
  pattern: Value,
}

#[derive(Serialize)]
struct SearchHitResponse {
  id: String,
  value: Value,
  bindings: Bindings,
}

async fn facts_search(
  AxumState(system): AxumState<System>,
  Path(loc): Path<String>,
  Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHitResponse>>> {
  let location = system.require_location(&loc)?;
  let hits = location.search_facts(&req.pattern)?;
  return Ok(Json(
    hits
      .into_iter()
      .map(|h| SearchHitResponse {
        id: h.id,
        value: h.value,
        bindings: h.bindings,
      })
      .collect(),
  ));
}

#[derive(Deserialize)]
struct AddRuleRequest {
  id: Option<String>,
  rule: Value,
}

async fn rules_add(
  AxumState(system): AxumState<System>,
  Path(loc): Path<String>,
  Json(req): Json<AddRuleRequest>,
) -> Result<Json<IdResponse>> {
  let location = system.require_location(&loc)?;
  let id = location.add_rule(req.id, req.rule)?;
  return Ok(Json(IdResponse { id }));
}

#[derive(Serialize)]
struct RuleListEntry {
  id: String,
  rule: Value,
  enabled: bool,
}

async fn rules_list(AxumState(system): AxumState<System>, Path(loc): Path<String>) -> Result<Json<Vec<RuleListEntry>>> {
  let location = system.require_location(&loc)?;
  let rules = location.list_rules();
  return Ok(Json(
    rules
      .into_iter()
      .map(|(id, rule)| {
        let enabled = location.rule_enabled(&id);
        RuleListEntry { id, rule, enabled }
      })
      .collect(),
  ));
}

#[derive(Deserialize)]
struct EnableRuleRequest {
  id: String,
  enabled: bool,
}

async fn rules_enable(
  AxumState(system): AxumState<System>,
  Path(loc): Path<String>,
  Json(req): Json<EnableRuleRequest>,
) -> Result<Json<Value>> {
  let location = system.require_location(&loc)?;
  location.set_rule_enabled(&req.id, req.enabled);
  return Ok(Json(serde_json::json!({ "ok": true })));
}

async fn events_ingest(
  AxumState(system): AxumState<System>,
  Path(loc): Path<String>,
  Json(event): Json<Value>,
) -> Result<Json<crate::event_processor::FindRules>> {
  let location = system.require_location(&loc)?;
  let result = crate::event_processor::process_event(&location, &event).await;
  location.record_event_processed();
  return Ok(Json(result));
}

async fn admin_clear(AxumState(system): AxumState<System>, Path(loc): Path<String>) -> Result<Json<Value>> {
  let location = system.require_location(&loc)?;
  location.clear();
  return Ok(Json(serde_json::json!({ "ok": true })));
}

async fn sys_shutdown(AxumState(_system): AxumState<System>) -> Result<Json<Value>> {
  tokio::spawn(async {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    std::process::exit(0);
  });
  return Ok(Json(serde_json::json!({ "shuttingDown": true })));
}

#[derive(Deserialize)]
struct UtilJsRequest {
  code: String,
  #[serde(default)]
  bindings: Bindings,
}

async fn sys_util_js(AxumState(system): AxumState<System>, Json(req): Json<UtilJsRequest>) -> Result<Json<Value>> {
  let value = system
    .evaluator()
    .eval(&req.code, req.bindings, Value::Null)
    .await?;
  return Ok(Json(value));
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum_test::TestServer;

  async fn test_system() -> System {
    let rules_conn = crate::connection::init_db(None).unwrap();
    let crolt_conn = crate::connection::init_db(None).unwrap();
    let config = crate::config::EngineConfig {
      location_ttl: None,
      ..Default::default()
    };
    return System::new(config, rules_conn, crolt_conn).await.unwrap();
  }

  #[tokio::test]
  async fn test_add_fact_and_search_round_trip() {
    let system = test_system().await;
    let app = router(system);
    let server = TestServer::new(app).unwrap();

    let add = server
      .post("/api/loc/home/facts/add")
      .json(&serde_json::json!({"fact": {"likes": "chips"}}))
      .await;
    add.assert_status_ok();

    let search = server
      .post("/api/loc/home/facts/search")
      .json(&serde_json::json!({"pattern": {"likes": "?x"}}))
      .await;
    search.assert_status_ok();
    let hits: Vec<SearchHitResponse> = search.json();
    assert_eq!(hits.len(), 1);
  }

  #[tokio::test]
  async fn test_ingest_event_fires_rule() {
    let system = test_system().await;
    let app = router(system);
    let server = TestServer::new(app).unwrap();

    server
      .post("/api/loc/home/rules/add")
      .json(&serde_json::json!({
        "rule": {
          "when": {"pattern": {"arrived": "?who"}},
          "action": {"endpoint": "javascript", "code": "return Env.bindings['?who'];"}
        }
      }))
      .await
      .assert_status_ok();

    let ingest = server
      .post("/api/loc/home/events/ingest")
      .json(&serde_json::json!({"arrived": "homer"}))
      .await;
    ingest.assert_status_ok();
  }
}
