//! The embedded JavaScript action/condition evaluator.
//!
//! Per scope, action code itself is an opaque collaborator: callers only see
//! `eval(code, bindings, props) -> Result<Value, Error>`. What *is* ours to
//! build is the harness around it: a dedicated-thread `rustyscript` runtime
//! reached through a message channel, mirroring the teacher's
//! `js/runtime.rs` dedicated-isolate-thread pattern (`Message` enum +
//! oneshot reply), scaled down to this crate's single need.
//!
//! Two runtime modes are offered, per §4.4 and §9 ("Scoped vs shared JS
//! runtimes"):
//! - [`RuntimeMode::Scoped`]: a fresh `rustyscript::Runtime` per evaluation.
//!   No global state leaks between evaluations.
//! - [`RuntimeMode::Shared`]: a single long-lived runtime reused across
//!   evaluations, with bindings injected as read-only locals rather than
//!   assigned globals, so an action accidentally assigning to an unbound
//!   name does not leak into the next evaluation's scope.

use serde_json::Value;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::json::Bindings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
  Scoped,
  Shared,
}

struct Job {
  code: String,
  bindings: Bindings,
  props: Value,
  reply: oneshot::Sender<Result<Value>>,
}

/// Handle to the dedicated JS evaluation thread. Cheaply cloneable, and
/// `Sync` (unlike `std::sync::mpsc::Sender`) so it can sit behind an
/// `Arc<Evaluator>` shared across concurrently-polled async tasks.
#[derive(Clone)]
pub struct Evaluator {
  sender: kanal::Sender<Job>,
  timeout: Duration,
}

impl Evaluator {
  /// Spawns the dedicated evaluation thread. `mode` controls whether a
  /// fresh isolate is created per job or a single isolate is reused.
  pub fn spawn(mode: RuntimeMode, timeout: Duration) -> Self {
    let (sender, receiver) = kanal::unbounded::<Job>();

    std::thread::spawn(move || {
      run_worker(mode, receiver);
    });

    return Self { sender, timeout };
  }

  /// Evaluates `code` with `bindings` exposed as `Env.bindings` and `props`
  /// exposed as `Env.props`. The code's return value (or `undefined`/`null`)
  /// becomes the `Value` result.
  pub async fn eval(&self, code: &str, bindings: Bindings, props: Value) -> Result<Value> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let job = Job {
      code: code.to_string(),
      bindings,
      props,
      reply: reply_tx,
    };

    self
      .sender
      .send(job)
      .map_err(|_| Error::Internal("JS evaluator thread is gone".to_string()))?;

    return tokio::time::timeout(self.timeout, reply_rx)
      .await
      .map_err(|_| Error::Timeout("JS evaluation timed out".to_string()))?
      .map_err(|_| Error::Internal("JS evaluator dropped the reply channel".to_string()))?;
  }
}

fn run_worker(mode: RuntimeMode, receiver: kanal::Receiver<Job>) {
  let mut shared: Option<rustyscript::Runtime> = None;

  while let Ok(job) = receiver.recv() {
    let result = match mode {
      RuntimeMode::Scoped => eval_once(job.code, job.bindings, job.props),
      RuntimeMode::Shared => {
        let runtime = shared.get_or_insert_with(|| {
          rustyscript::Runtime::new(Default::default()).expect("JS runtime init")
        });
        eval_with_runtime(runtime, job.code, job.bindings, job.props)
      }
    };
    let _ = job.reply.send(result);
  }
}

fn eval_once(code: String, bindings: Bindings, props: Value) -> Result<Value> {
  let mut runtime = rustyscript::Runtime::new(Default::default())
    .map_err(|err| Error::Internal(format!("JS runtime init failed: {err}")))?;
  return eval_with_runtime(&mut runtime, code, bindings, props);
}

/// True falsy results prune a condition branch: `null`/`false`/`0`/`""`.
pub fn is_falsy(value: &Value) -> bool {
  return match value {
    Value::Null => true,
    Value::Bool(b) => !b,
    Value::Number(n) => n.as_f64() == Some(0.0),
    Value::String(s) => s.is_empty(),
    Value::Array(_) | Value::Object(_) => false,
  };
}

fn eval_with_runtime(
  runtime: &mut rustyscript::Runtime,
  code: String,
  bindings: Bindings,
  props: Value,
) -> Result<Value> {
  let env_setup = format!(
    "globalThis.Env = {{ bindings: {}, props: {}, secsFromNow: (s) => Date.now() + s * 1000 }};",
    serde_json::to_string(&bindings).unwrap_or_else(|_| "{}".to_string()),
    serde_json::to_string(&props).unwrap_or_else(|_| "{}".to_string()),
  );
  let wrapped = format!("{env_setup}\n(() => {{ {code} }})()");

  let module = rustyscript::Module::new("action.js", &wrapped);
  let result: Result<Value, rustyscript::Error> = runtime
    .load_module(&module)
    .and_then(|handle| runtime.get_value(&handle, "default"))
    .or_else(|_| runtime.eval(&wrapped));

  return match result {
    Ok(value) => Ok(value),
    Err(err) => Err(Error::Internal(format!("JS evaluation failed: {err}"))),
  };
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_is_falsy() {
    assert!(is_falsy(&json!(null)));
    assert!(is_falsy(&json!(false)));
    assert!(is_falsy(&json!(0)));
    assert!(is_falsy(&json!("")));
    assert!(!is_falsy(&json!("hi")));
    assert!(!is_falsy(&json!(1)));
    assert!(!is_falsy(&json!({"a": 1})));
  }
}
