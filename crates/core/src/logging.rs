//! Structured logging setup. Controlled by `RUST_LOG` for verbosity and
//! `RULES_LOGS` for output shape (`json` or the default human-readable
//! pretty form), mirroring the teacher's env-driven `tracing-subscriber`
//! init.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::constants::RULES_LOGS_ENV;

pub fn init() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let json_output = std::env::var(RULES_LOGS_ENV)
    .map(|v| v.eq_ignore_ascii_case("json"))
    .unwrap_or(false);

  let registry = tracing_subscriber::registry().with(filter);

  if json_output {
    registry.with(fmt::layer().json()).init();
  } else {
    registry.with(fmt::layer().compact()).init();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_init_does_not_panic_when_called_once() {
    // Subsequent calls in other tests would panic (global subscriber
    // already set); this just exercises the happy path once.
    let _ = std::panic::catch_unwind(init);
  }
}
