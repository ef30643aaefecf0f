//! Layered configuration: CLI flags take precedence over environment
//! variables, which take precedence over an optional JSON config file,
//! which takes precedence over the built-in defaults. Per §2.1/§6.5/§6.6.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
  DEFAULT_CRON_CAPACITY, DEFAULT_HTTP_TIMEOUT, DEFAULT_JS_TIMEOUT, DEFAULT_LOCATION_TTL,
  DEFAULT_MAX_FACTS, DEFAULT_MAX_LOCATIONS,
};
use crate::error::{Error, Result};

/// Values that may come from the optional JSON config file. Every field is
/// optional so a file can override just the knobs it cares about.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
  pub max_locations: Option<usize>,
  pub max_facts: Option<usize>,
  pub location_ttl_secs: Option<u64>,
  pub cron_capacity: Option<usize>,
  pub cron_url: Option<String>,
  pub rules_url: Option<String>,
  pub http_timeout_secs: Option<u64>,
  pub js_timeout_secs: Option<u64>,
}

impl ConfigFile {
  pub fn load(path: &std::path::Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)?;
    let parsed: Self = serde_json::from_str(&contents)?;
    return Ok(parsed);
  }
}

/// Fully-resolved, effective configuration for one engine process.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub max_locations: usize,
  pub max_facts: usize,
  pub location_ttl: Option<Duration>,
  pub cron_capacity: usize,
  pub cron_url: Option<url::Url>,
  pub rules_url: Option<url::Url>,
  pub http_timeout: Duration,
  pub js_timeout: Duration,
  pub data_dir: PathBuf,
}

impl Default for EngineConfig {
  fn default() -> Self {
    return Self {
      max_locations: DEFAULT_MAX_LOCATIONS,
      max_facts: DEFAULT_MAX_FACTS,
      location_ttl: Some(DEFAULT_LOCATION_TTL),
      cron_capacity: DEFAULT_CRON_CAPACITY,
      cron_url: None,
      rules_url: None,
      http_timeout: DEFAULT_HTTP_TIMEOUT,
      js_timeout: DEFAULT_JS_TIMEOUT,
      data_dir: PathBuf::from(crate::data_dir::DataDir::DEFAULT),
    };
  }
}

impl EngineConfig {
  /// Applies a config file's overrides, then env vars, onto the defaults.
  /// `cli_*` arguments, when `Some`, win over everything.
  pub fn resolve(
    file: Option<ConfigFile>,
    cli_max_locations: Option<usize>,
    cli_max_facts: Option<usize>,
    cli_cron_url: Option<String>,
    cli_rules_url: Option<String>,
    cli_data_dir: Option<PathBuf>,
  ) -> Result<Self> {
    let mut config = Self::default();

    if let Some(file) = file {
      if let Some(v) = file.max_locations {
        config.max_locations = v;
      }
      if let Some(v) = file.max_facts {
        config.max_facts = v;
      }
      if let Some(v) = file.location_ttl_secs {
        config.location_ttl = Some(Duration::from_secs(v));
      }
      if let Some(v) = file.cron_capacity {
        config.cron_capacity = v;
      }
      if let Some(v) = file.cron_url {
        config.cron_url = Some(parse_url(&v)?);
      }
      if let Some(v) = file.rules_url {
        config.rules_url = Some(parse_url(&v)?);
      }
      if let Some(v) = file.http_timeout_secs {
        config.http_timeout = Duration::from_secs(v);
      }
      if let Some(v) = file.js_timeout_secs {
        config.js_timeout = Duration::from_secs(v);
      }
    }

    if let Ok(v) = std::env::var("RULES_MAX_LOCATIONS") {
      config.max_locations = v
        .parse()
        .map_err(|_| Error::InvalidInput(format!("RULES_MAX_LOCATIONS: invalid integer '{v}'")))?;
    }
    if let Ok(v) = std::env::var("RULES_MAX_FACTS") {
      config.max_facts = v
        .parse()
        .map_err(|_| Error::InvalidInput(format!("RULES_MAX_FACTS: invalid integer '{v}'")))?;
    }
    if let Ok(v) = std::env::var(crate::constants::RULES_CRON_OVERRIDE_ENV) {
      config.cron_url = Some(parse_url(&v)?);
    }

    if let Some(v) = cli_max_locations {
      config.max_locations = v;
    }
    if let Some(v) = cli_max_facts {
      config.max_facts = v;
    }
    if let Some(v) = cli_cron_url {
      config.cron_url = Some(parse_url(&v)?);
    }
    if let Some(v) = cli_rules_url {
      config.rules_url = Some(parse_url(&v)?);
    }
    if let Some(v) = cli_data_dir {
      config.data_dir = v;
    }

    return Ok(config);
  }
}

fn parse_url(s: &str) -> Result<url::Url> {
  return url::Url::parse(s).map_err(|err| Error::InvalidInput(format!("invalid URL '{s}': {err}")));
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = EngineConfig::default();
    assert_eq!(config.max_locations, DEFAULT_MAX_LOCATIONS);
  }

  #[test]
  fn test_cli_overrides_file() {
    let file = ConfigFile {
      max_locations: Some(5),
      ..Default::default()
    };
    let config = EngineConfig::resolve(Some(file), Some(42), None, None, None, None).unwrap();
    assert_eq!(config.max_locations, 42);
  }

  #[test]
  fn test_file_overrides_default() {
    let file = ConfigFile {
      max_facts: Some(7),
      ..Default::default()
    };
    let config = EngineConfig::resolve(Some(file), None, None, None, None, None).unwrap();
    assert_eq!(config.max_facts, 7);
  }
}
