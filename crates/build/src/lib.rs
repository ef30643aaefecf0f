#![allow(clippy::needless_return)]

pub mod version;

use std::io::Result;
use std::path::Path;

pub fn rerun_if_changed(path: impl AsRef<Path>) {
  let path_str = path.as_ref().to_string_lossy().to_string();
  // WARN: watching non-existent paths will also trigger rebuilds.
  if !std::fs::exists(path).unwrap_or(false) {
    panic!("Path '{path_str}' doesn't exist");
  }
  println!("cargo::rerun-if-changed={path_str}");
}

pub fn init_env_logger() {
  env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
}
