#![forbid(unsafe_code, clippy::unwrap_used)]
#![allow(clippy::needless_return)]
#![warn(clippy::await_holding_lock, clippy::inefficient_to_string)]

pub mod config;
pub mod connection;
pub mod constants;
pub mod cron;
pub mod crolt;
pub mod data_dir;
pub mod error;
pub mod event_processor;
pub mod js;
pub mod json;
pub mod location;
pub mod logging;
pub mod pattern_index;
pub mod server;
pub mod system;
pub mod term_index;

mod state;

pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use location::{Control, Location};
pub use system::System;

pub(crate) mod rand {
  use rand::{
    CryptoRng,
    distr::{Alphanumeric, SampleString},
  };

  pub(crate) fn generate_random_string(length: usize) -> String {
    let mut rng = rand::rng();
    let _: &dyn CryptoRng = &rng;

    return Alphanumeric.sample_string(&mut rng, length);
  }

  #[cfg(test)]
  mod tests {
    use super::*;

    #[test]
    fn test_generate_random_string() {
      let n = 20;
      let first = generate_random_string(20);
      assert_eq!(n, first.len());
      let second = generate_random_string(20);
      assert_eq!(n, second.len());
      assert_ne!(first, second);
    }
  }
}
