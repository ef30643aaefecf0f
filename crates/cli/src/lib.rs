#![allow(clippy::needless_return)]

mod args;

pub use args::{Cli, Commands, EngineArgs, StorageArgs};
