use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "rulehub", version, about = "Rules engine, in-memory cron, and crolt storage tool")]
pub struct Cli {
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
  /// Runs the rules-engine HTTP server.
  Engine(EngineArgs),
  /// Inspects or mutates a crolt job store directly, bypassing HTTP.
  Storage(StorageArgs),
}

#[derive(Parser, Debug)]
pub struct EngineArgs {
  /// Base directory holding the engine's embedded databases.
  #[arg(long, env = "RULES_DATA_DIR")]
  pub data_dir: Option<PathBuf>,

  /// Address to bind the HTTP server to.
  #[arg(long, env = "RULES_ADDRESS", default_value = "127.0.0.1:4000")]
  pub address: String,

  /// Maximum number of locations held open at once.
  #[arg(long, env = "RULES_MAX_LOCATIONS")]
  pub max_locations: Option<usize>,

  /// Maximum number of facts/rules stored per location.
  #[arg(long, env = "RULES_MAX_FACTS")]
  pub max_facts: Option<usize>,

  /// Seconds an idle location is kept open before eviction; omit for no TTL.
  #[arg(long, env = "RULES_LOCATION_TTL_SECS")]
  pub location_ttl_secs: Option<u64>,

  /// Base URL of a crolt instance to use for persistent cron instead of the
  /// in-memory scheduler.
  #[arg(long, env = "RULES_CRON_URL")]
  pub cron_url: Option<String>,

  /// Address to bind the embedded crolt HTTP service to.
  #[arg(long, env = "RULES_CROLT_ADDRESS", default_value = "127.0.0.1:4001")]
  pub crolt_address: String,

  /// Optional JSON configuration file layered beneath CLI flags and env vars.
  #[arg(long)]
  pub config_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(group(
  ArgGroup::new("storage_op")
    .required(true)
    .args(["get", "rem", "add", "clear", "stats"]),
))]
pub struct StorageArgs {
  /// Base directory holding the engine's embedded databases.
  #[arg(long, env = "RULES_DATA_DIR")]
  pub data_dir: Option<PathBuf>,

  /// Fetches the job with this id.
  #[arg(long)]
  pub get: Option<String>,

  /// Removes the job with this id.
  #[arg(long)]
  pub rem: Option<String>,

  /// Adds a job: requires --account, --schedule, and --url alongside this id.
  #[arg(long)]
  pub add: Option<String>,

  /// Drops every job in the store.
  #[arg(long)]
  pub clear: bool,

  /// Prints job counts per partition.
  #[arg(long)]
  pub stats: bool,

  /// The job's account, required alongside --get/--rem/--add.
  #[arg(long)]
  pub account: Option<String>,

  /// Schedule expression for `--add` (cron expr, `!RFC3339`, or `+duration`).
  #[arg(long, requires = "add")]
  pub schedule: Option<String>,

  /// URL `--add`'s job fires HTTP requests against.
  #[arg(long, requires = "add")]
  pub url: Option<String>,

  /// HTTP method for `--add`'s job; defaults to POST.
  #[arg(long, requires = "add")]
  pub method: Option<String>,

  /// JSON request body for `--add`'s job.
  #[arg(long, requires = "add")]
  pub request_body: Option<String>,
}
