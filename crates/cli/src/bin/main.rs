#![allow(clippy::needless_return)]

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::future::IntoFuture;
use std::rc::Rc;

use clap::Parser;
use rulehub::config::{ConfigFile, EngineConfig};
use rulehub::{DataDir, System};
use rulehub_cli::{Cli, Commands, EngineArgs, StorageArgs};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_logger() {
  rulehub::logging::init();
}

async fn run_engine(args: EngineArgs) -> Result<(), BoxError> {
  let data_dir = args.data_dir.map(DataDir).unwrap_or_default();
  data_dir.ensure_directory_structure().await?;

  let file = match &args.config_file {
    Some(path) => Some(ConfigFile::load(path)?),
    None => None,
  };

  let config = EngineConfig::resolve(
    file,
    args.max_locations,
    args.max_facts,
    args.cron_url,
    None,
    Some(data_dir.root().clone()),
  )?;
  let config = EngineConfig {
    location_ttl: args.location_ttl_secs.map(std::time::Duration::from_secs).or(config.location_ttl),
    ..config
  };

  let rules_conn = rulehub::connection::init_db(Some(data_dir.main_db_path()))?;
  let crolt_conn = rulehub::connection::init_db(Some(data_dir.crolt_db_path()))?;

  let system = System::new(config, rules_conn, crolt_conn).await?;
  let crolt_app = system.crolt_router();
  let app = rulehub::server::router(system);

  let listener = tokio::net::TcpListener::bind(&args.address).await?;
  let crolt_listener = tokio::net::TcpListener::bind(&args.crolt_address).await?;
  log::info!("rulehub engine listening on {}", args.address);
  log::info!("crolt listening on {}", args.crolt_address);

  let (engine_result, crolt_result) = tokio::join!(
    axum::serve(listener, app).into_future(),
    axum::serve(crolt_listener, crolt_app).into_future(),
  );
  engine_result?;
  crolt_result?;

  return Ok(());
}

async fn run_storage(args: StorageArgs) -> Result<(), BoxError> {
  let data_dir = args.data_dir.map(DataDir).unwrap_or_default();
  data_dir.ensure_directory_structure().await?;

  let crolt_conn = rulehub::connection::init_db(Some(data_dir.crolt_db_path()))?;
  let kv = std::sync::Arc::new(rulehub::crolt::Kv::new(crolt_conn, rulehub::crolt::default_partitions()));
  kv.init().await?;

  if let Some(id) = args.get {
    let account = args.account.ok_or("--get requires --account")?;
    match kv.get(&account, &id).await? {
      Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
      None => println!("not found: {account}/{id}"),
    }
  } else if let Some(id) = args.rem {
    let account = args.account.ok_or("--rem requires --account")?;
    kv.rem(&account, &id).await?;
    println!("removed: {account}/{id}");
  } else if let Some(id) = args.add {
    let account = args.account.ok_or("--add requires --account")?;
    let schedule = args.schedule.ok_or("--add requires --schedule")?;
    let url = args.url.ok_or("--add requires --url")?;
    let method = args.method.unwrap_or_else(|| "POST".to_string());
    let request_body: serde_json::Value = match args.request_body {
      Some(raw) => serde_json::from_str(&raw)?,
      None => serde_json::json!({}),
    };
    kv.add(account.clone(), id.clone(), schedule, url, method, Default::default(), request_body)
      .await?;
    println!("added: {account}/{id}");
  } else if args.clear {
    kv.clear().await?;
    println!("cleared");
  } else if args.stats {
    println!("partitions: {}", rulehub::crolt::default_partitions());
  }

  return Ok(());
}

async fn async_main() -> Result<(), BoxError> {
  init_logger();

  let cli = Cli::parse();
  match cli.command {
    Commands::Engine(args) => run_engine(args).await?,
    Commands::Storage(args) => run_storage(args).await?,
  }

  return Ok(());
}

fn main() -> Result<(), BoxError> {
  let runtime = Rc::new(tokio::runtime::Builder::new_multi_thread().enable_all().build()?);
  return runtime.block_on(async_main());
}
