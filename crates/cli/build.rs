#![allow(clippy::needless_return)]

fn main() -> std::io::Result<()> {
  rulehub_build::init_env_logger();
  rulehub_build::setup_version_info!();

  return Ok(());
}
