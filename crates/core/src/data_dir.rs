use log::*;
use std::path::PathBuf;
use tokio::{fs, io::AsyncWriteExt};

/// The base data directory where the rules/facts database and the crolt KV
/// store live.
#[derive(Debug, Clone)]
pub struct DataDir(pub PathBuf);

impl Default for DataDir {
  fn default() -> Self {
    Self(format!("./{}/", Self::DEFAULT).into())
  }
}

impl DataDir {
  pub const DEFAULT: &str = "ruledepot";

  pub fn root(&self) -> &PathBuf {
    return &self.0;
  }

  /// Location facts/rules storage.
  pub fn main_db_path(&self) -> PathBuf {
    return self.data_path().join("rules.db");
  }

  /// Crolt's embedded transactional KV store.
  pub fn crolt_db_path(&self) -> PathBuf {
    return self.data_path().join("crolt.db");
  }

  pub fn data_path(&self) -> PathBuf {
    return self.0.join("data/");
  }

  pub async fn ensure_directory_structure(&self) -> std::io::Result<()> {
    let directories = [self.data_path()];

    let mut initialized = false;
    for dir in directories {
      if !fs::try_exists(&dir).await.unwrap_or(false) {
        initialized = true;
        fs::create_dir_all(dir).await?;
      }
    }

    let gitignore_path = self.root().join(".gitignore");
    if !fs::try_exists(&gitignore_path).await.unwrap_or(false) {
      initialized = true;
      let mut gitignore = fs::File::create_new(&gitignore_path).await?;
      gitignore.write_all(GIT_IGNORE.as_bytes()).await?;
    }

    if initialized {
      info!("Initialized or repaired depot: {:?}", self.root());
    }

    Ok(())
  }
}

const GIT_IGNORE: &str = r#"data/
"#;
