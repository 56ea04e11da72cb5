use std::{
    env,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    compression::{CompressionType, DEFAULT_COMPRESSION_LEVEL},
    device::KillPolicy,
    error::Result,
    format::format_path,
    layout::BackupStrategy,
};

pub const DEFAULT_SELF_PACKAGE: &str = "com.databackup";

/// Run settings. Missing keys in a config file take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compression_type: CompressionType,
    pub compression_level: u8,
    /// Stream through the compressor instead of `tar -I`; for archivers without `-I`.
    pub use_pipe: bool,
    pub follow_symlinks: bool,
    /// Run `tar -t` over every archive right after writing it.
    pub check_archive: bool,
    /// Remove files absent from the archive while extracting.
    pub clean_restoring: bool,
    pub kill_policy: KillPolicy,
    pub backup_strategy: BackupStrategy,
    /// Restore into this user instead of the one recorded at backup time.
    pub restore_user: Option<u32>,
    pub backup_itself: bool,
    pub self_package: String,
    pub icon_dir: Option<PathBuf>,
    /// Clear the activated flags after a run without failures.
    pub reset_backup_list: bool,
    pub reset_restore_list: bool,
    /// Installer package passed to `pm install -i`.
    pub installer: Option<String>,
    /// Root of the platform's private data trees, normally `/data`.
    pub data_root: PathBuf,
    /// Local staging area for archives headed to or coming from a remote.
    pub scratch_dir: PathBuf,
    /// Local backup root, or the directory under a remote account.
    pub backup_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            compression_type: CompressionType::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            use_pipe: false,
            follow_symlinks: false,
            check_archive: true,
            clean_restoring: false,
            kill_policy: KillPolicy::default(),
            backup_strategy: BackupStrategy::default(),
            restore_user: None,
            backup_itself: true,
            self_package: DEFAULT_SELF_PACKAGE.to_owned(),
            icon_dir: None,
            reset_backup_list: true,
            reset_restore_list: true,
            installer: None,
            data_root: PathBuf::from("/data"),
            scratch_dir: env::temp_dir().join("databackup"),
            backup_dir: "/storage/emulated/0/DataBackup".to_owned(),
        }
    }
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        debug!("loading config from {}", format_path(path));
        let bytes = fs::read(path).await?;
        let config = serde_json::from_slice(&bytes)?;
        Ok(config)
    }

    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if fs::try_exists(path).await? => Config::load(path).await,
            _ => Ok(Config::default()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes).await?;
        Ok(())
    }

    pub fn compress_program(&self) -> Option<String> {
        self.compression_type.compress_program(self.compression_level)
    }

    pub fn media_root(&self) -> PathBuf {
        self.data_root.join("media")
    }
}
