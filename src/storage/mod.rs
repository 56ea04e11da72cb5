#[cfg(feature = "ftp")]
mod ftp;
mod local;
mod picker;
#[cfg(feature = "sftp")]
mod sftp;
pub mod smb;
mod stats;
mod url;
mod walk;
#[cfg(feature = "webdav")]
mod webdav;

#[cfg(test)]
mod tests;

use std::{
    fmt::Debug,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use itertools::Itertools;

use crate::error::{Error, Result};

pub use {
    local::{copy_with_progress, local_size, LocalStorage},
    picker::{pick_directory, DirectoryBrowser, DirectoryPicker, RemotePick},
    stats::StorageStats,
    url::{Protocol, RemoteAccount, StorageUrl},
    walk::{delete_recursively, list_deep, size_recursive},
};

#[cfg(feature = "ftp")]
pub use ftp::FtpStorage;
#[cfg(feature = "sftp")]
pub use sftp::SftpStorage;
#[cfg(feature = "smb")]
pub use smb::SmbStorage;
#[cfg(feature = "webdav")]
pub use webdav::WebDavStorage;

pub type SharedStorage = Arc<dyn Storage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub size: u64,
}

impl Entry {
    pub fn file(size: u64) -> Self {
        Entry {
            kind: EntryKind::File,
            size,
        }
    }

    pub fn directory() -> Self {
        Entry {
            kind: EntryKind::Directory,
            size: 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Children of one directory, partitioned and sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirChildren {
    pub files: Vec<String>,
    pub directories: Vec<String>,
}

impl DirChildren {
    /// Drops `.`/`..` and duplicates; a name seen as a directory is not also a file.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        let (directories, files): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .map(|(name, is_dir)| (name.into(), is_dir))
            .filter(|(name, _)| !name.is_empty() && name != "." && name != "..")
            .partition(|(_, is_dir)| *is_dir);

        let directories = directories
            .into_iter()
            .map(|(name, _)| name)
            .sorted()
            .dedup()
            .collect::<Vec<_>>();
        let files = files
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| directories.binary_search(name).is_err())
            .sorted()
            .dedup()
            .collect();

        DirChildren { files, directories }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }
}

/// Transfer progress cell. Backends bump it, the orchestrator polls it.
#[derive(Debug, Default)]
pub struct Progress {
    transferred: AtomicU64,
    total: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Progress::default()
    }

    pub fn start(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.transferred.store(0, Ordering::Relaxed);
    }

    pub fn advance(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn percent(&self) -> u8 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let percent = self.transferred().min(total) * 100 / total;
        u8::try_from(percent).unwrap_or(100)
    }
}

/// One storage target. Paths are `/`-separated strings; for remotes they are
/// relative to what the account's server exposes. Every method except
/// `connect` fails with `Error::NoActiveSession` until `connect` succeeds.
#[async_trait]
pub trait Storage: Debug + Send + Sync {
    fn protocol(&self) -> Protocol;

    fn stats(&self) -> &StorageStats;

    /// Archives can be written straight into the target without staging.
    fn is_local(&self) -> bool {
        false
    }

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;

    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Copies the local file `src` into the remote directory `dst_dir`.
    async fn upload(&self, src: &Path, dst_dir: &str, progress: Arc<Progress>) -> Result<()>;

    /// Copies the remote file `src` into the local directory `dst_dir`.
    async fn download(&self, src: &str, dst_dir: &Path, progress: Arc<Progress>) -> Result<()>;

    async fn delete_file(&self, path: &str) -> Result<()>;

    /// Removes an empty directory.
    async fn remove_directory(&self, path: &str) -> Result<()>;

    async fn list_files(&self, path: &str) -> Result<DirChildren>;

    async fn stat(&self, path: &str) -> Result<Option<Entry>>;

    async fn rename(&self, src: &str, dst: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    async fn mkdir_recursively(&self, path: &str) -> Result<()> {
        let mut current = if path.starts_with('/') {
            String::from("/")
        } else {
            String::new()
        };
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = crate::layout::join(&current, component);
            match self.stat(&current).await? {
                Some(entry) if entry.is_dir() => {}
                Some(_) => return Err(Error::FileIsNotDirectory(current.into())),
                None => self.mkdir(&current).await?,
            }
        }
        Ok(())
    }

    async fn delete_recursively(&self, path: &str) -> Result<()> {
        walk::delete_recursively(self, path).await
    }

    /// Total size of a file, or of every file below a directory.
    async fn size(&self, path: &str) -> Result<u64> {
        walk::size_recursive(self, path).await
    }

    /// Directory the picker starts browsing from.
    fn pick_root(&self) -> String {
        String::new()
    }

    /// Splits a picked path into what gets persisted.
    fn to_pick(&self, path: &str) -> RemotePick {
        RemotePick {
            remote: path.to_owned(),
            extra: None,
        }
    }
}

pub async fn create_storage(url: &StorageUrl) -> Result<SharedStorage> {
    let storage: SharedStorage = match url {
        StorageUrl::Local(path) => Arc::new(LocalStorage::new(path.clone())),
        StorageUrl::Remote(account) => create_remote(account)?,
    };
    Ok(storage)
}

fn create_remote(account: &RemoteAccount) -> Result<SharedStorage> {
    match account.protocol {
        #[cfg(feature = "ftp")]
        Protocol::Ftp => Ok(Arc::new(FtpStorage::new(account.clone()))),
        #[cfg(feature = "webdav")]
        Protocol::WebDav => Ok(Arc::new(WebDavStorage::new(account.clone())?)),
        #[cfg(feature = "sftp")]
        Protocol::Sftp => Ok(Arc::new(SftpStorage::new(account.clone()))),
        #[cfg(feature = "smb")]
        Protocol::Smb => Ok(Arc::new(SmbStorage::new(account.clone()))),
        #[allow(unreachable_patterns)]
        protocol => Err(Error::ProtocolDisabled(protocol.to_string())),
    }
}
