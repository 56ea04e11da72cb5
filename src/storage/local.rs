use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
    task::spawn_blocking,
};
use walkdir::WalkDir;

use crate::error::{Error, Result};

use super::{DirChildren, Entry, Progress, Protocol, Storage, StorageStats};

const COPY_BUFFER_SIZE: usize = 1 << 16;

#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
    connected: AtomicBool,
    stats: StorageStats,
}

impl LocalStorage {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        LocalStorage {
            root: root.into(),
            connected: AtomicBool::new(false),
            stats: StorageStats::new(),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NoActiveSession)
        }
    }
}

pub async fn copy_with_progress(src: &Path, dst: &Path, progress: &Progress) -> Result<u64> {
    let mut reader = File::open(src).await?;
    let total = reader.metadata().await?.len();
    progress.start(total);

    let mut writer = File::create(dst).await?;
    let mut buffer = vec![0; COPY_BUFFER_SIZE];
    let mut copied = 0;
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).await?;
        copied += n as u64;
        progress.advance(n as u64);
    }
    writer.flush().await?;
    Ok(copied)
}

fn ignore_missing(result: io::Result<()>) -> Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        result => Ok(result?),
    }
}

fn file_name_of(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| Error::FileDoesNotExist(path.to_owned()))
}

#[async_trait]
impl Storage for LocalStorage {
    fn protocol(&self) -> Protocol {
        Protocol::Local
    }

    fn stats(&self) -> &StorageStats {
        &self.stats
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.ensure_connected()?;
        match fs::create_dir(path).await {
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            result => Ok(result?),
        }
    }

    async fn mkdir_recursively(&self, path: &str) -> Result<()> {
        self.ensure_connected()?;
        fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn upload(&self, src: &Path, dst_dir: &str, progress: Arc<Progress>) -> Result<()> {
        self.ensure_connected()?;
        let dst = Path::new(dst_dir).join(file_name_of(src)?);
        let bytes = copy_with_progress(src, &dst, &progress).await?;
        self.stats.add_upload(bytes);
        Ok(())
    }

    async fn download(&self, src: &str, dst_dir: &Path, progress: Arc<Progress>) -> Result<()> {
        self.ensure_connected()?;
        let src = Path::new(src);
        let dst = dst_dir.join(file_name_of(src)?);
        let bytes = copy_with_progress(src, &dst, &progress).await?;
        self.stats.add_download(bytes);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.ensure_connected()?;
        ignore_missing(fs::remove_file(path).await)
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        self.ensure_connected()?;
        ignore_missing(fs::remove_dir(path).await)
    }

    async fn delete_recursively(&self, path: &str) -> Result<()> {
        match self.stat(path).await? {
            Some(entry) if entry.is_dir() => ignore_missing(fs::remove_dir_all(path).await),
            Some(_) => ignore_missing(fs::remove_file(path).await),
            None => Ok(()),
        }
    }

    async fn list_files(&self, path: &str) -> Result<DirChildren> {
        self.ensure_connected()?;
        let mut entries = vec![];
        let mut dir = fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let is_dir = entry.file_type().await?.is_dir();
            entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
        }
        Ok(DirChildren::from_entries(entries))
    }

    async fn stat(&self, path: &str) -> Result<Option<Entry>> {
        self.ensure_connected()?;
        match fs::metadata(path).await {
            Ok(metadata) if metadata.is_dir() => Ok(Some(Entry::directory())),
            Ok(metadata) => Ok(Some(Entry::file(metadata.len()))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.ensure_connected()?;
        fs::rename(src, dst).await?;
        Ok(())
    }

    async fn size(&self, path: &str) -> Result<u64> {
        self.ensure_connected()?;
        let path = PathBuf::from(path);
        spawn_blocking(move || local_size(&path)).await?
    }

    fn pick_root(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }
}

/// Apparent size of a file or tree; a missing path measures zero.
pub fn local_size(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}
