use std::{
    fmt,
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use async_trait::async_trait;
use log::{debug, warn};
use suppaftp::{list, types::FileType, FtpStream, Mode};
use tokio::{sync::Mutex, task::spawn_blocking};

use crate::{
    error::{Error, Result},
    layout::{file_name, join, parent},
};

use super::{DirChildren, Entry, Progress, Protocol, RemoteAccount, Storage, StorageStats};

const DEFAULT_PORT: u16 = 21;
const TRANSFER_BUFFER_SIZE: usize = 1 << 16;

/// FTP client. The control connection is blocking, so every call hands the
/// stream to a blocking task and takes it back afterwards.
pub struct FtpStorage {
    account: RemoteAccount,
    session: Mutex<Option<FtpStream>>,
    stats: StorageStats,
}

impl fmt::Debug for FtpStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpStorage")
            .field("host", &self.account.host)
            .field("remote", &self.account.remote)
            .finish_non_exhaustive()
    }
}

impl FtpStorage {
    pub fn new(account: RemoteAccount) -> Self {
        FtpStorage {
            account,
            session: Mutex::new(None),
            stats: StorageStats::new(),
        }
    }

    async fn with_session<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut FtpStream) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut session = self.session.lock().await;
        let mut stream = session.take().ok_or(Error::NoActiveSession)?;
        let (stream, result) = spawn_blocking(move || {
            let result = f(&mut stream);
            (stream, result)
        })
        .await?;
        *session = Some(stream);
        self.stats.record(&result);
        result
    }

    async fn list_raw(&self, path: &str) -> Result<Vec<list::File>> {
        let path = path.to_owned();
        self.with_session(move |ftp| {
            let lines = ftp.list(Some(path.as_str()))?;
            Ok(parse_listing(&lines))
        })
        .await
    }
}

pub fn parse_listing(lines: &[String]) -> Vec<list::File> {
    lines
        .iter()
        .filter_map(|line| match list::File::from_str(line) {
            Ok(file) => Some(file),
            Err(err) => {
                debug!("skipping unparsable listing line `{line}`: {err}");
                None
            }
        })
        .collect()
}

pub fn to_children(files: &[list::File]) -> DirChildren {
    DirChildren::from_entries(
        files
            .iter()
            .map(|file| (file.name().to_owned(), file.is_directory())),
    )
}

fn open_session(account: &RemoteAccount) -> Result<FtpStream> {
    let address = account.address(DEFAULT_PORT);
    let mut ftp = FtpStream::connect(&address)?;
    ftp.login(account.user.as_str(), account.password.as_str())
        .map_err(|_| Error::LoginFailed(address.clone()))?;
    ftp.set_mode(Mode::Passive);
    ftp.transfer_type(FileType::Binary)?;
    Ok(ftp)
}

fn pump<R: Read, W: Write>(reader: &mut R, writer: &mut W, progress: &Progress) -> Result<u64> {
    let mut buffer = vec![0; TRANSFER_BUFFER_SIZE];
    let mut total = 0;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
        total += n as u64;
        progress.advance(n as u64);
    }
    writer.flush()?;
    Ok(total)
}

#[async_trait]
impl Storage for FtpStorage {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn stats(&self) -> &StorageStats {
        &self.stats
    }

    async fn connect(&self) -> Result<()> {
        let account = self.account.clone();
        let ftp = spawn_blocking(move || open_session(&account)).await??;
        *self.session.lock().await = Some(ftp);
        debug!("connected to ftp://{}", self.account.host);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(mut ftp) = self.session.lock().await.take() else {
            return Ok(());
        };
        spawn_blocking(move || {
            if let Err(err) = ftp.quit() {
                warn!("ftp quit failed: {err}");
            }
        })
        .await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = path.to_owned();
        self.with_session(move |ftp| Ok(ftp.mkdir(&path)?)).await
    }

    async fn upload(&self, src: &Path, dst_dir: &str, progress: Arc<Progress>) -> Result<()> {
        let src = src.to_owned();
        let name = src
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::FileDoesNotExist(src.clone()))?;
        let dst = join(dst_dir, &name);
        let bytes = self
            .with_session(move |ftp| {
                let mut file = File::open(&src)?;
                progress.start(file.metadata()?.len());
                let mut stream = ftp.put_with_stream(&dst)?;
                let bytes = pump(&mut file, &mut stream, &progress)?;
                ftp.finalize_put_stream(stream)?;
                Ok(bytes)
            })
            .await?;
        self.stats.add_upload(bytes);
        Ok(())
    }

    async fn download(&self, src: &str, dst_dir: &Path, progress: Arc<Progress>) -> Result<()> {
        let dst: PathBuf = dst_dir.join(file_name(src));
        let src = src.to_owned();
        let total = self.stat(&src).await?.map_or(0, |entry| entry.size);
        let bytes = self
            .with_session(move |ftp| {
                progress.start(total);
                let mut file = File::create(&dst)?;
                let mut stream = ftp.retr_as_stream(&src)?;
                let bytes = pump(&mut stream, &mut file, &progress)?;
                ftp.finalize_retr_stream(stream)?;
                Ok(bytes)
            })
            .await?;
        self.stats.add_download(bytes);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let path = path.to_owned();
        self.with_session(move |ftp| Ok(ftp.rm(&path)?)).await
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        let path = path.to_owned();
        self.with_session(move |ftp| Ok(ftp.rmdir(&path)?)).await
    }

    async fn list_files(&self, path: &str) -> Result<DirChildren> {
        let files = self.list_raw(path).await?;
        Ok(to_children(&files))
    }

    async fn stat(&self, path: &str) -> Result<Option<Entry>> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Some(Entry::directory()));
        }
        let name = file_name(trimmed).to_owned();
        let files = self.list_raw(parent(trimmed)).await?;
        let entry = files.iter().find(|file| file.name() == name).map(|file| {
            if file.is_directory() {
                Entry::directory()
            } else {
                Entry::file(file.size() as u64)
            }
        });
        Ok(entry)
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let (src, dst) = (src.to_owned(), dst.to_owned());
        self.with_session(move |ftp| Ok(ftp.rename(&src, &dst)?)).await
    }

    fn pick_root(&self) -> String {
        self.account.remote.clone()
    }
}
