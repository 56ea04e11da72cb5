use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use log::{debug, warn};
use russh::{
    client::{self, AuthResult, Handle},
    keys::{load_secret_key, ssh_key::PublicKey, PrivateKeyWithHashAlg},
    Disconnect,
};
use russh_sftp::client::SftpSession;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::RwLock,
};

use crate::{
    error::{Error, Result},
    layout::{file_name, join},
};

use super::{DirChildren, Entry, Progress, Protocol, RemoteAccount, Storage, StorageStats};

const DEFAULT_PORT: u16 = 22;
const KEY_AUTH_ATTEMPTS: usize = 3;
const TRANSFER_BUFFER_SIZE: usize = 1 << 16;

struct AcceptAnyHost;

impl client::Handler for AcceptAnyHost {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

struct Session {
    handle: Handle<AcceptAnyHost>,
    sftp: SftpSession,
}

/// SFTP over an SSH session. Password auth, or the private key named by the
/// account's `extra`.
pub struct SftpStorage {
    account: RemoteAccount,
    session: RwLock<Option<Arc<Session>>>,
    stats: StorageStats,
}

impl std::fmt::Debug for SftpStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpStorage")
            .field("host", &self.account.host)
            .field("remote", &self.account.remote)
            .finish_non_exhaustive()
    }
}

impl SftpStorage {
    pub fn new(account: RemoteAccount) -> Self {
        SftpStorage {
            account,
            session: RwLock::new(None),
            stats: StorageStats::new(),
        }
    }

    async fn session(&self) -> Result<Arc<Session>> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(Error::NoActiveSession)
    }

    async fn sftp(&self) -> Result<Arc<Session>> {
        let session = self.session().await?;
        self.stats.add_request();
        Ok(session)
    }

    async fn authenticate(&self, handle: &mut Handle<AcceptAnyHost>) -> Result<bool> {
        let user = self.account.user.as_str();
        let Some(key_path) = self.account.extra.as_deref() else {
            let result = handle
                .authenticate_password(user, &self.account.password)
                .await?;
            return Ok(matches!(result, AuthResult::Success));
        };

        let passphrase = (!self.account.password.is_empty()).then_some(self.account.password.as_str());
        let key = load_secret_key(key_path, passphrase)
            .map_err(|err| Error::LoginFailed(format!("{key_path}: {err}")))?;
        let key = Arc::new(key);
        for attempt in 1..=KEY_AUTH_ATTEMPTS {
            let result = handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), None))
                .await?;
            if matches!(result, AuthResult::Success) {
                return Ok(true);
            }
            debug!("public key rejected, attempt {attempt}/{KEY_AUTH_ATTEMPTS}");
        }
        Ok(false)
    }
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, progress: &Progress) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0; TRANSFER_BUFFER_SIZE];
    let mut total = 0;
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).await?;
        total += n as u64;
        progress.advance(n as u64);
    }
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(total)
}

#[async_trait]
impl Storage for SftpStorage {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    fn stats(&self) -> &StorageStats {
        &self.stats
    }

    async fn connect(&self) -> Result<()> {
        let config = Arc::new(client::Config::default());
        let address = (
            self.account.host.as_str(),
            self.account.port.unwrap_or(DEFAULT_PORT),
        );
        let mut handle = client::connect(config, address, AcceptAnyHost).await?;
        if !self.authenticate(&mut handle).await? {
            return Err(Error::LoginFailed(self.account.address(DEFAULT_PORT)));
        }

        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        *self.session.write().await = Some(Arc::new(Session { handle, sftp }));
        debug!("connected to sftp://{}", self.account.host);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };
        if let Err(err) = session.sftp.close().await {
            warn!("closing sftp channel failed: {err}");
        }
        session
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let session = self.sftp().await?;
        Ok(session.sftp.create_dir(path).await?)
    }

    async fn upload(&self, src: &Path, dst_dir: &str, progress: Arc<Progress>) -> Result<()> {
        let session = self.sftp().await?;
        let name = src
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::FileDoesNotExist(src.to_owned()))?;
        let mut file = File::open(src).await?;
        progress.start(file.metadata().await?.len());

        let mut remote = session.sftp.create(join(dst_dir, &name)).await?;
        let result = pump(&mut file, &mut remote, &progress).await;
        self.stats.record(&result);
        self.stats.add_upload(result?);
        Ok(())
    }

    async fn download(&self, src: &str, dst_dir: &Path, progress: Arc<Progress>) -> Result<()> {
        let session = self.sftp().await?;
        let total = session.sftp.metadata(src).await?.size.unwrap_or(0);
        progress.start(total);

        let mut remote = session.sftp.open(src).await?;
        let mut file = File::create(dst_dir.join(file_name(src))).await?;
        let result = pump(&mut remote, &mut file, &progress).await;
        self.stats.record(&result);
        self.stats.add_download(result?);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let session = self.sftp().await?;
        Ok(session.sftp.remove_file(path).await?)
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        let session = self.sftp().await?;
        Ok(session.sftp.remove_dir(path).await?)
    }

    async fn list_files(&self, path: &str) -> Result<DirChildren> {
        let session = self.sftp().await?;
        let entries = session.sftp.read_dir(path).await?;
        Ok(DirChildren::from_entries(
            entries.map(|entry| (entry.file_name(), entry.file_type().is_dir())),
        ))
    }

    async fn stat(&self, path: &str) -> Result<Option<Entry>> {
        let session = self.sftp().await?;
        if !session.sftp.try_exists(path).await? {
            return Ok(None);
        }
        let metadata = session.sftp.metadata(path).await?;
        if metadata.is_dir() {
            Ok(Some(Entry::directory()))
        } else {
            Ok(Some(Entry::file(metadata.size.unwrap_or(0))))
        }
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let session = self.sftp().await?;
        Ok(session.sftp.rename(src, dst).await?)
    }

    fn pick_root(&self) -> String {
        self.account.remote.clone()
    }
}
