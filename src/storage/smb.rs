use super::RemotePick;

/// Shares a user can pick from; administrative `$` shares are hidden.
pub fn visible_shares<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut shares = names
        .into_iter()
        .map(Into::into)
        .filter(|name| !name.is_empty() && !name.ends_with('$'))
        .collect::<Vec<_>>();
    shares.sort();
    shares.dedup();
    shares
}

/// Splits a path picked below the share list into share and share-relative
/// directory. With a share already selected the path is kept as is.
pub fn split_share(selected: Option<&str>, path: &str) -> RemotePick {
    if let Some(share) = selected {
        return RemotePick {
            remote: path.trim_matches('/').to_owned(),
            extra: Some(share.to_owned()),
        };
    }
    let path = path.trim_matches('/');
    let (share, rest) = path.split_once('/').unwrap_or((path, ""));
    RemotePick {
        remote: rest.to_owned(),
        extra: (!share.is_empty()).then(|| share.to_owned()),
    }
}

#[cfg(feature = "smb")]
pub use client::SmbStorage;

#[cfg(feature = "smb")]
mod client {
    use std::{
        fs::File,
        io::{self, Read, Write},
        path::Path,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    use async_trait::async_trait;
    use log::debug;
    use pavao::{
        SmbClient, SmbCredentials, SmbDirentType, SmbMode, SmbOpenOptions, SmbOptions,
    };
    use tokio::task::spawn_blocking;

    use crate::{
        error::{Error, Result},
        layout::{file_name, join, parent},
        storage::{
            DirChildren, Entry, Progress, Protocol, RemoteAccount, RemotePick, Storage,
            StorageStats,
        },
    };

    use super::{split_share, visible_shares};

    const DEFAULT_PORT: u16 = 445;
    const TRANSFER_BUFFER_SIZE: usize = 1 << 16;

    /// SMB client on libsmbclient. Each call opens its own context on a
    /// blocking thread; `connect` only proves the credentials.
    #[derive(Debug)]
    pub struct SmbStorage {
        account: RemoteAccount,
        connected: AtomicBool,
        stats: StorageStats,
    }

    impl SmbStorage {
        pub fn new(account: RemoteAccount) -> Self {
            SmbStorage {
                account,
                connected: AtomicBool::new(false),
                stats: StorageStats::new(),
            }
        }

        async fn with_client<T, F>(&self, f: F) -> Result<T>
        where
            F: FnOnce(&SmbClient, &SharePath) -> Result<T> + Send + 'static,
            T: Send + 'static,
        {
            if !self.connected.load(Ordering::Acquire) {
                return Err(Error::NoActiveSession);
            }
            let account = self.account.clone();
            let result = spawn_blocking(move || {
                let client = open_client(&account)?;
                f(&client, &SharePath::new(account.extra.as_deref()))
            })
            .await?;
            self.stats.record(&result);
            result
        }
    }

    /// Maps storage paths onto `/share/path` below the server URI.
    struct SharePath {
        share: Option<String>,
    }

    impl SharePath {
        fn new(share: Option<&str>) -> Self {
            SharePath {
                share: share.map(ToOwned::to_owned),
            }
        }

        fn of(&self, path: &str) -> String {
            let path = path.trim_matches('/');
            match (&self.share, path.is_empty()) {
                (Some(share), true) => format!("/{share}"),
                (Some(share), false) => format!("/{share}/{path}"),
                (None, true) => String::new(),
                (None, false) => format!("/{path}"),
            }
        }

        fn lists_shares(&self, path: &str) -> bool {
            self.share.is_none() && path.trim_matches('/').is_empty()
        }
    }

    fn open_client(account: &RemoteAccount) -> Result<SmbClient> {
        let credentials = SmbCredentials::default()
            .server(format!("smb://{}", account.address(DEFAULT_PORT)))
            .share("")
            .username(&account.user)
            .password(&account.password);
        SmbClient::new(credentials, SmbOptions::default().one_share_per_server(true))
            .map_err(|err| Error::LoginFailed(format!("{}: {err}", account.host)))
    }

    fn list(client: &SmbClient, paths: &SharePath, path: &str) -> Result<DirChildren> {
        let entries = client.list_dir(&paths.of(path))?;
        if paths.lists_shares(path) {
            let shares = entries
                .iter()
                .filter(|entry| entry.get_type() == SmbDirentType::FileShare)
                .map(|entry| entry.name().to_owned());
            return Ok(DirChildren {
                files: vec![],
                directories: visible_shares(shares),
            });
        }
        Ok(DirChildren::from_entries(entries.iter().filter_map(
            |entry| match entry.get_type() {
                SmbDirentType::Dir => Some((entry.name().to_owned(), true)),
                SmbDirentType::File | SmbDirentType::Link => {
                    Some((entry.name().to_owned(), false))
                }
                _ => None,
            },
        )))
    }

    fn remove_tree(client: &SmbClient, paths: &SharePath, path: &str) -> Result<()> {
        let children = list(client, paths, path)?;
        for file in &children.files {
            client.unlink(&paths.of(&join(path, file)))?;
        }
        for dir in &children.directories {
            remove_tree(client, paths, &join(path, dir))?;
        }
        client.rmdir(&paths.of(path))?;
        Ok(())
    }

    fn copy<R: Read, W: Write>(reader: &mut R, writer: &mut W, progress: &Progress) -> io::Result<u64> {
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
    impl Storage for SmbStorage {
        fn protocol(&self) -> Protocol {
            Protocol::Smb
        }

        fn stats(&self) -> &StorageStats {
            &self.stats
        }

        async fn connect(&self) -> Result<()> {
            self.connected.store(true, Ordering::Release);
            let root = self.account.remote.clone();
            if let Err(err) = self
                .with_client(move |client, paths| list(client, paths, &root))
                .await
            {
                self.connected.store(false, Ordering::Release);
                return Err(err);
            }
            debug!("connected to smb://{}", self.account.host);
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::Release);
            Ok(())
        }

        async fn mkdir(&self, path: &str) -> Result<()> {
            let path = path.to_owned();
            self.with_client(move |client, paths| {
                Ok(client.mkdir(&paths.of(&path), SmbMode::from(0o755))?)
            })
            .await
        }

        async fn upload(&self, src: &Path, dst_dir: &str, progress: Arc<Progress>) -> Result<()> {
            let src = src.to_owned();
            let name = src
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| Error::FileDoesNotExist(src.clone()))?;
            let dst = join(dst_dir, &name);
            let bytes = self
                .with_client(move |client, paths| {
                    let mut file = File::open(&src)?;
                    progress.start(file.metadata()?.len());
                    let options = SmbOpenOptions::default().create(true).write(true).truncate(true);
                    let mut remote = client.open_with(paths.of(&dst), options)?;
                    Ok(copy(&mut file, &mut remote, &progress)?)
                })
                .await?;
            self.stats.add_upload(bytes);
            Ok(())
        }

        async fn download(&self, src: &str, dst_dir: &Path, progress: Arc<Progress>) -> Result<()> {
            let dst = dst_dir.join(file_name(src));
            let src = src.to_owned();
            let bytes = self
                .with_client(move |client, paths| {
                    let remote_path = paths.of(&src);
                    progress.start(client.stat(&remote_path)?.size);
                    let mut remote =
                        client.open_with(remote_path, SmbOpenOptions::default().read(true))?;
                    let mut file = File::create(&dst)?;
                    Ok(copy(&mut remote, &mut file, &progress)?)
                })
                .await?;
            self.stats.add_download(bytes);
            Ok(())
        }

        async fn delete_file(&self, path: &str) -> Result<()> {
            let path = path.to_owned();
            self.with_client(move |client, paths| Ok(client.unlink(&paths.of(&path))?))
                .await
        }

        async fn remove_directory(&self, path: &str) -> Result<()> {
            let path = path.to_owned();
            self.with_client(move |client, paths| Ok(client.rmdir(&paths.of(&path))?))
                .await
        }

        async fn delete_recursively(&self, path: &str) -> Result<()> {
            match self.stat(path).await? {
                Some(entry) if entry.is_dir() => {
                    let path = path.to_owned();
                    self.with_client(move |client, paths| remove_tree(client, paths, &path))
                        .await
                }
                Some(_) => self.delete_file(path).await,
                None => Ok(()),
            }
        }

        async fn list_files(&self, path: &str) -> Result<DirChildren> {
            let path = path.to_owned();
            self.with_client(move |client, paths| list(client, paths, &path))
                .await
        }

        async fn stat(&self, path: &str) -> Result<Option<Entry>> {
            let trimmed = path.trim_matches('/').to_owned();
            if trimmed.is_empty() {
                return Ok(Some(Entry::directory()));
            }
            self.with_client(move |client, paths| {
                let name = file_name(&trimmed);
                let siblings = list(client, paths, parent(&trimmed))?;
                if siblings.directories.iter().any(|dir| dir == name) {
                    return Ok(Some(Entry::directory()));
                }
                if siblings.files.iter().any(|file| file == name) {
                    let size = client.stat(&paths.of(&trimmed))?.size;
                    return Ok(Some(Entry::file(size)));
                }
                Ok(None)
            })
            .await
        }

        async fn rename(&self, src: &str, dst: &str) -> Result<()> {
            let (src, dst) = (src.to_owned(), dst.to_owned());
            self.with_client(move |client, paths| {
                Ok(client.rename(&paths.of(&src), &paths.of(&dst))?)
            })
            .await
        }

        fn pick_root(&self) -> String {
            String::new()
        }

        fn to_pick(&self, path: &str) -> RemotePick {
            split_share(self.account.extra.as_deref(), path)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn administrative_shares_are_hidden() {
        assert_eq!(
            visible_shares(["public", "IPC$", "backup", "ADMIN$", "public"]),
            vec!["backup".to_owned(), "public".to_owned()]
        );
    }

    #[test]
    fn picked_path_carries_its_share() {
        assert_eq!(
            split_share(None, "/backup/phone/DataBackup/"),
            RemotePick {
                remote: "phone/DataBackup".to_owned(),
                extra: Some("backup".to_owned()),
            }
        );
        assert_eq!(
            split_share(None, "backup"),
            RemotePick {
                remote: String::new(),
                extra: Some("backup".to_owned()),
            }
        );
        assert_eq!(
            split_share(Some("media"), "phone"),
            RemotePick {
                remote: "phone".to_owned(),
                extra: Some("media".to_owned()),
            }
        );
    }
}
