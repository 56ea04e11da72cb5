use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use log::debug;
use quick_xml::{events::Event, Reader};
use reqwest::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    Body, Client, Method, RequestBuilder, Response, StatusCode,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_stream::StreamExt;
use url::Url;

use crate::{
    error::{Error, Result},
    layout::{file_name, join},
};

use super::{DirChildren, Entry, Progress, Protocol, RemoteAccount, Storage, StorageStats};

const CHUNK_SIZE: usize = 1 << 16;
const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/><d:getcontentlength/></d:prop></d:propfind>"#;

/// One `<response>` of a PROPFIND multistatus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavEntry {
    /// Decoded server path.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Stateless HTTP client; "connected" only records that credentials worked.
#[derive(Debug)]
pub struct WebDavStorage {
    account: RemoteAccount,
    client: Client,
    base: Url,
    connected: AtomicBool,
    stats: StorageStats,
}

impl WebDavStorage {
    pub fn new(account: RemoteAccount) -> Result<Self> {
        let scheme = if account.extra.as_deref() == Some("https") {
            "https"
        } else {
            "http"
        };
        let port = account.port.map(|port| format!(":{port}")).unwrap_or_default();
        let base = Url::parse(&format!("{scheme}://{}{port}/", account.host))?;
        Ok(WebDavStorage {
            account,
            client: Client::new(),
            base,
            connected: AtomicBool::new(false),
            stats: StorageStats::new(),
        })
    }

    fn url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(Error::NoActiveSession);
        }
        Ok(self.authorized(method, path))
    }

    fn authorized(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(&self.account.user, Some(&self.account.password))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let result = request.send().await;
        self.stats.record(&result);
        Ok(result?)
    }

    async fn propfind(&self, path: &str, depth: u8) -> Result<Option<Vec<DavEntry>>> {
        let request = self
            .request(propfind_method()?, path)?
            .header("Depth", depth.to_string())
            .header(CONTENT_TYPE, "application/xml")
            .body(PROPFIND_BODY);
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, "PROPFIND", path)?;
        let body = response.text().await?;
        Ok(Some(parse_multistatus(&body)?))
    }
}

fn propfind_method() -> Result<Method> {
    Method::from_bytes(b"PROPFIND").map_err(Error::other)
}

fn check_status(response: Response, method: &str, path: &str) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(Error::LoginFailed(response.url().to_string()))
    } else if status.is_success() {
        Ok(response)
    } else {
        Err(Error::Network(format!("{method} {path}: {status}")))
    }
}

fn as_dir(path: &str) -> String {
    if path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{path}/")
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]));
            if let (Some(high), Some(low)) = hex {
                decoded.push(high << 4 | low);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|digit| digit as u8)
}

fn href_path(href: &str) -> String {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_owned(),
        Err(_) => href.to_owned(),
    };
    percent_decode(&path)
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Href,
    Length,
}

pub fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = vec![];
    let mut current: Option<DavEntry> = None;
    let mut field = None;
    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"response" => {
                    current = Some(DavEntry {
                        path: String::new(),
                        is_dir: false,
                        size: 0,
                    });
                }
                b"href" => field = Some(Field::Href),
                b"getcontentlength" => field = Some(Field::Length),
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir = true;
                    }
                }
                _ => {}
            },
            Event::Empty(element) => {
                if element.local_name().as_ref() == b"collection" {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir = true;
                    }
                }
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                if let (Some(entry), Some(field)) = (current.as_mut(), field) {
                    match field {
                        Field::Href => entry.path = href_path(&text),
                        Field::Length => entry.size = text.trim().parse().unwrap_or(0),
                    }
                }
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"response" => entries.extend(current.take()),
                b"href" | b"getcontentlength" => field = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(entries)
}

/// Children of `dir` from a depth-1 listing, which also reports `dir` itself.
pub fn children_of(dir: &str, entries: &[DavEntry]) -> DirChildren {
    let dir = normalize(dir);
    DirChildren::from_entries(
        entries
            .iter()
            .filter(|entry| normalize(&entry.path) != dir)
            .map(|entry| (file_name(&entry.path).to_owned(), entry.is_dir)),
    )
}

#[async_trait]
impl Storage for WebDavStorage {
    fn protocol(&self) -> Protocol {
        Protocol::WebDav
    }

    fn stats(&self) -> &StorageStats {
        &self.stats
    }

    async fn connect(&self) -> Result<()> {
        let root = as_dir(if self.account.remote.is_empty() {
            "/"
        } else {
            &self.account.remote
        });
        let request = self
            .authorized(propfind_method()?, &root)
            .header("Depth", "0")
            .header(CONTENT_TYPE, "application/xml")
            .body(PROPFIND_BODY);
        let response = self.send(request).await?;
        check_status(response, "PROPFIND", &root)?;
        self.connected.store(true, Ordering::Release);
        debug!("connected to {}", self.url(&root));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let request = self.request(Method::from_bytes(b"MKCOL").map_err(Error::other)?, &as_dir(path))?;
        let response = self.send(request).await?;
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            // already exists
            return Ok(());
        }
        check_status(response, "MKCOL", path)?;
        Ok(())
    }

    async fn upload(&self, src: &Path, dst_dir: &str, progress: Arc<Progress>) -> Result<()> {
        let name = src
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::FileDoesNotExist(src.to_owned()))?;
        let dst = join(dst_dir, &name);

        let mut file = File::open(src).await?;
        let total = file.metadata().await?.len();
        progress.start(total);

        let counter = progress.clone();
        let body = async_stream::stream! {
            let mut buffer = vec![0; CHUNK_SIZE];
            loop {
                match file.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => {
                        counter.advance(n as u64);
                        yield Ok::<_, std::io::Error>(buffer[..n].to_vec());
                    }
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        };

        let request = self
            .request(Method::PUT, &dst)?
            .header(CONTENT_LENGTH, total)
            .body(Body::wrap_stream(body));
        let response = self.send(request).await?;
        check_status(response, "PUT", &dst)?;
        self.stats.add_upload(total);
        Ok(())
    }

    async fn download(&self, src: &str, dst_dir: &Path, progress: Arc<Progress>) -> Result<()> {
        let request = self.request(Method::GET, src)?;
        let response = check_status(self.send(request).await?, "GET", src)?;
        progress.start(response.content_length().unwrap_or(0));

        let mut file = File::create(dst_dir.join(file_name(src))).await?;
        let mut stream = response.bytes_stream();
        let mut bytes = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
            progress.advance(chunk.len() as u64);
        }
        file.flush().await?;
        self.stats.add_download(bytes);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let response = self.send(self.request(Method::DELETE, path)?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response, "DELETE", path)?;
        Ok(())
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        self.delete_file(&as_dir(path)).await
    }

    /// DELETE on a collection removes everything below it.
    async fn delete_recursively(&self, path: &str) -> Result<()> {
        match self.stat(path).await? {
            Some(entry) if entry.is_dir() => self.remove_directory(path).await,
            Some(_) => self.delete_file(path).await,
            None => Ok(()),
        }
    }

    async fn list_files(&self, path: &str) -> Result<DirChildren> {
        let entries = self
            .propfind(&as_dir(path), 1)
            .await?
            .ok_or_else(|| Error::ItemNotFound(path.to_owned()))?;
        Ok(children_of(path, &entries))
    }

    async fn stat(&self, path: &str) -> Result<Option<Entry>> {
        let entries = self.propfind(path, 0).await?;
        let entry = entries
            .and_then(|entries| entries.into_iter().next())
            .map(|entry| {
                if entry.is_dir {
                    Entry::directory()
                } else {
                    Entry::file(entry.size)
                }
            });
        Ok(entry)
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let method = Method::from_bytes(b"MOVE").map_err(Error::other)?;
        let request = self
            .request(method, src)?
            .header("Destination", self.url(dst).to_string())
            .header("Overwrite", "T");
        check_status(self.send(request).await?, "MOVE", src)?;
        Ok(())
    }

    fn pick_root(&self) -> String {
        self.account.remote.clone()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const MULTISTATUS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/backup/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/backup/user.tar.zst</d:href>
    <d:propstat><d:prop><d:resourcetype/><d:getcontentlength>2048</d:getcontentlength></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>http://host/dav/backup/My%20Apps/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/backup/apk.tar.zst</d:href>
    <d:propstat><d:prop><d:resourcetype/><d:getcontentlength>10</d:getcontentlength></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn multistatus_parsing() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries[1],
            DavEntry {
                path: "/dav/backup/user.tar.zst".to_owned(),
                is_dir: false,
                size: 2048,
            }
        );
        assert_eq!(entries[2].path, "/dav/backup/My Apps/");
        assert!(entries[2].is_dir);
    }

    #[test]
    fn listing_excludes_the_directory_itself() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        assert_eq!(
            children_of("/dav/backup", &entries),
            DirChildren {
                files: vec!["apk.tar.zst".to_owned(), "user.tar.zst".to_owned()],
                directories: vec!["My Apps".to_owned()],
            }
        );
    }

    #[test]
    fn decoding() {
        assert_eq!(percent_decode("a%20b%2Fc"), "a b/c");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
