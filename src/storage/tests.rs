use std::{fs, path::Path, sync::Arc};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::error::{Error, Result};

use super::*;

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn connected(root: &Path) -> LocalStorage {
    let storage = LocalStorage::new(root);
    storage.connect().await.unwrap();
    storage
}

fn make_tree(root: &Path) {
    fs::create_dir_all(root.join("tree/a/b")).unwrap();
    fs::create_dir_all(root.join("tree/c")).unwrap();
    fs::write(root.join("tree/one.txt"), b"12345").unwrap();
    fs::write(root.join("tree/a/two.txt"), b"1234567890").unwrap();
    fs::write(root.join("tree/a/b/three.txt"), b"123").unwrap();
}

/// Only the primitives, so every recursive operation takes the generic walk.
#[derive(Debug)]
struct PrimitivesOnly(LocalStorage);

#[async_trait]
impl Storage for PrimitivesOnly {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    fn stats(&self) -> &StorageStats {
        self.0.stats()
    }

    async fn connect(&self) -> Result<()> {
        self.0.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.0.disconnect().await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.0.mkdir(path).await
    }

    async fn upload(&self, src: &Path, dst_dir: &str, progress: Arc<Progress>) -> Result<()> {
        self.0.upload(src, dst_dir, progress).await
    }

    async fn download(&self, src: &str, dst_dir: &Path, progress: Arc<Progress>) -> Result<()> {
        self.0.download(src, dst_dir, progress).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.0.delete_file(path).await
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        self.0.remove_directory(path).await
    }

    async fn list_files(&self, path: &str) -> Result<DirChildren> {
        self.0.list_files(path).await
    }

    async fn stat(&self, path: &str) -> Result<Option<Entry>> {
        self.0.stat(path).await
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.0.rename(src, dst).await
    }
}

#[test]
fn children_are_sorted_and_deduplicated() {
    let children = DirChildren::from_entries([
        ("b.tar", false),
        ("..", true),
        ("z", true),
        ("a.tar", false),
        (".", true),
        ("b.tar", false),
        ("m", true),
        ("m", false),
    ]);
    assert_eq!(
        children,
        DirChildren {
            files: vec!["a.tar".to_owned(), "b.tar".to_owned()],
            directories: vec!["m".to_owned(), "z".to_owned()],
        }
    );
    assert!(DirChildren::from_entries(Vec::<(String, bool)>::new()).is_empty());
}

#[test]
fn progress_percent() {
    let progress = Progress::new();
    assert_eq!(progress.percent(), 0);
    progress.start(200);
    progress.advance(50);
    assert_eq!(progress.percent(), 25);
    progress.advance(500);
    assert_eq!(progress.percent(), 100);
}

#[tokio::test]
async fn local_requires_connect() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    let root = path_str(dir.path());

    assert_eq!(storage.list_files(&root).await, Err(Error::NoActiveSession));
    storage.connect().await.unwrap();
    assert!(storage.list_files(&root).await.unwrap().is_empty());
    storage.disconnect().await.unwrap();
    assert_eq!(storage.exists(&root).await, Err(Error::NoActiveSession));
}

#[tokio::test]
async fn local_directories_and_sizes() {
    let dir = TempDir::new().unwrap();
    let storage = connected(dir.path()).await;
    make_tree(dir.path());

    let nested = path_str(&dir.path().join("x/y/z"));
    storage.mkdir_recursively(&nested).await.unwrap();
    assert_eq!(storage.stat(&nested).await.unwrap(), Some(Entry::directory()));

    let tree = path_str(&dir.path().join("tree"));
    assert_eq!(
        storage.list_files(&tree).await.unwrap(),
        DirChildren {
            files: vec!["one.txt".to_owned()],
            directories: vec!["a".to_owned(), "c".to_owned()],
        }
    );
    assert_eq!(storage.size(&tree).await.unwrap(), 18);
    assert_eq!(
        storage.size(&path_str(&dir.path().join("missing"))).await.unwrap(),
        0
    );

    storage.delete_recursively(&tree).await.unwrap();
    assert!(!storage.exists(&tree).await.unwrap());
    // missing paths are fine
    storage.delete_recursively(&tree).await.unwrap();
}

#[tokio::test]
async fn local_transfer_reports_progress() {
    let dir = TempDir::new().unwrap();
    let storage = connected(dir.path()).await;
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::create_dir_all(dir.path().join("remote")).unwrap();
    fs::create_dir_all(dir.path().join("back")).unwrap();
    let src = dir.path().join("src/user.tar.zst");
    fs::write(&src, vec![7u8; 300_000]).unwrap();

    let progress = Arc::new(Progress::new());
    let remote = path_str(&dir.path().join("remote"));
    storage.upload(&src, &remote, progress.clone()).await.unwrap();
    assert_eq!(progress.percent(), 100);
    assert_eq!(progress.transferred(), 300_000);
    assert_eq!(storage.stats().bytes_uploaded(), 300_000);

    let uploaded = crate::layout::join(&remote, "user.tar.zst");
    storage
        .download(&uploaded, &dir.path().join("back"), Arc::new(Progress::new()))
        .await
        .unwrap();
    assert_eq!(
        fs::read(dir.path().join("back/user.tar.zst")).unwrap(),
        fs::read(&src).unwrap()
    );
    assert_eq!(storage.stats().bytes_downloaded(), 300_000);

    let renamed = crate::layout::join(&remote, "renamed.tar.zst");
    storage.rename(&uploaded, &renamed).await.unwrap();
    assert!(!storage.exists(&uploaded).await.unwrap());
    assert_eq!(storage.stat(&renamed).await.unwrap(), Some(Entry::file(300_000)));
}

#[tokio::test]
async fn generic_walk_over_primitives() {
    let dir = TempDir::new().unwrap();
    make_tree(dir.path());
    let storage = PrimitivesOnly(LocalStorage::new(dir.path()));
    storage.connect().await.unwrap();

    let tree = path_str(&dir.path().join("tree"));
    let mut files = list_deep(&storage, &tree).await.unwrap();
    files.sort();
    assert_eq!(
        files,
        vec![
            crate::layout::join(&tree, "a/b/three.txt"),
            crate::layout::join(&tree, "a/two.txt"),
            crate::layout::join(&tree, "one.txt"),
        ]
    );
    assert_eq!(storage.size(&tree).await.unwrap(), 18);

    let nested = path_str(&dir.path().join("p/q"));
    storage.mkdir_recursively(&nested).await.unwrap();
    assert!(storage.exists(&nested).await.unwrap());

    storage.delete_recursively(&tree).await.unwrap();
    assert!(!dir.path().join("tree").exists());
}

#[tokio::test]
async fn mkdir_recursively_refuses_files_on_the_way() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("file"), b"x").unwrap();
    let storage = PrimitivesOnly(LocalStorage::new(dir.path()));
    storage.connect().await.unwrap();

    let blocked = path_str(&dir.path().join("file/sub"));
    assert_eq!(
        storage.mkdir_recursively(&blocked).await,
        Err(Error::FileIsNotDirectory(dir.path().join("file")))
    );
}

struct ScriptedPicker {
    choose: &'static str,
}

#[async_trait]
impl DirectoryPicker for ScriptedPicker {
    async fn pick(&self, browser: &dyn DirectoryBrowser, root: &str) -> Result<Option<String>> {
        let children = browser.children(root).await?;
        Ok(children
            .directories
            .iter()
            .find(|dir| dir.as_str() == self.choose)
            .map(|dir| crate::layout::join(root, dir)))
    }
}

#[tokio::test]
async fn picking_a_directory() {
    let dir = TempDir::new().unwrap();
    make_tree(dir.path());
    let storage = connected(&dir.path().join("tree")).await;

    let picked = pick_directory(&storage, &ScriptedPicker { choose: "c" })
        .await
        .unwrap();
    assert_eq!(
        picked,
        Some(RemotePick {
            remote: path_str(&dir.path().join("tree/c")),
            extra: None,
        })
    );

    let cancelled = pick_directory(&storage, &ScriptedPicker { choose: "nope" })
        .await
        .unwrap();
    assert_eq!(cancelled, None);
}

#[tokio::test]
async fn disabled_protocols_are_reported() {
    let url: StorageUrl = "smb://user:pw@nas/share/backup".parse().unwrap();
    let result = create_storage(&url).await;
    if cfg!(feature = "smb") {
        assert!(result.is_ok());
    } else {
        assert_eq!(
            result.map(|_| ()),
            Err(Error::ProtocolDisabled("smb".to_owned()))
        );
    }
}
