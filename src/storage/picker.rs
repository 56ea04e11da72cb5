use async_trait::async_trait;

use crate::error::Result;

use super::{DirChildren, Storage};

/// A chosen remote directory and the protocol detail needed to find it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePick {
    pub remote: String,
    /// The selected share for SMB.
    pub extra: Option<String>,
}

/// Listing callback handed to a picker.
#[async_trait]
pub trait DirectoryBrowser: Send + Sync {
    async fn children(&self, path: &str) -> Result<DirChildren>;
}

/// The interactive side of picking a directory, owned by the host.
#[async_trait]
pub trait DirectoryPicker: Send + Sync {
    /// Browses from `root`, returning the chosen path or `None` when cancelled.
    async fn pick(&self, browser: &dyn DirectoryBrowser, root: &str) -> Result<Option<String>>;
}

struct StorageBrowser<'a, S: ?Sized> {
    storage: &'a S,
}

#[async_trait]
impl<'a, S: Storage + ?Sized> DirectoryBrowser for StorageBrowser<'a, S> {
    async fn children(&self, path: &str) -> Result<DirChildren> {
        self.storage.list_files(path).await
    }
}

pub async fn pick_directory<S: Storage + ?Sized>(
    storage: &S,
    picker: &dyn DirectoryPicker,
) -> Result<Option<RemotePick>> {
    let browser = StorageBrowser { storage };
    let root = storage.pick_root();
    let picked = picker.pick(&browser, &root).await?;
    Ok(picked.map(|path| storage.to_pick(&path)))
}
