use std::collections::VecDeque;

use log::trace;

use crate::{error::Result, layout::join};

use super::{EntryKind, Storage};

/// Breadth-first removal built on the primitives, for backends without a
/// native recursive delete. Missing paths are not an error.
pub async fn delete_recursively<S: Storage + ?Sized>(storage: &S, path: &str) -> Result<()> {
    let Some(entry) = storage.stat(path).await? else {
        return Ok(());
    };
    if entry.kind == EntryKind::File {
        return storage.delete_file(path).await;
    }

    let mut directories = vec![path.to_owned()];
    let mut queue = VecDeque::from([path.to_owned()]);
    while let Some(dir) = queue.pop_front() {
        let children = storage.list_files(&dir).await?;
        for file in &children.files {
            let file_path = join(&dir, file);
            trace!("deleting {file_path}");
            storage.delete_file(&file_path).await?;
        }
        for child in &children.directories {
            let child_path = join(&dir, child);
            directories.push(child_path.clone());
            queue.push_back(child_path);
        }
    }

    for dir in directories.iter().rev() {
        storage.remove_directory(dir).await?;
    }
    Ok(())
}

pub async fn size_recursive<S: Storage + ?Sized>(storage: &S, path: &str) -> Result<u64> {
    let Some(entry) = storage.stat(path).await? else {
        return Ok(0);
    };
    if entry.kind == EntryKind::File {
        return Ok(entry.size);
    }

    let mut total = 0;
    for file in list_deep(storage, path).await? {
        if let Some(entry) = storage.stat(&file).await? {
            total += entry.size;
        }
    }
    Ok(total)
}

/// Every file below `path`, as full paths in breadth-first order.
pub async fn list_deep<S: Storage + ?Sized>(storage: &S, path: &str) -> Result<Vec<String>> {
    let mut files = vec![];
    let mut queue = VecDeque::from([path.to_owned()]);
    while let Some(dir) = queue.pop_front() {
        let children = storage.list_files(&dir).await?;
        files.extend(children.files.iter().map(|file| join(&dir, file)));
        queue.extend(children.directories.iter().map(|child| join(&dir, child)));
    }
    Ok(files)
}
