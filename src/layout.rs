use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    compression::CompressionType,
    model::{DataType, Subject, SubjectKind},
};

pub const CONFIGS_DIR: &str = "configs";
pub const ICON_ARCHIVE_NAME: &str = "icon.tar";
pub const SELF_APK_NAME: &str = "DataBackup.apk";

/// How a backup picks its `<timestamp>` directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStrategy {
    /// Reuse the directory of the previous backup of the same subject.
    #[default]
    Overwrite,
    /// Always start a new directory, later than every previous one.
    Increment,
}

impl BackupStrategy {
    pub fn timestamp(self, prior: Option<i64>, now: i64) -> i64 {
        match (self, prior) {
            (BackupStrategy::Overwrite, Some(prior)) if prior > 0 => prior,
            (BackupStrategy::Increment, Some(prior)) => now.max(prior + 1),
            _ => now,
        }
    }
}

/// Archive tree shape, shared by local and remote targets:
/// `<root>/<kind>/<relativeDir>/<timestamp>/<dataType>.<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: String,
}

impl Layout {
    pub fn new<S: Into<String>>(root: S) -> Self {
        let root = root.into();
        let root = if root.len() > 1 {
            root.trim_end_matches('/').to_owned()
        } else {
            root
        };
        Layout { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn kind_dir(&self, kind: SubjectKind) -> String {
        join(&self.root, kind.root_dir())
    }

    pub fn subject_dir(&self, subject: &Subject) -> String {
        join(&self.kind_dir(subject.kind), &subject.relative_dir())
    }

    pub fn archive_dir(&self, subject: &Subject) -> String {
        join(
            &self.subject_dir(subject),
            &subject.index_info.timestamp.to_string(),
        )
    }

    pub fn archive_path(&self, subject: &Subject, data_type: DataType) -> String {
        join(
            &self.archive_dir(subject),
            &archive_file_name(data_type, subject.index_info.compression_type),
        )
    }

    pub fn record_path(&self, subject: &Subject) -> String {
        join(&self.archive_dir(subject), subject.kind.record_name())
    }

    pub fn configs_dir(&self) -> String {
        join(&self.root, CONFIGS_DIR)
    }

    pub fn icon_archive_path(&self) -> String {
        join(&self.configs_dir(), ICON_ARCHIVE_NAME)
    }

    pub fn self_apk_path(&self) -> String {
        join(&self.root, SELF_APK_NAME)
    }

    /// The same relative location under another root.
    pub fn rebase(&self, path: &str, other: &Layout) -> String {
        match path.strip_prefix(&self.root) {
            Some(rest) => format!("{}{rest}", other.root),
            None => path.to_owned(),
        }
    }
}

pub fn archive_file_name(data_type: DataType, compression_type: CompressionType) -> String {
    format!("{}.{}", data_type.archive_stem(), compression_type.suffix())
}

pub fn join(parent: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if parent.is_empty() {
        child.to_owned()
    } else if parent.ends_with('/') {
        format!("{parent}{child}")
    } else {
        format!("{parent}/{child}")
    }
}

pub fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => "",
    }
}

pub fn file_name(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// On-device origin of each data type.
#[derive(Debug, Clone)]
pub struct DataPaths {
    data_root: PathBuf,
}

impl DataPaths {
    pub fn new<P: Into<PathBuf>>(data_root: P) -> Self {
        DataPaths {
            data_root: data_root.into(),
        }
    }

    /// Directory holding one entry per package for `data_type`.
    pub fn type_dir(&self, data_type: DataType, user_id: u32) -> Option<PathBuf> {
        let user = user_id.to_string();
        let android = || self.data_root.join("media").join(&user).join("Android");
        match data_type {
            DataType::User => Some(self.data_root.join("user").join(&user)),
            DataType::UserDe => Some(self.data_root.join("user_de").join(&user)),
            DataType::Data => Some(android().join("data")),
            DataType::Obb => Some(android().join("obb")),
            DataType::AppMedia => Some(android().join("media")),
            DataType::Apk | DataType::Media => None,
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }
}
