use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::compression::CompressionType;

use super::{DataType, OpType, SubjectKind};

/// Where a record's archives live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub op_type: OpType,
    pub compression_type: CompressionType,
    /// Remote account name, empty for the local filesystem.
    pub cloud: String,
    pub backup_dir: String,
    /// Millisecond timestamp naming the archive directory.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraInfo {
    pub existed: bool,
    pub activated: bool,
    pub last_backup_time: i64,
    pub uid: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStats {
    pub bytes: u64,
    pub timestamp: i64,
}

/// A package with its data, or a media directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: u64,
    pub kind: SubjectKind,
    /// Package name, or the media entry's name.
    pub name: String,
    #[serde(default)]
    pub label: String,
    /// Absolute content path of a media subject.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub user_id: u32,
    #[serde(default)]
    pub preserve_id: u64,
    pub index_info: IndexInfo,
    #[serde(default)]
    pub extra_info: ExtraInfo,
    #[serde(default)]
    pub data_stats: BTreeMap<DataType, DataStats>,
    /// Data types taking part in runs; an empty set selects everything.
    #[serde(default)]
    pub selection: BTreeSet<DataType>,
}

/// Logical identity shared by a backup record and the restore records made from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectKey {
    pub kind: SubjectKind,
    pub name: String,
    pub user_id: u32,
    pub preserve_id: u64,
}

impl Subject {
    pub fn package<S: Into<String>>(name: S, user_id: u32) -> Self {
        Subject {
            kind: SubjectKind::Package,
            name: name.into(),
            user_id,
            ..Subject::default()
        }
    }

    pub fn media<S: Into<String>, P: Into<String>>(name: S, path: P) -> Self {
        Subject {
            kind: SubjectKind::Media,
            name: name.into(),
            path: path.into(),
            ..Subject::default()
        }
    }

    pub fn key(&self) -> SubjectKey {
        SubjectKey {
            kind: self.kind,
            name: self.name.clone(),
            user_id: self.user_id,
            preserve_id: self.preserve_id,
        }
    }

    pub fn is_selected(&self, data_type: DataType) -> bool {
        self.selection.is_empty() || self.selection.contains(&data_type)
    }

    pub fn recorded_bytes(&self, data_type: DataType) -> Option<u64> {
        self.data_stats.get(&data_type).map(|stats| stats.bytes)
    }

    /// `<name>/user_<uid>[@<preserveId>]` for packages, `<name>[@<preserveId>]` for media.
    pub fn relative_dir(&self) -> String {
        let base = match self.kind {
            SubjectKind::Package => format!("{}/user_{}", self.name, self.user_id),
            SubjectKind::Media => self.name.clone(),
        };
        if self.preserve_id == 0 {
            base
        } else {
            format!("{base}@{}", self.preserve_id)
        }
    }

    /// Copy of this record describing where a later restore reads from.
    pub fn to_restore_record(&self, prior_id: Option<u64>) -> Subject {
        let mut record = self.clone();
        record.id = prior_id.unwrap_or(0);
        record.index_info.op_type = OpType::Restore;
        record.extra_info.activated = false;
        record
    }
}
