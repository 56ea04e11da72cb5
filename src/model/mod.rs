mod subject;
mod task;

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

pub use {
    subject::{DataStats, ExtraInfo, IndexInfo, Subject, SubjectKey},
    task::{Phase, ProcessingInfo, ProcessingKind, Task},
};

/// Milliseconds since the epoch, the unit of every timestamp in the model.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpType {
    #[default]
    Backup,
    Restore,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectKind {
    #[default]
    Package,
    Media,
}

impl SubjectKind {
    /// Directory under the backup root holding every subject of this kind.
    pub fn root_dir(self) -> &'static str {
        match self {
            SubjectKind::Package => "apps",
            SubjectKind::Media => "medium",
        }
    }

    pub fn record_name(self) -> &'static str {
        match self {
            SubjectKind::Package => "package_restore_config.json",
            SubjectKind::Media => "media_restore_config.json",
        }
    }

    /// Processing order; APK has to settle before any data type on restore.
    pub fn data_types(self) -> &'static [DataType] {
        match self {
            SubjectKind::Package => &PACKAGE_DATA_TYPES,
            SubjectKind::Media => &[DataType::Media],
        }
    }

    /// The data type whose absence fails the whole item.
    pub fn mandatory(self) -> DataType {
        match self {
            SubjectKind::Package => DataType::User,
            SubjectKind::Media => DataType::Media,
        }
    }
}

pub const PACKAGE_DATA_TYPES: [DataType; 6] = [
    DataType::Apk,
    DataType::User,
    DataType::UserDe,
    DataType::Data,
    DataType::Obb,
    DataType::AppMedia,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Apk,
    User,
    UserDe,
    Data,
    Obb,
    AppMedia,
    Media,
}

impl DataType {
    /// Archive file stem.
    pub fn archive_stem(self) -> &'static str {
        match self {
            DataType::Apk => "apk",
            DataType::User => "user",
            DataType::UserDe => "user_de",
            DataType::Data => "data",
            DataType::Obb => "obb",
            DataType::AppMedia | DataType::Media => "media",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            DataType::Apk => "APK",
            DataType::User => "USER",
            DataType::UserDe => "USER_DE",
            DataType::Data => "DATA",
            DataType::Obb => "OBB",
            DataType::AppMedia | DataType::Media => "MEDIA",
        }
    }

    /// Lives under the shared media tree rather than the private data dirs.
    pub fn is_external(self) -> bool {
        matches!(
            self,
            DataType::Data | DataType::Obb | DataType::AppMedia | DataType::Media
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    #[default]
    Idle,
    Processing,
    Uploading,
    Downloading,
    Skip,
    Done,
    Error,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Skip | OperationState::Done | OperationState::Error
        )
    }
}

/// Per data type progress of one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub title: String,
    pub state: OperationState,
    pub bytes: u64,
    pub progress: f32,
    pub log: String,
    pub content: String,
}

impl Info {
    pub fn new(data_type: DataType) -> Self {
        Info {
            title: data_type.title().to_owned(),
            ..Info::default()
        }
    }

    pub fn finish(&mut self, state: OperationState, log: String) {
        self.state = state;
        self.log = log;
        self.progress = 1.0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub id: u64,
    pub task_id: u64,
    pub subject: Subject,
    pub state: OperationState,
    pub infos: BTreeMap<DataType, Info>,
}

impl TaskDetail {
    pub fn new(task_id: u64, subject: Subject) -> Self {
        let infos = subject
            .kind
            .data_types()
            .iter()
            .map(|data_type| (*data_type, Info::new(*data_type)))
            .collect();
        TaskDetail {
            id: 0,
            task_id,
            subject,
            state: OperationState::Idle,
            infos,
        }
    }

    pub fn info(&self, data_type: DataType) -> Option<&Info> {
        self.infos.get(&data_type)
    }

    pub fn info_mut(&mut self, data_type: DataType) -> &mut Info {
        self.infos
            .entry(data_type)
            .or_insert_with(|| Info::new(data_type))
    }

    pub fn is_success(&self) -> bool {
        self.infos
            .values()
            .all(|info| info.state != OperationState::Error)
    }

    pub fn has_failed(&self) -> bool {
        !self.is_success()
    }

    /// Marks every info that has not finished yet.
    pub fn fail_remaining(&mut self, log: &str) {
        for info in self.infos.values_mut() {
            if !info.state.is_terminal() {
                info.finish(OperationState::Error, log.to_owned());
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = OperationState::Idle;
        for (data_type, info) in &mut self.infos {
            *info = Info::new(*data_type);
        }
    }

    pub fn settle(&mut self) {
        self.state = if self.is_success() {
            OperationState::Done
        } else {
            OperationState::Error
        };
    }
}
