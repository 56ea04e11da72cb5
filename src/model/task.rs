use serde::{Deserialize, Serialize};

use super::{OpType, OperationState, SubjectKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub op_type: OpType,
    pub subject_kind: SubjectKind,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub raw_bytes: u64,
    pub available_bytes: u64,
    pub total_bytes: u64,
    pub total_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub is_processing: bool,
    pub cloud: String,
    pub backup_dir: String,
}

impl Task {
    pub fn finished_count(&self) -> u32 {
        self.success_count + self.failure_count
    }

    pub fn progress(&self) -> f32 {
        if self.total_count == 0 {
            1.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let progress = self.finished_count() as f32 / self.total_count as f32;
            progress
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Preprocessing,
    Processing,
    PostProcessing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingKind {
    NecessaryPreparations,
    SetUpInstallEnv,
    BackupItself,
    SaveIcons,
    NecessaryRemainingDataProcessing,
}

impl ProcessingKind {
    pub fn title(self) -> &'static str {
        match self {
            ProcessingKind::NecessaryPreparations => "Necessary preparations",
            ProcessingKind::SetUpInstallEnv => "Set up installation environment",
            ProcessingKind::BackupItself => "Backup itself",
            ProcessingKind::SaveIcons => "Save icons",
            ProcessingKind::NecessaryRemainingDataProcessing => "Necessary remaining data processing",
        }
    }
}

/// One step of the preprocessing or post-processing phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInfo {
    pub id: u64,
    pub task_id: u64,
    pub phase: Phase,
    pub kind: ProcessingKind,
    pub title: String,
    pub state: OperationState,
    pub progress: f32,
    pub log: String,
}

impl ProcessingInfo {
    pub fn new(task_id: u64, phase: Phase, kind: ProcessingKind) -> Self {
        ProcessingInfo {
            id: 0,
            task_id,
            phase,
            kind,
            title: kind.title().to_owned(),
            state: OperationState::Idle,
            progress: 0.0,
            log: String::new(),
        }
    }

    pub fn finish(&mut self, state: OperationState, log: String) {
        self.state = state;
        self.progress = 1.0;
        self.log = log;
    }
}
