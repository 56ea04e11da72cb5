mod memory;


use std::fmt::Debug;

use async_trait::async_trait;

use crate::{
    error::Result,
    model::{OpType, ProcessingInfo, Subject, SubjectKey, SubjectKind, Task, TaskDetail},
};

pub use memory::MemoryRepository;

/// Persistent entity store. Every upsert assigns an id to records that have none.
#[async_trait]
pub trait Repository: Debug + Send + Sync {
    async fn upsert_task(&self, task: &mut Task) -> Result<()>;
    async fn upsert_processing_info(&self, info: &mut ProcessingInfo) -> Result<()>;
    async fn upsert_detail(&self, detail: &mut TaskDetail) -> Result<()>;

    /// Records are matched by id, then by identity plus operation and location.
    async fn upsert_subject(&self, subject: &mut Subject) -> Result<()>;

    async fn query_activated(&self, op_type: OpType, kind: SubjectKind) -> Result<Vec<Subject>>;

    /// The RESTORE-kind record describing archives of `key` at a given location.
    async fn query_restore_record(
        &self,
        key: &SubjectKey,
        cloud: &str,
        backup_dir: &str,
    ) -> Result<Option<Subject>>;

    async fn clear_activated(&self, ids: &[u64]) -> Result<()>;

    async fn task(&self, id: u64) -> Result<Option<Task>>;
    async fn details(&self, task_id: u64) -> Result<Vec<TaskDetail>>;
    async fn processing_infos(&self, task_id: u64) -> Result<Vec<ProcessingInfo>>;
    async fn subjects(&self) -> Result<Vec<Subject>>;

    async fn subject(&self, id: u64) -> Result<Option<Subject>> {
        let subjects = self.subjects().await?;
        Ok(subjects.into_iter().find(|subject| subject.id == id))
    }
}

pub type SharedRepository = std::sync::Arc<dyn Repository>;
