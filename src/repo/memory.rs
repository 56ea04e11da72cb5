use std::{collections::BTreeMap, path::Path};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::RwLock};

use crate::{
    error::Result,
    format::format_path,
    model::{OpType, ProcessingInfo, Subject, SubjectKey, SubjectKind, Task, TaskDetail},
};

use super::Repository;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    next_id: u64,
    tasks: BTreeMap<u64, Task>,
    processing_infos: BTreeMap<u64, ProcessingInfo>,
    details: BTreeMap<u64, TaskDetail>,
    subjects: BTreeMap<u64, Subject>,
}

impl Tables {
    fn assign(&mut self, id: &mut u64) {
        if *id == 0 {
            self.next_id += 1;
            *id = self.next_id;
        } else {
            self.next_id = self.next_id.max(*id);
        }
    }
}

/// In-process store with a load-at-start, flush-at-end JSON lifecycle.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        MemoryRepository::default()
    }

    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await? {
            debug!("no repository at {}, starting empty", format_path(path));
            return Ok(MemoryRepository::new());
        }

        let bytes = fs::read(path).await?;
        let tables = serde_json::from_slice(&bytes)?;
        Ok(MemoryRepository {
            tables: RwLock::new(tables),
        })
    }

    pub async fn flush(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&*self.tables.read().await)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, bytes).await?;
        debug!("flushed repository to {}", format_path(path));
        Ok(())
    }

    pub async fn insert_subjects<I: IntoIterator<Item = Subject>>(&self, subjects: I) -> Result<()> {
        for mut subject in subjects {
            self.upsert_subject(&mut subject).await?;
        }
        Ok(())
    }
}

fn same_location(a: &Subject, b: &Subject) -> bool {
    a.key() == b.key()
        && a.index_info.op_type == b.index_info.op_type
        && a.index_info.cloud == b.index_info.cloud
        && a.index_info.backup_dir == b.index_info.backup_dir
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn upsert_task(&self, task: &mut Task) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.assign(&mut task.id);
        tables.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn upsert_processing_info(&self, info: &mut ProcessingInfo) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.assign(&mut info.id);
        tables.processing_infos.insert(info.id, info.clone());
        Ok(())
    }

    async fn upsert_detail(&self, detail: &mut TaskDetail) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.assign(&mut detail.id);
        tables.details.insert(detail.id, detail.clone());
        Ok(())
    }

    async fn upsert_subject(&self, subject: &mut Subject) -> Result<()> {
        let mut tables = self.tables.write().await;
        if subject.id == 0 || !tables.subjects.contains_key(&subject.id) {
            let existing = tables
                .subjects
                .values()
                .find(|other| same_location(other, subject))
                .map(|other| other.id);
            if let Some(id) = existing {
                subject.id = id;
            }
        }
        tables.assign(&mut subject.id);
        tables.subjects.insert(subject.id, subject.clone());
        Ok(())
    }

    async fn query_activated(&self, op_type: OpType, kind: SubjectKind) -> Result<Vec<Subject>> {
        let tables = self.tables.read().await;
        let subjects = tables
            .subjects
            .values()
            .filter(|subject| {
                subject.extra_info.activated
                    && subject.kind == kind
                    && subject.index_info.op_type == op_type
            })
            .cloned()
            .collect();
        Ok(subjects)
    }

    async fn query_restore_record(
        &self,
        key: &SubjectKey,
        cloud: &str,
        backup_dir: &str,
    ) -> Result<Option<Subject>> {
        let tables = self.tables.read().await;
        let record = tables
            .subjects
            .values()
            .find(|subject| {
                subject.key() == *key
                    && subject.index_info.op_type == OpType::Restore
                    && subject.index_info.cloud == cloud
                    && subject.index_info.backup_dir == backup_dir
            })
            .cloned();
        Ok(record)
    }

    async fn clear_activated(&self, ids: &[u64]) -> Result<()> {
        let mut tables = self.tables.write().await;
        for id in ids {
            if let Some(subject) = tables.subjects.get_mut(id) {
                subject.extra_info.activated = false;
            }
        }
        Ok(())
    }

    async fn task(&self, id: u64) -> Result<Option<Task>> {
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn details(&self, task_id: u64) -> Result<Vec<TaskDetail>> {
        let tables = self.tables.read().await;
        let details = tables
            .details
            .values()
            .filter(|detail| detail.task_id == task_id)
            .cloned()
            .collect();
        Ok(details)
    }

    async fn processing_infos(&self, task_id: u64) -> Result<Vec<ProcessingInfo>> {
        let tables = self.tables.read().await;
        let infos = tables
            .processing_infos
            .values()
            .filter(|info| info.task_id == task_id)
            .cloned()
            .collect();
        Ok(infos)
    }

    async fn subjects(&self) -> Result<Vec<Subject>> {
        Ok(self.tables.read().await.subjects.values().cloned().collect())
    }
}
