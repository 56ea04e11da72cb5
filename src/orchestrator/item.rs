use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use log::{debug, error, warn};
use tokio::fs;

use crate::{
    error::{Error, Result, StepError, StepResult},
    format::format_path,
    layout::{archive_file_name, join},
    model::{
        now_millis, DataType, IndexInfo, OpType, OperationState, Subject, SubjectKind, TaskDetail,
    },
    processor::{BackupStep, RestoreStep},
};

use super::Orchestrator;

const ITEM_FAILED: &str = "skipped, item already failed";
const CANCELLED: &str = "cancelled";

impl Orchestrator {
    pub(super) async fn backup_item(&self, detail: &mut TaskDetail) -> Result<()> {
        let mut subject = detail.subject.clone();
        if self.kind == SubjectKind::Package {
            let killed = self
                .toolbox
                .device
                .kill(&subject.name, subject.user_id, self.config.kill_policy)
                .await;
            if !killed.is_success() {
                debug!("failed to stop {}: {}", subject.name, killed.out_string());
            }
        }

        let prior = self
            .repository
            .query_restore_record(&subject.key(), &self.cloud, &self.config.backup_dir)
            .await?;
        let prior_timestamp = prior.as_ref().map(|prior| prior.index_info.timestamp);
        subject.index_info = IndexInfo {
            op_type: OpType::Backup,
            compression_type: self.config.compression_type,
            cloud: self.cloud.clone(),
            backup_dir: self.config.backup_dir.clone(),
            timestamp: self
                .config
                .backup_strategy
                .timestamp(prior_timestamp, now_millis()),
        };

        let remote_dir = self.target.archive_dir(&subject);
        let local_dir = PathBuf::from(self.stage.archive_dir(&subject));
        if let Err(err) = self.prepare_dirs(&remote_dir, &local_dir).await {
            warn!("failed to create {remote_dir}: {err}");
            detail.fail_remaining(&format!("failed to create {remote_dir}: {err}"));
            detail.settle();
            return Ok(());
        }
        let existing = match self.storage.list_files(&remote_dir).await {
            Ok(children) => children.files.into_iter().collect(),
            Err(_) => BTreeSet::new(),
        };

        let mut halted = false;
        for &data_type in self.kind.data_types() {
            if self.skip_step(detail, data_type, halted) {
                continue;
            }
            self.start_step(detail, data_type).await?;

            let mut result = self
                .processor
                .backup(
                    data_type,
                    BackupStep {
                        subject: &mut subject,
                        prior: prior.as_ref(),
                        dst_dir: &local_dir,
                        existing: &existing,
                    },
                )
                .await;
            if result.is_ok() && !self.storage.is_local() {
                let staged = local_dir.join(archive_file_name(
                    data_type,
                    subject.index_info.compression_type,
                ));
                if let Err(err) = self.upload_archive(detail, data_type, &staged, &remote_dir).await {
                    result = Err(err.into());
                }
            }

            let bytes = subject.recorded_bytes(data_type);
            halted = self.finish_step(detail, data_type, result, bytes).await?;
        }

        detail.settle();
        if detail.state == OperationState::Done {
            if let Err(err) = self
                .commit_backup(&mut subject, prior.as_ref(), &local_dir, &remote_dir)
                .await
            {
                error!("failed to record the backup of {}: {err}", subject.name);
                detail.state = OperationState::Error;
            }
        }
        self.drop_stage(&local_dir).await;
        detail.subject = subject;
        Ok(())
    }

    pub(super) async fn restore_item(&self, detail: &mut TaskDetail) -> Result<()> {
        let mut subject = detail.subject.clone();
        let user_id = self.config.restore_user.unwrap_or(subject.user_id);
        let remote_dir = self.target.archive_dir(&subject);
        let local_dir = PathBuf::from(self.stage.archive_dir(&subject));
        if !self.storage.is_local() {
            if let Err(err) = fs::create_dir_all(&local_dir).await {
                detail.fail_remaining(&format!("failed to create {}: {err}", format_path(&local_dir)));
                detail.settle();
                return Ok(());
            }
        }

        let mut halted = false;
        for &data_type in self.kind.data_types() {
            if self.skip_step(detail, data_type, halted) {
                continue;
            }
            self.start_step(detail, data_type).await?;

            let fetched = if self.storage.is_local() || !subject.is_selected(data_type) {
                Ok(())
            } else {
                self.download_archive(detail, &subject, data_type, &remote_dir, &local_dir)
                    .await
            };
            let result = match fetched {
                Ok(()) => {
                    let step = RestoreStep {
                        subject: &subject,
                        src_dir: &local_dir,
                        user_id,
                    };
                    self.processor.restore(data_type, step).await
                }
                Err(err) => Err(StepError::from(err)),
            };
            halted = self.finish_step(detail, data_type, result, None).await?;
        }

        detail.settle();
        if detail.state == OperationState::Done {
            subject.extra_info.existed = true;
            if let Err(err) = self.repository.upsert_subject(&mut subject).await {
                error!("failed to record the restore of {}: {err}", subject.name);
                detail.state = OperationState::Error;
            }
        }
        self.drop_stage(&local_dir).await;
        detail.subject = subject;
        Ok(())
    }

    async fn prepare_dirs(&self, remote_dir: &str, local_dir: &Path) -> Result<()> {
        self.storage.mkdir_recursively(remote_dir).await?;
        if !self.storage.is_local() {
            fs::create_dir_all(local_dir).await?;
        }
        Ok(())
    }

    /// Finishes steps that must not run; returns whether `data_type` was one.
    fn skip_step(&self, detail: &mut TaskDetail, data_type: DataType, halted: bool) -> bool {
        let log = if halted {
            ITEM_FAILED
        } else if self.is_cancelled() {
            CANCELLED
        } else {
            return false;
        };
        detail
            .info_mut(data_type)
            .finish(OperationState::Error, log.to_owned());
        true
    }

    async fn start_step(&self, detail: &mut TaskDetail, data_type: DataType) -> Result<()> {
        detail.info_mut(data_type).state = OperationState::Processing;
        self.save_detail(detail).await
    }

    /// Stores the outcome; returns whether later data types must not run.
    async fn finish_step(
        &self,
        detail: &mut TaskDetail,
        data_type: DataType,
        result: StepResult,
        bytes: Option<u64>,
    ) -> Result<bool> {
        let apk_gate = self.op_type == OpType::Restore && data_type == DataType::Apk;
        let info = detail.info_mut(data_type);
        if let Some(bytes) = bytes {
            info.bytes = bytes;
        }
        let halts = match result {
            Ok(log) => {
                info.finish(OperationState::Done, log);
                false
            }
            Err(err) => {
                debug!("{data_type}: {err}");
                let state = err.state();
                let halts = err.halts_item() || (apk_gate && state == OperationState::Error);
                info.finish(state, err.to_string());
                halts
            }
        };
        self.save_detail(detail).await?;
        Ok(halts)
    }

    async fn upload_archive(
        &self,
        detail: &mut TaskDetail,
        data_type: DataType,
        staged: &Path,
        remote_dir: &str,
    ) -> Result<()> {
        if !fs::try_exists(staged).await? {
            return Ok(());
        }
        detail.info_mut(data_type).state = OperationState::Uploading;
        self.save_detail(detail).await?;
        self.upload(detail.id, staged, remote_dir).await?;
        fs::remove_file(staged).await?;
        Ok(())
    }

    async fn download_archive(
        &self,
        detail: &mut TaskDetail,
        subject: &Subject,
        data_type: DataType,
        remote_dir: &str,
        local_dir: &Path,
    ) -> Result<()> {
        let name = archive_file_name(data_type, subject.index_info.compression_type);
        let remote = join(remote_dir, &name);
        if !self.storage.exists(&remote).await? {
            return Ok(());
        }
        detail.info_mut(data_type).state = OperationState::Downloading;
        self.save_detail(detail).await?;
        self.download(detail.id, &remote, local_dir).await
    }

    /// Writes the index record beside the archives, then updates both entities.
    async fn commit_backup(
        &self,
        subject: &mut Subject,
        prior: Option<&Subject>,
        local_dir: &Path,
        remote_dir: &str,
    ) -> Result<()> {
        subject.extra_info.last_backup_time = now_millis();
        let mut record = subject.to_restore_record(prior.map(|prior| prior.id));

        let mut snapshot = record.clone();
        snapshot.id = 0;
        let record_file = local_dir.join(subject.kind.record_name());
        fs::write(&record_file, serde_json::to_vec_pretty(&snapshot)?).await?;
        if !self.storage.is_local() {
            self.upload(0, &record_file, remote_dir).await?;
        }

        self.repository.upsert_subject(&mut record).await?;
        self.repository.upsert_subject(subject).await?;
        Ok(())
    }

    async fn drop_stage(&self, local_dir: &Path) {
        if self.storage.is_local() {
            return;
        }
        match fs::remove_dir_all(local_dir).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                warn!("failed to remove {}: {}", format_path(local_dir), Error::from(err));
            }
            _ => {}
        }
    }
}
