use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use log::{info, warn};
use tokio::fs;

use crate::{
    archive::CompressArgs,
    error::{Error, Result, StepError, StepResult},
    format::format_path,
    layout::{file_name, parent},
    model::{now_millis, OpType, OperationState, ProcessingKind, SubjectKind},
};

use super::{Orchestrator, Run};

impl Orchestrator {
    /// Always safe to call after `initialize`, also after a cancelled run.
    pub async fn post_processing(&self) -> Result<()> {
        let mut run = self.lock_initialized()?;

        self.restore_ambient(&mut run).await;

        if self.op_type == OpType::Backup && self.kind == SubjectKind::Package {
            self.start_info(&mut run, ProcessingKind::BackupItself).await?;
            let outcome = self.backup_itself().await;
            self.finish_info(&mut run, ProcessingKind::BackupItself, outcome)
                .await?;

            self.start_info(&mut run, ProcessingKind::SaveIcons).await?;
            let outcome = self.save_icons().await;
            self.finish_info(&mut run, ProcessingKind::SaveIcons, outcome)
                .await?;
        }

        self.start_info(&mut run, ProcessingKind::NecessaryRemainingDataProcessing)
            .await?;
        let outcome = self.clear_activated(&run).await;
        self.clean_up().await;
        self.finish_info(
            &mut run,
            ProcessingKind::NecessaryRemainingDataProcessing,
            outcome,
        )
        .await?;

        run.task.end_timestamp = now_millis();
        run.task.is_processing = false;
        self.save_task(&mut run.task).await?;
        self.log_summary(&run);
        Ok(())
    }

    async fn backup_itself(&self) -> StepResult {
        if !self.config.backup_itself {
            return Err(StepError::Skipped("disabled".to_owned()));
        }
        let package = &self.config.self_package;
        let Some(apk) = self
            .toolbox
            .device
            .package_source_paths(package, 0)
            .await
            .into_iter()
            .next()
        else {
            return Err(StepError::NotFoundOptional(package.clone()));
        };

        let staged = self.stage.self_apk_path();
        fs::create_dir_all(self.stage.root())
            .await
            .map_err(Error::from)?;
        fs::copy(&apk, &staged).await.map_err(Error::from)?;
        if !self.storage.is_local() {
            self.upload(0, Path::new(&staged), self.target.root()).await?;
        }
        Ok(format!("copied {apk}"))
    }

    async fn save_icons(&self) -> StepResult {
        let Some(icon_dir) = self.config.icon_dir.as_deref() else {
            return Err(StepError::Skipped("no icon cache".to_owned()));
        };
        if !fs::try_exists(icon_dir).await.unwrap_or(false) {
            return Err(StepError::NotFoundOptional(format_path(icon_dir)));
        }
        let (Some(src_dir), Some(src)) = (
            icon_dir.parent(),
            icon_dir.file_name().and_then(|name| name.to_str()),
        ) else {
            return Err(StepError::NotFoundOptional(format_path(icon_dir)));
        };

        let staged = PathBuf::from(self.stage.icon_archive_path());
        fs::create_dir_all(parent(&self.stage.icon_archive_path()))
            .await
            .map_err(Error::from)?;
        let codec = &self.toolbox.codec;
        let output = codec
            .compress(&CompressArgs {
                pipe: false,
                exclusions: &[],
                follow_symlinks: false,
                src_dir,
                src,
                dst: &staged,
                program: None,
            })
            .await;
        if !output.is_success() {
            return Err(StepError::command(&output));
        }
        let test = codec.test(&staged, None).await;
        if !test.is_success() {
            return Err(StepError::command(&test));
        }

        if !self.storage.is_local() {
            let configs_dir = self.target.configs_dir();
            self.storage.mkdir_recursively(&configs_dir).await?;
            self.upload(0, &staged, &configs_dir).await?;
        }
        Ok(format!("saved {}", file_name(&self.target.icon_archive_path())))
    }

    /// Items of a run without failures leave the activated list.
    async fn clear_activated(&self, run: &Run) -> StepResult {
        let reset = match self.op_type {
            OpType::Backup => self.config.reset_backup_list,
            OpType::Restore => self.config.reset_restore_list,
        };
        if !reset || run.task.failure_count > 0 {
            return Ok(String::new());
        }
        let ids = run
            .details
            .iter()
            .filter(|detail| detail.state == OperationState::Done)
            .map(|detail| detail.subject.id)
            .collect::<Vec<_>>();
        self.repository.clear_activated(&ids).await?;
        Ok(format!("cleared {} items", ids.len()))
    }

    /// Drops the remote stage and closes the session; failures are only logged.
    /// Puts back the input settings captured before the items were stopped.
    pub(super) async fn restore_ambient(&self, run: &mut Run) {
        if let Some(ambient) = run.ambient.take() {
            let output = self.toolbox.device.restore_ambient(&ambient).await;
            if !output.is_success() {
                warn!("failed to restore input settings: {}", output.out_string());
            }
        }
    }

    pub(super) async fn clean_up(&self) {
        if !self.storage.is_local() {
            let root = Path::new(self.stage.root());
            match fs::remove_dir_all(root).await {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                    warn!("failed to remove {}: {err}", format_path(root));
                }
                _ => {}
            }
        }
        if let Err(err) = self.storage.disconnect().await {
            warn!("failed to disconnect: {err}");
        }
    }

    fn log_summary(&self, run: &Run) {
        let task = &run.task;
        let elapsed = u64::try_from(task.end_timestamp - task.start_timestamp).unwrap_or(0);
        info!(
            "{:?} task {} finished in {}: {} succeeded, {} failed",
            self.op_type,
            task.id,
            humantime::format_duration(Duration::from_millis(elapsed)),
            task.success_count,
            task.failure_count
        );
    }
}
