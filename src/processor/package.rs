use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::fs;

use crate::{
    error::{StepError, StepResult},
    format::format_path,
    model::{DataType, SubjectKind},
    shell::CommandOutput,
};

use super::{
    exclusions, not_selected, restore_exclusions, BackupStep, DataTypeProcessor, RestoreStep,
    Source, Toolbox,
};

const APK_GLOB: &str = "./*.apk";
const APK_SUFFIX: &str = ".apk";

/// Installed applications: the APK and five private data trees.
#[derive(Debug, Clone)]
pub struct PackageProcessor {
    toolbox: Toolbox,
}

impl PackageProcessor {
    pub fn new(toolbox: Toolbox) -> Self {
        PackageProcessor { toolbox }
    }

    async fn backup_apk(&self, mut step: BackupStep<'_>) -> StepResult {
        let subject = &*step.subject;
        let sources = self
            .toolbox
            .device
            .package_source_paths(&subject.name, subject.user_id)
            .await;
        let Some(src_dir) = sources
            .first()
            .and_then(|path| Path::new(path).parent())
            .map(Path::to_owned)
        else {
            return Err(StepError::NotFoundOptional(format!(
                "no installed package {}",
                subject.name
            )));
        };

        let source = Source {
            dir: &src_dir,
            entry: APK_GLOB,
            pipe: true,
            exclusions: &[],
            measured: Some(&src_dir),
        };
        self.toolbox.archive(DataType::Apk, &mut step, source).await
    }

    async fn backup_data(&self, data_type: DataType, mut step: BackupStep<'_>) -> StepResult {
        let name = step.subject.name.clone();
        let Some(type_dir) = self
            .toolbox
            .paths
            .type_dir(data_type, step.subject.user_id)
        else {
            return Err(StepError::NotFoundOptional(data_type.to_string()));
        };

        let origin = type_dir.join(&name);
        if !fs::try_exists(&origin).await.unwrap_or(false) {
            let message = format_path(&origin);
            return Err(if data_type == SubjectKind::Package.mandatory() {
                StepError::NotFoundRequired(message)
            } else {
                StepError::NotFoundOptional(message)
            });
        }

        let exclusions = exclusions(&name, data_type);
        let source = Source {
            dir: &type_dir,
            entry: &name,
            pipe: self.toolbox.config.use_pipe,
            exclusions: &exclusions,
            measured: None,
        };
        self.toolbox.archive(data_type, &mut step, source).await
    }

    async fn restore_apk(&self, step: RestoreStep<'_>) -> StepResult {
        let name = &step.subject.name;
        let device = &self.toolbox.device;
        // Without an archive the data of a missing package has nowhere to go,
        // so that case fails the item instead of skipping.
        if self.toolbox.archive_of(DataType::Apk, &step).is_none() {
            return if device.is_installed(name, step.user_id).await {
                Err(StepError::Skipped("no apk archive, already installed".to_owned()))
            } else {
                Err(StepError::VerificationFailure(format!(
                    "no apk archive and {name} is not installed"
                )))
            };
        }

        let scratch = self.toolbox.config.scratch_dir.join("apk").join(name);
        if fs::try_exists(&scratch).await.unwrap_or(false) {
            fs::remove_dir_all(&scratch).await.map_err(io_failure)?;
        }
        fs::create_dir_all(&scratch).await.map_err(io_failure)?;

        let result = self.install_from(&step, &scratch).await;
        if let Err(err) = fs::remove_dir_all(&scratch).await {
            warn!("failed to remove {}: {err}", format_path(&scratch));
        }
        let log = result?;

        if !device.is_installed(name, step.user_id).await {
            return Err(StepError::VerificationFailure(format!(
                "{name} is not installed after installation\n{log}"
            )));
        }
        Ok(log)
    }

    async fn install_from(&self, step: &RestoreStep<'_>, scratch: &Path) -> StepResult {
        let extracted = self
            .toolbox
            .extract(DataType::Apk, step, scratch, &[])
            .await?;
        let apks = list_apks(scratch).await?;
        let device = &self.toolbox.device;
        let output = match apks.as_slice() {
            [] => return Err(StepError::CommandFailure("archive empty".to_owned())),
            [apk] => device.install(apk, step.user_id).await,
            splits => self.install_session(splits, step.user_id).await?,
        };
        if !output.is_success() {
            return Err(StepError::command(&output));
        }
        Ok(format!("{extracted}\n{}", output.out_string()).trim().to_owned())
    }

    /// Writes every split into one session; commits only when all writes went through.
    async fn install_session(&self, splits: &[PathBuf], user_id: u32) -> Result<CommandOutput, StepError> {
        let device = &self.toolbox.device;
        let session = device.install_create(user_id).await?;
        debug!("install session {session} for {} splits", splits.len());

        let mut output = CommandOutput::ok();
        for split in splits {
            let name = split
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let written = device.install_write(session, &name, split).await;
            if !written.is_success() {
                let abandoned = device.install_abandon(session).await;
                return Err(StepError::command(&output.and(written).and(abandoned)));
            }
            output = output.and(written);
        }
        Ok(output.and(device.install_commit(session).await))
    }

    async fn restore_data(&self, data_type: DataType, step: RestoreStep<'_>) -> StepResult {
        let name = &step.subject.name;
        if self.toolbox.archive_of(data_type, &step).is_none() {
            return Err(StepError::NotFoundOptional(format!(
                "no {data_type} archive"
            )));
        }
        let Some(type_dir) = self.toolbox.paths.type_dir(data_type, step.user_id) else {
            return Err(StepError::NotFoundOptional(data_type.to_string()));
        };
        let origin = type_dir.join(name);
        let device = &self.toolbox.device;

        let label = self.toolbox.resolve_label(&origin).await.ok_or_else(|| {
            StepError::CommandFailure(format!(
                "failed to read the security context of {}",
                format_path(&origin)
            ))
        })?;
        let Some(uid) = device.package_uid(name, step.user_id).await else {
            return Err(StepError::VerificationFailure(format!(
                "{name} has no uid for user {}",
                step.user_id
            )));
        };
        let gid = if data_type.is_external() {
            device.gid_of(&type_dir).await.unwrap_or(uid)
        } else {
            uid
        };

        let exclusions = restore_exclusions(name, data_type);
        let log = self
            .toolbox
            .extract(data_type, &step, &type_dir, &exclusions)
            .await?;

        let labelled = device
            .chown(&origin, uid, gid)
            .await
            .and(device.chcon(&origin, &label).await);
        if !labelled.is_success() {
            return Err(StepError::command(&labelled));
        }
        info!("restored {data_type} of {name} as {uid}:{gid} {label}");
        Ok(log)
    }
}

fn io_failure(err: std::io::Error) -> StepError {
    StepError::CommandFailure(err.to_string())
}

async fn list_apks(dir: &Path) -> Result<Vec<PathBuf>, StepError> {
    let mut apks = vec![];
    let mut entries = fs::read_dir(dir).await.map_err(io_failure)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_failure)? {
        let path = entry.path();
        let is_apk = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(APK_SUFFIX));
        if is_apk && path.is_file() {
            apks.push(path);
        }
    }
    apks.sort();
    Ok(apks)
}

#[async_trait]
impl DataTypeProcessor for PackageProcessor {
    fn kind(&self) -> SubjectKind {
        SubjectKind::Package
    }

    async fn backup(&self, data_type: DataType, step: BackupStep<'_>) -> StepResult {
        if !step.subject.is_selected(data_type) {
            return Err(not_selected());
        }
        match data_type {
            DataType::Apk => self.backup_apk(step).await,
            DataType::Media => Err(StepError::Skipped(data_type.to_string())),
            _ => self.backup_data(data_type, step).await,
        }
    }

    async fn restore(&self, data_type: DataType, step: RestoreStep<'_>) -> StepResult {
        if !step.subject.is_selected(data_type) {
            return Err(not_selected());
        }
        match data_type {
            DataType::Apk => self.restore_apk(step).await,
            DataType::Media => Err(StepError::Skipped(data_type.to_string())),
            _ => self.restore_data(data_type, step).await,
        }
    }
}
