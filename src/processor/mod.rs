mod media;
mod package;

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeSet,
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::task::spawn_blocking;

use crate::{
    archive::{ArchiveCodec, CompressArgs, DecompressArgs},
    config::Config,
    device::{derive_child_label, Device},
    error::{StepError, StepResult},
    format::format_path,
    layout::{archive_file_name, DataPaths},
    model::{now_millis, DataStats, DataType, Subject, SubjectKind},
    shell::{quote, Shell},
    storage::local_size,
};

pub use {media::MediaProcessor, package::PackageProcessor};

/// Folders of a package's private data never worth archiving.
const CACHE_FOLDERS: [&str; 5] = [".ota", "cache", "lib", "code_cache", "no_backup"];
const BACKUP_LEFTOVERS: &str = "Backup_";

/// Inputs of one backup step.
#[derive(Debug)]
pub struct BackupStep<'a> {
    pub subject: &'a mut Subject,
    /// RESTORE-kind record of the previous backup at the same location.
    pub prior: Option<&'a Subject>,
    /// Local directory the archive is written into.
    pub dst_dir: &'a Path,
    /// Archive file names already present at the real destination.
    pub existing: &'a BTreeSet<String>,
}

/// Inputs of one restore step.
#[derive(Debug)]
pub struct RestoreStep<'a> {
    pub subject: &'a Subject,
    /// Local directory holding the archives.
    pub src_dir: &'a Path,
    /// User the data is restored into.
    pub user_id: u32,
}

/// Per data type backup and restore of one subject kind.
#[async_trait]
pub trait DataTypeProcessor: Debug + Send + Sync {
    fn kind(&self) -> SubjectKind;

    async fn backup(&self, data_type: DataType, step: BackupStep<'_>) -> StepResult;

    async fn restore(&self, data_type: DataType, step: RestoreStep<'_>) -> StepResult;
}

pub type SharedProcessor = Arc<dyn DataTypeProcessor>;

pub fn processor_for(kind: SubjectKind, toolbox: Toolbox) -> SharedProcessor {
    match kind {
        SubjectKind::Package => Arc::new(PackageProcessor::new(toolbox)),
        SubjectKind::Media => Arc::new(MediaProcessor::new(toolbox)),
    }
}

/// What the processors reach the device through.
#[derive(Debug, Clone)]
pub struct Toolbox {
    pub device: Device,
    pub codec: ArchiveCodec,
    pub paths: DataPaths,
    pub config: Arc<Config>,
}

impl Toolbox {
    pub fn new(shell: Arc<dyn Shell>, config: Arc<Config>) -> Self {
        Toolbox {
            device: Device::new(shell.clone(), config.installer.clone()),
            codec: ArchiveCodec::new(shell),
            paths: DataPaths::new(&config.data_root),
            config,
        }
    }

    /// Compresses `source` into the step's destination and records its size.
    pub(crate) async fn archive(
        &self,
        data_type: DataType,
        step: &mut BackupStep<'_>,
        source: Source<'_>,
    ) -> StepResult {
        let compression_type = step.subject.index_info.compression_type;
        let name = archive_file_name(data_type, compression_type);
        let size = measure(source.origin()).await;

        let recorded = step.prior.and_then(|prior| prior.recorded_bytes(data_type));
        if step.existing.contains(&name) && recorded == Some(size) {
            return Err(StepError::Skipped("data has not changed".to_owned()));
        }

        let dst = step.dst_dir.join(&name);
        let program = compression_type.compress_program(self.config.compression_level);
        let output = self
            .codec
            .compress(&CompressArgs {
                pipe: source.pipe,
                exclusions: source.exclusions,
                follow_symlinks: self.config.follow_symlinks,
                src_dir: source.dir,
                src: source.entry,
                dst: &dst,
                program: program.as_deref(),
            })
            .await;
        if !output.is_success() {
            return Err(StepError::command(&output));
        }

        if self.config.check_archive {
            let test = self
                .codec
                .test(&dst, compression_type.decompress_program())
                .await;
            if !test.is_success() {
                return Err(StepError::command(&test));
            }
        }

        step.subject.data_stats.insert(
            data_type,
            DataStats {
                bytes: size,
                timestamp: now_millis(),
            },
        );
        debug!("archived {} into {}", format_path(&source.origin()), format_path(&dst));
        Ok(output.out_string())
    }

    pub(crate) async fn extract(
        &self,
        data_type: DataType,
        step: &RestoreStep<'_>,
        dst: &Path,
        exclusions: &[String],
    ) -> StepResult {
        let compression_type = step.subject.index_info.compression_type;
        let src = step
            .src_dir
            .join(archive_file_name(data_type, compression_type));
        let output = self
            .codec
            .decompress(&DecompressArgs {
                exclusions,
                clear: self.config.clean_restoring,
                touch: false,
                src: &src,
                dst,
                program: compression_type.decompress_program(),
            })
            .await;
        if output.is_success() {
            Ok(output.out_string())
        } else {
            Err(StepError::command(&output))
        }
    }

    /// The archive `step` would read for `data_type`, if it exists.
    pub(crate) fn archive_of(&self, data_type: DataType, step: &RestoreStep<'_>) -> Option<PathBuf> {
        let path = step.src_dir.join(archive_file_name(
            data_type,
            step.subject.index_info.compression_type,
        ));
        path.exists().then_some(path)
    }

    /// Label of `path`, or the one its parent hands down to new children.
    pub(crate) async fn resolve_label(&self, path: &Path) -> Option<String> {
        if let Some(label) = self.device.security_context(path).await {
            return Some(label);
        }
        let parent = path.parent()?;
        let label = self.device.security_context(parent).await?;
        Some(derive_child_label(&label))
    }
}

/// Origin of an archive.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Source<'a> {
    pub dir: &'a Path,
    pub entry: &'a str,
    pub pipe: bool,
    pub exclusions: &'a [String],
    /// What gets measured, when it differs from `dir/entry`.
    pub measured: Option<&'a Path>,
}

impl Source<'_> {
    fn origin(&self) -> PathBuf {
        match self.measured {
            Some(path) => path.to_owned(),
            None => self.dir.join(self.entry),
        }
    }
}

/// Apparent size of a local tree; unreadable trees measure zero.
pub async fn measure(path: PathBuf) -> u64 {
    let shown = format_path(&path);
    match spawn_blocking(move || local_size(&path)).await {
        Ok(Ok(size)) => size,
        Ok(Err(err)) => {
            warn!("failed to measure {shown}: {err}");
            0
        }
        Err(err) => {
            warn!("failed to measure {shown}: {err}");
            0
        }
    }
}

/// `--exclude` patterns for a package's tree, relative to its type directory.
pub fn exclusions(package: &str, data_type: DataType) -> Vec<String> {
    let mut patterns = match data_type {
        DataType::User | DataType::UserDe => CACHE_FOLDERS
            .iter()
            .map(|folder| quote(format!("{package}/{folder}")))
            .collect(),
        DataType::Data | DataType::Obb | DataType::AppMedia => {
            vec![quote(format!("{package}/cache"))]
        }
        DataType::Apk | DataType::Media => vec![],
    };
    if data_type.is_external() && data_type != DataType::Media {
        patterns.push(format!("{}*", quote(BACKUP_LEFTOVERS)));
    }
    patterns
}

/// Restoring skips every cache folder, whatever the archive holds.
pub fn restore_exclusions(package: &str, data_type: DataType) -> Vec<String> {
    let mut patterns = CACHE_FOLDERS
        .iter()
        .map(|folder| quote(format!("{package}/{folder}")))
        .collect::<Vec<_>>();
    if data_type.is_external() && data_type != DataType::Media {
        patterns.push(format!("{}*", quote(BACKUP_LEFTOVERS)));
    }
    patterns
}

pub fn not_selected() -> StepError {
    StepError::Skipped("not selected".to_owned())
}
