use std::path::Path;

use async_trait::async_trait;
use tokio::fs;

use crate::{
    error::{StepError, StepResult},
    format::format_path,
    model::{DataType, SubjectKind},
};

use super::{not_selected, BackupStep, DataTypeProcessor, RestoreStep, Source, Toolbox};

/// Arbitrary directories, archived as a whole under their own name.
#[derive(Debug, Clone)]
pub struct MediaProcessor {
    toolbox: Toolbox,
}

impl MediaProcessor {
    pub fn new(toolbox: Toolbox) -> Self {
        MediaProcessor { toolbox }
    }
}

fn split(path: &str) -> Option<(&Path, &str)> {
    let path = Path::new(path);
    let parent = path.parent()?;
    let name = path.file_name()?.to_str()?;
    Some((parent, name))
}

#[async_trait]
impl DataTypeProcessor for MediaProcessor {
    fn kind(&self) -> SubjectKind {
        SubjectKind::Media
    }

    async fn backup(&self, data_type: DataType, mut step: BackupStep<'_>) -> StepResult {
        if data_type != DataType::Media {
            return Err(StepError::Skipped(data_type.to_string()));
        }
        if !step.subject.is_selected(data_type) {
            return Err(not_selected());
        }

        let path = step.subject.path.clone();
        let exists = fs::try_exists(&path).await.unwrap_or(false);
        let Some((dir, entry)) = split(&path).filter(|_| exists) else {
            return Err(StepError::NotFoundRequired(path));
        };
        let source = Source {
            dir,
            entry,
            pipe: self.toolbox.config.use_pipe,
            exclusions: &[],
            measured: None,
        };
        self.toolbox.archive(data_type, &mut step, source).await
    }

    async fn restore(&self, data_type: DataType, step: RestoreStep<'_>) -> StepResult {
        if data_type != DataType::Media {
            return Err(StepError::Skipped(data_type.to_string()));
        }
        if !step.subject.is_selected(data_type) {
            return Err(not_selected());
        }
        if self.toolbox.archive_of(data_type, &step).is_none() {
            return Err(StepError::NotFoundOptional("no media archive".to_owned()));
        }

        let Some((dir, _)) = split(&step.subject.path) else {
            return Err(StepError::CommandFailure(format!(
                "media path `{}` has no parent",
                step.subject.path
            )));
        };
        fs::create_dir_all(dir).await.map_err(|err| {
            StepError::CommandFailure(format!("{}: {err}", format_path(dir)))
        })?;
        self.toolbox.extract(data_type, &step, dir, &[]).await
    }
}
