mod item;
mod post;
mod transfer;


use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use log::{debug, error, info, warn};
use tokio::{
    fs,
    sync::{Mutex, MutexGuard},
};

use crate::{
    config::Config,
    device::AmbientSettings,
    error::{Error, Result, StepError, StepResult},
    events::{Event, EventBus},
    layout::Layout,
    model::{
        now_millis, OpType, OperationState, Phase, ProcessingInfo, ProcessingKind, SubjectKind,
        Task, TaskDetail,
    },
    processor::{processor_for, SharedProcessor, Toolbox},
    repo::SharedRepository,
    shell::{CommandOutput, Shell},
    storage::SharedStorage,
};

/// Subdirectory of the scratch dir mirroring a remote tree.
const STAGE_DIR: &str = "stage";

/// Collaborators of one orchestrator handle.
#[derive(Debug, Clone)]
pub struct Services {
    pub storage: SharedStorage,
    /// Account name recorded on tasks and records, empty for local targets.
    pub cloud: String,
    pub repository: SharedRepository,
    pub shell: Arc<dyn Shell>,
    pub events: EventBus,
}

#[derive(Debug, Default)]
struct Run {
    initialized: bool,
    measured: bool,
    task: Task,
    details: Vec<TaskDetail>,
    infos: Vec<ProcessingInfo>,
    ambient: Option<AmbientSettings>,
}

impl Run {
    fn info_mut(&mut self, kind: ProcessingKind) -> Option<&mut ProcessingInfo> {
        self.infos.iter_mut().find(|info| info.kind == kind)
    }
}

/// Drives one backup or restore run through its three phases. Every public
/// entry point is single-flight: a call while another one is running on the
/// same handle fails with `Error::Busy`.
#[derive(Debug)]
pub struct Orchestrator {
    op_type: OpType,
    kind: SubjectKind,
    config: Arc<Config>,
    storage: SharedStorage,
    cloud: String,
    repository: SharedRepository,
    processor: SharedProcessor,
    toolbox: Toolbox,
    events: EventBus,
    target: Layout,
    stage: Layout,
    run: Mutex<Run>,
    task_id: AtomicU64,
    cancelled: AtomicBool,
}

impl Orchestrator {
    pub fn new(op_type: OpType, kind: SubjectKind, config: Config, services: Services) -> Self {
        let config = Arc::new(config);
        let toolbox = Toolbox::new(services.shell, config.clone());
        let target = Layout::new(config.backup_dir.clone());
        let stage = if services.storage.is_local() {
            target.clone()
        } else {
            Layout::new(config.scratch_dir.join(STAGE_DIR).to_string_lossy().into_owned())
        };
        Orchestrator {
            op_type,
            kind,
            processor: processor_for(kind, toolbox.clone()),
            toolbox,
            storage: services.storage,
            cloud: services.cloud,
            repository: services.repository,
            events: services.events,
            target,
            stage,
            config,
            run: Mutex::new(Run::default()),
            task_id: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Id of the task created by `initialize`, 0 before.
    pub fn task_id(&self) -> u64 {
        self.task_id.load(Ordering::Acquire)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Stops the item loop after the step in flight; post-processing still runs.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Run>> {
        self.run.try_lock().map_err(|_| Error::Busy)
    }

    fn lock_initialized(&self) -> Result<MutexGuard<'_, Run>> {
        let run = self.lock()?;
        if run.initialized {
            Ok(run)
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn processing_kinds(&self) -> Vec<(Phase, ProcessingKind)> {
        let mut kinds = vec![(Phase::Preprocessing, ProcessingKind::NecessaryPreparations)];
        if self.op_type == OpType::Restore {
            kinds.push((Phase::Preprocessing, ProcessingKind::SetUpInstallEnv));
        }
        if self.op_type == OpType::Backup && self.kind == SubjectKind::Package {
            kinds.push((Phase::PostProcessing, ProcessingKind::BackupItself));
            kinds.push((Phase::PostProcessing, ProcessingKind::SaveIcons));
        }
        kinds.push((
            Phase::PostProcessing,
            ProcessingKind::NecessaryRemainingDataProcessing,
        ));
        kinds
    }

    /// Admits the activated subjects into a new task. Calling it again is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let mut run = self.lock()?;
        if run.initialized {
            return Ok(());
        }

        let mut task = Task {
            op_type: self.op_type,
            subject_kind: self.kind,
            start_timestamp: now_millis(),
            is_processing: true,
            cloud: self.cloud.clone(),
            backup_dir: self.config.backup_dir.clone(),
            ..Task::default()
        };
        self.save_task(&mut task).await?;

        let subjects = self
            .repository
            .query_activated(self.op_type, self.kind)
            .await?;
        let mut details = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let mut detail = TaskDetail::new(task.id, subject);
            self.save_detail(&mut detail).await?;
            details.push(detail);
        }
        task.total_count = u32::try_from(details.len()).unwrap_or(u32::MAX);
        self.save_task(&mut task).await?;

        let mut infos = vec![];
        for (phase, kind) in self.processing_kinds() {
            let mut info = ProcessingInfo::new(task.id, phase, kind);
            self.save_info(&mut info).await?;
            infos.push(info);
        }

        info!(
            "{:?} task {} admitted {} items",
            self.op_type,
            task.id,
            details.len()
        );
        self.task_id.store(task.id, Ordering::Release);
        *run = Run {
            initialized: true,
            task,
            details,
            infos,
            ..Run::default()
        };
        Ok(())
    }

    /// Loads a stored task instead of admitting a new one, so `retry` can run
    /// in a later process.
    pub async fn resume(&self, task_id: u64) -> Result<()> {
        let mut run = self.lock()?;
        let task = self
            .repository
            .task(task_id)
            .await?
            .ok_or_else(|| Error::ItemNotFound(format!("task {task_id}")))?;
        let details = self.repository.details(task_id).await?;
        let infos = self.repository.processing_infos(task_id).await?;
        debug!("resumed task {task_id} with {} items", details.len());

        self.task_id.store(task_id, Ordering::Release);
        *run = Run {
            initialized: true,
            measured: true,
            task,
            details,
            infos,
            ambient: None,
        };
        Ok(())
    }

    pub async fn preprocessing(&self) -> Result<()> {
        let mut run = self.lock_initialized()?;

        self.start_info(&mut run, ProcessingKind::NecessaryPreparations)
            .await?;
        let outcome = self.prepare(&mut run).await;
        self.finish_info(&mut run, ProcessingKind::NecessaryPreparations, outcome)
            .await?;

        if self.op_type == OpType::Restore {
            self.start_info(&mut run, ProcessingKind::SetUpInstallEnv)
                .await?;
            let output = self.toolbox.device.set_up_install_env().await;
            self.finish_info(&mut run, ProcessingKind::SetUpInstallEnv, outcome_of(output))
                .await?;
        }
        Ok(())
    }

    async fn prepare(&self, run: &mut Run) -> StepResult {
        self.storage.connect().await?;
        let kind_dir = self.target.kind_dir(self.kind);
        self.storage.mkdir_recursively(&kind_dir).await?;
        if !self.storage.is_local() {
            fs::create_dir_all(self.stage.root())
                .await
                .map_err(Error::from)?;
        }
        if self.op_type == OpType::Backup && self.kind == SubjectKind::Package {
            run.ambient = Some(self.toolbox.device.capture_ambient().await);
        }
        Ok(format!("prepared {kind_dir}"))
    }

    pub async fn processing(&self) -> Result<()> {
        let mut run = self.lock_initialized()?;
        if !run.measured {
            self.measure_budget(&mut run).await?;
        }
        let pending = run
            .details
            .iter()
            .enumerate()
            .filter(|(_, detail)| !detail.state.is_terminal())
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        self.process_items(&mut run, &pending).await
    }

    /// Re-runs the items that ended in ERROR under the same task.
    pub async fn retry(&self) -> Result<()> {
        let mut run = self.lock_initialized()?;
        self.cancelled.store(false, Ordering::Release);

        let failed = run
            .details
            .iter()
            .enumerate()
            .filter(|(_, detail)| detail.state == OperationState::Error)
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        if failed.is_empty() {
            return Ok(());
        }

        info!("retrying {} items of task {}", failed.len(), run.task.id);
        for &index in &failed {
            run.details[index].reset();
            run.task.failure_count = run.task.failure_count.saturating_sub(1);
            self.save_detail(&mut run.details[index]).await?;
        }
        run.task.is_processing = true;
        self.save_task(&mut run.task).await?;

        self.storage.connect().await?;
        if !self.storage.is_local() {
            fs::create_dir_all(self.stage.root()).await?;
        }
        match self.op_type {
            OpType::Backup if self.kind == SubjectKind::Package => {
                run.ambient = Some(self.toolbox.device.capture_ambient().await);
            }
            OpType::Restore => {
                let output = self.toolbox.device.set_up_install_env().await;
                if !output.is_success() {
                    warn!("failed to set up the install environment: {}", output.out_string());
                }
            }
            OpType::Backup => {}
        }

        let processed = self.process_items(&mut run, &failed).await;
        self.restore_ambient(&mut run).await;
        self.clean_up().await;
        processed?;

        run.task.is_processing = false;
        run.task.end_timestamp = now_millis();
        self.save_task(&mut run.task).await
    }

    async fn measure_budget(&self, run: &mut Run) -> Result<()> {
        run.task.raw_bytes = run
            .details
            .iter()
            .flat_map(|detail| detail.subject.data_stats.values())
            .map(|stats| stats.bytes)
            .sum();
        let probe = if self.storage.is_local() {
            PathBuf::from(self.target.root())
        } else {
            self.config.scratch_dir.clone()
        };
        if let Some((available, total)) = self.toolbox.device.disk_space(&probe).await {
            run.task.available_bytes = available;
            run.task.total_bytes = total;
        }
        run.measured = true;
        self.save_task(&mut run.task).await
    }

    async fn process_items(&self, run: &mut Run, indices: &[usize]) -> Result<()> {
        for (position, &index) in indices.iter().enumerate() {
            if self.is_cancelled() {
                info!("cancelled with {} items left", indices.len() - position);
                break;
            }

            let mut detail = run.details[index].clone();
            detail.state = OperationState::Processing;
            self.save_detail(&mut detail).await?;

            let handled = match self.op_type {
                OpType::Backup => self.backup_item(&mut detail).await,
                OpType::Restore => self.restore_item(&mut detail).await,
            };
            if let Err(err) = handled {
                error!("{} failed: {err}", detail.subject.name);
                detail.fail_remaining(&err.to_string());
                detail.state = OperationState::Error;
            }

            if detail.state == OperationState::Done {
                run.task.success_count += 1;
            } else {
                run.task.failure_count += 1;
            }
            debug!("{} finished as {:?}", detail.subject.name, detail.state);
            self.save_detail(&mut detail).await?;
            run.details[index] = detail;
            self.save_task(&mut run.task).await?;
        }
        Ok(())
    }

    async fn save_task(&self, task: &mut Task) -> Result<()> {
        self.repository.upsert_task(task).await?;
        self.events.publish(Event::TaskUpdated(task.clone()));
        Ok(())
    }

    async fn save_detail(&self, detail: &mut TaskDetail) -> Result<()> {
        self.repository.upsert_detail(detail).await?;
        self.events.publish(Event::DetailUpdated(detail.clone()));
        Ok(())
    }

    async fn save_info(&self, info: &mut ProcessingInfo) -> Result<()> {
        self.repository.upsert_processing_info(info).await?;
        self.events
            .publish(Event::ProcessingInfoUpdated(info.clone()));
        Ok(())
    }

    async fn start_info(&self, run: &mut Run, kind: ProcessingKind) -> Result<()> {
        if let Some(info) = run.info_mut(kind) {
            info.state = OperationState::Processing;
            self.save_info(info).await?;
        }
        Ok(())
    }

    async fn finish_info(&self, run: &mut Run, kind: ProcessingKind, outcome: StepResult) -> Result<()> {
        let Some(info) = run.info_mut(kind) else {
            return Ok(());
        };
        match outcome {
            Ok(log) => info.finish(OperationState::Done, log),
            Err(err) => info.finish(err.state(), err.to_string()),
        }
        self.save_info(info).await
    }
}

fn outcome_of(output: CommandOutput) -> StepResult {
    if output.is_success() {
        Ok(output.out_string())
    } else {
        Err(StepError::command(&output))
    }
}
