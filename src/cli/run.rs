use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use clap::builder::styling::AnsiColor;
use humantime::format_duration;
use log::{debug, info, warn};
use tokio::{signal, sync::broadcast::error::RecvError, task::JoinHandle};

use crate::{
    config::Config,
    error::{Error, Result},
    events::{Event, EventBus},
    format::{format_path, format_size},
    model::{OpType, OperationState, SubjectKind, TaskDetail},
    orchestrator::{Orchestrator, Services},
    repo::{MemoryRepository, Repository},
    shell::SystemShell,
    storage::{create_storage, SharedStorage, StorageUrl},
};

use super::{
    args::{BackupArgs, GlobalArgs, RestoreArgs, RetryArgs},
    print_stat,
};

/// Everything a run needs besides the orchestrator itself.
struct Session {
    config: Config,
    storage: SharedStorage,
    cloud: String,
    repository: Arc<MemoryRepository>,
}

impl Session {
    async fn open(global: &GlobalArgs, mut config: Config) -> Result<Self> {
        let (storage, cloud) = match &global.storage {
            Some(url) => {
                config.backup_dir = url.root();
                (create_storage(url).await?, url.cloud().to_owned())
            }
            None => {
                let local = StorageUrl::Local(config.backup_dir.clone().into());
                (create_storage(&local).await?, String::new())
            }
        };
        let repository = Arc::new(MemoryRepository::load(&global.repository).await?);
        debug!(
            "using {} via {} with repository {}",
            config.backup_dir,
            storage.protocol(),
            format_path(&global.repository)
        );
        Ok(Session {
            config,
            storage,
            cloud,
            repository,
        })
    }

    fn orchestrator(&self, op_type: OpType, kind: SubjectKind) -> Arc<Orchestrator> {
        let services = Services {
            storage: self.storage.clone(),
            cloud: self.cloud.clone(),
            repository: self.repository.clone(),
            shell: Arc::new(SystemShell::new()),
            events: EventBus::new(),
        };
        Arc::new(Orchestrator::new(
            op_type,
            kind,
            self.config.clone(),
            services,
        ))
    }

    async fn finish(self, global: &GlobalArgs, task_id: u64, started: Instant) -> Result<()> {
        self.repository.flush(&global.repository).await?;
        let task = self
            .repository
            .task(task_id)
            .await?
            .ok_or_else(|| Error::ItemNotFound(format!("task {task_id}")))?;

        let style = if task.failure_count == 0 {
            AnsiColor::Green.on_default()
        } else {
            AnsiColor::Yellow.on_default()
        };
        info!(
            "{style}task {task_id}{style:#}: {} succeeded, {} failed of {}",
            task.success_count, task.failure_count, task.total_count
        );

        if global.stats {
            let stats = self.storage.stats();
            print_stat("uploaded", format_size(stats.bytes_uploaded()));
            print_stat("downloaded", format_size(stats.bytes_downloaded()));
            print_stat("requests", stats.requests());
            print_stat("failed requests", stats.failed_requests());
            print_stat("raw data", format_size(task.raw_bytes));
            print_stat("available space", format_size(task.available_bytes));
            print_stat("elapsed time", format_duration(rounded(started.elapsed())));
        }
        Ok(())
    }
}

fn rounded(elapsed: Duration) -> Duration {
    Duration::from_millis(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

pub async fn backup(args: BackupArgs) -> Result<()> {
    let mut config = Config::load_or_default(args.global.config.as_deref()).await?;
    if let Some(compression) = args.compression {
        config.compression_type = compression;
    }
    if let Some(level) = args.compression_level {
        config.compression_level = level;
    }
    if let Some(strategy) = args.strategy {
        config.backup_strategy = strategy.into();
    }
    execute(OpType::Backup, args.kind.into(), config, &args.global).await
}

pub async fn restore(args: RestoreArgs) -> Result<()> {
    let mut config = Config::load_or_default(args.global.config.as_deref()).await?;
    if args.user.is_some() {
        config.restore_user = args.user;
    }
    execute(OpType::Restore, args.kind.into(), config, &args.global).await
}

pub async fn retry(args: RetryArgs) -> Result<()> {
    let started = Instant::now();
    let config = Config::load_or_default(args.global.config.as_deref()).await?;
    let session = Session::open(&args.global, config).await?;
    let task = session
        .repository
        .task(args.task)
        .await?
        .ok_or_else(|| Error::ItemNotFound(format!("task {}", args.task)))?;

    let orchestrator = session.orchestrator(task.op_type, task.subject_kind);
    let printer = print_events(orchestrator.events());
    let interrupt = cancel_on_interrupt(orchestrator.clone());
    orchestrator.resume(args.task).await?;
    let result = orchestrator.retry().await;
    interrupt.abort();
    printer.abort();
    result?;

    session.finish(&args.global, args.task, started).await
}

async fn execute(op_type: OpType, kind: SubjectKind, config: Config, global: &GlobalArgs) -> Result<()> {
    let started = Instant::now();
    let session = Session::open(global, config).await?;
    let orchestrator = session.orchestrator(op_type, kind);
    let printer = print_events(orchestrator.events());
    let interrupt = cancel_on_interrupt(orchestrator.clone());

    let result = run_phases(&orchestrator).await;
    interrupt.abort();
    printer.abort();
    let task_id = orchestrator.task_id();
    if let Err(err) = result {
        session.repository.flush(&global.repository).await?;
        return Err(err);
    }
    session.finish(global, task_id, started).await
}

async fn run_phases(orchestrator: &Orchestrator) -> Result<()> {
    orchestrator.initialize().await?;
    orchestrator.preprocessing().await?;
    let processed = orchestrator.processing().await;
    orchestrator.post_processing().await?;
    processed
}

fn cancel_on_interrupt(orchestrator: Arc<Orchestrator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current step");
            orchestrator.cancel();
        }
    })
}

fn print_events(events: &EventBus) -> JoinHandle<()> {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(Event::DetailUpdated(detail)) if detail.state.is_terminal() => {
                    print_detail(&detail);
                }
                Ok(Event::TransferProgress {
                    path, percent, ..
                }) => debug!("{path}: {percent}%"),
                Ok(Event::ProcessingInfoUpdated(info)) if info.state.is_terminal() => {
                    debug!("{}: {:?} {}", info.title, info.state, info.log);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_detail(detail: &TaskDetail) {
    let style = match detail.state {
        OperationState::Done => AnsiColor::Green.on_default(),
        OperationState::Error => AnsiColor::Red.on_default(),
        _ => AnsiColor::Yellow.on_default(),
    };
    info!(
        "{style}{:?}{style:#} {}",
        detail.state,
        detail.subject.relative_dir()
    );
    for info in detail.infos.values() {
        if info.state == OperationState::Error {
            warn!("{} of {}: {}", info.title, detail.subject.name, info.log);
        }
    }
}
