use clap::builder::styling::AnsiColor;
use log::info;

use crate::{
    error::{Error, Result},
    format::{format_millis, format_size},
    model::{OpType, OperationState, Subject},
    repo::{MemoryRepository, Repository},
};

use super::args::ListArgs;

pub async fn main(args: ListArgs) -> Result<()> {
    let repository = MemoryRepository::load(&args.global.repository).await?;
    match args.task {
        Some(task_id) => list_task(&repository, task_id).await,
        None => list_subjects(&repository).await,
    }
}

async fn list_subjects(repository: &MemoryRepository) -> Result<()> {
    let mut subjects = repository.subjects().await?;
    subjects.sort_by(|a, b| a.key().cmp(&b.key()));
    for subject in &subjects {
        info!("{}", subject_line(subject));
    }
    Ok(())
}

fn subject_line(subject: &Subject) -> String {
    let (op_style, op) = match subject.index_info.op_type {
        OpType::Backup => (AnsiColor::Blue.on_default(), "backup "),
        OpType::Restore => (AnsiColor::Magenta.on_default(), "restore"),
    };
    let marker = if subject.extra_info.activated { "*" } else { " " };
    let bytes = subject
        .data_stats
        .values()
        .map(|stats| stats.bytes)
        .sum::<u64>();
    let when = format_millis(subject.index_info.timestamp);
    format!(
        "{marker} {op_style}{op}{op_style:#} {} {when} {}",
        subject.relative_dir(),
        format_size(bytes)
    )
}

async fn list_task(repository: &MemoryRepository, task_id: u64) -> Result<()> {
    let Some(task) = repository.task(task_id).await? else {
        return Err(Error::ItemNotFound(format!("task {task_id}")));
    };
    info!(
        "{:?} of {:?} items: {} succeeded, {} failed of {}",
        task.op_type, task.subject_kind, task.success_count, task.failure_count, task.total_count
    );
    for info in repository.processing_infos(task_id).await? {
        info!("  {} {:?} {}", info.title, info.state, info.log);
    }
    for detail in repository.details(task_id).await? {
        let style = match detail.state {
            OperationState::Done => AnsiColor::Green.on_default(),
            OperationState::Error => AnsiColor::Red.on_default(),
            _ => AnsiColor::Yellow.on_default(),
        };
        info!("{style}{:?}{style:#} {}", detail.state, detail.subject.relative_dir());
        for item in detail.infos.values() {
            info!("    {} {:?} {}", item.title, item.state, item.log.trim());
        }
    }
    Ok(())
}
