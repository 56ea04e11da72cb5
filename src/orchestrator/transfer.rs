use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::debug;
use tokio::time::{interval, MissedTickBehavior};

use crate::{
    error::Result,
    events::{Event, EventBus},
    format::format_path,
    storage::Progress,
};

use super::Orchestrator;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Publishes the percentage of one transfer until dropped.
struct ProgressPoller {
    stopped: Arc<AtomicBool>,
}

impl ProgressPoller {
    fn spawn(events: EventBus, detail_id: u64, path: String, progress: Arc<Progress>) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        tokio::spawn(async move {
            let mut ticks = interval(PROGRESS_INTERVAL);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last = None;
            loop {
                ticks.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                let percent = progress.percent();
                if last != Some(percent) {
                    last = Some(percent);
                    events.publish(Event::TransferProgress {
                        detail_id,
                        path: path.clone(),
                        percent,
                    });
                }
            }
        });
        ProgressPoller { stopped }
    }
}

impl Drop for ProgressPoller {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl Orchestrator {
    pub(super) async fn upload(&self, detail_id: u64, src: &Path, dst_dir: &str) -> Result<()> {
        debug!("uploading {} to {dst_dir}", format_path(src));
        let progress = Arc::new(Progress::new());
        let _poller = ProgressPoller::spawn(
            self.events.clone(),
            detail_id,
            src.to_string_lossy().into_owned(),
            progress.clone(),
        );
        self.storage.upload(src, dst_dir, progress).await
    }

    pub(super) async fn download(&self, detail_id: u64, src: &str, dst_dir: &Path) -> Result<()> {
        debug!("downloading {src} to {}", format_path(dst_dir));
        let progress = Arc::new(Progress::new());
        let _poller = ProgressPoller::spawn(
            self.events.clone(),
            detail_id,
            src.to_owned(),
            progress.clone(),
        );
        self.storage.download(src, dst_dir, progress).await
    }
}
