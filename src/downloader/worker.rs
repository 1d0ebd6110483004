use std::{sync::Arc, time::Duration};

use crate::{
    client::DEFAULT_RETRY_WAIT,
    downloader::{
        fragment::FragmentDownloader,
        state::{FileStatus, FragmentTask},
        ultra::DownloaderShared,
    },
    util::WorkItem,
};

const NETWORK_RETRY_WAIT: Duration = Duration::from_secs(5);
const PAUSE_REQUEUE_WAIT: Duration = Duration::from_millis(50);

/// Consumes fragment tasks until it pops a shutdown sentinel.
///
/// Transient errors are absorbed here: throttle responses signal the
/// AutoScaler, wait, and requeue with a retry bump; transport errors wait
/// and requeue without one. Everything else fails the file.
pub(crate) struct DownloadWorker {
    shared: Arc<DownloaderShared>,
    downloader: FragmentDownloader,
}

impl DownloadWorker {
    pub(crate) fn new(shared: Arc<DownloaderShared>) -> Self {
        let downloader = FragmentDownloader::new(shared.client.clone(), shared.host_http.clone());
        Self { shared, downloader }
    }

    pub(crate) async fn run(self) {
        loop {
            match self.shared.fragment_queue.pop().await {
                WorkItem::Task(task) => {
                    self.process(task).await;
                    self.shared.fragment_queue.task_done();
                }
                WorkItem::Shutdown => {
                    self.shared.fragment_queue.task_done();
                    break;
                }
            }
        }
    }

    async fn process(&self, mut task: FragmentTask) {
        let state = self.shared.states.read().await.get(&task.file_id).cloned();
        let Some(state) = state else { return };
        if state.is_cancelled() {
            return;
        }

        if self.shared.global_pause.is_paused() || state.is_paused() {
            self.shared.fragment_queue.push(task);
            tokio::time::sleep(PAUSE_REQUEUE_WAIT).await;
            return;
        }

        let record = self.shared.records.read().await.get(&task.file_id).cloned();
        let Some(record) = record else { return };

        state.set_status_if_active(FileStatus::Downloading);

        let result = self
            .downloader
            .download(&task, &record, &self.shared.global_pause, &state)
            .await;

        match result {
            Ok(bytes) => {
                self.shared.throttle.signal_bytes(bytes);
                if bytes > 0 {
                    state.record_bytes(bytes);
                }
                if !state.is_cancelled() && state.record_fragment() {
                    // Unique winner: the last-fragment increment happened
                    // under the progress lock.
                    self.shared.finalize_queue.push(task.file_id.clone());
                }
            }
            Err(err) if err.is_hard_throttle() => {
                self.shared.throttle.signal_error();
                if task.retries >= self.shared.max_retries {
                    tracing::warn!(
                        file = %task.file_id,
                        retries = task.retries,
                        "fragment exhausted its retry budget"
                    );
                    self.shared.fail_file(&state, err);
                } else {
                    let wait = err.retry_wait().unwrap_or(DEFAULT_RETRY_WAIT);
                    tracing::warn!(
                        file = %task.file_id,
                        retries = task.retries,
                        wait_s = wait.as_secs_f64(),
                        "throttled by host, retrying"
                    );
                    state.set_status_if_active(FileStatus::RetryingServer);
                    tokio::time::sleep(wait).await;
                    task.retries += 1;
                    self.shared.fragment_queue.push(task);
                }
            }
            Err(err) if err.is_transport() => {
                state.set_status_if_active(FileStatus::RetryingNetwork);
                tracing::warn!(file = %task.file_id, error = %err, "network issue, backing off");
                tokio::time::sleep(NETWORK_RETRY_WAIT).await;
                self.shared.fragment_queue.push(task);
            }
            Err(err) => {
                tracing::error!(file = %task.file_id, error = %err, "fragment download failed");
                self.shared.fail_file(&state, err);
            }
        }
    }
}
