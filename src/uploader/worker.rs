use std::{collections::HashMap, sync::Arc, time::Duration};

use uuid::Uuid;

use crate::{
    client::DEFAULT_RETRY_WAIT,
    uploader::{
        discord::{any_cancelled, any_paused, DiscordUploader},
        state::{DiscordRequest, UploadFileState, UploadFileStatus},
        ultra::UploaderShared,
    },
    util::WorkItem,
};

const NETWORK_RETRY_WAIT: Duration = Duration::from_secs(5);
const PAUSE_REQUEUE_WAIT: Duration = Duration::from_millis(50);

/// Consumes sealed requests until it pops a shutdown sentinel.
///
/// Requests are handled set-wise over every file state they reference, so
/// a bin mixing a file's thumbnail, subtitles, and chunks gates and
/// updates them together.
pub(crate) struct UploadWorker {
    shared: Arc<UploaderShared>,
    uploader: DiscordUploader,
}

impl UploadWorker {
    pub(crate) fn new(shared: Arc<UploaderShared>) -> Self {
        let uploader = DiscordUploader::new(shared.clone());
        Self { shared, uploader }
    }

    pub(crate) async fn run(self) {
        loop {
            match self.shared.upload_queue.pop().await {
                WorkItem::Task(request) => {
                    self.process(request).await;
                    self.shared.upload_queue.task_done();
                }
                WorkItem::Shutdown => {
                    self.shared.upload_queue.task_done();
                    break;
                }
            }
        }
    }

    async fn process(&self, mut request: DiscordRequest) {
        let states = self.states_for(&request).await;
        if states.is_empty() {
            return;
        }
        if any_cancelled(&states) {
            return;
        }

        if self.shared.global_pause.is_paused() || any_paused(&states) {
            self.shared.upload_queue.push(request);
            tokio::time::sleep(PAUSE_REQUEUE_WAIT).await;
            return;
        }

        for state in states.values() {
            state.set_status_if_active(UploadFileStatus::Uploading);
        }

        match self.uploader.upload(&request, &states).await {
            Ok(()) => self.mark_progress(&request, &states),
            Err(err) if err.is_hard_throttle() => {
                if request.retries >= self.shared.max_retries {
                    tracing::warn!(
                        request = %request.request_id,
                        retries = request.retries,
                        "request exhausted its retry budget"
                    );
                    self.shared.fail_states(states.values(), err);
                } else {
                    let wait = err.retry_wait().unwrap_or(DEFAULT_RETRY_WAIT);
                    tracing::warn!(
                        request = %request.request_id,
                        retries = request.retries,
                        wait_s = wait.as_secs_f64(),
                        "throttled by host, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    request.retries += 1;
                    self.shared.upload_queue.push(request);
                }
            }
            Err(err) if err.is_transport() => {
                for state in states.values() {
                    state.set_status_if_active(UploadFileStatus::RetryingNetwork);
                }
                tracing::warn!(
                    request = %request.request_id,
                    error = %err,
                    "network issue, backing off"
                );
                tokio::time::sleep(NETWORK_RETRY_WAIT).await;
                self.shared.upload_queue.push(request);
            }
            Err(err) => {
                tracing::error!(request = %request.request_id, error = %err, "upload failed");
                self.shared.fail_states(states.values(), err);
            }
        }
    }

    async fn states_for(
        &self,
        request: &DiscordRequest,
    ) -> HashMap<Uuid, Arc<UploadFileState>> {
        let states = self.shared.states.read().await;
        request
            .file_ids()
            .into_iter()
            .filter_map(|id| states.get(&id).map(|state| (id, state.clone())))
            .collect()
    }

    fn mark_progress(
        &self,
        request: &DiscordRequest,
        states: &HashMap<Uuid, Arc<UploadFileState>>,
    ) {
        for attachment in &request.attachments {
            let Some(state) = states.get(&attachment.frontend_id) else {
                continue;
            };
            if state.is_terminal() || state.is_cancelled() {
                continue;
            }
            if state.record_uploaded(&attachment.kind) {
                state.set_status_if_active(UploadFileStatus::Completed);
            }
        }
    }
}
