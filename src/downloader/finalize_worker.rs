use std::{path::Path, sync::Arc};

use crate::{
    downloader::{
        finalizer::FileFinalizer,
        state::{FileRecord, FileStatus},
        ultra::DownloaderShared,
    },
    error::DriveError,
    util::WorkItem,
};

/// Per-file finalize orchestration: terminal status transitions, the move
/// into the destination directory, temp-dir cleanup, and the single
/// `on_complete` invocation.
pub(crate) struct FinalizeWorker {
    shared: Arc<DownloaderShared>,
    finalizer: FileFinalizer,
}

impl FinalizeWorker {
    pub(crate) fn new(shared: Arc<DownloaderShared>) -> Self {
        Self {
            shared,
            finalizer: FileFinalizer,
        }
    }

    pub(crate) async fn run(self) {
        loop {
            match self.shared.finalize_queue.pop().await {
                WorkItem::Task(file_id) => {
                    self.process(&file_id).await;
                    self.shared.finalize_queue.task_done();
                }
                WorkItem::Shutdown => {
                    self.shared.finalize_queue.task_done();
                    break;
                }
            }
        }
    }

    async fn process(&self, file_id: &str) {
        let state = self.shared.states.read().await.get(file_id).cloned();
        let record = self.shared.records.read().await.get(file_id).cloned();
        let (Some(state), Some(record)) = (state, record) else {
            return;
        };

        if state.is_cancelled() {
            state.set_status_if_active(FileStatus::Cancelled);
        } else if state.error().is_none() {
            match self.complete(&record).await {
                Ok(()) => {
                    state.set_status_if_active(FileStatus::Completed);
                }
                Err(err) => {
                    tracing::error!(file = %file_id, error = %err, "finalization failed");
                    self.shared.fail_file(&state, err);
                }
            }
        } else {
            state.set_status_if_active(FileStatus::Failed);
        }

        if let Some(on_complete) = &record.on_complete {
            on_complete
                .invoke((file_id.to_string(), state.snapshot()))
                .await;
        }
    }

    async fn complete(&self, record: &FileRecord) -> Result<(), DriveError> {
        self.finalizer.finalize(record).await?;

        match tokio::fs::metadata(&record.output_dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(DriveError::DestinationMissing(record.output_dir.clone())),
        }

        let file_name = record
            .output_path
            .file_name()
            .ok_or_else(|| DriveError::Configuration("output path has no file name".into()))?;
        let target = record.output_dir.join(file_name);

        move_file(&record.output_path, &target).await?;
        tokio::fs::remove_dir_all(&record.file_dir).await?;
        Ok(())
    }
}

/// Rename, with a copy-and-unlink fallback for cross-device destinations.
pub(crate) async fn move_file(from: &Path, to: &Path) -> Result<(), DriveError> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await?;
            Ok(())
        }
    }
}
