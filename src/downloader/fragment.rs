use std::{num::NonZeroU16, path::Path, sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::{
    client::{retry_after_wait, DriveClient, DEFAULT_RETRY_WAIT},
    downloader::state::{part_path, FileRecord, FileState, FragmentTask},
    error::{DriveError, DriveRequestError},
    util::PauseGate,
};

const PAUSE_POLL: Duration = Duration::from_millis(100);

/// One-shot fragment fetch: signed-URL resolution plus a pause- and
/// cancel-aware streaming write into the fragment's `.part` file.
#[derive(Debug)]
pub struct FragmentDownloader {
    client: Arc<DriveClient>,
    http: reqwest::Client,
}

impl FragmentDownloader {
    /// `http` is the attachment-host client; workers share one instance.
    pub fn new(client: Arc<DriveClient>, http: reqwest::Client) -> Self {
        Self { client, http }
    }

    /// Streams one fragment to disk. Returns the bytes written; zero or a
    /// short count means the file was cancelled mid-stream, and the caller
    /// is responsible for not counting the fragment as done.
    pub async fn download(
        &self,
        task: &FragmentTask,
        record: &FileRecord,
        global_pause: &PauseGate,
        state: &FileState,
    ) -> Result<u64, DriveError> {
        if state.is_cancelled() {
            return Ok(0);
        }

        let attachment_id = &task.fragment.attachment_id;
        let url = self
            .client
            .fetch_fragment_url(attachment_id, task.file_password.as_deref())
            .await?;
        let part = part_path(&record.file_dir, task.fragment.sequence);

        match self
            .stream_to_disk(&url, &part, attachment_id, global_pause, state)
            .await
        {
            Ok(total) => Ok(total),
            Err(err) if err.is_transport() => {
                tracing::info!(part = %part.display(), "cleaning up part after transport error");
                tokio::fs::remove_file(&part).await.ok();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn stream_to_disk(
        &self,
        url: &str,
        part: &Path,
        attachment_id: &str,
        global_pause: &PauseGate,
        state: &FileState,
    ) -> Result<u64, DriveError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();

        match status.as_u16() {
            404 => return Err(DriveError::AttachmentNotFound(attachment_id.to_string())),
            429 => {
                return Err(DriveError::RateLimit {
                    wait: retry_after_wait(response.headers()),
                })
            }
            503 => {
                return Err(DriveError::ServiceUnavailable {
                    wait: DEFAULT_RETRY_WAIT,
                })
            }
            code if !status.is_success() => {
                return Err(DriveError::RequestError(DriveRequestError {
                    status: NonZeroU16::new(code).expect("HTTP status is non-zero"),
                    message: None,
                }))
            }
            _ => {}
        }

        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(part).await?;
        let mut total = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(DriveError::from)?;

            while global_pause.is_paused() || state.is_paused() {
                if state.is_cancelled() {
                    return Ok(total);
                }
                tokio::time::sleep(PAUSE_POLL).await;
            }
            if state.is_cancelled() {
                return Ok(total);
            }

            file.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }

        file.flush().await?;
        Ok(total)
    }
}
