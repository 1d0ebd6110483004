use std::{
    collections::HashMap,
    num::NonZeroU16,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use uuid::Uuid;

use crate::{
    client::{retry_after_wait, DEFAULT_RETRY_WAIT},
    error::{DriveError, DriveRequestError},
    uploader::{
        state::{DiscordRequest, UploadFileState},
        ultra::UploaderShared,
    },
};

const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Sends sealed requests to the attachment host.
///
/// One multipart POST per request, to the next webhook in round-robin
/// order, with fields `files[i]` and filenames of
/// `<attachment_name>_<hex(frontend_id)>` so they survive the host's
/// filename hygiene.
pub(crate) struct DiscordUploader {
    shared: Arc<UploaderShared>,
}

impl DiscordUploader {
    pub(crate) fn new(shared: Arc<UploaderShared>) -> Self {
        Self { shared }
    }

    pub(crate) async fn upload(
        &self,
        request: &DiscordRequest,
        states: &HashMap<Uuid, Arc<UploadFileState>>,
    ) -> Result<(), DriveError> {
        if any_cancelled(states) {
            return Ok(());
        }

        let config = self.shared.current_config()?;
        if config.webhooks.is_empty() {
            return Err(DriveError::Configuration(
                "no webhooks available for upload".into(),
            ));
        }

        // Wait out pauses before any network I/O starts.
        while self.shared.global_pause.is_paused() || any_paused(states) {
            if any_cancelled(states) {
                return Ok(());
            }
            tokio::time::sleep(PAUSE_POLL).await;
        }

        let cursor = self.shared.webhook_cursor.fetch_add(1, Ordering::Relaxed);
        let webhook = &config.webhooks[cursor % config.webhooks.len()];

        let mut form = reqwest::multipart::Form::new();
        for (index, attachment) in request.attachments.iter().enumerate() {
            let file_name = format!(
                "{}_{}",
                config.attachment_name,
                hex::encode(attachment.frontend_id.as_bytes())
            );
            let part = reqwest::multipart::Part::bytes(attachment.data.to_vec())
                .file_name(file_name)
                .mime_str("application/octet-stream")?;
            form = form.part(format!("files[{index}]"), part);
        }

        let response = self
            .shared
            .host_http
            .post(&webhook.url)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();

        match status.as_u16() {
            429 => Err(DriveError::RateLimit {
                wait: retry_after_wait(response.headers()),
            }),
            503 => Err(DriveError::ServiceUnavailable {
                wait: DEFAULT_RETRY_WAIT,
            }),
            code if !status.is_success() => Err(DriveError::RequestError(DriveRequestError {
                status: NonZeroU16::new(code).expect("HTTP status is non-zero"),
                message: None,
            })),
            _ => Ok(()),
        }
    }
}

pub(crate) fn any_cancelled(states: &HashMap<Uuid, Arc<UploadFileState>>) -> bool {
    states.values().any(|state| state.is_cancelled())
}

pub(crate) fn any_paused(states: &HashMap<Uuid, Arc<UploadFileState>>) -> bool {
    states.values().any(|state| state.is_paused())
}
