use std::{path::Path, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::{
    definitions::bodies::CreateFolderBody,
    error::DriveError,
    uploader::{
        state::{
            AttachmentKind, Crypto, DiscordRequest, UploadAttachment, UploadConfig,
            UploadFileState, UploadFileStatus, UploadInput,
        },
        ultra::UploaderShared,
    },
    util::WorkItem,
};

/// Accumulates attachments until the next one would exceed the request
/// limits, then hands off a sealed bin.
#[derive(Debug, Default)]
pub(crate) struct RequestBuilder {
    attachments: Vec<UploadAttachment>,
    total_size: u64,
}

impl RequestBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn can_fit(&self, config: &UploadConfig, attachment: &UploadAttachment) -> bool {
        self.attachments.len() < config.max_attachments
            && self.total_size + attachment.size() <= config.max_size
    }

    pub(crate) fn add(&mut self, attachment: UploadAttachment) {
        self.total_size += attachment.size();
        self.attachments.push(attachment);
    }

    pub(crate) fn flush(&mut self) -> Option<DiscordRequest> {
        if self.attachments.is_empty() {
            return None;
        }
        self.total_size = 0;
        Some(DiscordRequest::new(std::mem::take(&mut self.attachments)))
    }

    pub(crate) fn flush_if_needed(
        &mut self,
        config: &UploadConfig,
        attachment: &UploadAttachment,
    ) -> Option<DiscordRequest> {
        if self.can_fit(config, attachment) {
            None
        } else {
            self.flush()
        }
    }

    pub(crate) fn remaining_size(&self, config: &UploadConfig) -> u64 {
        config.max_size.saturating_sub(self.total_size)
    }
}

/// Scans local paths into encrypted, bin-packed upload requests.
///
/// Directories become destination subfolders before descent. Each file gets
/// a fresh frontend id and state, optional thumbnail/subtitle attachments,
/// and one cipher for its whole body; chunks are cut to whatever still fits
/// the open bin.
pub(crate) struct PrepareRequestWorker {
    shared: Arc<UploaderShared>,
}

impl PrepareRequestWorker {
    pub(crate) fn new(shared: Arc<UploaderShared>) -> Self {
        Self { shared }
    }

    pub(crate) async fn run(self) {
        let mut builder = RequestBuilder::new();
        loop {
            match self.shared.input_queue.pop().await {
                WorkItem::Task(input) => {
                    if let Err(err) = self.prepare_path(&mut builder, input.clone()).await {
                        tracing::error!(
                            path = %input.path.display(),
                            error = %err,
                            "failed to prepare upload"
                        );
                    }
                    self.shared.input_queue.task_done();
                }
                WorkItem::Shutdown => {
                    self.shared.input_queue.task_done();
                    break;
                }
            }
        }

        // Whatever is still in the open bin ships on shutdown.
        if let Some(request) = builder.flush() {
            self.shared.upload_queue.push(request);
        }
    }

    fn prepare_path<'a>(
        &'a self,
        builder: &'a mut RequestBuilder,
        input: UploadInput,
    ) -> BoxFuture<'a, Result<(), DriveError>> {
        async move {
            let meta = tokio::fs::metadata(&input.path).await?;
            if !meta.is_dir() {
                return self.prepare_file(builder, &input).await;
            }

            let name = input
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    DriveError::Configuration("directory path has no name".into())
                })?;

            let folder = self
                .shared
                .client
                .create_folder(
                    CreateFolderBody::builder()
                        .name(name)
                        .parent_id(input.parent_id.clone())
                        .build(),
                    input.password.as_deref(),
                )
                .await?;

            let mut entries = tokio::fs::read_dir(&input.path).await?;
            while let Some(entry) = entries.next_entry().await? {
                self.prepare_path(
                    builder,
                    UploadInput {
                        path: entry.path(),
                        parent_id: folder.id.clone(),
                        lock_from: input.lock_from.clone(),
                        password: input.password.clone(),
                    },
                )
                .await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn prepare_file(
        &self,
        builder: &mut RequestBuilder,
        input: &UploadInput,
    ) -> Result<(), DriveError> {
        let config = self.shared.current_config()?;
        let file_id = Uuid::new_v4();

        let state = Arc::new(UploadFileState::new());
        state.set_status_if_active(UploadFileStatus::Scanning);
        self.shared.states.write().await.insert(file_id, state.clone());

        match self
            .scan_file(builder, &config, file_id, &state, &input.path)
            .await
        {
            Ok(()) => {
                if state.mark_scan_complete() {
                    // Every bin already uploaded while we were scanning.
                    state.set_status_if_active(UploadFileStatus::Completed);
                } else {
                    state.set_status_if_active(UploadFileStatus::Ready);
                }
                Ok(())
            }
            Err(err) => {
                tracing::error!(file = %file_id, error = %err, "scan failed");
                self.shared.fail_states(std::iter::once(&state), err);
                Ok(())
            }
        }
    }

    async fn scan_file(
        &self,
        builder: &mut RequestBuilder,
        config: &UploadConfig,
        file_id: Uuid,
        state: &UploadFileState,
        path: &Path,
    ) -> Result<(), DriveError> {
        if is_recognized_video(config, path) {
            if let Some(thumbnail) = self.shared.media_probe.extract_thumbnail(path) {
                let attachment = sealed_attachment(
                    config,
                    file_id,
                    thumbnail.data.to_vec(),
                    AttachmentKind::Thumbnail,
                )?;
                state.expect(&attachment.kind);
                self.push_packed(builder, config, attachment);
            }

            for subtitle in self.shared.media_probe.extract_subtitles(path) {
                let attachment = sealed_attachment(
                    config,
                    file_id,
                    subtitle.data.to_vec(),
                    AttachmentKind::Subtitle {
                        language: subtitle.language,
                        is_forced: subtitle.is_forced,
                    },
                )?;
                state.expect(&attachment.kind);
                self.push_packed(builder, config, attachment);
            }
        }

        // One cipher for the whole file body; chunks continue its keystream.
        let crypto = Arc::new(Crypto::generate(config.encryption_method));
        let mut cipher = crypto.cipher_at(0)?;

        let file_size = tokio::fs::metadata(path).await?.len();
        let mut file = tokio::fs::File::open(path).await?;
        let mut offset = 0u64;
        let mut sequence = 1u32;

        while offset < file_size {
            let remaining_bin = builder.remaining_size(config);
            let remaining_file = file_size - offset;

            // A nearly-full bin would strand the head of a large tail in a
            // poorly utilized extra request; seal it early instead.
            if remaining_bin < config.max_size / 3 && config.max_size / 3 < remaining_file {
                if let Some(request) = builder.flush() {
                    self.shared.upload_queue.push(request);
                }
                continue;
            }

            let take = remaining_bin.min(remaining_file);
            if take == 0 {
                if let Some(request) = builder.flush() {
                    self.shared.upload_queue.push(request);
                }
                continue;
            }

            let mut chunk = vec![0u8; take as usize];
            file.read_exact(&mut chunk).await?;
            cipher.transform(&mut chunk);

            let attachment = UploadAttachment {
                frontend_id: file_id,
                data: chunk.into(),
                crypto: crypto.clone(),
                kind: AttachmentKind::Chunk { sequence, offset },
            };
            state.expect(&attachment.kind);
            self.push_packed(builder, config, attachment);

            offset += take;
            sequence += 1;
        }

        // Bins never span files.
        if let Some(request) = builder.flush() {
            self.shared.upload_queue.push(request);
        }
        Ok(())
    }

    fn push_packed(
        &self,
        builder: &mut RequestBuilder,
        config: &UploadConfig,
        attachment: UploadAttachment,
    ) {
        if let Some(request) = builder.flush_if_needed(config, &attachment) {
            self.shared.upload_queue.push(request);
        }
        builder.add(attachment);
    }
}

/// Fresh crypto for a standalone attachment group, encrypted in one pass.
fn sealed_attachment(
    config: &UploadConfig,
    file_id: Uuid,
    mut data: Vec<u8>,
    kind: AttachmentKind,
) -> Result<UploadAttachment, DriveError> {
    let crypto = Arc::new(Crypto::generate(config.encryption_method));
    let mut cipher = crypto.cipher_at(0)?;
    cipher.transform(&mut data);
    Ok(UploadAttachment {
        frontend_id: file_id,
        data: data.into(),
        crypto,
        kind,
    })
}

fn is_recognized_video(config: &UploadConfig, path: &Path) -> bool {
    let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    let dotted = format!(".{}", extension.to_ascii_lowercase());
    config
        .extensions
        .get("video")
        .is_some_and(|list| list.iter().any(|known| known.eq_ignore_ascii_case(&dotted)))
}
