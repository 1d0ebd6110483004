use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{atomic::AtomicUsize, Arc, Mutex},
};

use tokio::{sync::RwLock, task::JoinHandle};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::{
    client::{host_client, DriveClient},
    definitions::shared::EncryptionMethod,
    error::DriveError,
    uploader::{
        media::{MediaProbe, NoMediaProbe},
        prepare::PrepareRequestWorker,
        state::{
            DiscordRequest, UploadConfig, UploadFileSnapshot, UploadFileState, UploadFileStatus,
            UploadInput, UploadStateMap,
        },
        worker::UploadWorker,
    },
    util::{PauseGate, StateCell, TaskQueue},
};

#[derive(Debug, TypedBuilder)]
pub struct UltraUploaderOptions {
    /// Host per-request payload ceiling (`maxDiscordMessageSize` from the
    /// user profile).
    pub max_message_size: u64,
    #[builder(default = 10)]
    pub max_attachments: usize,
    #[builder(default = EncryptionMethod::ChaCha20)]
    pub encryption_method: EncryptionMethod,
    #[builder(default = 2)]
    pub prepare_workers: usize,
    #[builder(default = 5)]
    pub upload_workers: usize,
    #[builder(default = 5)]
    pub max_retries: u32,
}

/// Everything the upload workers share.
pub(crate) struct UploaderShared {
    pub(crate) client: Arc<DriveClient>,
    pub(crate) host_http: reqwest::Client,
    pub(crate) config: StateCell<Option<Arc<UploadConfig>>>,
    pub(crate) input_queue: TaskQueue<UploadInput>,
    pub(crate) upload_queue: TaskQueue<DiscordRequest>,
    pub(crate) states: UploadStateMap,
    pub(crate) global_pause: PauseGate,
    pub(crate) max_retries: u32,
    pub(crate) media_probe: Arc<dyn MediaProbe>,
    pub(crate) webhook_cursor: AtomicUsize,
    last_error: StateCell<Option<Arc<DriveError>>>,
    prepare_handles: Mutex<Vec<JoinHandle<()>>>,
    upload_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl UploaderShared {
    /// The current config snapshot; `check_can_upload` must have succeeded
    /// at least once.
    pub(crate) fn current_config(&self) -> Result<Arc<UploadConfig>, DriveError> {
        self.config.get().ok_or_else(|| {
            DriveError::Configuration("check_can_upload must succeed before uploading".into())
        })
    }

    /// Records the error on every referenced state and remembers it as the
    /// engine's most recent failure.
    pub(crate) fn fail_states<'a>(
        &self,
        states: impl IntoIterator<Item = &'a Arc<UploadFileState>>,
        error: DriveError,
    ) {
        let error = Arc::new(error);
        for state in states {
            state.fail(error.clone());
        }
        self.last_error.set(Some(error));
    }

    fn spawn_prepare_worker(self: &Arc<Self>) {
        let worker = PrepareRequestWorker::new(self.clone());
        let handle = tokio::spawn(worker.run());
        self.prepare_handles
            .lock()
            .expect("prepare handle lock poisoned")
            .push(handle);
    }

    fn spawn_upload_worker(self: &Arc<Self>) {
        let worker = UploadWorker::new(self.clone());
        let handle = tokio::spawn(worker.run());
        self.upload_handles
            .lock()
            .expect("upload handle lock poisoned")
            .push(handle);
    }
}

/// Long-lived upload engine.
///
/// Owns the input and upload queues, the per-file state map, the config
/// snapshot, and both worker pools. Workers spawn at construction;
/// `upload` only validates and enqueues. `check_can_upload` is a hard
/// precondition: it supplies the webhooks and limits every later stage
/// packs against.
pub struct UltraUploader {
    shared: Arc<UploaderShared>,
    max_message_size: u64,
    max_attachments: usize,
    encryption_method: EncryptionMethod,
}

impl UltraUploader {
    /// Must be called within a Tokio runtime: workers spawn eagerly.
    pub fn new(
        client: Arc<DriveClient>,
        options: UltraUploaderOptions,
    ) -> Result<Self, DriveError> {
        Self::with_media_probe(client, options, Arc::new(NoMediaProbe))
    }

    pub fn with_media_probe(
        client: Arc<DriveClient>,
        options: UltraUploaderOptions,
        media_probe: Arc<dyn MediaProbe>,
    ) -> Result<Self, DriveError> {
        let shared = Arc::new(UploaderShared {
            client,
            host_http: host_client()?,
            config: StateCell::new(None),
            input_queue: TaskQueue::new(),
            upload_queue: TaskQueue::new(),
            states: Arc::new(RwLock::new(HashMap::new())),
            global_pause: PauseGate::new(),
            max_retries: options.max_retries,
            media_probe,
            webhook_cursor: AtomicUsize::new(0),
            last_error: StateCell::new(None),
            prepare_handles: Mutex::new(Vec::new()),
            upload_handles: Mutex::new(Vec::new()),
        });

        for _ in 0..options.prepare_workers.max(1) {
            shared.spawn_prepare_worker();
        }
        for _ in 0..options.upload_workers.max(1) {
            shared.spawn_upload_worker();
        }

        Ok(Self {
            shared,
            max_message_size: options.max_message_size,
            max_attachments: options.max_attachments,
            encryption_method: options.encryption_method,
        })
    }

    /// Refreshes the config snapshot from `user/canUpload/{folder_id}` and
    /// returns the folder the lock originates from, if any. Fails with
    /// `UploadNotAllowed` when the backend denies the destination.
    pub async fn check_can_upload(
        &self,
        folder_id: &str,
        password: Option<&str>,
    ) -> Result<Option<String>, DriveError> {
        let data = self.shared.client.check_can_upload(folder_id, password).await?;

        let config = UploadConfig {
            webhooks: data.webhooks,
            extensions: data.extensions,
            attachment_name: data.attachment_name,
            max_attachments: self.max_attachments,
            max_size: self.max_message_size,
            encryption_method: self.encryption_method,
        };
        self.shared.config.set(Some(Arc::new(config)));

        if !data.can_upload {
            return Err(DriveError::UploadNotAllowed);
        }
        Ok(data.lock_from)
    }

    /// Enqueues a file or directory for upload into `parent_id`.
    pub async fn upload(
        &self,
        path: impl Into<PathBuf>,
        parent_id: impl Into<String>,
    ) -> Result<(), DriveError> {
        self.upload_input(UploadInput {
            path: path.into(),
            parent_id: parent_id.into(),
            lock_from: None,
            password: None,
        })
        .await
    }

    /// Raised synchronously: a missing path or a missing config snapshot
    /// never reaches the queues.
    pub async fn upload_input(&self, input: UploadInput) -> Result<(), DriveError> {
        if !tokio::fs::try_exists(&input.path).await? {
            return Err(DriveError::PathDoesntExist(input.path));
        }
        self.shared.current_config()?;
        self.shared.input_queue.push(input);
        Ok(())
    }

    pub async fn pause_all(&self) {
        self.shared.global_pause.pause();
        for state in self.shared.states.read().await.values() {
            state.transition(UploadFileStatus::Uploading, UploadFileStatus::Paused);
        }
    }

    pub async fn resume_all(&self) {
        self.shared.global_pause.resume();
        for state in self.shared.states.read().await.values() {
            state.transition(UploadFileStatus::Paused, UploadFileStatus::Uploading);
        }
    }

    pub async fn pause_file(&self, file_id: Uuid) {
        if let Some(state) = self.shared.states.read().await.get(&file_id) {
            state.pause();
        }
    }

    pub async fn resume_file(&self, file_id: Uuid) {
        if let Some(state) = self.shared.states.read().await.get(&file_id) {
            state.resume();
        }
    }

    pub async fn cancel_file(&self, file_id: Uuid) {
        if let Some(state) = self.shared.states.read().await.get(&file_id) {
            state.cancel();
        }
    }

    pub async fn get_file_state(&self, file_id: Uuid) -> Option<UploadFileSnapshot> {
        self.shared
            .states
            .read()
            .await
            .get(&file_id)
            .map(|state| state.snapshot())
    }

    pub async fn get_all_states(&self) -> HashMap<Uuid, UploadFileSnapshot> {
        self.shared
            .states
            .read()
            .await
            .iter()
            .map(|(id, state)| (*id, state.snapshot()))
            .collect()
    }

    pub async fn get_failed_states(&self) -> HashMap<Uuid, UploadFileSnapshot> {
        self.shared
            .states
            .read()
            .await
            .iter()
            .filter(|(_, state)| state.status() == UploadFileStatus::Failed)
            .map(|(id, state)| (*id, state.snapshot()))
            .collect()
    }

    pub fn get_last_error(&self) -> Option<Arc<DriveError>> {
        self.shared.last_error.get()
    }

    /// Resolves once both stages have drained.
    pub async fn join(&self) {
        self.shared.input_queue.join().await;
        self.shared.upload_queue.join().await;
    }

    /// Retires every worker with one sentinel each and joins them. The
    /// prepare stage drains first so its sealed bins still reach the
    /// upload stage.
    pub async fn shutdown(&self) {
        let preparers: Vec<JoinHandle<()>> = self
            .shared
            .prepare_handles
            .lock()
            .expect("prepare handle lock poisoned")
            .drain(..)
            .collect();
        for _ in &preparers {
            self.shared.input_queue.push_shutdown();
        }
        for handle in preparers {
            handle.await.ok();
        }

        let uploaders: Vec<JoinHandle<()>> = self
            .shared
            .upload_handles
            .lock()
            .expect("upload handle lock poisoned")
            .drain(..)
            .collect();
        for _ in &uploaders {
            self.shared.upload_queue.push_shutdown();
        }
        for handle in uploaders {
            handle.await.ok();
        }
    }
}
