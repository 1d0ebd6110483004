use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{sync::RwLock, task::JoinHandle};
use typed_builder::TypedBuilder;

use crate::{
    client::{host_client, DriveClient},
    definitions::shared::DownloadItem,
    downloader::{
        finalize_worker::FinalizeWorker,
        metadata::MetadataFetcher,
        planner::TaskPlanner,
        scaler::{AutoScaler, AutoScalerConfig},
        state::{
            FileId, FileState, FileStateSnapshot, FileStatus, FragmentTask, OnComplete, RecordMap,
            StateMap,
        },
        throttle::ThrottleState,
        worker::DownloadWorker,
    },
    error::DriveError,
    util::{PauseGate, StateCell, TaskQueue},
};

const WATCH_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, TypedBuilder)]
pub struct UltraDownloaderOptions {
    /// Root of the per-file working directories.
    #[builder(setter(into))]
    pub temp_dir: PathBuf,
    /// Ceiling for the scaled worker pool. Upstream derives this from
    /// attachment-host capacity, two per bot
    /// (`DiscordSettings::suggested_download_workers`).
    #[builder(default = 8)]
    pub max_workers: usize,
    #[builder(default = 5)]
    pub max_retries: u32,
    #[builder(default = 2)]
    pub finalize_workers: usize,
}

/// Everything the worker pool shares. Owned by the coordinator, borrowed by
/// workers through an `Arc`.
pub(crate) struct DownloaderShared {
    pub(crate) client: Arc<DriveClient>,
    pub(crate) host_http: reqwest::Client,
    pub(crate) fragment_queue: TaskQueue<FragmentTask>,
    pub(crate) finalize_queue: TaskQueue<FileId>,
    pub(crate) states: StateMap,
    pub(crate) records: RecordMap,
    pub(crate) throttle: Arc<ThrottleState>,
    pub(crate) global_pause: PauseGate,
    pub(crate) max_retries: u32,
    last_error: StateCell<Option<Arc<DriveError>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    finalize_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DownloaderShared {
    fn spawn_download_worker(self: &Arc<Self>) {
        let worker = DownloadWorker::new(self.clone());
        let handle = tokio::spawn(worker.run());
        self.worker_handles
            .lock()
            .expect("worker handle lock poisoned")
            .push(handle);
    }

    fn spawn_finalize_worker(self: &Arc<Self>) {
        let worker = FinalizeWorker::new(self.clone());
        let handle = tokio::spawn(worker.run());
        self.finalize_handles
            .lock()
            .expect("finalize handle lock poisoned")
            .push(handle);
    }

    /// Records the error on the file and remembers it as the engine's most
    /// recent failure.
    pub(crate) fn fail_file(&self, state: &FileState, error: DriveError) {
        let error = Arc::new(error);
        state.fail(error.clone());
        self.last_error.set(Some(error));
    }
}

/// Long-lived, resumable download engine.
///
/// Owns the queues, the state and record maps, the throttle, and the
/// AutoScaler. Workers spawn at construction and live until `shutdown`;
/// `download` only fetches metadata, reconciles disk state, and feeds the
/// queues, so it returns as soon as the work is enqueued. Callers observe
/// progress through the state accessors or `wait_for_file`.
pub struct UltraDownloader {
    shared: Arc<DownloaderShared>,
    metadata: MetadataFetcher,
    planner: TaskPlanner,
    scaler: Arc<AutoScaler>,
    scaler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl UltraDownloader {
    /// Spawns the minimum worker set plus the finalize workers and starts
    /// the scaler. Must be called within a Tokio runtime.
    pub fn new(
        client: Arc<DriveClient>,
        options: UltraDownloaderOptions,
    ) -> Result<Self, DriveError> {
        let throttle = Arc::new(ThrottleState::default());
        let scaler_config = AutoScalerConfig::for_max_workers(options.max_workers);

        let shared = Arc::new(DownloaderShared {
            client: client.clone(),
            host_http: host_client()?,
            fragment_queue: TaskQueue::new(),
            finalize_queue: TaskQueue::new(),
            states: Arc::new(RwLock::new(HashMap::new())),
            records: Arc::new(RwLock::new(HashMap::new())),
            throttle: throttle.clone(),
            global_pause: PauseGate::new(),
            max_retries: options.max_retries,
            last_error: StateCell::new(None),
            worker_handles: Mutex::new(Vec::new()),
            finalize_handles: Mutex::new(Vec::new()),
        });

        for _ in 0..scaler_config.min_workers {
            shared.spawn_download_worker();
        }
        for _ in 0..options.finalize_workers {
            shared.spawn_finalize_worker();
        }

        let scaler = Arc::new(AutoScaler::new(scaler_config, throttle));
        let spawn_shared = shared.clone();
        let kill_shared = shared.clone();
        let scaler_handle = scaler.start(
            move || spawn_shared.spawn_download_worker(),
            move || kill_shared.fragment_queue.push_shutdown(),
        );

        Ok(Self {
            metadata: MetadataFetcher::new(client),
            planner: TaskPlanner::new(options.temp_dir),
            shared,
            scaler,
            scaler_handle: Mutex::new(Some(scaler_handle)),
        })
    }

    /// Fetches metadata for `items`, reconciles on-disk partial state, and
    /// enqueues the remaining work. File ids already tracked by the engine
    /// are rejected. Returns the ids newly accepted.
    pub async fn download(
        &self,
        items: &[DownloadItem],
        output_dir: impl Into<PathBuf>,
        on_complete: Option<OnComplete>,
    ) -> Result<Vec<FileId>, DriveError> {
        let output_dir = output_dir.into();
        let files = self.metadata.fetch_files(items).await?;
        let plan = self
            .planner
            .prepare(files, &output_dir, on_complete)
            .await?;

        let mut accepted = Vec::new();
        {
            let mut states = self.shared.states.write().await;
            let mut records = self.shared.records.write().await;
            let mut plan_records = plan.records;

            for (file_id, state) in plan.states {
                if states.contains_key(&file_id) {
                    tracing::warn!(file = %file_id, "duplicate file id rejected");
                    continue;
                }
                let Some(record) = plan_records.remove(&file_id) else {
                    continue;
                };
                states.insert(file_id.clone(), state);
                records.insert(file_id.clone(), record);
                accepted.push(file_id);
            }
        }

        for file_id in &plan.finalize_ready {
            if accepted.contains(file_id) {
                self.shared.finalize_queue.push(file_id.clone());
            }
        }
        for task in plan.tasks {
            if accepted.contains(&task.file_id) {
                self.shared.fragment_queue.push(task);
            }
        }

        Ok(accepted)
    }

    /// Blocks the global pause latch and relabels in-flight files.
    pub async fn pause_all(&self) {
        self.shared.global_pause.pause();
        for state in self.shared.states.read().await.values() {
            state.transition(FileStatus::Downloading, FileStatus::Paused);
        }
    }

    pub async fn resume_all(&self) {
        self.shared.global_pause.resume();
        for state in self.shared.states.read().await.values() {
            state.transition(FileStatus::Paused, FileStatus::Downloading);
        }
    }

    pub async fn pause_file(&self, file_id: &str) {
        if let Some(state) = self.shared.states.read().await.get(file_id) {
            state.pause();
        }
    }

    pub async fn resume_file(&self, file_id: &str) {
        if let Some(state) = self.shared.states.read().await.get(file_id) {
            state.resume();
        }
    }

    /// Sticky: the file keeps reading as cancelled and every remaining
    /// stage short-circuits.
    pub async fn cancel_file(&self, file_id: &str) {
        if let Some(state) = self.shared.states.read().await.get(file_id) {
            state.cancel();
        }
    }

    pub async fn get_file_state(&self, file_id: &str) -> Option<FileStateSnapshot> {
        self.shared
            .states
            .read()
            .await
            .get(file_id)
            .map(|state| state.snapshot())
    }

    pub async fn get_all_states(&self) -> HashMap<FileId, FileStateSnapshot> {
        self.shared
            .states
            .read()
            .await
            .iter()
            .map(|(id, state)| (id.clone(), state.snapshot()))
            .collect()
    }

    pub async fn get_failed_states(&self) -> HashMap<FileId, FileStateSnapshot> {
        self.shared
            .states
            .read()
            .await
            .iter()
            .filter(|(_, state)| state.status() == FileStatus::Failed)
            .map(|(id, state)| (id.clone(), state.snapshot()))
            .collect()
    }

    /// Bytes/sec over the throttle window.
    pub fn get_download_rate(&self) -> f64 {
        self.shared.throttle.download_rate()
    }

    pub fn get_last_error(&self) -> Option<Arc<DriveError>> {
        self.shared.last_error.get()
    }

    pub fn worker_count(&self) -> usize {
        self.scaler.worker_count()
    }

    /// Polls every 200 ms until the file reaches a terminal status. `None`
    /// when the id is unknown.
    pub async fn wait_for_file(&self, file_id: &str) -> Option<FileStateSnapshot> {
        loop {
            let snapshot = self.get_file_state(file_id).await?;
            if snapshot.is_terminal() {
                return Some(snapshot);
            }
            tokio::time::sleep(WATCH_POLL).await;
        }
    }

    /// Resolves once both queues have drained.
    pub async fn join(&self) {
        self.shared.fragment_queue.join().await;
        self.shared.finalize_queue.join().await;
    }

    /// Stops the scaler, retires every worker with one sentinel each, and
    /// joins them. In-flight tasks finish first.
    pub async fn shutdown(&self) {
        self.scaler.stop();
        let scaler_handle = self
            .scaler_handle
            .lock()
            .expect("scaler handle lock poisoned")
            .take();
        if let Some(handle) = scaler_handle {
            handle.await.ok();
        }

        let workers: Vec<JoinHandle<()>> = self
            .shared
            .worker_handles
            .lock()
            .expect("worker handle lock poisoned")
            .drain(..)
            .collect();
        for _ in &workers {
            self.shared.fragment_queue.push_shutdown();
        }
        for handle in workers {
            handle.await.ok();
        }

        let finalizers: Vec<JoinHandle<()>> = self
            .shared
            .finalize_handles
            .lock()
            .expect("finalize handle lock poisoned")
            .drain(..)
            .collect();
        for _ in &finalizers {
            self.shared.finalize_queue.push_shutdown();
        }
        for handle in finalizers {
            handle.await.ok();
        }
    }
}
