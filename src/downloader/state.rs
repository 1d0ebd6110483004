use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use strum_macros::Display;
use tokio::sync::RwLock;

use crate::{
    definitions::shared::{FileInfo, FragmentInfo},
    error::DriveError,
    util::{CancelToken, DriveCallback, PauseGate, StateCell},
};

pub type FileId = String;

pub(crate) type StateMap = Arc<RwLock<HashMap<FileId, Arc<FileState>>>>;
pub(crate) type RecordMap = Arc<RwLock<HashMap<FileId, Arc<FileRecord>>>>;

/// Callback fired exactly once per file when it reaches a terminal status.
pub type OnComplete = DriveCallback<(FileId, FileStateSnapshot)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FileStatus {
    Queued,
    Pending,
    Downloading,
    Paused,
    RetryingNetwork,
    RetryingServer,
    Completed,
    Failed,
    Cancelled,
}

impl FileStatus {
    /// Terminal statuses are sticky: no transition leads out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileProgress {
    pub fragments_total: u32,
    pub fragments_downloaded: u32,
    pub size_total: u64,
    pub bytes_downloaded: u64,
}

/// Mutable per-file download state, shared between workers and pollers.
///
/// Counters live under one lock so the transition into "all fragments
/// downloaded" has a unique winner; the lock is never held across I/O.
#[derive(Debug)]
pub struct FileState {
    progress: Mutex<FileProgress>,
    status: StateCell<FileStatus>,
    error: StateCell<Option<Arc<DriveError>>>,
    cancelled: CancelToken,
    pause: PauseGate,
}

impl FileState {
    pub fn new(progress: FileProgress, status: FileStatus) -> Self {
        Self {
            progress: Mutex::new(progress),
            status: StateCell::new(status),
            error: StateCell::new(None),
            cancelled: CancelToken::new(),
            pause: PauseGate::new(),
        }
    }

    pub fn status(&self) -> FileStatus {
        self.status.get()
    }

    pub fn error(&self) -> Option<Arc<DriveError>> {
        self.error.get()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Sets `status` unless the file already reached a terminal state.
    pub fn set_status_if_active(&self, status: FileStatus) -> bool {
        self.status.update(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = status;
                true
            }
        })
    }

    /// Compare-and-set between two non-terminal labels.
    pub fn transition(&self, from: FileStatus, to: FileStatus) -> bool {
        self.status.update(|current| {
            if *current == from {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    pub fn fail(&self, error: Arc<DriveError>) {
        self.error.set(Some(error));
        self.set_status_if_active(FileStatus::Failed);
    }

    pub fn cancel(&self) {
        self.cancelled.cancel();
        self.set_status_if_active(FileStatus::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn record_bytes(&self, bytes: u64) {
        let mut progress = self.progress.lock().expect("progress lock poisoned");
        progress.bytes_downloaded += bytes;
    }

    /// Counts one finished fragment. Returns true exactly once, when the
    /// last fragment lands: the increment and the comparison share the lock.
    pub fn record_fragment(&self) -> bool {
        let mut progress = self.progress.lock().expect("progress lock poisoned");
        progress.fragments_downloaded += 1;
        progress.fragments_downloaded == progress.fragments_total
    }

    pub fn progress(&self) -> FileProgress {
        *self.progress.lock().expect("progress lock poisoned")
    }

    pub fn snapshot(&self) -> FileStateSnapshot {
        let progress = self.progress();
        FileStateSnapshot {
            fragments_total: progress.fragments_total,
            fragments_downloaded: progress.fragments_downloaded,
            size_total: progress.size_total,
            bytes_downloaded: progress.bytes_downloaded,
            status: self.status(),
            error: self.error(),
            cancelled: self.is_cancelled(),
        }
    }
}

/// Point-in-time view handed to pollers and completion callbacks.
#[derive(Clone, Debug)]
pub struct FileStateSnapshot {
    pub fragments_total: u32,
    pub fragments_downloaded: u32,
    pub size_total: u64,
    pub bytes_downloaded: u64,
    pub status: FileStatus,
    pub error: Option<Arc<DriveError>>,
    pub cancelled: bool,
}

impl FileStateSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Immutable per-file bookkeeping created by the planner.
#[derive(Debug)]
pub struct FileRecord {
    pub file_info: FileInfo,
    /// Private working directory: `.part` files and the merged ciphertext.
    pub file_dir: PathBuf,
    pub merged_path: PathBuf,
    pub output_dir: PathBuf,
    pub output_path: PathBuf,
    pub on_complete: Option<OnComplete>,
}

/// One fragment of one file, as queued for the worker pool. `retries` is
/// the only field a worker mutates.
#[derive(Clone, Debug)]
pub struct FragmentTask {
    pub file_id: FileId,
    pub file_name: String,
    pub fragment: FragmentInfo,
    pub file_password: Option<String>,
    pub retries: u32,
}

pub(crate) fn part_path(file_dir: &Path, sequence: u32) -> PathBuf {
    file_dir.join(format!("{sequence}.part"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(total: u32) -> FileState {
        FileState::new(
            FileProgress {
                fragments_total: total,
                size_total: total as u64 * 10,
                ..Default::default()
            },
            FileStatus::Pending,
        )
    }

    #[test]
    fn record_fragment_signals_completion_exactly_once() {
        let state = state(3);
        assert!(!state.record_fragment());
        assert!(!state.record_fragment());
        assert!(state.record_fragment());

        let progress = state.progress();
        assert_eq!(progress.fragments_downloaded, 3);
    }

    #[test]
    fn terminal_statuses_are_sticky() {
        let state = state(1);
        state.set_status_if_active(FileStatus::Downloading);
        state.fail(Arc::new(DriveError::ServerTimeout));

        assert_eq!(state.status(), FileStatus::Failed);
        assert!(!state.set_status_if_active(FileStatus::Downloading));
        assert_eq!(state.status(), FileStatus::Failed);

        state.cancel();
        assert_eq!(state.status(), FileStatus::Failed);
        assert!(state.is_cancelled());
    }

    #[test]
    fn transition_is_a_compare_and_set() {
        let state = state(1);
        assert!(state.transition(FileStatus::Pending, FileStatus::Downloading));
        assert!(!state.transition(FileStatus::Pending, FileStatus::Downloading));
        assert!(state.transition(FileStatus::Downloading, FileStatus::Paused));
    }

    #[test]
    fn snapshot_reflects_error_and_counters() {
        let state = state(2);
        state.record_bytes(10);
        state.record_fragment();
        state.fail(Arc::new(DriveError::ServerTimeout));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.fragments_downloaded, 1);
        assert_eq!(snapshot.bytes_downloaded, 10);
        assert_eq!(snapshot.status, FileStatus::Failed);
        assert!(snapshot.error.is_some());
        assert!(snapshot.is_terminal());
    }
}
