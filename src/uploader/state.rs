use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use rand::RngCore;
use strum_macros::Display;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    cipher::SeekableCipher,
    definitions::shared::{EncryptionMethod, Webhook},
    error::DriveError,
    util::{CancelToken, PauseGate, StateCell},
};

pub(crate) type UploadStateMap = Arc<RwLock<HashMap<Uuid, Arc<UploadFileState>>>>;

/// Host-facing upload parameters. Built by `check_can_upload` and replaced
/// atomically as one snapshot; workers read whatever snapshot is current
/// when they start a file.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub webhooks: Vec<Webhook>,
    /// File-type groups (e.g. `"video"`) to recognized extensions.
    pub extensions: HashMap<String, Vec<String>>,
    /// Base name every attachment is uploaded under; survives the host's
    /// filename hygiene.
    pub attachment_name: String,
    pub max_attachments: usize,
    /// Per-request payload ceiling on the host.
    pub max_size: u64,
    pub encryption_method: EncryptionMethod,
}

/// Cipher material for one chunk group (the file body, one thumbnail, or
/// one subtitle), with a fresh random key and IV each.
#[derive(Clone, Debug)]
pub struct Crypto {
    pub method: EncryptionMethod,
    pub key: Option<Vec<u8>>,
    pub iv: Option<Vec<u8>>,
}

impl Crypto {
    pub fn generate(method: EncryptionMethod) -> Self {
        match method {
            EncryptionMethod::Plain => Self {
                method,
                key: None,
                iv: None,
            },
            EncryptionMethod::AesCtr => Self {
                method,
                key: Some(random_bytes(32)),
                // 128-bit counter block
                iv: Some(random_bytes(16)),
            },
            EncryptionMethod::ChaCha20 => Self {
                method,
                key: Some(random_bytes(32)),
                // 96-bit nonce (RFC 8439 framing)
                iv: Some(random_bytes(12)),
            },
        }
    }

    pub fn cipher_at(&self, start_byte: u64) -> Result<SeekableCipher, DriveError> {
        SeekableCipher::new(
            self.method,
            self.key.as_deref(),
            self.iv.as_deref(),
            start_byte,
        )
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; len];
    rand::rng().fill_bytes(&mut buffer);
    buffer
}

/// What an attachment carries besides its payload.
#[derive(Clone, Debug)]
pub enum AttachmentKind {
    Chunk {
        /// 1-based insertion order within the file.
        sequence: u32,
        /// Plaintext byte offset of the chunk.
        offset: u64,
    },
    Thumbnail,
    Subtitle {
        language: String,
        is_forced: bool,
    },
}

#[derive(Clone, Debug)]
pub struct UploadAttachment {
    pub frontend_id: Uuid,
    pub data: Bytes,
    pub crypto: Arc<Crypto>,
    pub kind: AttachmentKind,
}

impl UploadAttachment {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Ordered batch of attachments posted as one multipart request to a
/// webhook. Invariant: at most `max_attachments` entries and at most
/// `max_size` bytes of payload. `retries` is the only mutable field.
#[derive(Clone, Debug)]
pub struct DiscordRequest {
    pub request_id: Uuid,
    pub attachments: Vec<UploadAttachment>,
    pub retries: u32,
}

impl DiscordRequest {
    pub(crate) fn new(attachments: Vec<UploadAttachment>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            attachments,
            retries: 0,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.attachments.iter().map(UploadAttachment::size).sum()
    }

    pub fn file_ids(&self) -> HashSet<Uuid> {
        self.attachments
            .iter()
            .map(|attachment| attachment.frontend_id)
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UploadFileStatus {
    Pending,
    Scanning,
    Ready,
    Uploading,
    Paused,
    RetryingNetwork,
    Completed,
    Failed,
    Cancelled,
}

impl UploadFileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadCounters {
    pub expected_chunks: u32,
    pub expected_subtitles: u32,
    pub expected_thumbnail: u32,
    pub uploaded_chunks: u32,
    pub uploaded_subtitles: u32,
    pub uploaded_thumbnail: u32,
    /// Set once the prepare stage finished enumerating the file. Until
    /// then matching counters mean nothing: more attachments may follow.
    pub scan_complete: bool,
}

impl UploadCounters {
    pub fn is_fully_uploaded(&self) -> bool {
        self.scan_complete
            && self.uploaded_chunks == self.expected_chunks
            && self.uploaded_subtitles == self.expected_subtitles
            && self.uploaded_thumbnail == self.expected_thumbnail
    }
}

/// Mutable per-file upload state. The prepare worker grows the expected
/// counters while the upload workers grow the uploaded ones; both sides
/// share the counter lock so "fully uploaded" has a unique winner.
#[derive(Debug)]
pub struct UploadFileState {
    counters: Mutex<UploadCounters>,
    status: StateCell<UploadFileStatus>,
    error: StateCell<Option<Arc<DriveError>>>,
    cancelled: CancelToken,
    pause: PauseGate,
}

impl UploadFileState {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(UploadCounters::default()),
            status: StateCell::new(UploadFileStatus::Pending),
            error: StateCell::new(None),
            cancelled: CancelToken::new(),
            pause: PauseGate::new(),
        }
    }

    pub fn status(&self) -> UploadFileStatus {
        self.status.get()
    }

    pub fn error(&self) -> Option<Arc<DriveError>> {
        self.error.get()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn set_status_if_active(&self, status: UploadFileStatus) -> bool {
        self.status.update(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = status;
                true
            }
        })
    }

    pub fn transition(&self, from: UploadFileStatus, to: UploadFileStatus) -> bool {
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
        self.set_status_if_active(UploadFileStatus::Failed);
    }

    pub fn cancel(&self) {
        self.cancelled.cancel();
        self.set_status_if_active(UploadFileStatus::Cancelled);
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

    pub fn expect(&self, kind: &AttachmentKind) {
        let mut counters = self.counters.lock().expect("counter lock poisoned");
        match kind {
            AttachmentKind::Chunk { .. } => counters.expected_chunks += 1,
            AttachmentKind::Subtitle { .. } => counters.expected_subtitles += 1,
            AttachmentKind::Thumbnail => counters.expected_thumbnail += 1,
        }
    }

    /// Counts one uploaded attachment; true when the file is now fully
    /// uploaded.
    pub fn record_uploaded(&self, kind: &AttachmentKind) -> bool {
        let mut counters = self.counters.lock().expect("counter lock poisoned");
        match kind {
            AttachmentKind::Chunk { .. } => counters.uploaded_chunks += 1,
            AttachmentKind::Subtitle { .. } => counters.uploaded_subtitles += 1,
            AttachmentKind::Thumbnail => counters.uploaded_thumbnail += 1,
        }
        counters.is_fully_uploaded()
    }

    /// Marks scanning as finished; true when every attachment enumerated
    /// so far has already been uploaded (the file completed mid-scan).
    pub fn mark_scan_complete(&self) -> bool {
        let mut counters = self.counters.lock().expect("counter lock poisoned");
        counters.scan_complete = true;
        counters.is_fully_uploaded()
    }

    pub fn counters(&self) -> UploadCounters {
        *self.counters.lock().expect("counter lock poisoned")
    }

    pub fn snapshot(&self) -> UploadFileSnapshot {
        UploadFileSnapshot {
            counters: self.counters(),
            status: self.status(),
            error: self.error(),
            cancelled: self.is_cancelled(),
        }
    }
}

impl Default for UploadFileState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct UploadFileSnapshot {
    pub counters: UploadCounters,
    pub status: UploadFileStatus,
    pub error: Option<Arc<DriveError>>,
    pub cancelled: bool,
}

impl UploadFileSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Work item for the prepare stage: one local path headed into one
/// destination folder.
#[derive(Clone, Debug)]
pub struct UploadInput {
    pub path: PathBuf,
    pub parent_id: String,
    pub lock_from: Option<String>,
    pub password: Option<String>,
}
