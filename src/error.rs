use core::fmt;
use std::{error::Error, num::NonZeroU16, path::PathBuf, time::Duration};

/// Errors produced by the UltraDrive client and its transfer engines.
///
/// Workers absorb the transient variants (`RateLimit`, `ServiceUnavailable`,
/// `Network`, `ServerTimeout`) by waiting and requeueing; everything else is
/// fatal for the file or the operation that raised it.
#[derive(Debug)]
pub enum DriveError {
    /// Failed to decode a JSON payload from the backend.
    JsonParseError(serde_json::Error),
    /// The backend rejected a request.
    RequestError(DriveRequestError),
    /// The auth token was rejected (HTTP 401).
    Unauthorized,
    /// Could not reach the backend or the attachment host.
    Network(reqwest::Error),
    /// A request hit the per-request timeout.
    ServerTimeout,
    /// HTTP 429; `wait` honors `Retry-After` when the header is numeric.
    RateLimit { wait: Duration },
    /// HTTP 503; retry after a fixed short wait.
    ServiceUnavailable { wait: Duration },
    /// The attachment host no longer has this fragment (HTTP 404).
    AttachmentNotFound(String),
    /// Decrypted output did not match the planned checksum.
    CrcMismatch { expected: u32, actual: u32 },
    /// Uploading into the requested folder is not permitted.
    UploadNotAllowed,
    /// A local path handed to the uploader does not exist.
    PathDoesntExist(PathBuf),
    /// The download destination directory does not exist.
    DestinationMissing(PathBuf),
    /// Invalid cipher parameters, or operations invoked out of order.
    Configuration(String),
    /// Local filesystem failure.
    Io(std::io::Error),
}

impl DriveError {
    /// Wait before retrying, for throttle-style errors.
    pub fn retry_wait(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { wait } | Self::ServiceUnavailable { wait } => Some(*wait),
            _ => None,
        }
    }

    /// True for 429/503-class back-pressure from the host.
    pub fn is_hard_throttle(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::ServiceUnavailable { .. })
    }

    /// True for transport-level failures retried without a counter bump.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::ServerTimeout)
    }
}

impl Error for DriveError {}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::JsonParseError(err) => write!(f, "Failed to parse JSON: {}", err),
            Self::RequestError(err) => write!(f, "Request returned an error: {}", err),
            Self::Unauthorized => write!(f, "Auth token was rejected"),
            Self::Network(err) => write!(f, "Failed to send request: {}", err),
            Self::ServerTimeout => write!(f, "Request timed out"),
            Self::RateLimit { wait } => {
                write!(f, "Rate limited, retry after {:.1}s", wait.as_secs_f64())
            }
            Self::ServiceUnavailable { wait } => {
                write!(f, "Service unavailable, retry after {:.1}s", wait.as_secs_f64())
            }
            Self::AttachmentNotFound(id) => write!(f, "Attachment {} not found", id),
            Self::CrcMismatch { expected, actual } => write!(
                f,
                "CRC mismatch: expected {:#010x}, got {:#010x}",
                expected, actual
            ),
            Self::UploadNotAllowed => write!(f, "Uploading into this folder is not allowed"),
            Self::PathDoesntExist(path) => write!(f, "Path does not exist: {}", path.display()),
            Self::DestinationMissing(path) => {
                write!(f, "Target directory does not exist: {}", path.display())
            }
            Self::Configuration(message) => write!(f, "Invalid configuration: {}", message),
            Self::Io(err) => write!(f, "Filesystem error: {}", err),
        }
    }
}

impl From<serde_json::Error> for DriveError {
    fn from(error: serde_json::Error) -> Self {
        DriveError::JsonParseError(error)
    }
}

impl From<std::io::Error> for DriveError {
    fn from(error: std::io::Error) -> Self {
        DriveError::Io(error)
    }
}

impl From<reqwest::Error> for DriveError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            DriveError::ServerTimeout
        } else {
            DriveError::Network(error)
        }
    }
}

/// Structured error response from the backend.
#[derive(Clone, Debug)]
pub struct DriveRequestError {
    pub status: NonZeroU16,
    pub message: Option<String>,
}

impl fmt::Display for DriveRequestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "HTTP {}: {}", self.status, message),
            None => write!(f, "HTTP {}", self.status),
        }
    }
}

impl Error for DriveRequestError {}
