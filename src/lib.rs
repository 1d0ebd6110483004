pub mod cipher;
pub mod client;
pub mod definitions;
pub mod downloader;
pub mod error;
pub mod uploader;
pub mod util;

pub use reqwest;

pub use cipher::SeekableCipher;
pub use client::{AuthSession, DriveClient, DEFAULT_BASE_URL};
pub use definitions::shared::{DownloadItem, EncryptionMethod, FileInfo, FragmentInfo};
pub use downloader::{UltraDownloader, UltraDownloaderOptions};
pub use error::DriveError;
pub use uploader::{UltraUploader, UltraUploaderOptions};
pub use util::DriveCallback;
