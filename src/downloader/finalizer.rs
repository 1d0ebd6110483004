use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    cipher::SeekableCipher,
    definitions::shared::{EncryptionMethod, FileInfo},
    downloader::state::{part_path, FileRecord},
    error::DriveError,
};

const DECRYPT_CHUNK: usize = 8 * 1024;
const CRC_CHUNK: usize = 64 * 1024;

/// Turns a directory of `.part` files into the verified plaintext file.
///
/// Pure disk work, single-threaded per file: merge in sequence order,
/// decrypt (a plain file is renamed instead of copied), drop the redundant
/// intermediates, then verify the CRC of the decrypted output against the
/// plan.
#[derive(Debug, Default)]
pub struct FileFinalizer;

impl FileFinalizer {
    pub async fn finalize(&self, record: &FileRecord) -> Result<(), DriveError> {
        let info = &record.file_info;
        let fragment_count = info.fragments.len() as u32;

        if !tokio::fs::try_exists(&record.merged_path).await? {
            self.merge_parts(&record.file_dir, &record.merged_path, fragment_count)
                .await?;
        }

        self.decrypt(info, &record.merged_path, &record.output_path)
            .await?;
        self.remove_parts(&record.file_dir, fragment_count).await;
        self.verify_crc(&record.output_path, info.crc).await?;

        Ok(())
    }

    async fn merge_parts(
        &self,
        file_dir: &Path,
        merged_path: &Path,
        count: u32,
    ) -> Result<(), DriveError> {
        let mut merged = tokio::fs::File::create(merged_path).await?;
        for sequence in 1..=count {
            let mut part = tokio::fs::File::open(part_path(file_dir, sequence)).await?;
            tokio::io::copy(&mut part, &mut merged).await?;
        }
        merged.flush().await?;
        Ok(())
    }

    async fn decrypt(
        &self,
        info: &FileInfo,
        input: &Path,
        output: &Path,
    ) -> Result<(), DriveError> {
        if info.encryption_method == EncryptionMethod::Plain {
            tokio::fs::rename(input, output).await?;
            return Ok(());
        }

        let key = decode_material(info.key.as_deref(), "key")?;
        let iv = decode_material(info.iv.as_deref(), "iv")?;
        let mut cipher =
            SeekableCipher::new(info.encryption_method, Some(&key), Some(&iv), 0)?;

        let mut reader = tokio::fs::File::open(input).await?;
        let mut writer = tokio::fs::File::create(output).await?;
        let mut buffer = vec![0u8; DECRYPT_CHUNK];

        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            cipher.transform(&mut buffer[..read]);
            writer.write_all(&buffer[..read]).await?;
        }

        let tail = cipher.finalize();
        if !tail.is_empty() {
            writer.write_all(&tail).await?;
        }
        writer.flush().await?;

        tokio::fs::remove_file(input).await?;
        Ok(())
    }

    async fn verify_crc(&self, path: &Path, expected: u32) -> Result<(), DriveError> {
        let mut reader = tokio::fs::File::open(path).await?;
        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = vec![0u8; CRC_CHUNK];

        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        let actual = hasher.finalize();
        if actual != expected {
            return Err(DriveError::CrcMismatch { expected, actual });
        }
        Ok(())
    }

    async fn remove_parts(&self, file_dir: &Path, count: u32) {
        for sequence in 1..=count {
            tokio::fs::remove_file(part_path(file_dir, sequence))
                .await
                .ok();
        }
    }
}

fn decode_material(value: Option<&str>, name: &str) -> Result<Vec<u8>, DriveError> {
    let value = value.ok_or_else(|| {
        DriveError::Configuration(format!("encrypted file is missing its {name}"))
    })?;
    general_purpose::STANDARD
        .decode(value)
        .map_err(|_| DriveError::Configuration(format!("file {name} is not valid base64")))
}
