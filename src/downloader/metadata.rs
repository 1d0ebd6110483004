use std::{collections::HashMap, sync::Arc};

use crate::{
    client::DriveClient,
    definitions::{
        bodies::UltraDownloadBody,
        shared::{DownloadItem, FileInfo},
    },
    error::DriveError,
};

/// Resolves items into per-file fragment plans through the metadata
/// endpoint. Stateless.
#[derive(Debug)]
pub struct MetadataFetcher {
    client: Arc<DriveClient>,
}

impl MetadataFetcher {
    pub fn new(client: Arc<DriveClient>) -> Self {
        Self { client }
    }

    /// One POST for the whole batch. The resource password of each item is
    /// injected into the files it resolved to, since fragment URL fetches
    /// need it later.
    pub async fn fetch_files(&self, items: &[DownloadItem]) -> Result<Vec<FileInfo>, DriveError> {
        let ids = items.iter().map(|item| item.id.clone()).collect();

        let mut required_passwords = HashMap::new();
        for item in items {
            if let (Some(lock_from), Some(password)) = (&item.lock_from, &item.password) {
                required_passwords
                    .entry(lock_from.clone())
                    .or_insert_with(|| password.clone());
            }
        }

        let body = UltraDownloadBody::builder()
            .ids(ids)
            .required_passwords(required_passwords)
            .build();
        let mut files = self.client.fetch_download_plan(body).await?;

        let passwords: HashMap<&str, &str> = items
            .iter()
            .filter_map(|item| {
                item.password
                    .as_deref()
                    .map(|password| (item.id.as_str(), password))
            })
            .collect();

        for file in &mut files {
            if file.password.is_none() {
                file.password = passwords.get(file.id.as_str()).map(|p| p.to_string());
            }
        }

        Ok(files)
    }
}
