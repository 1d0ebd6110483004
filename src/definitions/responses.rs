use std::collections::HashMap;

use serde::Deserialize;

use super::shared::Webhook;

#[derive(Clone, Debug, Deserialize)]
pub struct LoginResponse {
    pub auth_token: String,
    pub device_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UserProfile {
    pub user: UserSummary,
    pub settings: UserSettings,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UserSummary {
    #[serde(default)]
    pub name: Option<String>,
    /// Id of the account's root folder.
    pub root: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    /// Per-request payload ceiling on the attachment host.
    pub max_discord_message_size: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BotInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub discord_id: Option<String>,
}

/// Attachment-host capacity for the account.
#[derive(Clone, Debug, Deserialize)]
pub struct DiscordSettings {
    #[serde(default)]
    pub bots: Vec<BotInfo>,
    #[serde(default)]
    pub webhooks: Vec<Webhook>,
    #[serde(default)]
    pub attachment_name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
}

impl DiscordSettings {
    /// Download concurrency ceiling: two parallel streams per registered bot.
    pub fn suggested_download_workers(&self) -> usize {
        (self.bots.len() * 2).max(1)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CanUploadResponse {
    pub can_upload: bool,
    #[serde(rename = "lockFrom", default)]
    pub lock_from: Option<String>,
    #[serde(default)]
    pub webhooks: Vec<Webhook>,
    pub attachment_name: String,
    #[serde(default)]
    pub extensions: HashMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FragmentUrlResponse {
    /// Signed, short-lived URL for one fragment on the attachment host.
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FolderCreatedResponse {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}
