use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// At-rest encryption applied to file content before it reaches the
/// attachment host. Serialized as its numeric discriminant on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EncryptionMethod {
    Plain,
    AesCtr,
    ChaCha20,
}

impl TryFrom<u8> for EncryptionMethod {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Plain),
            1 => Ok(Self::AesCtr),
            2 => Ok(Self::ChaCha20),
            other => Err(format!("unknown encryption method: {other}")),
        }
    }
}

impl From<EncryptionMethod> for u8 {
    fn from(value: EncryptionMethod) -> Self {
        match value {
            EncryptionMethod::Plain => 0,
            EncryptionMethod::AesCtr => 1,
            EncryptionMethod::ChaCha20 => 2,
        }
    }
}

/// One contiguous byte range of a file, stored as a single attachment on
/// the host. Immutable once fetched.
#[derive(Clone, Debug, Deserialize)]
pub struct FragmentInfo {
    pub message_id: String,
    pub attachment_id: String,
    pub offset: u64,
    /// 1-based, dense within a file.
    pub sequence: u32,
    pub size: u64,
}

/// Download plan for one file, as returned by the metadata endpoint.
///
/// Fragments arrive ordered by sequence; `sum(fragments[i].size) == size`
/// and every offset equals the sum of the sizes before it. The resource
/// password is injected client-side after the fetch.
#[derive(Clone, Debug, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub encryption_method: EncryptionMethod,
    pub size: u64,
    pub crc: u32,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub iv: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub fragments: Vec<FragmentInfo>,
}

/// Minimal descriptor of an item (file or folder) to download. The
/// higher-level object model resolves its own ids and resource passwords
/// before handing items to the engine.
#[derive(Clone, Debug)]
pub struct DownloadItem {
    pub id: String,
    pub lock_from: Option<String>,
    pub password: Option<String>,
}

impl DownloadItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lock_from: None,
            password: None,
        }
    }

    pub fn locked(
        id: impl Into<String>,
        lock_from: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            lock_from: Some(lock_from.into()),
            password: Some(password.into()),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WebhookChannel {
    pub id: String,
    pub name: String,
}

/// Attachment-host webhook the uploader posts through.
#[derive(Clone, Debug, Deserialize)]
pub struct Webhook {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub discord_id: Option<String>,
    #[serde(default)]
    pub channel: Option<WebhookChannel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encryption_method_round_trips_through_discriminant() {
        for method in [
            EncryptionMethod::Plain,
            EncryptionMethod::AesCtr,
            EncryptionMethod::ChaCha20,
        ] {
            let wire = u8::from(method);
            assert_eq!(EncryptionMethod::try_from(wire), Ok(method));
        }
        assert!(EncryptionMethod::try_from(7).is_err());
    }

    #[test]
    fn file_info_deserializes_from_plan_json() {
        let raw = serde_json::json!({
            "id": "f-1",
            "name": "report.bin",
            "encryption_method": 1,
            "size": 30,
            "crc": 305419896u32,
            "key": "a2V5",
            "iv": "aXY=",
            "fragments": [
                {"message_id": "m1", "attachment_id": "a1", "offset": 0, "sequence": 1, "size": 10},
                {"message_id": "m2", "attachment_id": "a2", "offset": 10, "sequence": 2, "size": 20}
            ]
        });

        let info: FileInfo = serde_json::from_value(raw).expect("valid plan");
        assert_eq!(info.encryption_method, EncryptionMethod::AesCtr);
        assert_eq!(info.fragments.len(), 2);
        assert_eq!(info.fragments[1].offset, 10);
        assert!(info.password.is_none());
    }
}
