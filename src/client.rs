use std::{num::NonZeroU16, path::Path, time::Duration};

use reqwest::{
    header::{HeaderMap, AUTHORIZATION, RETRY_AFTER},
    Method, RequestBuilder, Response,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{
    definitions::{
        bodies::{CreateFolderBody, LoginBody, UltraDownloadBody},
        responses::{
            CanUploadResponse, DiscordSettings, FolderCreatedResponse, FragmentUrlResponse,
            LoginResponse, UserProfile,
        },
        shared::FileInfo,
    },
    error::{DriveError, DriveRequestError},
    util::StateCell,
};

/// Default backend location; override per client when self-hosting.
pub const DEFAULT_BASE_URL: &str = "https://api.ultradrive.app/api";

/// Header carrying the password of a locked resource.
pub(crate) const RESOURCE_PASSWORD_HEADER: &str = "x-resource-password";

/// Fallback wait for throttle responses without a usable `Retry-After`.
pub(crate) const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(2);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const HOST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the attachment host: bounded connect and read stalls, but no
/// total-request deadline, since fragments and packed requests can be
/// large.
pub(crate) fn host_client() -> Result<reqwest::Client, DriveError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(HOST_TIMEOUT)
        .read_timeout(HOST_TIMEOUT)
        .build()?)
}

/// Authenticated session, also the payload of the on-disk token cache.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthSession {
    pub auth_token: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Typed client for the backend REST surface.
///
/// A plain value passed explicitly to everything that talks to the backend;
/// there is no process-global configuration. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct DriveClient {
    http: reqwest::Client,
    base_url: String,
    auth: StateCell<Option<AuthSession>>,
}

impl DriveClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DriveError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: StateCell::new(None),
        })
    }

    /// Client that reuses an existing token instead of logging in.
    pub fn with_token(
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Result<Self, DriveError> {
        let client = Self::new(base_url)?;
        client.auth.set(Some(AuthSession {
            auth_token: auth_token.into(),
            device_id: None,
        }));
        Ok(client)
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.auth.get()
    }

    pub async fn login(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<AuthSession, DriveError> {
        let body = LoginBody::builder()
            .username(username)
            .password(password)
            .build();

        let response = self
            .http
            .post(self.endpoint("auth/token/login"))
            .json(&body)
            .send()
            .await;

        let login: LoginResponse = Self::handle_response(response).await?;
        let session = AuthSession {
            auth_token: login.auth_token,
            device_id: Some(login.device_id),
        };
        self.auth.set(Some(session.clone()));
        Ok(session)
    }

    /// Reuses the session cached at `cache_path` (`auth_token.json`) when
    /// present, otherwise logs in and rewrites the cache.
    pub async fn login_cached(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
        cache_path: &Path,
    ) -> Result<AuthSession, DriveError> {
        if let Some(session) = load_token_cache(cache_path).await {
            self.auth.set(Some(session.clone()));
            return Ok(session);
        }

        let session = self.login(username, password).await?;
        save_token_cache(cache_path, &session).await?;
        Ok(session)
    }

    pub async fn fetch_user_profile(&self) -> Result<UserProfile, DriveError> {
        let response = self.request(Method::GET, "user/me").send().await;
        Self::handle_response(response).await
    }

    pub async fn fetch_discord_settings(&self) -> Result<DiscordSettings, DriveError> {
        let response = self.request(Method::GET, "user/discordSettings").send().await;
        Self::handle_response(response).await
    }

    pub async fn check_can_upload(
        &self,
        folder_id: &str,
        password: Option<&str>,
    ) -> Result<CanUploadResponse, DriveError> {
        let response = self
            .request_locked(Method::GET, &format!("user/canUpload/{folder_id}"), password)
            .send()
            .await;
        Self::handle_response(response).await
    }

    /// `POST items/ultraDownload` — resolves items into per-file fragment
    /// plans.
    pub async fn fetch_download_plan(
        &self,
        body: UltraDownloadBody,
    ) -> Result<Vec<FileInfo>, DriveError> {
        let response = self
            .request(Method::POST, "items/ultraDownload")
            .json(&body)
            .send()
            .await;
        Self::handle_response(response).await
    }

    /// Resolves one fragment into a signed, short-lived URL on the
    /// attachment host.
    pub async fn fetch_fragment_url(
        &self,
        attachment_id: &str,
        password: Option<&str>,
    ) -> Result<String, DriveError> {
        let response = self
            .request_locked(
                Method::GET,
                &format!("items/ultraDownload/attachments/{attachment_id}"),
                password,
            )
            .send()
            .await;
        let resolved: FragmentUrlResponse = Self::handle_response(response).await?;
        Ok(resolved.url)
    }

    pub async fn create_folder(
        &self,
        body: CreateFolderBody,
        password: Option<&str>,
    ) -> Result<FolderCreatedResponse, DriveError> {
        let response = self
            .request_locked(Method::POST, "folders/create", password)
            .json(&body)
            .send()
            .await;
        Self::handle_response(response).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, self.endpoint(path));
        if let Some(session) = self.auth.get() {
            builder = builder.header(AUTHORIZATION, format!("Token {}", session.auth_token));
        }
        builder
    }

    fn request_locked(
        &self,
        method: Method,
        path: &str,
        password: Option<&str>,
    ) -> RequestBuilder {
        let mut builder = self.request(method, path);
        if let Some(password) = password {
            builder = builder.header(RESOURCE_PASSWORD_HEADER, password);
        }
        builder
    }

    async fn handle_response<T: DeserializeOwned>(
        response: Result<Response, reqwest::Error>,
    ) -> Result<T, DriveError> {
        let response = response?;
        let status = response.status();

        if status.is_success() {
            let text = response.text().await?;
            return serde_json::from_str(&text).map_err(DriveError::JsonParseError);
        }

        match status.as_u16() {
            401 => Err(DriveError::Unauthorized),
            429 => Err(DriveError::RateLimit {
                wait: retry_after_wait(response.headers()),
            }),
            503 => Err(DriveError::ServiceUnavailable {
                wait: DEFAULT_RETRY_WAIT,
            }),
            code => {
                let message = response.text().await.ok().filter(|text| !text.is_empty());
                Err(DriveError::RequestError(DriveRequestError {
                    status: NonZeroU16::new(code).expect("HTTP status is non-zero"),
                    message,
                }))
            }
        }
    }
}

/// `Retry-After` in whole seconds when numeric, otherwise the fallback.
pub(crate) fn retry_after_wait(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_WAIT)
}

async fn load_token_cache(path: &Path) -> Option<AuthSession> {
    let raw = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&raw).ok()
}

async fn save_token_cache(path: &Path, session: &AuthSession) -> Result<(), DriveError> {
    let raw = serde_json::to_vec(session)?;
    tokio::fs::write(path, raw).await?;
    Ok(())
}
