//! Remote API client used to replay queued operations.

use std::future::Future;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::config::SyncSettings;
use crate::models::{OperationKind, SyncOperation, SyncPayload};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Remote rejected request: {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

impl RemoteError {
    /// The remote refused the change because it conflicts with its state
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Rejected { status: 409, .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// One HTTP call derived from a queued operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `/api/cards/{id}`
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl RemoteRequest {
    /// create → `POST /api/{table}`, update → `PUT /api/{table}/{id}`,
    /// delete → `DELETE /api/{table}/{id}`
    pub fn from_operation(operation: &SyncOperation) -> serde_json::Result<Self> {
        let (method, path) = match operation.operation {
            OperationKind::Create => (Method::POST, operation.table_name.collection_path()),
            OperationKind::Update => (
                Method::PUT,
                operation.table_name.resource_path(&operation.record_id),
            ),
            OperationKind::Delete => (
                Method::DELETE,
                operation.table_name.resource_path(&operation.record_id),
            ),
        };
        let body = operation
            .data
            .as_ref()
            .map(SyncPayload::to_body)
            .transpose()?;

        Ok(Self { method, path, body })
    }
}

/// Remote endpoint for record mutations.
///
/// Only the success or failure of a call matters; response bodies are not
/// interpreted.
pub trait RemoteApi: Send + Sync + 'static {
    fn send(&self, request: RemoteRequest) -> impl Future<Output = RemoteResult<()>> + Send;
}

/// `reqwest`-backed [`RemoteApi`]
#[derive(Clone)]
pub struct HttpRemoteApi {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteApi {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteApi")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteApi {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Option<Duration>,
    ) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            base_url,
            auth_token: normalize_text_option(auth_token),
            client: builder.build()?,
        })
    }

    pub fn from_settings(settings: &SyncSettings) -> RemoteResult<Self> {
        let base_url = settings.api_base_url.clone().ok_or_else(|| {
            RemoteError::InvalidConfiguration("api_base_url is not configured".to_string())
        })?;
        Self::new(
            base_url,
            settings.auth_token.clone(),
            settings.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl RemoteApi for HttpRemoteApi {
    async fn send(&self, request: RemoteRequest) -> RemoteResult<()> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("api_base_url must not be empty".to_string())
    })?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "api_base_url must include http:// or https://".to_string(),
        ))
    }
}
