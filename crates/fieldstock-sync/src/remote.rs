//! # Remote Sync Client
//!
//! Talks to the remote authority over HTTP.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Incremental path                                                      │
//! │    POST {base}/api/inventory      body: payload + schema_version      │
//! │    POST {base}/api/transactions   headers: Authorization: Bearer ..   │
//! │    POST {base}/api/transfers               Idempotency-Key: {id}      │
//! │                                                                         │
//! │  Bulk path                                                             │
//! │    GET  {base}/{central}/download  → snapshot blob                    │
//! │    POST {base}/{central}/upload    ← multipart part "file"            │
//! │                                                                         │
//! │  Reachability                                                          │
//! │    HEAD {base}                     any HTTP answer = reachable        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any 2xx is success. Non-2xx responses become `TransportError::Http` with
//! the authority's `{"error": "..."}` text passed through verbatim.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use fieldstock_core::Record;

use crate::config::parse_base_url;
use crate::connectivity::{ReachabilityProbe, DEFAULT_PROBE_TIMEOUT};
use crate::error::{EngineResult, SyncError, TransportError};

/// Header carrying the record id so the authority can drop replays.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Multipart field name of the uploaded snapshot.
pub const SNAPSHOT_PART_NAME: &str = "file";

const SNAPSHOT_FILE_NAME: &str = "snapshot.fsnp";
const MAX_ERROR_BODY_CHARS: usize = 200;

// =============================================================================
// Client Trait
// =============================================================================

/// Operations the coordinator needs from the authority.
#[async_trait]
pub trait RemoteSyncClient: Send + Sync {
    /// Pushes one record to its kind's endpoint.
    async fn push_record(&self, record: &Record) -> Result<(), TransportError>;

    /// Downloads the authority's full snapshot.
    async fn pull_snapshot(&self) -> Result<Vec<u8>, TransportError>;

    /// Uploads a merged snapshot.
    async fn push_snapshot(&self, blob: Vec<u8>) -> Result<(), TransportError>;
}

// =============================================================================
// Token Sources
// =============================================================================

/// Supplies the bearer token for each request.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<String, TransportError>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Result<String, TransportError> {
        if self.0.is_empty() {
            return Err(TransportError::Auth("bearer token is empty".into()));
        }
        Ok(self.0.clone())
    }
}

/// Reads the token from an environment variable on every request, so a
/// rotated token is picked up without a restart.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        EnvToken { var: var.into() }
    }
}

impl TokenSource for EnvToken {
    fn token(&self) -> Result<String, TransportError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.is_empty() => Ok(token),
            _ => Err(TransportError::Auth(format!(
                "environment variable {} is not set",
                self.var
            ))),
        }
    }
}

// =============================================================================
// Remote Configuration
// =============================================================================

/// Settings for `HttpRemoteClient`.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL without trailing slash.
    pub base_url: String,

    /// Path segment of the snapshot endpoints, without slashes.
    pub central_path: String,

    /// Timeout for record pushes.
    pub request_timeout: Duration,

    /// Timeout for snapshot download/upload.
    pub snapshot_timeout: Duration,

    /// Timeout for the reachability probe (also the connect timeout).
    pub probe_timeout: Duration,
}

impl RemoteConfig {
    /// Validates the base URL and applies defaults.
    pub fn new(base_url: &str) -> EngineResult<Self> {
        parse_base_url(base_url)?;
        Ok(RemoteConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            central_path: "central".to_string(),
            request_timeout: Duration::from_secs(30),
            snapshot_timeout: Duration::from_secs(30),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        })
    }

    pub fn central_path(mut self, path: &str) -> Self {
        self.central_path = path.trim_matches('/').to_string();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn record_url(&self, record: &Record) -> String {
        format!("{}/api/{}", self.base_url, record.entity_kind.endpoint())
    }

    fn snapshot_url(&self, action: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.central_path, action)
    }
}

// =============================================================================
// HTTP Client
// =============================================================================

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// `RemoteSyncClient` over reqwest.
pub struct HttpRemoteClient {
    client: reqwest::Client,
    config: RemoteConfig,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl fmt::Debug for HttpRemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemoteClient")
            .field("config", &self.config)
            .field("authenticated", &self.tokens.is_some())
            .finish()
    }
}

impl HttpRemoteClient {
    /// Builds the client. Without a token source requests are sent
    /// unauthenticated.
    pub fn new(config: RemoteConfig, tokens: Option<Arc<dyn TokenSource>>) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.probe_timeout)
            .user_agent(concat!("fieldstock/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpRemoteClient {
            client,
            config,
            tokens,
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn auth_headers(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        if let Some(tokens) = &self.tokens {
            let token = tokens.token()?;
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| TransportError::Auth("Invalid bearer token format".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Turns a non-2xx response into `TransportError::Http`.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Http {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }
}

#[async_trait]
impl RemoteSyncClient for HttpRemoteClient {
    async fn push_record(&self, record: &Record) -> Result<(), TransportError> {
        let url = self.config.record_url(record);
        let timeout = self.config.request_timeout;

        let mut headers = self.auth_headers()?;
        let key = HeaderValue::from_str(&record.id)
            .map_err(|_| TransportError::Encoding(format!("record id '{}'", record.id)))?;
        headers.insert(IDEMPOTENCY_KEY_HEADER, key);

        let body = record.typed_payload().map_err(|e| TransportError::Encoding(e.to_string()))?;

        debug!(record_id = %record.id, url = %url, "Pushing record");

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .timeout(timeout)
            .json(&body.to_wire())
            .send()
            .await
            .map_err(|e| map_request_error(e, timeout))?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn pull_snapshot(&self) -> Result<Vec<u8>, TransportError> {
        let url = self.config.snapshot_url("download");
        let timeout = self.config.snapshot_timeout;

        debug!(url = %url, "Downloading snapshot");

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers()?)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_request_error(e, timeout))?;

        let response = Self::check_status(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_request_error(e, timeout))?;

        debug!(bytes = bytes.len(), "Snapshot downloaded");
        Ok(bytes.to_vec())
    }

    async fn push_snapshot(&self, blob: Vec<u8>) -> Result<(), TransportError> {
        let url = self.config.snapshot_url("upload");
        let timeout = self.config.snapshot_timeout;
        let size = blob.len();

        let part = Part::bytes(blob)
            .file_name(SNAPSHOT_FILE_NAME)
            .mime_str("application/octet-stream")
            .map_err(|e| TransportError::Encoding(e.to_string()))?;
        let form = Form::new().part(SNAPSHOT_PART_NAME, part);

        debug!(url = %url, bytes = size, "Uploading snapshot");

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .timeout(timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_request_error(e, timeout))?;

        Self::check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ReachabilityProbe for HttpRemoteClient {
    async fn probe(&self) -> bool {
        match self
            .client
            .head(&self.config.base_url)
            .timeout(self.config.probe_timeout)
            .send()
            .await
        {
            Ok(response) => {
                debug!(status = %response.status(), "Authority answered probe");
                true
            }
            Err(e) => {
                debug!(error = %e, "Authority probe failed");
                false
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn map_request_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_decode() || err.is_builder() {
        TransportError::Encoding(err.to_string())
    } else {
        if !err.is_connect() && !err.is_request() {
            warn!(error = %err, "Unclassified transport error");
        }
        TransportError::Unreachable(err.to_string())
    }
}

/// The authority's `{error}` text if present, else a short body preview.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error;
    }

    let body = body.trim();
    if body.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }

    let mut preview: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(StatusCode::CONFLICT, r#"{"error":"sku BOLT-M8 exists"}"#),
            "sku BOLT-M8 exists"
        );
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, ""),
            "Internal Server Error"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down\n"), "upstream down");

        let long = "x".repeat(500);
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, &long).len(),
            MAX_ERROR_BODY_CHARS + 3
        );
    }

    #[test]
    fn test_urls() {
        let config = RemoteConfig::new("https://stock.example.com/")
            .unwrap()
            .central_path("/central/");
        assert_eq!(config.base_url, "https://stock.example.com");
        assert_eq!(
            config.snapshot_url("download"),
            "https://stock.example.com/central/download"
        );
        assert!(RemoteConfig::new("ws://stock.example.com").is_err());
    }

    #[test]
    fn test_token_sources() {
        assert_eq!(StaticToken::new("abc").token().unwrap(), "abc");
        assert!(matches!(
            StaticToken::new("").token(),
            Err(TransportError::Auth(_))
        ));
        assert!(matches!(
            EnvToken::new("FIELDSTOCK_TEST_TOKEN_THAT_IS_NEVER_SET").token(),
            Err(TransportError::Auth(_))
        ));
        assert_eq!(format!("{:?}", StaticToken::new("secret")), "StaticToken(***)");
    }
}
