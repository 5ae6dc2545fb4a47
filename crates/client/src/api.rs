//! REST API client for the cleaning server.
//!
//! Wraps every HTTP endpoint the batch client consumes using [`reqwest`].
//! Success bodies may arrive bare or wrapped in the server's standard
//! envelope (`{"code": 200, "message": "success", "data": ...}`); both are
//! accepted transparently.

use cleanflow_core::batch::{Batch, ExportKind};
use cleanflow_core::lifecycle::LifecycleIntent;
use cleanflow_core::record::{
    Record, RecordPage, RecordPatch, RecordQuery, ValidationResult, NO_CHANGES_DETECTED,
};
use cleanflow_core::types::{deserialize_id, DbId};
use cleanflow_core::version::RecordVersion;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ClientConfig;

/// HTTP client for one cleaning server.
#[derive(Clone)]
pub struct CleanflowApi {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

/// Response of `POST /upload/check`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadCheck {
    #[serde(default)]
    pub exists: bool,
    /// Batch that previously stored this content, when the server says.
    #[serde(default)]
    pub batch_id: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateBatchResponse {
    #[serde(deserialize_with = "deserialize_id")]
    batch_id: DbId,
}

/// Result of `PUT /records/{id}`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateResponse {
    Updated(Record),
    /// The server reported `NO_CHANGES_DETECTED`.
    NoChanges,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A 2xx response whose envelope carries a non-success code.
    #[error("API error (code {code}): {message}")]
    Envelope { code: i64, message: String },

    /// The body did not match the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// The server refused a write because nothing would change.
    pub fn is_no_changes(&self) -> bool {
        match self {
            Self::Api { message, .. } | Self::Envelope { message, .. } => {
                message.contains(NO_CHANGES_DETECTED)
            }
            _ => false,
        }
    }
}

impl CleanflowApi {
    /// Create an API client for `api_url` (e.g. `http://host:8080/api`).
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Build a client with the configured timeout and token.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let mut api = Self::with_client(client, &config.api_url);
        api.token = config.token.clone();
        Ok(api)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// The underlying HTTP client, for callers streaming their own bodies.
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    // ---- upload ----

    /// Ask whether content with this fingerprint is already stored.
    pub async fn check_upload(&self, hash: &str) -> Result<UploadCheck, ApiError> {
        let response = self
            .request(reqwest::Method::POST, "/upload/check")
            .json(&serde_json::json!({ "hash": hash }))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Create a batch from a prepared multipart form. Returns its id.
    pub async fn create_batch(&self, form: reqwest::multipart::Form) -> Result<DbId, ApiError> {
        let response = self
            .request(reqwest::Method::POST, "/upload")
            .multipart(form)
            .send()
            .await?;
        let created: CreateBatchResponse = Self::parse_response(response).await?;
        Ok(created.batch_id)
    }

    // ---- batches ----

    pub async fn list_batches(&self) -> Result<Vec<Batch>, ApiError> {
        let response = self.request(reqwest::Method::GET, "/batches").send().await?;
        Self::parse_response(response).await
    }

    pub async fn get_batch(&self, batch_id: DbId) -> Result<Batch, ApiError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/batches/{batch_id}"))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Rename a batch (`PATCH /batches/{id} {name}`).
    pub async fn rename_batch(&self, batch_id: DbId, name: &str) -> Result<(), ApiError> {
        let response = self
            .request(reqwest::Method::PATCH, &format!("/batches/{batch_id}"))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Send a lifecycle command (`POST /batches/{id}/{pause|resume|cancel}`).
    pub async fn send_command(&self, batch_id: DbId, intent: LifecycleIntent) -> Result<(), ApiError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/batches/{batch_id}/{}", intent.as_str()),
            )
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Download link for a batch export. The file itself is produced by
    /// the server; only the URL is built here.
    pub fn export_url(&self, batch_id: DbId, kind: ExportKind) -> String {
        let mut url = self.url(&format!("/batches/{batch_id}/export"));
        if let Some(value) = kind.query_value() {
            url.push_str("?type=");
            url.push_str(value);
        }
        url
    }

    // ---- records ----

    pub async fn list_records(&self, batch_id: DbId, query: &RecordQuery) -> Result<RecordPage, ApiError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/batches/{batch_id}/records"))
            .query(&query.to_query_pairs())
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Dry-run an edit against the server's cleaning rules.
    pub async fn validate_record(
        &self,
        record_id: DbId,
        updates: &RecordPatch,
    ) -> Result<ValidationResult, ApiError> {
        let response = self
            .request(reqwest::Method::POST, &format!("/records/{record_id}/validate"))
            .json(&serde_json::json!({ "updates": updates }))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Apply an edit. A `NO_CHANGES_DETECTED` answer is not an error.
    pub async fn update_record(
        &self,
        record_id: DbId,
        updates: &RecordPatch,
        reason: &str,
    ) -> Result<UpdateResponse, ApiError> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/records/{record_id}"))
            .json(&serde_json::json!({ "updates": updates, "reason": reason }))
            .send()
            .await?;
        match Self::parse_response::<Record>(response).await {
            Ok(record) => Ok(UpdateResponse::Updated(record)),
            Err(e) if e.is_no_changes() => Ok(UpdateResponse::NoChanges),
            Err(e) => Err(e),
        }
    }

    pub async fn rollback_record(&self, record_id: DbId, version_id: DbId) -> Result<Record, ApiError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/records/{record_id}/rollback/{version_id}"),
            )
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- history ----

    pub async fn record_history(&self, record_id: DbId) -> Result<Vec<RecordVersion>, ApiError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/records/{record_id}/history"))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    pub async fn update_version_reason(&self, version_id: DbId, reason: &str) -> Result<(), ApiError> {
        let response = self
            .request(reqwest::Method::PATCH, &format!("/versions/{version_id}/reason"))
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await?;
        Self::check_status(response).await
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Ensure the response has a success status code, turning the body
    /// into an [`ApiError::Api`] otherwise.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body, unwrapping the envelope.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        let body: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok(serde_json::from_value(unwrap_envelope(body)?)?)
    }

    /// Assert the response has a success status code and, if it carries an
    /// envelope, a success code.
    async fn check_status(response: reqwest::Response) -> Result<(), ApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        if let Ok(body) = serde_json::from_slice::<Value>(&bytes) {
            unwrap_envelope(body)?;
        }
        Ok(())
    }
}

/// Envelope bodies carry a numeric `code` next to `data`, `message` or `error`.
fn is_envelope(map: &serde_json::Map<String, Value>) -> bool {
    map.get("code").is_some_and(Value::is_i64)
        && (map.contains_key("data") || map.contains_key("message") || map.contains_key("error"))
}

fn unwrap_envelope(body: Value) -> Result<Value, ApiError> {
    match body {
        Value::Object(mut map) if is_envelope(&map) => {
            let code = map.get("code").and_then(Value::as_i64).unwrap_or(200);
            if code != 200 {
                let message = map
                    .get("error")
                    .or_else(|| map.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(ApiError::Envelope { code, message });
            }
            Ok(map.remove("data").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map
            .get("error")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        _ => body.to_string(),
    }
}
