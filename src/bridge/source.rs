//! Remote log API client.
//!
//! The API returns `{"new_lines": [...]}` where each entry is either a bare string
//! or an object. Both shapes are normalised into [`RawLogLine`] here so nothing
//! downstream needs to care which one the server sent.

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("mcbridge/", env!("CARGO_PKG_VERSION"));
const NEW_LOGS_PATH: &str = "get_new_logs";
const ERROR_BODY_PREVIEW_CHARS: usize = 200;

/// One log line as delivered by the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogLine {
    pub content: String,
    pub timestamp: Option<String>,
    pub sequence: Option<u64>,
}

impl RawLogLine {
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            timestamp: None,
            sequence: None,
        }
    }

    /// Stable key used by the seen-log store.
    ///
    /// Shape is `<epoch>-<rest>` whenever the timestamp can be read as a point in
    /// time, so the store can age the entry out. Without timestamp or sequence the
    /// content itself is the key, and two identical lines collapse into one.
    pub fn identifier(&self) -> String {
        let rest = match self.sequence {
            Some(seq) => format!("#{seq}:{}", self.content),
            None => self.content.clone(),
        };

        match self.timestamp.as_deref().map(str::trim) {
            Some(ts) if !ts.is_empty() => format!("{}-{rest}", normalize_timestamp(ts)),
            _ => rest,
        }
    }
}

/// Numeric timestamps are kept verbatim, RFC 3339 ones become `secs.micros`,
/// anything else is passed through untouched.
fn normalize_timestamp(ts: &str) -> String {
    if ts.parse::<f64>().is_ok() {
        return ts.to_string();
    }
    match DateTime::parse_from_rfc3339(ts) {
        Ok(dt) => format!("{}.{:06}", dt.timestamp(), dt.timestamp_subsec_micros()),
        Err(_) => ts.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct NewLogsResponse {
    #[serde(default)]
    new_lines: Option<Vec<LogEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LogEntry {
    Text(String),
    Structured(StructuredEntry),
    Other(Value),
}

/// Object entry. Fields are kept loose so one odd value never costs the whole line.
#[derive(Debug, Default, Deserialize)]
struct StructuredEntry {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    line: Option<Value>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    line_number: Option<Value>,
    #[serde(default)]
    sequence: Option<Value>,
}

fn non_empty_text(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Accepts `7`, `7.0` and `"7"`.
fn sequence_number(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl LogEntry {
    fn into_raw(self) -> Option<RawLogLine> {
        match self {
            LogEntry::Text(content) => Some(RawLogLine::from_content(content)),
            LogEntry::Structured(entry) => {
                let sequence = sequence_number(entry.line_number.as_ref())
                    .or_else(|| sequence_number(entry.sequence.as_ref()));
                let timestamp = match entry.timestamp {
                    Some(Value::String(s)) => Some(s),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                };
                let Some(content) =
                    non_empty_text(entry.content).or_else(|| non_empty_text(entry.line))
                else {
                    warn!(
                        "Dropping log entry without text (timestamp {:?}, sequence {:?})",
                        timestamp, sequence
                    );
                    return None;
                };
                Some(RawLogLine {
                    content,
                    timestamp,
                    sequence,
                })
            }
            LogEntry::Other(value) => {
                warn!("Dropping log entry with unexpected shape: {:.200}", value.to_string());
                None
            }
        }
    }
}

/// Parse a `get_new_logs` response body into normalised lines, keeping order.
pub fn parse_new_lines(body: &str) -> Result<Vec<RawLogLine>, FetchError> {
    let response: NewLogsResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(response
        .new_lines
        .unwrap_or_default()
        .into_iter()
        .filter(|entry| !matches!(entry, LogEntry::Text(s) if s.is_empty()))
        .filter_map(LogEntry::into_raw)
        .collect())
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("log API rejected the credentials (HTTP {0})")]
    Unauthorized(u16),
    #[error("log API endpoint not found: {0}")]
    NotFound(String),
    #[error("log API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request to log API timed out")]
    Timeout,
    #[error("could not connect to log API: {0}")]
    Connect(String),
    #[error("could not decode log API response: {0}")]
    Decode(String),
    #[error("log API request failed: {0}")]
    Request(String),
}

impl FetchError {
    /// Auth failures end the bridge session; everything else is retried next tick.
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_))
    }
}

/// Where new log lines come from.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch_new_lines(&self) -> Result<Vec<RawLogLine>, FetchError>;

    /// Whether a client session is currently open. Used by diagnostics.
    fn session_open(&self) -> bool {
        true
    }

    fn endpoint(&self) -> Option<&str> {
        None
    }
}

/// HTTP implementation against `<base_url>/get_new_logs`.
pub struct HttpLogSource {
    endpoint: String,
    token: String,
    timeout: Duration,
    client: Mutex<Option<reqwest::Client>>,
}

impl HttpLogSource {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Self {
        Self {
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), NEW_LOGS_PATH),
            token: token.to_string(),
            timeout,
            client: Mutex::new(None),
        }
    }

    /// Returns the shared client, building it on first use or after a reset.
    fn client(&self) -> Result<reqwest::Client, FetchError> {
        let mut slot = self
            .client
            .lock()
            .map_err(|_| FetchError::Request("client mutex is poisoned".to_string()))?;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        info!("Opening HTTP session for log API at {}", self.endpoint);
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Drop the session so the next fetch starts from a fresh connection pool.
    fn reset_client(&self) {
        if let Ok(mut slot) = self.client.lock() {
            if slot.take().is_some() {
                debug!("HTTP session for log API closed");
            }
        }
    }

    fn map_request_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            self.reset_client();
            FetchError::Connect(err.to_string())
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl LogSource for HttpLogSource {
    async fn fetch_new_lines(&self) -> Result<Vec<RawLogLine>, FetchError> {
        let client = self.client()?;
        debug!("GET {}", self.endpoint);

        let response = client
            .get(&self.endpoint)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| self.map_request_error(e))?;
                parse_new_lines(&body)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FetchError::Unauthorized(status.as_u16()))
            }
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(self.endpoint.clone())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(FetchError::Status {
                    status: status.as_u16(),
                    body: body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect(),
                })
            }
        }
    }

    fn session_open(&self) -> bool {
        self.client.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.endpoint)
    }
}
