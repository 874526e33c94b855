//! Transport trait and implementations
//!
//! The backend boundary is a trait so the session, pipeline, and
//! reconciliation layers can be exercised against a scripted fake.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;
use crate::Result;
use crate::config::Config;
use crate::error::Error;
use super::call::{ApiCall, ApiResponse, Method};

/// Transport trait - executes one described call against the backend
///
/// `access_token` is attached as a bearer credential when present.
/// Implementations report transport-level failures (connect, timeout) as
/// errors; any response the backend actually produced, including non-2xx,
/// comes back as an [`ApiResponse`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, call: &ApiCall, access_token: Option<&str>) -> Result<ApiResponse>;
}

/// HTTP transport over reqwest
#[derive(Clone)]
pub struct HttpTransport {
    base_url: Url,
    client: Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid API URL {:?}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.api_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, call: &ApiCall, access_token: Option<&str>) -> Result<ApiResponse> {
        let url = self
            .base_url
            .join(&call.path)
            .map_err(|e| Error::InvalidInput(format!("Invalid request path {:?}: {}", call.path, e)))?;

        let mut request = match call.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        };

        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        if let Some(ref body) = call.body {
            request = request.json(body);
        }

        for (name, value) in &call.headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        // Non-JSON bodies are kept verbatim so error normalization still
        // has something to report.
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        tracing::debug!(
            method = call.method.as_str(),
            path = %call.path,
            status,
            "backend response"
        );

        Ok(ApiResponse::new(status, body))
    }
}

/// One call observed by the fake transport
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub token: Option<String>,
    pub body: Option<Value>,
}

/// Fake transport for testing - replays scripted responses in order
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<ApiResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeTransport {
    /// Create with predefined responses, consumed one per call
    pub fn new(responses: Vec<Result<ApiResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call executed so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, call: &ApiCall, access_token: Option<&str>) -> Result<ApiResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: call.method,
            path: call.path.clone(),
            token: access_token.map(String::from),
            body: call.body.clone(),
        });

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Network("no more scripted responses".to_string())))
    }
}
