//! Outbound call descriptions and normalized responses
//!
//! `ApiCall` describes any backend operation (method, path, JSON body,
//! extra headers) without executing it; `ApiResponse` is the uniform
//! result every transport hands back. Error bodies arrive in several
//! shapes and are normalized here, at the boundary, so nothing downstream
//! pattern-matches on raw JSON.

use serde::de::DeserializeOwned;
use serde_json::Value;
use crate::Result;
use crate::error::Error;

/// HTTP status signalling an authorization failure
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Header used by callers whose operation is not safe to execute twice
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// HTTP method of an outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// Description of an outbound backend operation
///
/// A call may be executed twice by the request pipeline (original +
/// retry after refresh). Callers whose operation is not idempotent attach
/// a dedup key with [`ApiCall::with_idempotency_key`]; the pipeline itself
/// never deduplicates the underlying operation.
#[derive(Debug, Clone)]
pub struct ApiCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl ApiCall {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    /// Attach a JSON body
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach an extra header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a fresh idempotency key so the backend can deduplicate a retry
    pub fn with_idempotency_key(self) -> Self {
        let key = uuid::Uuid::new_v4().to_string();
        self.header(IDEMPOTENCY_KEY_HEADER, key)
    }
}

/// Normalized backend rejection: one tagged shape for every error body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

/// Uniform response from any transport
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == STATUS_UNAUTHORIZED
    }

    /// Deserialize the body into a typed payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).map_err(Error::from)
    }

    /// Normalize the error body into a single tagged representation
    ///
    /// Accepts the three shapes the backend is known to produce:
    /// `{error:{code,message}}`, `{error:"text"}`, and a bare non-2xx
    /// status with no usable body.
    pub fn remote_error(&self) -> RemoteError {
        match self.body.get("error") {
            Some(Value::Object(err)) => RemoteError {
                code: err
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            },
            Some(Value::String(text)) => RemoteError {
                code: format!("http_{}", self.status),
                message: text.clone(),
            },
            _ => RemoteError {
                code: format!("http_{}", self.status),
                message: format!("request failed with status {}", self.status),
            },
        }
    }

    /// Decode a successful body, or surface the normalized rejection
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        if self.is_success() {
            self.decode()
        } else {
            let RemoteError { code, message } = self.remote_error();
            Err(Error::Remote { code, message })
        }
    }
}
