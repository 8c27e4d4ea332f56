//! Contract of the mutation/validation proxy endpoints.
//!
//! The proxies answer `{ "response": ... }` with a 2xx status, or
//! `{ "error": { "is_error": true, "code": ..., "message": ... } }` otherwise.
//! The HTTP client itself is supplied by the application through
//! [`ProxyTransport`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Translation key shown when a backend call fails without an error code.
pub const CHECK_FAILED_KEY: &str = "errors:check-failed";

/// Translation key shown when a reference lookup does not answer in time.
pub const LOOKUP_TIMEOUT_KEY: &str = "errors:lookup-timeout";

/// Translation key of the notice sent when a rejection rewinds the process.
pub const STEP_REWOUND_KEY: &str = "messages:step-rewound";

/// Failure of a backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The backend flagged a business error with a code.
    #[error("Backend error {code}: {message}")]
    Flagged {
        /// Backend error code
        code: String,
        /// Backend message, not meant for operators
        message: String,
    },

    /// Transport failure, unexpected status or undecodable body.
    #[error("Backend call failed: {0}")]
    Unflagged(String),
}

/// Raw reply of a proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyReply {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

/// HTTP plumbing used by [`MutationService`].
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    /// POSTs `body` as JSON to `endpoint`.
    ///
    /// Connection-level failures are reported as [`ServiceError::Unflagged`].
    async fn post(&self, endpoint: &str, body: Value) -> Result<ProxyReply, ServiceError>;
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    response: Value,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    code: Value,
    #[serde(default)]
    message: Option<String>,
}

/// Interprets a proxy reply.
///
/// # Examples
///
/// ```
/// use scanflow::{parse_proxy_response, ServiceError};
/// use serde_json::json;
///
/// let ok = parse_proxy_response(200, r#"{"response":{"status":"OK"}}"#);
/// assert_eq!(ok, Ok(json!({ "status": "OK" })));
///
/// let flagged = parse_proxy_response(
///     500,
///     r#"{"error":{"is_error":true,"code":"FAPI_000001","message":"boom"}}"#,
/// );
/// assert!(matches!(flagged, Err(ServiceError::Flagged { code, .. }) if code == "FAPI_000001"));
///
/// let other = parse_proxy_response(502, "Bad Gateway");
/// assert!(matches!(other, Err(ServiceError::Unflagged(_))));
/// ```
pub fn parse_proxy_response(status: u16, body: &str) -> Result<Value, ServiceError> {
    let envelope = serde_json::from_str::<Envelope>(body);

    if (200..300).contains(&status) {
        return envelope
            .map(|envelope| envelope.response)
            .map_err(|e| ServiceError::Unflagged(format!("undecodable response body: {e}")));
    }

    match envelope {
        Ok(Envelope {
            error: Some(error), ..
        }) if error.is_error => {
            let code = match error.code {
                Value::String(code) => code,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            Err(ServiceError::Flagged {
                code,
                message: error.message.unwrap_or_default(),
            })
        }
        _ => Err(ServiceError::Unflagged(format!("HTTP status {status}"))),
    }
}

/// Typed client for the proxy endpoints.
#[derive(Clone)]
pub struct MutationService {
    transport: Arc<dyn ProxyTransport>,
}

impl fmt::Debug for MutationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationService").finish_non_exhaustive()
    }
}

impl MutationService {
    /// Creates a service over the given transport.
    pub fn new(transport: impl ProxyTransport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Calls `endpoint` and decodes the `response` field as `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Value,
    ) -> Result<T, ServiceError> {
        debug!("Calling proxy endpoint {}", endpoint);
        let reply = self.transport.post(endpoint, body).await?;
        let response = parse_proxy_response(reply.status, &reply.body).map_err(|e| {
            warn!("Proxy endpoint {} failed: {}", endpoint, e);
            e
        })?;
        serde_json::from_value(response).map_err(|e| {
            ServiceError::Unflagged(format!("unexpected response from {endpoint}: {e}"))
        })
    }
}

/// Maps backend error codes to translation keys.
///
/// Codes without an explicit entry map to `errors:<code>`; an empty code maps
/// to [`CHECK_FAILED_KEY`].
#[derive(Debug, Clone, Default)]
pub struct ErrorCodeMap {
    overrides: HashMap<String, String>,
}

impl ErrorCodeMap {
    /// Creates a map with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `code` to a specific translation key.
    pub fn with(mut self, code: impl Into<String>, key: impl Into<String>) -> Self {
        self.overrides.insert(code.into(), key.into());
        self
    }

    /// Translation key for `code`.
    pub fn translation_key(&self, code: &str) -> String {
        if let Some(key) = self.overrides.get(code) {
            return key.clone();
        }
        if code.is_empty() {
            CHECK_FAILED_KEY.to_string()
        } else {
            format!("errors:{code}")
        }
    }
}
