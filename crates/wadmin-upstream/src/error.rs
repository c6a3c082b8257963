use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Failure of a single upstream call.
///
/// `Display` is the text shown to the operator: the message the remote
/// service returned when it gave one, otherwise the operation's fallback.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The service answered with a non-2xx status.
    #[error("{message}")]
    Remote { status: u16, message: String },

    /// The request never produced a response (DNS, refused, timeout, TLS).
    #[error("{context}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Client construction failed (bad base URL or API key).
    #[error("invalid upstream configuration: {0}")]
    Config(String),
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }
}

/// Reads a response body as JSON, mapping non-success statuses to
/// `UpstreamError::Remote`. Empty bodies become `Value::Null` and non-JSON
/// bodies are kept as a string.
pub(crate) async fn read_json(
    resp: reqwest::Response,
    fallback: &'static str,
) -> Result<Value, UpstreamError> {
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|source| UpstreamError::Transport { context: fallback, source })?;

    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };

    if status.is_success() {
        return Ok(body);
    }

    let message = remote_message(&body).unwrap_or_else(|| fallback.to_string());
    warn!("Upstream returned {}: {}", status, message);
    Err(UpstreamError::Remote {
        status: status.as_u16(),
        message,
    })
}

/// Pulls a human-readable message out of an error body. Accepts
/// `{"message": "..."}`, `{"message": ["...", ...]}` and the same shapes
/// nested under `response`.
pub(crate) fn remote_message(body: &Value) -> Option<String> {
    fn from_field(v: &Value) -> Option<String> {
        match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Array(items) => {
                let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                (!parts.is_empty()).then(|| parts.join("; "))
            }
            _ => None,
        }
    }

    body.get("message")
        .and_then(from_field)
        .or_else(|| body.get("response").and_then(|r| r.get("message")).and_then(from_field))
}
