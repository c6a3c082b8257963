use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{UpstreamError, read_json};

/// Result of asking the gateway to create an instance.
#[derive(Debug, Clone)]
pub struct CreatedInstance {
    /// Base64 QR image to scan; empty when the gateway did not return one.
    pub qr_code: String,
    pub raw: Value,
}

/// Raw connection state reported by the gateway.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// `"open"`, `"close"`, `"connecting"`, ... or `None` when absent.
    pub state: Option<String>,
    pub raw: Value,
}

/// Operations against the WhatsApp gateway. Each is exactly one HTTP call;
/// nothing is retried.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Reachability check. Never fails: any error reads as "unreachable".
    async fn check_status(&self) -> bool;

    async fn create_instance(&self, name: &str) -> Result<CreatedInstance, UpstreamError>;

    async fn get_instance_qr(&self, name: &str) -> Result<String, UpstreamError>;

    async fn get_instance_status(&self, name: &str) -> Result<ConnectionState, UpstreamError>;

    async fn delete_instance(&self, name: &str) -> Result<(), UpstreamError>;

    async fn fetch_group_info(&self, name: &str, group_jid: &str) -> Result<Value, UpstreamError>;
}

/// Gateway client authenticated with the shared-secret `apikey` header.
/// The key only ever lives server-side.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base: Url,
}

impl GatewayClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, UpstreamError> {
        let base = Url::parse(base_url)
            .map_err(|e| UpstreamError::Config(format!("gateway url '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(UpstreamError::Config(format!(
                "gateway url '{}' cannot be a base",
                base_url
            )));
        }

        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| UpstreamError::Config("gateway api key is not a valid header value".into()))?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("apikey", key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| UpstreamError::Config(format!("http client: {}", e)))?;

        Ok(Self { http, base })
    }

    /// Appends path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn qr_from(body: &Value) -> String {
    body.pointer("/qrcode/base64")
        .or_else(|| body.get("base64"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn state_from(body: &Value) -> Option<String> {
    body.get("state")
        .or_else(|| body.pointer("/instance/state"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl GatewayApi for GatewayClient {
    async fn check_status(&self) -> bool {
        match self.http.get(self.base.clone()).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!("Gateway unreachable: {}", e);
                false
            }
        }
    }

    async fn create_instance(&self, name: &str) -> Result<CreatedInstance, UpstreamError> {
        const FALLBACK: &str = "failed to create instance";
        debug!("Creating gateway instance {}", name);

        let resp = self
            .http
            .post(self.endpoint(&["instance", "create"]))
            .json(&json!({ "instanceName": name, "qrcode": true }))
            .send()
            .await
            .map_err(|source| UpstreamError::Transport { context: FALLBACK, source })?;
        let raw = read_json(resp, FALLBACK).await?;

        Ok(CreatedInstance {
            qr_code: qr_from(&raw),
            raw,
        })
    }

    async fn get_instance_qr(&self, name: &str) -> Result<String, UpstreamError> {
        const FALLBACK: &str = "failed to fetch QR code";

        let resp = self
            .http
            .get(self.endpoint(&["instance", "connect", name]))
            .send()
            .await
            .map_err(|source| UpstreamError::Transport { context: FALLBACK, source })?;
        let body = read_json(resp, FALLBACK).await?;
        Ok(qr_from(&body))
    }

    async fn get_instance_status(&self, name: &str) -> Result<ConnectionState, UpstreamError> {
        const FALLBACK: &str = "failed to fetch connection state";

        let resp = self
            .http
            .get(self.endpoint(&["instance", "connectionState", name]))
            .send()
            .await
            .map_err(|source| UpstreamError::Transport { context: FALLBACK, source })?;
        let raw = read_json(resp, FALLBACK).await?;

        Ok(ConnectionState {
            state: state_from(&raw),
            raw,
        })
    }

    async fn delete_instance(&self, name: &str) -> Result<(), UpstreamError> {
        const FALLBACK: &str = "failed to delete instance";

        let resp = self
            .http
            .delete(self.endpoint(&["instance", "delete", name]))
            .send()
            .await
            .map_err(|source| UpstreamError::Transport { context: FALLBACK, source })?;
        read_json(resp, FALLBACK).await.inspect_err(|e| {
            warn!("Gateway refused to delete {}: {}", name, e);
        })?;
        Ok(())
    }

    async fn fetch_group_info(&self, name: &str, group_jid: &str) -> Result<Value, UpstreamError> {
        const FALLBACK: &str = "failed to fetch group info";

        let resp = self
            .http
            .get(self.endpoint(&["group", "participants", name]))
            .query(&[("groupJid", group_jid)])
            .send()
            .await
            .map_err(|source| UpstreamError::Transport { context: FALLBACK, source })?;
        read_json(resp, FALLBACK).await
    }
}
