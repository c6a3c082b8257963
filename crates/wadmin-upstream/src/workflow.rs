use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{UpstreamError, read_json};

/// The workflow paces sends with random delays, so a large batch can take
/// minutes before the webhook answers.
const SEND_TIMEOUT: Duration = Duration::from_secs(300);
const JOIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Batch handed to the workflow. The workflow iterates targets, picks a
/// random body for each and sleeps `delayMin..=delayMax` seconds between
/// sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub instance: String,
    pub messages: Vec<String>,
    pub targets: Vec<String>,
    pub is_group: bool,
    pub delay_min: u32,
    pub delay_max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGroupPayload {
    pub instance: String,
    pub invite_codes: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinEnvelope<'a> {
    #[serde(flatten)]
    payload: &'a JoinGroupPayload,
    is_group_invites: bool,
}

/// Effectful operations delegated to the automation webhook. The response
/// shape is owned by the workflow and treated as opaque.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn send_messages(&self, payload: &SendMessagePayload) -> Result<Value, UpstreamError>;

    async fn join_groups(&self, payload: &JoinGroupPayload) -> Result<Value, UpstreamError>;
}

#[derive(Clone)]
pub struct WorkflowClient {
    http: reqwest::Client,
    url: Url,
}

impl WorkflowClient {
    pub fn new(webhook_url: &str) -> Result<Self, UpstreamError> {
        let url = Url::parse(webhook_url)
            .map_err(|e| UpstreamError::Config(format!("workflow url '{}': {}", webhook_url, e)))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| UpstreamError::Config(format!("http client: {}", e)))?;
        Ok(Self { http, url })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        body: &T,
        timeout: Duration,
        fallback: &'static str,
    ) -> Result<Value, UpstreamError> {
        let resp = self
            .http
            .post(self.url.clone())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|source| UpstreamError::Transport { context: fallback, source })?;
        read_json(resp, fallback).await
    }
}

#[async_trait]
impl WorkflowApi for WorkflowClient {
    async fn send_messages(&self, payload: &SendMessagePayload) -> Result<Value, UpstreamError> {
        info!(
            "Dispatching {} message(s) to {} target(s) via {}",
            payload.messages.len(),
            payload.targets.len(),
            payload.instance
        );
        self.post(payload, SEND_TIMEOUT, "failed to send messages").await
    }

    async fn join_groups(&self, payload: &JoinGroupPayload) -> Result<Value, UpstreamError> {
        debug!(
            "Joining {} group(s) via {}",
            payload.invite_codes.len(),
            payload.instance
        );
        let envelope = JoinEnvelope {
            payload,
            is_group_invites: true,
        };
        self.post(&envelope, JOIN_TIMEOUT, "failed to join groups").await
    }
}
