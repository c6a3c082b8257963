use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    FeedbackKind, FeedbackStatus, Group, Instance, InstanceStatus, LogKind,
};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the realtime upgrade handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    /// Admins may register operators, read system logs and triage feedback.
    #[serde(default)]
    pub is_admin: bool,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub is_admin: bool,
    /// Issued only to the bootstrap admin; accounts created by an admin
    /// log in themselves.
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub token: String,
}

// -- Pagination --

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    pub page_size: Option<u32>,
}

fn default_page() -> u32 {
    1
}

impl PageQuery {
    /// Clamps the requested page into `(limit, offset)`.
    pub fn limit_offset(&self, default_size: u32, max_size: u32) -> (u32, u32) {
        let size = self.page_size.unwrap_or(default_size).clamp(1, max_size);
        let page = self.page.max(1);
        (size, (page - 1) * size)
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

// -- Instances --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateInstanceRequest {
    pub status: Option<InstanceStatus>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QrCodeResponse {
    pub instance_id: Uuid,
    pub qr_code: String,
}

// -- Selection --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectInstanceRequest {
    pub instance_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectionResponse {
    pub instance: Option<Instance>,
}

// -- Dispatch --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessagesRequest {
    /// Falls back to the caller's selected instance when omitted.
    pub instance_id: Option<Uuid>,
    pub messages: Vec<String>,
    pub targets: Vec<String>,
    #[serde(default)]
    pub is_group: bool,
    pub delay_min: Option<u32>,
    pub delay_max: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessagesResponse {
    pub instance_id: Uuid,
    pub recorded: usize,
    /// (body, target) pairs the workflow accepted but that could not be
    /// written locally.
    pub failed_records: Vec<FailedRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinGroupsRequest {
    pub instance_id: Option<Uuid>,
    pub invite_codes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinGroupsResponse {
    pub instance_id: Uuid,
    pub groups: Vec<Group>,
    pub failed_records: Vec<FailedRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRecord {
    pub text: Option<String>,
    pub target: String,
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub instance_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: u32,
    pub page_size: Option<u32>,
}

impl MessageQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    pub instance_id: Option<Uuid>,
}

// -- Logs and feedback --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateLogRequest {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
    pub details: Option<String>,
    pub instance_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(rename = "type")]
    pub kind: Option<LogKind>,
    #[serde(default = "default_page")]
    pub page: u32,
    pub page_size: Option<u32>,
}

impl LogQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateFeedbackRequest {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateFeedbackRequest {
    pub status: FeedbackStatus,
}

// -- Dashboard --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Online,
    Offline,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_instances: u64,
    pub connected_instances: u64,
    pub total_groups: u64,
    pub total_messages: u64,
    pub messages_last_hour: u64,
    pub gateway_status: GatewayStatus,
    pub gateway_checked_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_clamps_size_and_page() {
        let q = PageQuery {
            page: 0,
            page_size: Some(500),
        };
        assert_eq!(q.limit_offset(20, 100), (100, 0));

        let q = PageQuery {
            page: 3,
            page_size: None,
        };
        assert_eq!(q.limit_offset(20, 100), (20, 40));
    }

    #[test]
    fn send_request_defaults_to_direct_numbers() {
        let req: SendMessagesRequest = serde_json::from_str(
            r#"{"messages":["hi"],"targets":["+1"]}"#,
        )
        .unwrap();
        assert!(!req.is_group);
        assert!(req.instance_id.is_none());
        assert!(req.delay_min.is_none());
    }
}
