use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a stored enum column holds a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

// -- Instances --

/// Connection status of a WhatsApp instance.
/// Only `Connected` permits sending messages or joining groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Connected,
    Disconnected,
    QrNeeded,
    Connecting,
    Error,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::QrNeeded => "qr_needed",
            Self::Connecting => "connecting",
            Self::Error => "error",
        }
    }

    pub fn allows_dispatch(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl FromStr for InstanceStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            "qr_needed" => Ok(Self::QrNeeded),
            "connecting" => Ok(Self::Connecting),
            "error" => Ok(Self::Error),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub name: String,
    pub status: InstanceStatus,
    pub qr_code: Option<String>,
    pub phone_number: Option<String>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

// -- Groups --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    /// Identifier used by WhatsApp for the group. Until the workflow reports
    /// real metadata this is the invite code itself.
    pub group_id: String,
    pub name: String,
    pub invite_code: String,
    pub is_member: bool,
    pub instance_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
    Delivered,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Delivered => "delivered",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "delivered" => Ok(Self::Delivered),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// One outbound message to one target. Dispatch records one of these per
/// (body, target) pair after the workflow accepts the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub text: String,
    pub target: String,
    pub is_group: bool,
    pub instance_id: Uuid,
    pub user_id: Uuid,
    pub status: MessageStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -- System logs --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Error,
    Warning,
    Success,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Success => "success",
        }
    }
}

impl FromStr for LogKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "error" => Ok(Self::Error),
            "warning" => Ok(Self::Warning),
            "success" => Ok(Self::Success),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLog {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
    pub details: Option<String>,
    pub user_id: Option<Uuid>,
    pub instance_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// -- Feedback --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Bug,
    Feature,
    Improvement,
    Other,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Improvement => "improvement",
            Self::Other => "other",
        }
    }
}

impl FromStr for FeedbackKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bug" => Ok(Self::Bug),
            "feature" => Ok(Self::Feature),
            "improvement" => Ok(Self::Improvement),
            "other" => Ok(Self::Other),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    New,
    Reviewing,
    Resolved,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Reviewing => "reviewing",
            Self::Resolved => "resolved",
        }
    }
}

impl FromStr for FeedbackStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "reviewing" => Ok(Self::Reviewing),
            "resolved" => Ok(Self::Resolved),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFeedback {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub status: FeedbackStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_status_strings_match_serde() {
        for status in [
            InstanceStatus::Connected,
            InstanceStatus::Disconnected,
            InstanceStatus::QrNeeded,
            InstanceStatus::Connecting,
            InstanceStatus::Error,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
    }

    #[test]
    fn only_connected_allows_dispatch() {
        assert!(InstanceStatus::Connected.allows_dispatch());
        assert!(!InstanceStatus::Connecting.allows_dispatch());
        assert!(!InstanceStatus::QrNeeded.allows_dispatch());
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let err = "archived".parse::<FeedbackStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown variant 'archived'");
    }

    #[test]
    fn log_kind_serializes_as_type_field() {
        let log = SystemLog {
            id: Uuid::nil(),
            kind: LogKind::Warning,
            message: "slow gateway".into(),
            details: None,
            user_id: None,
            instance_id: None,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value["type"], "warning");
    }
}
