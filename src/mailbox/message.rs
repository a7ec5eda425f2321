// src/mailbox/message.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActorId, TaskId};

/// Message payload, serialized as `"type"` + `"payload"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessageBody {
    Message {
        text: String,
    },
    IdleNotification {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_task: Option<TaskId>,
    },
    ShutdownRequest {
        request_id: String,
        reason: String,
    },
    ShutdownResponse {
        request_id: String,
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Message { .. } => MessageKind::Message,
            MessageBody::IdleNotification { .. } => MessageKind::IdleNotification,
            MessageBody::ShutdownRequest { .. } => MessageKind::ShutdownRequest,
            MessageBody::ShutdownResponse { .. } => MessageKind::ShutdownResponse,
        }
    }
}

/// Payload-free discriminant, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Message,
    IdleNotification,
    ShutdownRequest,
    ShutdownResponse,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::Message => "message",
            MessageKind::IdleNotification => "idle_notification",
            MessageKind::ShutdownRequest => "shutdown_request",
            MessageKind::ShutdownResponse => "shutdown_response",
        };
        f.write_str(s)
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "message" | "text" => Ok(MessageKind::Message),
            "idle" | "idle_notification" => Ok(MessageKind::IdleNotification),
            "shutdown_request" => Ok(MessageKind::ShutdownRequest),
            "shutdown_response" => Ok(MessageKind::ShutdownResponse),
            other => Err(format!(
                "invalid message type: {other} (expected message, idle, shutdown-request or shutdown-response)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: ActorId,
    pub to: ActorId,
    #[serde(flatten)]
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

/// Criteria for reading an inbox. Both set fields must match.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFilter {
    pub unread_only: bool,
    pub kind: Option<MessageKind>,
}

impl MessageFilter {
    pub fn unread() -> Self {
        Self {
            unread_only: true,
            kind: None,
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        (!self.unread_only || !message.read) && self.kind.is_none_or(|k| message.body.kind() == k)
    }
}
