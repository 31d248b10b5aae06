//! Mailbox messages exchanged between workers.
//!
//! [`Message`] is the in-process form; [`MessageRecord`] is the flat storage
//! form with scalar columns and JSON text payloads.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;
use crate::ids::MessageId;

// ============================================================================
// Tags
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Handoff,
}

/// Delivery priority, ordered `Low < Normal < High < Urgent`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

macro_rules! str_tag {
    ($ty:ty, $label:literal, { $($variant:path => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($variant),)+
                    other => Err(StoreError::Serialization(format!(
                        concat!("unknown ", $label, " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

str_tag!(MessageType, "message type", {
    MessageType::Request => "request",
    MessageType::Response => "response",
    MessageType::Notification => "notification",
    MessageType::Handoff => "handoff",
});

str_tag!(Priority, "priority", {
    Priority::Low => "low",
    Priority::Normal => "normal",
    Priority::High => "high",
    Priority::Urgent => "urgent",
});

str_tag!(MessageStatus, "message status", {
    MessageStatus::Pending => "pending",
    MessageStatus::Completed => "completed",
    MessageStatus::Failed => "failed",
});

impl Priority {
    /// Numeric rank used by storage backends to sort
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Result<Self, StoreError> {
        match rank {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Urgent),
            other => Err(StoreError::Serialization(format!(
                "unknown priority rank {other}"
            ))),
        }
    }
}

impl MessageStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Failed)
    }
}

// ============================================================================
// Message
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: MessageType,
    pub priority: Priority,
    pub payload: Value,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl Message {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        message_type: MessageType,
        payload: Value,
    ) -> Self {
        Self {
            id: MessageId::new(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            message_type,
            priority: Priority::Normal,
            payload,
            status: MessageStatus::Pending,
            correlation_id: None,
            created_at: Utc::now(),
            processed_at: None,
            response: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Link this message to the request it answers
    pub fn with_correlation(mut self, id: MessageId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }

    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id.to_string(),
            from_agent: self.from_agent.clone(),
            to_agent: self.to_agent.clone(),
            message_type: self.message_type.as_str().to_string(),
            priority: self.priority.rank(),
            payload: self.payload.to_string(),
            status: self.status.as_str().to_string(),
            correlation_id: self.correlation_id.as_ref().map(ToString::to_string),
            created_at: format_timestamp(&self.created_at),
            processed_at: self.processed_at.as_ref().map(format_timestamp),
            response: self.response.as_ref().map(ToString::to_string),
        }
    }

    pub fn from_record(record: MessageRecord) -> Result<Self, StoreError> {
        Ok(Self {
            id: MessageId::parse(&record.id)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            from_agent: record.from_agent,
            to_agent: record.to_agent,
            message_type: record.message_type.parse()?,
            priority: Priority::from_rank(record.priority)?,
            payload: serde_json::from_str(&record.payload)?,
            status: record.status.parse()?,
            correlation_id: record
                .correlation_id
                .map(|id| MessageId::parse(id).map_err(|e| StoreError::Serialization(e.to_string())))
                .transpose()?,
            created_at: parse_timestamp(&record.created_at)?,
            processed_at: record.processed_at.as_deref().map(parse_timestamp).transpose()?,
            response: record
                .response
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()?,
        })
    }
}

/// Flat storage form of a [`Message`].
///
/// Timestamps are RFC 3339 in UTC with fixed microsecond precision so that
/// lexical order matches chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: String,
    pub priority: i64,
    pub payload: String,
    pub status: String,
    pub correlation_id: Option<String>,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub response: Option<String>,
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
