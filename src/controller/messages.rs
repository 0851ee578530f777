//! Wire format of the coordination stream.
//!
//! Each record payload is one JSON object whose `type` tag selects the
//! variant. Field names match what other instances publish, so they are not
//! snake_case throughout.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::CacheStats;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Asks every instance for its statistics
    #[serde(rename = "stats")]
    CollectStats { requester: String },

    /// One operation's statistics, addressed to `requester`
    #[serde(rename = "stats-reply")]
    ReplyStats { requester: String, data: StatsReplyData },

    #[serde(rename = "evict-key")]
    EvictKey { requester: String, data: EvictKeyData },

    /// Carries no requester; every instance applies it, the sender included
    #[serde(rename = "set-key")]
    BroadcastKey { data: BroadcastKeyData },

    #[serde(rename = "operation-start")]
    OperationStart {
        requester: String,
        data: OperationStartData,
    },

    #[serde(rename = "operation-end")]
    OperationEnd { requester: String, data: OperationEndData },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReplyData {
    pub operation: String,
    pub stats: CacheStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictKeyData {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastKeyData {
    pub key: String,
    #[serde(rename = "ttlMilliseconds")]
    pub ttl_milliseconds: u64,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStartData {
    pub operation: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEndData {
    pub operation: String,
    pub key: String,
    /// Computed value, or the serialized error when `error` is set
    #[serde(default)]
    pub value: Value,
    pub error: bool,
}

impl ControlMessage {
    /// Parses a record payload. Unknown `type` tags are rejected.
    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire tag of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::CollectStats { .. } => "stats",
            ControlMessage::ReplyStats { .. } => "stats-reply",
            ControlMessage::EvictKey { .. } => "evict-key",
            ControlMessage::BroadcastKey { .. } => "set-key",
            ControlMessage::OperationStart { .. } => "operation-start",
            ControlMessage::OperationEnd { .. } => "operation-end",
        }
    }

    pub fn requester(&self) -> Option<&str> {
        match self {
            ControlMessage::CollectStats { requester }
            | ControlMessage::ReplyStats { requester, .. }
            | ControlMessage::EvictKey { requester, .. }
            | ControlMessage::OperationStart { requester, .. }
            | ControlMessage::OperationEnd { requester, .. } => Some(requester),
            ControlMessage::BroadcastKey { .. } => None,
        }
    }
}
