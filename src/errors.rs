//! Cache Coordination Error Hierarchy
//!
//! Errors are split by the layer that produced them. Transport and storage
//! failures are advisory: the coordination layer logs them and keeps serving
//! from the wrapped operation. User-function failures travel as
//! [`OperationError`], which is cloneable and serializable so one failure can
//! be fanned out to local waiters and to other instances.

use std::fmt;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Pub/sub stream or lock substrate failures
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Cache storage backend failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Coordination protocol misuse or lifecycle violations
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// The wrapped user operation failed
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Value could not be converted to or from its JSON representation
    #[error(transparent)]
    Codec(#[from] serde_json::Error),

    /// Cache key parameters did not serialize to a flat map
    #[error("Invalid cache key parameters: {0}")]
    InvalidKeyParameters(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection was closed locally
    #[error("Transport connection closed")]
    Closed,

    /// Blocking read from the stream failed
    #[error("Failed to read from stream {stream_id}: {reason}")]
    Read { stream_id: String, reason: String },

    /// Lock primitive (increment/expire/delete) failed
    #[error("Lock operation on {key} failed: {reason}")]
    Lock { key: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Backend rejected or failed the request
    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// A stats collection round is already open on this instance
    #[error("Can't start a new stats request until the previous one ends")]
    StatsRoundInProgress,

    /// Controller is closing or closed
    #[error("Cache controller is closed")]
    ControllerClosed,

    /// The executor side of a single-flight entry went away without a result
    #[error("Executor for {operation}#{key} dropped before delivering a result")]
    WaiterDropped { operation: String, key: String },
}

/// Classification carried in the `type` tag of a serialized [`OperationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationErrorKind {
    #[serde(rename = "Error")]
    Generic,
    #[serde(rename = "InvalidInputError")]
    InvalidInput,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "UnavailableError")]
    Unavailable,
    #[serde(rename = "InternalServerError")]
    Internal,
    #[serde(rename = "CancelledError")]
    Cancelled,
}

impl OperationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationErrorKind::Generic => "Error",
            OperationErrorKind::InvalidInput => "InvalidInputError",
            OperationErrorKind::NotFound => "NotFoundError",
            OperationErrorKind::Timeout => "TimeoutError",
            OperationErrorKind::Unavailable => "UnavailableError",
            OperationErrorKind::Internal => "InternalServerError",
            OperationErrorKind::Cancelled => "CancelledError",
        }
    }
}

impl fmt::Display for OperationErrorKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_error_message() -> String {
    "Unknown error".to_string()
}

/// Failure of a wrapped operation.
///
/// Wire form: `{"type": "<kind>", "message": "...", "statusCode": 404}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct OperationError {
    #[serde(rename = "type")]
    pub kind: OperationErrorKind,

    #[serde(default = "default_error_message")]
    pub message: String,

    #[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl OperationError {
    pub fn new(
        kind: OperationErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(OperationErrorKind::Generic, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(OperationErrorKind::Internal, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(OperationErrorKind::Cancelled, message)
    }

    pub fn with_status(
        mut self,
        status_code: u16,
    ) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Wraps any error as a generic operation failure, keeping its message.
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        Self::generic(error.to_string())
    }

    /// Best-effort reconstruction of a typed error from externally sourced text.
    ///
    /// A JSON object whose `type` names a known kind is rebuilt as that kind.
    /// Unknown tags, non-object JSON and unparseable text become a
    /// [`OperationErrorKind::Generic`] error carrying the raw text.
    pub fn normalize(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_else(|_| Self::generic(raw)),
            _ => Self::generic(raw),
        }
    }

    /// Decodes the `value` field of an `operation-end` message flagged as error.
    pub fn from_wire(value: &Value) -> Self {
        match value {
            Value::String(raw) => Self::normalize(raw),
            Value::Object(_) => {
                serde_json::from_value(value.clone()).unwrap_or_else(|_| Self::generic(value.to_string()))
            }
            other => Self::generic(other.to_string()),
        }
    }

    pub fn to_wire(&self) -> Value {
        match self.status_code {
            Some(code) => json!({
                "type": self.kind.as_str(),
                "message": self.message,
                "statusCode": code,
            }),
            None => json!({
                "type": self.kind.as_str(),
                "message": self.message,
            }),
        }
    }
}
