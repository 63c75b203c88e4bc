//! Frame: the envelope for realtime traffic with the layout server.
//!
//! ARCHITECTURE
//! ============
//! The notification channel speaks frames. A surface sends a `room:join`
//! request carrying the event id; the server answers `done` and then pushes
//! one `event:<kind>` frame per committed change in that collaboration room.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`, never nested at the
//!   envelope level.
//! - Responses correlate to requests via `parent_id`.
//! - Frames travel as JSON text messages.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Syscall prefix of server-pushed change notifications.
pub const NOTIFY_PREFIX: &str = "event";

/// Syscall used to subscribe to a collaboration room.
pub const JOIN_SYSCALL: &str = "room:join";

// =============================================================================
// TYPES
// =============================================================================

/// Flat payload of a frame.
pub type Data = HashMap<String, serde_json::Value>;

/// Where a frame sits in an exchange. A join is answered by `done` or
/// `error`; pushed notifications arrive as `item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Item,
    Done,
    Error,
    Cancel,
}

/// One realtime message to or from the layout server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Send time, ms since the Unix epoch.
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// A request frame for `syscall`.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            event_id: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Create the `room:join` request for one event.
    #[must_use]
    pub fn join(event_id: Uuid) -> Self {
        Self::request(JOIN_SYSCALL, Data::new()).with_event_id(event_id)
    }

    /// Create a pushed notification frame (`event:<kind>`, status `item`).
    #[must_use]
    pub fn notify(event_id: Uuid, kind: &str, data: Data) -> Self {
        let mut frame = Self::request(format!("{NOTIFY_PREFIX}:{kind}"), data).with_event_id(event_id);
        frame.status = Status::Item;
        frame
    }

    /// Accept this request.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    /// Reject this request with a message.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(message.into()));
        self.reply(Status::Error, data)
    }

    /// Reply to this frame on the same syscall and event.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            event_id: self.event_id,
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ROUTING / CODEC
// =============================================================================

impl Frame {
    /// `event` for `event:table_moved`; the whole syscall if there is no ':'.
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.syscall.split_once(':') else {
            return &self.syscall;
        };
        prefix
    }

    /// `table_moved` for `event:table_moved`; empty if there is no ':'.
    #[must_use]
    pub fn name(&self) -> &str {
        let Some((_, name)) = self.syscall.split_once(':') else {
            return "";
        };
        name
    }

    /// Human-readable message of an error frame.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.data.get(FRAME_MESSAGE).and_then(serde_json::Value::as_str)
    }

    /// Encode as a JSON text payload.
    ///
    /// # Errors
    ///
    /// Returns an error if a data value fails to serialize.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid frame.
    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}

// =============================================================================
// TESTS
// =============================================================================
