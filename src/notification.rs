//! Notification: the closed set of pushed change descriptions.
//!
//! DESIGN
//! ======
//! One variant per kind, tagged by `kind`, each carrying enough payload to
//! apply without a follow-up fetch. Every variant is state-setting on an
//! identifiable entity, so applying one twice is the same as applying it once.
//! Fields a sender may omit are `Option`s and leave local state alone.
//! `LayoutChanged` is the one payload-less kind: it only says the canonical
//! layout moved on, and is answered with a pull.
//! Legacy kind names are accepted as aliases; unknown extra fields such as
//! `timestamp` or `assigned_by` are ignored.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::{Data, Frame, NOTIFY_PREFIX};
use crate::geometry::Point;
use crate::model::{Guest, LayoutSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    TableMoved {
        table_id: Uuid,
        position: Point,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rotation: Option<f64>,
    },
    SeatMoved {
        table_id: Uuid,
        seat_id: Uuid,
        position: Point,
    },
    SeatAssigned {
        table_id: Uuid,
        seat_id: Uuid,
        guest_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guest: Option<Guest>,
    },
    SeatUnassigned {
        table_id: Uuid,
        seat_id: Uuid,
        guest_id: Uuid,
    },
    #[serde(alias = "guest_checked_in", alias = "guest_checked_out")]
    GuestUpdated { guest: Guest },
    #[serde(alias = "guest_deleted")]
    GuestRemoved { guest_id: Uuid },
    LayoutReplaced { layout: LayoutSnapshot },
    LayoutChanged {},
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("not a notification frame: {0}")]
    NotANotification(String),
    #[error("invalid notification payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl Notification {
    /// Wire name of this variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TableMoved { .. } => "table_moved",
            Self::SeatMoved { .. } => "seat_moved",
            Self::SeatAssigned { .. } => "seat_assigned",
            Self::SeatUnassigned { .. } => "seat_unassigned",
            Self::GuestUpdated { .. } => "guest_updated",
            Self::GuestRemoved { .. } => "guest_removed",
            Self::LayoutReplaced { .. } => "layout_replaced",
            Self::LayoutChanged {} => "layout_changed",
        }
    }

    /// Table whose geometry this notification would overwrite, if any.
    #[must_use]
    pub fn moved_table(&self) -> Option<Uuid> {
        match self {
            Self::TableMoved { table_id, .. } | Self::SeatMoved { table_id, .. } => Some(*table_id),
            _ => None,
        }
    }

    /// Decode an `event:<kind>` frame.
    ///
    /// # Errors
    ///
    /// Returns an error for frames of another prefix or with a payload that
    /// does not match the kind.
    pub fn from_frame(frame: &Frame) -> Result<Self, NotificationError> {
        if frame.prefix() != NOTIFY_PREFIX {
            return Err(NotificationError::NotANotification(frame.syscall.clone()));
        }
        let mut payload: serde_json::Map<String, serde_json::Value> =
            frame.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        payload.insert("kind".into(), serde_json::Value::String(frame.name().to_owned()));
        Ok(serde_json::from_value(serde_json::Value::Object(payload))?)
    }

    /// Encode as an `event:<kind>` frame for one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails to serialize.
    pub fn to_frame(&self, event_id: Uuid) -> Result<Frame, NotificationError> {
        let serde_json::Value::Object(mut payload) = serde_json::to_value(self)? else {
            return Err(NotificationError::NotANotification(self.kind().to_owned()));
        };
        payload.remove("kind");
        let data: Data = payload.into_iter().collect();
        Ok(Frame::notify(event_id, self.kind(), data))
    }
}
