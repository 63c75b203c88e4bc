//! Check-in path: direct guest status commands with an optimistic flip.
//!
//! DESIGN
//! ======
//! Check-in and check-out never go through the mutation buffer. The room
//! validates locally, flips the guest at once, sends the command, and then
//! reconciles the server's copy of the guest through the guest-updated
//! path. A failure schedules a refresh so the flip converges to server
//! truth.

#[cfg(test)]
#[path = "checkin_test.rs"]
mod checkin_test;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::model::Guest;
use crate::notification::Notification;
use crate::reconcile::{Applied, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckAction {
    CheckIn,
    CheckOut,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CheckInError {
    #[error("guest not found: {0}")]
    UnknownGuest(Uuid),
    #[error("guest {0} is already checked in")]
    AlreadyCheckedIn(Uuid),
    #[error("guest {0} is not checked in")]
    NotCheckedIn(Uuid),
}

impl ErrorCode for CheckInError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownGuest(_) => "E_GUEST_NOT_FOUND",
            Self::AlreadyCheckedIn(_) => "E_ALREADY_CHECKED_IN",
            Self::NotCheckedIn(_) => "E_NOT_CHECKED_IN",
        }
    }
}

impl CheckAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckIn => "check_in",
            Self::CheckOut => "check_out",
        }
    }

    /// Reject a transition the guest is not in a state for.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyCheckedIn` or `NotCheckedIn` for a redundant action.
    pub fn validate(self, guest: &Guest) -> Result<(), CheckInError> {
        match (self, guest.checked_in) {
            (Self::CheckIn, true) => Err(CheckInError::AlreadyCheckedIn(guest.id)),
            (Self::CheckOut, false) => Err(CheckInError::NotCheckedIn(guest.id)),
            _ => Ok(()),
        }
    }

    /// Flip the guest's status. Neither direction clears the other timestamp.
    pub fn apply(self, guest: &mut Guest, at: OffsetDateTime) {
        match self {
            Self::CheckIn => guest.check_in(at),
            Self::CheckOut => guest.check_out(at),
        }
    }
}

/// Validate and flip a guest in the reconciled model.
///
/// # Errors
///
/// Returns `UnknownGuest` if the guest is not loaded, or the validation
/// error for a redundant action. The model is untouched on error.
pub fn flip_optimistically(
    reconciler: &mut Reconciler,
    guest_id: Uuid,
    action: CheckAction,
    at: OffsetDateTime,
) -> Result<Applied, CheckInError> {
    let guest = reconciler.guest(guest_id).ok_or(CheckInError::UnknownGuest(guest_id))?;
    action.validate(guest)?;
    Ok(reconciler.update_guest(guest_id, |g| action.apply(g, at)))
}

/// Reconcile the server's copy of a guest after a command succeeded.
pub fn confirm(reconciler: &mut Reconciler, guest: Guest) -> Applied {
    reconciler.apply(Notification::GuestUpdated { guest })
}
