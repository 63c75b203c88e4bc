//! Canonical store: the server-side source of truth for one event.
//!
//! DESIGN
//! ======
//! `CanonicalStore` is the provider-neutral seam between a room and the
//! layout server. Pulls return whole collections; commands address one
//! entity. `HttpStore` talks to the REST API; tests substitute an
//! in-memory fake.
//!
//! ERROR HANDLING
//! ==============
//! Transport and 5xx failures are transient and retried by the next
//! scheduled action. Validation failures are surfaced to the caller. A
//! missing entity on a command is a stale reference and triggers a refresh.

pub mod http;

pub use http::HttpStore;

use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::model::{Guest, GuestFilter, LayoutSettings, LayoutSnapshot, Summary, Table, TableDraft, TablePatch};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("rejected: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("http client build failed: {0}")]
    HttpClientBuild(String),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "E_STORE_TRANSPORT",
            Self::Server { .. } => "E_STORE_SERVER",
            Self::Validation(_) => "E_STORE_VALIDATION",
            Self::NotFound(_) => "E_STORE_NOT_FOUND",
            Self::Unauthorized(_) => "E_STORE_UNAUTHORIZED",
            Self::Decode(_) => "E_STORE_DECODE",
            Self::HttpClientBuild(_) => "E_STORE_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Server { .. })
    }
}

impl StoreError {
    /// The command addressed an entity the server no longer has.
    #[must_use]
    pub fn is_stale_reference(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// =============================================================================
// TRAIT
// =============================================================================

/// Async access to the canonical layout and guest list of an event.
#[async_trait::async_trait]
pub trait CanonicalStore: Send + Sync {
    async fn pull_layout(&self, event_id: Uuid) -> Result<LayoutSnapshot, StoreError>;

    async fn pull_guests(&self, event_id: Uuid, filter: &GuestFilter) -> Result<Vec<Guest>, StoreError>;

    async fn pull_summary(&self, event_id: Uuid) -> Result<Summary, StoreError>;

    /// Replace the full table list and settings. Not a diff.
    async fn commit_layout(
        &self,
        event_id: Uuid,
        tables: &[Table],
        settings: &LayoutSettings,
    ) -> Result<(), StoreError>;

    async fn add_table(&self, event_id: Uuid, draft: &TableDraft) -> Result<Table, StoreError>;

    async fn update_table(&self, event_id: Uuid, table_id: Uuid, patch: &TablePatch) -> Result<Table, StoreError>;

    async fn delete_table(&self, event_id: Uuid, table_id: Uuid) -> Result<(), StoreError>;

    async fn assign_seat(&self, event_id: Uuid, table_id: Uuid, seat_id: Uuid, guest_id: Uuid) -> Result<(), StoreError>;

    async fn unassign_seat(
        &self,
        event_id: Uuid,
        table_id: Uuid,
        seat_id: Uuid,
        guest_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn check_in(&self, event_id: Uuid, guest_id: Uuid) -> Result<Guest, StoreError>;

    async fn check_out(&self, event_id: Uuid, guest_id: Uuid) -> Result<Guest, StoreError>;
}
