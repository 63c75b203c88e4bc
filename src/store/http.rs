//! REST adapter for [`CanonicalStore`].
//!
//! Thin reqwest wrapper over `{base}/api/events/{event_id}/…`. Status
//! classification and body parsing are pure functions for testability.

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{CanonicalStore, StoreError};
use crate::config::SyncConfig;
use crate::model::{Guest, GuestFilter, LayoutSettings, LayoutSnapshot, Summary, Table, TableDraft, TablePatch};

// =============================================================================
// CLIENT
// =============================================================================

pub struct HttpStore {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpStore {
    /// Build a store client.
    ///
    /// # Errors
    ///
    /// Returns `HttpClientBuild` if the underlying client fails to build.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| StoreError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned(), token })
    }

    /// # Errors
    ///
    /// Returns `HttpClientBuild` if the underlying client fails to build.
    pub fn from_config(config: &SyncConfig) -> Result<Self, StoreError> {
        Self::new(
            &config.base_url,
            config.token.clone(),
            config.request_timeout,
            config.connect_timeout,
        )
    }

    fn event_url(&self, event_id: Uuid, path: &str) -> String {
        format!("{}/api/events/{event_id}{path}", self.base_url)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<String, StoreError> {
        debug!(%method, url, "store request");
        let mut request = self.http.request(method, url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(classify(status, &text));
        }
        Ok(text)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T, StoreError> {
        let text = self.send::<()>(Method::GET, url, query, None).await?;
        parse_json(&text)
    }
}

// =============================================================================
// TRAIT IMPL
// =============================================================================

#[async_trait::async_trait]
impl CanonicalStore for HttpStore {
    async fn pull_layout(&self, event_id: Uuid) -> Result<LayoutSnapshot, StoreError> {
        let wire: LayoutWire = self.get(&self.event_url(event_id, "/layout"), &[]).await?;
        Ok(wire.into())
    }

    async fn pull_guests(&self, event_id: Uuid, filter: &GuestFilter) -> Result<Vec<Guest>, StoreError> {
        self.get(&self.event_url(event_id, "/guests"), &guest_query(filter)).await
    }

    async fn pull_summary(&self, event_id: Uuid) -> Result<Summary, StoreError> {
        let wire: AttendanceWire = self.get(&self.event_url(event_id, "/reports/attendance"), &[]).await?;
        Ok(wire.into())
    }

    async fn commit_layout(
        &self,
        event_id: Uuid,
        tables: &[Table],
        settings: &LayoutSettings,
    ) -> Result<(), StoreError> {
        let body = LayoutUpdateWire {
            tables,
            config: settings,
            floor_plan_url: settings.background.as_deref(),
        };
        self.send(Method::PUT, &self.event_url(event_id, "/layout"), &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn add_table(&self, event_id: Uuid, draft: &TableDraft) -> Result<Table, StoreError> {
        let text = self
            .send(Method::POST, &self.event_url(event_id, "/layout/tables"), &[], Some(draft))
            .await?;
        parse_json(&text)
    }

    async fn update_table(&self, event_id: Uuid, table_id: Uuid, patch: &TablePatch) -> Result<Table, StoreError> {
        let url = self.event_url(event_id, &format!("/layout/tables/{table_id}"));
        let text = self.send(Method::PUT, &url, &[], Some(patch)).await?;
        parse_json(&text)
    }

    async fn delete_table(&self, event_id: Uuid, table_id: Uuid) -> Result<(), StoreError> {
        let url = self.event_url(event_id, &format!("/layout/tables/{table_id}"));
        self.send::<()>(Method::DELETE, &url, &[], None).await?;
        Ok(())
    }

    async fn assign_seat(&self, event_id: Uuid, table_id: Uuid, seat_id: Uuid, guest_id: Uuid) -> Result<(), StoreError> {
        let body = SeatAssignmentWire { table_id, seat_id, guest_id };
        self.send(Method::POST, &self.event_url(event_id, "/layout/assign-seat"), &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn unassign_seat(
        &self,
        event_id: Uuid,
        table_id: Uuid,
        seat_id: Uuid,
        guest_id: Uuid,
    ) -> Result<(), StoreError> {
        let body = SeatAssignmentWire { table_id, seat_id, guest_id };
        self.send(Method::POST, &self.event_url(event_id, "/layout/unassign-seat"), &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn check_in(&self, event_id: Uuid, guest_id: Uuid) -> Result<Guest, StoreError> {
        let text = self
            .send(Method::POST, &self.event_url(event_id, "/checkin"), &[], Some(&GuestRef { guest_id }))
            .await?;
        parse_json::<GuestEnvelope>(&text).map(|e| e.guest)
    }

    async fn check_out(&self, event_id: Uuid, guest_id: Uuid) -> Result<Guest, StoreError> {
        let text = self
            .send(Method::POST, &self.event_url(event_id, "/checkout"), &[], Some(&GuestRef { guest_id }))
            .await?;
        parse_json::<GuestEnvelope>(&text).map(|e| e.guest)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct LayoutWire {
    #[serde(default)]
    tables: Vec<Table>,
    #[serde(default)]
    config: Option<LayoutSettings>,
    #[serde(default)]
    floor_plan_url: Option<String>,
}

impl From<LayoutWire> for LayoutSnapshot {
    fn from(wire: LayoutWire) -> Self {
        let mut settings = wire.config.unwrap_or_default();
        if wire.floor_plan_url.is_some() {
            settings.background = wire.floor_plan_url;
        }
        Self { tables: wire.tables, settings }
    }
}

#[derive(Serialize)]
struct LayoutUpdateWire<'a> {
    tables: &'a [Table],
    config: &'a LayoutSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    floor_plan_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct AttendanceWire {
    #[serde(default)]
    total_guests: usize,
    #[serde(default)]
    checked_in_count: usize,
    #[serde(default)]
    checked_out_count: usize,
    #[serde(default)]
    pending_count: usize,
    #[serde(default)]
    total_tables: usize,
    #[serde(default)]
    total_seats: usize,
    #[serde(default)]
    assigned_seats: usize,
}

impl From<AttendanceWire> for Summary {
    fn from(wire: AttendanceWire) -> Self {
        Self {
            total_guests: wire.total_guests,
            checked_in: wire.checked_in_count,
            checked_out: wire.checked_out_count,
            pending: wire.pending_count,
            total_tables: wire.total_tables,
            total_seats: wire.total_seats,
            assigned_seats: wire.assigned_seats,
        }
    }
}

#[derive(Serialize)]
struct SeatAssignmentWire {
    table_id: Uuid,
    seat_id: Uuid,
    guest_id: Uuid,
}

#[derive(Serialize)]
struct GuestRef {
    guest_id: Uuid,
}

#[derive(Deserialize)]
struct GuestEnvelope {
    guest: Guest,
}

// =============================================================================
// PURE HELPERS
// =============================================================================

/// Map a non-2xx response onto the error taxonomy.
pub(crate) fn classify(status: u16, body: &str) -> StoreError {
    let detail = error_detail(body);
    match status {
        400 | 409 | 422 => StoreError::Validation(detail),
        401 | 403 => StoreError::Unauthorized(detail),
        404 => StoreError::NotFound(detail),
        _ => StoreError::Server { status, body: detail },
    }
}

/// The `detail` field of a JSON error body, or the raw body.
pub(crate) fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match v.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.to_owned())
}

pub(crate) fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Decode(e.to_string()))
}

pub(crate) fn guest_query(filter: &GuestFilter) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query.push(("search", search.to_owned()));
    }
    if let Some(checked_in) = filter.checked_in {
        query.push(("checked_in", checked_in.to_string()));
    }
    query
}
