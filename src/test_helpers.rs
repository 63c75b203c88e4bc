//! In-memory layout server for room tests.
//!
//! `FakeServer` implements both upstream traits. Every accepted command
//! mutates its state and fans one notification out to every connected
//! subscriber, including the one that issued it.
#![allow(clippy::cast_precision_loss, clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::channel::{ChannelError, NotificationSource, NotificationStream, ReconnectPolicy};
use crate::config::SyncConfig;
use crate::geometry::Point;
use crate::model::{
    Guest, GuestFilter, LayoutSettings, LayoutSnapshot, Seat, Summary, Table, TableDraft, TablePatch, TableShape,
};
use crate::notification::Notification;
use crate::store::{CanonicalStore, StoreError};

type Subscriber = mpsc::UnboundedSender<Result<Notification, ChannelError>>;

#[derive(Default)]
struct FakeState {
    layout: LayoutSnapshot,
    guests: Vec<Guest>,
    subscribers: Vec<Subscriber>,
    refuse_connect: bool,
    failures: VecDeque<StoreError>,
    layout_commits: usize,
    layout_pulls: usize,
}

pub struct FakeServer {
    state: Mutex<FakeState>,
}

// =============================================================================
// FIXTURES
// =============================================================================

/// `tables` round tables 300 units apart, each with `seats` seats.
pub fn sample_layout(tables: usize, seats: usize) -> LayoutSnapshot {
    let tables = (0..tables)
        .map(|i| Table {
            id: Uuid::new_v4(),
            shape: TableShape::Round,
            position: Point::new(100.0 + 300.0 * i as f64, 100.0),
            rotation: 0.0,
            width: 120.0,
            height: 120.0,
            seats: (0..seats).map(|j| Seat::new(Point::new(j as f64 * 10.0, -70.0))).collect(),
        })
        .collect();
    LayoutSnapshot { tables, settings: LayoutSettings::default() }
}

pub fn sample_guests(count: usize) -> Vec<Guest> {
    (0..count).map(|i| Guest::new(format!("Guest {i:02}"), format!("555000{i:04}"))).collect()
}

/// Defaults, with the timings the room tests are written against.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        autosave_quiescence: Duration::from_millis(1000),
        refresh_delay: Duration::from_millis(250),
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1000),
            max: Duration::from_millis(4000),
        },
        ..SyncConfig::default()
    }
}

// =============================================================================
// CONTROL
// =============================================================================

impl FakeServer {
    pub fn new(layout: LayoutSnapshot, guests: Vec<Guest>) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(FakeState { layout, guests, ..FakeState::default() }) })
    }

    pub fn layout(&self) -> LayoutSnapshot {
        self.state.lock().unwrap().layout.clone()
    }

    pub fn table(&self, table_id: Uuid) -> Option<Table> {
        self.state.lock().unwrap().layout.table(table_id).cloned()
    }

    pub fn guest(&self, guest_id: Uuid) -> Option<Guest> {
        self.state.lock().unwrap().guests.iter().find(|g| g.id == guest_id).cloned()
    }

    pub fn layout_commits(&self) -> usize {
        self.state.lock().unwrap().layout_commits
    }

    pub fn layout_pulls(&self) -> usize {
        self.state.lock().unwrap().layout_pulls
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|s| !s.is_closed());
        state.subscribers.len()
    }

    /// Fail the next store call with `err`.
    pub fn fail_next(&self, err: StoreError) {
        self.state.lock().unwrap().failures.push_back(err);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connect = refuse;
    }

    /// End every open notification stream.
    pub fn disconnect_all(&self) {
        self.state.lock().unwrap().subscribers.clear();
    }

    /// Move a table without notifying anyone, as if the push was lost.
    pub fn move_table_silently(&self, table_id: Uuid, position: Point) {
        if let Some(table) = self.state.lock().unwrap().layout.table_mut(table_id) {
            table.position = position;
        }
    }

    /// Tell every subscriber the layout changed without saying how.
    pub fn announce_layout_change(&self) {
        broadcast(&mut self.state.lock().unwrap(), &Notification::LayoutChanged {});
    }

    /// Move a table and notify every subscriber, as another client would.
    pub fn move_table(&self, table_id: Uuid, position: Point) {
        let mut state = self.state.lock().unwrap();
        let Some(table) = state.layout.table_mut(table_id) else {
            return;
        };
        table.position = position;
        let rotation = table.rotation;
        broadcast(&mut state, &Notification::TableMoved { table_id, position, rotation: Some(rotation) });
    }
}

fn broadcast(state: &mut FakeState, notification: &Notification) {
    state
        .subscribers
        .retain(|s| s.unbounded_send(Ok(notification.clone())).is_ok());
}

fn take_failure(state: &mut FakeState) -> Result<(), StoreError> {
    match state.failures.pop_front() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

// =============================================================================
// STORE
// =============================================================================

#[async_trait::async_trait]
impl CanonicalStore for FakeServer {
    async fn pull_layout(&self, _event_id: Uuid) -> Result<LayoutSnapshot, StoreError> {
        let mut state = self.state.lock().unwrap();
        take_failure(&mut state)?;
        state.layout_pulls += 1;
        Ok(state.layout.clone())
    }

    async fn pull_guests(&self, _event_id: Uuid, filter: &GuestFilter) -> Result<Vec<Guest>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.guests.iter().filter(|g| filter.matches(g)).cloned().collect())
    }

    async fn pull_summary(&self, _event_id: Uuid) -> Result<Summary, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(Summary::derive(&state.layout.tables, &state.guests))
    }

    async fn commit_layout(
        &self,
        _event_id: Uuid,
        tables: &[Table],
        settings: &LayoutSettings,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        take_failure(&mut state)?;
        state.layout_commits += 1;
        let previous = std::mem::take(&mut state.layout.tables);
        state.layout = LayoutSnapshot { tables: tables.to_vec(), settings: settings.clone() };
        for table in tables {
            let moved = previous
                .iter()
                .find(|t| t.id == table.id)
                .is_none_or(|t| t.position != table.position || t.rotation != table.rotation);
            if moved {
                let n = Notification::TableMoved {
                    table_id: table.id,
                    position: table.position,
                    rotation: Some(table.rotation),
                };
                broadcast(&mut state, &n);
            }
        }
        Ok(())
    }

    async fn add_table(&self, _event_id: Uuid, draft: &TableDraft) -> Result<Table, StoreError> {
        let mut state = self.state.lock().unwrap();
        take_failure(&mut state)?;
        let radius = draft.width / 2.0 + 20.0;
        let seats = (0..draft.num_seats)
            .map(|i| {
                let angle = std::f64::consts::TAU * f64::from(i) / f64::from(draft.num_seats);
                Seat::new(Point::new(radius * angle.cos(), radius * angle.sin()))
            })
            .collect();
        let table = Table {
            id: Uuid::new_v4(),
            shape: draft.shape,
            position: draft.position,
            rotation: draft.rotation,
            width: draft.width,
            height: draft.height,
            seats,
        };
        state.layout.tables.push(table.clone());
        let layout = state.layout.clone();
        broadcast(&mut state, &Notification::LayoutReplaced { layout });
        Ok(table)
    }

    async fn update_table(&self, _event_id: Uuid, table_id: Uuid, patch: &TablePatch) -> Result<Table, StoreError> {
        let mut state = self.state.lock().unwrap();
        take_failure(&mut state)?;
        let Some(table) = state.layout.table_mut(table_id) else {
            return Err(StoreError::NotFound("Table not found".into()));
        };
        patch.apply_to(table);
        let table = table.clone();
        let layout = state.layout.clone();
        broadcast(&mut state, &Notification::LayoutReplaced { layout });
        Ok(table)
    }

    async fn delete_table(&self, _event_id: Uuid, table_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        take_failure(&mut state)?;
        let before = state.layout.tables.len();
        state.layout.tables.retain(|t| t.id != table_id);
        if state.layout.tables.len() == before {
            return Err(StoreError::NotFound("Table not found".into()));
        }
        for guest in &mut state.guests {
            if guest.table_id == Some(table_id) {
                guest.set_seat_ref(None);
            }
        }
        let layout = state.layout.clone();
        broadcast(&mut state, &Notification::LayoutReplaced { layout });
        Ok(())
    }

    async fn assign_seat(&self, _event_id: Uuid, table_id: Uuid, seat_id: Uuid, guest_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        take_failure(&mut state)?;
        if !state.guests.iter().any(|g| g.id == guest_id) {
            return Err(StoreError::NotFound("Guest not found".into()));
        }
        if state.layout.table(table_id).and_then(|t| t.seat(seat_id)).is_none() {
            return Err(StoreError::NotFound("Seat not found".into()));
        }
        for table in &mut state.layout.tables {
            for seat in &mut table.seats {
                if seat.guest_id == Some(guest_id) {
                    seat.guest_id = None;
                }
            }
        }
        let mut displaced = None;
        if let Some(seat) = state.layout.table_mut(table_id).and_then(|t| t.seat_mut(seat_id)) {
            displaced = seat.guest_id.replace(guest_id);
        }
        for guest in &mut state.guests {
            if guest.id == guest_id {
                guest.set_seat_ref(Some((table_id, seat_id)));
            } else if Some(guest.id) == displaced {
                guest.set_seat_ref(None);
            }
        }
        let guest = state.guests.iter().find(|g| g.id == guest_id).cloned();
        broadcast(&mut state, &Notification::SeatAssigned { table_id, seat_id, guest_id, guest });
        Ok(())
    }

    async fn unassign_seat(
        &self,
        _event_id: Uuid,
        table_id: Uuid,
        seat_id: Uuid,
        guest_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        take_failure(&mut state)?;
        let Some(seat) = state.layout.table_mut(table_id).and_then(|t| t.seat_mut(seat_id)) else {
            return Err(StoreError::NotFound("Seat not found".into()));
        };
        if seat.guest_id == Some(guest_id) {
            seat.guest_id = None;
        }
        for guest in &mut state.guests {
            if guest.id == guest_id {
                guest.set_seat_ref(None);
            }
        }
        broadcast(&mut state, &Notification::SeatUnassigned { table_id, seat_id, guest_id });
        Ok(())
    }

    async fn check_in(&self, _event_id: Uuid, guest_id: Uuid) -> Result<Guest, StoreError> {
        self.set_checked_in(guest_id, true)
    }

    async fn check_out(&self, _event_id: Uuid, guest_id: Uuid) -> Result<Guest, StoreError> {
        self.set_checked_in(guest_id, false)
    }
}

impl FakeServer {
    fn set_checked_in(&self, guest_id: Uuid, checked_in: bool) -> Result<Guest, StoreError> {
        let mut state = self.state.lock().unwrap();
        take_failure(&mut state)?;
        let Some(guest) = state.guests.iter_mut().find(|g| g.id == guest_id) else {
            return Err(StoreError::NotFound("Guest not found".into()));
        };
        match (checked_in, guest.checked_in) {
            (true, true) => return Err(StoreError::Validation("Guest already checked in".into())),
            (false, false) => return Err(StoreError::Validation("Guest is not checked in".into())),
            (true, false) => {
                guest.check_in(now());
                guest.checked_in_by = Some("staff".into());
            }
            (false, true) => guest.check_out(now()),
        }
        let guest = guest.clone();
        broadcast(&mut state, &Notification::GuestUpdated { guest: guest.clone() });
        Ok(guest)
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

#[async_trait::async_trait]
impl NotificationSource for FakeServer {
    async fn connect(&self, _event_id: Uuid) -> Result<NotificationStream, ChannelError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connect {
            return Err(ChannelError::Connect("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded();
        state.subscribers.push(tx);
        Ok(rx.boxed())
    }
}
