//! Reconciler: merges pulls, pushes, and local commits into one model.
//!
//! DESIGN
//! ======
//! The reconciler exclusively owns the client-visible model of one
//! collaboration room. Every write is state-setting on an identifiable
//! entity, so pulls and pushes can arrive in any order and any number of
//! times.
//!
//! - Snapshots replace every table that is not held by the mutation buffer.
//! - Geometry notifications touch one table; held tables drop them.
//! - Assign/unassign rewrite both sides of the seat/guest reference in one
//!   call, vacating any other seat still pointing at the guest.
//!
//! Inside a layout the seat's `guest_id` is the assignment of record. Guest
//! `table_id`/`seat_id` are re-derived from seats after every bulk write.

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod reconcile_test;

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::buffer::MutationBuffer;
use crate::model::{Guest, LayoutSnapshot, Summary, Table, TableGeometry, TablePatch};
use crate::notification::Notification;

// =============================================================================
// TYPES
// =============================================================================

/// What a reconciliation write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The visible model changed.
    Changed,
    /// Valid update, already reflected (echo or duplicate delivery).
    Unchanged,
    /// Dropped because the addressed table is held by a local edit.
    Suppressed,
    /// Not applicable locally: the addressed entity is missing, or the
    /// notification carries no state. A pull is needed.
    Stale,
}

impl Applied {
    #[must_use]
    pub fn changed(self) -> bool {
        self == Self::Changed
    }

    fn from_bool(changed: bool) -> Self {
        if changed { Self::Changed } else { Self::Unchanged }
    }

    fn merge(self, other: Self) -> Self {
        if self == Self::Changed || other == Self::Changed {
            Self::Changed
        } else {
            self
        }
    }
}

#[derive(Debug, Default)]
pub struct Reconciler {
    layout: LayoutSnapshot,
    guests: HashMap<Uuid, Guest>,
    buffer: MutationBuffer<TableGeometry>,
    server_summary: Option<Summary>,
}

// =============================================================================
// READS
// =============================================================================

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn layout(&self) -> &LayoutSnapshot {
        &self.layout
    }

    #[must_use]
    pub fn table(&self, table_id: Uuid) -> Option<&Table> {
        self.layout.table(table_id)
    }

    #[must_use]
    pub fn guest(&self, guest_id: Uuid) -> Option<&Guest> {
        self.guests.get(&guest_id)
    }

    /// Guests ordered by name, then id.
    #[must_use]
    pub fn guests_sorted(&self) -> Vec<Guest> {
        let mut guests: Vec<Guest> = self.guests.values().cloned().collect();
        guests.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
        guests
    }

    /// Counters derived from the reconciled model.
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary::derive(&self.layout.tables, self.guests.values())
    }

    /// Counters as last pulled from the server.
    #[must_use]
    pub fn server_summary(&self) -> Option<Summary> {
        self.server_summary
    }

    pub fn set_server_summary(&mut self, summary: Summary) {
        self.server_summary = Some(summary);
    }

    /// The layout as it should be drawn: reconciled tables with any
    /// in-gesture geometry laid over them.
    #[must_use]
    pub fn rendered_layout(&self) -> LayoutSnapshot {
        let mut layout = self.layout.clone();
        for id in self.buffer.suppressed() {
            if let (Some(staged), Some(table)) = (self.buffer.staged(id), layout.table_mut(id)) {
                table.apply_geometry(staged);
            }
        }
        layout
    }

    /// Full-state autosave payload.
    #[must_use]
    pub fn commit_payload(&self) -> LayoutSnapshot {
        self.layout.clone()
    }

    #[must_use]
    pub fn is_suppressed(&self, table_id: Uuid) -> bool {
        self.buffer.is_suppressed(table_id)
    }

    #[must_use]
    pub fn is_held(&self, table_id: Uuid) -> bool {
        self.buffer.is_held(table_id)
    }

    /// Committed tables whose geometry no flush has carried yet.
    #[must_use]
    pub fn unflushed_count(&self) -> usize {
        self.buffer.held().count()
    }

    /// Broken seat/guest reference invariants, one message per violation.
    /// Empty for every state the reconciler produces.
    #[cfg(test)]
    pub(crate) fn reference_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut holders: HashMap<Uuid, Vec<(Uuid, Uuid)>> = HashMap::new();
        for table in &self.layout.tables {
            for seat in &table.seats {
                if let Some(guest_id) = seat.guest_id {
                    holders.entry(guest_id).or_default().push((table.id, seat.id));
                }
            }
        }
        for (guest_id, seats) in &holders {
            if seats.len() > 1 {
                violations.push(format!("guest {guest_id} held by {} seats", seats.len()));
            }
            if let Some(guest) = self.guests.get(guest_id) {
                if guest.seat_ref() != seats.first().copied() {
                    violations.push(format!("guest {guest_id} reference disagrees with its seat"));
                }
            }
        }
        for guest in self.guests.values() {
            if guest.seat_ref().is_some() && !holders.contains_key(&guest.id) {
                violations.push(format!("guest {} points at a seat that does not hold it", guest.id));
            }
        }
        violations
    }
}

// =============================================================================
// LOCAL EDITS
// =============================================================================

impl Reconciler {
    /// Open a gesture on a table. Returns `false` for unknown tables.
    pub fn begin_edit(&mut self, table_id: Uuid) -> bool {
        if self.layout.table(table_id).is_none() {
            return false;
        }
        self.buffer.begin_edit(table_id);
        true
    }

    /// Record the in-gesture geometry of a table for rendering.
    pub fn stage_edit(&mut self, table_id: Uuid, geometry: TableGeometry) -> bool {
        self.buffer.stage(table_id, geometry)
    }

    /// Close a gesture and write its geometry into the visible model.
    /// Returns the committed geometry, or `None` if the table vanished.
    pub fn commit_edit(&mut self, table_id: Uuid, geometry: TableGeometry) -> Option<TableGeometry> {
        let Some(table) = self.layout.table_mut(table_id) else {
            self.buffer.forget(table_id);
            return None;
        };
        table.apply_geometry(&geometry);
        // Hold the normalized form so release() compares like with like.
        Some(self.buffer.commit_edit(table_id, table.geometry()))
    }

    /// Close a gesture without committing. Returns the number of remote
    /// updates dropped while it was open.
    pub fn cancel_edit(&mut self, table_id: Uuid) -> Option<usize> {
        self.buffer.cancel_edit(table_id)
    }

    /// Release holds whose geometry the server has now accepted.
    pub fn release_flushed(&mut self, flushed: &LayoutSnapshot) -> usize {
        let mut released = 0;
        for table in &flushed.tables {
            if self.buffer.release(table.id, &table.geometry()) {
                released += 1;
            }
        }
        released
    }

    /// Insert or replace a table returned by the server for a local command.
    pub fn upsert_table(&mut self, table: Table) -> Applied {
        if self.buffer.is_held(table.id) {
            return Applied::Suppressed;
        }
        let changed = match self.layout.table_mut(table.id) {
            Some(existing) if *existing == table => false,
            Some(existing) => {
                *existing = table;
                true
            }
            None => {
                self.layout.tables.push(table);
                true
            }
        };
        Applied::from_bool(changed).merge(Applied::from_bool(self.restore_references()))
    }

    /// Apply a partial update to a table.
    pub fn patch_table(&mut self, table_id: Uuid, patch: &TablePatch) -> Applied {
        let Some(table) = self.layout.table_mut(table_id) else {
            return Applied::Stale;
        };
        let before = table.clone();
        patch.apply_to(table);
        Applied::from_bool(*table != before)
    }

    /// Delete a table and vacate every guest seated at it.
    pub fn remove_table(&mut self, table_id: Uuid) -> Applied {
        let Some(index) = self.layout.tables.iter().position(|t| t.id == table_id) else {
            return Applied::Unchanged;
        };
        let table = self.layout.tables.remove(index);
        self.buffer.forget(table_id);
        for guest_id in table.seated_guests() {
            self.sync_guest_reference(guest_id);
        }
        Applied::Changed
    }

    /// Mutate one guest in place (check-in path).
    pub fn update_guest(&mut self, guest_id: Uuid, f: impl FnOnce(&mut Guest)) -> Applied {
        let Some(guest) = self.guests.get_mut(&guest_id) else {
            return Applied::Stale;
        };
        let before = guest.clone();
        f(guest);
        // Seat references are owned by assignment, never by a guest edit.
        guest.set_seat_ref(before.seat_ref());
        Applied::from_bool(*guest != before)
    }

    /// Drop every local hold. Used on surface exit.
    pub fn discard_edits(&mut self) {
        self.buffer.clear();
    }
}

// =============================================================================
// PULLS
// =============================================================================

impl Reconciler {
    /// Replace every table not held by a local edit; keep held tables as
    /// they are. Tables missing from the snapshot are removed unless held.
    pub fn apply_snapshot(&mut self, snapshot: LayoutSnapshot) -> Applied {
        let LayoutSnapshot { tables: incoming, settings } = snapshot;
        let mut next: Vec<Table> = Vec::with_capacity(incoming.len());

        for table in incoming {
            if self.buffer.is_held(table.id) {
                if let Some(local) = self.layout.table(table.id) {
                    self.buffer.record_dropped(table.id);
                    next.push(local.clone());
                    continue;
                }
            }
            next.push(table);
        }
        for local in &self.layout.tables {
            if self.buffer.is_held(local.id) && !next.iter().any(|t| t.id == local.id) {
                next.push(local.clone());
            }
        }

        let changed = next != self.layout.tables || settings != self.layout.settings;
        self.layout.tables = next;
        self.layout.settings = settings;
        Applied::from_bool(changed).merge(Applied::from_bool(self.restore_references()))
    }

    /// Replace the guest collection wholesale.
    pub fn replace_guests(&mut self, guests: Vec<Guest>) -> Applied {
        let mut next: HashMap<Uuid, Guest> = guests.into_iter().map(|g| (g.id, g)).collect();
        let mut changed = next.len() != self.guests.len();
        for (id, guest) in &mut next {
            // Keep the derived reference so that equal pulls compare equal.
            if let Some(existing) = self.guests.get(id) {
                guest.set_seat_ref(existing.seat_ref());
            }
            changed |= self.guests.get(id) != Some(&*guest);
        }
        self.guests = next;
        Applied::from_bool(changed).merge(Applied::from_bool(self.restore_references()))
    }
}

// =============================================================================
// PUSHES
// =============================================================================

impl Reconciler {
    /// Apply one pushed notification. Exhaustive over every kind.
    pub fn apply(&mut self, notification: Notification) -> Applied {
        let kind = notification.kind();
        let outcome = match notification {
            Notification::TableMoved { table_id, position, rotation } => {
                self.move_table(table_id, |g| {
                    g.position = position;
                    if let Some(rotation) = rotation {
                        g.rotation = rotation;
                    }
                })
            }
            Notification::SeatMoved { table_id, seat_id, position } => {
                if self.table(table_id).is_some_and(|t| t.seat(seat_id).is_none()) {
                    Applied::Stale
                } else {
                    self.move_table(table_id, |g| {
                        if let Some(p) = g.seats.iter_mut().find(|p| p.seat_id == seat_id) {
                            p.position = position;
                        }
                    })
                }
            }
            Notification::SeatAssigned { table_id, seat_id, guest_id, guest } => {
                self.assign(table_id, seat_id, guest_id, guest)
            }
            Notification::SeatUnassigned { table_id, seat_id, guest_id } => {
                self.unassign(table_id, seat_id, guest_id)
            }
            Notification::GuestUpdated { guest } => self.upsert_guest(guest),
            Notification::GuestRemoved { guest_id } => self.remove_guest(guest_id),
            Notification::LayoutReplaced { layout } => self.apply_snapshot(layout),
            Notification::LayoutChanged {} => Applied::Stale,
        };
        if matches!(outcome, Applied::Suppressed | Applied::Stale) {
            debug!(kind, ?outcome, "notification not applied");
        }
        outcome
    }

    fn move_table(&mut self, table_id: Uuid, edit: impl FnOnce(&mut TableGeometry)) -> Applied {
        if self.buffer.is_held(table_id) {
            self.buffer.record_dropped(table_id);
            return Applied::Suppressed;
        }
        let Some(table) = self.layout.table_mut(table_id) else {
            return Applied::Stale;
        };
        let mut geometry = table.geometry();
        edit(&mut geometry);
        Applied::from_bool(table.apply_geometry(&geometry))
    }

    /// Seat `guest_id` at `(table_id, seat_id)` as one effect: vacate every
    /// other seat holding the guest, displace the seat's previous occupant,
    /// and update both guests' references.
    pub fn assign(&mut self, table_id: Uuid, seat_id: Uuid, guest_id: Uuid, guest: Option<Guest>) -> Applied {
        if self.table(table_id).and_then(|t| t.seat(seat_id)).is_none() {
            return Applied::Stale;
        }
        let mut changed = match guest {
            Some(g) if g.id == guest_id => self.upsert_guest(g).changed(),
            _ => false,
        };

        for (t, s) in self.layout.seats_holding(guest_id) {
            if (t, s) != (table_id, seat_id) {
                if let Some(seat) = self.layout.table_mut(t).and_then(|table| table.seat_mut(s)) {
                    seat.guest_id = None;
                    changed = true;
                }
            }
        }

        let mut displaced = None;
        if let Some(seat) = self.layout.table_mut(table_id).and_then(|t| t.seat_mut(seat_id)) {
            if seat.guest_id != Some(guest_id) {
                displaced = seat.guest_id;
                seat.guest_id = Some(guest_id);
                changed = true;
            }
        }

        changed |= self.sync_guest_reference(guest_id);
        if let Some(other) = displaced {
            changed |= self.sync_guest_reference(other);
        }
        Applied::from_bool(changed)
    }

    /// Vacate `(table_id, seat_id)` if it holds `guest_id`, and clear the
    /// guest's reference if it pointed there.
    pub fn unassign(&mut self, table_id: Uuid, seat_id: Uuid, guest_id: Uuid) -> Applied {
        let mut changed = false;
        let seat_known = match self.layout.table_mut(table_id).and_then(|t| t.seat_mut(seat_id)) {
            Some(seat) => {
                if seat.guest_id == Some(guest_id) {
                    seat.guest_id = None;
                    changed = true;
                }
                true
            }
            None => false,
        };
        changed |= self.sync_guest_reference(guest_id);
        if !seat_known && !changed {
            return Applied::Stale;
        }
        Applied::from_bool(changed)
    }

    fn upsert_guest(&mut self, guest: Guest) -> Applied {
        let guest_id = guest.id;
        let changed = match self.guests.get_mut(&guest_id) {
            Some(existing) => existing.absorb(guest),
            None => {
                let mut guest = guest;
                guest.set_seat_ref(None);
                self.guests.insert(guest_id, guest);
                true
            }
        };
        let synced = self.sync_guest_reference(guest_id);
        Applied::from_bool(changed || synced)
    }

    fn remove_guest(&mut self, guest_id: Uuid) -> Applied {
        let mut changed = self.guests.remove(&guest_id).is_some();
        for (t, s) in self.layout.seats_holding(guest_id) {
            if let Some(seat) = self.layout.table_mut(t).and_then(|table| table.seat_mut(s)) {
                seat.guest_id = None;
                changed = true;
            }
        }
        Applied::from_bool(changed)
    }
}

// =============================================================================
// REFERENCE RESTORATION
// =============================================================================

impl Reconciler {
    /// Point a guest's reference at the seat holding it, or clear it.
    fn sync_guest_reference(&mut self, guest_id: Uuid) -> bool {
        let holder = self.layout.seats_holding(guest_id).first().copied();
        let Some(guest) = self.guests.get_mut(&guest_id) else {
            return false;
        };
        if guest.seat_ref() == holder {
            return false;
        }
        guest.set_seat_ref(holder);
        true
    }

    /// Re-establish both reference invariants after a bulk write.
    ///
    /// A guest held by several seats keeps the seat its own reference names
    /// (or the first in layout order); the others are vacated. Then every
    /// guest reference is re-derived from seats.
    fn restore_references(&mut self) -> bool {
        let mut changed = false;
        let mut holders: HashMap<Uuid, Vec<(Uuid, Uuid)>> = HashMap::new();
        for table in &self.layout.tables {
            for seat in &table.seats {
                if let Some(guest_id) = seat.guest_id {
                    holders.entry(guest_id).or_default().push((table.id, seat.id));
                }
            }
        }

        for (guest_id, seats) in holders.into_iter().filter(|(_, s)| s.len() > 1) {
            let own = self.guests.get(&guest_id).and_then(Guest::seat_ref);
            let keep = own.filter(|r| seats.contains(r)).unwrap_or(seats[0]);
            for (t, s) in seats.into_iter().filter(|r| *r != keep) {
                if let Some(seat) = self.layout.table_mut(t).and_then(|table| table.seat_mut(s)) {
                    seat.guest_id = None;
                    changed = true;
                }
            }
        }

        let ids: Vec<Uuid> = self.guests.keys().copied().collect();
        for guest_id in ids {
            changed |= self.sync_guest_reference(guest_id);
        }
        changed
    }
}
