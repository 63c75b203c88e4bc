//! Seating model: tables, seats, guests, layout snapshots, counters.
//!
//! DESIGN
//! ======
//! Plain serde values. A seat's guest reference is the assignment of record
//! inside a layout; the guest's `table_id`/`seat_id` pair mirrors it and is
//! kept in agreement by the reconciler. Seat display status is derived, never
//! stored.

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::geometry::{Point, normalize_degrees};

// =============================================================================
// TABLES AND SEATS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableShape {
    Round,
    Rectangular,
}

/// A seat, positioned relative to its table's local origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub id: Uuid,
    pub position: Point,
    /// Facing direction in degrees, relative to the table.
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub guest_id: Option<Uuid>,
}

impl Seat {
    #[must_use]
    pub fn new(position: Point) -> Self {
        Self { id: Uuid::new_v4(), position, rotation: 0.0, guest_id: None }
    }

    /// Derived display status. `checked_in` is the flag of the referenced guest.
    #[must_use]
    pub fn status(&self, checked_in: bool) -> SeatStatus {
        match (self.guest_id, checked_in) {
            (None, _) => SeatStatus::Empty,
            (Some(_), false) => SeatStatus::Assigned,
            (Some(_), true) => SeatStatus::CheckedIn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatStatus {
    Empty,
    Assigned,
    CheckedIn,
}

/// A table in world space with its ordered seats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: Uuid,
    pub shape: TableShape,
    pub position: Point,
    #[serde(default)]
    pub rotation: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub seats: Vec<Seat>,
}

impl Table {
    #[must_use]
    pub fn seat(&self, seat_id: Uuid) -> Option<&Seat> {
        self.seats.iter().find(|s| s.id == seat_id)
    }

    pub fn seat_mut(&mut self, seat_id: Uuid) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|s| s.id == seat_id)
    }

    /// Snapshot of everything a drag can change on this table.
    #[must_use]
    pub fn geometry(&self) -> TableGeometry {
        TableGeometry {
            position: self.position,
            rotation: self.rotation,
            seats: self
                .seats
                .iter()
                .map(|s| SeatPlacement { seat_id: s.id, position: s.position })
                .collect(),
        }
    }

    /// Overwrite geometry, leaving seat assignments untouched.
    /// Returns `true` if anything changed.
    pub fn apply_geometry(&mut self, geometry: &TableGeometry) -> bool {
        let mut changed = false;
        let rotation = normalize_degrees(geometry.rotation);
        if self.position != geometry.position {
            self.position = geometry.position;
            changed = true;
        }
        if self.rotation != rotation {
            self.rotation = rotation;
            changed = true;
        }
        for placement in &geometry.seats {
            if let Some(seat) = self.seat_mut(placement.seat_id) {
                if seat.position != placement.position {
                    seat.position = placement.position;
                    changed = true;
                }
            }
        }
        changed
    }

    /// Guest ids currently seated at this table.
    pub fn seated_guests(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.seats.iter().filter_map(|s| s.guest_id)
    }
}

/// Position of one seat inside a [`TableGeometry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeatPlacement {
    pub seat_id: Uuid,
    pub position: Point,
}

/// Geometry of a table and its seats, as buffered during a gesture.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGeometry {
    pub position: Point,
    pub rotation: f64,
    pub seats: Vec<SeatPlacement>,
}

impl TableGeometry {
    #[must_use]
    pub fn with_position(mut self, position: Point) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn with_seat_position(mut self, seat_id: Uuid, position: Point) -> Self {
        if let Some(p) = self.seats.iter_mut().find(|p| p.seat_id == seat_id) {
            p.position = position;
        }
        self
    }
}

/// Fields for a table the editor is about to create. The server generates
/// the seats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDraft {
    pub shape: TableShape,
    pub position: Point,
    pub width: f64,
    pub height: f64,
    pub num_seats: u32,
    #[serde(default)]
    pub rotation: f64,
}

/// Partial table update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TablePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl TablePatch {
    /// Apply to a table. Non-positive sizes are ignored.
    pub fn apply_to(&self, table: &mut Table) {
        if let Some(position) = self.position {
            table.position = position;
        }
        if let Some(rotation) = self.rotation {
            table.rotation = normalize_degrees(rotation);
        }
        if let Some(width) = self.width.filter(|w| *w > 0.0) {
            table.width = width;
        }
        if let Some(height) = self.height.filter(|h| *h > 0.0) {
            table.height = height;
        }
    }
}

// =============================================================================
// GUESTS
// =============================================================================

/// Guest timestamps are written as RFC 3339. Reads also accept ISO 8601
/// without an offset, which is taken as UTC.
mod iso_timestamp {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use time::format_description::well_known::{Iso8601, Rfc3339};
    use time::{OffsetDateTime, PrimitiveDateTime};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error> {
        time::serde::rfc3339::option::serialize(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error> {
        Option::<String>::deserialize(deserializer)?.map(|raw| parse(&raw).map_err(de::Error::custom)).transpose()
    }

    fn parse(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
        OffsetDateTime::parse(raw, &Rfc3339)
            .or_else(|_| PrimitiveDateTime::parse(raw, &Iso8601::PARSING).map(PrimitiveDateTime::assume_utc))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guest {
    pub id: Uuid,
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub table_id: Option<Uuid>,
    #[serde(default)]
    pub seat_id: Option<Uuid>,
    #[serde(default)]
    pub checked_in: bool,
    #[serde(default, with = "iso_timestamp")]
    pub checked_in_at: Option<OffsetDateTime>,
    #[serde(default, with = "iso_timestamp")]
    pub checked_out_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub checked_in_by: Option<String>,
}

impl Guest {
    #[must_use]
    pub fn new(full_name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            full_name: full_name.into(),
            phone: phone.into(),
            company: None,
            email: None,
            notes: None,
            table_id: None,
            seat_id: None,
            checked_in: false,
            checked_in_at: None,
            checked_out_at: None,
            checked_in_by: None,
        }
    }

    /// `(table_id, seat_id)` if the guest is seated.
    #[must_use]
    pub fn seat_ref(&self) -> Option<(Uuid, Uuid)> {
        self.table_id.zip(self.seat_id)
    }

    pub fn set_seat_ref(&mut self, seat_ref: Option<(Uuid, Uuid)>) {
        self.table_id = seat_ref.map(|(t, _)| t);
        self.seat_id = seat_ref.map(|(_, s)| s);
    }

    /// Mark checked in. Refreshes `checked_in_at`; checkout history stays.
    pub fn check_in(&mut self, at: OffsetDateTime) {
        self.checked_in = true;
        self.checked_in_at = Some(at);
    }

    /// Mark checked out. Check-in history stays.
    pub fn check_out(&mut self, at: OffsetDateTime) {
        self.checked_in = false;
        self.checked_out_at = Some(at);
    }

    /// Take every field from `incoming` except the seat reference.
    /// Returns `true` if anything changed.
    pub fn absorb(&mut self, incoming: Guest) -> bool {
        let seat_ref = self.seat_ref();
        let mut next = incoming;
        next.set_seat_ref(seat_ref);
        if *self == next {
            return false;
        }
        *self = next;
        true
    }
}

/// Optional server-side filter for guest pulls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestFilter {
    /// Case-insensitive match on name, or substring match on phone.
    pub search: Option<String>,
    pub checked_in: Option<bool>,
}

impl GuestFilter {
    #[must_use]
    pub fn matches(&self, guest: &Guest) -> bool {
        if let Some(checked_in) = self.checked_in {
            if guest.checked_in != checked_in {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                guest
                    .full_name
                    .to_lowercase()
                    .contains(&term.to_lowercase())
                    || guest.phone.contains(term)
            }
        }
    }
}

// =============================================================================
// LAYOUT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSettings {
    pub grid_size: f64,
    pub snap_to_grid: bool,
    pub canvas_width: f64,
    pub canvas_height: f64,
    pub show_grid: bool,
    #[serde(alias = "floor_plan_url")]
    pub background: Option<String>,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            grid_size: 20.0,
            snap_to_grid: true,
            canvas_width: 2000.0,
            canvas_height: 1500.0,
            show_grid: true,
            background: None,
        }
    }
}

/// Point-in-time copy of a whole layout. Also the autosave payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutSnapshot {
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub settings: LayoutSettings,
}

impl LayoutSnapshot {
    #[must_use]
    pub fn table(&self, table_id: Uuid) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == table_id)
    }

    pub fn table_mut(&mut self, table_id: Uuid) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == table_id)
    }

    /// Every `(table_id, seat_id)` whose seat holds `guest_id`, in layout order.
    #[must_use]
    pub fn seats_holding(&self, guest_id: Uuid) -> Vec<(Uuid, Uuid)> {
        self.tables
            .iter()
            .flat_map(|t| {
                t.seats
                    .iter()
                    .filter(move |s| s.guest_id == Some(guest_id))
                    .map(move |s| (t.id, s.id))
            })
            .collect()
    }
}

// =============================================================================
// COUNTERS
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Summary {
    pub total_guests: usize,
    pub checked_in: usize,
    pub checked_out: usize,
    /// Neither checked in nor ever checked out.
    pub pending: usize,
    pub total_tables: usize,
    pub total_seats: usize,
    pub assigned_seats: usize,
}

impl Summary {
    #[must_use]
    pub fn derive<'a>(tables: &[Table], guests: impl IntoIterator<Item = &'a Guest>) -> Self {
        let mut summary = Self {
            total_tables: tables.len(),
            total_seats: tables.iter().map(|t| t.seats.len()).sum(),
            assigned_seats: tables.iter().map(|t| t.seated_guests().count()).sum(),
            ..Self::default()
        };
        for guest in guests {
            summary.total_guests += 1;
            if guest.checked_in {
                summary.checked_in += 1;
            } else if guest.checked_out_at.is_some() {
                summary.checked_out += 1;
            } else {
                summary.pending += 1;
            }
        }
        summary
    }
}
