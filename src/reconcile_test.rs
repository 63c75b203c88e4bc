#![allow(clippy::cast_precision_loss)]

use super::*;
use crate::geometry::Point;
use crate::model::{Seat, TableShape};

fn table(seats: usize) -> Table {
    Table {
        id: Uuid::new_v4(),
        shape: TableShape::Round,
        position: Point::new(100.0, 100.0),
        rotation: 0.0,
        width: 120.0,
        height: 120.0,
        seats: (0..seats).map(|i| Seat::new(Point::new(i as f64 * 10.0, 0.0))).collect(),
    }
}

fn seeded(tables: usize, seats: usize, guests: usize) -> (Reconciler, Vec<Table>, Vec<Guest>) {
    let tables: Vec<Table> = (0..tables).map(|_| table(seats)).collect();
    let guests: Vec<Guest> = (0..guests).map(|i| Guest::new(format!("Guest {i}"), "555")).collect();
    let mut rec = Reconciler::new();
    rec.apply_snapshot(LayoutSnapshot { tables: tables.clone(), ..LayoutSnapshot::default() });
    rec.replace_guests(guests.clone());
    (rec, tables, guests)
}

fn moved(table_id: Uuid, x: f64, y: f64) -> Notification {
    Notification::TableMoved { table_id, position: Point::new(x, y), rotation: None }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[test]
fn snapshot_twice_is_unchanged() {
    let (mut rec, tables, _) = seeded(2, 4, 0);
    let again = LayoutSnapshot { tables, ..LayoutSnapshot::default() };
    assert_eq!(rec.apply_snapshot(again), Applied::Unchanged);
}

#[test]
fn snapshot_removes_missing_tables() {
    let (mut rec, tables, _) = seeded(2, 2, 0);
    let keep = tables[0].clone();
    assert_eq!(
        rec.apply_snapshot(LayoutSnapshot { tables: vec![keep.clone()], ..LayoutSnapshot::default() }),
        Applied::Changed
    );
    assert_eq!(rec.layout().tables, vec![keep]);
}

#[test]
fn snapshot_leaves_suppressed_table_untouched() {
    let (mut rec, tables, _) = seeded(2, 2, 0);
    let dragged = tables[0].id;
    assert!(rec.begin_edit(dragged));

    let mut remote = tables.clone();
    remote[0].position = Point::new(900.0, 900.0);
    remote[1].position = Point::new(5.0, 5.0);
    rec.apply_snapshot(LayoutSnapshot { tables: remote, ..LayoutSnapshot::default() });

    assert_eq!(rec.table(dragged).map(|t| t.position), Some(Point::new(100.0, 100.0)));
    assert_eq!(rec.table(tables[1].id).map(|t| t.position), Some(Point::new(5.0, 5.0)));
    assert_eq!(rec.cancel_edit(dragged), Some(1));
}

#[test]
fn snapshot_keeps_held_table_it_omits() {
    let (mut rec, tables, _) = seeded(1, 1, 0);
    let id = tables[0].id;
    rec.begin_edit(id);
    rec.apply_snapshot(LayoutSnapshot::default());
    assert!(rec.table(id).is_some());
}

#[test]
fn snapshot_restores_guest_references_from_seats() {
    let (mut rec, mut tables, guests) = seeded(1, 2, 1);
    tables[0].seats[1].guest_id = Some(guests[0].id);
    rec.apply_snapshot(LayoutSnapshot { tables: tables.clone(), ..LayoutSnapshot::default() });
    assert_eq!(rec.guest(guests[0].id).and_then(Guest::seat_ref), Some((tables[0].id, tables[0].seats[1].id)));
    assert!(rec.reference_violations().is_empty());
}

#[test]
fn snapshot_with_duplicate_holders_keeps_one() {
    let (mut rec, mut tables, guests) = seeded(2, 1, 1);
    let guest_id = guests[0].id;
    tables[0].seats[0].guest_id = Some(guest_id);
    tables[1].seats[0].guest_id = Some(guest_id);
    rec.apply_snapshot(LayoutSnapshot { tables, ..LayoutSnapshot::default() });
    assert_eq!(rec.layout().seats_holding(guest_id).len(), 1);
    assert!(rec.reference_violations().is_empty());
}

// =============================================================================
// GUEST PULLS
// =============================================================================

#[test]
fn replace_guests_drops_absent_and_keeps_references() {
    let (mut rec, tables, guests) = seeded(1, 1, 2);
    let (t, s) = (tables[0].id, tables[0].seats[0].id);
    rec.assign(t, s, guests[0].id, None);

    // Server copy without the derived reference fields.
    let pulled = vec![guests[0].clone()];
    assert_eq!(rec.replace_guests(pulled.clone()), Applied::Changed);
    assert!(rec.guest(guests[1].id).is_none());
    assert_eq!(rec.guest(guests[0].id).and_then(Guest::seat_ref), Some((t, s)));
    assert_eq!(rec.replace_guests(pulled), Applied::Unchanged);
}

// =============================================================================
// GEOMETRY NOTIFICATIONS
// =============================================================================

#[test]
fn table_moved_is_idempotent() {
    let (mut rec, tables, _) = seeded(1, 2, 0);
    let n = moved(tables[0].id, 40.0, 60.0);
    assert_eq!(rec.apply(n.clone()), Applied::Changed);
    assert_eq!(rec.apply(n), Applied::Unchanged);
    assert_eq!(rec.table(tables[0].id).map(|t| t.position), Some(Point::new(40.0, 60.0)));
}

#[test]
fn table_moved_for_unknown_table_is_stale() {
    let (mut rec, _, _) = seeded(1, 1, 0);
    assert_eq!(rec.apply(moved(Uuid::new_v4(), 1.0, 1.0)), Applied::Stale);
}

#[test]
fn table_moved_without_rotation_keeps_current_rotation() {
    let (mut rec, tables, _) = seeded(1, 2, 0);
    let id = tables[0].id;
    let turned = Notification::TableMoved { table_id: id, position: Point::new(10.0, 10.0), rotation: Some(90.0) };
    assert_eq!(rec.apply(turned), Applied::Changed);

    assert_eq!(rec.apply(moved(id, 40.0, 60.0)), Applied::Changed);
    let table = rec.table(id).unwrap();
    assert_eq!(table.position, Point::new(40.0, 60.0));
    assert!((table.rotation - 90.0).abs() < 1e-9);
}

#[test]
fn layout_changed_asks_for_a_pull_and_touches_nothing() {
    let (mut rec, tables, _) = seeded(2, 2, 1);
    let before = rec.layout().clone();
    assert_eq!(rec.apply(Notification::LayoutChanged {}), Applied::Stale);
    assert_eq!(rec.layout(), &before);
    assert_eq!(rec.table(tables[1].id), before.table(tables[1].id));
}

#[test]
fn seat_moved_updates_one_seat() {
    let (mut rec, tables, _) = seeded(1, 3, 0);
    let seat_id = tables[0].seats[2].id;
    let n = Notification::SeatMoved { table_id: tables[0].id, seat_id, position: Point::new(-5.0, 7.0) };
    assert_eq!(rec.apply(n), Applied::Changed);
    let table = rec.table(tables[0].id).cloned().unwrap();
    assert_eq!(table.seat(seat_id).map(|s| s.position), Some(Point::new(-5.0, 7.0)));
    assert_eq!(table.seats[0].position, tables[0].seats[0].position);
}

#[test]
fn seat_moved_for_unknown_seat_is_stale() {
    let (mut rec, tables, _) = seeded(1, 1, 0);
    let n = Notification::SeatMoved { table_id: tables[0].id, seat_id: Uuid::new_v4(), position: Point::default() };
    assert_eq!(rec.apply(n), Applied::Stale);
}

#[test]
fn geometry_for_suppressed_table_is_dropped_while_others_apply() {
    let (mut rec, tables, _) = seeded(2, 1, 0);
    let (a, b) = (tables[0].id, tables[1].id);
    rec.begin_edit(a);

    assert_eq!(rec.apply(moved(a, 1.0, 1.0)), Applied::Suppressed);
    assert_eq!(rec.apply(moved(b, 2.0, 2.0)), Applied::Changed);
    assert_eq!(rec.table(a).map(|t| t.position), Some(Point::new(100.0, 100.0)));
}

#[test]
fn rendered_layout_overlays_staged_geometry() {
    let (mut rec, tables, _) = seeded(1, 1, 0);
    let id = tables[0].id;
    rec.begin_edit(id);
    let staged = tables[0].geometry().with_position(Point::new(300.0, 300.0));
    assert!(rec.stage_edit(id, staged));

    assert_eq!(rec.rendered_layout().table(id).map(|t| t.position), Some(Point::new(300.0, 300.0)));
    assert_eq!(rec.layout().table(id).map(|t| t.position), Some(Point::new(100.0, 100.0)));
}

// =============================================================================
// COMMIT AND HOLD
// =============================================================================

#[test]
fn commit_applies_geometry_and_holds_until_flushed() {
    let (mut rec, tables, _) = seeded(1, 1, 0);
    let id = tables[0].id;
    rec.begin_edit(id);
    let committed = rec.commit_edit(id, tables[0].geometry().with_position(Point::new(480.0, 220.0)));
    assert!(committed.is_some());
    assert!(!rec.is_suppressed(id));
    assert!(rec.is_held(id));

    // A late echo of the pre-drag position cannot clobber the commit.
    assert_eq!(rec.apply(moved(id, 100.0, 100.0)), Applied::Suppressed);
    assert_eq!(rec.table(id).map(|t| t.position), Some(Point::new(480.0, 220.0)));

    let flushed = rec.commit_payload();
    assert_eq!(rec.release_flushed(&flushed), 1);
    assert!(!rec.is_held(id));
    assert_eq!(rec.apply(moved(id, 480.0, 220.0)), Applied::Unchanged);
}

#[test]
fn commit_normalizes_rotation() {
    let (mut rec, tables, _) = seeded(1, 0, 0);
    let id = tables[0].id;
    rec.begin_edit(id);
    let mut geometry = tables[0].geometry();
    geometry.rotation = -90.0;
    let committed = rec.commit_edit(id, geometry).unwrap();
    assert!((committed.rotation - 270.0).abs() < 1e-9);
    assert_eq!(rec.release_flushed(&rec.commit_payload()), 1);
}

#[test]
fn newer_commit_survives_release_of_older_flush() {
    let (mut rec, tables, _) = seeded(1, 0, 0);
    let id = tables[0].id;
    rec.commit_edit(id, tables[0].geometry().with_position(Point::new(1.0, 1.0)));
    let first_flush = rec.commit_payload();
    rec.commit_edit(id, tables[0].geometry().with_position(Point::new(2.0, 2.0)));
    assert_eq!(rec.release_flushed(&first_flush), 0);
    assert!(rec.is_held(id));
}

#[test]
fn commit_on_vanished_table_returns_none() {
    let (mut rec, tables, _) = seeded(1, 0, 0);
    let id = tables[0].id;
    rec.begin_edit(id);
    rec.remove_table(id);
    assert!(rec.commit_edit(id, tables[0].geometry()).is_none());
    assert!(!rec.is_held(id));
}

// =============================================================================
// ASSIGNMENT
// =============================================================================

#[test]
fn assign_sets_both_sides() {
    let (mut rec, tables, guests) = seeded(1, 2, 1);
    let (t, s, g) = (tables[0].id, tables[0].seats[0].id, guests[0].id);
    let n = Notification::SeatAssigned { table_id: t, seat_id: s, guest_id: g, guest: None };
    assert_eq!(rec.apply(n.clone()), Applied::Changed);
    assert_eq!(rec.apply(n), Applied::Unchanged);
    assert_eq!(rec.guest(g).and_then(Guest::seat_ref), Some((t, s)));
    assert!(rec.reference_violations().is_empty());
}

#[test]
fn reassign_vacates_previous_seat() {
    let (mut rec, tables, guests) = seeded(2, 1, 1);
    let g = guests[0].id;
    rec.assign(tables[0].id, tables[0].seats[0].id, g, None);
    rec.assign(tables[1].id, tables[1].seats[0].id, g, None);

    assert_eq!(rec.layout().seats_holding(g), vec![(tables[1].id, tables[1].seats[0].id)]);
    assert!(rec.reference_violations().is_empty());
}

#[test]
fn assign_displaces_previous_occupant() {
    let (mut rec, tables, guests) = seeded(1, 1, 2);
    let (t, s) = (tables[0].id, tables[0].seats[0].id);
    rec.assign(t, s, guests[0].id, None);
    rec.assign(t, s, guests[1].id, None);

    assert_eq!(rec.guest(guests[0].id).and_then(Guest::seat_ref), None);
    assert_eq!(rec.guest(guests[1].id).and_then(Guest::seat_ref), Some((t, s)));
    assert!(rec.reference_violations().is_empty());
}

#[test]
fn assign_to_unknown_seat_is_stale() {
    let (mut rec, tables, guests) = seeded(1, 1, 1);
    assert_eq!(rec.assign(tables[0].id, Uuid::new_v4(), guests[0].id, None), Applied::Stale);
}

#[test]
fn assign_carrying_guest_inserts_it() {
    let (mut rec, tables, _) = seeded(1, 1, 0);
    let guest = Guest::new("Late Arrival", "555");
    let (t, s) = (tables[0].id, tables[0].seats[0].id);
    let n = Notification::SeatAssigned { table_id: t, seat_id: s, guest_id: guest.id, guest: Some(guest.clone()) };
    assert_eq!(rec.apply(n), Applied::Changed);
    assert_eq!(rec.guest(guest.id).map(|g| g.full_name.as_str()), Some("Late Arrival"));
    assert_eq!(rec.guest(guest.id).and_then(Guest::seat_ref), Some((t, s)));
}

#[test]
fn assignment_applies_to_suppressed_table() {
    let (mut rec, tables, guests) = seeded(1, 1, 1);
    let (t, s) = (tables[0].id, tables[0].seats[0].id);
    rec.begin_edit(t);
    let n = Notification::SeatAssigned { table_id: t, seat_id: s, guest_id: guests[0].id, guest: None };
    assert_eq!(rec.apply(n), Applied::Changed);
}

#[test]
fn unassign_clears_both_sides_and_is_idempotent() {
    let (mut rec, tables, guests) = seeded(1, 1, 1);
    let (t, s, g) = (tables[0].id, tables[0].seats[0].id, guests[0].id);
    rec.assign(t, s, g, None);

    let n = Notification::SeatUnassigned { table_id: t, seat_id: s, guest_id: g };
    assert_eq!(rec.apply(n.clone()), Applied::Changed);
    assert_eq!(rec.apply(n), Applied::Unchanged);
    assert_eq!(rec.guest(g).and_then(Guest::seat_ref), None);
    assert!(rec.reference_violations().is_empty());
}

#[test]
fn unassign_of_other_occupant_leaves_seat() {
    let (mut rec, tables, guests) = seeded(1, 1, 2);
    let (t, s) = (tables[0].id, tables[0].seats[0].id);
    rec.assign(t, s, guests[1].id, None);
    let n = Notification::SeatUnassigned { table_id: t, seat_id: s, guest_id: guests[0].id };
    assert_eq!(rec.apply(n), Applied::Unchanged);
    assert_eq!(rec.layout().seats_holding(guests[1].id), vec![(t, s)]);
}

#[test]
fn unassign_on_unknown_table_is_stale() {
    let (mut rec, _, guests) = seeded(1, 1, 1);
    let n = Notification::SeatUnassigned { table_id: Uuid::new_v4(), seat_id: Uuid::new_v4(), guest_id: guests[0].id };
    assert_eq!(rec.apply(n), Applied::Stale);
}

// =============================================================================
// GUESTS
// =============================================================================

#[test]
fn guest_updated_keeps_seat_reference() {
    let (mut rec, tables, guests) = seeded(1, 1, 1);
    let (t, s) = (tables[0].id, tables[0].seats[0].id);
    rec.assign(t, s, guests[0].id, None);

    let mut incoming = guests[0].clone();
    incoming.checked_in = true;
    assert_eq!(rec.apply(Notification::GuestUpdated { guest: incoming.clone() }), Applied::Changed);
    assert_eq!(rec.apply(Notification::GuestUpdated { guest: incoming }), Applied::Unchanged);
    let guest = rec.guest(guests[0].id).unwrap();
    assert!(guest.checked_in);
    assert_eq!(guest.seat_ref(), Some((t, s)));
}

#[test]
fn guest_removed_vacates_seat() {
    let (mut rec, tables, guests) = seeded(1, 1, 1);
    let (t, s, g) = (tables[0].id, tables[0].seats[0].id, guests[0].id);
    rec.assign(t, s, g, None);

    assert_eq!(rec.apply(Notification::GuestRemoved { guest_id: g }), Applied::Changed);
    assert_eq!(rec.apply(Notification::GuestRemoved { guest_id: g }), Applied::Unchanged);
    assert!(rec.guest(g).is_none());
    assert!(rec.layout().seats_holding(g).is_empty());
}

#[test]
fn update_guest_cannot_move_reference() {
    let (mut rec, _, guests) = seeded(1, 1, 1);
    let g = guests[0].id;
    let outcome = rec.update_guest(g, |guest| guest.set_seat_ref(Some((Uuid::new_v4(), Uuid::new_v4()))));
    assert_eq!(outcome, Applied::Unchanged);
    assert_eq!(rec.update_guest(Uuid::new_v4(), |_| {}), Applied::Stale);
}

// =============================================================================
// TABLE COMMANDS
// =============================================================================

#[test]
fn remove_table_clears_seated_guests() {
    let (mut rec, tables, guests) = seeded(1, 1, 1);
    let (t, s, g) = (tables[0].id, tables[0].seats[0].id, guests[0].id);
    rec.assign(t, s, g, None);
    assert_eq!(rec.remove_table(t), Applied::Changed);
    assert_eq!(rec.guest(g).and_then(Guest::seat_ref), None);
    assert_eq!(rec.remove_table(t), Applied::Unchanged);
}

#[test]
fn upsert_table_inserts_then_replaces() {
    let (mut rec, _, _) = seeded(0, 0, 0);
    let mut t = table(2);
    assert_eq!(rec.upsert_table(t.clone()), Applied::Changed);
    assert_eq!(rec.upsert_table(t.clone()), Applied::Unchanged);
    t.width = 300.0;
    assert_eq!(rec.upsert_table(t), Applied::Changed);
}

#[test]
fn patch_table_updates_fields() {
    let (mut rec, tables, _) = seeded(1, 0, 0);
    let patch = TablePatch { width: Some(200.0), ..TablePatch::default() };
    assert_eq!(rec.patch_table(tables[0].id, &patch), Applied::Changed);
    assert_eq!(rec.patch_table(tables[0].id, &patch), Applied::Unchanged);
    assert_eq!(rec.patch_table(Uuid::new_v4(), &patch), Applied::Stale);
}

// =============================================================================
// CONVERGENCE
// =============================================================================

#[test]
fn notifications_in_any_order_converge() {
    let (_, tables, guests) = seeded(2, 2, 2);
    let stream = vec![
        moved(tables[0].id, 10.0, 10.0),
        Notification::SeatAssigned { table_id: tables[0].id, seat_id: tables[0].seats[0].id, guest_id: guests[0].id, guest: None },
        Notification::SeatAssigned { table_id: tables[1].id, seat_id: tables[1].seats[1].id, guest_id: guests[1].id, guest: None },
        moved(tables[1].id, 20.0, 20.0),
    ];

    let run = |order: &[usize]| {
        let mut rec = Reconciler::new();
        rec.apply_snapshot(LayoutSnapshot { tables: tables.clone(), ..LayoutSnapshot::default() });
        rec.replace_guests(guests.clone());
        for i in order {
            rec.apply(stream[*i].clone());
            rec.apply(stream[*i].clone());
        }
        (rec.layout().clone(), rec.guests_sorted())
    };

    assert_eq!(run(&[0, 1, 2, 3]), run(&[3, 2, 1, 0]));
    assert_eq!(run(&[0, 1, 2, 3]), run(&[2, 0, 3, 1]));
}

#[test]
fn summary_counts_model() {
    let (mut rec, tables, guests) = seeded(2, 3, 2);
    rec.assign(tables[0].id, tables[0].seats[0].id, guests[0].id, None);
    let summary = rec.summary();
    assert_eq!(summary.total_tables, 2);
    assert_eq!(summary.total_seats, 6);
    assert_eq!(summary.assigned_seats, 1);
    assert_eq!(summary.total_guests, 2);
    assert_eq!(summary.pending, 2);
}
