//! Room: one collaboration session on one event's layout.
//!
//! ARCHITECTURE
//! ============
//! `Room::spawn` starts a task that exclusively owns the reconciler for one
//! event. Surfaces talk to it through a cloneable `RoomHandle`: intents go
//! in over an mpsc queue with oneshot replies, and the reconciled model
//! comes out as `Arc<RoomView>` snapshots on a watch channel.
//!
//! DESIGN
//! ======
//! The task runs a single `select!` loop over surface commands, channel
//! events, completed I/O, the autosave deadline, and the refresh deadline.
//! Store calls run as spawned futures whose results re-enter the loop as
//! `Completion`s, so the model is only ever mutated between awaits on the
//! loop itself and each view is published whole.
//!
//! - Refreshes are coalesced behind a short delay and single-flight.
//! - A pull issued before the latest successful flush is discarded and
//!   reissued, so it cannot resurrect pre-flush geometry.
//! - Every applied change rebases the pending autosave payload onto the
//!   current model.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here is fatal. Store failures become the view's `last_notice`
//! and a refresh; channel loss marks the view stale once reconnects are
//! exhausted, and `resync` starts over.

#[cfg(test)]
#[path = "room_test.rs"]
mod room_test;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::autosave::AutosaveScheduler;
use crate::channel::{self, ChannelEvent, NotificationSource, Subscription};
use crate::checkin::{self, CheckAction, CheckInError};
use crate::config::SyncConfig;
use crate::frame::ErrorCode;
use crate::geometry::{DragGeometry, snap, to_table_local};
use crate::model::{Guest, GuestFilter, LayoutSnapshot, Summary, Table, TableDraft, TableGeometry, TablePatch};
use crate::reconcile::{Applied, Reconciler};
use crate::store::{CanonicalStore, StoreError};

const COMMAND_QUEUE_CAPACITY: usize = 64;

// =============================================================================
// PUBLIC TYPES
// =============================================================================

/// What a surface is allowed to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRole {
    /// Layout editor: geometry, tables, assignments, and check-in.
    Editor,
    /// Door staff: check-in and check-out only.
    CheckIn,
}

impl SurfaceRole {
    #[must_use]
    pub fn can_edit_layout(self) -> bool {
        self == Self::Editor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A user-visible report of the last non-fatal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl Notice {
    fn from_error<E: ErrorCode + ?Sized>(err: &E) -> Self {
        Self { code: err.error_code(), message: err.to_string(), retryable: err.retryable() }
    }
}

/// Immutable snapshot of a room, published after every reconciliation pass.
#[derive(Debug, Clone)]
pub struct RoomView {
    pub event_id: Uuid,
    pub role: SurfaceRole,
    /// Reconciled layout with in-gesture geometry laid over it.
    pub layout: LayoutSnapshot,
    /// Guests ordered by name.
    pub guests: Vec<Guest>,
    /// Counters derived from this view.
    pub summary: Summary,
    /// Counters as last pulled from the server.
    pub server_summary: Option<Summary>,
    pub status: ConnectionStatus,
    /// Notifications are no longer arriving; call `resync`.
    pub stale: bool,
    /// At least one full pull has been applied.
    pub loaded: bool,
    pub last_notice: Option<Notice>,
    /// Increases with every publish.
    pub revision: u64,
}

impl RoomView {
    #[must_use]
    pub fn table(&self, table_id: Uuid) -> Option<&Table> {
        self.layout.table(table_id)
    }

    #[must_use]
    pub fn guest(&self, guest_id: Uuid) -> Option<&Guest> {
        self.guests.iter().find(|g| g.id == guest_id)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RoomError {
    #[error("{action} is not allowed on a {role:?} surface")]
    Forbidden { action: &'static str, role: SurfaceRole },
    #[error("table not found: {0}")]
    UnknownTable(Uuid),
    #[error("seat {seat_id} not found on table {table_id}")]
    UnknownSeat { table_id: Uuid, seat_id: Uuid },
    #[error("guest not found: {0}")]
    UnknownGuest(Uuid),
    #[error("no drag in progress on table {0}")]
    NotDragging(Uuid),
    #[error(transparent)]
    CheckIn(#[from] CheckInError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("room is closed")]
    Closed,
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Forbidden { .. } => "E_FORBIDDEN",
            Self::UnknownTable(_) => "E_TABLE_NOT_FOUND",
            Self::UnknownSeat { .. } => "E_SEAT_NOT_FOUND",
            Self::UnknownGuest(_) => "E_GUEST_NOT_FOUND",
            Self::NotDragging(_) => "E_NOT_DRAGGING",
            Self::CheckIn(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Closed => "E_ROOM_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

enum Command {
    BeginDrag { table_id: Uuid, reply: Reply<()> },
    DragTo { table_id: Uuid, drag: DragGeometry, reply: Reply<()> },
    EndDrag { table_id: Uuid, drag: DragGeometry, reply: Reply<TableGeometry> },
    CancelDrag { table_id: Uuid, reply: Reply<()> },
    BeginSeatDrag { table_id: Uuid, seat_id: Uuid, reply: Reply<()> },
    EndSeatDrag { table_id: Uuid, seat_id: Uuid, drag: DragGeometry, reply: Reply<TableGeometry> },
    Assign { table_id: Uuid, seat_id: Uuid, guest_id: Uuid, reply: Reply<()> },
    Unassign { table_id: Uuid, seat_id: Uuid, guest_id: Uuid, reply: Reply<()> },
    Check { guest_id: Uuid, action: CheckAction, reply: Reply<Guest> },
    AddTable { draft: TableDraft, reply: Reply<Table> },
    UpdateTable { table_id: Uuid, patch: TablePatch, reply: Reply<Table> },
    DeleteTable { table_id: Uuid, reply: Reply<()> },
    SaveNow { reply: Reply<()> },
    Resync { reply: Reply<()> },
    Close { reply: Reply<()> },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::BeginDrag { .. } => "begin_drag",
            Self::DragTo { .. } => "drag_to",
            Self::EndDrag { .. } => "end_drag",
            Self::CancelDrag { .. } => "cancel_drag",
            Self::BeginSeatDrag { .. } => "begin_seat_drag",
            Self::EndSeatDrag { .. } => "end_seat_drag",
            Self::Assign { .. } => "assign_seat",
            Self::Unassign { .. } => "unassign_seat",
            Self::Check { action, .. } => action.as_str(),
            Self::AddTable { .. } => "add_table",
            Self::UpdateTable { .. } => "update_table",
            Self::DeleteTable { .. } => "delete_table",
            Self::SaveNow { .. } => "save_now",
            Self::Resync { .. } => "resync",
            Self::Close { .. } => "close",
        }
    }

    fn edits_layout(&self) -> bool {
        !matches!(self, Self::Check { .. } | Self::Resync { .. } | Self::Close { .. })
    }

    /// Answer with an error without running the command.
    fn reject(self, err: RoomError) {
        match self {
            Self::BeginDrag { reply, .. }
            | Self::DragTo { reply, .. }
            | Self::CancelDrag { reply, .. }
            | Self::BeginSeatDrag { reply, .. }
            | Self::Assign { reply, .. }
            | Self::Unassign { reply, .. }
            | Self::DeleteTable { reply, .. }
            | Self::SaveNow { reply }
            | Self::Resync { reply }
            | Self::Close { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::EndDrag { reply, .. } | Self::EndSeatDrag { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Check { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::AddTable { reply, .. } | Self::UpdateTable { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable surface-side access to a running room.
#[derive(Clone)]
pub struct RoomHandle {
    event_id: Uuid,
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<Arc<RoomView>>,
}

impl RoomHandle {
    #[must_use]
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Latest published view.
    #[must_use]
    pub fn view(&self) -> Arc<RoomView> {
        self.view.borrow().clone()
    }

    /// A receiver that wakes on every publish.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<RoomView>> {
        self.view.clone()
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| RoomError::Closed)?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    /// Open a drag gesture on a table. Remote geometry for it is dropped
    /// until the gesture ends.
    ///
    /// # Errors
    ///
    /// `Forbidden` on check-in surfaces, `UnknownTable` for unknown ids.
    pub async fn begin_drag(&self, table_id: Uuid) -> Result<(), RoomError> {
        self.call(|reply| Command::BeginDrag { table_id, reply }).await
    }

    /// Update the in-gesture position for rendering.
    ///
    /// # Errors
    ///
    /// `NotDragging` if no gesture is open on the table.
    pub async fn drag_to(&self, table_id: Uuid, drag: DragGeometry) -> Result<(), RoomError> {
        self.call(|reply| Command::DragTo { table_id, drag, reply }).await
    }

    /// Commit a table drag at the pointer's world position, snapped to the
    /// layout grid when snapping is on. Schedules autosave.
    ///
    /// # Errors
    ///
    /// `NotDragging` if no gesture is open, `UnknownTable` if the table
    /// vanished during the gesture.
    pub async fn end_drag(&self, table_id: Uuid, drag: DragGeometry) -> Result<TableGeometry, RoomError> {
        self.call(|reply| Command::EndDrag { table_id, drag, reply }).await
    }

    /// # Errors
    ///
    /// `Forbidden` on check-in surfaces.
    pub async fn cancel_drag(&self, table_id: Uuid) -> Result<(), RoomError> {
        self.call(|reply| Command::CancelDrag { table_id, reply }).await
    }

    /// # Errors
    ///
    /// `UnknownSeat` if the seat is not on the table.
    pub async fn begin_seat_drag(&self, table_id: Uuid, seat_id: Uuid) -> Result<(), RoomError> {
        self.call(|reply| Command::BeginSeatDrag { table_id, seat_id, reply }).await
    }

    /// Commit a seat drag. The pointer's world position is converted into
    /// the table's rotated local frame.
    ///
    /// # Errors
    ///
    /// `NotDragging` if no gesture is open on the table.
    pub async fn end_seat_drag(
        &self,
        table_id: Uuid,
        seat_id: Uuid,
        drag: DragGeometry,
    ) -> Result<TableGeometry, RoomError> {
        self.call(|reply| Command::EndSeatDrag { table_id, seat_id, drag, reply }).await
    }

    /// # Errors
    ///
    /// Local lookup failures, or the store's rejection.
    pub async fn request_assign(&self, table_id: Uuid, seat_id: Uuid, guest_id: Uuid) -> Result<(), RoomError> {
        self.call(|reply| Command::Assign { table_id, seat_id, guest_id, reply }).await
    }

    /// # Errors
    ///
    /// Local lookup failures, or the store's rejection.
    pub async fn request_unassign(&self, table_id: Uuid, seat_id: Uuid, guest_id: Uuid) -> Result<(), RoomError> {
        self.call(|reply| Command::Unassign { table_id, seat_id, guest_id, reply }).await
    }

    /// # Errors
    ///
    /// `CheckIn` for a redundant or unknown guest, `Store` on server failure.
    pub async fn request_check_in(&self, guest_id: Uuid) -> Result<Guest, RoomError> {
        self.call(|reply| Command::Check { guest_id, action: CheckAction::CheckIn, reply }).await
    }

    /// # Errors
    ///
    /// `CheckIn` for a redundant or unknown guest, `Store` on server failure.
    pub async fn request_check_out(&self, guest_id: Uuid) -> Result<Guest, RoomError> {
        self.call(|reply| Command::Check { guest_id, action: CheckAction::CheckOut, reply }).await
    }

    /// # Errors
    ///
    /// `Forbidden` on check-in surfaces, `Store` on server failure.
    pub async fn add_table(&self, draft: TableDraft) -> Result<Table, RoomError> {
        self.call(|reply| Command::AddTable { draft, reply }).await
    }

    /// # Errors
    ///
    /// `UnknownTable` for unknown ids, `Store` on server failure.
    pub async fn update_table(&self, table_id: Uuid, patch: TablePatch) -> Result<Table, RoomError> {
        self.call(|reply| Command::UpdateTable { table_id, patch, reply }).await
    }

    /// # Errors
    ///
    /// `UnknownTable` for unknown ids, `Store` on server failure.
    pub async fn delete_table(&self, table_id: Uuid) -> Result<(), RoomError> {
        self.call(|reply| Command::DeleteTable { table_id, reply }).await
    }

    /// Flush the current layout now and wait for the result.
    ///
    /// # Errors
    ///
    /// `Store` if the flush fails.
    pub async fn save_now(&self) -> Result<(), RoomError> {
        self.call(|reply| Command::SaveNow { reply }).await
    }

    /// Re-subscribe if the channel gave up, and pull everything now.
    ///
    /// # Errors
    ///
    /// `Closed` if the room has stopped.
    pub async fn resync(&self) -> Result<(), RoomError> {
        self.call(|reply| Command::Resync { reply }).await
    }

    /// Stop the room. A pending autosave is discarded without flushing.
    ///
    /// # Errors
    ///
    /// `Closed` if the room had already stopped.
    pub async fn close(self) -> Result<(), RoomError> {
        self.call(|reply| Command::Close { reply }).await
    }
}

// =============================================================================
// TASK
// =============================================================================

type Pulled = (LayoutSnapshot, Vec<Guest>, Summary);

enum Completion {
    Pulled { epoch: u64, result: Result<Pulled, StoreError> },
    Flushed { payload: LayoutSnapshot, result: Result<(), StoreError> },
    Command { name: &'static str, result: Result<(), StoreError>, reply: Reply<()> },
    Checked { action: CheckAction, result: Result<Guest, StoreError>, reply: Reply<Guest> },
    TableSaved { result: Result<Table, StoreError>, reply: Reply<Table> },
}

enum Wake {
    Command(Option<Command>),
    Channel(Option<ChannelEvent>),
    Completion(Option<Completion>),
    Autosave,
    Refresh,
}

pub struct Room {
    event_id: Uuid,
    role: SurfaceRole,
    config: SyncConfig,
    store: Arc<dyn CanonicalStore>,
    source: Arc<dyn NotificationSource>,

    reconciler: Reconciler,
    autosave: AutosaveScheduler<LayoutSnapshot>,

    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    subscription: Option<Subscription>,
    channel_rx: Option<mpsc::Receiver<ChannelEvent>>,
    view_tx: watch::Sender<Arc<RoomView>>,

    status: ConnectionStatus,
    stale: bool,
    loaded: bool,
    last_notice: Option<Notice>,
    revision: u64,

    refresh_at: Option<Instant>,
    refresh_in_flight: bool,
    refresh_again: bool,
    /// Bumped on every successful flush. Pulls issued under an older epoch
    /// are discarded.
    flush_epoch: u64,
    save_waiters: Vec<Reply<()>>,
    flight_waiters: Vec<Reply<()>>,
}

impl Room {
    /// Start the room task for one event. Must be called inside a tokio
    /// runtime.
    pub fn spawn(
        event_id: Uuid,
        role: SurfaceRole,
        store: Arc<dyn CanonicalStore>,
        source: Arc<dyn NotificationSource>,
        config: SyncConfig,
    ) -> RoomHandle {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let initial = RoomView {
            event_id,
            role,
            layout: LayoutSnapshot::default(),
            guests: Vec::new(),
            summary: Summary::default(),
            server_summary: None,
            status: ConnectionStatus::Connecting,
            stale: false,
            loaded: false,
            last_notice: None,
            revision: 0,
        };
        let (view_tx, view) = watch::channel(Arc::new(initial));

        let room = Self {
            event_id,
            role,
            autosave: AutosaveScheduler::new(config.autosave_quiescence),
            config,
            store,
            source,
            reconciler: Reconciler::new(),
            commands,
            completions_tx,
            completions,
            subscription: None,
            channel_rx: None,
            view_tx,
            status: ConnectionStatus::Connecting,
            stale: false,
            loaded: false,
            last_notice: None,
            revision: 0,
            refresh_at: None,
            refresh_in_flight: false,
            refresh_again: false,
            flush_epoch: 0,
            save_waiters: Vec::new(),
            flight_waiters: Vec::new(),
        };
        tokio::spawn(room.run());

        RoomHandle { event_id, commands: commands_tx, view }
    }

    async fn run(mut self) {
        info!(event_id = %self.event_id, role = ?self.role, "room started");
        self.connect_channel();
        self.request_refresh(Duration::ZERO);

        loop {
            let autosave_at = self.autosave.deadline();
            let refresh_at = if self.refresh_in_flight { None } else { self.refresh_at };

            let wake = tokio::select! {
                cmd = self.commands.recv() => Wake::Command(cmd),
                event = next_channel_event(&mut self.channel_rx) => Wake::Channel(event),
                done = self.completions.recv() => Wake::Completion(done),
                () = sleep_until(autosave_at) => Wake::Autosave,
                () = sleep_until(refresh_at) => Wake::Refresh,
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(Command::Close { reply })) => {
                    self.shutdown();
                    let _ = reply.send(Ok(()));
                    break;
                }
                Wake::Command(Some(cmd)) => self.handle_command(cmd),
                Wake::Channel(Some(event)) => self.handle_channel(event),
                Wake::Channel(None) => self.channel_rx = None,
                Wake::Completion(Some(done)) => self.handle_completion(done),
                Wake::Completion(None) => {}
                Wake::Autosave => self.fire_autosave(),
                Wake::Refresh => self.fire_refresh(),
            }
        }

        self.shutdown();
        info!(event_id = %self.event_id, "room stopped");
    }

    fn shutdown(&mut self) {
        let unflushed = self.reconciler.unflushed_count();
        if self.autosave.discard() || unflushed > 0 {
            debug!(event_id = %self.event_id, unflushed, "discarding unsaved layout");
        }
        self.reconciler.discard_edits();
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        self.channel_rx = None;
        for waiter in self.save_waiters.drain(..) {
            let _ = waiter.send(Err(RoomError::Closed));
        }
        if self.status != ConnectionStatus::Disconnected {
            self.status = ConnectionStatus::Disconnected;
            self.publish();
        }
    }

    fn connect_channel(&mut self) {
        let (subscription, rx) = channel::subscribe(self.source.clone(), self.event_id, self.config.reconnect);
        self.subscription = Some(subscription);
        self.channel_rx = Some(rx);
        self.status = ConnectionStatus::Connecting;
    }

    fn spawn_io(&self, fut: impl Future<Output = Completion> + Send + 'static) {
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(fut.await);
        });
    }

    /// Publish the current model. Rebases any pending autosave first so a
    /// later flush carries every change applied so far.
    fn publish(&mut self) {
        if self.autosave.is_pending() {
            self.autosave.rebase(self.reconciler.commit_payload());
        }
        self.revision += 1;
        let view = RoomView {
            event_id: self.event_id,
            role: self.role,
            layout: self.reconciler.rendered_layout(),
            guests: self.reconciler.guests_sorted(),
            summary: self.reconciler.summary(),
            server_summary: self.reconciler.server_summary(),
            status: self.status,
            stale: self.stale,
            loaded: self.loaded,
            last_notice: self.last_notice.clone(),
            revision: self.revision,
        };
        self.view_tx.send_replace(Arc::new(view));
    }

    fn notice<E: ErrorCode + ?Sized>(&mut self, err: &E) {
        self.last_notice = Some(Notice::from_error(err));
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

impl Room {
    fn handle_command(&mut self, cmd: Command) {
        if cmd.edits_layout() && !self.role.can_edit_layout() {
            let err = RoomError::Forbidden { action: cmd.name(), role: self.role };
            cmd.reject(err);
            return;
        }

        match cmd {
            Command::BeginDrag { table_id, reply } => {
                let result = if self.reconciler.begin_edit(table_id) {
                    Ok(())
                } else {
                    Err(RoomError::UnknownTable(table_id))
                };
                let _ = reply.send(result);
            }
            Command::DragTo { table_id, drag, reply } => {
                let _ = reply.send(self.drag_to(table_id, &drag));
            }
            Command::EndDrag { table_id, drag, reply } => {
                let _ = reply.send(self.end_drag(table_id, &drag));
            }
            Command::CancelDrag { table_id, reply } => {
                if let Some(dropped) = self.reconciler.cancel_edit(table_id) {
                    if dropped > 0 {
                        debug!(%table_id, dropped, "drag cancelled after dropping remote updates");
                        self.request_refresh(Duration::ZERO);
                    }
                    self.publish();
                }
                let _ = reply.send(Ok(()));
            }
            Command::BeginSeatDrag { table_id, seat_id, reply } => {
                let result = match self.reconciler.table(table_id) {
                    None => Err(RoomError::UnknownTable(table_id)),
                    Some(t) if t.seat(seat_id).is_none() => Err(RoomError::UnknownSeat { table_id, seat_id }),
                    Some(_) => {
                        self.reconciler.begin_edit(table_id);
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }
            Command::EndSeatDrag { table_id, seat_id, drag, reply } => {
                let _ = reply.send(self.end_seat_drag(table_id, seat_id, &drag));
            }
            Command::Assign { table_id, seat_id, guest_id, reply } => {
                self.assign(table_id, seat_id, guest_id, reply);
            }
            Command::Unassign { table_id, seat_id, guest_id, reply } => {
                self.unassign(table_id, seat_id, guest_id, reply);
            }
            Command::Check { guest_id, action, reply } => self.check(guest_id, action, reply),
            Command::AddTable { draft, reply } => {
                let (store, event_id) = (self.store.clone(), self.event_id);
                self.spawn_io(async move {
                    let result = store.add_table(event_id, &draft).await;
                    Completion::TableSaved { result, reply }
                });
            }
            Command::UpdateTable { table_id, patch, reply } => {
                if self.reconciler.patch_table(table_id, &patch) == Applied::Stale {
                    let _ = reply.send(Err(RoomError::UnknownTable(table_id)));
                    return;
                }
                self.publish();
                let (store, event_id) = (self.store.clone(), self.event_id);
                self.spawn_io(async move {
                    let result = store.update_table(event_id, table_id, &patch).await;
                    Completion::TableSaved { result, reply }
                });
            }
            Command::DeleteTable { table_id, reply } => {
                if self.reconciler.remove_table(table_id) != Applied::Changed {
                    let _ = reply.send(Err(RoomError::UnknownTable(table_id)));
                    return;
                }
                self.publish();
                let (store, event_id) = (self.store.clone(), self.event_id);
                self.spawn_io(async move {
                    let result = store.delete_table(event_id, table_id).await;
                    Completion::Command { name: "delete_table", result, reply }
                });
            }
            Command::SaveNow { reply } => {
                if self.autosave.is_in_flight() {
                    debug!(event_id = %self.event_id, "save queued behind the flush in flight");
                }
                self.autosave.save_now(self.reconciler.commit_payload());
                self.save_waiters.push(reply);
            }
            Command::Resync { reply } => {
                if self.channel_rx.is_none() || self.stale {
                    info!(event_id = %self.event_id, "resubscribing notification channel");
                    self.connect_channel();
                }
                self.request_refresh(Duration::ZERO);
                self.publish();
                let _ = reply.send(Ok(()));
            }
            Command::Close { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn drag_to(&mut self, table_id: Uuid, drag: &DragGeometry) -> Result<(), RoomError> {
        let table = self.reconciler.table(table_id).ok_or(RoomError::UnknownTable(table_id))?;
        let geometry = table.geometry().with_position(drag.world_origin());
        if !self.reconciler.stage_edit(table_id, geometry) {
            return Err(RoomError::NotDragging(table_id));
        }
        self.publish();
        Ok(())
    }

    fn end_drag(&mut self, table_id: Uuid, drag: &DragGeometry) -> Result<TableGeometry, RoomError> {
        if !self.reconciler.is_suppressed(table_id) {
            return Err(RoomError::NotDragging(table_id));
        }
        let settings = &self.reconciler.layout().settings;
        let mut position = drag.world_origin();
        if settings.snap_to_grid {
            position = snap(position, settings.grid_size);
        }
        let table = self.reconciler.table(table_id).ok_or(RoomError::UnknownTable(table_id))?;
        let geometry = table.geometry().with_position(position);
        self.commit(table_id, geometry)
    }

    fn end_seat_drag(&mut self, table_id: Uuid, seat_id: Uuid, drag: &DragGeometry) -> Result<TableGeometry, RoomError> {
        if !self.reconciler.is_suppressed(table_id) {
            return Err(RoomError::NotDragging(table_id));
        }
        let table = self.reconciler.table(table_id).ok_or(RoomError::UnknownTable(table_id))?;
        if table.seat(seat_id).is_none() {
            return Err(RoomError::UnknownSeat { table_id, seat_id });
        }
        let local = to_table_local(drag.world_origin(), table.position, table.rotation);
        let geometry = table.geometry().with_seat_position(seat_id, local);
        self.commit(table_id, geometry)
    }

    fn commit(&mut self, table_id: Uuid, geometry: TableGeometry) -> Result<TableGeometry, RoomError> {
        let committed = self
            .reconciler
            .commit_edit(table_id, geometry)
            .ok_or(RoomError::UnknownTable(table_id))?;
        self.autosave.schedule(self.reconciler.commit_payload());
        self.publish();
        Ok(committed)
    }

    fn assign(&mut self, table_id: Uuid, seat_id: Uuid, guest_id: Uuid, reply: Reply<()>) {
        if self.reconciler.guest(guest_id).is_none() {
            let _ = reply.send(Err(RoomError::UnknownGuest(guest_id)));
            return;
        }
        if self.reconciler.assign(table_id, seat_id, guest_id, None) == Applied::Stale {
            let _ = reply.send(Err(RoomError::UnknownSeat { table_id, seat_id }));
            return;
        }
        self.publish();
        let (store, event_id) = (self.store.clone(), self.event_id);
        self.spawn_io(async move {
            let result = store.assign_seat(event_id, table_id, seat_id, guest_id).await;
            Completion::Command { name: "assign_seat", result, reply }
        });
    }

    fn unassign(&mut self, table_id: Uuid, seat_id: Uuid, guest_id: Uuid, reply: Reply<()>) {
        if self.reconciler.unassign(table_id, seat_id, guest_id) == Applied::Stale {
            let _ = reply.send(Err(RoomError::UnknownSeat { table_id, seat_id }));
            return;
        }
        self.publish();
        let (store, event_id) = (self.store.clone(), self.event_id);
        self.spawn_io(async move {
            let result = store.unassign_seat(event_id, table_id, seat_id, guest_id).await;
            Completion::Command { name: "unassign_seat", result, reply }
        });
    }

    fn check(&mut self, guest_id: Uuid, action: CheckAction, reply: Reply<Guest>) {
        let now = OffsetDateTime::now_utc();
        if let Err(e) = checkin::flip_optimistically(&mut self.reconciler, guest_id, action, now) {
            self.notice(&e);
            self.publish();
            let _ = reply.send(Err(e.into()));
            return;
        }
        self.publish();
        let (store, event_id) = (self.store.clone(), self.event_id);
        self.spawn_io(async move {
            let result = match action {
                CheckAction::CheckIn => store.check_in(event_id, guest_id).await,
                CheckAction::CheckOut => store.check_out(event_id, guest_id).await,
            };
            Completion::Checked { action, result, reply }
        });
    }
}

// =============================================================================
// CHANNEL EVENTS
// =============================================================================

impl Room {
    fn handle_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected { reconnect } => {
                self.status = ConnectionStatus::Connected;
                self.stale = false;
                if reconnect {
                    info!(event_id = %self.event_id, "reconnected; pulling full state");
                    self.request_refresh(Duration::ZERO);
                }
                self.publish();
            }
            ChannelEvent::Notification(notification) => {
                let moved = notification.moved_table();
                let outcome = self.reconciler.apply(notification);
                if outcome == Applied::Suppressed {
                    debug!(event_id = %self.event_id, table_id = ?moved, "remote geometry dropped for held table");
                }
                if outcome == Applied::Stale || (self.config.refresh_after_notify && outcome != Applied::Suppressed) {
                    self.request_refresh(self.config.refresh_delay);
                }
                if outcome.changed() {
                    self.publish();
                }
            }
            ChannelEvent::Dropped { reason } => {
                warn!(event_id = %self.event_id, %reason, "notification channel dropped; reconnecting");
                self.status = ConnectionStatus::Connecting;
                self.publish();
            }
            ChannelEvent::GaveUp { attempts } => {
                warn!(event_id = %self.event_id, attempts, "notification channel gave up; view is stale");
                self.status = ConnectionStatus::Disconnected;
                self.stale = true;
                self.subscription = None;
                self.publish();
            }
        }
    }
}

// =============================================================================
// COMPLETIONS
// =============================================================================

impl Room {
    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Pulled { epoch, result } => self.pulled(epoch, result),
            Completion::Flushed { payload, result } => self.flushed(&payload, result),
            Completion::Command { name, result, reply } => match result {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let _ = reply.send(Err(self.command_failed(name, e)));
                }
            },
            Completion::Checked { action, result, reply } => match result {
                Ok(guest) => {
                    if checkin::confirm(&mut self.reconciler, guest.clone()).changed() {
                        self.publish();
                    }
                    let _ = reply.send(Ok(guest));
                }
                Err(e) => {
                    let _ = reply.send(Err(self.command_failed(action.as_str(), e)));
                }
            },
            Completion::TableSaved { result, reply } => match result {
                Ok(table) => {
                    if self.reconciler.upsert_table(table.clone()).changed() {
                        self.publish();
                    }
                    let _ = reply.send(Ok(table));
                }
                Err(e) => {
                    let _ = reply.send(Err(self.command_failed("save_table", e)));
                }
            },
        }
    }

    /// Record a failed command and converge on server truth.
    fn command_failed(&mut self, name: &'static str, err: StoreError) -> RoomError {
        if err.is_stale_reference() {
            info!(event_id = %self.event_id, command = name, error = %err, "command target is gone; refreshing");
        } else {
            warn!(event_id = %self.event_id, command = name, error = %err, "command failed");
        }
        self.notice(&err);
        self.request_refresh(Duration::ZERO);
        self.publish();
        RoomError::Store(err)
    }

    fn pulled(&mut self, epoch: u64, result: Result<Pulled, StoreError>) {
        self.refresh_in_flight = false;
        let again = std::mem::take(&mut self.refresh_again);
        if epoch != self.flush_epoch {
            debug!(event_id = %self.event_id, "discarding pull issued before the last flush");
            self.request_refresh(Duration::ZERO);
            return;
        }
        if again {
            self.request_refresh(self.config.refresh_delay);
        }

        match result {
            Ok((layout, guests, summary)) => {
                self.reconciler.apply_snapshot(layout);
                self.reconciler.replace_guests(guests);
                self.reconciler.set_server_summary(summary);
                self.loaded = true;
            }
            Err(e) => {
                warn!(event_id = %self.event_id, error = %e, "pull failed");
                self.notice(&e);
            }
        }
        self.publish();
    }

    fn flushed(&mut self, payload: &LayoutSnapshot, result: Result<(), StoreError>) {
        self.autosave.flush_finished();
        let waiters: Vec<_> = self.flight_waiters.drain(..).collect();
        match result {
            Ok(()) => {
                self.flush_epoch += 1;
                let released = self.reconciler.release_flushed(payload);
                debug!(event_id = %self.event_id, released, "layout flushed");
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                warn!(event_id = %self.event_id, error = %e, "layout flush failed");
                self.notice(&e);
                if e.retryable() && !self.autosave.is_pending() {
                    self.autosave.schedule(self.reconciler.commit_payload());
                }
                for waiter in waiters {
                    let _ = waiter.send(Err(RoomError::Store(e.clone())));
                }
            }
        }
        self.publish();
    }
}

// =============================================================================
// TIMERS
// =============================================================================

impl Room {
    /// Ask for a full pull no later than `delay` from now. Coalesces with any
    /// pull already scheduled; a pull requested during a flight runs after it.
    fn request_refresh(&mut self, delay: Duration) {
        if self.refresh_in_flight {
            self.refresh_again = true;
            return;
        }
        let at = Instant::now() + delay;
        self.refresh_at = Some(self.refresh_at.map_or(at, |existing| existing.min(at)));
    }

    fn fire_refresh(&mut self) {
        self.refresh_at = None;
        self.refresh_in_flight = true;
        let epoch = self.flush_epoch;
        let (store, event_id) = (self.store.clone(), self.event_id);
        self.spawn_io(async move {
            let everyone = GuestFilter::default();
            let result = tokio::try_join!(
                store.pull_layout(event_id),
                store.pull_guests(event_id, &everyone),
                store.pull_summary(event_id),
            );
            Completion::Pulled { epoch, result }
        });
    }

    fn fire_autosave(&mut self) {
        let Some(payload) = self.autosave.take_due(Instant::now()) else {
            return;
        };
        self.flight_waiters.append(&mut self.save_waiters);
        let (store, event_id) = (self.store.clone(), self.event_id);
        self.spawn_io(async move {
            let result = store.commit_layout(event_id, &payload.tables, &payload.settings).await;
            Completion::Flushed { payload, result }
        });
    }
}

async fn next_channel_event(rx: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
