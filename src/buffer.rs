//! Local mutation buffer: in-flight edits keyed by entity id.
//!
//! DESIGN
//! ======
//! An entity is *suppressed* between `begin_edit` and `commit_edit` (or
//! `cancel_edit`). After commit the value stays *held* until an autosave
//! flush carrying it succeeds, so a late echo of an older commit cannot
//! overwrite a newer local value. The reconciler drops remote geometry for
//! any held entity and counts what it dropped.
//!
//! A drop is not a loss: the local commit produces its own notification for
//! everyone else, and a cancelled gesture that dropped updates asks for a
//! resync.

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;

use std::collections::HashMap;

use uuid::Uuid;

#[derive(Debug, Clone)]
struct OpenEdit<T> {
    staged: Option<T>,
    dropped: usize,
}

#[derive(Debug, Clone)]
pub struct MutationBuffer<T> {
    open: HashMap<Uuid, OpenEdit<T>>,
    held: HashMap<Uuid, T>,
}

impl<T> Default for MutationBuffer<T> {
    fn default() -> Self {
        Self { open: HashMap::new(), held: HashMap::new() }
    }
}

impl<T: Clone + PartialEq> MutationBuffer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a gesture on `id`. Returns `false` if one was already open.
    pub fn begin_edit(&mut self, id: Uuid) -> bool {
        if self.open.contains_key(&id) {
            return false;
        }
        self.open.insert(id, OpenEdit { staged: None, dropped: 0 });
        true
    }

    /// Record in-gesture value for rendering. Ignored if no gesture is open.
    pub fn stage(&mut self, id: Uuid, value: T) -> bool {
        let Some(edit) = self.open.get_mut(&id) else {
            return false;
        };
        edit.staged = Some(value);
        true
    }

    #[must_use]
    pub fn staged(&self, id: Uuid) -> Option<&T> {
        self.open.get(&id).and_then(|e| e.staged.as_ref())
    }

    /// Close the gesture on `id` with its final value. Clears suppression,
    /// holds the value until flushed, and hands it back for autosave.
    pub fn commit_edit(&mut self, id: Uuid, value: T) -> T {
        self.open.remove(&id);
        self.held.insert(id, value.clone());
        value
    }

    /// Close the gesture on `id` without committing. Returns how many remote
    /// updates were dropped while it was open, or `None` if none was open.
    pub fn cancel_edit(&mut self, id: Uuid) -> Option<usize> {
        self.open.remove(&id).map(|e| e.dropped)
    }

    /// True while a gesture on `id` is open.
    #[must_use]
    pub fn is_suppressed(&self, id: Uuid) -> bool {
        self.open.contains_key(&id)
    }

    /// True while a gesture is open or a committed value awaits its flush.
    #[must_use]
    pub fn is_held(&self, id: Uuid) -> bool {
        self.open.contains_key(&id) || self.held.contains_key(&id)
    }

    /// Count a remote update dropped because `id` was suppressed.
    pub fn record_dropped(&mut self, id: Uuid) {
        if let Some(edit) = self.open.get_mut(&id) {
            edit.dropped += 1;
        }
    }

    /// Release the hold on `id` if the flushed value is the held one.
    /// A newer commit made after the flush started stays held.
    pub fn release(&mut self, id: Uuid, flushed: &T) -> bool {
        if self.held.get(&id) == Some(flushed) {
            self.held.remove(&id);
            return true;
        }
        false
    }

    /// Forget the hold on `id` regardless of value (entity deleted).
    pub fn forget(&mut self, id: Uuid) {
        self.open.remove(&id);
        self.held.remove(&id);
    }

    /// Ids with an open gesture.
    pub fn suppressed(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.open.keys().copied()
    }

    /// Committed values waiting for a flush.
    pub fn held(&self) -> impl Iterator<Item = (Uuid, &T)> + '_ {
        self.held.iter().map(|(id, v)| (*id, v))
    }

    /// Drop everything. Used on surface exit.
    pub fn clear(&mut self) {
        self.open.clear();
        self.held.clear();
    }
}
