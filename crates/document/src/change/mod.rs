//! Unsaved-change tracking.
//!
//! [`ChangeTracker`] is a plain event consumer: edits arrive either as direct
//! [`ChangeTracker::mark_changed`] calls or from a [`ChangeLog`] (typically an
//! undo/redo history) that publishes [`ChangeKind`] values. The tracker keeps
//! a signed counter relative to the last saved state, so undoing past a save
//! point still reports unsaved changes.
//!
//! Saves bracket their work with [`ChangeTracker::begin_save`] and
//! [`ChangeTracker::end_save`]. Edits that land between the two survive the
//! save instead of being cleared with it.


use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::state::DocumentEvent;

/// Kind of edit notification fed into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
	/// A new edit was made.
	Done,
	/// An edit was undone.
	Undone,
	/// An undone edit was redone.
	Redone,
	/// The document now matches its saved state.
	Cleared,
}

/// Whether a save expects its target to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveOperationKind {
	/// First write of a new item; an existing item at the target is never replaced.
	ForCreating,
	/// Replace the item at the target; prior bytes stay intact until the swap.
	ForOverwriting,
}

/// Snapshot of the change counter taken when a save starts.
///
/// Opaque to callers; only meaningful when handed back to the tracker that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeToken {
	sequence: u64,
	kind: SaveOperationKind,
}

impl ChangeToken {
	pub fn kind(&self) -> SaveOperationKind {
		self.kind
	}
}

#[derive(Debug, Default)]
struct Counter {
	/// Net signed edit count relative to the saved state.
	count: i64,
	/// Bumped by every `mark_changed`, never reset.
	sequence: u64,
}

/// Computes `has_unsaved_changes` from edit notifications.
#[derive(Debug)]
pub struct ChangeTracker {
	counter: Mutex<Counter>,
	events: Option<broadcast::Sender<DocumentEvent>>,
}

impl Default for ChangeTracker {
	fn default() -> Self {
		Self::new()
	}
}

impl ChangeTracker {
	/// Creates a detached tracker that emits no events.
	pub fn new() -> Self {
		Self {
			counter: Mutex::new(Counter::default()),
			events: None,
		}
	}

	/// Creates a tracker that broadcasts [`DocumentEvent::UnsavedChanges`] on
	/// every clean/dirty transition.
	pub(crate) fn with_events(events: broadcast::Sender<DocumentEvent>) -> Self {
		Self {
			counter: Mutex::new(Counter::default()),
			events: Some(events),
		}
	}

	/// Records one edit notification.
	pub fn mark_changed(&self, kind: ChangeKind) {
		let (was_dirty, dirty) = {
			let mut counter = self.counter.lock();
			let was_dirty = counter.count != 0;
			counter.sequence = counter.sequence.wrapping_add(1);
			match kind {
				ChangeKind::Done | ChangeKind::Redone => counter.count = counter.count.saturating_add(1),
				ChangeKind::Undone => counter.count = counter.count.saturating_sub(1),
				ChangeKind::Cleared => counter.count = 0,
			}
			(was_dirty, counter.count != 0)
		};
		tracing::trace!(?kind, dirty, "document.change");
		if was_dirty != dirty {
			self.notify(dirty);
		}
	}

	/// Returns `true` while the net change count is non-zero.
	pub fn has_unsaved_changes(&self) -> bool {
		self.counter.lock().count != 0
	}

	/// Net signed change count relative to the saved state.
	pub fn change_count(&self) -> i64 {
		self.counter.lock().count
	}

	/// Captures the counter at the start of a save.
	pub fn begin_save(&self, kind: SaveOperationKind) -> ChangeToken {
		let counter = self.counter.lock();
		ChangeToken {
			sequence: counter.sequence,
			kind,
		}
	}

	/// Reconciles the counter after a successful save.
	///
	/// Clears unsaved changes only when no edit arrived since `token` was
	/// captured. Returns `true` when the counter was cleared.
	pub fn end_save(&self, token: ChangeToken) -> bool {
		let (cleared, was_dirty) = {
			let mut counter = self.counter.lock();
			if counter.sequence != token.sequence {
				(false, false)
			} else {
				let was_dirty = counter.count != 0;
				counter.count = 0;
				(true, was_dirty)
			}
		};
		tracing::trace!(kind = ?token.kind, cleared, "document.change.end_save");
		if was_dirty {
			self.notify(false);
		}
		cleared
	}

	/// Drops all pending edits, as when reverting to the saved contents.
	pub fn reset(&self) {
		self.mark_changed(ChangeKind::Cleared);
	}

	fn notify(&self, dirty: bool) {
		if let Some(events) = &self.events {
			let _ = events.send(DocumentEvent::UnsavedChanges(dirty));
		}
	}
}

/// Source of change notifications, such as an undo/redo history.
///
/// The tracker only depends on this subscription contract, never on the
/// log's internal structure.
pub trait ChangeLog {
	fn subscribe(&self) -> broadcast::Receiver<ChangeKind>;
}

/// Minimal broadcast-backed [`ChangeLog`] for hosts that publish edits directly.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
	tx: broadcast::Sender<ChangeKind>,
}

impl Default for ChangeFeed {
	fn default() -> Self {
		Self::new(256)
	}
}

impl ChangeFeed {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self { tx }
	}

	/// Publishes one change to every subscriber. Returns the receiver count.
	pub fn publish(&self, kind: ChangeKind) -> usize {
		self.tx.send(kind).unwrap_or(0)
	}
}

impl ChangeLog for ChangeFeed {
	fn subscribe(&self) -> broadcast::Receiver<ChangeKind> {
		self.tx.subscribe()
	}
}
