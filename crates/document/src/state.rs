//! Document state bitmask and change-notification broadcast.

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::recovery::ErrorId;

bitflags::bitflags! {
	/// Observable lifecycle state of a document.
	///
	/// The empty set is the normal, open-and-editable state. Several flags
	/// may be set at once (a conflicted document can also be saving).
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct DocumentState: u8 {
		/// Not successfully opened yet, or closed since. Model and metadata may be stale.
		const CLOSED = 1 << 0;
		/// Other versions of the location exist or an external modification was detected.
		const IN_CONFLICT = 1 << 1;
		/// The last save failed and has not been superseded or recovered.
		const SAVING_ERROR = 1 << 2;
		/// A revert is in progress; the model must not be edited.
		const EDITING_DISABLED = 1 << 3;
		/// A read or write turn is running for this document.
		const PROGRESS_AVAILABLE = 1 << 4;
	}
}

impl DocumentState {
	pub const NORMAL: Self = Self::empty();

	pub fn is_normal(self) -> bool {
		self.is_empty()
	}
}

/// Notifications broadcast to presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEvent {
	/// The state bitmask changed.
	StateChanged { previous: DocumentState, current: DocumentState },
	/// `has_unsaved_changes` flipped.
	UnsavedChanges(bool),
	/// An error was routed and awaits resolution.
	ErrorPending { id: ErrorId },
	/// An error finished resolution.
	ErrorFinished { id: ErrorId, recovered: bool },
}

/// Owner of the state bitmask. Every transition is broadcast once.
#[derive(Debug)]
pub(crate) struct StateMachine {
	state: Mutex<DocumentState>,
	events: broadcast::Sender<DocumentEvent>,
}

impl StateMachine {
	pub(crate) fn new(initial: DocumentState, event_buffer: usize) -> Self {
		let (events, _) = broadcast::channel(event_buffer.max(1));
		Self {
			state: Mutex::new(initial),
			events,
		}
	}

	pub(crate) fn current(&self) -> DocumentState {
		*self.state.lock()
	}

	pub(crate) fn contains(&self, flags: DocumentState) -> bool {
		self.current().contains(flags)
	}

	/// Applies `f` to the bitmask and broadcasts if the value changed.
	pub(crate) fn update(&self, f: impl FnOnce(&mut DocumentState)) -> DocumentState {
		let (previous, current) = {
			let mut state = self.state.lock();
			let previous = *state;
			f(&mut state);
			(previous, *state)
		};
		if previous != current {
			tracing::trace!(?previous, ?current, "document.state");
			self.emit(DocumentEvent::StateChanged { previous, current });
		}
		current
	}

	pub(crate) fn insert(&self, flags: DocumentState) -> DocumentState {
		self.update(|state| state.insert(flags))
	}

	pub(crate) fn remove(&self, flags: DocumentState) -> DocumentState {
		self.update(|state| state.remove(flags))
	}

	pub(crate) fn emit(&self, event: DocumentEvent) {
		let _ = self.events.send(event);
	}

	pub(crate) fn sender(&self) -> broadcast::Sender<DocumentEvent> {
		self.events.clone()
	}

	pub(crate) fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
		self.events.subscribe()
	}
}
