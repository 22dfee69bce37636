//! Error funnel with a two-phase resolution protocol.
//!
//! Every failure a document hits is routed here exactly once. An error is
//! first *handled*: its state flags are raised, an
//! [`ErrorPending`](crate::DocumentEvent::ErrorPending) event goes out and the
//! [`ErrorResolver`] gets a chance at it. Later it is *finished*, either
//! inline by the resolver or by the application through
//! [`Document::finish_error`](crate::Document::finish_error). Only then does
//! the caller future of the failed operation resolve.
//!
//! One error is active per document. Errors arriving while another awaits
//! the application queue up in arrival order. Errors handled without
//! interaction bypass the queue and finish before `handle` returns.


use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::DocumentError;
use crate::state::{DocumentEvent, DocumentState, StateMachine};

/// Identifier of one routed error, unique per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErrorId(u64);

impl ErrorId {
	pub fn get(self) -> u64 {
		self.0
	}
}

impl std::fmt::Display for ErrorId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Resolution progress of a routed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
	/// Queued behind the active error.
	Unresolved,
	/// Offered to the resolver and awaiting a decision.
	Resolving,
	/// Done. `recovered` tells whether the application fixed the cause.
	Finished { recovered: bool },
}

impl ErrorPhase {
	pub fn is_finished(self) -> bool {
		matches!(self, Self::Finished { .. })
	}
}

/// Handle to a routed error, as seen by an [`ErrorResolver`].
#[derive(Debug, Clone)]
pub struct ErrorTicket {
	id: ErrorId,
	error: Arc<DocumentError>,
	interaction_permitted: bool,
}

impl ErrorTicket {
	pub fn id(&self) -> ErrorId {
		self.id
	}

	pub fn error(&self) -> &DocumentError {
		&self.error
	}

	/// Whether the resolver may take its time (prompt the user, retry later).
	pub fn interaction_permitted(&self) -> bool {
		self.interaction_permitted
	}
}

/// Decision an [`ErrorResolver`] returns for an interactive error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
	Recovered,
	NotRecovered,
	/// The application will call [`Document::finish_error`](crate::Document::finish_error) later.
	Deferred,
}

/// Application policy for routed errors.
///
/// Hooks are called from whichever context routed the error, never while
/// the handler's lock is held, so they may call back into the document.
pub trait ErrorResolver: Send + Sync + 'static {
	/// Offered the active interactive error.
	fn resolve(&self, _ticket: &ErrorTicket) -> Resolution {
		Resolution::NotRecovered
	}

	/// Decides synchronously, for errors handled without interaction and for
	/// queued errors drained by a forced interaction end.
	fn resolve_now(&self, _ticket: &ErrorTicket) -> bool {
		false
	}

	/// The active error's interaction is being cut short.
	fn interaction_revoked(&self, _ticket: &ErrorTicket) -> bool {
		false
	}
}

/// Resolver that never recovers anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

impl ErrorResolver for DefaultResolver {}

/// Awaits the end of one routed error.
#[derive(Debug)]
pub struct ResolutionWaiter {
	id: ErrorId,
	rx: watch::Receiver<ErrorPhase>,
}

impl ResolutionWaiter {
	pub fn id(&self) -> ErrorId {
		self.id
	}

	pub fn phase(&self) -> ErrorPhase {
		*self.rx.borrow()
	}

	/// Resolves once the error finished. Returns whether it was recovered.
	///
	/// Reports `false` if the document went away before the error finished.
	pub async fn finished(mut self) -> bool {
		match self.rx.wait_for(|phase| phase.is_finished()).await {
			Ok(phase) => matches!(*phase, ErrorPhase::Finished { recovered: true }),
			Err(_) => false,
		}
	}
}

struct PendingError {
	ticket: ErrorTicket,
	phase: watch::Sender<ErrorPhase>,
}

#[derive(Default)]
struct HandlerState {
	next_id: u64,
	active: Option<PendingError>,
	waiting: VecDeque<PendingError>,
	/// Error that raised the current `SAVING_ERROR`, if it is still outstanding.
	saving_error: Option<ErrorId>,
}

impl HandlerState {
	/// Promotes the next queued error when nothing is active.
	fn activate_next(&mut self) -> Option<ErrorTicket> {
		if self.active.is_some() {
			return None;
		}
		let next = self.waiting.pop_front()?;
		next.phase.send_replace(ErrorPhase::Resolving);
		let ticket = next.ticket.clone();
		self.active = Some(next);
		Some(ticket)
	}

	fn take(&mut self, id: ErrorId) -> Option<PendingError> {
		if self.active.as_ref().is_some_and(|p| p.ticket.id == id) {
			return self.active.take();
		}
		let position = self.waiting.iter().position(|p| p.ticket.id == id)?;
		self.waiting.remove(position)
	}

	fn release_saving_error(&mut self, id: ErrorId, recovered: bool) -> bool {
		if recovered && self.saving_error == Some(id) {
			self.saving_error = None;
			return true;
		}
		false
	}
}

/// Per-document error funnel.
pub(crate) struct ErrorHandler {
	resolver: Arc<dyn ErrorResolver>,
	state: Arc<StateMachine>,
	inner: Mutex<HandlerState>,
}

impl std::fmt::Debug for ErrorHandler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = self.inner.lock();
		f.debug_struct("ErrorHandler")
			.field("active", &inner.active.as_ref().map(|p| p.ticket.id))
			.field("waiting", &inner.waiting.len())
			.field("saving_error", &inner.saving_error)
			.finish()
	}
}

impl ErrorHandler {
	pub(crate) fn new(resolver: Arc<dyn ErrorResolver>, state: Arc<StateMachine>) -> Self {
		Self {
			resolver,
			state,
			inner: Mutex::new(HandlerState::default()),
		}
	}

	/// Routes one error.
	pub(crate) fn handle(&self, error: DocumentError, interaction_permitted: bool) -> ResolutionWaiter {
		let flags = error.state_flags();
		let (pending, waiter) = {
			let mut inner = self.inner.lock();
			let id = ErrorId(inner.next_id);
			inner.next_id += 1;
			let raised = self.state.update(|state| {
				let mut flags = flags;
				// A pending revert discards the model this save failed to write.
				if state.contains(DocumentState::EDITING_DISABLED) {
					flags.remove(DocumentState::SAVING_ERROR);
				}
				state.insert(flags);
			});
			if flags.contains(DocumentState::SAVING_ERROR) && raised.contains(DocumentState::SAVING_ERROR) {
				inner.saving_error = Some(id);
			}
			let (phase, rx) = watch::channel(ErrorPhase::Unresolved);
			let ticket = ErrorTicket {
				id,
				error: Arc::new(error),
				interaction_permitted,
			};
			(PendingError { ticket, phase }, ResolutionWaiter { id, rx })
		};

		let id = pending.ticket.id;
		tracing::warn!(error = %pending.ticket.error, %id, interaction_permitted, "document.error");
		self.state.emit(DocumentEvent::ErrorPending { id });

		if !interaction_permitted {
			let recovered = self.resolver.resolve_now(&pending.ticket);
			let clear_saving = self.inner.lock().release_saving_error(id, recovered);
			self.settle(pending, recovered, clear_saving);
			return waiter;
		}

		let offer = {
			let mut inner = self.inner.lock();
			inner.waiting.push_back(pending);
			inner.activate_next()
		};
		self.drive(offer);
		waiter
	}

	/// Finishes error `id`. Returns `false` if it is unknown or already finished.
	pub(crate) fn finish(&self, id: ErrorId, recovered: bool) -> bool {
		let Some(next) = self.complete(id, recovered) else {
			tracing::debug!(%id, "document.error.finish unknown");
			return false;
		};
		self.drive(next);
		true
	}

	/// Finishes the active error and every queued one without waiting.
	/// Returns how many errors were finished.
	pub(crate) fn force_interaction_end(&self) -> usize {
		let (active, waiting) = {
			let mut inner = self.inner.lock();
			(inner.active.take(), std::mem::take(&mut inner.waiting))
		};

		let mut finished = 0;
		if let Some(pending) = active {
			let recovered = self.resolver.interaction_revoked(&pending.ticket);
			let clear_saving = self.inner.lock().release_saving_error(pending.ticket.id, recovered);
			self.settle(pending, recovered, clear_saving);
			finished += 1;
		}
		for pending in waiting {
			let recovered = self.resolver.resolve_now(&pending.ticket);
			let clear_saving = self.inner.lock().release_saving_error(pending.ticket.id, recovered);
			self.settle(pending, recovered, clear_saving);
			finished += 1;
		}
		if finished > 0 {
			tracing::debug!(finished, "document.error.force_end");
		}
		finished
	}

	/// A later save succeeded or an open replaced the unsaved model.
	pub(crate) fn clear_saving_error(&self) {
		let mut inner = self.inner.lock();
		inner.saving_error = None;
		self.state.remove(DocumentState::SAVING_ERROR);
	}

	/// Raises `EDITING_DISABLED` for a revert and drops `SAVING_ERROR` in the
	/// same transition, so the two flags are never observed together.
	pub(crate) fn disable_editing(&self) {
		let mut inner = self.inner.lock();
		inner.saving_error = None;
		self.state.update(|state| {
			state.remove(DocumentState::SAVING_ERROR);
			state.insert(DocumentState::EDITING_DISABLED);
		});
	}

	/// Currently active error, if any.
	pub(crate) fn active(&self) -> Option<ErrorTicket> {
		self.inner.lock().active.as_ref().map(|p| p.ticket.clone())
	}

	/// Number of errors not yet finished.
	pub(crate) fn outstanding(&self) -> usize {
		let inner = self.inner.lock();
		inner.waiting.len() + usize::from(inner.active.is_some())
	}

	/// Offers active tickets to the resolver until one is deferred.
	fn drive(&self, mut offer: Option<ErrorTicket>) {
		while let Some(ticket) = offer {
			let recovered = match self.resolver.resolve(&ticket) {
				Resolution::Recovered => true,
				Resolution::NotRecovered => false,
				Resolution::Deferred => {
					tracing::debug!(id = %ticket.id, "document.error.deferred");
					return;
				}
			};
			// The resolver may already have finished it through the document.
			offer = self.complete(ticket.id, recovered).flatten();
		}
	}

	/// Removes and settles `id`. The outer `None` means unknown; the inner
	/// option is the next ticket to offer.
	fn complete(&self, id: ErrorId, recovered: bool) -> Option<Option<ErrorTicket>> {
		let (pending, clear_saving, next) = {
			let mut inner = self.inner.lock();
			let pending = inner.take(id)?;
			let clear_saving = inner.release_saving_error(id, recovered);
			(pending, clear_saving, inner.activate_next())
		};
		self.settle(pending, recovered, clear_saving);
		Some(next)
	}

	fn settle(&self, pending: PendingError, recovered: bool, clear_saving: bool) {
		let id = pending.ticket.id;
		if recovered {
			let mut cleared = DocumentState::empty();
			if clear_saving {
				cleared |= DocumentState::SAVING_ERROR;
			}
			if pending.ticket.error.is_conflict() {
				cleared |= DocumentState::IN_CONFLICT;
			}
			if !cleared.is_empty() {
				self.state.remove(cleared);
			}
		}
		pending.phase.send_replace(ErrorPhase::Finished { recovered });
		tracing::debug!(%id, recovered, "document.error.finished");
		self.state.emit(DocumentEvent::ErrorFinished { id, recovered });
	}
}
