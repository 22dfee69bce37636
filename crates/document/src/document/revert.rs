use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::{Completion, Document, DocumentFuture, DocumentInner};
use crate::content::Location;
use crate::format::DocumentFormat;
use crate::state::DocumentState;

impl<F: DocumentFormat> Document<F> {
	/// Discards the in-memory model and reloads it from `location`.
	///
	/// Editing is disabled from the moment this is called until the revert
	/// turn ends, however it ends. Any `SAVING_ERROR` is dropped as editing is
	/// disabled, since the model that failed to save is discarded.
	pub fn revert(&self, location: impl Into<Location>) -> DocumentFuture<bool> {
		let location = location.into();
		tracing::debug!(path = %location, "document.revert");
		let guard = EditingGuard::engage(Arc::clone(&self.inner));
		self.enqueue(move |inner| {
			let _guard = guard;
			inner.revert_turn(&location)
		})
	}
}

impl<F: DocumentFormat> DocumentInner<F> {
	fn revert_turn(&self, location: &Location) -> Completion {
		self.changes.reset();
		self.meta.write().location = location.clone();
		self.open_turn()
	}
}

/// Holds `EDITING_DISABLED` for one pending revert.
///
/// Released on drop, which covers the turn finishing, panicking, or never
/// running because the queue shut down.
struct EditingGuard<F: DocumentFormat> {
	inner: Arc<DocumentInner<F>>,
}

impl<F: DocumentFormat> EditingGuard<F> {
	fn engage(inner: Arc<DocumentInner<F>>) -> Self {
		if inner.editing_holds.fetch_add(1, Ordering::AcqRel) == 0 {
			// The unsaved model that failed to save is being thrown away.
			inner.errors.disable_editing();
			inner.format.disable_editing();
		}
		Self { inner }
	}
}

impl<F: DocumentFormat> Drop for EditingGuard<F> {
	fn drop(&mut self) {
		if self.inner.editing_holds.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.inner.state.remove(DocumentState::EDITING_DISABLED);
			self.inner.format.enable_editing();
		}
	}
}
