use super::{Completion, Document, DocumentFuture, DocumentInner};
use crate::format::DocumentFormat;
use crate::state::DocumentState;

impl<F: DocumentFormat> Document<F> {
	/// Autosaves pending edits, then marks the document `CLOSED`.
	///
	/// Resolves with the autosave's outcome. The model is kept when the
	/// autosave failed so the edits are not lost.
	pub fn close(&self) -> DocumentFuture<bool> {
		tracing::debug!(path = %self.inner.location(), "document.close");
		let autosave = self.autosave();
		let closing = self.enqueue(|inner| inner.close_turn());
		Box::pin(async move {
			let saved = autosave.await;
			closing.await;
			saved
		})
	}
}

impl<F: DocumentFormat> DocumentInner<F> {
	fn close_turn(&self) -> Completion {
		if !self.has_unsaved_changes() {
			*self.model.lock() = None;
		}
		self.state.insert(DocumentState::CLOSED);
		tracing::debug!(path = %self.location(), "document.closed");
		Completion::Succeeded
	}
}
