use std::time::SystemTime;

use super::{Completion, Document, DocumentFuture, DocumentInner};
use crate::content::Location;
use crate::error::{DocumentError, Result};
use crate::format::DocumentFormat;
use crate::state::DocumentState;

impl<F: DocumentFormat> Document<F> {
	/// Reads and decodes the current location.
	///
	/// Resolves `true` once the model is loaded and the document left
	/// `CLOSED`. Either way any unsaved edits are discarded. A missing or
	/// undecodable item resolves `false` and leaves the document closed
	/// without a model.
	pub fn open(&self) -> DocumentFuture<bool> {
		tracing::debug!(path = %self.inner.location(), "document.open");
		self.enqueue(|inner| inner.open_turn())
	}
}

impl<F: DocumentFormat> DocumentInner<F> {
	pub(super) fn open_turn(&self) -> Completion {
		let location = self.location();
		self.state.insert(DocumentState::PROGRESS_AVAILABLE);

		match self.read_and_decode(&location) {
			Ok((model, modified)) => {
				*self.model.lock() = Some(model);
				self.changes.reset();
				self.errors.clear_saving_error();
				self.meta.write().modified = modified;
				self.state.remove(DocumentState::CLOSED | DocumentState::PROGRESS_AVAILABLE);
				self.refresh_conflict(&location, modified);
				tracing::debug!(path = %location, "document.opened");
				Completion::Succeeded
			}
			Err(error) => {
				// A closed document holds no model to edit or save.
				*self.model.lock() = None;
				self.changes.reset();
				self.state.update(|state| {
					state.insert(DocumentState::CLOSED);
					state.remove(DocumentState::PROGRESS_AVAILABLE);
				});
				Completion::Failed(self.route(error))
			}
		}
	}

	fn read_and_decode(&self, location: &Location) -> Result<(F::Model, Option<SystemTime>)> {
		let outcome = self.storage.coordinated_read(location).map_err(|source| DocumentError::Read {
			location: location.clone(),
			source,
		})?;
		let content_type = self.content_type();
		let model = self
			.format
			.decode(outcome.content, &content_type)
			.map_err(|source| DocumentError::Decode {
				location: location.clone(),
				content_type,
				source,
			})?;
		Ok((model, outcome.modified))
	}

	/// Raises `IN_CONFLICT` when the storage reports other versions, clears it otherwise.
	fn refresh_conflict(&self, location: &Location, known: Option<SystemTime>) {
		match self.storage.list_other_versions(location) {
			Ok(versions) if versions.is_empty() => {
				self.state.remove(DocumentState::IN_CONFLICT);
			}
			Ok(versions) => {
				let on_disk = versions.iter().filter_map(|version| version.modified).max();
				tracing::debug!(path = %location, versions = versions.len(), "document.other_versions");
				// Non-fatal: the open already succeeded.
				let _ = self.route(DocumentError::Conflict {
					location: location.clone(),
					known,
					on_disk,
				});
			}
			Err(error) => tracing::warn!(path = %location, %error, "failed to list other versions"),
		}
	}
}
