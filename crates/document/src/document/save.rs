use std::time::SystemTime;

use super::{Completion, Document, DocumentFuture, DocumentInner};
use crate::change::SaveOperationKind;
use crate::content::Location;
use crate::error::{DocumentError, Result};
use crate::format::DocumentFormat;
use crate::state::DocumentState;

impl<F: DocumentFormat> Document<F> {
	/// Encodes the model and atomically writes it to `location`.
	///
	/// A save to another location adopts that location once it succeeds.
	/// Rejected without touching storage while a revert holds
	/// `EDITING_DISABLED`. On failure the item already at `location` is left
	/// as it was and `SAVING_ERROR` is raised.
	pub fn save(&self, location: impl Into<Location>, kind: SaveOperationKind) -> DocumentFuture<bool> {
		let location = location.into();
		if self.inner.state.contains(DocumentState::EDITING_DISABLED) {
			tracing::debug!(path = %location, ?kind, "document.save rejected while editing is disabled");
			return Box::pin(std::future::ready(false));
		}
		tracing::debug!(path = %location, ?kind, "document.save");
		self.enqueue(move |inner| inner.save_turn(&location, kind))
	}

	/// Saves to the current location when there is anything to save.
	pub fn autosave(&self) -> DocumentFuture<bool> {
		if !self.inner.has_unsaved_changes() {
			return Box::pin(std::future::ready(true));
		}
		self.save(self.inner.location(), SaveOperationKind::ForOverwriting)
	}
}

impl<F: DocumentFormat> DocumentInner<F> {
	pub(super) fn save_turn(&self, target: &Location, kind: SaveOperationKind) -> Completion {
		let token = self.changes.begin_save(kind);
		let (current, known) = {
			let meta = self.meta.read();
			(meta.location.clone(), meta.modified)
		};
		let relocating = *target != current;
		let content_type = if relocating {
			self.format.content_type_for(target)
		} else {
			self.format.saving_content_type(&self.content_type())
		};

		self.state.insert(DocumentState::PROGRESS_AVAILABLE);
		let check_conflict = kind == SaveOperationKind::ForOverwriting && !relocating && self.options.detect_conflicts;
		let written = self.encode_and_write(target, kind, &content_type, check_conflict.then_some(known).flatten());

		match written {
			Ok(modified) => {
				let derived = self.format.content_type_for(target);
				{
					let mut meta = self.meta.write();
					meta.location = target.clone();
					meta.modified = modified;
					meta.content_type = (content_type != derived).then_some(content_type);
				}
				self.errors.clear_saving_error();
				let cleared = self.changes.end_save(token);
				self.state.remove(DocumentState::CLOSED | DocumentState::PROGRESS_AVAILABLE);
				tracing::debug!(path = %target, ?kind, cleared, "document.saved");
				Completion::Succeeded
			}
			Err(error) => {
				self.state.remove(DocumentState::PROGRESS_AVAILABLE);
				Completion::Failed(self.route(error))
			}
		}
	}

	/// Snapshots the model and hands it to storage. Nothing reaches disk
	/// unless encoding and attribute computation both succeeded.
	fn encode_and_write(
		&self,
		target: &Location,
		kind: SaveOperationKind,
		content_type: &str,
		known: Option<SystemTime>,
	) -> Result<Option<SystemTime>> {
		let content = {
			let model = self.model.lock();
			let model = model.as_ref().ok_or_else(|| DocumentError::NotLoaded {
				location: target.clone(),
			})?;
			self.format.encode(model, content_type).map_err(|source| DocumentError::Encode {
				location: target.clone(),
				content_type: content_type.to_string(),
				source,
			})?
		};
		let attributes = self
			.format
			.file_attributes(target, kind)
			.map_err(|source| DocumentError::Attributes {
				location: target.clone(),
				source,
			})?;

		if let Some(known) = known {
			self.check_conflict(target, known);
		}

		self.storage
			.coordinated_write_atomic(target, &content, &attributes, kind)
			.map_err(|source| DocumentError::Write {
				location: target.clone(),
				source,
			})
	}

	/// Routes a non-fatal conflict when the item changed since it was last
	/// read or written by this document.
	fn check_conflict(&self, location: &Location, known: SystemTime) {
		match self.storage.modification_time(location) {
			Ok(Some(on_disk)) if on_disk > known => {
				tracing::warn!(path = %location, "document modified externally; overwriting");
				let _ = self.route(DocumentError::Conflict {
					location: location.clone(),
					known: Some(known),
					on_disk: Some(on_disk),
				});
			}
			Ok(_) => {}
			Err(error) => tracing::trace!(path = %location, %error, "conflict check skipped"),
		}
	}
}
