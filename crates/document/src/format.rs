//! Per-document-type format capability.
//!
//! A [`DocumentFormat`] supplies the only content-specific logic the engine
//! needs: turning [`Content`] into a model and back. Everything else has a
//! default so simple formats implement just `decode` and `encode`.

use std::time::SystemTime;

use crate::change::SaveOperationKind;
use crate::content::{Content, Location};

/// Content type used for locations without an extension.
pub const DEFAULT_CONTENT_TYPE: &str = "data";

/// Error returned by format hooks.
pub type FormatError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Attributes applied to the freshly written item before it replaces the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
	/// Mark the item read-only.
	pub readonly: Option<bool>,
	/// Unix permission bits. Ignored on other platforms.
	pub mode: Option<u32>,
	/// Explicit modification time instead of the write time.
	pub modified: Option<SystemTime>,
}

impl FileAttributes {
	pub fn is_empty(&self) -> bool {
		self.readonly.is_none() && self.mode.is_none() && self.modified.is_none()
	}
}

/// Encode/decode capability for one kind of document.
///
/// Called from the document's background file-access context, so
/// implementations must be thread safe.
pub trait DocumentFormat: Send + Sync + 'static {
	/// In-memory representation of the document.
	type Model: Send + 'static;

	/// Builds a model from content read at the document's location.
	fn decode(&self, content: Content, content_type: &str) -> Result<Self::Model, FormatError>;

	/// Snapshots the model into content for writing.
	fn encode(&self, model: &Self::Model, content_type: &str) -> Result<Content, FormatError>;

	/// Content type implied by a location. Defaults to its lowercased extension.
	fn content_type_for(&self, location: &Location) -> String {
		location
			.extension()
			.map(str::to_ascii_lowercase)
			.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
	}

	/// Content type to save as. Override to migrate documents to a new type.
	fn saving_content_type(&self, current: &str) -> String {
		current.to_string()
	}

	/// File name extension for a content type and save kind.
	fn file_name_extension(&self, content_type: &str, _kind: SaveOperationKind) -> String {
		content_type.to_string()
	}

	/// Attributes to apply to the written item. Defaults to none.
	fn file_attributes(&self, _location: &Location, _kind: SaveOperationKind) -> Result<FileAttributes, FormatError> {
		Ok(FileAttributes::default())
	}

	/// Out-of-band dirtiness for models that do not report edits.
	fn has_unsaved_changes_override(&self) -> bool {
		false
	}

	/// Called when it stops being safe to edit the model (revert started).
	fn disable_editing(&self) {}

	/// Called when editing is safe again.
	fn enable_editing(&self) {}
}
