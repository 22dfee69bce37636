//! Error taxonomy for document operations.

use std::time::SystemTime;

use thiserror::Error;

use crate::content::Location;
use crate::format::FormatError;
use crate::serializer::SerializerError;
use crate::state::DocumentState;
use crate::storage::StorageError;

/// Errors routed through a document's error handler.
#[derive(Debug, Error)]
pub enum DocumentError {
	/// The location could not be read or does not exist.
	#[error("failed to read {location}: {source}")]
	Read {
		location: Location,
		#[source]
		source: StorageError,
	},

	/// The format rejected the content it was handed.
	#[error("failed to decode {location} as {content_type}: {source}")]
	Decode {
		location: Location,
		content_type: String,
		#[source]
		source: FormatError,
	},

	/// The model could not be turned into content.
	#[error("failed to encode {location} as {content_type}: {source}")]
	Encode {
		location: Location,
		content_type: String,
		#[source]
		source: FormatError,
	},

	/// Writing or replacing the on-disk item failed. Prior content is intact.
	#[error("failed to write {location}: {source}")]
	Write {
		location: Location,
		#[source]
		source: StorageError,
	},

	/// File attributes for the save could not be computed.
	#[error("failed to compute file attributes for {location}: {source}")]
	Attributes {
		location: Location,
		#[source]
		source: FormatError,
	},

	/// The on-disk item changed behind the document's back.
	#[error("{location} was modified externally")]
	Conflict {
		location: Location,
		known: Option<SystemTime>,
		on_disk: Option<SystemTime>,
	},

	/// There is no in-memory model to save or edit.
	#[error("{location} has no loaded model")]
	NotLoaded { location: Location },

	/// Editing is disabled while a revert is in progress.
	#[error("editing {location} is disabled")]
	EditingDisabled { location: Location },

	/// A document cannot be constructed without a location.
	#[error("document location is empty")]
	EmptyLocation,

	/// The serialized file-access turn ended without reporting a result.
	#[error(transparent)]
	Serializer(#[from] SerializerError),
}

impl DocumentError {
	/// State flags raised while this error is outstanding.
	pub fn state_flags(&self) -> DocumentState {
		match self {
			Self::Encode { .. } | Self::Write { .. } | Self::Attributes { .. } | Self::NotLoaded { .. } => DocumentState::SAVING_ERROR,
			Self::Conflict { .. } => DocumentState::IN_CONFLICT,
			Self::Read { .. } | Self::Decode { .. } | Self::EditingDisabled { .. } | Self::EmptyLocation | Self::Serializer(_) => DocumentState::empty(),
		}
	}

	/// Returns `true` for errors that leave the document usable.
	pub fn is_conflict(&self) -> bool {
		matches!(self, Self::Conflict { .. })
	}

	/// Location the failed operation targeted, when there is one.
	pub fn location(&self) -> Option<&Location> {
		match self {
			Self::Read { location, .. }
			| Self::Decode { location, .. }
			| Self::Encode { location, .. }
			| Self::Write { location, .. }
			| Self::Attributes { location, .. }
			| Self::Conflict { location, .. }
			| Self::NotLoaded { location }
			| Self::EditingDisabled { location } => Some(location),
			Self::EmptyLocation | Self::Serializer(_) => None,
		}
	}
}

/// Result type for document operations.
pub type Result<T> = std::result::Result<T, DocumentError>;
