//! Storage collaborator: coordinated reads and atomic write-and-replace.
//!
//! The engine calls a [`Storage`] only from a document's serialized
//! file-access turn, so one document never has two storage calls in flight.
//! Implementations must additionally make each read and write appear atomic
//! to other processes using the same location.

mod fs;

use std::time::SystemTime;

use thiserror::Error;

pub use self::fs::FsStorage;
use crate::change::SaveOperationKind;
use crate::content::{Content, Location};
use crate::format::FileAttributes;

/// Errors reported by a [`Storage`].
#[derive(Debug, Error)]
pub enum StorageError {
	/// Nothing exists at the location.
	#[error("{location} does not exist")]
	NotFound { location: Location },

	/// A create-only write found an existing item.
	#[error("{location} already exists")]
	AlreadyExists { location: Location },

	/// A package entry name is not a single path component.
	#[error("invalid package entry name {name:?} in {location}")]
	InvalidEntry { location: Location, name: String },

	/// Underlying I/O failure.
	#[error("I/O error on {location}: {source}")]
	Io {
		location: Location,
		#[source]
		source: std::io::Error,
	},
}

impl StorageError {
	pub(crate) fn io(location: &Location, source: std::io::Error) -> Self {
		match source.kind() {
			std::io::ErrorKind::NotFound => Self::NotFound {
				location: location.clone(),
			},
			std::io::ErrorKind::AlreadyExists => Self::AlreadyExists {
				location: location.clone(),
			},
			_ => Self::Io {
				location: location.clone(),
				source,
			},
		}
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound { .. })
	}
}

/// Content and timestamp produced by one coordinated read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
	pub content: Content,
	pub modified: Option<SystemTime>,
}

/// Another known version of a document's location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRef {
	/// Where this version's content can be read.
	pub location: Location,
	/// When the version was last written.
	pub modified: Option<SystemTime>,
	/// Human-readable origin, such as a device or user name.
	pub label: String,
}

/// Backing store for document content.
pub trait Storage: Send + Sync + 'static {
	/// Reads the item at `location`. A missing item is [`StorageError::NotFound`].
	fn coordinated_read(&self, location: &Location) -> Result<ReadOutcome, StorageError>;

	/// Writes `content` next to `location`, applies `attributes`, then
	/// atomically replaces the target. Returns the new modification time.
	///
	/// On error the previous item at `location` must be left untouched.
	/// [`SaveOperationKind::ForCreating`] must fail with
	/// [`StorageError::AlreadyExists`] rather than replace an existing item.
	fn coordinated_write_atomic(
		&self,
		location: &Location,
		content: &Content,
		attributes: &FileAttributes,
		kind: SaveOperationKind,
	) -> Result<Option<SystemTime>, StorageError>;

	/// Modification time of the item, or `None` when it does not exist.
	fn modification_time(&self, location: &Location) -> Result<Option<SystemTime>, StorageError>;

	/// Other versions known for `location`. Defaults to none.
	fn list_other_versions(&self, _location: &Location) -> Result<Vec<VersionRef>, StorageError> {
		Ok(Vec::new())
	}
}
