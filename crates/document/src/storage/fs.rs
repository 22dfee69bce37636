use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path};
use std::time::SystemTime;

use super::{ReadOutcome, Storage, StorageError};
use crate::change::SaveOperationKind;
use crate::content::{Content, Location, Package, PackageNode};
use crate::format::FileAttributes;
use crate::options::{DEFAULT_TEMP_PREFIX, DocumentOptions};

/// Local file system [`Storage`].
///
/// Flat files are written to a sibling temporary file and renamed over the
/// target. Packages are written to a sibling temporary directory; an existing
/// package is moved aside, the new one renamed in, and the old one removed
/// only after the swap succeeded.
#[derive(Debug, Clone)]
pub struct FsStorage {
	temp_prefix: String,
	sync_writes: bool,
}

impl Default for FsStorage {
	fn default() -> Self {
		Self::new()
	}
}

impl FsStorage {
	pub fn new() -> Self {
		Self {
			temp_prefix: DEFAULT_TEMP_PREFIX.to_string(),
			sync_writes: true,
		}
	}

	pub fn from_options(options: &DocumentOptions) -> Self {
		Self {
			temp_prefix: options.temp_prefix.clone(),
			sync_writes: options.sync_writes,
		}
	}

	#[must_use]
	pub fn sync_writes(mut self, sync: bool) -> Self {
		self.sync_writes = sync;
		self
	}

	#[must_use]
	pub fn temp_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.temp_prefix = prefix.into();
		self
	}

	fn write_bytes(&self, location: &Location, bytes: &[u8], attributes: &FileAttributes, kind: SaveOperationKind) -> Result<(), StorageError> {
		let io = |e| StorageError::io(location, e);
		let mut temp = tempfile::Builder::new()
			.prefix(&self.temp_prefix)
			.suffix(".tmp")
			.tempfile_in(location.parent())
			.map_err(io)?;
		temp.write_all(bytes).map_err(io)?;
		if self.sync_writes {
			temp.as_file().sync_all().map_err(io)?;
		}
		apply_attributes(location, temp.path(), attributes)?;

		match kind {
			SaveOperationKind::ForCreating => temp.persist_noclobber(location.path()).map_err(|e| io(e.error))?,
			SaveOperationKind::ForOverwriting => temp.persist(location.path()).map_err(|e| io(e.error))?,
		};
		Ok(())
	}

	fn write_package(&self, location: &Location, package: &Package, attributes: &FileAttributes, kind: SaveOperationKind) -> Result<(), StorageError> {
		let io = |e| StorageError::io(location, e);
		let staging = tempfile::Builder::new()
			.prefix(&self.temp_prefix)
			.tempdir_in(location.parent())
			.map_err(io)?;
		write_tree(location, staging.path(), package, self.sync_writes)?;
		apply_attributes(location, staging.path(), attributes)?;

		match kind {
			SaveOperationKind::ForCreating => {
				if fs::symlink_metadata(location.path()).is_ok() {
					return Err(StorageError::AlreadyExists {
						location: location.clone(),
					});
				}
				fs::rename(staging.path(), location.path()).map_err(io)?;
			}
			SaveOperationKind::ForOverwriting => self.swap_into_place(location, staging.path())?,
		}
		// The staged directory now lives at the target; nothing left to clean up.
		let _ = staging.keep();
		Ok(())
	}

	/// Moves the current item aside, renames `staged` over the target, and
	/// restores the previous item if that rename fails.
	fn swap_into_place(&self, location: &Location, staged: &Path) -> Result<(), StorageError> {
		let io = |e| StorageError::io(location, e);
		let target = location.path();
		match fs::symlink_metadata(target) {
			Ok(_) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return fs::rename(staged, target).map_err(io),
			Err(e) => return Err(io(e)),
		}

		let backup_dir = tempfile::Builder::new()
			.prefix(&self.temp_prefix)
			.tempdir_in(location.parent())
			.map_err(io)?;
		let backup = backup_dir.path().join("previous");
		fs::rename(target, &backup).map_err(io)?;

		if let Err(e) = fs::rename(staged, target) {
			if let Err(restore) = fs::rename(&backup, target) {
				let kept = backup_dir.keep();
				tracing::error!(path = %location, backup = %kept.display(), error = %restore, "failed to restore previous package");
			}
			return Err(io(e));
		}
		Ok(())
	}
}

impl Storage for FsStorage {
	fn coordinated_read(&self, location: &Location) -> Result<ReadOutcome, StorageError> {
		let io = |e| StorageError::io(location, e);
		let metadata = fs::metadata(location.path()).map_err(io)?;
		let content = if metadata.is_dir() {
			Content::Package(read_tree(location, location.path())?)
		} else {
			Content::Bytes(fs::read(location.path()).map_err(io)?)
		};
		tracing::debug!(path = %location, len = content.len(), package = metadata.is_dir(), "storage.read");
		Ok(ReadOutcome {
			content,
			modified: metadata.modified().ok(),
		})
	}

	fn coordinated_write_atomic(
		&self,
		location: &Location,
		content: &Content,
		attributes: &FileAttributes,
		kind: SaveOperationKind,
	) -> Result<Option<SystemTime>, StorageError> {
		match content {
			Content::Bytes(bytes) => self.write_bytes(location, bytes, attributes, kind)?,
			Content::Package(package) => self.write_package(location, package, attributes, kind)?,
		}
		if self.sync_writes {
			sync_parent(location);
		}
		tracing::debug!(path = %location, len = content.len(), ?kind, "storage.write");
		self.modification_time(location)
	}

	fn modification_time(&self, location: &Location) -> Result<Option<SystemTime>, StorageError> {
		match fs::metadata(location.path()) {
			Ok(metadata) => Ok(metadata.modified().ok()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StorageError::io(location, e)),
		}
	}
}

fn read_tree(location: &Location, dir: &Path) -> Result<Package, StorageError> {
	let io = |e| StorageError::io(location, e);
	let mut package = Package::new();
	for entry in fs::read_dir(dir).map_err(io)? {
		let entry = entry.map_err(io)?;
		let name = entry.file_name();
		let Some(name) = name.to_str() else {
			return Err(StorageError::InvalidEntry {
				location: location.clone(),
				name: name.to_string_lossy().into_owned(),
			});
		};
		if entry.file_type().map_err(io)?.is_dir() {
			package.insert_directory(name, read_tree(location, &entry.path())?);
		} else {
			package.insert_file(name, fs::read(entry.path()).map_err(io)?);
		}
	}
	Ok(package)
}

fn write_tree(location: &Location, dir: &Path, package: &Package, sync: bool) -> Result<(), StorageError> {
	let io = |e| StorageError::io(location, e);
	for (name, node) in package.entries() {
		if !is_single_component(name) {
			return Err(StorageError::InvalidEntry {
				location: location.clone(),
				name: name.to_string(),
			});
		}
		let path = dir.join(name);
		match node {
			PackageNode::File(bytes) => {
				let mut file = File::create(&path).map_err(io)?;
				file.write_all(bytes).map_err(io)?;
				if sync {
					file.sync_all().map_err(io)?;
				}
			}
			PackageNode::Directory(child) => {
				fs::create_dir(&path).map_err(io)?;
				write_tree(location, &path, child, sync)?;
			}
		}
	}
	Ok(())
}

pub(super) fn is_single_component(name: &str) -> bool {
	let mut components = Path::new(name).components();
	matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

fn apply_attributes(location: &Location, path: &Path, attributes: &FileAttributes) -> Result<(), StorageError> {
	if attributes.is_empty() {
		return Ok(());
	}
	let io = |e| StorageError::io(location, e);
	if let Some(modified) = attributes.modified {
		File::open(path).and_then(|file| file.set_modified(modified)).map_err(io)?;
	}
	#[cfg(unix)]
	if let Some(mode) = attributes.mode {
		use std::os::unix::fs::PermissionsExt;
		fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io)?;
	}
	if let Some(readonly) = attributes.readonly {
		let mut permissions = fs::metadata(path).map_err(io)?.permissions();
		permissions.set_readonly(readonly);
		fs::set_permissions(path, permissions).map_err(io)?;
	}
	Ok(())
}

#[cfg(unix)]
fn sync_parent(location: &Location) {
	if let Err(error) = File::open(location.parent()).and_then(|dir| dir.sync_all()) {
		tracing::trace!(path = %location, %error, "storage.sync_parent failed");
	}
}

#[cfg(not(unix))]
fn sync_parent(_location: &Location) {}
