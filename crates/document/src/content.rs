//! Document locations and on-disk content representations.
//!
//! The engine never interprets content: a [`Content`] is either one opaque
//! byte blob or a [`Package`] of named nested items, handed unchanged between
//! [`Storage`](crate::Storage) and [`DocumentFormat`](crate::DocumentFormat).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name used when a location has no usable file stem.
const UNTITLED: &str = "Untitled";

/// Identifier of a document's backing file or file package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location(PathBuf);

impl Location {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self(path.into())
	}

	pub fn path(&self) -> &Path {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.as_os_str().is_empty()
	}

	/// Final path component, if it is valid UTF-8.
	pub fn file_name(&self) -> Option<&str> {
		self.0.file_name().and_then(|name| name.to_str())
	}

	/// Extension as written on disk.
	pub fn extension(&self) -> Option<&str> {
		self.0.extension().and_then(|ext| ext.to_str())
	}

	/// Presentation name derived from the file stem.
	pub fn display_name(&self) -> String {
		self.0
			.file_stem()
			.and_then(|stem| stem.to_str())
			.filter(|stem| !stem.is_empty())
			.unwrap_or(UNTITLED)
			.to_string()
	}

	/// Directory holding this location; `.` for bare relative names.
	pub fn parent(&self) -> &Path {
		match self.0.parent() {
			Some(parent) if !parent.as_os_str().is_empty() => parent,
			_ => Path::new("."),
		}
	}

	/// Same location with its extension replaced.
	#[must_use]
	pub fn with_extension(&self, extension: &str) -> Self {
		Self(self.0.with_extension(extension))
	}
}

impl fmt::Display for Location {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.display())
	}
}

impl From<PathBuf> for Location {
	fn from(path: PathBuf) -> Self {
		Self(path)
	}
}

impl From<&Path> for Location {
	fn from(path: &Path) -> Self {
		Self(path.to_path_buf())
	}
}

impl From<&PathBuf> for Location {
	fn from(path: &PathBuf) -> Self {
		Self(path.clone())
	}
}

impl From<&str> for Location {
	fn from(path: &str) -> Self {
		Self(PathBuf::from(path))
	}
}

impl From<&Location> for Location {
	fn from(location: &Location) -> Self {
		location.clone()
	}
}

/// On-disk representation of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
	/// A flat file.
	Bytes(Vec<u8>),
	/// A directory-like package of named nested items.
	Package(Package),
}

impl Content {
	pub fn as_bytes(&self) -> Option<&[u8]> {
		match self {
			Self::Bytes(bytes) => Some(bytes),
			Self::Package(_) => None,
		}
	}

	pub fn into_bytes(self) -> Option<Vec<u8>> {
		match self {
			Self::Bytes(bytes) => Some(bytes),
			Self::Package(_) => None,
		}
	}

	pub fn as_package(&self) -> Option<&Package> {
		match self {
			Self::Package(package) => Some(package),
			Self::Bytes(_) => None,
		}
	}

	pub fn into_package(self) -> Option<Package> {
		match self {
			Self::Package(package) => Some(package),
			Self::Bytes(_) => None,
		}
	}

	/// Total payload size in bytes, summed over package files.
	pub fn len(&self) -> usize {
		match self {
			Self::Bytes(bytes) => bytes.len(),
			Self::Package(package) => package.len_bytes(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl From<Vec<u8>> for Content {
	fn from(bytes: Vec<u8>) -> Self {
		Self::Bytes(bytes)
	}
}

impl From<Package> for Content {
	fn from(package: Package) -> Self {
		Self::Package(package)
	}
}

/// One item inside a [`Package`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageNode {
	File(Vec<u8>),
	Directory(Package),
}

/// Ordered tree of named items making up a file package.
///
/// Entry names are single path components; [`FsStorage`](crate::FsStorage)
/// rejects names containing separators or `..` when writing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
	entries: BTreeMap<String, PackageNode>,
}

impl Package {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a file entry, returning the node it replaced.
	pub fn insert_file(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Option<PackageNode> {
		self.entries.insert(name.into(), PackageNode::File(bytes.into()))
	}

	/// Inserts a nested directory entry, returning the node it replaced.
	pub fn insert_directory(&mut self, name: impl Into<String>, package: Package) -> Option<PackageNode> {
		self.entries.insert(name.into(), PackageNode::Directory(package))
	}

	#[must_use]
	pub fn with_file(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
		self.insert_file(name, bytes);
		self
	}

	#[must_use]
	pub fn with_directory(mut self, name: impl Into<String>, package: Package) -> Self {
		self.insert_directory(name, package);
		self
	}

	pub fn get(&self, name: &str) -> Option<&PackageNode> {
		self.entries.get(name)
	}

	pub fn file(&self, name: &str) -> Option<&[u8]> {
		match self.entries.get(name) {
			Some(PackageNode::File(bytes)) => Some(bytes),
			_ => None,
		}
	}

	pub fn remove(&mut self, name: &str) -> Option<PackageNode> {
		self.entries.remove(name)
	}

	pub fn entries(&self) -> impl Iterator<Item = (&str, &PackageNode)> {
		self.entries.iter().map(|(name, node)| (name.as_str(), node))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn len_bytes(&self) -> usize {
		self.entries
			.values()
			.map(|node| match node {
				PackageNode::File(bytes) => bytes.len(),
				PackageNode::Directory(package) => package.len_bytes(),
			})
			.sum()
	}
}
