//! Shared fixtures for document integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use xeno_document::{
	Content, Document, DocumentFormat, DocumentOptions, ErrorResolver, ErrorTicket, FileAttributes, FormatError, FsStorage, Location,
	Package, ReadOutcome, Resolution, SaveOperationKind, Storage, StorageError, VersionRef,
};

/// UTF-8 text format. `fail_encode` makes every encode fail.
#[derive(Default)]
pub struct TextFormat {
	pub fail_encode: Arc<AtomicBool>,
}

impl DocumentFormat for TextFormat {
	type Model = String;

	fn decode(&self, content: Content, _content_type: &str) -> Result<String, FormatError> {
		let bytes = content.into_bytes().ok_or("text documents are flat files")?;
		Ok(String::from_utf8(bytes)?)
	}

	fn encode(&self, model: &String, _content_type: &str) -> Result<Content, FormatError> {
		if self.fail_encode.load(Ordering::SeqCst) {
			return Err("encoder refused".into());
		}
		Ok(Content::Bytes(model.clone().into_bytes()))
	}
}

/// Notebook stored as a package: one file per page.
pub struct NotebookFormat;

impl DocumentFormat for NotebookFormat {
	type Model = Vec<String>;

	fn decode(&self, content: Content, _content_type: &str) -> Result<Vec<String>, FormatError> {
		let package = content.into_package().ok_or("notebooks are packages")?;
		let pages = package.file("pages").ok_or("missing pages index")?;
		let count: usize = std::str::from_utf8(pages)?.trim().parse()?;
		(0..count)
			.map(|i| -> Result<String, FormatError> {
				let page = package.file(&format!("page-{i}.txt")).ok_or("missing page")?;
				Ok(String::from_utf8(page.to_vec())?)
			})
			.collect()
	}

	fn encode(&self, model: &Vec<String>, _content_type: &str) -> Result<Content, FormatError> {
		let mut package = Package::new().with_file("pages", model.len().to_string());
		for (i, page) in model.iter().enumerate() {
			package.insert_file(format!("page-{i}.txt"), page.as_bytes());
		}
		Ok(Content::Package(package))
	}
}

/// Switches shared by a [`FaultyStorage`] and the test driving it.
#[derive(Default)]
pub struct Faults {
	pub fail_reads: AtomicBool,
	pub fail_writes: AtomicBool,
	pub writes: AtomicUsize,
	pub other_versions: Mutex<Vec<VersionRef>>,
}

/// [`FsStorage`] with injectable failures.
#[derive(Clone)]
pub struct FaultyStorage {
	inner: FsStorage,
	pub faults: Arc<Faults>,
}

impl FaultyStorage {
	pub fn new() -> Self {
		Self {
			inner: FsStorage::new().sync_writes(false),
			faults: Arc::new(Faults::default()),
		}
	}
}

fn injected(location: &Location) -> StorageError {
	StorageError::Io {
		location: location.clone(),
		source: std::io::Error::other("injected fault"),
	}
}

impl Storage for FaultyStorage {
	fn coordinated_read(&self, location: &Location) -> Result<ReadOutcome, StorageError> {
		if self.faults.fail_reads.load(Ordering::SeqCst) {
			return Err(injected(location));
		}
		self.inner.coordinated_read(location)
	}

	fn coordinated_write_atomic(
		&self,
		location: &Location,
		content: &Content,
		attributes: &FileAttributes,
		kind: SaveOperationKind,
	) -> Result<Option<SystemTime>, StorageError> {
		self.faults.writes.fetch_add(1, Ordering::SeqCst);
		if self.faults.fail_writes.load(Ordering::SeqCst) {
			return Err(injected(location));
		}
		self.inner.coordinated_write_atomic(location, content, attributes, kind)
	}

	fn modification_time(&self, location: &Location) -> Result<Option<SystemTime>, StorageError> {
		self.inner.modification_time(location)
	}

	fn list_other_versions(&self, _location: &Location) -> Result<Vec<VersionRef>, StorageError> {
		Ok(self.faults.other_versions.lock().clone())
	}
}

/// Resolver that defers every interactive error and records what it saw.
#[derive(Clone, Default)]
pub struct DeferringResolver {
	pub offered: Arc<Mutex<Vec<String>>>,
	pub recover_on_revoke: bool,
}

impl ErrorResolver for DeferringResolver {
	fn resolve(&self, ticket: &ErrorTicket) -> Resolution {
		self.offered.lock().push(ticket.error().to_string());
		Resolution::Deferred
	}

	fn interaction_revoked(&self, _ticket: &ErrorTicket) -> bool {
		self.recover_on_revoke
	}
}

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt::try_init();
}

pub fn options() -> DocumentOptions {
	DocumentOptions::default().sync_writes(false)
}

/// Text document at `name` inside `dir`, optionally seeded with `contents`.
pub fn text_document(dir: &tempfile::TempDir, name: &str, contents: Option<&str>) -> (Document<TextFormat>, FaultyStorage) {
	init_tracing();
	let path = dir.path().join(name);
	if let Some(contents) = contents {
		std::fs::write(&path, contents).expect("must seed document");
	}
	let storage = FaultyStorage::new();
	let doc = Document::builder(path, TextFormat::default())
		.storage(storage.clone())
		.options(options())
		.build()
		.expect("must build document");
	(doc, storage)
}

/// Polls `f` until it returns true or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut f: F) -> bool
where
	F: FnMut() -> bool,
{
	let start = std::time::Instant::now();
	while start.elapsed() < timeout {
		if f() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	false
}
