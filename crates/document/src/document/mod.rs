//! The [`Document`] aggregate and its coordinators.
//!
//! Public operations enqueue one turn on the document's
//! [`FileAccessSerializer`] synchronously and return a boxed future. Turns
//! run on the blocking pool and report a [`Completion`]; failures are routed
//! to the error handler inside the turn, and the returned future resolves
//! only after that error finished.

mod close;
mod open;
mod revert;
mod save;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::change::{ChangeKind, ChangeLog, ChangeTracker, SaveOperationKind};
use crate::content::Location;
use crate::error::{DocumentError, Result};
use crate::format::DocumentFormat;
use crate::options::DocumentOptions;
use crate::recovery::{DefaultResolver, ErrorHandler, ErrorId, ErrorResolver, ErrorTicket, ResolutionWaiter};
use crate::serializer::{FileAccess, FileAccessSerializer, SerializerError};
use crate::state::{DocumentEvent, DocumentState, StateMachine};
use crate::storage::{FsStorage, Storage, VersionRef};

/// Boxed future returned by document operations.
///
/// Resolves on whichever task awaits it, after the operation's turn ran and
/// any error it raised finished resolution.
pub type DocumentFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Outcome a turn hands back to the awaiting caller.
enum Completion {
	Succeeded,
	Failed(ResolutionWaiter),
}

#[derive(Debug)]
struct Metadata {
	location: Location,
	display_name: Option<String>,
	content_type: Option<String>,
	modified: Option<SystemTime>,
}

struct DocumentInner<F: DocumentFormat> {
	format: F,
	storage: Arc<dyn Storage>,
	options: DocumentOptions,
	meta: RwLock<Metadata>,
	model: Mutex<Option<F::Model>>,
	state: Arc<StateMachine>,
	changes: Arc<ChangeTracker>,
	errors: ErrorHandler,
	/// Outstanding reverts holding `EDITING_DISABLED`.
	editing_holds: AtomicUsize,
	serializer: FileAccessSerializer,
	change_feed: Mutex<Option<CancellationToken>>,
}

impl<F: DocumentFormat> Drop for DocumentInner<F> {
	fn drop(&mut self) {
		if let Some(token) = self.change_feed.get_mut().take() {
			token.cancel();
		}
	}
}

impl<F: DocumentFormat> DocumentInner<F> {
	fn location(&self) -> Location {
		self.meta.read().location.clone()
	}

	fn content_type(&self) -> String {
		let meta = self.meta.read();
		match &meta.content_type {
			Some(content_type) => content_type.clone(),
			None => self.format.content_type_for(&meta.location),
		}
	}

	fn has_unsaved_changes(&self) -> bool {
		self.changes.has_unsaved_changes() || self.format.has_unsaved_changes_override()
	}

	fn route(&self, error: DocumentError) -> ResolutionWaiter {
		self.errors.handle(error, self.options.interaction_permitted)
	}

	/// Routes a turn that never reported its outcome.
	fn interrupted(&self, error: SerializerError) -> ResolutionWaiter {
		self.state.remove(DocumentState::PROGRESS_AVAILABLE);
		self.route(error.into())
	}
}

/// A user-editable model backed by one location.
///
/// Cloning is cheap and yields another handle to the same document.
pub struct Document<F: DocumentFormat> {
	inner: Arc<DocumentInner<F>>,
}

impl<F: DocumentFormat> Clone for Document<F> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<F: DocumentFormat> std::fmt::Debug for Document<F> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Document")
			.field("location", &self.inner.location())
			.field("state", &self.inner.state.current())
			.field("errors", &self.inner.errors)
			.finish_non_exhaustive()
	}
}

/// Builder for [`Document`].
pub struct DocumentBuilder<F: DocumentFormat> {
	location: Location,
	format: F,
	storage: Option<Arc<dyn Storage>>,
	options: DocumentOptions,
	resolver: Arc<dyn ErrorResolver>,
}

impl<F: DocumentFormat> DocumentBuilder<F> {
	pub fn new(location: impl Into<Location>, format: F) -> Self {
		Self {
			location: location.into(),
			format,
			storage: None,
			options: DocumentOptions::default(),
			resolver: Arc::new(DefaultResolver),
		}
	}

	/// Storage backend. Defaults to [`FsStorage`] configured from the options.
	#[must_use]
	pub fn storage(mut self, storage: impl Storage) -> Self {
		self.storage = Some(Arc::new(storage));
		self
	}

	#[must_use]
	pub fn options(mut self, options: DocumentOptions) -> Self {
		self.options = options;
		self
	}

	/// Application policy for routed errors. Defaults to [`DefaultResolver`].
	#[must_use]
	pub fn resolver(mut self, resolver: impl ErrorResolver) -> Self {
		self.resolver = Arc::new(resolver);
		self
	}

	/// Creates the document in the `CLOSED` state and starts its file-access queue.
	pub fn build(self) -> Result<Document<F>> {
		if self.location.is_empty() {
			return Err(DocumentError::EmptyLocation);
		}
		let state = Arc::new(StateMachine::new(DocumentState::CLOSED, self.options.event_buffer));
		let changes = Arc::new(ChangeTracker::with_events(state.sender()));
		let errors = ErrorHandler::new(self.resolver, Arc::clone(&state));
		let storage = self.storage.unwrap_or_else(|| Arc::new(FsStorage::from_options(&self.options)));
		let serializer = FileAccessSerializer::new(self.location.to_string());
		tracing::debug!(path = %self.location, "document.create");

		Ok(Document {
			inner: Arc::new(DocumentInner {
				format: self.format,
				storage,
				options: self.options,
				meta: RwLock::new(Metadata {
					location: self.location,
					display_name: None,
					content_type: None,
					modified: None,
				}),
				model: Mutex::new(None),
				state,
				changes,
				errors,
				editing_holds: AtomicUsize::new(0),
				serializer,
				change_feed: Mutex::new(None),
			}),
		})
	}
}

impl<F: DocumentFormat> Document<F> {
	/// Creates a document on the local file system with default options.
	pub fn new(location: impl Into<Location>, format: F) -> Result<Self> {
		DocumentBuilder::new(location, format).build()
	}

	pub fn builder(location: impl Into<Location>, format: F) -> DocumentBuilder<F> {
		DocumentBuilder::new(location, format)
	}

	pub fn location(&self) -> Location {
		self.inner.location()
	}

	pub fn format(&self) -> &F {
		&self.inner.format
	}

	pub fn options(&self) -> &DocumentOptions {
		&self.inner.options
	}

	/// Override if set, else derived from the location.
	pub fn display_name(&self) -> String {
		let meta = self.inner.meta.read();
		meta.display_name.clone().unwrap_or_else(|| meta.location.display_name())
	}

	pub fn set_display_name(&self, name: Option<String>) {
		self.inner.meta.write().display_name = name;
	}

	/// Override if set, else the format's type for the location.
	pub fn content_type(&self) -> String {
		self.inner.content_type()
	}

	pub fn set_content_type(&self, content_type: Option<String>) {
		self.inner.meta.write().content_type = content_type;
	}

	/// Content type the next save to the current location will use.
	pub fn saving_content_type(&self) -> String {
		self.inner.format.saving_content_type(&self.inner.content_type())
	}

	pub fn file_name_extension(&self, content_type: &str, kind: SaveOperationKind) -> String {
		self.inner.format.file_name_extension(content_type, kind)
	}

	/// Modification time observed by the last successful open, save or revert.
	pub fn modification_time(&self) -> Option<SystemTime> {
		self.inner.meta.read().modified
	}

	pub fn state(&self) -> DocumentState {
		self.inner.state.current()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
		self.inner.state.subscribe()
	}

	pub fn has_unsaved_changes(&self) -> bool {
		self.inner.has_unsaved_changes()
	}

	pub fn change_tracker(&self) -> &ChangeTracker {
		&self.inner.changes
	}

	pub fn mark_changed(&self, kind: ChangeKind) {
		self.inner.changes.mark_changed(kind);
	}

	/// Reads the model, or `None` before a successful open.
	pub fn with_model<R>(&self, f: impl FnOnce(&F::Model) -> R) -> Option<R> {
		self.inner.model.lock().as_ref().map(f)
	}

	/// Mutates the model and records one [`ChangeKind::Done`].
	pub fn edit<R>(&self, f: impl FnOnce(&mut F::Model) -> R) -> Result<R> {
		self.ensure_editable()?;
		let result = {
			let mut model = self.inner.model.lock();
			let model = model.as_mut().ok_or_else(|| DocumentError::NotLoaded {
				location: self.inner.location(),
			})?;
			f(model)
		};
		self.inner.changes.mark_changed(ChangeKind::Done);
		Ok(result)
	}

	/// Replaces the model wholesale, as for a new document about to be
	/// saved for creating.
	pub fn set_model(&self, model: F::Model) -> Result<()> {
		self.ensure_editable()?;
		*self.inner.model.lock() = Some(model);
		self.inner.changes.mark_changed(ChangeKind::Done);
		Ok(())
	}

	fn ensure_editable(&self) -> Result<()> {
		if self.inner.state.contains(DocumentState::EDITING_DISABLED) {
			return Err(DocumentError::EditingDisabled {
				location: self.inner.location(),
			});
		}
		Ok(())
	}

	/// Feeds every change `log` publishes into this document's tracker.
	///
	/// Replaces any previously observed log.
	pub fn observe_changes(&self, log: &impl ChangeLog) {
		let mut rx = log.subscribe();
		let token = CancellationToken::new();
		if let Some(previous) = self.inner.change_feed.lock().replace(token.clone()) {
			previous.cancel();
		}

		let changes = Arc::clone(&self.inner.changes);
		let location = self.inner.location();
		crate::spawn::spawn("document.change_feed", async move {
			loop {
				tokio::select! {
					_ = token.cancelled() => break,
					received = rx.recv() => match received {
						Ok(kind) => changes.mark_changed(kind),
						Err(RecvError::Lagged(skipped)) => {
							tracing::warn!(path = %location, skipped, "change feed lagged; assuming unsaved changes");
							changes.mark_changed(ChangeKind::Done);
						}
						Err(RecvError::Closed) => break,
					},
				}
			}
		});
	}

	/// Runs `op` on the file-access queue, after every turn already enqueued.
	pub fn perform_file_access<R, Op>(&self, op: Op) -> FileAccess<R>
	where
		Op: FnOnce(&dyn Storage, &Location) -> R + Send + 'static,
		R: Send + 'static,
	{
		let inner = Arc::clone(&self.inner);
		self.inner.serializer.run_exclusive(move || {
			let location = inner.location();
			op(inner.storage.as_ref(), &location)
		})
	}

	/// Other versions the storage knows for the current location.
	pub fn other_versions(&self) -> DocumentFuture<Result<Vec<VersionRef>>> {
		let access = self.perform_file_access(|storage, location| {
			storage.list_other_versions(location).map_err(|source| DocumentError::Read {
				location: location.clone(),
				source,
			})
		});
		Box::pin(async move { access.await? })
	}

	/// Marks the conflict with other versions as handled.
	pub fn resolve_conflict(&self) {
		self.inner.state.remove(DocumentState::IN_CONFLICT);
	}

	/// Routes an application-side error through this document's handler.
	pub fn handle_error(&self, error: DocumentError) -> ResolutionWaiter {
		self.inner.route(error)
	}

	/// Finishes a deferred error. Returns `false` if `id` is not outstanding.
	pub fn finish_error(&self, id: ErrorId, recovered: bool) -> bool {
		self.inner.errors.finish(id, recovered)
	}

	/// Error currently offered to the resolver.
	pub fn active_error(&self) -> Option<ErrorTicket> {
		self.inner.errors.active()
	}

	/// Number of routed errors not finished yet.
	pub fn outstanding_errors(&self) -> usize {
		self.inner.errors.outstanding()
	}

	/// Finishes every outstanding error without waiting for the application.
	pub fn force_interaction_end(&self) -> usize {
		self.inner.errors.force_interaction_end()
	}

	/// Enqueues `turn` and wraps its completion into a caller future.
	///
	/// A panicking turn is routed from the queue itself, so the error
	/// surfaces even when nobody awaits the returned future.
	fn enqueue(&self, turn: impl FnOnce(&DocumentInner<F>) -> Completion + Send + 'static) -> DocumentFuture<bool> {
		let inner = Arc::clone(&self.inner);
		let access = self.inner.serializer.run_exclusive(move || {
			match std::panic::catch_unwind(AssertUnwindSafe(|| turn(&inner))) {
				Ok(completion) => completion,
				Err(_) => {
					tracing::error!(path = %inner.location(), "document turn panicked");
					Completion::Failed(inner.interrupted(SerializerError::Interrupted))
				}
			}
		});
		settle(Arc::clone(&self.inner), access)
	}
}

fn settle<F: DocumentFormat>(inner: Arc<DocumentInner<F>>, access: FileAccess<Completion>) -> DocumentFuture<bool> {
	Box::pin(async move {
		match access.await {
			Ok(Completion::Succeeded) => true,
			Ok(Completion::Failed(waiter)) => {
				waiter.finished().await;
				false
			}
			// The queue shut down before the turn ran.
			Err(error) => {
				let waiter = inner.interrupted(error);
				drop(inner);
				waiter.finished().await;
				false
			}
		}
	})
}
