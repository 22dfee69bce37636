//! Per-document file-access queue.
//!
//! Each document owns one [`FileAccessSerializer`]: an unbounded FIFO drained
//! by a single forwarding task that runs every operation as a blocking turn
//! and waits for it before starting the next. Operations are enqueued
//! synchronously by [`FileAccessSerializer::run_exclusive`], so submission
//! order is call order even if the returned futures are polled later.
//!
//! There is no cancellation. Dropping a [`FileAccess`] only discards the
//! result; the turn still runs to completion.


use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

type Turn = Box<dyn FnOnce() + Send + 'static>;

/// Error delivered when a turn never reported a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SerializerError {
	/// The turn panicked or the queue shut down before running it.
	#[error("file access turn was interrupted")]
	Interrupted,
}

/// Serializes file-system work for one document.
pub struct FileAccessSerializer {
	name: Arc<str>,
	tx: mpsc::UnboundedSender<Turn>,
	pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for FileAccessSerializer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FileAccessSerializer")
			.field("name", &self.name)
			.field("pending", &self.pending())
			.finish()
	}
}

impl FileAccessSerializer {
	/// Creates a queue and starts its forwarding task.
	///
	/// Turns run on the blocking pool of the runtime hosting that task. The
	/// task ends once the serializer is dropped and the queue drained.
	pub fn new(name: impl Into<String>) -> Self {
		let name: Arc<str> = Arc::from(name.into());
		let (tx, mut rx) = mpsc::unbounded_channel::<Turn>();
		let pending = Arc::new(AtomicUsize::new(0));

		let task_name = Arc::clone(&name);
		let task_pending = Arc::clone(&pending);
		crate::spawn::spawn("document.serializer", async move {
			while let Some(turn) = rx.recv().await {
				if let Err(error) = tokio::task::spawn_blocking(turn).await {
					tracing::error!(document = %task_name, %error, "file access turn failed");
				}
				task_pending.fetch_sub(1, Ordering::AcqRel);
			}
			tracing::trace!(document = %task_name, "document.serializer.drained");
		});

		Self { name, tx, pending }
	}

	/// Name used in log fields.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Number of turns enqueued or running.
	pub fn pending(&self) -> usize {
		self.pending.load(Ordering::Acquire)
	}

	/// Enqueues `operation` behind every previously submitted turn.
	///
	/// The returned future resolves on whichever task awaits it.
	pub fn run_exclusive<F, R>(&self, operation: F) -> FileAccess<R>
	where
		F: FnOnce() -> R + Send + 'static,
		R: Send + 'static,
	{
		let (result_tx, result_rx) = oneshot::channel();
		let turn: Turn = Box::new(move || {
			let _ = result_tx.send(operation());
		});

		self.pending.fetch_add(1, Ordering::AcqRel);
		if self.tx.send(turn).is_err() {
			self.pending.fetch_sub(1, Ordering::AcqRel);
			tracing::warn!(document = %self.name, "file access queue closed");
		} else {
			tracing::trace!(document = %self.name, pending = self.pending(), "document.serializer.enqueue");
		}
		FileAccess { rx: result_rx }
	}
}

/// Result of one serialized turn.
#[must_use = "dropping a FileAccess discards the turn's result"]
pub struct FileAccess<R> {
	rx: oneshot::Receiver<R>,
}

impl<R> Future for FileAccess<R> {
	type Output = Result<R, SerializerError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx).poll(cx).map(|result| result.map_err(|_| SerializerError::Interrupted))
	}
}
