//! Where document background work runs.
//!
//! A document keeps one forwarding task for its file-access queue and, once
//! it observes a change log, one more feeding that log into its tracker. Both
//! land on the runtime the document was built in. Documents built from plain
//! threads get a small runtime owned by this crate instead, started on first
//! use and kept for the life of the process.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

/// Turns run on the blocking pool, so workers only forward queue entries.
const SHARED_WORKERS: usize = 1;
const SHARED_THREAD_NAME: &str = "document-queue";

fn shared_runtime() -> &'static Runtime {
	static SHARED: OnceLock<Runtime> = OnceLock::new();
	SHARED.get_or_init(|| {
		tracing::debug!(workers = SHARED_WORKERS, "document.runtime.start");
		Builder::new_multi_thread()
			.enable_all()
			.worker_threads(SHARED_WORKERS)
			.thread_name(SHARED_THREAD_NAME)
			.build()
			.expect("document runtime must start")
	})
}

/// Starts a long-lived task for a document (queue forwarding, change feeds).
pub(crate) fn spawn<F>(name: &str, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	match Handle::try_current() {
		Ok(handle) => {
			tracing::trace!(task = name, "document.spawn");
			handle.spawn(fut)
		}
		Err(_) => {
			tracing::trace!(task = name, "document.spawn.shared");
			shared_runtime().spawn(fut)
		}
	}
}
