#![cfg_attr(test, allow(unused_crate_dependencies))]
//! File-backed document lifecycle engine.
//!
//! A [`Document`] owns one user-editable model backed by a location on disk.
//! Every read and write for that document goes through a per-document
//! [`FileAccessSerializer`], so file operations never overlap, and every
//! failure funnels through one error channel with a resumable
//! handle/finish protocol.
//!
//! # Main Types
//!
//! - [`Document`] - aggregate root: location, state bitmask, model, change tracking
//! - [`DocumentFormat`] - per-type encode/decode capability with default hooks
//! - [`Storage`] / [`FsStorage`] - coordinated reads and atomic write-and-replace
//! - [`ChangeTracker`] - signed change counter and per-save [`ChangeToken`]s
//! - [`ErrorResolver`] - application policy for routed errors
//!
//! # Architecture
//!
//! ```text
//! caller ──open/save/revert/close──► Document
//!                                      │ enqueue (synchronous, FIFO)
//!                                      ▼
//!                            FileAccessSerializer ──► spawn_blocking turn
//!                                      │                 │ Storage + DocumentFormat
//!                                      │                 ▼
//!                                      │           StateMachine / ChangeTracker
//!                                      │                 │ on failure
//!                                      │                 ▼
//!                                      │            ErrorHandler ──► ErrorResolver
//!                                      ▼
//!                          oneshot result ──► caller's future resolves
//! ```

pub mod change;
pub mod content;
mod document;
pub mod error;
pub mod format;
pub mod options;
pub mod recovery;
pub mod serializer;
mod spawn;
pub mod state;
pub mod storage;

pub use change::{ChangeFeed, ChangeKind, ChangeLog, ChangeToken, ChangeTracker, SaveOperationKind};
pub use content::{Content, Location, Package, PackageNode};
pub use document::{Document, DocumentBuilder, DocumentFuture};
pub use error::{DocumentError, Result};
pub use format::{DocumentFormat, FileAttributes, FormatError};
pub use options::{DocumentOptions, OptionsError};
pub use recovery::{DefaultResolver, ErrorId, ErrorPhase, ErrorResolver, ErrorTicket, Resolution, ResolutionWaiter};
pub use serializer::{FileAccess, FileAccessSerializer, SerializerError};
pub use state::{DocumentEvent, DocumentState};
pub use storage::{FsStorage, ReadOutcome, Storage, StorageError, VersionRef};
