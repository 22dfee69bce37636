use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime};

use xeno_document::{Document, DocumentError, DocumentEvent, DocumentState, SaveOperationKind, VersionRef};

use crate::common::{DeferringResolver, FaultyStorage, TextFormat, options, text_document, wait_until};

fn interactive_document(dir: &tempfile::TempDir, resolver: DeferringResolver) -> (Document<TextFormat>, FaultyStorage) {
	crate::common::init_tracing();
	let path = dir.path().join("shared.txt");
	std::fs::write(&path, "on disk").expect("must seed document");
	let storage = FaultyStorage::new();
	let doc = Document::builder(path, TextFormat::default())
		.storage(storage.clone())
		.options(options().interaction_permitted(true))
		.resolver(resolver)
		.build()
		.expect("must build document");
	(doc, storage)
}

#[tokio::test]
async fn deferred_error_holds_caller_until_finished() {
	let dir = tempfile::tempdir().expect("must create tempdir");
	let resolver = DeferringResolver::default();
	let (doc, storage) = interactive_document(&dir, resolver.clone());
	assert!(doc.open().await);
	doc.edit(|m| m.push_str(" + local")).unwrap();

	storage.faults.fail_writes.store(true, Ordering::SeqCst);
	let save = tokio::spawn(doc.save(doc.location(), SaveOperationKind::ForOverwriting));

	assert!(wait_until(Duration::from_secs(2), || doc.outstanding_errors() == 1).await);
	assert!(!save.is_finished());
	assert!(doc.state().contains(DocumentState::SAVING_ERROR));

	let ticket = doc.active_error().expect("write error is active");
	assert!(matches!(ticket.error(), DocumentError::Write { .. }));
	assert_eq!(resolver.offered.lock().len(), 1);

	assert!(doc.finish_error(ticket.id(), true));
	assert!(!save.await.unwrap(), "a recovered save still reports failure");
	assert!(!doc.state().contains(DocumentState::SAVING_ERROR));
	assert_eq!(doc.outstanding_errors(), 0);
}

#[tokio::test]
async fn force_interaction_end_releases_every_caller() {
	let dir = tempfile::tempdir().expect("must create tempdir");
	let (doc, storage) = interactive_document(&dir, DeferringResolver::default());
	assert!(doc.open().await);
	doc.edit(|m| m.push('!')).unwrap();

	storage.faults.fail_writes.store(true, Ordering::SeqCst);
	let first = tokio::spawn(doc.save(doc.location(), SaveOperationKind::ForOverwriting));
	let second = tokio::spawn(doc.save(doc.location(), SaveOperationKind::ForOverwriting));

	assert!(wait_until(Duration::from_secs(2), || doc.outstanding_errors() == 2).await);
	assert_eq!(doc.force_interaction_end(), 2);

	assert!(!first.await.unwrap());
	assert!(!second.await.unwrap());
	assert_eq!(doc.outstanding_errors(), 0);
	assert!(doc.state().contains(DocumentState::SAVING_ERROR));
}

#[tokio::test]
async fn error_events_pair_up() {
	let dir = tempfile::tempdir().expect("must create tempdir");
	let (doc, storage) = text_document(&dir, "note.txt", Some("x"));
	assert!(doc.open().await);
	let mut events = doc.subscribe();

	storage.faults.fail_reads.store(true, Ordering::SeqCst);
	assert!(!doc.open().await);

	let mut pending = None;
	let mut finished = None;
	while let Ok(event) = events.try_recv() {
		match event {
			DocumentEvent::ErrorPending { id } => pending = Some(id),
			DocumentEvent::ErrorFinished { id, recovered } => finished = Some((id, recovered)),
			_ => {}
		}
	}
	let id = pending.expect("error announced");
	assert_eq!(finished, Some((id, false)));
}

#[tokio::test]
async fn external_modification_is_reported_not_blocking() {
	let dir = tempfile::tempdir().expect("must create tempdir");
	let (doc, _storage) = text_document(&dir, "note.txt", Some("base"));
	assert!(doc.open().await);
	let known = doc.modification_time().expect("open records mtime");

	let path = doc.location().path().to_path_buf();
	std::fs::write(&path, "theirs").unwrap();
	let file = std::fs::File::options().write(true).open(&path).unwrap();
	file.set_modified(known + Duration::from_secs(30)).unwrap();
	drop(file);

	doc.edit(|m| *m = "ours".to_string()).unwrap();
	assert!(doc.save(doc.location(), SaveOperationKind::ForOverwriting).await);

	assert!(doc.state().contains(DocumentState::IN_CONFLICT));
	assert!(!doc.state().contains(DocumentState::SAVING_ERROR));
	assert_eq!(std::fs::read_to_string(&path).unwrap(), "ours");

	doc.resolve_conflict();
	assert!(!doc.state().contains(DocumentState::IN_CONFLICT));
}

#[tokio::test]
async fn conflict_detection_can_be_disabled() {
	let dir = tempfile::tempdir().expect("must create tempdir");
	let path = dir.path().join("note.txt");
	std::fs::write(&path, "base").unwrap();
	let doc = Document::builder(&path, TextFormat::default())
		.storage(FaultyStorage::new())
		.options(options().detect_conflicts(false))
		.build()
		.unwrap();
	assert!(doc.open().await);
	let known = doc.modification_time().unwrap();

	let file = std::fs::File::options().write(true).open(&path).unwrap();
	file.set_modified(known + Duration::from_secs(30)).unwrap();
	drop(file);

	doc.edit(|m| m.push('!')).unwrap();
	assert!(doc.save(&path, SaveOperationKind::ForOverwriting).await);
	assert!(!doc.state().contains(DocumentState::IN_CONFLICT));
}

#[tokio::test]
async fn other_versions_raise_in_conflict_on_open() {
	let dir = tempfile::tempdir().expect("must create tempdir");
	let (doc, storage) = text_document(&dir, "note.txt", Some("mine"));
	let version = VersionRef {
		location: dir.path().join("note (laptop).txt").into(),
		modified: Some(SystemTime::now()),
		label: "laptop".to_string(),
	};
	storage.faults.other_versions.lock().push(version.clone());

	assert!(doc.open().await);
	assert!(doc.state().contains(DocumentState::IN_CONFLICT));
	assert_eq!(doc.other_versions().await.unwrap(), vec![version]);

	storage.faults.other_versions.lock().clear();
	assert!(doc.revert(doc.location()).await);
	assert!(!doc.state().contains(DocumentState::IN_CONFLICT));
}

#[tokio::test]
async fn undecodable_content_fails_open_closed() {
	let dir = tempfile::tempdir().expect("must create tempdir");
	let (doc, _storage) = interactive_document(&dir, DeferringResolver::default());
	std::fs::write(doc.location().path(), [0xff, 0xfe, 0xfd]).unwrap();

	let open = tokio::spawn(doc.open());
	assert!(wait_until(Duration::from_secs(2), || doc.outstanding_errors() == 1).await);
	let ticket = doc.active_error().expect("decode error is active");
	assert!(matches!(ticket.error(), DocumentError::Decode { .. }));
	assert!(doc.finish_error(ticket.id(), false));

	assert!(!open.await.unwrap());
	assert!(doc.state().contains(DocumentState::CLOSED));
	assert!(!doc.state().contains(DocumentState::PROGRESS_AVAILABLE));
	assert_eq!(doc.with_model(|m| m.clone()), None);
}

#[tokio::test]
async fn undecodable_content_fails_revert_and_reenables_editing() {
	let dir = tempfile::tempdir().expect("must create tempdir");
	let (doc, _storage) = interactive_document(&dir, DeferringResolver::default());
	assert!(doc.open().await);
	std::fs::write(doc.location().path(), [0xc3, 0x28]).unwrap();

	let revert = tokio::spawn(doc.revert(doc.location()));
	assert!(wait_until(Duration::from_secs(2), || doc.outstanding_errors() == 1).await);
	let ticket = doc.active_error().expect("decode error is active");
	assert!(matches!(ticket.error(), DocumentError::Decode { .. }));
	assert!(doc.finish_error(ticket.id(), false));

	assert!(!revert.await.unwrap());
	assert!(!doc.state().contains(DocumentState::EDITING_DISABLED));
	assert!(doc.state().contains(DocumentState::CLOSED));
	assert_eq!(doc.with_model(|m| m.clone()), None);
}
