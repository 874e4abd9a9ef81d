/// One-way round tests: remote-authoritative pull and local-authoritative
/// push, including the passphrase gate on pull, the local-newer skip
/// annotation, pull's deliberate restore of locally-deleted boards, and
/// push tombstoning remote boards absent locally.
use std::sync::Arc;

use gistsync::config::load_config;
use gistsync::crypto::Envelope;
use gistsync::gateway::memory::MemoryGistApi;
use gistsync::manifest::SyncManifest;
use gistsync::reconciler::Reconciler;
use gistsync::shard::{ShardRouter, ShardSyncer};
use gistsync::store::blobs::MemoryBlobCache;
use gistsync::store::memory::MemoryStore;
use gistsync::store::{BoardStore, KvStore};
use gistsync::types::{Board, SkipReason, SyncOutcome};
use gistsync::util::now_ms;
use serde_json::{json, Value};

struct Device {
	store: Arc<MemoryStore>,
	reconciler: Reconciler,
}

fn device(api: &Arc<MemoryGistApi>, name: &str) -> Device {
	let store = Arc::new(MemoryStore::new());
	let kv: Arc<dyn KvStore> = store.clone();
	let crypto = Arc::new(Envelope::new());
	let blobs = Arc::new(MemoryBlobCache::new());
	let router = Arc::new(ShardRouter::new(api.clone(), crypto.clone(), kv.clone()));
	let media = Arc::new(ShardSyncer::new(
		api.clone(),
		router,
		crypto.clone(),
		blobs.clone(),
		name.to_string(),
	));
	let reconciler = Reconciler::new(
		api.clone(),
		crypto,
		kv,
		store.clone(),
		store.clone(),
		blobs,
		media,
		"0.2.0-test",
	);
	Device { store, reconciler }
}

fn board(id: &str, updated_at: u64, elements: Vec<Value>) -> Board {
	Board {
		id: id.to_string(),
		name: format!("board {}", id),
		folder_id: None,
		order: 0,
		viewport: Value::Null,
		theme: String::new(),
		created_at: 1,
		updated_at,
		elements,
	}
}

#[tokio::test]
async fn pull_requires_passphrase_and_mutates_nothing() {
	let api = Arc::new(MemoryGistApi::new());

	// Device B publishes under a custom passphrase.
	let b = device(&api, "dev-b");
	b.reconciler.passwords().set("hunter2").await.unwrap();
	b.store.put_board(board("x", now_ms(), vec![json!({"id": "e1"})])).await;
	assert!(b.reconciler.sync().await.is_success());
	let gist_id = load_config(&*b.store).await.unwrap().gist_id.unwrap();

	// Device A has no passphrase.
	let a = device(&api, "dev-a");
	a.reconciler.switch_to_gist(&gist_id).await.unwrap();
	let outcome = a.reconciler.pull_from_remote().await;
	assert!(outcome.needs_password(), "got {:?}", outcome);
	assert!(a.store.board_ids().await.is_empty());

	// With the passphrase the same pull succeeds.
	a.reconciler.passwords().set("hunter2").await.unwrap();
	let outcome = a.reconciler.pull_from_remote().await;
	let report = outcome.report().expect("success");
	assert_eq!(report.downloaded.boards, 1);
	assert!(a.store.load_board("x").await.unwrap().is_some());
}

#[tokio::test]
async fn pull_keeps_newer_local_board_with_annotation() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", now_ms(), vec![json!({"id": "e1"})])).await;
	assert!(a.reconciler.sync().await.is_success());

	// Local edit after the upload, not yet pushed.
	let mut edited = a.store.load_board("x").await.unwrap().unwrap();
	edited.elements.push(json!({"id": "local-only"}));
	edited.updated_at = now_ms() + 50;
	a.store.put_board(edited).await;

	let report = match a.reconciler.pull_from_remote().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.downloaded.boards, 0);
	assert_eq!(report.skipped_items.len(), 1);
	assert_eq!(report.skipped_items[0].reason, SkipReason::LocalNewer);

	let kept = a.store.load_board("x").await.unwrap().unwrap();
	assert_eq!(kept.elements.len(), 2);
}

#[tokio::test]
async fn pull_restores_locally_deleted_board_and_clears_pending() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", now_ms(), vec![json!({"id": "e1"})])).await;
	assert!(a.reconciler.sync().await.is_success());

	a.reconciler.delete_board_locally("x").await.unwrap();
	assert!(a.store.load_board("x").await.unwrap().is_none());
	assert!(!a.reconciler.pending().load().await.unwrap().is_empty());

	// Pull is remote-authoritative: the board comes back and the pending
	// record is cleared (the user explicitly asked for remote state).
	let report = match a.reconciler.pull_from_remote().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.downloaded.boards, 1);
	assert!(a.store.load_board("x").await.unwrap().is_some());
	assert!(a.reconciler.pending().load().await.unwrap().is_empty());
}

#[tokio::test]
async fn push_uploads_dirty_boards_and_tombstones_missing_ones() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", now_ms(), vec![json!({"id": "e1"})])).await;
	a.store.put_board(board("y", now_ms(), vec![json!({"id": "e2"})])).await;
	assert!(a.reconciler.sync().await.is_success());
	let gist_id = load_config(&*a.store).await.unwrap().gist_id.unwrap();

	// One board edited, one removed locally (bypassing the engine, as a
	// host-side wipe would).
	let mut edited = a.store.load_board("x").await.unwrap().unwrap();
	edited.elements.push(json!({"id": "e3"}));
	edited.updated_at = now_ms() + 10;
	a.store.put_board(edited).await;
	a.store.delete_board("y").await.unwrap();

	api.reset_stats().await;
	let report = match a.reconciler.push_to_remote().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.uploaded.boards, 1);
	assert_eq!(report.deleted.boards, 1);

	// Only the dirty board file moved.
	let stats = api.stats().await;
	assert!(stats.files_written.contains(&"board_x.json".to_string()));
	assert!(!stats.files_written.contains(&"board_y.json".to_string()));

	let content = api.file_content(&gist_id, "manifest.json").await.unwrap();
	let envelope = Envelope::new();
	let plain = envelope.decrypt(&content, &gist_id, None).await.unwrap();
	let manifest = SyncManifest::parse(&plain).unwrap();
	assert!(manifest.boards["y"].is_tombstone());
	assert!(!manifest.boards["x"].is_tombstone());
}

#[tokio::test]
async fn push_then_pull_is_a_no_op() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", now_ms(), vec![json!({"id": "e1"})])).await;
	assert!(a.reconciler.push_to_remote().await.is_success());

	let report = match a.reconciler.pull_from_remote().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.downloaded.boards, 0);
	assert!(report.skipped_items.is_empty());
}

// vim: ts=4
