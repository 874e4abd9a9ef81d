/// Two-way sync round tests over the in-process Gist API.
///
/// Covers bootstrap (fresh Gist creation from local data), multi-device
/// convergence, direction assignment from timestamps, element-level
/// conflict merge, idempotence of back-to-back rounds, the safety gate on
/// an apparently corrupt remote, and re-bootstrap after the configured
/// Gist disappears.
use std::sync::Arc;

use gistsync::config::load_config;
use gistsync::crypto::Envelope;
use gistsync::gateway::memory::MemoryGistApi;
use gistsync::gateway::GistApi;
use gistsync::manifest::{board_filename, SyncManifest};
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

async fn remote_manifest(api: &MemoryGistApi, gist_id: &str) -> SyncManifest {
	let content = api.file_content(gist_id, "manifest.json").await.unwrap();
	let envelope = Envelope::new();
	let plain = envelope.decrypt(&content, gist_id, None).await.unwrap();
	SyncManifest::parse(&plain).unwrap()
}

#[tokio::test]
async fn bootstrap_creates_gist_and_uploads_boards() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", now_ms(), vec![json!({"id": "e1"})])).await;
	a.store.put_board(board("y", now_ms(), vec![json!({"id": "e2"})])).await;

	let outcome = a.reconciler.sync().await;
	let report = match outcome {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.uploaded.boards, 2);
	assert_eq!(report.downloaded.boards, 0);

	let config = load_config(&*a.store).await.unwrap();
	let gist_id = config.gist_id.expect("gist recorded");
	assert!(config.last_sync_time.is_some());

	let names = api.file_names(&gist_id).await;
	assert!(names.contains(&"manifest.json".to_string()));
	assert!(names.contains(&"workspace.json".to_string()));
	assert!(names.contains(&"master-index.json".to_string()));

	// Every live manifest entry has its retained board file.
	let manifest = remote_manifest(&api, &gist_id).await;
	assert_eq!(manifest.live_board_count(), 2);
	for (id, _) in manifest.live_boards() {
		assert!(names.contains(&board_filename(id)));
	}
}

#[tokio::test]
async fn second_device_converges_and_remote_edits_flow_down() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", now_ms(), vec![json!({"id": "e1"})])).await;
	assert!(a.reconciler.sync().await.is_success());

	// Device B discovers the Gist and pulls the board down.
	let b = device(&api, "dev-b");
	let outcome = b.reconciler.sync().await;
	let report = outcome.report().expect("success");
	assert_eq!(report.downloaded.boards, 1);
	assert!(b.store.load_board("x").await.unwrap().is_some());

	// B edits the board; A's next round downloads it.
	let mut edited = b.store.load_board("x").await.unwrap().unwrap();
	edited.elements.push(json!({"id": "e2"}));
	edited.updated_at = now_ms() + 10;
	b.store.put_board(edited).await;
	assert!(b.reconciler.sync().await.is_success());

	let report = match a.reconciler.sync().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.downloaded.boards, 1);
	assert_eq!(report.uploaded.boards, 0);
	assert!(report.conflicts.is_empty());

	let synced = a.store.load_board("x").await.unwrap().unwrap();
	assert_eq!(synced.elements.len(), 2);
}

#[tokio::test]
async fn concurrent_edits_merge_at_element_level() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", now_ms(), vec![json!({"id": "base"})])).await;
	assert!(a.reconciler.sync().await.is_success());
	let b = device(&api, "dev-b");
	assert!(b.reconciler.sync().await.is_success());

	// Divergent edits on both devices after the common sync point.
	let mut on_a = a.store.load_board("x").await.unwrap().unwrap();
	on_a.elements.push(json!({"id": "from-a"}));
	on_a.updated_at = now_ms() + 10;
	a.store.put_board(on_a).await;

	let mut on_b = b.store.load_board("x").await.unwrap().unwrap();
	on_b.elements.push(json!({"id": "from-b"}));
	on_b.updated_at = now_ms() + 20;
	b.store.put_board(on_b).await;

	assert!(b.reconciler.sync().await.is_success());
	let report = match a.reconciler.sync().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.conflicts.len(), 1);
	assert!(report.conflicts[0].merged);

	let merged = a.store.load_board("x").await.unwrap().unwrap();
	let ids: Vec<&str> = merged.elements.iter().filter_map(|e| e["id"].as_str()).collect();
	assert!(ids.contains(&"base"));
	assert!(ids.contains(&"from-a"));
	assert!(ids.contains(&"from-b"));

	// After B syncs again, both devices hold the merged board.
	assert!(b.reconciler.sync().await.is_success());
	let on_b = b.store.load_board("x").await.unwrap().unwrap();
	assert_eq!(on_b.elements.len(), merged.elements.len());
}

#[tokio::test]
async fn repeat_sync_transfers_no_board_files() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", now_ms(), vec![json!({"id": "e1"})])).await;
	assert!(a.reconciler.sync().await.is_success());

	api.reset_stats().await;
	let report = match a.reconciler.sync().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.uploaded.boards, 0);
	assert_eq!(report.downloaded.boards, 0);

	let stats = api.stats().await;
	assert!(
		stats.files_written.iter().all(|f| !f.starts_with("board_")),
		"board files retransferred: {:?}",
		stats.files_written
	);
}

#[tokio::test]
async fn empty_remote_manifest_withholds_everything() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	// First sync with no data creates an empty manifest and records a
	// last-sync time.
	assert!(a.reconciler.sync().await.is_success());

	// Ten boards appear locally while remote claims zero.
	for i in 0..10 {
		a.store.put_board(board(&format!("b{}", i), now_ms(), vec![json!({"id": "e"})])).await;
	}
	let report = match a.reconciler.sync().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.deleted.boards, 0);
	assert_eq!(report.skipped_items.len(), 10);
	assert!(report.skipped_items.iter().all(|s| s.reason == SkipReason::NewDevice));
	assert!(!report.safety_warnings.is_empty());
}

#[tokio::test]
async fn vanished_gist_triggers_rebootstrap() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", now_ms(), vec![json!({"id": "e1"})])).await;
	assert!(a.reconciler.sync().await.is_success());
	let old_gist = load_config(&*a.store).await.unwrap().gist_id.unwrap();

	// The Gist disappears behind the engine's back.
	api.delete_gist(&old_gist).await.unwrap();

	let outcome = a.reconciler.sync().await;
	assert!(outcome.is_success(), "got {:?}", outcome);
	let new_gist = load_config(&*a.store).await.unwrap().gist_id.unwrap();
	assert_ne!(new_gist, old_gist);
	assert!(api.file_names(&new_gist).await.contains(&"manifest.json".to_string()));
}

#[tokio::test]
async fn sync_lock_releases_between_rounds() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	assert!(a.reconciler.sync().await.is_success());
	assert!(a.reconciler.sync().await.is_success());
}

#[tokio::test]
async fn locally_deleted_board_becomes_remote_tombstone() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", now_ms(), vec![json!({"id": "e1"})])).await;
	a.store.put_board(board("y", now_ms(), vec![json!({"id": "e2"})])).await;
	assert!(a.reconciler.sync().await.is_success());
	let gist_id = load_config(&*a.store).await.unwrap().gist_id.unwrap();

	a.reconciler.delete_board_locally("y").await.unwrap();
	let report = match a.reconciler.sync().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	// The pending deletion suppressed the re-download and produced a
	// tombstone on remote.
	assert!(report.skipped_items.iter().any(|s| s.reason == SkipReason::PendingDeletion));
	let manifest = remote_manifest(&api, &gist_id).await;
	assert!(manifest.boards["y"].is_tombstone());
	// The retained board file stays for the recovery window.
	assert!(api.file_names(&gist_id).await.contains(&board_filename("y")));
	// Tombstone written: the pending record is cleared.
	assert!(a.reconciler.pending().load().await.unwrap().is_empty());

	// The other device applies the deletion.
	let b = device(&api, "dev-b");
	assert!(b.reconciler.sync().await.is_success());
	assert!(b.reconciler.sync().await.is_success());
	assert!(b.store.load_board("y").await.unwrap().is_none());
	assert!(b.store.load_board("x").await.unwrap().is_some());
}

// vim: ts=4
