/// Paged task/workflow sync tests: page layout on first upload, steady
/// state with zero retransfer, version-bumped terminal items moving one
/// page only, cross-device download, and legacy single-file migration.
use std::collections::BTreeMap;
use std::sync::Arc;

use gistsync::crypto::Envelope;
use gistsync::gateway::memory::MemoryGistApi;
use gistsync::gateway::GistApi;
use gistsync::reconciler::Reconciler;
use gistsync::shard::{ShardRouter, ShardSyncer};
use gistsync::store::blobs::MemoryBlobCache;
use gistsync::store::memory::MemoryStore;
use gistsync::store::{KvStore, PagedCollection, TaskQueueStore};
use gistsync::types::{RemoteTaskFormat, SyncOutcome, TaskRecord, TaskStatus};
use gistsync::util::now_ms;
use serde_json::Map;

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

fn task(id: &str, created_at: u64) -> TaskRecord {
	TaskRecord {
		id: id.to_string(),
		record_type: "generation".to_string(),
		status: TaskStatus::Completed,
		created_at,
		updated_at: created_at,
		sync_version: 1,
		prompt: Some(format!("prompt for {}", id)),
		thumbnail_url: None,
		rest: Map::new(),
	}
}

async fn seed_sync_gist(api: &Arc<MemoryGistApi>) -> String {
	let mut files = BTreeMap::new();
	files.insert("master-index.json".to_string(), "{\"version\":1}".to_string());
	api.create_gist("sync", files).await.unwrap().id
}

#[tokio::test]
async fn six_hundred_tasks_make_two_pages_and_then_stay_quiet() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	let gist_id = seed_sync_gist(&api).await;
	a.reconciler.switch_to_gist(&gist_id).await.unwrap();

	let base = now_ms();
	for i in 0..600 {
		a.store.put_item(PagedCollection::Tasks, task(&format!("t{:04}", i), base + i)).await;
	}

	let report = match a.reconciler.sync_paged().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.uploaded.tasks, 600);

	let names = api.file_names(&gist_id).await;
	assert!(names.contains(&"task-index.json".to_string()));
	assert!(names.contains(&"tasks_p1.json".to_string()));
	assert!(names.contains(&"tasks_p2.json".to_string()));
	assert!(!names.contains(&"tasks_p3.json".to_string()));

	// Steady state: a second pass issues no PATCH at all.
	api.reset_stats().await;
	let report = match a.reconciler.sync_paged().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.uploaded.tasks, 0);
	assert_eq!(report.downloaded.tasks, 0);
	assert_eq!(api.stats().await.patches, 0);
}

#[tokio::test]
async fn version_bump_moves_exactly_one_page() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	let gist_id = seed_sync_gist(&api).await;
	a.reconciler.switch_to_gist(&gist_id).await.unwrap();

	let base = now_ms();
	for i in 0..600 {
		a.store.put_item(PagedCollection::Tasks, task(&format!("t{:04}", i), base + i)).await;
	}
	assert!(a.reconciler.sync_paged().await.is_success());

	// Re-process one early task (page 1): bump version and timestamp.
	let mut bumped = task("t0003", base + 3);
	bumped.sync_version = 2;
	bumped.updated_at = now_ms() + 100;
	a.store.put_item(PagedCollection::Tasks, bumped).await;

	api.reset_stats().await;
	let report = match a.reconciler.sync_paged().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.uploaded.tasks, 1);

	let stats = api.stats().await;
	assert!(stats.files_written.contains(&"task-index.json".to_string()));
	assert!(stats.files_written.contains(&"tasks_p1.json".to_string()));
	assert!(
		!stats.files_written.contains(&"tasks_p2.json".to_string()),
		"untouched page retransferred"
	);
}

#[tokio::test]
async fn second_device_downloads_all_pages_then_increments() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	let gist_id = seed_sync_gist(&api).await;
	a.reconciler.switch_to_gist(&gist_id).await.unwrap();

	let base = now_ms();
	for i in 0..600 {
		a.store.put_item(PagedCollection::Tasks, task(&format!("t{:04}", i), base + i)).await;
	}
	assert!(a.reconciler.sync_paged().await.is_success());

	let b = device(&api, "dev-b");
	b.reconciler.switch_to_gist(&gist_id).await.unwrap();
	let report = match b.reconciler.sync_paged().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.downloaded.tasks, 600);
	assert_eq!(b.store.get_all(PagedCollection::Tasks).await.unwrap().len(), 600);

	// B re-processes one task; A picks up only that change.
	let mut bumped = task("t0500", base + 500);
	bumped.sync_version = 2;
	bumped.updated_at = now_ms() + 100;
	bumped.prompt = Some("reprocessed".to_string());
	b.store.put_item(PagedCollection::Tasks, bumped).await;
	assert!(b.reconciler.sync_paged().await.is_success());

	let report = match a.reconciler.sync_paged().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.downloaded.tasks, 1);
	let on_a = a.store.get_all(PagedCollection::Tasks).await.unwrap();
	let changed = on_a.iter().find(|t| t.id == "t0500").unwrap();
	assert_eq!(changed.sync_version, 2);
	assert_eq!(changed.prompt.as_deref(), Some("reprocessed"));
}

#[tokio::test]
async fn workflows_sync_through_their_own_namespace() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	let gist_id = seed_sync_gist(&api).await;
	a.reconciler.switch_to_gist(&gist_id).await.unwrap();

	a.store.put_item(PagedCollection::Workflows, task("w1", now_ms())).await;
	let report = match a.reconciler.sync_paged().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	assert_eq!(report.uploaded.workflows, 1);
	assert_eq!(report.uploaded.tasks, 0);

	let names = api.file_names(&gist_id).await;
	assert!(names.contains(&"workflow-index.json".to_string()));
	assert!(names.contains(&"workflows_p1.json".to_string()));
}

#[tokio::test]
async fn legacy_tasks_file_is_detected_and_migrated() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");

	let legacy = serde_json::json!({
		"completedTasks": [
			{"id": "old1", "status": "completed", "createdAt": 100, "updatedAt": 100, "syncVersion": 1},
			{"id": "old2", "status": "failed", "createdAt": 200, "updatedAt": 200, "syncVersion": 1},
		],
		"updatedAt": 300,
	})
	.to_string();
	let mut files = BTreeMap::new();
	files.insert("master-index.json".to_string(), "{\"version\":1}".to_string());
	files.insert("tasks.json".to_string(), legacy);
	let gist_id = api.create_gist("sync", files).await.unwrap().id;
	a.reconciler.switch_to_gist(&gist_id).await.unwrap();

	assert_eq!(a.reconciler.detect_remote_task_format().await.unwrap(), RemoteTaskFormat::Legacy);

	let report = match a.reconciler.sync_paged().await {
		SyncOutcome::Success(report) => report,
		other => panic!("expected success, got {:?}", other),
	};
	// Both legacy items landed locally and were re-uploaded paged.
	assert_eq!(a.store.get_all(PagedCollection::Tasks).await.unwrap().len(), 2);
	assert!(report.downloaded.tasks >= 2);
	assert!(api.file_names(&gist_id).await.contains(&"task-index.json".to_string()));
	assert_eq!(a.reconciler.detect_remote_task_format().await.unwrap(), RemoteTaskFormat::Paged);
}

// vim: ts=4
