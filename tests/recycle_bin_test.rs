/// Recycle bin tests: listing board and media tombstones with retention
/// windows, restoring a board from its retained file, and permanent
/// deletion of the file plus its records.
use std::sync::Arc;

use gistsync::config::load_config;
use gistsync::crypto::Envelope;
use gistsync::gateway::memory::MemoryGistApi;
use gistsync::manifest::{board_filename, SyncManifest};
use gistsync::reconciler::Reconciler;
use gistsync::shard::{ShardRouter, ShardSyncer};
use gistsync::store::blobs::MemoryBlobCache;
use gistsync::store::memory::MemoryStore;
use gistsync::store::{BlobCache, BoardStore, KvStore};
use gistsync::types::{Board, DeletedItemType, MediaBlob, MediaType, SyncOutcome};
use gistsync::util::{media_filename, now_ms};
use serde_json::{json, Value};

struct Device {
	store: Arc<MemoryStore>,
	blobs: Arc<MemoryBlobCache>,
	media: Arc<ShardSyncer>,
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
		blobs.clone(),
		media.clone(),
		"0.2.0-test",
	);
	Device { store, blobs, media, reconciler }
}

fn board(id: &str, elements: Vec<Value>) -> Board {
	Board {
		id: id.to_string(),
		name: format!("board {}", id),
		folder_id: None,
		order: 0,
		viewport: Value::Null,
		theme: String::new(),
		created_at: 1,
		updated_at: now_ms(),
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
async fn deleted_board_is_listed_and_restorable() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", vec![json!({"id": "e1"}), json!({"id": "e2"})])).await;
	assert!(a.reconciler.sync().await.is_success());

	a.reconciler.delete_board_locally("x").await.unwrap();
	assert!(a.reconciler.sync().await.is_success());
	assert!(a.store.load_board("x").await.unwrap().is_none());

	let items = a.reconciler.get_deleted_items().await.unwrap();
	assert_eq!(items.len(), 1);
	assert_eq!(items[0].item_type, DeletedItemType::Board);
	assert_eq!(items[0].id, "x");
	assert!(items[0].retention_remaining_ms > 0);
	assert!(items[0].deleted_by.is_some());

	// Restore brings the retained file back to local and clears the
	// tombstone remotely.
	a.reconciler.restore_item(DeletedItemType::Board, "x").await.unwrap();
	let restored = a.store.load_board("x").await.unwrap().expect("board restored");
	assert_eq!(restored.elements.len(), 2);

	let gist_id = load_config(&*a.store).await.unwrap().gist_id.unwrap();
	let manifest = remote_manifest(&api, &gist_id).await;
	assert!(!manifest.boards["x"].is_tombstone());
	assert!(a.reconciler.get_deleted_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn permanent_delete_removes_file_and_entry() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", vec![json!({"id": "e1"})])).await;
	a.store.put_board(board("keep", vec![json!({"id": "e2"})])).await;
	assert!(a.reconciler.sync().await.is_success());
	let gist_id = load_config(&*a.store).await.unwrap().gist_id.unwrap();

	a.reconciler.delete_board_locally("x").await.unwrap();
	assert!(a.reconciler.sync().await.is_success());

	a.reconciler.permanently_delete(DeletedItemType::Board, "x").await.unwrap();
	let names = api.file_names(&gist_id).await;
	assert!(!names.contains(&board_filename("x")));
	assert!(names.contains(&board_filename("keep")));

	let manifest = remote_manifest(&api, &gist_id).await;
	assert!(!manifest.boards.contains_key("x"));
	assert!(a.reconciler.get_deleted_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn media_tombstones_appear_alongside_boards() {
	let api = Arc::new(MemoryGistApi::new());
	let a = device(&api, "dev-a");
	a.store.put_board(board("x", vec![json!({"id": "e1"})])).await;
	assert!(a.reconciler.sync().await.is_success());
	let gist_id = load_config(&*a.store).await.unwrap().gist_id.unwrap();

	// Sync one media blob, then soft-delete it.
	let url = "https://cdn/pic.png".to_string();
	a.blobs.cache_blob(&url, vec![1, 2, 3], "image/png").await.unwrap();
	a.media.router().ensure_loaded(&gist_id).await.unwrap();
	let outcome = a
		.media
		.upload_media(&[MediaBlob {
			url: url.clone(),
			media_type: MediaType::Image,
			size: 3,
			mime_type: "image/png".to_string(),
		}])
		.await
		.unwrap();
	assert!(outcome[0].success);
	assert_eq!(a.media.soft_delete_media(&[url.clone()]).await.unwrap(), 1);

	let items = a.reconciler.get_deleted_items().await.unwrap();
	assert_eq!(items.len(), 1);
	assert_eq!(items[0].item_type, DeletedItemType::Media);
	assert_eq!(items[0].id, url);

	// Purging empties the bin and removes the shard file.
	let index = a.media.router().snapshot().await.unwrap();
	let shard_gist = index.shards["shard-1"].gist_id.clone();
	assert_eq!(a.reconciler.empty_recycle_bin().await.unwrap(), 1);
	assert!(a.reconciler.get_deleted_items().await.unwrap().is_empty());
	assert!(!api.file_names(&shard_gist).await.contains(&media_filename(&url)));
}

// vim: ts=4
