//! Local persistence contracts.
//!
//! The engine consumes these traits; the host wires implementations. The
//! crate ships a redb-backed production store ([`kv::RedbStore`]), an
//! in-memory store for tests and embedding ([`memory::MemoryStore`]), and
//! blob caches ([`blobs`]).

pub mod blobs;
pub mod kv;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Board, Folder, LocalWorkspaceState, TaskRecord};

/// Well-known keys in the key/value store.
pub mod keys {
	pub const SYNC_CONFIG: &str = "sync_config";
	pub const SYNC_PASSWORD: &str = "sync_password";
	pub const API_TOKEN: &str = "api_token";
	pub const MASTER_INDEX: &str = "master_index";
	pub const MASTER_GIST_ID: &str = "master_gist_id";
	pub const LOCAL_DELETIONS_PENDING: &str = "local_deletions_pending";
	pub const MEDIA_STATUS_CACHE: &str = "media_status_cache";
	pub const DEVICE_ID: &str = "device_id";
	pub const PROMPTS: &str = "prompts";
}

/// Which paged collection a call addresses. Tasks and workflows share the
/// record shape and sync machinery; only the file namespace differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagedCollection {
	Tasks,
	Workflows,
}

/// Plain string key/value persistence.
#[async_trait]
pub trait KvStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
	async fn delete(&self, key: &str) -> Result<(), StoreError>;
	async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Board, folder and workspace-state persistence.
#[async_trait]
pub trait BoardStore: Send + Sync {
	async fn load_all_folders(&self) -> Result<Vec<Folder>, StoreError>;
	async fn load_all_boards(&self) -> Result<Vec<Board>, StoreError>;
	async fn load_board(&self, id: &str) -> Result<Option<Board>, StoreError>;
	async fn save_board(&self, board: &Board) -> Result<(), StoreError>;
	async fn save_folder(&self, folder: &Folder) -> Result<(), StoreError>;
	async fn delete_board(&self, id: &str) -> Result<(), StoreError>;
	async fn load_state(&self) -> Result<LocalWorkspaceState, StoreError>;
	async fn save_state(&self, state: &LocalWorkspaceState) -> Result<(), StoreError>;
}

/// Task / workflow queue persistence.
#[async_trait]
pub trait TaskQueueStore: Send + Sync {
	async fn get_all(&self, collection: PagedCollection) -> Result<Vec<TaskRecord>, StoreError>;

	/// Write back items received from remote, merging by id. Existing
	/// items with a newer `updatedAt` are kept.
	async fn restore(
		&self,
		collection: PagedCollection,
		items: Vec<TaskRecord>,
	) -> Result<(), StoreError>;
}

/// Metadata about a cached blob.
#[derive(Debug, Clone)]
pub struct BlobInfo {
	pub size: u64,
	pub mime_type: String,
}

/// Binary blob cache keyed by URL.
#[async_trait]
pub trait BlobCache: Send + Sync {
	async fn get_cached_blob(&self, url: &str) -> Result<Option<Vec<u8>>, StoreError>;
	async fn cache_blob(&self, url: &str, data: Vec<u8>, mime_type: &str)
		-> Result<(), StoreError>;
	async fn get_cache_info(&self, url: &str) -> Result<Option<BlobInfo>, StoreError>;
}

// vim: ts=4
