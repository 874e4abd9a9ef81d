//! In-memory local store for tests and embedding.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{BoardStore, KvStore, PagedCollection, TaskQueueStore};
use crate::error::StoreError;
use crate::types::{Board, Folder, LocalWorkspaceState, TaskRecord};

#[derive(Default)]
struct Inner {
	kv: BTreeMap<String, String>,
	boards: BTreeMap<String, Board>,
	folders: BTreeMap<String, Folder>,
	tasks: BTreeMap<String, TaskRecord>,
	workflows: BTreeMap<String, TaskRecord>,
	state: LocalWorkspaceState,
}

/// All local collections behind one mutex.
#[derive(Default)]
pub struct MemoryStore {
	inner: Mutex<Inner>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Test setup: insert a board directly.
	pub async fn put_board(&self, board: Board) {
		let mut inner = self.inner.lock().await;
		inner.boards.insert(board.id.clone(), board);
	}

	/// Test setup: insert a task or workflow directly.
	pub async fn put_item(&self, collection: PagedCollection, item: TaskRecord) {
		let mut inner = self.inner.lock().await;
		match collection {
			PagedCollection::Tasks => inner.tasks.insert(item.id.clone(), item),
			PagedCollection::Workflows => inner.workflows.insert(item.id.clone(), item),
		};
	}

	pub async fn board_ids(&self) -> Vec<String> {
		self.inner.lock().await.boards.keys().cloned().collect()
	}

	pub async fn set_current_board(&self, id: Option<&str>) {
		let mut inner = self.inner.lock().await;
		inner.state.current_board_id = id.map(|s| s.to_string());
	}
}

#[async_trait]
impl KvStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self.inner.lock().await.kv.get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		self.inner.lock().await.kv.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StoreError> {
		self.inner.lock().await.kv.remove(key);
		Ok(())
	}

	async fn keys(&self) -> Result<Vec<String>, StoreError> {
		Ok(self.inner.lock().await.kv.keys().cloned().collect())
	}
}

#[async_trait]
impl BoardStore for MemoryStore {
	async fn load_all_folders(&self) -> Result<Vec<Folder>, StoreError> {
		Ok(self.inner.lock().await.folders.values().cloned().collect())
	}

	async fn load_all_boards(&self) -> Result<Vec<Board>, StoreError> {
		Ok(self.inner.lock().await.boards.values().cloned().collect())
	}

	async fn load_board(&self, id: &str) -> Result<Option<Board>, StoreError> {
		Ok(self.inner.lock().await.boards.get(id).cloned())
	}

	async fn save_board(&self, board: &Board) -> Result<(), StoreError> {
		self.inner.lock().await.boards.insert(board.id.clone(), board.clone());
		Ok(())
	}

	async fn save_folder(&self, folder: &Folder) -> Result<(), StoreError> {
		self.inner.lock().await.folders.insert(folder.id.clone(), folder.clone());
		Ok(())
	}

	async fn delete_board(&self, id: &str) -> Result<(), StoreError> {
		self.inner.lock().await.boards.remove(id);
		Ok(())
	}

	async fn load_state(&self) -> Result<LocalWorkspaceState, StoreError> {
		Ok(self.inner.lock().await.state.clone())
	}

	async fn save_state(&self, state: &LocalWorkspaceState) -> Result<(), StoreError> {
		self.inner.lock().await.state = state.clone();
		Ok(())
	}
}

#[async_trait]
impl TaskQueueStore for MemoryStore {
	async fn get_all(&self, collection: PagedCollection) -> Result<Vec<TaskRecord>, StoreError> {
		let inner = self.inner.lock().await;
		let map = match collection {
			PagedCollection::Tasks => &inner.tasks,
			PagedCollection::Workflows => &inner.workflows,
		};
		Ok(map.values().cloned().collect())
	}

	async fn restore(
		&self,
		collection: PagedCollection,
		items: Vec<TaskRecord>,
	) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		let map = match collection {
			PagedCollection::Tasks => &mut inner.tasks,
			PagedCollection::Workflows => &mut inner.workflows,
		};
		for item in items {
			match map.get(&item.id) {
				Some(local) if local.updated_at > item.updated_at => {}
				_ => {
					map.insert(item.id.clone(), item);
				}
			}
		}
		Ok(())
	}
}

// vim: ts=4
