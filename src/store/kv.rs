//! redb-backed local store.
//!
//! One database file holds every local collection as JSON strings in
//! separate tables. Values are written through small transactions; the
//! engine's write volume is a handful of records per sync round.

use async_trait::async_trait;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

use super::{BoardStore, KvStore, PagedCollection, TaskQueueStore};
use crate::error::StoreError;
use crate::types::{Board, Folder, LocalWorkspaceState, TaskRecord};

const KV_TABLE: TableDefinition<&str, &str> = TableDefinition::new("kv");
const BOARDS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("boards");
const FOLDERS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("folders");
const TASKS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("tasks");
const WORKFLOWS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("workflows");

const WORKSPACE_STATE_KEY: &str = "workspace_state";

fn collection_table(collection: PagedCollection) -> TableDefinition<'static, &'static str, &'static str> {
	match collection {
		PagedCollection::Tasks => TASKS_TABLE,
		PagedCollection::Workflows => WORKFLOWS_TABLE,
	}
}

/// Local store backed by a single redb database file.
pub struct RedbStore {
	db: Arc<redb::Database>,
}

impl RedbStore {
	/// Open or create the database and ensure all tables exist.
	pub fn open(db_path: &Path) -> Result<Self, StoreError> {
		let db = redb::Database::create(db_path).map_err(StoreError::load)?;
		{
			let write_txn = db.begin_write().map_err(StoreError::load)?;
			let _ = write_txn.open_table(KV_TABLE).map_err(StoreError::load)?;
			let _ = write_txn.open_table(BOARDS_TABLE).map_err(StoreError::load)?;
			let _ = write_txn.open_table(FOLDERS_TABLE).map_err(StoreError::load)?;
			let _ = write_txn.open_table(TASKS_TABLE).map_err(StoreError::load)?;
			let _ = write_txn.open_table(WORKFLOWS_TABLE).map_err(StoreError::load)?;
			write_txn.commit().map_err(StoreError::load)?;
		}
		Ok(RedbStore { db: Arc::new(db) })
	}

	fn read_one(
		&self,
		table: TableDefinition<&str, &str>,
		key: &str,
	) -> Result<Option<String>, StoreError> {
		let read_txn = self.db.begin_read().map_err(StoreError::load)?;
		let table = read_txn.open_table(table).map_err(StoreError::load)?;
		Ok(table.get(key).map_err(StoreError::load)?.map(|guard| guard.value().to_string()))
	}

	fn read_all(&self, table: TableDefinition<&str, &str>) -> Result<Vec<String>, StoreError> {
		let read_txn = self.db.begin_read().map_err(StoreError::load)?;
		let table = read_txn.open_table(table).map_err(StoreError::load)?;
		let mut values = Vec::new();
		for entry in table.iter().map_err(StoreError::load)? {
			let (_, value) = entry.map_err(StoreError::load)?;
			values.push(value.value().to_string());
		}
		Ok(values)
	}

	fn write_one(
		&self,
		table: TableDefinition<&str, &str>,
		key: &str,
		value: &str,
	) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write().map_err(StoreError::save)?;
		{
			let mut table = write_txn.open_table(table).map_err(StoreError::save)?;
			table.insert(key, value).map_err(StoreError::save)?;
		}
		write_txn.commit().map_err(StoreError::save)?;
		Ok(())
	}

	fn remove_one(&self, table: TableDefinition<&str, &str>, key: &str) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write().map_err(StoreError::save)?;
		{
			let mut table = write_txn.open_table(table).map_err(StoreError::save)?;
			table.remove(key).map_err(StoreError::save)?;
		}
		write_txn.commit().map_err(StoreError::save)?;
		Ok(())
	}
}

#[async_trait]
impl KvStore for RedbStore {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		self.read_one(KV_TABLE, key)
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		self.write_one(KV_TABLE, key, value)
	}

	async fn delete(&self, key: &str) -> Result<(), StoreError> {
		self.remove_one(KV_TABLE, key)
	}

	async fn keys(&self) -> Result<Vec<String>, StoreError> {
		let read_txn = self.db.begin_read().map_err(StoreError::load)?;
		let table = read_txn.open_table(KV_TABLE).map_err(StoreError::load)?;
		let mut keys = Vec::new();
		for entry in table.iter().map_err(StoreError::load)? {
			let (key, _) = entry.map_err(StoreError::load)?;
			keys.push(key.value().to_string());
		}
		Ok(keys)
	}
}

#[async_trait]
impl BoardStore for RedbStore {
	async fn load_all_folders(&self) -> Result<Vec<Folder>, StoreError> {
		self.read_all(FOLDERS_TABLE)?
			.iter()
			.map(|json| {
				serde_json::from_str(json)
					.map_err(|e| StoreError::Corrupted { message: e.to_string() })
			})
			.collect()
	}

	async fn load_all_boards(&self) -> Result<Vec<Board>, StoreError> {
		self.read_all(BOARDS_TABLE)?
			.iter()
			.map(|json| {
				serde_json::from_str(json)
					.map_err(|e| StoreError::Corrupted { message: e.to_string() })
			})
			.collect()
	}

	async fn load_board(&self, id: &str) -> Result<Option<Board>, StoreError> {
		match self.read_one(BOARDS_TABLE, id)? {
			Some(json) => serde_json::from_str(&json)
				.map(Some)
				.map_err(|e| StoreError::Corrupted { message: e.to_string() }),
			None => Ok(None),
		}
	}

	async fn save_board(&self, board: &Board) -> Result<(), StoreError> {
		let json = serde_json::to_string(board).map_err(StoreError::save)?;
		self.write_one(BOARDS_TABLE, &board.id, &json)
	}

	async fn save_folder(&self, folder: &Folder) -> Result<(), StoreError> {
		let json = serde_json::to_string(folder).map_err(StoreError::save)?;
		self.write_one(FOLDERS_TABLE, &folder.id, &json)
	}

	async fn delete_board(&self, id: &str) -> Result<(), StoreError> {
		self.remove_one(BOARDS_TABLE, id)
	}

	async fn load_state(&self) -> Result<LocalWorkspaceState, StoreError> {
		match self.read_one(KV_TABLE, WORKSPACE_STATE_KEY)? {
			Some(json) => serde_json::from_str(&json)
				.map_err(|e| StoreError::Corrupted { message: e.to_string() }),
			None => Ok(LocalWorkspaceState::default()),
		}
	}

	async fn save_state(&self, state: &LocalWorkspaceState) -> Result<(), StoreError> {
		let json = serde_json::to_string(state).map_err(StoreError::save)?;
		self.write_one(KV_TABLE, WORKSPACE_STATE_KEY, &json)
	}
}

#[async_trait]
impl TaskQueueStore for RedbStore {
	async fn get_all(&self, collection: PagedCollection) -> Result<Vec<TaskRecord>, StoreError> {
		self.read_all(collection_table(collection))?
			.iter()
			.map(|json| {
				serde_json::from_str(json)
					.map_err(|e| StoreError::Corrupted { message: e.to_string() })
			})
			.collect()
	}

	async fn restore(
		&self,
		collection: PagedCollection,
		items: Vec<TaskRecord>,
	) -> Result<(), StoreError> {
		let table = collection_table(collection);
		for item in items {
			// Keep the local copy when it is newer than the incoming one.
			if let Some(existing) = self.read_one(table, &item.id)? {
				if let Ok(local) = serde_json::from_str::<TaskRecord>(&existing) {
					if local.updated_at > item.updated_at {
						continue;
					}
				}
			}
			let json = serde_json::to_string(&item).map_err(StoreError::save)?;
			self.write_one(table, &item.id, &json)?;
		}
		Ok(())
	}
}


// vim: ts=4
