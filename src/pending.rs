//! Deletion-pending store.
//!
//! When the user deletes a board locally, the deletion is only durable
//! once the tombstone reaches the remote manifest. Until then the board's
//! ID and deletion time live here, so an intervening download does not
//! resurrect the board on this device.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StoreError;
use crate::store::{keys, KvStore};

/// Persistent `(board id → deleted at)` map.
pub struct PendingDeletions {
	kv: Arc<dyn KvStore>,
}

impl PendingDeletions {
	pub fn new(kv: Arc<dyn KvStore>) -> Self {
		PendingDeletions { kv }
	}

	pub async fn load(&self) -> Result<BTreeMap<String, u64>, StoreError> {
		match self.kv.get(keys::LOCAL_DELETIONS_PENDING).await? {
			Some(json) => Ok(serde_json::from_str(&json).unwrap_or_default()),
			None => Ok(BTreeMap::new()),
		}
	}

	async fn save(&self, map: &BTreeMap<String, u64>) -> Result<(), StoreError> {
		if map.is_empty() {
			return self.kv.delete(keys::LOCAL_DELETIONS_PENDING).await;
		}
		let json = serde_json::to_string(map).map_err(StoreError::save)?;
		self.kv.set(keys::LOCAL_DELETIONS_PENDING, &json).await
	}

	/// Record a local deletion at the given time.
	pub async fn record(&self, board_id: &str, deleted_at: u64) -> Result<(), StoreError> {
		let mut map = self.load().await?;
		map.insert(board_id.to_string(), deleted_at);
		self.save(&map).await
	}

	/// Drop one entry (its tombstone reached remote, or the user restored
	/// the board).
	pub async fn clear(&self, board_id: &str) -> Result<(), StoreError> {
		let mut map = self.load().await?;
		if map.remove(board_id).is_some() {
			self.save(&map).await?;
		}
		Ok(())
	}

	/// Drop several entries in one write.
	pub async fn clear_many(&self, board_ids: &[String]) -> Result<(), StoreError> {
		let mut map = self.load().await?;
		let mut changed = false;
		for id in board_ids {
			changed |= map.remove(id).is_some();
		}
		if changed {
			self.save(&map).await?;
		}
		Ok(())
	}

	pub async fn clear_all(&self) -> Result<(), StoreError> {
		self.kv.delete(keys::LOCAL_DELETIONS_PENDING).await
	}

	/// Whether a pending local deletion outranks a remote copy: true when
	/// the board was deleted here after the remote copy was last written.
	pub async fn suppresses(
		&self,
		board_id: &str,
		remote_updated_at: u64,
	) -> Result<bool, StoreError> {
		let map = self.load().await?;
		Ok(map.get(board_id).map(|deleted_at| remote_updated_at < *deleted_at).unwrap_or(false))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::store::memory::MemoryStore;

	#[tokio::test]
	async fn record_and_suppress() {
		let store = PendingDeletions::new(Arc::new(MemoryStore::new()));
		store.record("b1", 1000).await.unwrap();

		// Remote copy older than the local deletion: suppressed.
		assert!(store.suppresses("b1", 500).await.unwrap());
		// Remote copy written after the deletion: not suppressed.
		assert!(!store.suppresses("b1", 2000).await.unwrap());
		// Unknown board: not suppressed.
		assert!(!store.suppresses("zz", 0).await.unwrap());
	}

	#[tokio::test]
	async fn clear_removes_entries() {
		let store = PendingDeletions::new(Arc::new(MemoryStore::new()));
		store.record("b1", 1000).await.unwrap();
		store.record("b2", 1000).await.unwrap();

		store.clear("b1").await.unwrap();
		assert!(!store.suppresses("b1", 0).await.unwrap());
		assert!(store.suppresses("b2", 0).await.unwrap());

		store.clear_all().await.unwrap();
		assert!(store.load().await.unwrap().is_empty());
	}
}

// vim: ts=4
