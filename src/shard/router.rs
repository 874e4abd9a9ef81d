//! Shard routing and allocation.
//!
//! The router owns the in-memory master index for the duration of a
//! round: loads it lazily, hands out shard assignments with fill-first
//! placement, and flushes the index back to the master Gist (and the
//! local cache) once at round end.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::files::{ShardManifest, SHARD_MANIFEST_FILE};
use super::master::{MasterIndex, MasterStats, MediaTombstone, ShardInfo};
use crate::crypto::{Envelope, KeySource};
use crate::error::{GatewayError, SyncError};
use crate::gateway::{FileChange, GistApi, MASTER_INDEX_FILE};
use crate::logging::*;
use crate::store::{keys, KvStore};
use crate::types::MediaType;
use crate::util::now_ms;

struct RouterState {
	master_gist_id: String,
	index: MasterIndex,
	dirty: bool,
}

/// Outcome of a batch allocation.
#[derive(Debug, Clone, Default)]
pub struct AllocationPlan {
	/// url → shard alias
	pub assignments: BTreeMap<String, String>,
	/// Aliases of shards created to satisfy this batch
	pub created_shards: Vec<String>,
}

/// Routes media blobs to shard Gists through the master index.
pub struct ShardRouter {
	gateway: Arc<dyn GistApi>,
	crypto: Arc<Envelope>,
	kv: Arc<dyn KvStore>,
	state: Mutex<Option<RouterState>>,
}

impl ShardRouter {
	pub fn new(gateway: Arc<dyn GistApi>, crypto: Arc<Envelope>, kv: Arc<dyn KvStore>) -> Self {
		ShardRouter { gateway, crypto, kv, state: Mutex::new(None) }
	}

	/// Load the master index for a master Gist: remote copy when present,
	/// local cache as fallback, empty index for a fresh store.
	pub async fn ensure_loaded(&self, master_gist_id: &str) -> Result<(), SyncError> {
		let mut state = self.state.lock().await;
		if let Some(loaded) = state.as_ref() {
			if loaded.master_gist_id == master_gist_id {
				return Ok(());
			}
		}

		let index = match self.gateway.get_gist(master_gist_id).await {
			Ok(gist) if gist.has_file(MASTER_INDEX_FILE) => {
				let content =
					self.gateway.get_file_content(master_gist_id, MASTER_INDEX_FILE).await?;
				match MasterIndex::parse(&content) {
					Ok(index) => index,
					Err(e) => {
						warn!("Remote master index did not parse: {}; using local cache", e);
						self.cached_index().await
					}
				}
			}
			Ok(_) => self.cached_index().await,
			Err(GatewayError::NotFound) => self.cached_index().await,
			Err(e) => return Err(e.into()),
		};

		self.kv.set(keys::MASTER_GIST_ID, master_gist_id).await?;
		*state = Some(RouterState { master_gist_id: master_gist_id.to_string(), index, dirty: false });
		Ok(())
	}

	async fn cached_index(&self) -> MasterIndex {
		match self.kv.get(keys::MASTER_INDEX).await {
			Ok(Some(json)) => MasterIndex::parse(&json).unwrap_or_default(),
			_ => MasterIndex::default(),
		}
	}

	/// Copy of the current index for read-only inspection.
	pub async fn snapshot(&self) -> Result<MasterIndex, SyncError> {
		let state = self.state.lock().await;
		state
			.as_ref()
			.map(|s| s.index.clone())
			.ok_or(SyncError::NotConnected)
	}

	pub async fn stats(&self) -> Result<MasterStats, SyncError> {
		let mut state = self.state.lock().await;
		let state = state.as_mut().ok_or(SyncError::NotConnected)?;
		state.index.refresh_stats(now_ms());
		Ok(state.index.stats)
	}

	/// Whether a URL is already synced.
	pub async fn is_synced(&self, url: &str) -> Result<bool, SyncError> {
		let state = self.state.lock().await;
		Ok(state.as_ref().map(|s| s.index.is_synced(url)).unwrap_or(false))
	}

	pub async fn gist_id_for_alias(&self, alias: &str) -> Result<Option<String>, SyncError> {
		let state = self.state.lock().await;
		Ok(state
			.as_ref()
			.and_then(|s| s.index.shards.get(alias))
			.map(|shard| shard.gist_id.clone()))
	}

	/// Allocate a shard for one blob, creating a new shard when no active
	/// shard has capacity. Capacity is reserved immediately; confirm or
	/// release it when the upload settles.
	pub async fn allocate_file(&self, url: &str, size: u64) -> Result<AllocationPlan, SyncError> {
		self.allocate_files(&[(url.to_string(), size)]).await
	}

	/// Greedy fill-first allocation across a batch.
	pub async fn allocate_files(
		&self,
		items: &[(String, u64)],
	) -> Result<AllocationPlan, SyncError> {
		let mut state = self.state.lock().await;
		let state = state.as_mut().ok_or(SyncError::NotConnected)?;
		let mut plan = AllocationPlan::default();

		for (url, size) in items {
			let existing =
				state.index.active_shards_fill_first(*size).first().map(|s| s.alias.clone());
			let alias = match existing {
				Some(alias) => alias,
				None => {
					let alias = self.create_shard(state).await?;
					plan.created_shards.push(alias.clone());
					alias
				}
			};
			// Reserve capacity so later items in this batch (and other
			// callers) see the shard filling up.
			if let Some(shard) = state.index.shards.get_mut(&alias) {
				shard.file_count += 1;
				shard.total_size += size;
				shard.refresh_status();
			}
			state.dirty = true;
			plan.assignments.insert(url.clone(), alias);
		}
		Ok(plan)
	}

	async fn create_shard(&self, state: &mut RouterState) -> Result<String, SyncError> {
		// The manifest is encrypted under the shard's own Gist ID, which
		// does not exist until creation; create with a placeholder, then
		// replace it with the sealed manifest.
		let mut initial = BTreeMap::new();
		initial.insert(SHARD_MANIFEST_FILE.to_string(), "{\"shardId\":\"pending\"}".to_string());
		let order = state.index.next_order();
		let gist = self
			.gateway
			.create_gist(&format!("media shard {}", order), initial)
			.await?;

		let alias = state.index.register_shard(&gist.id, now_ms());
		state.dirty = true;

		let manifest = ShardManifest::new(&alias, &state.master_gist_id, now_ms());
		let sealed = self
			.crypto
			.encrypt(&manifest.to_json()?, KeySource::GistId(&gist.id))
			.await?;
		let mut changes = BTreeMap::new();
		changes.insert(SHARD_MANIFEST_FILE.to_string(), FileChange::Write(sealed));
		self.gateway.update_files(&gist.id, changes).await?;

		info!("Created media shard {} ({})", alias, gist.id);
		Ok(alias)
	}

	/// Record successful uploads. Capacity was reserved at allocation, so
	/// only the routing entries are added here.
	pub async fn confirm_uploads(
		&self,
		confirmations: &[(String, String, String, u64, MediaType)],
	) -> Result<(), SyncError> {
		let mut state = self.state.lock().await;
		let state = state.as_mut().ok_or(SyncError::NotConnected)?;
		let now = now_ms();
		for (url, alias, filename, size, media_type) in confirmations {
			state.index.file_index.insert(
				url.clone(),
				super::master::FileIndexEntry {
					shard_id: alias.clone(),
					filename: filename.clone(),
					size: *size,
					media_type: *media_type,
					synced_at: now,
				},
			);
			if let Some(shard) = state.index.shards.get_mut(alias) {
				shard.updated_at = now;
			}
		}
		state.dirty = true;
		Ok(())
	}

	/// Reverse reservations for a failed shard batch.
	pub async fn release_allocations(&self, releases: &[(String, u64)]) -> Result<(), SyncError> {
		let mut state = self.state.lock().await;
		let state = state.as_mut().ok_or(SyncError::NotConnected)?;
		for (alias, size) in releases {
			if let Some(shard) = state.index.shards.get_mut(alias) {
				shard.file_count = shard.file_count.saturating_sub(1);
				shard.total_size = shard.total_size.saturating_sub(*size);
				shard.refresh_status();
			}
		}
		state.dirty = true;
		Ok(())
	}

	/// Move a live entry into the tombstone list.
	pub async fn tombstone_file(
		&self,
		url: &str,
		deleted_by: Option<&str>,
	) -> Result<bool, SyncError> {
		let mut state = self.state.lock().await;
		let state = state.as_mut().ok_or(SyncError::NotConnected)?;
		let changed = state.index.tombstone_file(url, deleted_by, now_ms());
		state.dirty |= changed;
		Ok(changed)
	}

	pub async fn find_tombstone(&self, url: &str) -> Result<Option<MediaTombstone>, SyncError> {
		let state = self.state.lock().await;
		Ok(state.as_ref().and_then(|s| s.index.find_tombstone(url).cloned()))
	}

	/// Apply an arbitrary mutation to the index (maintenance paths).
	pub async fn mutate<R>(
		&self,
		f: impl FnOnce(&mut MasterIndex) -> R + Send,
	) -> Result<R, SyncError> {
		let mut state = self.state.lock().await;
		let state = state.as_mut().ok_or(SyncError::NotConnected)?;
		let result = f(&mut state.index);
		state.dirty = true;
		Ok(result)
	}

	pub async fn shard_infos(&self) -> Result<Vec<ShardInfo>, SyncError> {
		let state = self.state.lock().await;
		Ok(state
			.as_ref()
			.map(|s| s.index.shards.values().cloned().collect())
			.unwrap_or_default())
	}

	/// Persist the index: plaintext `master-index.json` on the master
	/// Gist plus the local cache. No-op when nothing changed.
	pub async fn flush(&self) -> Result<(), SyncError> {
		let mut state = self.state.lock().await;
		let state = match state.as_mut() {
			Some(state) if state.dirty => state,
			_ => return Ok(()),
		};
		state.index.refresh_stats(now_ms());
		let json = state.index.to_json()?;

		let mut changes = BTreeMap::new();
		changes.insert(MASTER_INDEX_FILE.to_string(), FileChange::Write(json.clone()));
		self.gateway.update_files(&state.master_gist_id, changes).await?;
		self.kv.set(keys::MASTER_INDEX, &json).await?;
		state.dirty = false;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::gateway::memory::MemoryGistApi;
	use crate::store::memory::MemoryStore;

	async fn router_with_master() -> (Arc<MemoryGistApi>, ShardRouter, String) {
		let api = Arc::new(MemoryGistApi::new());
		let mut files = BTreeMap::new();
		files.insert("manifest.json".to_string(), "{}".to_string());
		let master = api.create_gist("sync", files).await.unwrap();
		let router =
			ShardRouter::new(api.clone(), Arc::new(Envelope::new()), Arc::new(MemoryStore::new()));
		router.ensure_loaded(&master.id).await.unwrap();
		(api, router, master.id)
	}

	#[tokio::test]
	async fn allocation_creates_first_shard() {
		let (api, router, _) = router_with_master().await;
		let plan = router.allocate_file("https://a/x.png", 1000).await.unwrap();
		assert_eq!(plan.created_shards, vec!["shard-1".to_string()]);
		assert_eq!(plan.assignments["https://a/x.png"], "shard-1");

		let gist_id = router.gist_id_for_alias("shard-1").await.unwrap().unwrap();
		assert!(api.gist_exists(&gist_id).await);
		// The shard carries its encrypted manifest.
		let manifest = api.file_content(&gist_id, SHARD_MANIFEST_FILE).await.unwrap();
		assert!(manifest.contains("\"encrypted\":true"));
	}

	#[tokio::test]
	async fn batch_allocation_spills_into_new_shards() {
		let (_, router, _) = router_with_master().await;
		let items: Vec<(String, u64)> =
			(0..250).map(|i| (format!("https://a/{}.png", i), 400 * 1024)).collect();
		let plan = router.allocate_files(&items).await.unwrap();

		// 250 files at 100 per shard: three shards.
		assert_eq!(plan.created_shards.len(), 3);
		assert_eq!(plan.assignments.len(), 250);

		for shard in router.shard_infos().await.unwrap() {
			assert!(shard.file_count <= crate::limits::SHARD_FILE_LIMIT);
			assert!(shard.total_size <= crate::limits::SHARD_SIZE_LIMIT);
		}
	}

	#[tokio::test]
	async fn flush_writes_master_index_once() {
		let (api, router, master_id) = router_with_master().await;
		router.allocate_file("https://a/x.png", 10).await.unwrap();
		router
			.confirm_uploads(&[(
				"https://a/x.png".to_string(),
				"shard-1".to_string(),
				"media_x.json".to_string(),
				10,
				MediaType::Image,
			)])
			.await
			.unwrap();
		router.flush().await.unwrap();

		let content = api.file_content(&master_id, MASTER_INDEX_FILE).await.unwrap();
		let index = MasterIndex::parse(&content).unwrap();
		assert!(index.is_synced("https://a/x.png"));
		assert_eq!(index.stats.file_count, 1);

		// Second flush with no changes is a no-op.
		api.reset_stats().await;
		router.flush().await.unwrap();
		assert_eq!(api.stats().await.patches, 0);
	}

	#[tokio::test]
	async fn release_reverses_reservation() {
		let (_, router, _) = router_with_master().await;
		router.allocate_file("https://a/x.png", 10).await.unwrap();
		router.release_allocations(&[("shard-1".to_string(), 10)]).await.unwrap();
		let shards = router.shard_infos().await.unwrap();
		assert_eq!(shards[0].file_count, 0);
		assert_eq!(shards[0].total_size, 0);
	}
}

// vim: ts=4
