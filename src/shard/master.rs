//! The master index: root routing table of the sharded media store.
//!
//! One master index (plaintext, on the primary sync Gist) lists every
//! shard Gist and maps every synced URL to its shard and filename.
//! Whether a blob is synced is answered here alone; shards are only
//! touched to move bytes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::limits::{SHARD_FILE_LIMIT, SHARD_SIZE_LIMIT, TOMBSTONE_RETENTION_MS};
use crate::types::MediaType;

/// Current master index format version.
pub const MASTER_INDEX_VERSION: u32 = 1;

/// Shard lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
	/// Accepts new allocations
	Active,
	/// At capacity; drains back to Active when files are deleted
	Full,
	/// Excluded from allocation; still serves downloads and sweeps
	Archived,
}

/// One registered shard Gist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardInfo {
	pub gist_id: String,
	pub alias: String,
	pub order: u32,
	pub file_count: usize,
	pub total_size: u64,
	pub status: ShardStatus,
	#[serde(default)]
	pub description: String,
	pub updated_at: u64,
}

impl ShardInfo {
	/// Whether this shard can take one more file of the given size.
	pub fn has_capacity(&self, size: u64) -> bool {
		self.status == ShardStatus::Active
			&& self.file_count < SHARD_FILE_LIMIT
			&& self.total_size + size <= SHARD_SIZE_LIMIT
	}

	/// Re-derive Full/Active from the counters. Archived is sticky.
	pub fn refresh_status(&mut self) {
		if self.status == ShardStatus::Archived {
			return;
		}
		self.status = if self.file_count >= SHARD_FILE_LIMIT || self.total_size >= SHARD_SIZE_LIMIT
		{
			ShardStatus::Full
		} else {
			ShardStatus::Active
		};
	}
}

/// Routing entry: where one synced URL lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIndexEntry {
	pub shard_id: String,
	pub filename: String,
	pub size: u64,
	#[serde(rename = "type")]
	pub media_type: MediaType,
	pub synced_at: u64,
}

/// Soft-delete record for a media blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTombstone {
	pub url: String,
	pub shard_id: String,
	pub filename: String,
	pub size: u64,
	pub deleted_at: u64,
	#[serde(default)]
	pub deleted_by: Option<String>,
}

impl MediaTombstone {
	pub fn is_expired(&self, now: u64) -> bool {
		now.saturating_sub(self.deleted_at) >= TOMBSTONE_RETENTION_MS
	}
}

/// Aggregate statistics, recomputed on every flush.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MasterStats {
	pub shard_count: usize,
	pub file_count: usize,
	pub total_size: u64,
	pub tombstone_count: usize,
	pub updated_at: u64,
}

/// The master index file (`master-index.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MasterIndex {
	pub version: u32,
	pub shards: BTreeMap<String, ShardInfo>,
	pub file_index: BTreeMap<String, FileIndexEntry>,
	pub tombstones: Vec<MediaTombstone>,
	pub stats: MasterStats,
}

impl Default for MasterIndex {
	fn default() -> Self {
		MasterIndex {
			version: MASTER_INDEX_VERSION,
			shards: BTreeMap::new(),
			file_index: BTreeMap::new(),
			tombstones: Vec::new(),
			stats: MasterStats::default(),
		}
	}
}

impl MasterIndex {
	pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}

	/// Whether a URL is currently synced (live, not tombstoned).
	pub fn is_synced(&self, url: &str) -> bool {
		self.file_index.contains_key(url)
	}

	/// Next ordinal for a new shard; aliases are `shard-{order}`.
	pub fn next_order(&self) -> u32 {
		self.shards.values().map(|s| s.order).max().unwrap_or(0) + 1
	}

	/// Register a freshly created shard Gist under the next alias.
	pub fn register_shard(&mut self, gist_id: &str, now: u64) -> String {
		let order = self.next_order();
		let alias = format!("shard-{}", order);
		self.shards.insert(
			alias.clone(),
			ShardInfo {
				gist_id: gist_id.to_string(),
				alias: alias.clone(),
				order,
				file_count: 0,
				total_size: 0,
				status: ShardStatus::Active,
				description: format!("media shard {}", order),
				updated_at: now,
			},
		);
		alias
	}

	/// Record an uploaded file: routing entry plus shard counters.
	pub fn register_file(
		&mut self,
		url: &str,
		shard_alias: &str,
		filename: &str,
		size: u64,
		media_type: MediaType,
		now: u64,
	) {
		self.file_index.insert(
			url.to_string(),
			FileIndexEntry {
				shard_id: shard_alias.to_string(),
				filename: filename.to_string(),
				size,
				media_type,
				synced_at: now,
			},
		);
		if let Some(shard) = self.shards.get_mut(shard_alias) {
			shard.file_count += 1;
			shard.total_size += size;
			shard.updated_at = now;
			shard.refresh_status();
		}
	}

	/// Remove a routing entry and release its shard capacity. Returns the
	/// removed entry.
	pub fn unregister_file(&mut self, url: &str, now: u64) -> Option<FileIndexEntry> {
		let entry = self.file_index.remove(url)?;
		if let Some(shard) = self.shards.get_mut(&entry.shard_id) {
			shard.file_count = shard.file_count.saturating_sub(1);
			shard.total_size = shard.total_size.saturating_sub(entry.size);
			shard.updated_at = now;
			shard.refresh_status();
		}
		Some(entry)
	}

	/// Move a live entry into the tombstone list.
	pub fn tombstone_file(&mut self, url: &str, deleted_by: Option<&str>, now: u64) -> bool {
		match self.unregister_file(url, now) {
			Some(entry) => {
				self.tombstones.push(MediaTombstone {
					url: url.to_string(),
					shard_id: entry.shard_id,
					filename: entry.filename,
					size: entry.size,
					deleted_at: now,
					deleted_by: deleted_by.map(|s| s.to_string()),
				});
				true
			}
			None => false,
		}
	}

	pub fn find_tombstone(&self, url: &str) -> Option<&MediaTombstone> {
		self.tombstones.iter().find(|t| t.url == url)
	}

	pub fn remove_tombstone(&mut self, url: &str) -> Option<MediaTombstone> {
		let pos = self.tombstones.iter().position(|t| t.url == url)?;
		Some(self.tombstones.remove(pos))
	}

	/// Shard entries eligible for new allocations, fullest first.
	///
	/// Fill-first keeps the shard population dense: new bytes go to the
	/// most-loaded shard that still fits them, so partially-filled shards
	/// do not accumulate.
	pub fn active_shards_fill_first(&self, size: u64) -> Vec<&ShardInfo> {
		let mut shards: Vec<&ShardInfo> =
			self.shards.values().filter(|s| s.has_capacity(size)).collect();
		shards.sort_by(|a, b| {
			b.file_count.cmp(&a.file_count).then(b.total_size.cmp(&a.total_size)).then(a.order.cmp(&b.order))
		});
		shards
	}

	/// Recompute the aggregate stats block.
	pub fn refresh_stats(&mut self, now: u64) {
		self.stats = MasterStats {
			shard_count: self.shards.len(),
			file_count: self.file_index.len(),
			total_size: self.file_index.values().map(|e| e.size).sum(),
			tombstone_count: self.tombstones.len(),
			updated_at: now,
		};
	}
}


// vim: ts=4
