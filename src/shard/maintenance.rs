//! Shard maintenance: validation, repair, merge, archive.

use std::collections::{BTreeMap, BTreeSet};

use super::files::SyncedMediaFile;
use super::master::ShardStatus;
use super::syncer::ShardSyncer;
use crate::error::{GatewayError, SyncError};
use crate::gateway::{delete_gist_files, FileChange};
use crate::limits::{SHARD_FILE_LIMIT, SHARD_SIZE_LIMIT};
use crate::logging::*;
use crate::util::{is_media_filename, now_ms};

/// One inconsistency between the master index and shard reality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardIssue {
	/// A registered shard's Gist no longer exists
	MissingGist { shard_id: String },
	/// A routed file is absent from its shard
	MissingFile { shard_id: String, filename: String, url: String },
	/// A media file in a shard that no routing entry or tombstone claims
	OrphanFile { shard_id: String, filename: String },
	/// Shard counters disagree with the routing entries pointing at it
	CountMismatch { shard_id: String, recorded: usize, actual: usize },
}

impl ShardSyncer {
	/// Compare every registered shard against the master index.
	pub async fn validate_shards(&self) -> Result<Vec<ShardIssue>, SyncError> {
		let snapshot = self.router.snapshot().await?;
		let mut issues = Vec::new();

		// url entries grouped by shard alias
		let mut entries_by_shard: BTreeMap<&str, Vec<(&String, &str)>> = BTreeMap::new();
		for (url, entry) in &snapshot.file_index {
			entries_by_shard
				.entry(entry.shard_id.as_str())
				.or_default()
				.push((url, entry.filename.as_str()));
		}
		let tombstoned: BTreeSet<&str> =
			snapshot.tombstones.iter().map(|t| t.filename.as_str()).collect();

		for (alias, info) in &snapshot.shards {
			let entries = entries_by_shard.remove(alias.as_str()).unwrap_or_default();

			let gist = match self.gateway.get_gist(&info.gist_id).await {
				Ok(gist) => gist,
				Err(GatewayError::NotFound) => {
					issues.push(ShardIssue::MissingGist { shard_id: alias.clone() });
					continue;
				}
				Err(e) => return Err(e.into()),
			};

			if info.file_count != entries.len() {
				issues.push(ShardIssue::CountMismatch {
					shard_id: alias.clone(),
					recorded: info.file_count,
					actual: entries.len(),
				});
			}

			let mut routed: BTreeSet<&str> = BTreeSet::new();
			for (url, filename) in &entries {
				routed.insert(filename);
				if !gist.has_file(filename) {
					issues.push(ShardIssue::MissingFile {
						shard_id: alias.clone(),
						filename: filename.to_string(),
						url: (*url).clone(),
					});
				}
			}

			for filename in gist.files.keys() {
				if is_media_filename(filename)
					&& !routed.contains(filename.as_str())
					&& !tombstoned.contains(filename.as_str())
				{
					issues.push(ShardIssue::OrphanFile {
						shard_id: alias.clone(),
						filename: filename.clone(),
					});
				}
			}
		}

		Ok(issues)
	}

	/// Re-register orphan media files by reading their content headers.
	/// Returns the number of files recovered.
	pub async fn repair_orphan_files(&self) -> Result<usize, SyncError> {
		let issues = self.validate_shards().await?;
		let snapshot = self.router.snapshot().await?;
		let mut repaired = 0;

		for issue in issues {
			let (shard_id, filename) = match issue {
				ShardIssue::OrphanFile { shard_id, filename } => (shard_id, filename),
				_ => continue,
			};
			let gist_id = match snapshot.shards.get(&shard_id) {
				Some(shard) => shard.gist_id.clone(),
				None => continue,
			};
			let content = match self.gateway.get_file_content(&gist_id, &filename).await {
				Ok(content) => content,
				Err(e) => {
					warn!("Orphan {} in {} unreadable: {}", filename, shard_id, e);
					continue;
				}
			};
			let media_file = match SyncedMediaFile::parse(&content) {
				Ok(file) => file,
				Err(e) => {
					warn!("Orphan {} in {} does not parse: {}", filename, shard_id, e);
					continue;
				}
			};

			let now = now_ms();
			self.router
				.mutate(move |index| {
					if !index.is_synced(&media_file.url) {
						index.register_file(
							&media_file.url,
							&shard_id,
							&filename,
							media_file.size,
							media_file.media_type,
							now,
						);
					}
				})
				.await?;
			repaired += 1;
		}

		if repaired > 0 {
			info!("Repaired {} orphan media files", repaired);
			self.router.flush().await?;
		}
		Ok(repaired)
	}

	/// Copy every file from the source shards into the target, rewrite
	/// the routing entries, and delete the sources' files. Sources end up
	/// empty and archived.
	pub async fn merge_shards(
		&self,
		source_aliases: &[String],
		target_alias: &str,
	) -> Result<usize, SyncError> {
		let snapshot = self.router.snapshot().await?;

		let target = snapshot.shards.get(target_alias).ok_or_else(|| SyncError::Other {
			message: format!("unknown target shard {}", target_alias),
		})?;
		if target.status == ShardStatus::Archived {
			return Err(SyncError::Other {
				message: format!("target shard {} is archived", target_alias),
			});
		}

		// Everything routed or tombstoned in the sources moves.
		let mut moving_files = 0usize;
		let mut moving_bytes = 0u64;
		for entry in snapshot.file_index.values() {
			if source_aliases.contains(&entry.shard_id) {
				moving_files += 1;
				moving_bytes += entry.size;
			}
		}
		for tombstone in &snapshot.tombstones {
			if source_aliases.contains(&tombstone.shard_id) {
				moving_bytes += tombstone.size;
			}
		}
		if target.file_count + moving_files > SHARD_FILE_LIMIT
			|| target.total_size + moving_bytes > SHARD_SIZE_LIMIT
		{
			return Err(SyncError::Other {
				message: format!("target shard {} lacks capacity for merge", target_alias),
			});
		}

		let target_gist = target.gist_id.clone();
		let mut moved = 0usize;
		for source_alias in source_aliases {
			let source = match snapshot.shards.get(source_alias) {
				Some(shard) => shard,
				None => continue,
			};
			let gist = self.gateway.get_gist(&source.gist_id).await?;
			let media_files: Vec<String> =
				gist.files.keys().filter(|f| is_media_filename(f)).cloned().collect();

			let mut changes: BTreeMap<String, FileChange> = BTreeMap::new();
			for filename in &media_files {
				let content = self.gateway.get_file_content(&source.gist_id, filename).await?;
				changes.insert(filename.clone(), FileChange::Write(content));
			}
			if !changes.is_empty() {
				self.gateway.update_files(&target_gist, changes).await?;
			}

			delete_gist_files(self.gateway.as_ref(), &source.gist_id, &media_files).await?;
			moved += media_files.len();

			let source_alias = source_alias.clone();
			let target_alias = target_alias.to_string();
			let now = now_ms();
			self.router
				.mutate(move |index| {
					let mut moved_files = 0usize;
					let mut moved_bytes = 0u64;
					for entry in index.file_index.values_mut() {
						if entry.shard_id == source_alias {
							entry.shard_id = target_alias.clone();
							moved_files += 1;
							moved_bytes += entry.size;
						}
					}
					let mut tombstone_bytes = 0u64;
					for tombstone in index.tombstones.iter_mut() {
						if tombstone.shard_id == source_alias {
							tombstone.shard_id = target_alias.clone();
							tombstone_bytes += tombstone.size;
						}
					}
					if let Some(target) = index.shards.get_mut(&target_alias) {
						target.file_count += moved_files;
						target.total_size += moved_bytes + tombstone_bytes;
						target.updated_at = now;
						target.refresh_status();
					}
					if let Some(source) = index.shards.get_mut(&source_alias) {
						source.file_count = 0;
						source.total_size = 0;
						source.status = ShardStatus::Archived;
						source.updated_at = now;
					}
				})
				.await?;
		}

		self.router.flush().await?;
		info!("Merged {} files into shard {}", moved, target_alias);
		Ok(moved)
	}

	/// Toggle a shard's archived state. Unarchiving re-derives
	/// Active/Full from the counters.
	pub async fn set_shard_archived(&self, alias: &str, archived: bool) -> Result<(), SyncError> {
		let alias = alias.to_string();
		let found = self
			.router
			.mutate(move |index| match index.shards.get_mut(&alias) {
				Some(shard) => {
					if archived {
						shard.status = ShardStatus::Archived;
					} else {
						shard.status = ShardStatus::Active;
						shard.refresh_status();
					}
					true
				}
				None => false,
			})
			.await?;
		if !found {
			return Err(SyncError::Other { message: "unknown shard".to_string() });
		}
		self.router.flush().await
	}

	/// Update a shard's human-readable description.
	pub async fn rename_shard(&self, alias: &str, description: &str) -> Result<(), SyncError> {
		let alias = alias.to_string();
		let description = description.to_string();
		let found = self
			.router
			.mutate(move |index| match index.shards.get_mut(&alias) {
				Some(shard) => {
					shard.description = description;
					shard.updated_at = now_ms();
					true
				}
				None => false,
			})
			.await?;
		if !found {
			return Err(SyncError::Other { message: "unknown shard".to_string() });
		}
		self.router.flush().await
	}
}

// vim: ts=4
