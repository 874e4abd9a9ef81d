//! Shard sync execution: media upload, soft delete, restore, sweeps.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::files::{MediaSource, ShardManifest, SyncedMediaFile, SyncedMediaMeta, SHARD_MANIFEST_FILE};
use super::router::ShardRouter;
use crate::crypto::{Envelope, KeySource};
use crate::error::{GatewayError, SyncError};
use crate::gateway::{delete_gist_files, FileChange, GistApi};
use crate::limits::{MEDIA_MAX_BYTES, SHARD_CONCURRENCY};
use crate::logging::*;
use crate::store::BlobCache;
use crate::types::{MediaBlob, MediaType};
use crate::util::{media_filename, now_ms};

/// Per-item result of an upload batch.
#[derive(Debug, Clone)]
pub struct MediaUploadOutcome {
	pub url: String,
	pub success: bool,
	/// True when nothing was transferred (already synced or in flight)
	pub skipped: bool,
	pub error: Option<String>,
}

impl MediaUploadOutcome {
	fn ok(url: &str) -> Self {
		MediaUploadOutcome { url: url.to_string(), success: true, skipped: false, error: None }
	}

	fn skip(url: &str) -> Self {
		MediaUploadOutcome { url: url.to_string(), success: true, skipped: true, error: None }
	}

	fn fail(url: &str, error: String) -> Self {
		MediaUploadOutcome { url: url.to_string(), success: false, skipped: false, error: Some(error) }
	}
}

struct PendingUpload {
	blob: MediaBlob,
	data: Vec<u8>,
	alias: String,
}

/// Media sync over the sharded store.
pub struct ShardSyncer {
	pub(super) gateway: Arc<dyn GistApi>,
	pub(super) router: Arc<ShardRouter>,
	crypto: Arc<Envelope>,
	blobs: Arc<dyn BlobCache>,
	device_id: String,
	/// Re-entrancy guard: URLs with an upload in flight in this process
	syncing_urls: Mutex<HashSet<String>>,
}

impl ShardSyncer {
	pub fn new(
		gateway: Arc<dyn GistApi>,
		router: Arc<ShardRouter>,
		crypto: Arc<Envelope>,
		blobs: Arc<dyn BlobCache>,
		device_id: String,
	) -> Self {
		ShardSyncer {
			gateway,
			router,
			crypto,
			blobs,
			device_id,
			syncing_urls: Mutex::new(HashSet::new()),
		}
	}

	pub fn router(&self) -> &Arc<ShardRouter> {
		&self.router
	}

	/// Upload a batch of blobs, allocating shards as needed.
	///
	/// Already-synced and in-flight URLs are skipped. Uploads are grouped
	/// per shard; a failed shard batch releases its allocations and fails
	/// only its own items. The master index is flushed once at the end.
	pub async fn upload_media(
		&self,
		items: &[MediaBlob],
	) -> Result<Vec<MediaUploadOutcome>, SyncError> {
		let mut outcomes = Vec::with_capacity(items.len());
		let mut candidates: Vec<(MediaBlob, Vec<u8>)> = Vec::new();

		{
			let mut in_flight = self.syncing_urls.lock().await;
			for blob in items {
				if self.router.is_synced(&blob.url).await? {
					outcomes.push(MediaUploadOutcome::skip(&blob.url));
					continue;
				}
				if !in_flight.insert(blob.url.clone()) {
					outcomes.push(MediaUploadOutcome::skip(&blob.url));
					continue;
				}
				let data = match self.blobs.get_cached_blob(&blob.url).await? {
					Some(data) => data,
					None => {
						in_flight.remove(&blob.url);
						outcomes.push(MediaUploadOutcome::fail(
							&blob.url,
							"blob not in local cache".to_string(),
						));
						continue;
					}
				};
				if data.len() as u64 > MEDIA_MAX_BYTES {
					in_flight.remove(&blob.url);
					outcomes.push(MediaUploadOutcome::fail(
						&blob.url,
						format!("blob is {} bytes, above the sync limit", data.len()),
					));
					continue;
				}
				candidates.push((blob.clone(), data));
			}
		}

		if candidates.is_empty() {
			return Ok(outcomes);
		}

		let sizes: Vec<(String, u64)> =
			candidates.iter().map(|(b, d)| (b.url.clone(), d.len() as u64)).collect();
		let plan = self.router.allocate_files(&sizes).await?;

		// Group per shard, preserving allocation order.
		let mut groups: BTreeMap<String, Vec<PendingUpload>> = BTreeMap::new();
		for (blob, data) in candidates {
			let alias = plan.assignments[&blob.url].clone();
			groups.entry(alias.clone()).or_default().push(PendingUpload { blob, data, alias });
		}

		let groups: Vec<(String, Vec<PendingUpload>)> = groups.into_iter().collect();
		for chunk in groups.chunks(SHARD_CONCURRENCY) {
			let results = futures::future::join_all(
				chunk.iter().map(|(alias, uploads)| self.upload_shard_batch(alias, uploads)),
			)
			.await;
			for ((_, uploads), result) in chunk.iter().zip(results) {
				match result {
					Ok(()) => {
						for upload in uploads {
							outcomes.push(MediaUploadOutcome::ok(&upload.blob.url));
						}
					}
					Err(e) => {
						let message = e.to_string();
						warn!("Shard batch failed: {}", message);
						for upload in uploads {
							outcomes.push(MediaUploadOutcome::fail(&upload.blob.url, message.clone()));
						}
					}
				}
			}
		}

		{
			let mut in_flight = self.syncing_urls.lock().await;
			for (alias, uploads) in &groups {
				let _ = alias;
				for upload in uploads {
					in_flight.remove(&upload.blob.url);
				}
			}
		}

		self.router.flush().await?;
		Ok(outcomes)
	}

	/// Upload one shard's batch. On success the routing entries are
	/// confirmed; on failure the reserved capacity is released.
	async fn upload_shard_batch(
		&self,
		alias: &str,
		uploads: &[PendingUpload],
	) -> Result<(), SyncError> {
		let gist_id = self
			.router
			.gist_id_for_alias(alias)
			.await?
			.ok_or_else(|| SyncError::Other { message: format!("unknown shard {}", alias) })?;

		let mut manifest = self.load_shard_manifest(&gist_id).await;
		let now = now_ms();

		let mut changes: BTreeMap<String, FileChange> = BTreeMap::new();
		for upload in uploads {
			// Encoding is sequential within a shard; parallelism lives at
			// the shard level.
			let filename = media_filename(&upload.blob.url);
			let media_file = SyncedMediaFile {
				url: upload.blob.url.clone(),
				media_type: upload.blob.media_type,
				source: MediaSource::External,
				mime_type: upload.blob.mime_type.clone(),
				size: upload.data.len() as u64,
				base64_data: BASE64.encode(&upload.data),
				synced_at: now,
				synced_from_device: self.device_id.clone(),
				original_url: None,
			};
			manifest.files.insert(
				filename.clone(),
				SyncedMediaMeta {
					url: upload.blob.url.clone(),
					media_type: upload.blob.media_type,
					size: upload.data.len() as u64,
					mime_type: upload.blob.mime_type.clone(),
					synced_at: now,
				},
			);
			changes.insert(filename, FileChange::Write(media_file.to_json()?));
		}
		manifest.updated_at = now;
		let sealed =
			self.crypto.encrypt(&manifest.to_json()?, KeySource::GistId(&gist_id)).await?;
		changes.insert(SHARD_MANIFEST_FILE.to_string(), FileChange::Write(sealed));

		match self.patch_with_retry(&gist_id, changes).await {
			Ok(()) => {
				let confirmations: Vec<(String, String, String, u64, MediaType)> = uploads
					.iter()
					.map(|u| {
						(
							u.blob.url.clone(),
							u.alias.clone(),
							media_filename(&u.blob.url),
							u.data.len() as u64,
							u.blob.media_type,
						)
					})
					.collect();
				self.router.confirm_uploads(&confirmations).await
			}
			Err(e) => {
				let releases: Vec<(String, u64)> =
					uploads.iter().map(|u| (u.alias.clone(), u.data.len() as u64)).collect();
				self.router.release_allocations(&releases).await?;
				Err(e.into())
			}
		}
	}

	async fn load_shard_manifest(&self, gist_id: &str) -> ShardManifest {
		match self.gateway.get_file_content(gist_id, SHARD_MANIFEST_FILE).await {
			Ok(content) => {
				match self.crypto.decrypt_or_passthrough(&content, gist_id, None).await {
					Ok(plain) => ShardManifest::parse(&plain).unwrap_or_default(),
					Err(e) => {
						warn!("Shard manifest on {} did not decrypt: {}", gist_id, e);
						ShardManifest::default()
					}
				}
			}
			Err(_) => ShardManifest::default(),
		}
	}

	/// Bounded retry for shard PATCHes: one extra attempt on retryable
	/// errors with a doubled delay.
	async fn patch_with_retry(
		&self,
		gist_id: &str,
		changes: BTreeMap<String, FileChange>,
	) -> Result<(), GatewayError> {
		let mut delay = std::time::Duration::from_millis(500);
		let mut attempt = 0;
		loop {
			match self.gateway.update_files(gist_id, changes.clone()).await {
				Ok(()) => return Ok(()),
				Err(e) if e.is_retryable() && attempt == 0 => {
					warn!("Shard PATCH failed, retrying in {:?}: {}", delay, e);
					tokio::time::sleep(delay).await;
					delay *= 2;
					attempt += 1;
				}
				Err(e) => return Err(e),
			}
		}
	}

	/// Soft-delete: move routing entries to tombstones. The files stay in
	/// their shards until [`Self::cleanup_expired_tombstones`].
	pub async fn soft_delete_media(&self, urls: &[String]) -> Result<usize, SyncError> {
		let mut deleted = 0;
		for url in urls {
			if self.router.tombstone_file(url, Some(&self.device_id)).await? {
				deleted += 1;
			}
		}
		if deleted > 0 {
			self.router.flush().await?;
		}
		Ok(deleted)
	}

	/// Restore a tombstoned blob: verify its file still exists in the
	/// shard, re-register it, drop the tombstone.
	pub async fn restore_media(&self, url: &str) -> Result<(), SyncError> {
		let tombstone = self
			.router
			.find_tombstone(url)
			.await?
			.ok_or_else(|| SyncError::Other { message: format!("no tombstone for {}", url) })?;

		let gist_id = self
			.router
			.gist_id_for_alias(&tombstone.shard_id)
			.await?
			.ok_or_else(|| SyncError::Other {
				message: format!("unknown shard {}", tombstone.shard_id),
			})?;

		let content = self
			.gateway
			.get_file_content(&gist_id, &tombstone.filename)
			.await
			.map_err(|_| SyncError::Other {
				message: format!("media file for {} is no longer in its shard", url),
			})?;
		let media_file = SyncedMediaFile::parse(&content)?;

		let now = now_ms();
		self.router
			.mutate(move |index| {
				index.remove_tombstone(&media_file.url);
				index.register_file(
					&media_file.url,
					&tombstone.shard_id,
					&tombstone.filename,
					media_file.size,
					media_file.media_type,
					now,
				);
			})
			.await?;
		self.router.flush().await
	}

	/// Hard-delete media files whose tombstones are past retention.
	/// Per-shard failures are logged and the tombstones retained, so the
	/// next sweep retries.
	pub async fn cleanup_expired_tombstones(&self) -> Result<usize, SyncError> {
		let snapshot = self.router.snapshot().await?;
		let now = now_ms();

		let mut by_shard: BTreeMap<String, Vec<String>> = BTreeMap::new();
		for tombstone in snapshot.tombstones.iter().filter(|t| t.is_expired(now)) {
			by_shard.entry(tombstone.shard_id.clone()).or_default().push(tombstone.url.clone());
		}

		let mut removed = 0;
		for (alias, urls) in by_shard {
			let gist_id = match snapshot.shards.get(&alias) {
				Some(shard) => shard.gist_id.clone(),
				None => {
					// Shard record is gone; nothing left to delete.
					self.drop_tombstones(&urls).await?;
					removed += urls.len();
					continue;
				}
			};
			let filenames: Vec<String> = urls
				.iter()
				.filter_map(|url| snapshot.find_tombstone(url).map(|t| t.filename.clone()))
				.collect();
			match delete_gist_files(self.gateway.as_ref(), &gist_id, &filenames).await {
				Ok(()) => {
					self.drop_tombstones(&urls).await?;
					removed += urls.len();
				}
				Err(GatewayError::NotFound) => {
					self.drop_tombstones(&urls).await?;
					removed += urls.len();
				}
				Err(e) => {
					warn!("Tombstone sweep for shard {} failed: {}", alias, e);
				}
			}
		}

		if removed > 0 {
			info!("Tombstone sweep removed {} expired media files", removed);
			self.router.flush().await?;
		}
		Ok(removed)
	}

	async fn drop_tombstones(&self, urls: &[String]) -> Result<(), SyncError> {
		let urls: Vec<String> = urls.to_vec();
		self.router
			.mutate(move |index| {
				for url in &urls {
					index.remove_tombstone(url);
				}
			})
			.await
	}

	/// Fetch a synced blob's bytes from its shard.
	pub async fn download_media(&self, url: &str) -> Result<Option<Vec<u8>>, SyncError> {
		let snapshot = self.router.snapshot().await?;
		let entry = match snapshot.file_index.get(url) {
			Some(entry) => entry,
			None => return Ok(None),
		};
		let gist_id = match snapshot.shards.get(&entry.shard_id) {
			Some(shard) => shard.gist_id.clone(),
			None => return Ok(None),
		};
		let content = self.gateway.get_file_content(&gist_id, &entry.filename).await?;
		let media_file = SyncedMediaFile::parse(&content)?;
		let data = BASE64
			.decode(&media_file.base64_data)
			.map_err(|e| SyncError::Other { message: format!("bad media body: {}", e) })?;
		self.blobs.cache_blob(url, data.clone(), &media_file.mime_type).await?;
		Ok(Some(data))
	}
}

// vim: ts=4
