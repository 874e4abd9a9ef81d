//! Paged sync execution: one pass over a collection's index and pages.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::index::{compare_indexes, IndexDelta, TaskIndex};
use super::layout::{build_layout, PageLayout, TaskPage};
use super::legacy::migrate_from_legacy_format;
use super::PagedNamespace;
use crate::crypto::{Envelope, KeySource};
use crate::error::SyncError;
use crate::gateway::{FileChange, Gist, GistApi};
use crate::logging::*;
use crate::store::TaskQueueStore;
use crate::types::{RemoteTaskFormat, TaskRecord};
use crate::util::now_ms;

/// Transfer counters for one collection pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PagedSyncStats {
	pub uploaded_pages: usize,
	pub downloaded_pages: usize,
	pub uploaded_items: usize,
	pub downloaded_items: usize,
	pub skipped_items: usize,
}

/// Syncs one paged collection between the local queue store and a Gist.
pub struct PagedSyncer {
	gateway: Arc<dyn GistApi>,
	crypto: Arc<Envelope>,
	queue: Arc<dyn TaskQueueStore>,
}

impl PagedSyncer {
	pub fn new(
		gateway: Arc<dyn GistApi>,
		crypto: Arc<Envelope>,
		queue: Arc<dyn TaskQueueStore>,
	) -> Self {
		PagedSyncer { gateway, crypto, queue }
	}

	/// Probe which task storage format the remote Gist carries.
	pub async fn detect_remote_format(
		&self,
		ns: &PagedNamespace,
		gist_id: &str,
	) -> Result<RemoteTaskFormat, SyncError> {
		let gist = self.gateway.get_gist(gist_id).await?;
		if gist.has_file(ns.index_file) {
			return Ok(RemoteTaskFormat::Paged);
		}
		if ns.legacy_file.map(|f| gist.has_file(f)) == Some(true) {
			return Ok(RemoteTaskFormat::Legacy);
		}
		Ok(RemoteTaskFormat::None)
	}

	/// Run one sync pass for a collection.
	pub async fn sync_collection(
		&self,
		ns: &PagedNamespace,
		gist_id: &str,
		passphrase: Option<&str>,
	) -> Result<PagedSyncStats, SyncError> {
		let mut stats = PagedSyncStats::default();
		let gist = self.gateway.get_gist(gist_id).await?;

		let remote_index = self.load_remote_index(ns, gist_id, &gist, passphrase).await?;

		// Legacy migration: absorb the single-file layout into the local
		// queue, then continue; the upload below rewrites it paged.
		if remote_index.is_none() {
			if let Some(legacy_file) = ns.legacy_file {
				if gist.has_file(legacy_file) {
					let content = self.gateway.get_file_content(gist_id, legacy_file).await?;
					let plain =
						self.crypto.decrypt_or_passthrough(&content, gist_id, passphrase).await?;
					match migrate_from_legacy_format(&plain) {
						Ok(items) if !items.is_empty() => {
							info!("Migrating {} items from legacy {}", items.len(), legacy_file);
							stats.downloaded_items += items.len();
							self.queue.restore(ns.collection, items).await?;
						}
						Ok(_) => {}
						Err(e) => warn!("Legacy {} did not parse: {}", legacy_file, e),
					}
				}
			}
		}

		let local_items = self.queue.get_all(ns.collection).await?;
		if local_items.is_empty() && remote_index.is_none() {
			return Ok(stats);
		}

		let mut layout = build_layout(&local_items, now_ms());
		let delta = match &remote_index {
			Some(remote) => compare_indexes(&layout.index, remote),
			None => {
				let mut delta = IndexDelta::default();
				for item in &layout.index.items {
					delta.to_upload.insert(item.id.clone());
					delta.pages_to_upload.insert(item.page_id.clone());
				}
				delta
			}
		};
		stats.skipped_items = delta.skipped.len();

		// Remote → local first.
		if !delta.pages_to_download.is_empty() {
			let downloaded = self
				.download_pages(ns, gist_id, passphrase, &delta, &mut stats)
				.await?;
			if !downloaded.is_empty() {
				stats.downloaded_items += downloaded.len();
				self.queue.restore(ns.collection, downloaded).await?;
				// Page composition may have changed; rebuild from the
				// merged local set so the uploaded index is complete.
				let merged = self.queue.get_all(ns.collection).await?;
				layout = build_layout(&merged, now_ms());
			}
		}

		// Local → remote.
		self.upload_dirty(ns, gist_id, passphrase, &layout, &delta, remote_index.as_ref(), &mut stats)
			.await?;

		Ok(stats)
	}

	async fn load_remote_index(
		&self,
		ns: &PagedNamespace,
		gist_id: &str,
		gist: &Gist,
		passphrase: Option<&str>,
	) -> Result<Option<TaskIndex>, SyncError> {
		if !gist.has_file(ns.index_file) {
			return Ok(None);
		}
		let content = self.gateway.get_file_content(gist_id, ns.index_file).await?;
		let plain = self.crypto.decrypt_or_passthrough(&content, gist_id, passphrase).await?;
		match TaskIndex::parse(&plain) {
			Ok(index) => Ok(Some(index)),
			Err(e) => {
				warn!("Remote {} did not parse, treating as absent: {}", ns.index_file, e);
				Ok(None)
			}
		}
	}

	async fn download_pages(
		&self,
		ns: &PagedNamespace,
		gist_id: &str,
		passphrase: Option<&str>,
		delta: &IndexDelta,
		stats: &mut PagedSyncStats,
	) -> Result<Vec<TaskRecord>, SyncError> {
		let mut items = Vec::new();
		for (i, page_id) in delta.pages_to_download.iter().enumerate() {
			// Stay cooperative on long downloads.
			if i > 0 && i % 2 == 0 {
				tokio::task::yield_now().await;
			}
			let filename = ns.page_file(page_id);
			let content = match self.gateway.get_file_content(gist_id, &filename).await {
				Ok(content) => content,
				Err(e) => {
					warn!("Remote page {} unavailable: {}", filename, e);
					continue;
				}
			};
			let plain = self.crypto.decrypt_or_passthrough(&content, gist_id, passphrase).await?;
			let page = match TaskPage::parse(&plain) {
				Ok(page) => page,
				Err(e) => {
					warn!("Remote page {} did not parse: {}", filename, e);
					continue;
				}
			};
			stats.downloaded_pages += 1;
			items.extend(page.tasks.into_iter().filter(|t| delta.to_download.contains(&t.id)));
		}
		Ok(items)
	}

	#[allow(clippy::too_many_arguments)]
	async fn upload_dirty(
		&self,
		ns: &PagedNamespace,
		gist_id: &str,
		passphrase: Option<&str>,
		layout: &PageLayout,
		delta: &IndexDelta,
		remote_index: Option<&TaskIndex>,
		stats: &mut PagedSyncStats,
	) -> Result<(), SyncError> {
		// A page is dirty when it holds an item that must move up, or when
		// its shape diverged from the remote index entry (count/timestamp).
		let upload_ids: BTreeSet<&str> = delta.to_upload.iter().map(|s| s.as_str()).collect();
		let mut dirty_pages: BTreeSet<String> = layout
			.index
			.items
			.iter()
			.filter(|item| upload_ids.contains(item.id.as_str()))
			.map(|item| item.page_id.clone())
			.collect();
		for info in &layout.index.pages {
			let matches_remote = remote_index
				.and_then(|r| r.page_by_id(&info.page_id))
				.map(|r| r.item_count == info.item_count && r.updated_at == info.updated_at)
				.unwrap_or(false);
			if !matches_remote {
				dirty_pages.insert(info.page_id.clone());
			}
		}

		// Stale remote pages: referenced by the old index, absent from the
		// new layout (collection shrank).
		let local_page_ids: BTreeSet<&str> =
			layout.index.pages.iter().map(|p| p.page_id.as_str()).collect();
		let stale_pages: Vec<String> = remote_index
			.map(|r| {
				r.pages
					.iter()
					.filter(|p| !local_page_ids.contains(p.page_id.as_str()))
					.map(|p| p.page_id.clone())
					.collect()
			})
			.unwrap_or_default();

		if dirty_pages.is_empty() && stale_pages.is_empty() && delta.is_empty() {
			return Ok(());
		}

		let key = match passphrase {
			Some(p) => KeySource::Passphrase(p),
			None => KeySource::GistId(gist_id),
		};

		let mut changes: BTreeMap<String, FileChange> = BTreeMap::new();
		let index_json = layout.index.to_json()?;
		changes.insert(
			ns.index_file.to_string(),
			FileChange::Write(self.crypto.encrypt(&index_json, key).await?),
		);

		for (i, page_id) in dirty_pages.iter().enumerate() {
			if i > 0 && i % 3 == 0 {
				tokio::task::yield_now().await;
			}
			let page = match layout.page(page_id) {
				Some(page) => page,
				None => continue,
			};
			let page_json = page.to_json()?;
			changes.insert(
				ns.page_file(page_id),
				FileChange::Write(self.crypto.encrypt(&page_json, key).await?),
			);
			stats.uploaded_pages += 1;
		}
		for page_id in stale_pages {
			changes.insert(ns.page_file(&page_id), FileChange::Delete);
		}

		self.gateway.update_files(gist_id, changes).await?;
		stats.uploaded_items += delta.to_upload.len();
		debug!(
			"Paged upload for {}: {} pages, {} items",
			ns.index_file, stats.uploaded_pages, stats.uploaded_items
		);
		Ok(())
	}
}

// vim: ts=4
