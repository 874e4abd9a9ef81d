//! The reconciler: orchestrates sync rounds.
//!
//! Three round types share the machinery: two-way `sync`, remote-
//! authoritative `pull_from_remote`, and local-authoritative
//! `push_to_remote`, plus the bootstrap path that creates a fresh remote
//! store. Within a round, remote → local application always precedes
//! local → remote upload, and the manifest write is the commit point:
//! anything that fails after it (paged collections, media) is reconciled
//! by the next round rather than failing this one.

pub mod classify;
pub mod merge;
pub mod safety;
pub mod scheduler;

pub use scheduler::AutoSyncScheduler;

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{device_id, load_config, save_config, SyncConfig};
use crate::crypto::{Envelope, KeySource};
use crate::error::{CryptoError, GatewayError, SyncError};
use crate::gateway::{find_sync_gist, FileChange, GistApi, MANIFEST_FILE, MASTER_INDEX_FILE};
use crate::logging::*;
use crate::manifest::{board_filename, SyncManifest};
use crate::paged::{PagedSyncer, TASKS, WORKFLOWS};
use crate::pending::PendingDeletions;
use crate::secrets::PasswordStore;
use crate::shard::{MediaWorker, ShardSyncer};
use crate::store::{keys, BlobCache, BoardStore, KvStore, PagedCollection, TaskQueueStore};
use crate::types::{
	Board, BoardMeta, ConflictReport, DeletedItem, DeletedItemType, LocalWorkspaceState,
	MediaBlob, MediaType, PromptsData, RemoteTaskFormat, SkipReason, SkippedItem, SyncOutcome,
	SyncReport, WorkspaceData,
};
use crate::util::now_ms;

/// Workspace file on the sync Gist.
pub const WORKSPACE_FILE: &str = "workspace.json";

/// Prompt history file on the sync Gist.
pub const PROMPTS_FILE: &str = "prompts.json";

const GIST_DESCRIPTION: &str = "Board sync data";

/// Everything local a round works from.
struct LocalSnapshot {
	boards: BTreeMap<String, Board>,
	prompts: PromptsData,
	state: LocalWorkspaceState,
	task_count: usize,
}

impl LocalSnapshot {
	fn has_data(&self) -> bool {
		!self.boards.is_empty() || !self.prompts.is_empty() || self.task_count > 0
	}
}

enum ManifestState {
	Present(Box<SyncManifest>),
	Absent,
	Undecryptable,
}

/// The sync engine facade. Collaborators are injected; all cross-round
/// state (session caches, in-flight guards) lives on them.
pub struct Reconciler {
	gateway: Arc<dyn GistApi>,
	crypto: Arc<Envelope>,
	kv: Arc<dyn KvStore>,
	boards: Arc<dyn BoardStore>,
	queue: Arc<dyn TaskQueueStore>,
	blobs: Arc<dyn BlobCache>,
	paged: PagedSyncer,
	media: Arc<ShardSyncer>,
	media_worker: MediaWorker,
	passwords: PasswordStore,
	pending: PendingDeletions,
	/// Single in-flight round; entering while held returns Busy
	sync_lock: Mutex<()>,
	app_version: String,
}

impl Reconciler {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		gateway: Arc<dyn GistApi>,
		crypto: Arc<Envelope>,
		kv: Arc<dyn KvStore>,
		boards: Arc<dyn BoardStore>,
		queue: Arc<dyn TaskQueueStore>,
		blobs: Arc<dyn BlobCache>,
		media: Arc<ShardSyncer>,
		app_version: &str,
	) -> Self {
		Reconciler {
			paged: PagedSyncer::new(gateway.clone(), crypto.clone(), queue.clone()),
			media_worker: MediaWorker::spawn(media.clone()),
			passwords: PasswordStore::new(kv.clone()),
			pending: PendingDeletions::new(kv.clone()),
			gateway,
			crypto,
			kv,
			boards,
			queue,
			blobs,
			media,
			sync_lock: Mutex::new(()),
			app_version: app_version.to_string(),
		}
	}

	pub fn media(&self) -> &Arc<ShardSyncer> {
		&self.media
	}

	pub fn passwords(&self) -> &PasswordStore {
		&self.passwords
	}

	pub fn pending(&self) -> &PendingDeletions {
		&self.pending
	}

	//////////
	// Round types //
	//////////

	/// Two-way sync round.
	pub async fn sync(&self) -> SyncOutcome {
		let _guard = match self.sync_lock.try_lock() {
			Ok(guard) => guard,
			Err(_) => return SyncOutcome::Failed(SyncError::Busy),
		};
		self.outcome(self.sync_locked().await)
	}

	/// One-way pull: remote is authoritative.
	///
	/// Deliberately ignores the deletion-pending store — the user asked
	/// for remote state, so a board deleted locally but live on remote is
	/// restored, and its pending record is cleared.
	pub async fn pull_from_remote(&self) -> SyncOutcome {
		let _guard = match self.sync_lock.try_lock() {
			Ok(guard) => guard,
			Err(_) => return SyncOutcome::Failed(SyncError::Busy),
		};
		self.outcome(self.pull_locked().await)
	}

	/// One-way push: local is authoritative. Never downloads board
	/// content; remote boards absent locally are tombstoned.
	pub async fn push_to_remote(&self) -> SyncOutcome {
		let _guard = match self.sync_lock.try_lock() {
			Ok(guard) => guard,
			Err(_) => return SyncOutcome::Failed(SyncError::Busy),
		};
		self.outcome(self.push_locked().await)
	}

	/// Paged task and workflow sync only; boards untouched.
	pub async fn sync_paged(&self) -> SyncOutcome {
		let _guard = match self.sync_lock.try_lock() {
			Ok(guard) => guard,
			Err(_) => return SyncOutcome::Failed(SyncError::Busy),
		};
		self.outcome(self.sync_paged_locked().await)
	}

	fn outcome(&self, result: Result<SyncReport, SyncError>) -> SyncOutcome {
		match result {
			Ok(report) => SyncOutcome::Success(report),
			Err(e) if e.is_password_error() => SyncOutcome::NeedsPassword,
			Err(e) => {
				error!("Sync round failed: {}", e);
				SyncOutcome::Failed(e)
			}
		}
	}

	//////////
	// Two-way sync //
	//////////

	async fn sync_locked(&self) -> Result<SyncReport, SyncError> {
		let started = now_ms();
		let mut report = SyncReport::default();
		let mut config = load_config(self.kv.as_ref()).await?;
		let device = device_id(self.kv.as_ref()).await?;
		let passphrase = self.passwords.get().await?;
		let snapshot = self.load_snapshot().await?;

		// Resolve the target Gist; a stale configured ID (deleted remote)
		// falls back to bootstrap once.
		let mut attempts = 0;
		loop {
			attempts += 1;
			let gist_id = match self.resolve_gist_id(&mut config).await? {
				Some(id) => id,
				None => {
					let id = self
						.bootstrap(&snapshot, passphrase.as_deref(), &device, &mut report)
						.await?;
					config.gist_id = Some(id);
					self.finish_round(&mut config, &device).await?;
					report.duration_ms = now_ms().saturating_sub(started);
					return Ok(report);
				}
			};

			match self
				.sync_round(&gist_id, &snapshot, passphrase.as_deref(), &device, &config, &mut report)
				.await
			{
				Err(SyncError::Gateway(GatewayError::NotFound)) if attempts == 1 => {
					info!("Configured Gist {} is gone; bootstrapping a new one", gist_id);
					config.gist_id = None;
					save_config(self.kv.as_ref(), &config).await?;
					continue;
				}
				Err(e) => return Err(e),
				Ok(()) => {
					config.gist_id = Some(gist_id);
					self.finish_round(&mut config, &device).await?;
					report.duration_ms = now_ms().saturating_sub(started);
					return Ok(report);
				}
			}
		}
	}

	async fn sync_round(
		&self,
		gist_id: &str,
		snapshot: &LocalSnapshot,
		passphrase: Option<&str>,
		device: &str,
		config: &SyncConfig,
		report: &mut SyncReport,
	) -> Result<(), SyncError> {
		let manifest = match self.read_manifest(gist_id, passphrase).await? {
			ManifestState::Present(manifest) => *manifest,
			ManifestState::Absent => {
				// A sync Gist without a manifest: first write into it.
				self.upload_snapshot_to(gist_id, snapshot, passphrase, device, report).await?;
				return Ok(());
			}
			ManifestState::Undecryptable => {
				// Local-wins override: remote data is unreadable, local
				// has content, so remote is replaced wholesale.
				if !snapshot.has_data() {
					return Err(SyncError::DecryptRefuseEmptyLocal);
				}
				warn!("Remote manifest unreadable; overwriting remote with local snapshot");
				self.upload_snapshot_to(gist_id, snapshot, passphrase, device, report).await?;
				return Ok(());
			}
		};

		// Classify and gate.
		let changes =
			classify::compare_board_changes(&snapshot.boards, &manifest, config.last_sync_time);
		let gate = safety::check_deletions(
			&changes.to_delete_locally,
			&safety::SafetyContext {
				local_boards: &snapshot.boards,
				current_board_id: snapshot.state.current_board_id.as_deref(),
				last_sync_time: config.last_sync_time,
				remote_live_boards: manifest.live_board_count(),
				bulk_confirmed: false,
			},
		);
		report.safety_warnings = gate.warnings.clone();
		report.skipped_items.extend(gate.skipped);
		report.skipped_items.extend(changes.skipped);

		// Conflicts: element-level merge, merged board goes up.
		let mut upload_boards: Vec<Board> = changes
			.to_upload
			.iter()
			.filter_map(|id| snapshot.boards.get(id).cloned())
			.collect();
		for id in &changes.conflicts {
			let local = match snapshot.boards.get(id) {
				Some(board) => board,
				None => continue,
			};
			match self.fetch_board(gist_id, id, passphrase).await? {
				Some(remote_board) => {
					let merged = merge::merge_boards(local, &remote_board);
					report.conflicts.push(ConflictReport {
						board_id: id.clone(),
						board_name: local.name.clone(),
						merged: true,
						conflicting_elements: merged.conflicting_elements.clone(),
					});
					self.boards.save_board(&merged.board).await?;
					upload_boards.push(merged.board);
				}
				None => upload_boards.push(local.clone()),
			}
		}

		// Remote → local: board downloads (pending local deletions
		// suppress resurrection in the two-way round).
		for id in &changes.to_download {
			let remote_updated =
				manifest.boards.get(id).map(|info| info.updated_at).unwrap_or(0);
			if self.pending.suppresses(id, remote_updated).await? {
				info!("Skipping download of {}: deleted locally after remote write", id);
				report.skipped_items.push(SkippedItem {
					id: id.clone(),
					name: manifest.boards.get(id).map(|i| i.name.clone()).unwrap_or_default(),
					reason: SkipReason::PendingDeletion,
				});
				continue;
			}
			if let Some(board) = self.fetch_board(gist_id, id, passphrase).await? {
				self.boards.save_board(&board).await?;
				report.downloaded.boards += 1;
			}
		}

		// Remote-driven local deletions that passed the gate.
		for id in &gate.allowed {
			self.boards.delete_board(id).await?;
			report.deleted.boards += 1;
		}

		// Remote prompts and workspace.
		report.downloaded.prompts += self.apply_remote_prompts(gist_id, passphrase, snapshot).await?;
		self.apply_remote_workspace(gist_id, passphrase).await?;

		// Local → remote. Board files first, then the manifest commit.
		let mut new_manifest = manifest;
		self.upload_boards(gist_id, passphrase, &upload_boards, &mut new_manifest).await?;
		report.uploaded.boards = upload_boards.len();

		let pending_map = self.pending.load().await?;
		let mut tombstoned: Vec<String> = Vec::new();
		for (board_id, deleted_at) in &pending_map {
			if new_manifest.mark_deleted(board_id, device, *deleted_at) {
				report.deleted.boards += 1;
			}
			tombstoned.push(board_id.clone());
		}

		// Background cleanup: hard-delete files whose tombstones aged out.
		let expired = new_manifest.expired_tombstones(now_ms());
		let mut manifest_batch: BTreeMap<String, FileChange> = BTreeMap::new();
		for board_id in &expired {
			new_manifest.remove(board_id);
			manifest_batch.insert(board_filename(board_id), FileChange::Delete);
		}

		new_manifest.touch(device, &self.app_version, now_ms());
		let sealed = self.seal(&new_manifest.to_json()?, gist_id, passphrase).await?;
		manifest_batch.insert(MANIFEST_FILE.to_string(), FileChange::Write(sealed));
		self.gateway.update_files(gist_id, manifest_batch).await?;
		self.pending.clear_many(&tombstoned).await?;

		// Post-commit uploads; failures here reconcile next round.
		self.upload_workspace_and_prompts(gist_id, passphrase, snapshot, report).await?;
		self.run_paged_syncs(gist_id, passphrase, report).await;
		self.queue_media_sync(gist_id, snapshot).await;

		// Current-board pointer moves to the remote value only when that
		// board survived the round locally.
		self.reconcile_current_board(gist_id, passphrase).await?;
		Ok(())
	}

	//////////
	// Pull / push //
	//////////

	async fn pull_locked(&self) -> Result<SyncReport, SyncError> {
		let started = now_ms();
		let mut report = SyncReport::default();
		let config = load_config(self.kv.as_ref()).await?;
		let passphrase = self.passwords.get().await?;
		let gist_id = config.gist_id.clone().ok_or(SyncError::NotConnected)?;

		let manifest = match self.read_manifest(&gist_id, passphrase.as_deref()).await? {
			ManifestState::Present(manifest) => *manifest,
			ManifestState::Absent => {
				return Err(SyncError::Other { message: "remote has no manifest".to_string() })
			}
			ManifestState::Undecryptable => {
				return Err(SyncError::Crypto(CryptoError::Corrupt {
					message: "remote manifest cannot be decrypted".to_string(),
				}))
			}
		};

		let snapshot = self.load_snapshot().await?;
		let (to_download, skipped) = classify::compare_for_pull(&snapshot.boards, &manifest);
		report.skipped_items = skipped;

		for id in &to_download {
			if let Some(board) = self.fetch_board(&gist_id, id, passphrase.as_deref()).await? {
				self.boards.save_board(&board).await?;
				report.downloaded.boards += 1;
			}
		}

		// A board present on remote clears its pending-deletion record:
		// the user explicitly asked for remote state.
		let remote_ids: Vec<String> = manifest.live_boards().map(|(id, _)| id.clone()).collect();
		self.pending.clear_many(&remote_ids).await?;

		report.downloaded.prompts +=
			self.apply_remote_prompts(&gist_id, passphrase.as_deref(), &snapshot).await?;
		self.apply_remote_workspace(&gist_id, passphrase.as_deref()).await?;
		self.reconcile_current_board(&gist_id, passphrase.as_deref()).await?;

		report.duration_ms = now_ms().saturating_sub(started);
		Ok(report)
	}

	async fn push_locked(&self) -> Result<SyncReport, SyncError> {
		let started = now_ms();
		let mut report = SyncReport::default();
		let mut config = load_config(self.kv.as_ref()).await?;
		let device = device_id(self.kv.as_ref()).await?;
		let passphrase = self.passwords.get().await?;
		let snapshot = self.load_snapshot().await?;

		let gist_id = match self.resolve_gist_id(&mut config).await? {
			Some(id) => id,
			None => {
				let id =
					self.bootstrap(&snapshot, passphrase.as_deref(), &device, &mut report).await?;
				config.gist_id = Some(id);
				self.finish_round(&mut config, &device).await?;
				report.duration_ms = now_ms().saturating_sub(started);
				return Ok(report);
			}
		};

		let mut manifest = match self.read_manifest(&gist_id, passphrase.as_deref()).await? {
			ManifestState::Present(manifest) => *manifest,
			ManifestState::Absent => SyncManifest::new(&device, &self.app_version, now_ms()),
			ManifestState::Undecryptable => {
				if !snapshot.has_data() {
					return Err(SyncError::DecryptRefuseEmptyLocal);
				}
				warn!("Remote manifest unreadable; push rebuilds it from local state");
				SyncManifest::new(&device, &self.app_version, now_ms())
			}
		};

		// Upload every board whose content diverged from the remote entry.
		let mut dirty: Vec<Board> = Vec::new();
		for (i, board) in snapshot.boards.values().enumerate() {
			if i > 0 && i % 3 == 0 {
				tokio::task::yield_now().await;
			}
			let unchanged = manifest
				.boards
				.get(&board.id)
				.map(|info| !info.is_tombstone() && info.checksum == board.checksum())
				.unwrap_or(false);
			if !unchanged {
				dirty.push(board.clone());
			}
		}
		self.upload_boards(&gist_id, passphrase.as_deref(), &dirty, &mut manifest).await?;
		report.uploaded.boards = dirty.len();

		// Remote boards absent locally become tombstones.
		let absent: Vec<String> = manifest
			.live_boards()
			.filter(|(id, _)| !snapshot.boards.contains_key(id.as_str()))
			.map(|(id, _)| id.clone())
			.collect();
		for id in &absent {
			manifest.mark_deleted(id, &device, now_ms());
			report.deleted.boards += 1;
		}

		manifest.touch(&device, &self.app_version, now_ms());
		let sealed = self.seal(&manifest.to_json()?, &gist_id, passphrase.as_deref()).await?;
		let mut batch = BTreeMap::new();
		batch.insert(MANIFEST_FILE.to_string(), FileChange::Write(sealed));
		self.gateway.update_files(&gist_id, batch).await?;

		self.upload_workspace_and_prompts(&gist_id, passphrase.as_deref(), &snapshot, &mut report)
			.await?;
		self.pending.clear_all().await?;

		self.finish_round(&mut config, &device).await?;
		report.duration_ms = now_ms().saturating_sub(started);
		Ok(report)
	}

	async fn sync_paged_locked(&self) -> Result<SyncReport, SyncError> {
		let started = now_ms();
		let mut report = SyncReport::default();
		let config = load_config(self.kv.as_ref()).await?;
		let gist_id = config.gist_id.clone().ok_or(SyncError::NotConnected)?;
		let passphrase = self.passwords.get().await?;

		for ns in [&TASKS, &WORKFLOWS] {
			let stats = self.paged.sync_collection(ns, &gist_id, passphrase.as_deref()).await?;
			match ns.collection {
				PagedCollection::Tasks => {
					report.uploaded.tasks += stats.uploaded_items;
					report.downloaded.tasks += stats.downloaded_items;
				}
				PagedCollection::Workflows => {
					report.uploaded.workflows += stats.uploaded_items;
					report.downloaded.workflows += stats.downloaded_items;
				}
			}
		}
		report.duration_ms = now_ms().saturating_sub(started);
		Ok(report)
	}

	/// Probe the remote task storage format.
	pub async fn detect_remote_task_format(&self) -> Result<RemoteTaskFormat, SyncError> {
		let config = load_config(self.kv.as_ref()).await?;
		let gist_id = config.gist_id.ok_or(SyncError::NotConnected)?;
		self.paged.detect_remote_format(&TASKS, &gist_id).await
	}

	//////////
	// Gist lifecycle //
	//////////

	/// Create a fresh sync Gist and upload the full local snapshot to it.
	pub async fn create_new_gist(&self) -> Result<String, SyncError> {
		let _guard = self.sync_lock.try_lock().map_err(|_| SyncError::Busy)?;
		let mut config = load_config(self.kv.as_ref()).await?;
		let device = device_id(self.kv.as_ref()).await?;
		let passphrase = self.passwords.get().await?;
		let snapshot = self.load_snapshot().await?;
		let mut report = SyncReport::default();

		let id = self.bootstrap(&snapshot, passphrase.as_deref(), &device, &mut report).await?;
		config.gist_id = Some(id.clone());
		self.finish_round(&mut config, &device).await?;
		Ok(id)
	}

	/// Point the engine at an existing Gist. The next round treats this
	/// device as new (no last sync time).
	pub async fn switch_to_gist(&self, gist_id: &str) -> Result<(), SyncError> {
		self.gateway.get_gist(gist_id).await?;
		let mut config = load_config(self.kv.as_ref()).await?;
		config.gist_id = Some(gist_id.to_string());
		config.last_sync_time = None;
		save_config(self.kv.as_ref(), &config).await?;
		Ok(())
	}

	/// Delete a Gist outright. Disconnects when it was the configured one.
	pub async fn delete_gist(&self, gist_id: &str) -> Result<(), SyncError> {
		self.gateway.delete_gist(gist_id).await?;
		let mut config = load_config(self.kv.as_ref()).await?;
		if config.gist_id.as_deref() == Some(gist_id) {
			config.gist_id = None;
			config.last_sync_time = None;
			save_config(self.kv.as_ref(), &config).await?;
		}
		Ok(())
	}

	/// Forget the remote without touching it or local data.
	pub async fn disconnect(&self) -> Result<(), SyncError> {
		let mut config = load_config(self.kv.as_ref()).await?;
		config.gist_id = None;
		config.last_sync_time = None;
		config.last_sync_device_id = None;
		save_config(self.kv.as_ref(), &config).await?;
		Ok(())
	}

	/// Disconnect and drop all engine-side caches and pending records.
	/// Local documents are untouched.
	pub async fn reset(&self) -> Result<(), SyncError> {
		self.disconnect().await?;
		self.pending.clear_all().await?;
		self.kv.delete(keys::MASTER_INDEX).await?;
		self.kv.delete(keys::MASTER_GIST_ID).await?;
		self.kv.delete(keys::MEDIA_STATUS_CACHE).await?;
		Ok(())
	}

	//////////
	// Recycle bin //
	//////////

	/// List recoverable items: board tombstones from the manifest and
	/// media tombstones from the master index.
	pub async fn get_deleted_items(&self) -> Result<Vec<DeletedItem>, SyncError> {
		let config = load_config(self.kv.as_ref()).await?;
		let gist_id = config.gist_id.clone().ok_or(SyncError::NotConnected)?;
		let passphrase = self.passwords.get().await?;
		let now = now_ms();
		let retention = crate::limits::TOMBSTONE_RETENTION_MS;

		let mut items = Vec::new();
		if let ManifestState::Present(manifest) =
			self.read_manifest(&gist_id, passphrase.as_deref()).await?
		{
			for (id, info) in manifest.tombstones() {
				let deleted_at = info.deleted_at.unwrap_or(0);
				items.push(DeletedItem {
					item_type: DeletedItemType::Board,
					id: id.clone(),
					name: info.name.clone(),
					deleted_at,
					deleted_by: info.deleted_by.clone(),
					retention_remaining_ms: retention
						.saturating_sub(now.saturating_sub(deleted_at)),
				});
			}
		}

		self.media.router().ensure_loaded(&gist_id).await?;
		let index = self.media.router().snapshot().await?;
		for tombstone in &index.tombstones {
			items.push(DeletedItem {
				item_type: DeletedItemType::Media,
				id: tombstone.url.clone(),
				name: tombstone.filename.clone(),
				deleted_at: tombstone.deleted_at,
				deleted_by: tombstone.deleted_by.clone(),
				retention_remaining_ms: retention
					.saturating_sub(now.saturating_sub(tombstone.deleted_at)),
			});
		}

		items.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
		Ok(items)
	}

	/// Restore a tombstoned item: clear the tombstone and bring the
	/// retained file back.
	pub async fn restore_item(
		&self,
		item_type: DeletedItemType,
		id: &str,
	) -> Result<(), SyncError> {
		let config = load_config(self.kv.as_ref()).await?;
		let gist_id = config.gist_id.clone().ok_or(SyncError::NotConnected)?;
		let passphrase = self.passwords.get().await?;

		match item_type {
			DeletedItemType::Board => {
				let mut manifest =
					match self.read_manifest(&gist_id, passphrase.as_deref()).await? {
						ManifestState::Present(manifest) => *manifest,
						_ => return Err(SyncError::Other { message: "no manifest".to_string() }),
					};
				if !manifest.restore(id) {
					return Err(SyncError::Other {
						message: format!("no tombstone for board {}", id),
					});
				}
				let board = self
					.fetch_board(&gist_id, id, passphrase.as_deref())
					.await?
					.ok_or_else(|| SyncError::Other {
						message: format!("retained file for board {} is gone", id),
					})?;
				self.boards.save_board(&board).await?;
				self.pending.clear(id).await?;

				let sealed =
					self.seal(&manifest.to_json()?, &gist_id, passphrase.as_deref()).await?;
				let mut batch = BTreeMap::new();
				batch.insert(MANIFEST_FILE.to_string(), FileChange::Write(sealed));
				self.gateway.update_files(&gist_id, batch).await?;
				Ok(())
			}
			DeletedItemType::Media => {
				self.media.router().ensure_loaded(&gist_id).await?;
				self.media.restore_media(id).await
			}
		}
	}

	/// Drop an item and its retained file for good.
	pub async fn permanently_delete(
		&self,
		item_type: DeletedItemType,
		id: &str,
	) -> Result<(), SyncError> {
		let config = load_config(self.kv.as_ref()).await?;
		let gist_id = config.gist_id.clone().ok_or(SyncError::NotConnected)?;
		let passphrase = self.passwords.get().await?;

		match item_type {
			DeletedItemType::Board => {
				let mut manifest =
					match self.read_manifest(&gist_id, passphrase.as_deref()).await? {
						ManifestState::Present(manifest) => *manifest,
						_ => return Err(SyncError::Other { message: "no manifest".to_string() }),
					};
				manifest.remove(id);
				let sealed =
					self.seal(&manifest.to_json()?, &gist_id, passphrase.as_deref()).await?;
				let mut batch = BTreeMap::new();
				batch.insert(board_filename(id), FileChange::Delete);
				batch.insert(MANIFEST_FILE.to_string(), FileChange::Write(sealed));
				self.gateway.update_files(&gist_id, batch).await?;
				Ok(())
			}
			DeletedItemType::Media => {
				self.media.router().ensure_loaded(&gist_id).await?;
				let tombstone =
					self.media.router().find_tombstone(id).await?.ok_or_else(|| {
						SyncError::Other { message: format!("no tombstone for {}", id) }
					})?;
				if let Some(shard_gist) =
					self.media.router().gist_id_for_alias(&tombstone.shard_id).await?
				{
					let names = vec![tombstone.filename.clone()];
					if let Err(e) =
						crate::gateway::delete_gist_files(self.gateway.as_ref(), &shard_gist, &names)
							.await
					{
						if !matches!(e, GatewayError::NotFound) {
							return Err(e.into());
						}
					}
				}
				let url = id.to_string();
				self.media
					.router()
					.mutate(move |index| {
						index.remove_tombstone(&url);
					})
					.await?;
				self.media.router().flush().await
			}
		}
	}

	/// Permanently delete every tombstoned item.
	pub async fn empty_recycle_bin(&self) -> Result<usize, SyncError> {
		let items = self.get_deleted_items().await?;
		let mut removed = 0;
		for item in items {
			match self.permanently_delete(item.item_type, &item.id).await {
				Ok(()) => removed += 1,
				Err(e) => warn!("Failed to purge {}: {}", item.id, e),
			}
		}
		Ok(removed)
	}

	//////////
	// Host hooks //
	//////////

	/// Host-side board deletion: removes the local copy and records the
	/// pending deletion so downloads do not resurrect it before the
	/// tombstone reaches remote.
	pub async fn delete_board_locally(&self, board_id: &str) -> Result<(), SyncError> {
		self.boards.delete_board(board_id).await?;
		self.pending.record(board_id, now_ms()).await?;
		Ok(())
	}

	//////////
	// Internals //
	//////////

	async fn load_snapshot(&self) -> Result<LocalSnapshot, SyncError> {
		let boards = self
			.boards
			.load_all_boards()
			.await?
			.into_iter()
			.map(|b| (b.id.clone(), b))
			.collect();
		let prompts = match self.kv.get(keys::PROMPTS).await? {
			Some(json) => serde_json::from_str(&json).unwrap_or_default(),
			None => PromptsData::default(),
		};
		let state = self.boards.load_state().await?;
		let task_count = self.queue.get_all(PagedCollection::Tasks).await?.len();
		Ok(LocalSnapshot { boards, prompts, state, task_count })
	}

	async fn resolve_gist_id(
		&self,
		config: &mut SyncConfig,
	) -> Result<Option<String>, SyncError> {
		if let Some(id) = config.gist_id.clone() {
			return Ok(Some(id));
		}
		if let Some(id) = find_sync_gist(self.gateway.as_ref()).await? {
			info!("Discovered existing sync Gist {}", id);
			config.gist_id = Some(id.clone());
			return Ok(Some(id));
		}
		Ok(None)
	}

	async fn finish_round(
		&self,
		config: &mut SyncConfig,
		device: &str,
	) -> Result<(), SyncError> {
		config.enabled = true;
		config.last_sync_time = Some(now_ms());
		config.last_sync_device_id = Some(device.to_string());
		save_config(self.kv.as_ref(), config).await?;
		Ok(())
	}

	async fn seal(
		&self,
		plaintext: &str,
		gist_id: &str,
		passphrase: Option<&str>,
	) -> Result<String, SyncError> {
		let key = match passphrase {
			Some(p) => KeySource::Passphrase(p),
			None => KeySource::GistId(gist_id),
		};
		Ok(self.crypto.encrypt(plaintext, key).await?)
	}

	async fn read_manifest(
		&self,
		gist_id: &str,
		passphrase: Option<&str>,
	) -> Result<ManifestState, SyncError> {
		let gist = self.gateway.get_gist(gist_id).await?;
		if !gist.has_file(MANIFEST_FILE) {
			return Ok(ManifestState::Absent);
		}
		let content = self.gateway.get_file_content(gist_id, MANIFEST_FILE).await?;
		match self.crypto.decrypt_or_passthrough(&content, gist_id, passphrase).await {
			Ok(plain) => match SyncManifest::parse(&plain) {
				Ok(manifest) => Ok(ManifestState::Present(Box::new(manifest))),
				Err(e) => {
					warn!("Manifest did not parse: {}", e);
					Ok(ManifestState::Undecryptable)
				}
			},
			Err(CryptoError::NeedsPassword) => Err(CryptoError::NeedsPassword.into()),
			Err(e) => {
				warn!("Manifest did not decrypt: {}", e);
				Ok(ManifestState::Undecryptable)
			}
		}
	}

	async fn fetch_board(
		&self,
		gist_id: &str,
		board_id: &str,
		passphrase: Option<&str>,
	) -> Result<Option<Board>, SyncError> {
		let content = match self.gateway.get_file_content(gist_id, &board_filename(board_id)).await
		{
			Ok(content) => content,
			Err(GatewayError::NotFound) => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		let plain = self.crypto.decrypt_or_passthrough(&content, gist_id, passphrase).await?;
		match serde_json::from_str::<Board>(&plain) {
			Ok(board) => Ok(Some(board)),
			Err(e) => {
				warn!("Board file {} did not parse: {}", board_id, e);
				Ok(None)
			}
		}
	}

	/// Serialize, encrypt and upload a set of boards, updating the
	/// manifest entries in place. Yields every few boards to stay
	/// cooperative while re-serializing large element lists.
	async fn upload_boards(
		&self,
		gist_id: &str,
		passphrase: Option<&str>,
		boards: &[Board],
		manifest: &mut SyncManifest,
	) -> Result<(), SyncError> {
		if boards.is_empty() {
			return Ok(());
		}
		let mut batch: BTreeMap<String, FileChange> = BTreeMap::new();
		for (i, board) in boards.iter().enumerate() {
			if i > 0 && i % 3 == 0 {
				tokio::task::yield_now().await;
			}
			let json = serde_json::to_string(board)?;
			batch.insert(
				board_filename(&board.id),
				FileChange::Write(self.seal(&json, gist_id, passphrase).await?),
			);
			manifest.upsert_board(board);
		}
		self.gateway.update_files(gist_id, batch).await?;
		Ok(())
	}

	fn build_workspace(&self, snapshot: &LocalSnapshot, folders: Vec<crate::types::Folder>) -> WorkspaceData {
		WorkspaceData {
			folders,
			boards: snapshot.boards.values().map(BoardMeta::from).collect(),
			current_board_id: snapshot.state.current_board_id.clone(),
			expanded_folders: snapshot.state.expanded_folders.clone(),
			updated_at: now_ms(),
		}
	}

	async fn upload_workspace_and_prompts(
		&self,
		gist_id: &str,
		passphrase: Option<&str>,
		snapshot: &LocalSnapshot,
		report: &mut SyncReport,
	) -> Result<(), SyncError> {
		let folders = self.boards.load_all_folders().await?;
		let workspace = self.build_workspace(snapshot, folders);
		let mut batch: BTreeMap<String, FileChange> = BTreeMap::new();
		batch.insert(
			WORKSPACE_FILE.to_string(),
			FileChange::Write(
				self.seal(&serde_json::to_string(&workspace)?, gist_id, passphrase).await?,
			),
		);
		if !snapshot.prompts.is_empty() {
			batch.insert(
				PROMPTS_FILE.to_string(),
				FileChange::Write(
					self.seal(&serde_json::to_string(&snapshot.prompts)?, gist_id, passphrase)
						.await?,
				),
			);
			report.uploaded.prompts = snapshot.prompts.len();
		}
		self.gateway.update_files(gist_id, batch).await?;
		Ok(())
	}

	/// Remote prompts replace local ones when strictly newer. Returns the
	/// number of entries taken.
	async fn apply_remote_prompts(
		&self,
		gist_id: &str,
		passphrase: Option<&str>,
		snapshot: &LocalSnapshot,
	) -> Result<usize, SyncError> {
		let content = match self.gateway.get_file_content(gist_id, PROMPTS_FILE).await {
			Ok(content) => content,
			Err(GatewayError::NotFound) => return Ok(0),
			Err(e) => return Err(e.into()),
		};
		let plain = self.crypto.decrypt_or_passthrough(&content, gist_id, passphrase).await?;
		let remote: PromptsData = match serde_json::from_str(&plain) {
			Ok(data) => data,
			Err(e) => {
				warn!("Remote prompts did not parse: {}", e);
				return Ok(0);
			}
		};
		if remote.updated_at > snapshot.prompts.updated_at {
			let count = remote.len();
			self.kv.set(keys::PROMPTS, &serde_json::to_string(&remote)?).await?;
			return Ok(count);
		}
		Ok(0)
	}

	async fn apply_remote_workspace(
		&self,
		gist_id: &str,
		passphrase: Option<&str>,
	) -> Result<(), SyncError> {
		let content = match self.gateway.get_file_content(gist_id, WORKSPACE_FILE).await {
			Ok(content) => content,
			Err(GatewayError::NotFound) => return Ok(()),
			Err(e) => return Err(e.into()),
		};
		let plain = self.crypto.decrypt_or_passthrough(&content, gist_id, passphrase).await?;
		let workspace: WorkspaceData = match serde_json::from_str(&plain) {
			Ok(data) => data,
			Err(e) => {
				warn!("Remote workspace did not parse: {}", e);
				return Ok(());
			}
		};
		for folder in &workspace.folders {
			self.boards.save_folder(folder).await?;
		}
		let mut state = self.boards.load_state().await?;
		state.expanded_folders = workspace.expanded_folders;
		self.boards.save_state(&state).await?;
		Ok(())
	}

	/// Adopt the remote current-board pointer when that board exists
	/// locally after the round.
	async fn reconcile_current_board(
		&self,
		gist_id: &str,
		passphrase: Option<&str>,
	) -> Result<(), SyncError> {
		let content = match self.gateway.get_file_content(gist_id, WORKSPACE_FILE).await {
			Ok(content) => content,
			Err(_) => return Ok(()),
		};
		let plain = self.crypto.decrypt_or_passthrough(&content, gist_id, passphrase).await?;
		let workspace: WorkspaceData = match serde_json::from_str(&plain) {
			Ok(data) => data,
			Err(_) => return Ok(()),
		};
		if let Some(remote_current) = workspace.current_board_id {
			if self.boards.load_board(&remote_current).await?.is_some() {
				let mut state = self.boards.load_state().await?;
				state.current_board_id = Some(remote_current);
				self.boards.save_state(&state).await?;
			}
		}
		Ok(())
	}

	async fn run_paged_syncs(
		&self,
		gist_id: &str,
		passphrase: Option<&str>,
		report: &mut SyncReport,
	) {
		for ns in [&TASKS, &WORKFLOWS] {
			match self.paged.sync_collection(ns, gist_id, passphrase).await {
				Ok(stats) => match ns.collection {
					PagedCollection::Tasks => {
						report.uploaded.tasks += stats.uploaded_items;
						report.downloaded.tasks += stats.downloaded_items;
					}
					PagedCollection::Workflows => {
						report.uploaded.workflows += stats.uploaded_items;
						report.downloaded.workflows += stats.downloaded_items;
					}
				},
				// Paged failures never fail the round; the manifest has
				// already committed and the next round reconciles.
				Err(e) => {
					warn!("Paged sync of {} failed: {}", ns.index_file, e);
					report.errors.push(format!("{}: {}", ns.index_file, e));
				}
			}
		}
	}

	/// Fire-and-forget media sync for the current board's referenced
	/// blobs. The round does not wait for it.
	async fn queue_media_sync(&self, gist_id: &str, snapshot: &LocalSnapshot) {
		let current = match &snapshot.state.current_board_id {
			Some(id) => match snapshot.boards.get(id) {
				Some(board) => board,
				None => return,
			},
			None => return,
		};

		if let Err(e) = self.media.router().ensure_loaded(gist_id).await {
			warn!("Media router unavailable: {}", e);
			return;
		}

		let mut batch = Vec::new();
		for url in collect_media_refs(current) {
			match self.blobs.get_cache_info(&url).await {
				Ok(Some(info)) => {
					let media_type = if info.mime_type.starts_with("video") {
						MediaType::Video
					} else {
						MediaType::Image
					};
					batch.push(MediaBlob {
						url,
						media_type,
						size: info.size,
						mime_type: info.mime_type,
					});
				}
				_ => continue,
			}
		}
		if !batch.is_empty() {
			self.media_worker.queue_upload(batch);
		}
	}

	/// Bootstrap: create a fresh Gist and upload the full local snapshot.
	async fn bootstrap(
		&self,
		snapshot: &LocalSnapshot,
		passphrase: Option<&str>,
		device: &str,
		report: &mut SyncReport,
	) -> Result<String, SyncError> {
		// The master index is plaintext, so it can be the creation file;
		// everything encrypted follows once the Gist ID (and with it the
		// default key) exists.
		let mut initial = BTreeMap::new();
		initial.insert(
			MASTER_INDEX_FILE.to_string(),
			crate::shard::MasterIndex::default().to_json()?,
		);
		let gist = self.gateway.create_gist(GIST_DESCRIPTION, initial).await?;
		info!("Created sync Gist {}", gist.id);

		self.upload_snapshot_to(&gist.id, snapshot, passphrase, device, report).await?;
		Ok(gist.id)
	}

	/// Write the complete local snapshot into a Gist: boards, manifest,
	/// workspace, prompts, then paged collections.
	async fn upload_snapshot_to(
		&self,
		gist_id: &str,
		snapshot: &LocalSnapshot,
		passphrase: Option<&str>,
		device: &str,
		report: &mut SyncReport,
	) -> Result<(), SyncError> {
		let mut manifest = SyncManifest::new(device, &self.app_version, now_ms());
		let boards: Vec<Board> = snapshot.boards.values().cloned().collect();
		self.upload_boards(gist_id, passphrase, &boards, &mut manifest).await?;
		report.uploaded.boards = boards.len();

		manifest.touch(device, &self.app_version, now_ms());
		let sealed = self.seal(&manifest.to_json()?, gist_id, passphrase).await?;
		let mut batch = BTreeMap::new();
		batch.insert(MANIFEST_FILE.to_string(), FileChange::Write(sealed));
		self.gateway.update_files(gist_id, batch).await?;

		self.upload_workspace_and_prompts(gist_id, passphrase, snapshot, report).await?;
		self.run_paged_syncs(gist_id, passphrase, report).await;
		Ok(())
	}
}

/// URLs referenced by a board's elements (image/video sources).
fn collect_media_refs(board: &Board) -> Vec<String> {
	const URL_KEYS: [&str; 4] = ["url", "src", "thumbnailUrl", "imageUrl"];
	let mut urls = Vec::new();
	for element in &board.elements {
		if let Some(obj) = element.as_object() {
			for key in URL_KEYS {
				if let Some(value) = obj.get(key).and_then(|v| v.as_str()) {
					if value.starts_with("http://") || value.starts_with("https://") {
						if !urls.contains(&value.to_string()) {
							urls.push(value.to_string());
						}
					}
				}
			}
		}
	}
	urls
}


// vim: ts=4
