//! Core domain types: local documents, sync outcomes, recycle bin entries.
//!
//! Remote file schemas live next to the code that owns them (`manifest`,
//! `paged`, `shard`); this module holds the records the host application
//! reads and writes locally, plus the result types returned by sync rounds.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::element_checksum;

/// A drawing board. Elements are opaque records, each carrying an `id`
/// the merge logic keys on; the engine never interprets the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub folder_id: Option<String>,
	#[serde(default)]
	pub order: i64,
	#[serde(default)]
	pub viewport: Value,
	#[serde(default)]
	pub theme: String,
	pub created_at: u64,
	pub updated_at: u64,
	#[serde(default)]
	pub elements: Vec<Value>,
}

impl Board {
	/// Checksum of the element list; equal checksums on two devices mean
	/// the boards carry identical logical content.
	pub fn checksum(&self) -> String {
		element_checksum(&self.elements)
	}
}

/// A folder in the workspace tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub parent_id: Option<String>,
	#[serde(default)]
	pub order: i64,
	pub created_at: u64,
	pub updated_at: u64,
}

/// Board metadata as carried by the workspace file (no element bodies).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardMeta {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub folder_id: Option<String>,
	#[serde(default)]
	pub order: i64,
	pub updated_at: u64,
}

impl From<&Board> for BoardMeta {
	fn from(b: &Board) -> Self {
		BoardMeta {
			id: b.id.clone(),
			name: b.name.clone(),
			folder_id: b.folder_id.clone(),
			order: b.order,
			updated_at: b.updated_at,
		}
	}
}

/// Contents of `workspace.json`: the folder tree, board metadata, the
/// current-board pointer and the expanded-folder set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceData {
	pub folders: Vec<Folder>,
	pub boards: Vec<BoardMeta>,
	pub current_board_id: Option<String>,
	pub expanded_folders: Vec<String>,
	pub updated_at: u64,
}

/// Locally persisted workspace UI state: which board is open and which
/// folders are expanded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalWorkspaceState {
	pub current_board_id: Option<String>,
	pub expanded_folders: Vec<String>,
}

/// One prompt history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptEntry {
	pub id: String,
	pub content: String,
	pub created_at: u64,
	#[serde(default)]
	pub updated_at: u64,
}

/// Contents of `prompts.json`: three ordered history arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptsData {
	pub general: Vec<PromptEntry>,
	pub video: Vec<PromptEntry>,
	pub image: Vec<PromptEntry>,
	pub updated_at: u64,
}

impl PromptsData {
	pub fn is_empty(&self) -> bool {
		self.general.is_empty() && self.video.is_empty() && self.image.is_empty()
	}

	pub fn len(&self) -> usize {
		self.general.len() + self.video.len() + self.image.len()
	}
}

/// Task / workflow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
	Pending,
	Processing,
	Completed,
	Failed,
	Cancelled,
}

impl TaskStatus {
	/// Terminal items never change content again, so equal sync versions
	/// on both sides mean nothing needs to move.
	pub fn is_terminal(&self) -> bool {
		matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
	}
}

impl Default for TaskStatus {
	fn default() -> Self {
		TaskStatus::Pending
	}
}

/// A task or workflow record. Both collections share this shape; they only
/// differ in which remote file namespace they sync through.
///
/// Fields beyond the ones named here (chat responses, tool call
/// transcripts, error details, …) ride in `rest` and are treated as
/// opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
	pub id: String,
	#[serde(rename = "type", default)]
	pub record_type: String,
	#[serde(default)]
	pub status: TaskStatus,
	pub created_at: u64,
	pub updated_at: u64,
	#[serde(default)]
	pub sync_version: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prompt: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub thumbnail_url: Option<String>,
	#[serde(flatten)]
	pub rest: Map<String, Value>,
}

impl TaskRecord {
	/// Short preview of the prompt for index entries (UI list rendering).
	pub fn prompt_preview(&self) -> Option<String> {
		self.prompt.as_ref().map(|p| {
			if p.chars().count() > 80 {
				let cut: String = p.chars().take(80).collect();
				format!("{}…", cut)
			} else {
				p.clone()
			}
		})
	}
}

/// Media kind for synced blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
	Image,
	Video,
}

/// A media blob referenced by a stable URL (its identity).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
	pub url: String,
	#[serde(rename = "type")]
	pub media_type: MediaType,
	pub size: u64,
	pub mime_type: String,
}

/// Registered device as recorded in the manifest's device registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
	pub device_id: String,
	#[serde(default)]
	pub platform: String,
	#[serde(default)]
	pub app_version: String,
	pub last_seen_at: u64,
}

//////////
// Sync round results //
//////////

/// Per-category transfer counters for one sync round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
	pub boards: usize,
	pub prompts: usize,
	pub tasks: usize,
	pub workflows: usize,
	pub media: usize,
}

impl SyncCounts {
	pub fn total(&self) -> usize {
		self.boards + self.prompts + self.tasks + self.workflows + self.media
	}
}

/// One conflicted board that went through element-level merge.
#[derive(Debug, Clone)]
pub struct ConflictReport {
	pub board_id: String,
	pub board_name: String,
	/// True when the merged board was produced and uploaded
	pub merged: bool,
	/// IDs of elements where both sides diverged (local won)
	pub conflicting_elements: Vec<String>,
}

/// Why the safety gate withheld part of a delete batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyWarning {
	/// Applying the batch would have emptied a non-empty local store
	BlockAllDelete { proposed: usize },

	/// Deletions withheld because this device has never completed a sync
	NewDeviceProtect { proposed: usize },

	/// The currently-open board was in the delete batch
	CurrentBoardProtect { board_id: String },

	/// More than half of local boards were proposed for deletion; the
	/// batch is withheld pending user confirmation
	BulkDelete { proposed: usize, total: usize },

	/// Remote manifest lists zero boards while local has data
	EmptyRemoteManifest { local_boards: usize },
}

impl std::fmt::Display for SafetyWarning {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SafetyWarning::BlockAllDelete { proposed } => {
				write!(f, "Refused to delete all {} local boards", proposed)
			}
			SafetyWarning::NewDeviceProtect { proposed } => {
				write!(f, "Withheld {} deletions before first successful sync", proposed)
			}
			SafetyWarning::CurrentBoardProtect { board_id } => {
				write!(f, "Refused to delete the currently open board {}", board_id)
			}
			SafetyWarning::BulkDelete { proposed, total } => {
				write!(f, "Withheld bulk delete of {}/{} boards pending confirmation", proposed, total)
			}
			SafetyWarning::EmptyRemoteManifest { local_boards } => {
				write!(
					f,
					"Remote manifest lists no boards while local has {}; treating as possibly corrupt",
					local_boards
				)
			}
		}
	}
}

/// Reason an item was skipped during a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
	/// Deletion withheld: device has not completed a first sync
	NewDevice,
	/// Deletion withheld: would have emptied the local store
	AllDeleteBlocked,
	/// Deletion withheld: board is currently open
	CurrentBoard,
	/// Deletion withheld: part of an unconfirmed bulk delete
	BulkDelete,
	/// Download skipped: local copy is newer
	LocalNewer,
	/// Download skipped: board was deleted locally after the remote write
	PendingDeletion,
	/// Transfer skipped: terminal item with matching sync version
	TerminalUnchanged,
}

/// An item the round deliberately did not touch, and why.
#[derive(Debug, Clone)]
pub struct SkippedItem {
	pub id: String,
	pub name: String,
	pub reason: SkipReason,
}

/// Detailed report of a completed round.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
	pub uploaded: SyncCounts,
	pub downloaded: SyncCounts,
	pub deleted: SyncCounts,
	pub conflicts: Vec<ConflictReport>,
	pub safety_warnings: Vec<SafetyWarning>,
	pub skipped_items: Vec<SkippedItem>,
	/// Non-fatal errors (media/paged sub-syncs that failed after the
	/// manifest committed)
	pub errors: Vec<String>,
	pub duration_ms: u64,
}

/// Outcome of a sync round.
///
/// A round either completes (possibly with warnings and skipped items in
/// its report), stops because the remote needs a passphrase this device
/// does not have, or fails outright.
#[derive(Debug)]
pub enum SyncOutcome {
	Success(SyncReport),
	NeedsPassword,
	Failed(crate::error::SyncError),
}

impl SyncOutcome {
	pub fn is_success(&self) -> bool {
		matches!(self, SyncOutcome::Success(_))
	}

	pub fn needs_password(&self) -> bool {
		matches!(self, SyncOutcome::NeedsPassword)
	}

	pub fn report(&self) -> Option<&SyncReport> {
		match self {
			SyncOutcome::Success(report) => Some(report),
			_ => None,
		}
	}
}

//////////
// Recycle bin //
//////////

/// Type of a soft-deleted item in the recycle bin listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedItemType {
	Board,
	Media,
}

/// One recoverable item: a board tombstone from the manifest or a media
/// tombstone from the master index.
#[derive(Debug, Clone)]
pub struct DeletedItem {
	pub item_type: DeletedItemType,
	pub id: String,
	pub name: String,
	pub deleted_at: u64,
	pub deleted_by: Option<String>,
	/// Milliseconds until retention expires and the item becomes
	/// eligible for hard delete (zero when already expired)
	pub retention_remaining_ms: u64,
}

/// Remote task storage format, as probed from well-known filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTaskFormat {
	Paged,
	Legacy,
	None,
}


// vim: ts=4
