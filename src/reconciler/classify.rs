//! Board change classification for a two-way round.

use std::collections::BTreeMap;

use crate::manifest::SyncManifest;
use crate::types::{Board, SkipReason, SkippedItem};

/// Directions computed for one round.
#[derive(Debug, Default)]
pub struct BoardChanges {
	/// Local board IDs to upload
	pub to_upload: Vec<String>,
	/// Remote board IDs to download
	pub to_download: Vec<String>,
	/// Board IDs modified on both sides since the last sync
	pub conflicts: Vec<String>,
	/// Local board IDs tombstoned on remote
	pub to_delete_locally: Vec<String>,
	/// Annotations for boards deliberately left alone
	pub skipped: Vec<SkippedItem>,
}

/// Classify every board on either side into a direction.
///
/// `last_sync_time == None` marks a first sync: there is no common
/// ancestor, so instead of conflicting, the newer side wins (an empty
/// local board always defers to remote).
pub fn compare_board_changes(
	local: &BTreeMap<String, Board>,
	remote: &SyncManifest,
	last_sync_time: Option<u64>,
) -> BoardChanges {
	let mut changes = BoardChanges::default();

	for (id, board) in local {
		let info = match remote.boards.get(id) {
			None => {
				changes.to_upload.push(id.clone());
				continue;
			}
			Some(info) => info,
		};

		if info.is_tombstone() {
			changes.to_delete_locally.push(id.clone());
			continue;
		}

		if info.checksum == board.checksum() {
			continue;
		}

		match last_sync_time {
			None => {
				if board.elements.is_empty() || info.updated_at > board.updated_at {
					changes.to_download.push(id.clone());
				} else {
					changes.to_upload.push(id.clone());
				}
			}
			Some(t) => {
				let local_modified = board.updated_at > t;
				let remote_modified = info.updated_at > t;
				if local_modified && remote_modified {
					changes.conflicts.push(id.clone());
				} else if local_modified {
					changes.to_upload.push(id.clone());
				} else if remote_modified {
					changes.to_download.push(id.clone());
				} else if info.updated_at >= board.updated_at {
					// Neither side claims a post-sync write yet content
					// differs; trust the newer timestamp, remote on a tie
					// (it is the already-committed state).
					changes.to_download.push(id.clone());
				} else {
					changes.to_upload.push(id.clone());
				}
			}
		}
	}

	for (id, _) in remote.live_boards() {
		if !local.contains_key(id) {
			changes.to_download.push(id.clone());
		}
	}

	changes
}

/// Classify for a one-way pull: remote is authoritative, but a strictly
/// newer local copy is kept (annotated, not overwritten).
pub fn compare_for_pull(
	local: &BTreeMap<String, Board>,
	remote: &SyncManifest,
) -> (Vec<String>, Vec<SkippedItem>) {
	let mut to_download = Vec::new();
	let mut skipped = Vec::new();

	for (id, info) in remote.live_boards() {
		match local.get(id) {
			None => to_download.push(id.clone()),
			Some(board) => {
				if info.checksum == board.checksum() {
					continue;
				}
				if board.updated_at > info.updated_at {
					skipped.push(SkippedItem {
						id: id.clone(),
						name: board.name.clone(),
						reason: SkipReason::LocalNewer,
					});
				} else {
					to_download.push(id.clone());
				}
			}
		}
	}

	(to_download, skipped)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::types::Board;
	use serde_json::{json, Value};

	fn board(id: &str, updated_at: u64, elements: Vec<Value>) -> Board {
		Board {
			id: id.to_string(),
			name: id.to_string(),
			folder_id: None,
			order: 0,
			viewport: Value::Null,
			theme: String::new(),
			created_at: 1,
			updated_at,
			elements,
		}
	}

	fn local_map(boards: Vec<Board>) -> BTreeMap<String, Board> {
		boards.into_iter().map(|b| (b.id.clone(), b)).collect()
	}

	fn manifest_with(boards: Vec<&Board>) -> SyncManifest {
		let mut manifest = SyncManifest::new("other", "1.0", 0);
		for b in boards {
			manifest.upsert_board(b);
		}
		manifest
	}

	#[test]
	fn local_only_uploads_remote_only_downloads() {
		let local = local_map(vec![board("a", 10, vec![json!({"id": "e"})])]);
		let remote_board = board("b", 10, vec![json!({"id": "e"})]);
		let remote = manifest_with(vec![&remote_board]);

		let changes = compare_board_changes(&local, &remote, Some(5));
		assert_eq!(changes.to_upload, vec!["a".to_string()]);
		assert_eq!(changes.to_download, vec!["b".to_string()]);
		assert!(changes.conflicts.is_empty());
	}

	#[test]
	fn equal_checksum_is_noop() {
		let b = board("a", 10, vec![json!({"id": "e"})]);
		let local = local_map(vec![b.clone()]);
		let remote = manifest_with(vec![&b]);
		let changes = compare_board_changes(&local, &remote, Some(5));
		assert!(changes.to_upload.is_empty());
		assert!(changes.to_download.is_empty());
	}

	#[test]
	fn tombstone_deletes_locally() {
		let b = board("a", 10, vec![json!({"id": "e"})]);
		let local = local_map(vec![b.clone()]);
		let mut remote = manifest_with(vec![&b]);
		remote.mark_deleted("a", "other", 20);

		let changes = compare_board_changes(&local, &remote, Some(5));
		assert_eq!(changes.to_delete_locally, vec!["a".to_string()]);
		// A tombstoned remote board is not re-downloaded.
		assert!(changes.to_download.is_empty());
	}

	#[test]
	fn both_modified_since_last_sync_conflicts() {
		let local_b = board("a", 30, vec![json!({"id": "x"})]);
		let remote_b = board("a", 25, vec![json!({"id": "y"})]);
		let local = local_map(vec![local_b]);
		let remote = manifest_with(vec![&remote_b]);

		let changes = compare_board_changes(&local, &remote, Some(20));
		assert_eq!(changes.conflicts, vec!["a".to_string()]);
	}

	#[test]
	fn first_sync_empty_local_prefers_remote() {
		let local_b = board("a", 100, vec![]);
		let remote_b = board("a", 10, vec![json!({"id": "y"})]);
		let local = local_map(vec![local_b]);
		let remote = manifest_with(vec![&remote_b]);

		let changes = compare_board_changes(&local, &remote, None);
		assert_eq!(changes.to_download, vec!["a".to_string()]);
	}

	#[test]
	fn first_sync_nonempty_picks_newer() {
		let local_b = board("a", 100, vec![json!({"id": "x"})]);
		let remote_b = board("a", 10, vec![json!({"id": "y"})]);
		let local = local_map(vec![local_b]);
		let remote = manifest_with(vec![&remote_b]);

		let changes = compare_board_changes(&local, &remote, None);
		assert_eq!(changes.to_upload, vec!["a".to_string()]);
	}

	#[test]
	fn pull_keeps_newer_local_with_annotation() {
		let local_b = board("a", 100, vec![json!({"id": "x"})]);
		let remote_b = board("a", 10, vec![json!({"id": "y"})]);
		let local = local_map(vec![local_b]);
		let remote = manifest_with(vec![&remote_b]);

		let (downloads, skipped) = compare_for_pull(&local, &remote);
		assert!(downloads.is_empty());
		assert_eq!(skipped.len(), 1);
		assert_eq!(skipped[0].reason, SkipReason::LocalNewer);
	}

	#[test]
	fn pull_downloads_remote_newer_and_missing() {
		let local_b = board("a", 10, vec![json!({"id": "x"})]);
		let remote_a = board("a", 100, vec![json!({"id": "y"})]);
		let remote_b = board("b", 5, vec![json!({"id": "z"})]);
		let local = local_map(vec![local_b]);
		let remote = manifest_with(vec![&remote_a, &remote_b]);

		let (downloads, skipped) = compare_for_pull(&local, &remote);
		assert_eq!(downloads.len(), 2);
		assert!(skipped.is_empty());
	}
}

// vim: ts=4
