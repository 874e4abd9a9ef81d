//! The sync manifest: root file of a synced Gist.
//!
//! Lists every board's sync metadata (name, timestamp, checksum), the
//! device registry, and deletion records. A board entry with `deletedAt`
//! set is a tombstone: the board file stays in the Gist until retention
//! expires so the board can be restored from the recycle bin.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::limits::TOMBSTONE_RETENTION_MS;
use crate::types::{Board, DeviceInfo};

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 2;

/// Per-board sync metadata within the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSyncInfo {
	pub name: String,
	pub updated_at: u64,
	pub checksum: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deleted_at: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deleted_by: Option<String>,
}

impl BoardSyncInfo {
	pub fn is_tombstone(&self) -> bool {
		self.deleted_at.is_some()
	}
}

/// The manifest file (`manifest.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncManifest {
	pub version: u32,
	pub app_version: String,
	pub created_at: u64,
	pub updated_at: u64,
	pub device_id: String,
	pub devices: BTreeMap<String, DeviceInfo>,
	pub boards: BTreeMap<String, BoardSyncInfo>,
	/// Pre-shard media registry; read-only, kept for older devices
	pub synced_media: BTreeMap<String, Value>,
	pub deleted_prompts: Vec<String>,
	pub deleted_tasks: Vec<String>,
}

impl Default for SyncManifest {
	fn default() -> Self {
		SyncManifest {
			version: MANIFEST_VERSION,
			app_version: String::new(),
			created_at: 0,
			updated_at: 0,
			device_id: String::new(),
			devices: BTreeMap::new(),
			boards: BTreeMap::new(),
			synced_media: BTreeMap::new(),
			deleted_prompts: Vec::new(),
			deleted_tasks: Vec::new(),
		}
	}
}

/// Gist filename for a board's content file.
pub fn board_filename(board_id: &str) -> String {
	format!("board_{}.json", board_id)
}

impl SyncManifest {
	pub fn new(device_id: &str, app_version: &str, now: u64) -> Self {
		let mut manifest = SyncManifest {
			version: MANIFEST_VERSION,
			app_version: app_version.to_string(),
			created_at: now,
			updated_at: now,
			device_id: device_id.to_string(),
			..SyncManifest::default()
		};
		manifest.register_device(device_id, app_version, now);
		manifest
	}

	pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}

	/// Record the writing device and bump the manifest timestamp.
	pub fn touch(&mut self, device_id: &str, app_version: &str, now: u64) {
		self.device_id = device_id.to_string();
		self.updated_at = now;
		self.register_device(device_id, app_version, now);
	}

	fn register_device(&mut self, device_id: &str, app_version: &str, now: u64) {
		let entry = self.devices.entry(device_id.to_string()).or_insert_with(|| DeviceInfo {
			device_id: device_id.to_string(),
			platform: std::env::consts::OS.to_string(),
			app_version: app_version.to_string(),
			last_seen_at: now,
		});
		entry.last_seen_at = now;
		entry.app_version = app_version.to_string();
	}

	/// Live (non-tombstoned) board entries.
	pub fn live_boards(&self) -> impl Iterator<Item = (&String, &BoardSyncInfo)> {
		self.boards.iter().filter(|(_, info)| !info.is_tombstone())
	}

	pub fn live_board_count(&self) -> usize {
		self.live_boards().count()
	}

	/// Tombstoned board entries.
	pub fn tombstones(&self) -> impl Iterator<Item = (&String, &BoardSyncInfo)> {
		self.boards.iter().filter(|(_, info)| info.is_tombstone())
	}

	/// Record (or refresh) a live board entry from local content.
	pub fn upsert_board(&mut self, board: &Board) {
		self.boards.insert(
			board.id.clone(),
			BoardSyncInfo {
				name: board.name.clone(),
				updated_at: board.updated_at,
				checksum: board.checksum(),
				deleted_at: None,
				deleted_by: None,
			},
		);
	}

	/// Turn a board entry into a tombstone. The board file itself stays in
	/// the Gist until retention expires.
	pub fn mark_deleted(&mut self, board_id: &str, device_id: &str, now: u64) -> bool {
		match self.boards.get_mut(board_id) {
			Some(info) => {
				info.deleted_at = Some(now);
				info.deleted_by = Some(device_id.to_string());
				true
			}
			None => false,
		}
	}

	/// Clear a tombstone, making the entry live again.
	pub fn restore(&mut self, board_id: &str) -> bool {
		match self.boards.get_mut(board_id) {
			Some(info) if info.is_tombstone() => {
				info.deleted_at = None;
				info.deleted_by = None;
				true
			}
			_ => false,
		}
	}

	pub fn remove(&mut self, board_id: &str) -> bool {
		self.boards.remove(board_id).is_some()
	}

	/// Tombstones past the retention window, eligible for hard delete.
	pub fn expired_tombstones(&self, now: u64) -> Vec<String> {
		self.tombstones()
			.filter(|(_, info)| {
				info.deleted_at.map(|at| now.saturating_sub(at) >= TOMBSTONE_RETENTION_MS)
					== Some(true)
			})
			.map(|(id, _)| id.clone())
			.collect()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use serde_json::json;

	fn board(id: &str, updated_at: u64) -> Board {
		Board {
			id: id.to_string(),
			name: format!("board {}", id),
			folder_id: None,
			order: 0,
			viewport: Value::Null,
			theme: String::new(),
			created_at: 1,
			updated_at,
			elements: vec![json!({"id": "e1"})],
		}
	}

	#[test]
	fn tombstone_lifecycle() {
		let mut manifest = SyncManifest::new("dev1", "1.0.0", 1000);
		manifest.upsert_board(&board("a", 500));
		assert_eq!(manifest.live_board_count(), 1);

		assert!(manifest.mark_deleted("a", "dev1", 2000));
		assert_eq!(manifest.live_board_count(), 0);
		let info = &manifest.boards["a"];
		assert_eq!(info.deleted_at, Some(2000));
		assert_eq!(info.deleted_by.as_deref(), Some("dev1"));
		// Name and checksum survive for the recycle bin listing.
		assert_eq!(info.name, "board a");

		assert!(manifest.restore("a"));
		assert_eq!(manifest.live_board_count(), 1);
		assert!(!manifest.boards["a"].is_tombstone());
	}

	#[test]
	fn expiry_respects_retention() {
		let mut manifest = SyncManifest::new("dev1", "1.0.0", 0);
		manifest.upsert_board(&board("a", 0));
		manifest.mark_deleted("a", "dev1", 1000);

		assert!(manifest.expired_tombstones(1000 + TOMBSTONE_RETENTION_MS - 1).is_empty());
		assert_eq!(
			manifest.expired_tombstones(1000 + TOMBSTONE_RETENTION_MS),
			vec!["a".to_string()]
		);
	}

	#[test]
	fn parse_tolerates_missing_fields() {
		let manifest = SyncManifest::parse(r#"{"version":1,"boards":{}}"#).unwrap();
		assert_eq!(manifest.version, 1);
		assert!(manifest.deleted_prompts.is_empty());
	}

	#[test]
	fn round_trip_keeps_camel_case() {
		let mut manifest = SyncManifest::new("dev1", "1.0.0", 5);
		manifest.upsert_board(&board("a", 7));
		let json = manifest.to_json().unwrap();
		assert!(json.contains("appVersion"));
		assert!(json.contains("updatedAt"));
		let back = SyncManifest::parse(&json).unwrap();
		assert_eq!(back.boards.len(), 1);
	}

	#[test]
	fn device_registry_updates_last_seen() {
		let mut manifest = SyncManifest::new("dev1", "1.0.0", 5);
		manifest.touch("dev2", "1.1.0", 10);
		assert_eq!(manifest.devices.len(), 2);
		assert_eq!(manifest.device_id, "dev2");
		manifest.touch("dev1", "1.2.0", 20);
		assert_eq!(manifest.devices["dev1"].last_seen_at, 20);
		assert_eq!(manifest.devices["dev1"].app_version, "1.2.0");
	}
}

// vim: ts=4
