//! Index schema and the index diff that drives incremental transfer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::TaskStatus;

/// Current index format version.
pub const INDEX_VERSION: u32 = 1;

/// One page's entry in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
	pub page_id: String,
	pub updated_at: u64,
	pub item_count: usize,
}

/// One item's entry in the index: the small fields the UI list needs,
/// nothing payload-sized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIndexItem {
	pub id: String,
	#[serde(rename = "type", default)]
	pub record_type: String,
	#[serde(default)]
	pub status: TaskStatus,
	pub created_at: u64,
	pub updated_at: u64,
	#[serde(default)]
	pub sync_version: u64,
	pub page_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prompt_preview: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub thumbnail_url: Option<String>,
}

/// The index file (`task-index.json` / `workflow-index.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskIndex {
	pub version: u32,
	pub updated_at: u64,
	pub pages: Vec<PageInfo>,
	pub items: Vec<TaskIndexItem>,
}

impl Default for TaskIndex {
	fn default() -> Self {
		TaskIndex { version: INDEX_VERSION, updated_at: 0, pages: Vec::new(), items: Vec::new() }
	}
}

impl TaskIndex {
	pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}

	pub fn items_by_id(&self) -> BTreeMap<&str, &TaskIndexItem> {
		self.items.iter().map(|item| (item.id.as_str(), item)).collect()
	}

	pub fn page_by_id(&self, page_id: &str) -> Option<&PageInfo> {
		self.pages.iter().find(|p| p.page_id == page_id)
	}
}

/// Outcome of diffing a local index against the remote one.
#[derive(Debug, Clone, Default)]
pub struct IndexDelta {
	/// Item IDs whose content must go local → remote
	pub to_upload: BTreeSet<String>,
	/// Local page IDs containing an item to upload
	pub pages_to_upload: BTreeSet<String>,
	/// Item IDs whose content must come remote → local
	pub to_download: BTreeSet<String>,
	/// Remote page IDs containing an item to download
	pub pages_to_download: BTreeSet<String>,
	/// Item IDs skipped (terminal with matching sync version, or equal
	/// timestamps)
	pub skipped: BTreeSet<String>,
}

impl IndexDelta {
	pub fn is_empty(&self) -> bool {
		self.to_upload.is_empty() && self.to_download.is_empty()
	}
}

/// Classify every item of both indexes into upload / download / skip.
///
/// Terminal items with equal sync versions short-circuit before any
/// timestamp comparison: their content is frozen, so nothing can need to
/// move regardless of clock skew between devices.
pub fn compare_indexes(local: &TaskIndex, remote: &TaskIndex) -> IndexDelta {
	let remote_items = remote.items_by_id();
	let local_items = local.items_by_id();
	let mut delta = IndexDelta::default();

	for item in &local.items {
		match remote_items.get(item.id.as_str()) {
			None => {
				delta.to_upload.insert(item.id.clone());
				delta.pages_to_upload.insert(item.page_id.clone());
			}
			Some(remote_item) => {
				if item.status.is_terminal() && item.sync_version == remote_item.sync_version {
					delta.skipped.insert(item.id.clone());
				} else if item.updated_at > remote_item.updated_at {
					delta.to_upload.insert(item.id.clone());
					delta.pages_to_upload.insert(item.page_id.clone());
				} else if item.updated_at < remote_item.updated_at {
					delta.to_download.insert(item.id.clone());
					delta.pages_to_download.insert(remote_item.page_id.clone());
				} else {
					delta.skipped.insert(item.id.clone());
				}
			}
		}
	}

	for item in &remote.items {
		if !local_items.contains_key(item.id.as_str()) {
			delta.to_download.insert(item.id.clone());
			delta.pages_to_download.insert(item.page_id.clone());
		}
	}

	delta
}


// vim: ts=4
