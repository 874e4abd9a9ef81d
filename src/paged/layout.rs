//! Page layout construction.
//!
//! Items ordered by `createdAt` are packed greedily into pages subject to
//! both capacity limits. New items carry the newest timestamps and land
//! on the last page, so earlier pages keep their composition between
//! rounds.

use serde::{Deserialize, Serialize};

use super::index::{PageInfo, TaskIndex, TaskIndexItem, INDEX_VERSION};
use crate::limits::{PAGE_MAX_BYTES, PAGE_MAX_ITEMS};
use crate::types::TaskRecord;

/// Payload fields dropped from page entries. These carry the bulk of a
/// record's size and are never needed on another device's list view; the
/// device that produced them keeps the full record locally.
const LARGE_FIELDS: [&str; 7] = [
	"chatResponse",
	"toolCalls",
	"toolCallHistory",
	"base64Data",
	"base64Images",
	"errorDetails",
	"errorStack",
];

/// One page file (`tasks_p{N}.json` / `workflows_p{N}.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
	pub page_id: String,
	pub updated_at: u64,
	pub tasks: Vec<TaskRecord>,
}

impl TaskPage {
	pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}
}

/// A collection rendered into index + pages.
#[derive(Debug, Clone)]
pub struct PageLayout {
	pub index: TaskIndex,
	pub pages: Vec<TaskPage>,
}

impl PageLayout {
	pub fn page(&self, page_id: &str) -> Option<&TaskPage> {
		self.pages.iter().find(|p| p.page_id == page_id)
	}
}

/// Strip payload-sized fields from a record before it enters a page.
pub fn compact_record(record: &TaskRecord) -> TaskRecord {
	let mut compact = record.clone();
	for field in LARGE_FIELDS {
		compact.rest.remove(field);
	}
	compact
}

fn record_size(record: &TaskRecord) -> usize {
	serde_json::to_string(record).map(|s| s.len()).unwrap_or(0)
}

/// Build the page layout for a collection.
///
/// Pages are numbered from 1 in creation order. A page closes when adding
/// the next item would exceed either the item cap or the byte cap; an
/// oversized single item still gets a page of its own.
pub fn build_layout(items: &[TaskRecord], now: u64) -> PageLayout {
	let mut ordered: Vec<TaskRecord> = items.iter().map(compact_record).collect();
	ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

	let mut pages: Vec<TaskPage> = Vec::new();
	let mut index_items: Vec<TaskIndexItem> = Vec::new();

	let mut current: Vec<TaskRecord> = Vec::new();
	let mut current_bytes = 0usize;
	let mut page_no = 1usize;

	fn close_page(page_no: &mut usize, current: &mut Vec<TaskRecord>, pages: &mut Vec<TaskPage>) {
		if current.is_empty() {
			return;
		}
		let updated_at = current.iter().map(|t| t.updated_at).max().unwrap_or(0);
		pages.push(TaskPage {
			page_id: page_no.to_string(),
			updated_at,
			tasks: std::mem::take(current),
		});
		*page_no += 1;
	}

	for record in ordered {
		let size = record_size(&record);
		let over_items = current.len() + 1 > PAGE_MAX_ITEMS;
		let over_bytes = !current.is_empty() && current_bytes + size > PAGE_MAX_BYTES;
		if over_items || over_bytes {
			close_page(&mut page_no, &mut current, &mut pages);
			current_bytes = 0;
		}

		index_items.push(TaskIndexItem {
			id: record.id.clone(),
			record_type: record.record_type.clone(),
			status: record.status,
			created_at: record.created_at,
			updated_at: record.updated_at,
			sync_version: record.sync_version,
			page_id: page_no.to_string(),
			prompt_preview: record.prompt_preview(),
			thumbnail_url: record.thumbnail_url.clone(),
		});
		current_bytes += size;
		current.push(record);
	}
	close_page(&mut page_no, &mut current, &mut pages);

	let page_infos = pages
		.iter()
		.map(|p| PageInfo {
			page_id: p.page_id.clone(),
			updated_at: p.updated_at,
			item_count: p.tasks.len(),
		})
		.collect();

	PageLayout {
		index: TaskIndex {
			version: INDEX_VERSION,
			updated_at: now,
			pages: page_infos,
			items: index_items,
		},
		pages,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::types::TaskStatus;
	use serde_json::{Map, Value};

	fn record(id: &str, created_at: u64) -> TaskRecord {
		TaskRecord {
			id: id.to_string(),
			record_type: "gen".to_string(),
			status: TaskStatus::Completed,
			created_at,
			updated_at: created_at,
			sync_version: 1,
			prompt: Some("p".to_string()),
			thumbnail_url: None,
			rest: Map::new(),
		}
	}

	#[test]
	fn single_page_for_small_collections() {
		let items: Vec<TaskRecord> = (0..10).map(|i| record(&format!("t{}", i), i)).collect();
		let layout = build_layout(&items, 100);
		assert_eq!(layout.pages.len(), 1);
		assert_eq!(layout.index.items.len(), 10);
		assert!(layout.index.items.iter().all(|i| i.page_id == "1"));
	}

	#[test]
	fn item_cap_starts_new_page() {
		let items: Vec<TaskRecord> =
			(0..PAGE_MAX_ITEMS + 1).map(|i| record(&format!("t{:04}", i), i as u64)).collect();
		let layout = build_layout(&items, 100);
		assert_eq!(layout.pages.len(), 2);
		assert_eq!(layout.pages[0].tasks.len(), PAGE_MAX_ITEMS);
		assert_eq!(layout.pages[1].tasks.len(), 1);
	}

	#[test]
	fn byte_cap_starts_new_page() {
		let mut items = Vec::new();
		for i in 0..4 {
			let mut r = record(&format!("t{}", i), i);
			// ~400 KB of payload each.
			r.prompt = Some("x".repeat(400 * 1024));
			items.push(r);
		}
		let layout = build_layout(&items, 100);
		// Two ~400 KB items fit a 900 KB page; the third starts a new one.
		assert_eq!(layout.pages.len(), 2);
		for page in &layout.pages {
			assert!(page.to_json().unwrap().len() <= PAGE_MAX_BYTES + 1024);
		}
	}

	#[test]
	fn index_and_pages_are_coherent() {
		let items: Vec<TaskRecord> = (0..700).map(|i| record(&format!("t{:04}", i), i)).collect();
		let layout = build_layout(&items, 100);
		for index_item in &layout.index.items {
			let page = layout.page(&index_item.page_id).expect("page exists");
			let hits = page.tasks.iter().filter(|t| t.id == index_item.id).count();
			assert_eq!(hits, 1, "item {} appears once in its page", index_item.id);
		}
		for info in &layout.index.pages {
			assert_eq!(layout.page(&info.page_id).unwrap().tasks.len(), info.item_count);
		}
	}

	#[test]
	fn compaction_drops_large_fields_only() {
		let mut r = record("t1", 5);
		r.rest.insert("chatResponse".to_string(), Value::String("huge".repeat(1000)));
		r.rest.insert("model".to_string(), Value::String("small".to_string()));
		let compact = compact_record(&r);
		assert!(!compact.rest.contains_key("chatResponse"));
		assert_eq!(compact.rest.get("model").unwrap(), "small");
	}

	#[test]
	fn layout_is_deterministic() {
		let items: Vec<TaskRecord> = (0..50).map(|i| record(&format!("t{:02}", i), i)).collect();
		let mut reversed = items.clone();
		reversed.reverse();
		let a = build_layout(&items, 9);
		let b = build_layout(&reversed, 9);
		assert_eq!(a.index.to_json().unwrap(), b.index.to_json().unwrap());
	}
}

// vim: ts=4
