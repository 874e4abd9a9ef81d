//! Paged storage for unbounded collections (tasks, workflows).
//!
//! A collection is split into an index file plus N page files. The index
//! is small (a fixed-size entry per item, no payload fields) and changes
//! whenever anything changes; pages are fat and stay byte-stable in
//! steady state, so terminal items never retransfer.

pub mod index;
pub mod layout;
pub mod legacy;
pub mod syncer;

pub use index::{compare_indexes, IndexDelta, PageInfo, TaskIndex, TaskIndexItem};
pub use layout::{build_layout, compact_record, PageLayout, TaskPage};
pub use syncer::{PagedSyncStats, PagedSyncer};

use crate::store::PagedCollection;

/// File namespace of one paged collection.
#[derive(Debug, Clone, Copy)]
pub struct PagedNamespace {
	pub collection: PagedCollection,
	pub index_file: &'static str,
	page_prefix: &'static str,
	/// Pre-paging single-file layout, still readable during migration
	pub legacy_file: Option<&'static str>,
}

impl PagedNamespace {
	/// Page filename for a page ID (`tasks_p3.json` for page "3").
	pub fn page_file(&self, page_id: &str) -> String {
		format!("{}{}.json", self.page_prefix, page_id)
	}
}

/// The task namespace (`task-index.json`, `tasks_p{N}.json`).
pub const TASKS: PagedNamespace = PagedNamespace {
	collection: PagedCollection::Tasks,
	index_file: "task-index.json",
	page_prefix: "tasks_p",
	legacy_file: Some("tasks.json"),
};

/// The workflow namespace (`workflow-index.json`, `workflows_p{N}.json`).
pub const WORKFLOWS: PagedNamespace = PagedNamespace {
	collection: PagedCollection::Workflows,
	index_file: "workflow-index.json",
	page_prefix: "workflows_p",
	legacy_file: None,
};

// vim: ts=4
