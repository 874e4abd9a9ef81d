//! Legacy single-file task layout.
//!
//! Before paging, the whole task history lived in one `tasks.json`. The
//! read path stays supported until a format version bump; writes always
//! produce the paged layout.

use serde::Deserialize;

use crate::types::TaskRecord;

/// The pre-paging `tasks.json` shape.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyTasksFile {
	pub completed_tasks: Vec<TaskRecord>,
	pub updated_at: u64,
}

/// Extract the task list from a legacy payload.
pub fn migrate_from_legacy_format(json: &str) -> Result<Vec<TaskRecord>, serde_json::Error> {
	let legacy: LegacyTasksFile = serde_json::from_str(json)?;
	Ok(legacy.completed_tasks)
}


// vim: ts=4
