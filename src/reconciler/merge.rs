//! Element-level board merge for conflicted boards.

use std::collections::BTreeMap;

use crate::types::Board;
use crate::util::canonical_json;

/// Result of merging one conflicted board.
#[derive(Debug)]
pub struct MergedBoard {
	pub board: Board,
	/// Element IDs present on both sides with differing content (local won)
	pub conflicting_elements: Vec<String>,
}

fn element_id(element: &serde_json::Value) -> Option<String> {
	element.get("id").and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Merge two versions of the same board on element identity.
///
/// Elements unique to one side carry forward; identical elements carry
/// forward once; diverged elements keep the local version and are
/// reported. Local ordering is preserved, with remote-only elements
/// appended in their remote order.
pub fn merge_boards(local: &Board, remote: &Board) -> MergedBoard {
	let mut remote_by_id: BTreeMap<String, &serde_json::Value> = BTreeMap::new();
	for element in &remote.elements {
		if let Some(id) = element_id(element) {
			remote_by_id.insert(id, element);
		}
	}

	let mut merged_elements = Vec::with_capacity(local.elements.len() + remote.elements.len());
	let mut conflicting = Vec::new();

	for element in &local.elements {
		match element_id(element) {
			Some(id) => {
				if let Some(remote_element) = remote_by_id.remove(&id) {
					if canonical_json(element) != canonical_json(remote_element) {
						conflicting.push(id);
					}
				}
				merged_elements.push(element.clone());
			}
			None => merged_elements.push(element.clone()),
		}
	}

	// Remote-only elements, in remote order.
	for element in &remote.elements {
		if let Some(id) = element_id(element) {
			if remote_by_id.contains_key(&id) {
				merged_elements.push(element.clone());
			}
		}
	}

	let mut board = local.clone();
	board.elements = merged_elements;
	board.updated_at = local.updated_at.max(remote.updated_at);

	MergedBoard { board, conflicting_elements: conflicting }
}


// vim: ts=4
