//! Safety gate over proposed local deletions.
//!
//! Remote state drives local deletions, and remote state can be wrong: a
//! corrupt manifest, a mid-migration device, a user connecting the wrong
//! Gist. The gate withholds delete batches that look like data loss and
//! reports what it withheld; withheld deletions simply happen on a later
//! round once the situation is understood.

use std::collections::BTreeMap;

use crate::types::{Board, SafetyWarning, SkipReason, SkippedItem};

/// What the gate decided for one round.
#[derive(Debug, Default)]
pub struct SafetyDecision {
	/// Deletions that may proceed
	pub allowed: Vec<String>,
	pub skipped: Vec<SkippedItem>,
	pub warnings: Vec<SafetyWarning>,
}

/// Inputs to the gate.
pub struct SafetyContext<'a> {
	pub local_boards: &'a BTreeMap<String, Board>,
	pub current_board_id: Option<&'a str>,
	/// None until the first successful sync on this device
	pub last_sync_time: Option<u64>,
	/// Live board count in the remote manifest
	pub remote_live_boards: usize,
	/// User confirmed a bulk delete for this round
	pub bulk_confirmed: bool,
}

fn board_name(ctx: &SafetyContext<'_>, id: &str) -> String {
	ctx.local_boards.get(id).map(|b| b.name.clone()).unwrap_or_default()
}

/// Filter a proposed delete batch.
pub fn check_deletions(proposed: &[String], ctx: &SafetyContext<'_>) -> SafetyDecision {
	let mut decision = SafetyDecision::default();
	let local_count = ctx.local_boards.len();

	// A manifest listing zero boards while local has data is treated as
	// possibly corrupt: every local board is reported protected and no
	// deletion of any kind proceeds this round.
	if ctx.remote_live_boards == 0 && local_count > 0 {
		decision
			.warnings
			.push(SafetyWarning::EmptyRemoteManifest { local_boards: local_count });
		for id in ctx.local_boards.keys() {
			decision.skipped.push(SkippedItem {
				id: id.clone(),
				name: board_name(ctx, id),
				reason: SkipReason::NewDevice,
			});
		}
		return decision;
	}

	if proposed.is_empty() {
		return decision;
	}

	// A device that never completed a sync has no baseline to delete from.
	if ctx.last_sync_time.is_none() {
		decision.warnings.push(SafetyWarning::NewDeviceProtect { proposed: proposed.len() });
		for id in proposed {
			decision.skipped.push(SkippedItem {
				id: id.clone(),
				name: board_name(ctx, id),
				reason: SkipReason::NewDevice,
			});
		}
		return decision;
	}

	// Never empty a non-empty local store in one batch.
	if proposed.len() >= local_count && local_count > 0 {
		decision.warnings.push(SafetyWarning::BlockAllDelete { proposed: proposed.len() });
		for id in proposed {
			decision.skipped.push(SkippedItem {
				id: id.clone(),
				name: board_name(ctx, id),
				reason: SkipReason::AllDeleteBlocked,
			});
		}
		return decision;
	}

	// More than half the store goes only with explicit confirmation.
	if proposed.len() * 2 > local_count && !ctx.bulk_confirmed {
		decision
			.warnings
			.push(SafetyWarning::BulkDelete { proposed: proposed.len(), total: local_count });
		for id in proposed {
			decision.skipped.push(SkippedItem {
				id: id.clone(),
				name: board_name(ctx, id),
				reason: SkipReason::BulkDelete,
			});
		}
		return decision;
	}

	for id in proposed {
		if Some(id.as_str()) == ctx.current_board_id {
			decision.warnings.push(SafetyWarning::CurrentBoardProtect { board_id: id.clone() });
			decision.skipped.push(SkippedItem {
				id: id.clone(),
				name: board_name(ctx, id),
				reason: SkipReason::CurrentBoard,
			});
		} else {
			decision.allowed.push(id.clone());
		}
	}

	decision
}


// vim: ts=4
