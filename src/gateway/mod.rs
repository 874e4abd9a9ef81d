//! Remote gateway: the Gist API seam.
//!
//! [`GistApi`] is the trait the rest of the engine talks through. The
//! production implementation is [`http::HttpGistClient`]; tests and
//! offline embedding use [`memory::MemoryGistApi`], which keeps whole
//! Gists in process memory with the same observable semantics.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::GatewayError;

/// Well-known filename of the shard master index.
pub const MASTER_INDEX_FILE: &str = "master-index.json";

/// Well-known filename of the board sync manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

/// A file within a fetched Gist tree.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GistFile {
	pub filename: String,
	#[serde(default)]
	pub size: u64,
	#[serde(default)]
	pub truncated: bool,
	#[serde(default)]
	pub content: Option<String>,
	#[serde(default)]
	pub raw_url: Option<String>,
}

/// A full Gist tree with file metadata.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Gist {
	pub id: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub updated_at: String,
	#[serde(default)]
	pub files: BTreeMap<String, GistFile>,
}

impl Gist {
	pub fn has_file(&self, name: &str) -> bool {
		self.files.contains_key(name)
	}
}

/// Listing entry for a user's Gist (no file bodies).
#[derive(Debug, Clone)]
pub struct GistSummary {
	pub id: String,
	pub description: String,
	pub updated_at: String,
	pub filenames: Vec<String>,
}

/// One entry of a file mutation batch.
#[derive(Debug, Clone)]
pub enum FileChange {
	/// Write (create or replace) the file with this content
	Write(String),
	/// Remove the file
	Delete,
}

impl FileChange {
	pub fn size(&self) -> usize {
		match self {
			FileChange::Write(content) => content.len(),
			FileChange::Delete => 0,
		}
	}
}

/// Result of a token liveness probe.
#[derive(Debug, Clone)]
pub struct TokenProbe {
	pub login: String,
	pub can_read_gists: bool,
}

/// The Gist API as the engine consumes it.
///
/// Implementations own the session cache: `get_gist` for a previously
/// fetched ID must not refetch until a mutation on that ID replaces the
/// cached tree with the server's post-state.
#[async_trait]
pub trait GistApi: Send + Sync {
	/// List the user's Gists (first page, newest first).
	async fn list_gists(&self) -> Result<Vec<GistSummary>, GatewayError>;

	/// Create a new Gist with the given initial files.
	async fn create_gist(
		&self,
		description: &str,
		files: BTreeMap<String, String>,
	) -> Result<Gist, GatewayError>;

	/// Fetch the full tree of a Gist, served from the session cache when
	/// warm. Concurrent cold calls for the same ID collapse into one fetch.
	async fn get_gist(&self, id: &str) -> Result<Gist, GatewayError>;

	/// Fetch one file's content, following the raw URL when the embedded
	/// content is truncated.
	async fn get_file_content(&self, id: &str, name: &str) -> Result<String, GatewayError>;

	/// Apply a file mutation batch. Batches whose aggregate content
	/// exceeds the PATCH size limit are split into sequential requests,
	/// each committing independently.
	async fn update_files(
		&self,
		id: &str,
		changes: BTreeMap<String, FileChange>,
	) -> Result<(), GatewayError>;

	/// Delete a whole Gist and evict it from the session cache.
	async fn delete_gist(&self, id: &str) -> Result<(), GatewayError>;

	/// Probe the configured token against `/user` and a 1-item Gist list.
	async fn validate_token(&self) -> Result<TokenProbe, GatewayError>;

	/// Drop a cached tree so the next `get_gist` refetches.
	async fn evict(&self, id: &str);
}

/// Convenience wrapper for deleting files by name.
pub async fn delete_gist_files(
	api: &dyn GistApi,
	id: &str,
	names: &[String],
) -> Result<(), GatewayError> {
	let changes: BTreeMap<String, FileChange> =
		names.iter().map(|n| (n.clone(), FileChange::Delete)).collect();
	if changes.is_empty() {
		return Ok(());
	}
	api.update_files(id, changes).await
}

/// Locate the user's sync Gist: the newest one carrying a master index,
/// falling back to the newest one carrying a legacy manifest.
///
/// Listing order is newest-first, so the first hit wins.
pub async fn find_sync_gist(api: &dyn GistApi) -> Result<Option<String>, GatewayError> {
	let gists = api.list_gists().await?;

	for gist in &gists {
		if gist.filenames.iter().any(|f| f == MASTER_INDEX_FILE) {
			return Ok(Some(gist.id.clone()));
		}
	}
	for gist in &gists {
		if gist.filenames.iter().any(|f| f == MANIFEST_FILE) {
			return Ok(Some(gist.id.clone()));
		}
	}
	Ok(None)
}

/// Split a mutation batch into request-sized chunks.
///
/// Deletes are free; writes accumulate until the next one would push the
/// aggregate over `max_bytes`. A single oversized write still goes out
/// alone (the API enforces its own hard limit).
pub fn split_batches(
	changes: BTreeMap<String, FileChange>,
	max_bytes: usize,
) -> Vec<BTreeMap<String, FileChange>> {
	let mut batches = Vec::new();
	let mut current = BTreeMap::new();
	let mut current_size = 0usize;

	for (name, change) in changes {
		let size = change.size();
		if !current.is_empty() && current_size + size > max_bytes {
			batches.push(std::mem::take(&mut current));
			current_size = 0;
		}
		current_size += size;
		current.insert(name, change);
	}
	if !current.is_empty() {
		batches.push(current);
	}
	batches
}

#[cfg(test)]
mod test {
	use super::*;

	fn write(size: usize) -> FileChange {
		FileChange::Write("x".repeat(size))
	}

	#[test]
	fn split_batches_respects_limit() {
		let mut changes = BTreeMap::new();
		changes.insert("a".to_string(), write(60));
		changes.insert("b".to_string(), write(60));
		changes.insert("c".to_string(), write(60));

		let batches = split_batches(changes, 100);
		assert_eq!(batches.len(), 3);
	}

	#[test]
	fn split_batches_packs_small_files() {
		let mut changes = BTreeMap::new();
		changes.insert("a".to_string(), write(30));
		changes.insert("b".to_string(), write(30));
		changes.insert("c".to_string(), write(30));

		let batches = split_batches(changes, 100);
		assert_eq!(batches.len(), 1);
	}

	#[test]
	fn split_batches_lets_oversized_file_through_alone() {
		let mut changes = BTreeMap::new();
		changes.insert("small".to_string(), write(10));
		changes.insert("huge".to_string(), write(500));

		let batches = split_batches(changes, 100);
		assert_eq!(batches.len(), 2);
		assert!(batches.iter().any(|b| b.len() == 1 && b.contains_key("huge")));
	}

	#[test]
	fn deletes_cost_nothing() {
		let mut changes = BTreeMap::new();
		for i in 0..50 {
			changes.insert(format!("f{}", i), FileChange::Delete);
		}
		let batches = split_batches(changes, 100);
		assert_eq!(batches.len(), 1);
	}
}

// vim: ts=4
