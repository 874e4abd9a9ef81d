//! In-process Gist API for tests and offline embedding.
//!
//! Faithful to the HTTP client's observable behavior: newest-first
//! listing, post-state caching semantics (trivially, since the store is
//! the cache), PATCH batch splitting, and the same validation errors.
//! Tests additionally read the request counters to assert what a round
//! actually transferred.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{FileChange, Gist, GistApi, GistFile, GistSummary, TokenProbe};
use crate::error::GatewayError;
use crate::limits::{GIST_FILENAME_MAX, PATCH_MAX_BYTES};

#[derive(Debug, Clone, Default)]
struct StoredGist {
	description: String,
	files: BTreeMap<String, String>,
	updated_seq: u64,
}

/// Request counters for assertions.
#[derive(Debug, Clone, Default)]
pub struct ApiStats {
	pub gets: usize,
	pub patches: usize,
	pub creates: usize,
	pub deletes: usize,
	/// Every filename written through `update_files`, in order
	pub files_written: Vec<String>,
	/// Every filename removed through `update_files`
	pub files_deleted: Vec<String>,
}

#[derive(Default)]
struct Inner {
	gists: BTreeMap<String, StoredGist>,
	seq: u64,
	next_id: u64,
	stats: ApiStats,
}

/// In-memory Gist store implementing [`GistApi`].
#[derive(Default)]
pub struct MemoryGistApi {
	inner: Mutex<Inner>,
}

impl MemoryGistApi {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn stats(&self) -> ApiStats {
		self.inner.lock().await.stats.clone()
	}

	pub async fn reset_stats(&self) {
		self.inner.lock().await.stats = ApiStats::default();
	}

	/// Direct content peek for assertions, no counters touched.
	pub async fn file_content(&self, id: &str, name: &str) -> Option<String> {
		let inner = self.inner.lock().await;
		inner.gists.get(id).and_then(|g| g.files.get(name).cloned())
	}

	/// Direct file listing for assertions.
	pub async fn file_names(&self, id: &str) -> Vec<String> {
		let inner = self.inner.lock().await;
		inner.gists.get(id).map(|g| g.files.keys().cloned().collect()).unwrap_or_default()
	}

	pub async fn gist_exists(&self, id: &str) -> bool {
		self.inner.lock().await.gists.contains_key(id)
	}

	/// Seed a Gist with explicit contents (test setup).
	pub async fn seed(&self, id: &str, files: BTreeMap<String, String>) {
		let mut inner = self.inner.lock().await;
		inner.seq += 1;
		let seq = inner.seq;
		inner.gists.insert(
			id.to_string(),
			StoredGist { description: String::new(), files, updated_seq: seq },
		);
	}

	fn to_gist(id: &str, stored: &StoredGist) -> Gist {
		let files = stored
			.files
			.iter()
			.map(|(name, content)| {
				(
					name.clone(),
					GistFile {
						filename: name.clone(),
						size: content.len() as u64,
						truncated: false,
						content: Some(content.clone()),
						raw_url: None,
					},
				)
			})
			.collect();
		Gist {
			id: id.to_string(),
			description: stored.description.clone(),
			updated_at: format!("{:020}", stored.updated_seq),
			files,
		}
	}
}

#[async_trait]
impl GistApi for MemoryGistApi {
	async fn list_gists(&self) -> Result<Vec<GistSummary>, GatewayError> {
		let inner = self.inner.lock().await;
		let mut entries: Vec<(&String, &StoredGist)> = inner.gists.iter().collect();
		entries.sort_by(|a, b| b.1.updated_seq.cmp(&a.1.updated_seq));
		Ok(entries
			.into_iter()
			.map(|(id, stored)| GistSummary {
				id: id.clone(),
				description: stored.description.clone(),
				updated_at: format!("{:020}", stored.updated_seq),
				filenames: stored.files.keys().cloned().collect(),
			})
			.collect())
	}

	async fn create_gist(
		&self,
		description: &str,
		files: BTreeMap<String, String>,
	) -> Result<Gist, GatewayError> {
		let mut inner = self.inner.lock().await;
		inner.stats.creates += 1;
		inner.next_id += 1;
		inner.seq += 1;
		let id = format!("gist{:04}", inner.next_id);
		let seq = inner.seq;
		let stored = StoredGist { description: description.to_string(), files, updated_seq: seq };
		let gist = Self::to_gist(&id, &stored);
		inner.gists.insert(id, stored);
		Ok(gist)
	}

	async fn get_gist(&self, id: &str) -> Result<Gist, GatewayError> {
		let mut inner = self.inner.lock().await;
		inner.stats.gets += 1;
		inner.gists.get(id).map(|stored| Self::to_gist(id, stored)).ok_or(GatewayError::NotFound)
	}

	async fn get_file_content(&self, id: &str, name: &str) -> Result<String, GatewayError> {
		let inner = self.inner.lock().await;
		inner
			.gists
			.get(id)
			.and_then(|g| g.files.get(name).cloned())
			.ok_or(GatewayError::NotFound)
	}

	async fn update_files(
		&self,
		id: &str,
		changes: BTreeMap<String, FileChange>,
	) -> Result<(), GatewayError> {
		for (name, change) in &changes {
			if name.len() > GIST_FILENAME_MAX {
				return Err(GatewayError::FilenameTooLong { name: name.clone() });
			}
			if let FileChange::Write(content) = change {
				if content.is_empty() {
					return Err(GatewayError::EmptyContent { name: name.clone() });
				}
			}
		}

		let mut inner = self.inner.lock().await;
		if !inner.gists.contains_key(id) {
			return Err(GatewayError::NotFound);
		}

		for batch in super::split_batches(changes, PATCH_MAX_BYTES) {
			inner.stats.patches += 1;
			inner.seq += 1;
			let seq = inner.seq;
			for (name, change) in batch {
				match change {
					FileChange::Write(content) => {
						inner.stats.files_written.push(name.clone());
						let gist = inner.gists.get_mut(id).expect("checked above");
						gist.files.insert(name, content);
						gist.updated_seq = seq;
					}
					FileChange::Delete => {
						inner.stats.files_deleted.push(name.clone());
						let gist = inner.gists.get_mut(id).expect("checked above");
						gist.files.remove(&name);
						gist.updated_seq = seq;
					}
				}
			}
		}
		Ok(())
	}

	async fn delete_gist(&self, id: &str) -> Result<(), GatewayError> {
		let mut inner = self.inner.lock().await;
		inner.stats.deletes += 1;
		inner.gists.remove(id);
		Ok(())
	}

	async fn validate_token(&self) -> Result<TokenProbe, GatewayError> {
		Ok(TokenProbe { login: "memory".to_string(), can_read_gists: true })
	}

	async fn evict(&self, _id: &str) {
		// The store is its own cache; nothing to drop.
	}
}


// vim: ts=4
