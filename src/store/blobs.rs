//! Blob caches: filesystem-backed for production, in-memory for tests.

use async_trait::async_trait;
use base64::engine::Engine;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

use super::{BlobCache, BlobInfo};
use crate::error::StoreError;

/// Filesystem blob cache: one data file plus one metadata sidecar per URL,
/// named by a digest of the URL.
pub struct FsBlobCache {
	dir: PathBuf,
}

impl FsBlobCache {
	pub fn new(dir: PathBuf) -> Self {
		FsBlobCache { dir }
	}

	fn key_for(url: &str) -> String {
		let mut hasher = crc32fast::Hasher::new();
		hasher.update(url.as_bytes());
		let crc = hasher.finalize();
		let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD
			.encode(&url.as_bytes()[..url.len().min(48)]);
		format!("{:08x}_{}", crc, b64)
	}

	fn data_path(&self, url: &str) -> PathBuf {
		self.dir.join(format!("{}.bin", Self::key_for(url)))
	}

	fn meta_path(&self, url: &str) -> PathBuf {
		self.dir.join(format!("{}.meta", Self::key_for(url)))
	}
}

#[async_trait]
impl BlobCache for FsBlobCache {
	async fn get_cached_blob(&self, url: &str) -> Result<Option<Vec<u8>>, StoreError> {
		match fs::read(self.data_path(url)).await {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StoreError::load(e)),
		}
	}

	async fn cache_blob(
		&self,
		url: &str,
		data: Vec<u8>,
		mime_type: &str,
	) -> Result<(), StoreError> {
		fs::create_dir_all(&self.dir).await.map_err(StoreError::save)?;
		fs::write(self.data_path(url), &data).await.map_err(StoreError::save)?;
		fs::write(self.meta_path(url), mime_type).await.map_err(StoreError::save)?;
		Ok(())
	}

	async fn get_cache_info(&self, url: &str) -> Result<Option<BlobInfo>, StoreError> {
		let size = match fs::metadata(self.data_path(url)).await {
			Ok(meta) => meta.len(),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(StoreError::load(e)),
		};
		let mime_type = fs::read_to_string(self.meta_path(url)).await.unwrap_or_default();
		Ok(Some(BlobInfo { size, mime_type }))
	}
}

/// In-memory blob cache.
#[derive(Default)]
pub struct MemoryBlobCache {
	blobs: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobCache {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl BlobCache for MemoryBlobCache {
	async fn get_cached_blob(&self, url: &str) -> Result<Option<Vec<u8>>, StoreError> {
		Ok(self.blobs.lock().await.get(url).map(|(data, _)| data.clone()))
	}

	async fn cache_blob(
		&self,
		url: &str,
		data: Vec<u8>,
		mime_type: &str,
	) -> Result<(), StoreError> {
		self.blobs.lock().await.insert(url.to_string(), (data, mime_type.to_string()));
		Ok(())
	}

	async fn get_cache_info(&self, url: &str) -> Result<Option<BlobInfo>, StoreError> {
		Ok(self.blobs.lock().await.get(url).map(|(data, mime)| BlobInfo {
			size: data.len() as u64,
			mime_type: mime.clone(),
		}))
	}
}


// vim: ts=4
