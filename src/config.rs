//! Engine configuration, persisted as JSON in the key/value store.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{keys, KvStore};

/// Default auto-sync debounce window.
pub const DEFAULT_DEBOUNCE_MS: u64 = 30_000;

/// Sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
	/// Master switch for the engine
	pub enabled: bool,

	/// Push local changes automatically after the debounce window
	pub auto_sync: bool,

	/// Debounce window for auto-sync in milliseconds
	pub auto_sync_debounce_ms: u64,

	/// Target Gist ID; None until connected or bootstrapped
	pub gist_id: Option<String>,

	/// Completion time of the last successful sync round (epoch millis)
	pub last_sync_time: Option<u64>,

	/// Device that wrote the last successful round
	pub last_sync_device_id: Option<String>,
}

impl Default for SyncConfig {
	fn default() -> Self {
		SyncConfig {
			enabled: false,
			auto_sync: true,
			auto_sync_debounce_ms: DEFAULT_DEBOUNCE_MS,
			gist_id: None,
			last_sync_time: None,
			last_sync_device_id: None,
		}
	}
}

/// Load the configuration, falling back to defaults when absent or
/// unparseable (a damaged config must not brick the engine).
pub async fn load_config(kv: &dyn KvStore) -> Result<SyncConfig, StoreError> {
	match kv.get(keys::SYNC_CONFIG).await? {
		Some(json) => Ok(serde_json::from_str(&json).unwrap_or_default()),
		None => Ok(SyncConfig::default()),
	}
}

pub async fn save_config(kv: &dyn KvStore, config: &SyncConfig) -> Result<(), StoreError> {
	let json = serde_json::to_string(config).map_err(StoreError::save)?;
	kv.set(keys::SYNC_CONFIG, &json).await
}

/// Stable per-install device ID: generated once, 32 hex chars, persisted.
pub async fn device_id(kv: &dyn KvStore) -> Result<String, StoreError> {
	if let Some(id) = kv.get(keys::DEVICE_ID).await? {
		if !id.is_empty() {
			return Ok(id);
		}
	}
	let id = uuid::Uuid::new_v4().simple().to_string();
	kv.set(keys::DEVICE_ID, &id).await?;
	Ok(id)
}


// vim: ts=4
