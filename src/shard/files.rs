//! Per-shard file formats: the shard manifest and synced media files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::MediaType;

/// Filename of the encrypted manifest inside every shard Gist.
pub const SHARD_MANIFEST_FILE: &str = "shard-manifest.json";

/// Where a blob originally came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
	/// Produced on a device (canvas export, generation output)
	Local,
	/// Fetched from an external URL
	External,
}

/// Metadata entry in the shard manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedMediaMeta {
	pub url: String,
	#[serde(rename = "type")]
	pub media_type: MediaType,
	pub size: u64,
	pub mime_type: String,
	pub synced_at: u64,
}

/// The shard manifest (`shard-manifest.json`, encrypted).
///
/// The manifest and the master index reference each other's Gist IDs.
/// These are two independent one-way references for repair lookups;
/// neither side is ever dereferenced in a loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShardManifest {
	pub shard_id: String,
	pub master_gist_id: String,
	pub files: BTreeMap<String, SyncedMediaMeta>,
	pub updated_at: u64,
}

impl Default for ShardManifest {
	fn default() -> Self {
		ShardManifest {
			shard_id: String::new(),
			master_gist_id: String::new(),
			files: BTreeMap::new(),
			updated_at: 0,
		}
	}
}

impl ShardManifest {
	pub fn new(shard_id: &str, master_gist_id: &str, now: u64) -> Self {
		ShardManifest {
			shard_id: shard_id.to_string(),
			master_gist_id: master_gist_id.to_string(),
			files: BTreeMap::new(),
			updated_at: now,
		}
	}

	pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}
}

/// One synced blob (`media_{base64(url)}.json`, plaintext JSON wrapping a
/// base64 body).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedMediaFile {
	pub url: String,
	#[serde(rename = "type")]
	pub media_type: MediaType,
	pub source: MediaSource,
	pub mime_type: String,
	pub size: u64,
	pub base64_data: String,
	pub synced_at: u64,
	pub synced_from_device: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub original_url: Option<String>,
}

impl SyncedMediaFile {
	pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}
}


// vim: ts=4
