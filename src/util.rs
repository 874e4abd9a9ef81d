//! Small shared helpers: clock, canonical JSON, checksums, media filenames.

use base64::engine::Engine;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::limits::GIST_FILENAME_MAX;

/// Current time as epoch milliseconds. All timestamps in the remote
/// formats are epoch millis so that devices compare them directly.
pub fn now_ms() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Serialize a JSON value with object keys sorted recursively.
///
/// Board checksums are computed over this form so that two devices hashing
/// the same logical content always agree, regardless of insertion order.
pub fn canonical_json(value: &Value) -> String {
	fn write(value: &Value, out: &mut String) {
		match value {
			Value::Object(map) => {
				out.push('{');
				let mut keys: Vec<&String> = map.keys().collect();
				keys.sort();
				for (i, key) in keys.iter().enumerate() {
					if i > 0 {
						out.push(',');
					}
					out.push_str(&serde_json::to_string(key).unwrap_or_default());
					out.push(':');
					write(&map[*key], out);
				}
				out.push('}');
			}
			Value::Array(items) => {
				out.push('[');
				for (i, item) in items.iter().enumerate() {
					if i > 0 {
						out.push(',');
					}
					write(item, out);
				}
				out.push(']');
			}
			other => {
				out.push_str(&other.to_string());
			}
		}
	}

	let mut out = String::new();
	write(value, &mut out);
	out
}

/// 32-bit checksum of a board's element list over its canonical JSON,
/// rendered as lowercase hex. Identical across devices for identical
/// logical content.
pub fn element_checksum(elements: &[Value]) -> String {
	let canonical = canonical_json(&Value::Array(elements.to_vec()));
	let mut hasher = crc32fast::Hasher::new();
	hasher.update(canonical.as_bytes());
	format!("{:08x}", hasher.finalize())
}

/// Gist filename for a media blob: `media_{urlSafeBase64(url)}.json`.
///
/// Total function over URLs; overlong encodings are truncated to honor the
/// 255-character Gist filename limit, with a short checksum suffix keeping
/// truncated names collision-resistant.
pub fn media_filename(url: &str) -> String {
	let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(url.as_bytes());
	let max_encoded = GIST_FILENAME_MAX - "media_".len() - ".json".len();
	if encoded.len() <= max_encoded {
		format!("media_{}.json", encoded)
	} else {
		let mut hasher = crc32fast::Hasher::new();
		hasher.update(url.as_bytes());
		let tag = format!("{:08x}", hasher.finalize());
		// '~' is outside the base64url alphabet, so truncated names can
		// never masquerade as decodable ones.
		format!("media_{}~{}.json", &encoded[..max_encoded - tag.len() - 1], tag)
	}
}

/// Recover the URL from a media filename produced by [`media_filename`].
/// Returns None for truncated names (the URL is only in the master index
/// then) or for filenames outside the media namespace.
pub fn media_url_from_filename(name: &str) -> Option<String> {
	let encoded = name.strip_prefix("media_")?.strip_suffix(".json")?;
	let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(encoded).ok()?;
	String::from_utf8(bytes).ok()
}

/// Whether a filename belongs to the media namespace of a shard Gist.
pub fn is_media_filename(name: &str) -> bool {
	name.starts_with("media_") && name.ends_with(".json")
}


// vim: ts=4
