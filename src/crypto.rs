//! Envelope encryption for remote files.
//!
//! Every synced file is wrapped in an AES-256-GCM envelope before upload:
//!
//! ```json
//! { "v": 2, "encrypted": true, "iv": "<base64>", "data": "<base64>", "customPassword": true }
//! ```
//!
//! The key is derived with PBKDF2-HMAC-SHA-256 from either the Gist ID
//! (default) or a user passphrase (`customPassword: true`). Plaintext
//! payloads from the pre-envelope format are passed through unchanged by
//! [`Envelope::decrypt_or_passthrough`] so older Gists keep working during
//! migration.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::CryptoError;
use crate::limits::{AES_IV_LEN, PBKDF2_ITERATIONS};

/// Salt mixed into key derivation. Fixed by the on-wire format: every
/// device must derive the same key from the same secret.
const FIXED_SALT: &[u8] = b"gistsync-envelope-salt-v2";

/// Current envelope format version.
const ENVELOPE_VERSION: u32 = 2;

/// The serialized envelope shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeData {
	pub v: u32,
	pub encrypted: bool,
	pub iv: String,
	pub data: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub custom_password: Option<bool>,
}

impl EnvelopeData {
	pub fn uses_custom_password(&self) -> bool {
		self.custom_password == Some(true)
	}
}

/// A parsed remote payload: either an encryption envelope or legacy
/// plaintext.
#[derive(Debug)]
pub enum ParsedPayload {
	Envelope(EnvelopeData),
	Plain,
}

/// Classify a remote file body without decrypting it.
pub fn parse_payload(content: &str) -> ParsedPayload {
	match serde_json::from_str::<EnvelopeData>(content) {
		Ok(env) if env.encrypted && !env.iv.is_empty() && !env.data.is_empty() => {
			ParsedPayload::Envelope(env)
		}
		_ => ParsedPayload::Plain,
	}
}

/// Which secret the envelope key is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource<'a> {
	/// Default: the Gist ID itself
	GistId(&'a str),
	/// User-supplied passphrase (`customPassword: true` on the envelope)
	Passphrase(&'a str),
}

impl<'a> KeySource<'a> {
	fn secret(&self) -> &'a str {
		match self {
			KeySource::GistId(s) => s,
			KeySource::Passphrase(s) => s,
		}
	}

	fn is_custom(&self) -> bool {
		matches!(self, KeySource::Passphrase(_))
	}
}

/// Envelope encrypt/decrypt collaborator.
///
/// Holds the per-process derived-key cache; PBKDF2 at 100k iterations is
/// expensive enough that re-deriving per file would dominate a sync round.
pub struct Envelope {
	keys: Mutex<HashMap<String, [u8; 32]>>,
}

impl Envelope {
	pub fn new() -> Self {
		Envelope { keys: Mutex::new(HashMap::new()) }
	}

	/// Derive (or fetch from cache) the AES key for a secret.
	async fn key_for(&self, secret: &str) -> [u8; 32] {
		{
			let keys = self.keys.lock().await;
			if let Some(key) = keys.get(secret) {
				return *key;
			}
		}

		// PBKDF2 is CPU-bound; keep it off the cooperative scheduler.
		let owned = secret.to_string();
		let key = tokio::task::spawn_blocking(move || derive_key(&owned))
			.await
			.unwrap_or_else(|_| derive_key(secret));

		let mut keys = self.keys.lock().await;
		keys.insert(secret.to_string(), key);
		key
	}

	/// Encrypt a UTF-8 payload into envelope JSON under the given key source.
	pub async fn encrypt(
		&self,
		plaintext: &str,
		source: KeySource<'_>,
	) -> Result<String, CryptoError> {
		let key_bytes = self.key_for(source.secret()).await;
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

		let mut iv = [0u8; AES_IV_LEN];
		rand::thread_rng().fill_bytes(&mut iv);

		let ciphertext = cipher
			.encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
			.map_err(|_| CryptoError::Corrupt { message: "encryption failed".to_string() })?;

		let envelope = EnvelopeData {
			v: ENVELOPE_VERSION,
			encrypted: true,
			iv: BASE64.encode(iv),
			data: BASE64.encode(&ciphertext),
			custom_password: if source.is_custom() { Some(true) } else { None },
		};

		serde_json::to_string(&envelope)
			.map_err(|e| CryptoError::Corrupt { message: e.to_string() })
	}

	/// Decrypt an envelope JSON string.
	///
	/// The key source is chosen by the envelope itself: `customPassword`
	/// envelopes require `passphrase`, anything else derives from the Gist
	/// ID. Content that is not an envelope fails with `Corrupt`; use
	/// [`Self::decrypt_or_passthrough`] where legacy plaintext is legal.
	pub async fn decrypt(
		&self,
		content: &str,
		gist_id: &str,
		passphrase: Option<&str>,
	) -> Result<String, CryptoError> {
		match parse_payload(content) {
			ParsedPayload::Envelope(env) => self.open(&env, gist_id, passphrase).await,
			ParsedPayload::Plain => {
				Err(CryptoError::Corrupt { message: "not an encryption envelope".to_string() })
			}
		}
	}

	/// Decrypt when the content is an envelope; return it unchanged when it
	/// is legacy plaintext.
	pub async fn decrypt_or_passthrough(
		&self,
		content: &str,
		gist_id: &str,
		passphrase: Option<&str>,
	) -> Result<String, CryptoError> {
		match parse_payload(content) {
			ParsedPayload::Envelope(env) => self.open(&env, gist_id, passphrase).await,
			ParsedPayload::Plain => Ok(content.to_string()),
		}
	}

	async fn open(
		&self,
		env: &EnvelopeData,
		gist_id: &str,
		passphrase: Option<&str>,
	) -> Result<String, CryptoError> {
		let (secret, custom) = if env.uses_custom_password() {
			match passphrase {
				Some(p) => (p, true),
				None => return Err(CryptoError::NeedsPassword),
			}
		} else {
			(gist_id, false)
		};

		let iv = BASE64
			.decode(&env.iv)
			.map_err(|_| CryptoError::Corrupt { message: "bad IV encoding".to_string() })?;
		if iv.len() != AES_IV_LEN {
			return Err(CryptoError::Corrupt {
				message: format!("IV must be {} bytes, got {}", AES_IV_LEN, iv.len()),
			});
		}
		let data = BASE64
			.decode(&env.data)
			.map_err(|_| CryptoError::Corrupt { message: "bad data encoding".to_string() })?;

		let key_bytes = self.key_for(secret).await;
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

		let plaintext = cipher.decrypt(Nonce::from_slice(&iv), data.as_slice()).map_err(|_| {
			if custom {
				CryptoError::WrongPassword
			} else {
				CryptoError::Corrupt { message: "authentication failed".to_string() }
			}
		})?;

		String::from_utf8(plaintext)
			.map_err(|_| CryptoError::Corrupt { message: "payload is not UTF-8".to_string() })
	}
}

impl Default for Envelope {
	fn default() -> Self {
		Self::new()
	}
}

fn derive_key(secret: &str) -> [u8; 32] {
	let mut material = Vec::with_capacity(secret.len() + FIXED_SALT.len());
	material.extend_from_slice(secret.as_bytes());
	material.extend_from_slice(FIXED_SALT);

	let mut key = [0u8; 32];
	pbkdf2::pbkdf2_hmac::<sha2::Sha256>(&material, FIXED_SALT, PBKDF2_ITERATIONS, &mut key);
	key
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn round_trip_with_gist_id_key() {
		let envelope = Envelope::new();
		let plaintext = r#"{"hello":"world"}"#;
		let sealed = envelope.encrypt(plaintext, KeySource::GistId("abc123")).await.unwrap();

		assert!(matches!(parse_payload(&sealed), ParsedPayload::Envelope(_)));
		let opened = envelope.decrypt(&sealed, "abc123", None).await.unwrap();
		assert_eq!(opened, plaintext);
	}

	#[tokio::test]
	async fn round_trip_with_passphrase() {
		let envelope = Envelope::new();
		let sealed =
			envelope.encrypt("secret payload", KeySource::Passphrase("hunter2")).await.unwrap();

		// No passphrase supplied: typed NeedsPassword.
		let err = envelope.decrypt(&sealed, "gist", None).await.unwrap_err();
		assert!(matches!(err, CryptoError::NeedsPassword));

		// Wrong passphrase: typed WrongPassword.
		let err = envelope.decrypt(&sealed, "gist", Some("wrong")).await.unwrap_err();
		assert!(matches!(err, CryptoError::WrongPassword));

		let opened = envelope.decrypt(&sealed, "gist", Some("hunter2")).await.unwrap();
		assert_eq!(opened, "secret payload");
	}

	#[tokio::test]
	async fn corrupt_data_is_typed() {
		let envelope = Envelope::new();
		let sealed = envelope.encrypt("payload", KeySource::GistId("gist1")).await.unwrap();

		// Flip the gist id: the default-key envelope fails as Corrupt,
		// not WrongPassword.
		let err = envelope.decrypt(&sealed, "other-gist", None).await.unwrap_err();
		assert!(matches!(err, CryptoError::Corrupt { .. }));
	}

	#[tokio::test]
	async fn passthrough_returns_plaintext() {
		let envelope = Envelope::new();
		let legacy = r#"{"boards":{},"version":1}"#;
		let out = envelope.decrypt_or_passthrough(legacy, "gist", None).await.unwrap();
		assert_eq!(out, legacy);

		// Strict decrypt refuses the same content.
		assert!(envelope.decrypt(legacy, "gist", None).await.is_err());
	}

	#[test]
	fn envelope_detection_requires_shape() {
		assert!(matches!(parse_payload("not json"), ParsedPayload::Plain));
		assert!(matches!(parse_payload(r#"{"encrypted":false}"#), ParsedPayload::Plain));
		assert!(matches!(
			parse_payload(r#"{"v":2,"encrypted":true,"iv":"aa","data":"bb"}"#),
			ParsedPayload::Envelope(_)
		));
	}

	#[test]
	fn derived_keys_are_deterministic() {
		assert_eq!(derive_key("abc"), derive_key("abc"));
		assert_ne!(derive_key("abc"), derive_key("abd"));
	}
}

// vim: ts=4
