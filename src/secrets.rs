//! Passphrase and API token persistence.
//!
//! The passphrase is stored XOR'd against a device-fingerprint string and
//! base64-wrapped. That is obfuscation, not encryption: its purpose is to
//! keep the passphrase out of casual reads of the local store. The actual
//! protection of synced data is PBKDF2 + AES-GCM on the remote side.
//!
//! The API token is AES-GCM wrapped under a device-local key derived from
//! the same fingerprint.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine;
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::gateway::http::TokenSource;
use crate::limits::AES_IV_LEN;
use crate::logging::*;
use crate::store::{keys, KvStore};

/// Device fingerprint string: host identity pieces concatenated. Stable
/// across restarts on the same machine, different across machines.
pub fn device_fingerprint() -> String {
	let host = sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string());
	let lang = std::env::var("LANG").unwrap_or_default();
	format!("{}|{}|{}|{}", host, std::env::consts::OS, std::env::consts::ARCH, lang)
}

fn xor_with(data: &[u8], key: &[u8]) -> Vec<u8> {
	data.iter().zip(key.iter().cycle()).map(|(b, k)| b ^ k).collect()
}

/// Persisted user passphrase for custom-password envelopes.
pub struct PasswordStore {
	kv: Arc<dyn KvStore>,
	fingerprint: String,
	// None = not loaded yet; Some(None) = loaded, no passphrase set
	cache: Mutex<Option<Option<String>>>,
}

impl PasswordStore {
	pub fn new(kv: Arc<dyn KvStore>) -> Self {
		PasswordStore { kv, fingerprint: device_fingerprint(), cache: Mutex::new(None) }
	}

	pub async fn get(&self) -> Result<Option<String>, StoreError> {
		let mut cache = self.cache.lock().await;
		if let Some(cached) = cache.as_ref() {
			return Ok(cached.clone());
		}

		let loaded = match self.kv.get(keys::SYNC_PASSWORD).await? {
			Some(wrapped) => self.unwrap_password(&wrapped),
			None => None,
		};
		*cache = Some(loaded.clone());
		Ok(loaded)
	}

	pub async fn set(&self, passphrase: &str) -> Result<(), StoreError> {
		let obfuscated = xor_with(passphrase.as_bytes(), self.fingerprint.as_bytes());
		self.kv.set(keys::SYNC_PASSWORD, &BASE64.encode(obfuscated)).await?;
		*self.cache.lock().await = Some(Some(passphrase.to_string()));
		Ok(())
	}

	pub async fn clear(&self) -> Result<(), StoreError> {
		self.kv.delete(keys::SYNC_PASSWORD).await?;
		*self.cache.lock().await = Some(None);
		Ok(())
	}

	fn unwrap_password(&self, wrapped: &str) -> Option<String> {
		let bytes = BASE64.decode(wrapped).ok()?;
		let plain = xor_with(&bytes, self.fingerprint.as_bytes());
		match String::from_utf8(plain) {
			Ok(p) => Some(p),
			Err(_) => {
				// Stored on another machine, or the fingerprint changed.
				warn!("Stored passphrase does not unwrap on this device");
				None
			}
		}
	}
}

/// Accepted API token formats.
pub fn is_valid_token_format(token: &str) -> bool {
	const PREFIXES: [&str; 6] = ["ghp_", "github_pat_", "gho_", "ghu_", "ghs_", "ghr_"];
	if PREFIXES.iter().any(|p| token.starts_with(p) && token.len() > p.len()) {
		return true;
	}
	// Legacy 40-hex personal access tokens.
	token.len() == 40 && token.chars().all(|c| c.is_ascii_hexdigit())
}

/// Persisted API token, AES-wrapped under a device-local key.
pub struct TokenStore {
	kv: Arc<dyn KvStore>,
	key: [u8; 32],
	cache: Mutex<Option<Option<String>>>,
}

impl TokenStore {
	pub fn new(kv: Arc<dyn KvStore>) -> Self {
		// Device-local wrapping key; never leaves this machine, so a low
		// iteration count is acceptable here.
		let mut key = [0u8; 32];
		pbkdf2::pbkdf2_hmac::<sha2::Sha256>(
			device_fingerprint().as_bytes(),
			b"gistsync-token-wrap",
			1000,
			&mut key,
		);
		TokenStore { kv, key, cache: Mutex::new(None) }
	}

	pub async fn get(&self) -> Result<Option<String>, StoreError> {
		let mut cache = self.cache.lock().await;
		if let Some(cached) = cache.as_ref() {
			return Ok(cached.clone());
		}

		let loaded = match self.kv.get(keys::API_TOKEN).await? {
			Some(wrapped) => self.unwrap_token(&wrapped),
			None => None,
		};
		*cache = Some(loaded.clone());
		Ok(loaded)
	}

	pub async fn set(&self, token: &str) -> Result<(), StoreError> {
		if !is_valid_token_format(token) {
			return Err(StoreError::Corrupted {
				message: "token does not match any accepted format".to_string(),
			});
		}

		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
		let mut iv = [0u8; AES_IV_LEN];
		rand::thread_rng().fill_bytes(&mut iv);
		let ciphertext = cipher
			.encrypt(Nonce::from_slice(&iv), token.as_bytes())
			.map_err(|_| StoreError::Corrupted { message: "token wrap failed".to_string() })?;

		let mut wrapped = Vec::with_capacity(AES_IV_LEN + ciphertext.len());
		wrapped.extend_from_slice(&iv);
		wrapped.extend_from_slice(&ciphertext);
		self.kv.set(keys::API_TOKEN, &BASE64.encode(wrapped)).await?;
		*self.cache.lock().await = Some(Some(token.to_string()));
		Ok(())
	}

	pub async fn clear(&self) -> Result<(), StoreError> {
		self.kv.delete(keys::API_TOKEN).await?;
		*self.cache.lock().await = Some(None);
		Ok(())
	}

	fn unwrap_token(&self, wrapped: &str) -> Option<String> {
		let bytes = BASE64.decode(wrapped).ok()?;
		if bytes.len() <= AES_IV_LEN {
			return None;
		}
		let (iv, ciphertext) = bytes.split_at(AES_IV_LEN);
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
		let plain = cipher.decrypt(Nonce::from_slice(iv), ciphertext).ok()?;
		String::from_utf8(plain).ok()
	}
}

#[async_trait]
impl TokenSource for TokenStore {
	async fn token(&self) -> Option<String> {
		self.get().await.ok().flatten()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::store::memory::MemoryStore;

	#[tokio::test]
	async fn password_round_trip() {
		let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
		let store = PasswordStore::new(kv.clone());

		assert_eq!(store.get().await.unwrap(), None);
		store.set("correct horse").await.unwrap();
		assert_eq!(store.get().await.unwrap().as_deref(), Some("correct horse"));

		// A second store over the same KV unwraps it too (same device).
		let other = PasswordStore::new(kv);
		assert_eq!(other.get().await.unwrap().as_deref(), Some("correct horse"));

		store.clear().await.unwrap();
		assert_eq!(store.get().await.unwrap(), None);
	}

	#[tokio::test]
	async fn password_is_not_stored_in_the_clear() {
		let kv = Arc::new(MemoryStore::new());
		let store = PasswordStore::new(kv.clone());
		store.set("hunter2").await.unwrap();
		let raw = kv.get(keys::SYNC_PASSWORD).await.unwrap().unwrap();
		assert!(!raw.contains("hunter2"));
	}

	#[test]
	fn token_format_validation() {
		assert!(is_valid_token_format("ghp_abcdef1234"));
		assert!(is_valid_token_format("github_pat_longtokenvalue"));
		assert!(is_valid_token_format("gho_x"));
		assert!(is_valid_token_format(&"a1".repeat(20)));
		assert!(!is_valid_token_format("ghp_"));
		assert!(!is_valid_token_format("not-a-token"));
		assert!(!is_valid_token_format(&"z".repeat(40)));
	}

	#[tokio::test]
	async fn token_round_trip_and_wrapping() {
		let kv = Arc::new(MemoryStore::new());
		let store = TokenStore::new(kv.clone());

		let token = "ghp_exampletoken123456";
		store.set(token).await.unwrap();
		assert_eq!(store.get().await.unwrap().as_deref(), Some(token));

		let raw = kv.get(keys::API_TOKEN).await.unwrap().unwrap();
		assert!(!raw.contains("ghp_"));

		assert!(store.set("garbage").await.is_err());
	}
}

// vim: ts=4
