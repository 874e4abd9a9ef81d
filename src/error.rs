//! Error types for sync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Main error type for sync operations
///
/// This is the unified error type that crosses the public API boundary.
/// It contains direct variants for reconciler-level failures and nested
/// variants for the crypto, gateway and store domains.
#[derive(Debug)]
pub enum SyncError {
	/// A sync round is already in flight; the call returned immediately
	Busy,

	/// No Gist is configured and none could be discovered
	NotConnected,

	/// Remote cannot be decrypted and local holds no data to overwrite it
	/// with, so refusing to touch either side
	DecryptRefuseEmptyLocal,

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Crypto envelope error (nested)
	Crypto(CryptoError),

	/// Remote gateway error (nested)
	Gateway(GatewayError),

	/// Local persistence error (nested)
	Store(StoreError),

	/// I/O error
	Io(io::Error),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Busy => write!(f, "Sync already in progress"),
			SyncError::NotConnected => write!(f, "No sync Gist configured"),
			SyncError::DecryptRefuseEmptyLocal => {
				write!(f, "Remote cannot be decrypted and local store is empty; refusing to overwrite remote")
			}
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::Crypto(e) => write!(f, "Crypto error: {}", e),
			SyncError::Gateway(e) => write!(f, "Remote error: {}", e),
			SyncError::Store(e) => write!(f, "Store error: {}", e),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl SyncError {
	/// Whether this error means the supplied (or missing) passphrase is the
	/// problem, so the UI should prompt rather than retry.
	pub fn is_password_error(&self) -> bool {
		matches!(
			self,
			SyncError::Crypto(CryptoError::NeedsPassword)
				| SyncError::Crypto(CryptoError::WrongPassword)
		)
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<CryptoError> for SyncError {
	fn from(e: CryptoError) -> Self {
		SyncError::Crypto(e)
	}
}

impl From<GatewayError> for SyncError {
	fn from(e: GatewayError) -> Self {
		SyncError::Gateway(e)
	}
}

impl From<StoreError> for SyncError {
	fn from(e: StoreError) -> Self {
		SyncError::Store(e)
	}
}

impl From<serde_json::Error> for SyncError {
	fn from(e: serde_json::Error) -> Self {
		SyncError::Other { message: format!("JSON error: {}", e) }
	}
}

/// Crypto envelope errors
///
/// Decryption failures are classified so callers can distinguish "ask the
/// user for a passphrase" from "the remote data is damaged".
#[derive(Debug)]
pub enum CryptoError {
	/// The envelope was written under a custom passphrase and none is available
	NeedsPassword,

	/// Decryption failed under the supplied passphrase
	WrongPassword,

	/// Envelope is malformed or authentication failed under the default key
	Corrupt { message: String },
}

impl fmt::Display for CryptoError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CryptoError::NeedsPassword => write!(f, "Encrypted data requires a passphrase"),
			CryptoError::WrongPassword => write!(f, "Wrong passphrase"),
			CryptoError::Corrupt { message } => write!(f, "Corrupt envelope: {}", message),
		}
	}
}

impl Error for CryptoError {}

/// Remote gateway errors
///
/// HTTP statuses from the Gist API are mapped to these domain kinds at the
/// gateway boundary; nothing above the gateway sees raw status codes.
#[derive(Debug)]
pub enum GatewayError {
	/// No API token in the token store
	NoToken,

	/// Token rejected (HTTP 401)
	TokenInvalid,

	/// Token lacks the gist scope (HTTP 403)
	InsufficientScope,

	/// Gist or file does not exist (HTTP 404)
	NotFound,

	/// Request rejected by the API (HTTP 422), with extracted detail
	BadRequest { detail: String },

	/// Remote server failure (HTTP 5xx)
	ServerError { status: u16, message: String },

	/// Filename exceeds the Gist limit
	FilenameTooLong { name: String },

	/// Empty content is not accepted by the Gist API
	EmptyContent { name: String },

	/// Transport-level failure
	Transport { message: String },
}

impl fmt::Display for GatewayError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			GatewayError::NoToken => write!(f, "No API token configured"),
			GatewayError::TokenInvalid => write!(f, "API token is invalid or expired"),
			GatewayError::InsufficientScope => {
				write!(f, "API token lacks the required gist scope")
			}
			GatewayError::NotFound => write!(f, "Gist not found"),
			GatewayError::BadRequest { detail } => write!(f, "Request rejected: {}", detail),
			GatewayError::ServerError { status, message } => {
				write!(f, "Server error {}: {}", status, message)
			}
			GatewayError::FilenameTooLong { name } => {
				write!(f, "Filename too long for Gist: {}", name)
			}
			GatewayError::EmptyContent { name } => {
				write!(f, "Empty content not allowed for file: {}", name)
			}
			GatewayError::Transport { message } => write!(f, "Transport error: {}", message),
		}
	}
}

impl Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
	fn from(e: reqwest::Error) -> Self {
		GatewayError::Transport { message: e.to_string() }
	}
}

impl GatewayError {
	/// Whether a retry can plausibly succeed without user action.
	pub fn is_retryable(&self) -> bool {
		matches!(self, GatewayError::ServerError { .. } | GatewayError::Transport { .. })
	}
}

/// Local persistence errors
#[derive(Debug)]
pub enum StoreError {
	/// Failed to load from the backing store
	LoadFailed { source: Box<dyn Error + Send + Sync> },

	/// Failed to save to the backing store
	SaveFailed { source: Box<dyn Error + Send + Sync> },

	/// Stored data does not parse
	Corrupted { message: String },
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::LoadFailed { source } => write!(f, "Failed to load: {}", source),
			StoreError::SaveFailed { source } => write!(f, "Failed to save: {}", source),
			StoreError::Corrupted { message } => write!(f, "Stored data corrupted: {}", message),
		}
	}
}

impl Error for StoreError {}

impl StoreError {
	pub fn load<E: Error + Send + Sync + 'static>(e: E) -> Self {
		StoreError::LoadFailed { source: Box::new(e) }
	}

	pub fn save<E: Error + Send + Sync + 'static>(e: E) -> Self {
		StoreError::SaveFailed { source: Box::new(e) }
	}
}

// vim: ts=4
