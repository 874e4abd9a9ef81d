//! Capacity contracts for the remote file formats.
//!
//! These values are part of the on-wire format: changing any of them
//! requires a format version bump, because older devices size pages and
//! shards against the old numbers.

/// Maximum number of items per task/workflow page file.
pub const PAGE_MAX_ITEMS: usize = 500;

/// Maximum serialized size of a page file in bytes (~900 KB, under the
/// 1 MB practical Gist per-file limit).
pub const PAGE_MAX_BYTES: usize = 900 * 1024;

/// Maximum number of media files per shard Gist.
pub const SHARD_FILE_LIMIT: usize = 100;

/// Maximum aggregate media size per shard Gist (~95 MB).
pub const SHARD_SIZE_LIMIT: u64 = 95 * 1024 * 1024;

/// Largest single media blob accepted for sync.
pub const MEDIA_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Retention window for board and media tombstones before hard delete.
pub const TOMBSTONE_RETENTION_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// PBKDF2-HMAC-SHA-256 iteration count for envelope key derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// AES-GCM initialization vector length in bytes.
pub const AES_IV_LEN: usize = 12;

/// A single Gist PATCH request body should stay under this size; larger
/// batches are split into sequential PATCHes.
pub const PATCH_MAX_BYTES: usize = 8 * 1024 * 1024;

/// Hard per-file size limit enforced by the Gist API.
pub const GIST_FILE_HARD_LIMIT: usize = 10 * 1024 * 1024;

/// Maximum filename length within a Gist.
pub const GIST_FILENAME_MAX: usize = 255;

/// Shard upload parallelism (shards in flight at once).
pub const SHARD_CONCURRENCY: usize = 3;

// vim: ts=4
