//! Sharded media store.
//!
//! Media blobs are routed across multiple shard Gists by a single master
//! index: every synced URL maps to `(shard, filename)` there, so "is this
//! synced" never touches a shard. Shards are bounded in file count and
//! aggregate size; allocation is fill-first, and exhausted shards spill
//! into freshly created ones.

pub mod files;
pub mod maintenance;
pub mod master;
pub mod router;
pub mod syncer;
pub mod worker;

pub use files::{MediaSource, ShardManifest, SyncedMediaFile, SHARD_MANIFEST_FILE};
pub use maintenance::ShardIssue;
pub use master::{FileIndexEntry, MasterIndex, MediaTombstone, ShardInfo, ShardStatus};
pub use router::{AllocationPlan, ShardRouter};
pub use syncer::{MediaUploadOutcome, ShardSyncer};
pub use worker::MediaWorker;

// vim: ts=4
