//! # gistsync - Encrypted Multi-Device Gist Synchronization
//!
//! gistsync is a client-side, end-to-end-encrypted sync engine that
//! reconciles a local document store (drawing boards, prompt history,
//! task records and media blobs) with GitHub Gists across devices.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gistsync::reconciler::Reconciler;
//!
//! #[tokio::main]
//! async fn main() {
//!     let reconciler = /* wire stores + gateway, see src/main.rs */
//! #   unimplemented!();
//!     match reconciler.sync().await {
//!         gistsync::types::SyncOutcome::Success(report) => {
//!             println!("Uploaded {} boards", report.uploaded.boards);
//!         }
//!         outcome => eprintln!("{:?}", outcome),
//!     }
//! }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod limits;
pub mod logging;
pub mod manifest;
pub mod paged;
pub mod pending;
pub mod reconciler;
pub mod secrets;
pub mod shard;
pub mod store;
pub mod types;
pub mod util;

// Re-export commonly used types and functions
pub use crypto::Envelope;
pub use error::{CryptoError, GatewayError, StoreError, SyncError};
pub use manifest::{BoardSyncInfo, SyncManifest};
pub use reconciler::{AutoSyncScheduler, Reconciler};
pub use shard::{MasterIndex, ShardRouter, ShardSyncer};
pub use types::{Board, SyncOutcome, SyncReport, TaskRecord, TaskStatus};

// vim: ts=4
