//! Fire-and-forget media sync worker.
//!
//! The reconciler finishes its round without waiting for media; upload
//! batches are posted to a bounded channel and a single worker task
//! drains them sequentially. A full channel drops the batch (the next
//! round re-discovers unsynced URLs from the master index).

use std::sync::Arc;
use tokio::sync::mpsc;

use super::syncer::ShardSyncer;
use crate::logging::*;
use crate::types::MediaBlob;

const QUEUE_DEPTH: usize = 8;

/// Handle for posting media work.
pub struct MediaWorker {
	tx: mpsc::Sender<Vec<MediaBlob>>,
}

impl MediaWorker {
	/// Spawn the worker task over a shard syncer.
	pub fn spawn(syncer: Arc<ShardSyncer>) -> Self {
		let (tx, mut rx) = mpsc::channel::<Vec<MediaBlob>>(QUEUE_DEPTH);
		tokio::spawn(async move {
			while let Some(batch) = rx.recv().await {
				if batch.is_empty() {
					continue;
				}
				match syncer.upload_media(&batch).await {
					Ok(outcomes) => {
						let failed = outcomes.iter().filter(|o| !o.success).count();
						if failed > 0 {
							warn!("Media sync: {}/{} uploads failed", failed, outcomes.len());
						} else {
							debug!("Media sync: {} items processed", outcomes.len());
						}
					}
					Err(e) => warn!("Media sync batch failed: {}", e),
				}
			}
		});
		MediaWorker { tx }
	}

	/// Post a batch without waiting. Returns false when the queue is full
	/// and the batch was dropped.
	pub fn queue_upload(&self, batch: Vec<MediaBlob>) -> bool {
		match self.tx.try_send(batch) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(_)) => {
				debug!("Media queue full, dropping batch");
				false
			}
			Err(mpsc::error::TrySendError::Closed(_)) => false,
		}
	}
}

// vim: ts=4
