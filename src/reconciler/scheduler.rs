//! Auto-sync debounce scheduler.
//!
//! One timer, reset by every [`AutoSyncScheduler::mark_dirty`]. When it
//! fires with pending changes and no round in flight, the configured
//! action runs (a push; auto-sync never pulls). A round that fails is
//! retried on the next mark, not by the timer.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::logging::*;

/// Handle to the debounce task.
pub struct AutoSyncScheduler {
	tx: mpsc::UnboundedSender<()>,
}

impl AutoSyncScheduler {
	/// Spawn the scheduler with a debounce window and an action to run
	/// when the window closes quietly.
	pub fn spawn<F, Fut>(debounce_ms: u64, action: F) -> Self
	where
		F: Fn() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send,
	{
		let (tx, mut rx) = mpsc::unbounded_channel::<()>();
		tokio::spawn(async move {
			let window = Duration::from_millis(debounce_ms);
			loop {
				// Wait for the first dirty mark.
				if rx.recv().await.is_none() {
					return;
				}
				// Then keep extending the window while marks arrive.
				loop {
					match tokio::time::timeout(window, rx.recv()).await {
						Ok(Some(())) => continue,
						Ok(None) => return,
						Err(_) => break,
					}
				}
				debug!("Auto-sync debounce window closed, pushing");
				action().await;
			}
		});
		AutoSyncScheduler { tx }
	}

	/// Record a local change; resets the debounce timer.
	pub fn mark_dirty(&self) {
		let _ = self.tx.send(());
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	#[tokio::test(start_paused = true)]
	async fn fires_once_after_quiet_window() {
		let fired = Arc::new(AtomicUsize::new(0));
		let counter = fired.clone();
		let scheduler = AutoSyncScheduler::spawn(1000, move || {
			let counter = counter.clone();
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
			}
		});

		scheduler.mark_dirty();
		scheduler.mark_dirty();
		tokio::time::sleep(Duration::from_millis(1100)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn marks_inside_window_extend_it() {
		let fired = Arc::new(AtomicUsize::new(0));
		let counter = fired.clone();
		let scheduler = AutoSyncScheduler::spawn(1000, move || {
			let counter = counter.clone();
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
			}
		});

		scheduler.mark_dirty();
		tokio::time::sleep(Duration::from_millis(600)).await;
		scheduler.mark_dirty();
		tokio::time::sleep(Duration::from_millis(600)).await;
		// Second mark reset the window; nothing fired yet.
		assert_eq!(fired.load(Ordering::SeqCst), 0);
		tokio::time::sleep(Duration::from_millis(500)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn no_mark_no_fire() {
		let fired = Arc::new(AtomicUsize::new(0));
		let counter = fired.clone();
		let _scheduler = AutoSyncScheduler::spawn(1000, move || {
			let counter = counter.clone();
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
			}
		});
		tokio::time::sleep(Duration::from_millis(5000)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 0);
	}
}

// vim: ts=4
