// crates/intake-dispatch/src/worker.rs
// ============================================================================
// Module: Dispatch Worker Loop
// Description: A single cooperative task that drains the outbox on either a
// "batch available" nudge or a poll interval, and exits cleanly on shutdown.
// Purpose: Replace the mixed sync/async dispatcher loop with one worker that
// selects over two channels, per the redesigned concurrency model.
// Dependencies: intake-core, tokio
// ============================================================================

//! ## Overview
//! The source's dispatcher ran a thread that blocked on a queue pop and a
//! separate async task that polled on a timer; here both collapse into one
//! `tokio::select!` over a notify channel and a shutdown channel, with a
//! poll interval as the fallback nudge. Exactly one task owns the drain
//! loop, so there is never more than one in-flight `drain_once` call.

use std::time::Duration;

use intake_core::DomainError;
use intake_core::Timestamp;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::dispatcher::CompositeDispatcher;
use crate::dispatcher::DrainSummary;

/// Handle used to nudge the worker that a batch is likely available, and to
/// request a clean shutdown.
#[derive(Clone)]
pub struct WorkerHandle {
    notify: mpsc::Sender<()>,
    shutdown: watch::Sender<bool>,
}

impl WorkerHandle {
    /// Nudges the worker to drain immediately rather than waiting for the
    /// next poll interval. A full notify channel (worker already about to
    /// run) is not an error; the pending nudge is dropped silently.
    pub fn notify_batch_available(&self) {
        let _ = self.notify.try_send(());
    }

    /// Requests the worker to stop after its current drain pass completes.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Periodic outbox purge configuration: how often to sweep, and how old a
/// dispatched entry must be before it is removed.
#[derive(Debug, Clone, Copy)]
pub struct PurgePolicy {
    /// Interval between purge sweeps.
    pub interval: Duration,
    /// Age, in days, a dispatched entry must reach before it is purged.
    pub retention_days: u32,
}

/// Runs the dispatch worker loop until [`WorkerHandle::shutdown`] is called.
///
/// Selects cooperatively between a batch-available notification, the
/// `poll_interval` fallback, the shutdown signal, and — when `purge_policy`
/// is given — a periodic sweep that removes dispatched outbox entries past
/// their retention window. Exactly one `drain_once` call is ever in flight.
/// Returns the handle used to drive it and the join future to await on.
pub fn spawn(
    dispatcher: CompositeDispatcher,
    poll_interval: Duration,
    purge_policy: Option<PurgePolicy>,
) -> (WorkerHandle, tokio::task::JoinHandle<Result<(), DomainError>>) {
    let (notify_tx, mut notify_rx) = mpsc::channel(1);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = WorkerHandle { notify: notify_tx, shutdown: shutdown_tx };

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut purge_ticker = purge_policy.map(|policy| {
            let mut ticker = tokio::time::interval(policy.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });
        let retention_days = purge_policy.map_or(0, |policy| policy.retention_days);

        loop {
            tokio::select! {
                biased;

                () = shutdown_changed(&mut shutdown_rx) => {
                    break;
                }
                _ = notify_rx.recv() => {
                    run_drain(&dispatcher)?;
                }
                _ = ticker.tick() => {
                    run_drain(&dispatcher)?;
                }
                _ = tick_if_some(purge_ticker.as_mut()) => {
                    run_purge(&dispatcher, retention_days)?;
                }
            }
        }

        Ok(())
    });

    (handle, join)
}

/// Awaits the next tick of `ticker` if present, otherwise never resolves —
/// letting `tokio::select!` skip this branch entirely when no purge policy
/// was configured.
async fn tick_if_some(ticker: Option<&mut tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn shutdown_changed(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

fn run_drain(dispatcher: &CompositeDispatcher) -> Result<DrainSummary, DomainError> {
    let now = Timestamp::new(chrono::Utc::now());
    let summary = dispatcher.drain_once(now)?;
    if summary.selected > 0 {
        tracing::debug!(
            selected = summary.selected,
            delivered = summary.delivered,
            retried = summary.retried,
            dead_lettered = summary.dead_lettered,
            "outbox drain pass complete"
        );
    }
    Ok(summary)
}

fn run_purge(dispatcher: &CompositeDispatcher, retention_days: u32) -> Result<(), DomainError> {
    let cutoff = Timestamp::new(chrono::Utc::now()).plus_seconds(-i64::from(retention_days) * 86_400);
    let purged = dispatcher.purge_dispatched_before(cutoff)?;
    if purged > 0 {
        tracing::debug!(purged, retention_days, "outbox purge pass complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions on worker shutdown; a panic here is a test failure."
    )]

    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use intake_core::DomainError as CoreDomainError;
    use intake_core::OutboxEntry;
    use intake_core::OutboxStore;
    use intake_core::TenantId;
    use uuid::Uuid;

    use super::*;
    use crate::dispatcher::DispatchPolicy;

    struct EmptyOutbox {
        purge_calls: AtomicU32,
    }

    impl EmptyOutbox {
        fn new() -> Self {
            Self { purge_calls: AtomicU32::new(0) }
        }
    }

    impl OutboxStore for EmptyOutbox {
        fn select_batch(&self, _limit: u32, _max_attempts: u32, _now: Timestamp) -> Result<Vec<OutboxEntry>, CoreDomainError> {
            Ok(Vec::new())
        }
        fn mark_dispatched(&self, _id: Uuid, _dispatched_at: Timestamp) -> Result<(), CoreDomainError> {
            Ok(())
        }
        fn mark_failed(&self, _id: Uuid, _error: &str, _next_visible_at: Timestamp, _max_attempts: u32) -> Result<(), CoreDomainError> {
            Ok(())
        }
        fn dead_letters(&self, _tenant: &TenantId, _limit: u32) -> Result<Vec<OutboxEntry>, CoreDomainError> {
            Ok(Vec::new())
        }
        fn purge_dispatched_before(&self, _cutoff: Timestamp) -> Result<u64, CoreDomainError> {
            self.purge_calls.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    #[tokio::test]
    async fn shuts_down_cleanly_on_signal() {
        let dispatcher = CompositeDispatcher::new(Arc::new(EmptyOutbox::new()), DispatchPolicy::default());
        let (handle, join) = spawn(dispatcher, Duration::from_secs(60), None);

        handle.notify_batch_available();
        handle.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .expect("worker exits before timeout")
            .expect("worker task does not panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn purges_on_the_configured_interval() {
        let outbox = Arc::new(EmptyOutbox::new());
        let dispatcher = CompositeDispatcher::new(outbox.clone(), DispatchPolicy::default());
        let purge_policy = PurgePolicy { interval: Duration::from_millis(10), retention_days: 30 };
        let (handle, join) = spawn(dispatcher, Duration::from_secs(60), Some(purge_policy));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .expect("worker exits before timeout")
            .expect("worker task does not panic")
            .expect("worker does not error");

        assert!(outbox.purge_calls.load(Ordering::SeqCst) > 0);
    }
}
