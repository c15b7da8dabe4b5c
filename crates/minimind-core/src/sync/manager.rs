//! Background agent that drains the mutation queue against the remote API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::connectivity::{ConnectivityObserver, SyncTrigger};
use super::remote::{RemoteApi, RemoteRequest};
use super::status::SyncStatusSnapshot;
use crate::config::SyncSettings;
use crate::db::{LeaseGrant, LocalStore, MutationQueue};
use crate::error::{Error, Result};
use crate::models::{OperationId, OperationStatus, SyncOperation, SyncStatus};

/// Whether a drain pass is currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Draining,
}

/// Why a pass or retry did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    /// Another agent holds the queue lease
    LeaseHeld,
    ShuttingDown,
}

/// Result of replaying a single queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Synced,
    /// Failed; another attempt is scheduled after `delay`
    Retrying { retry_count: u32, delay: Duration },
    /// Failed for the last time; the record was flagged with `record_status`
    Failed { record_status: SyncStatus },
    /// Claimed by a concurrent replay or no longer pending
    Skipped,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Set when the whole pass was skipped
    pub skipped_reason: Option<SkipReason>,
}

impl DrainReport {
    const fn skipped(reason: SkipReason) -> Self {
        Self {
            attempted: 0,
            synced: 0,
            retried: 0,
            failed: 0,
            skipped: 0,
            skipped_reason: Some(reason),
        }
    }

    fn record(&mut self, outcome: OperationOutcome) {
        match outcome {
            OperationOutcome::Synced => self.synced += 1,
            OperationOutcome::Retrying { .. } => self.retried += 1,
            OperationOutcome::Failed { .. } => self.failed += 1,
            OperationOutcome::Skipped => {
                self.skipped += 1;
                return;
            }
        }
        self.attempted += 1;
    }
}

/// Decrements the active pass count when a pass ends, however it ends
struct ActivePass<'a>(&'a AtomicUsize);

impl<'a> ActivePass<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActivePass<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner<R> {
    store: LocalStore,
    queue: MutationQueue,
    remote: R,
    observer: Arc<ConnectivityObserver>,
    settings: SyncSettings,
    agent_id: String,
    shutdown: watch::Sender<bool>,
    active_passes: AtomicUsize,
    driver: Mutex<Option<JoinHandle<()>>>,
    /// Spawned passes and retries, awaited by `destroy`
    tasks: TaskTracker,
}

/// One sync agent for one user's queue.
///
/// Owned by the composition root. Cloning is cheap and every clone drives
/// the same agent.
pub struct SyncManager<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for SyncManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteApi> SyncManager<R> {
    pub fn new(
        store: LocalStore,
        queue: MutationQueue,
        remote: R,
        observer: Arc<ConnectivityObserver>,
        settings: SyncSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                queue,
                remote,
                observer,
                settings,
                agent_id: format!("agent-{}", Uuid::now_v7()),
                shutdown,
                active_passes: AtomicUsize::new(0),
                driver: Mutex::new(None),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    pub fn observer(&self) -> &Arc<ConnectivityObserver> {
        &self.inner.observer
    }

    pub fn phase(&self) -> SyncPhase {
        if self.inner.active_passes.load(Ordering::SeqCst) > 0 {
            SyncPhase::Draining
        } else {
            SyncPhase::Idle
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Spawn the driver: a pass every sync interval (the first one right
    /// away) and on every observer trigger. Calling it twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut driver = self.inner.driver.lock().await;
        if driver.is_some() {
            return Ok(());
        }
        if self.is_shutting_down() {
            return Err(Error::InvalidInput(
                "sync manager has been destroyed".to_string(),
            ));
        }

        if !self.take_lease().await? {
            tracing::info!("Sync lease held by another agent; waiting for it to expire");
        }

        let triggers = self.inner.observer.subscribe();
        let shutdown = self.inner.shutdown.subscribe();
        *driver = Some(tokio::spawn(self.clone().run_driver(triggers, shutdown)));

        tracing::info!(
            "Sync agent {} started (interval {:?})",
            self.inner.agent_id,
            self.inner.settings.sync_interval()
        );
        Ok(())
    }

    async fn run_driver(
        self,
        mut triggers: broadcast::Receiver<SyncTrigger>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(self.inner.settings.sync_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = interval.tick() => self.spawn_pass(),
                trigger = triggers.recv() => match trigger {
                    Ok(trigger) => {
                        tracing::debug!("Sync triggered by {trigger:?}");
                        self.spawn_pass();
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!("Coalesced {missed} sync triggers");
                        self.spawn_pass();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        tracing::debug!("Sync driver stopped");
    }

    fn spawn_pass(&self) {
        let manager = self.clone();
        self.inner.tasks.spawn(async move {
            if let Err(error) = manager.sync_pending_operations().await {
                tracing::error!("Sync pass failed: {error}");
            }
        });
    }

    async fn skip_reason(&self) -> Result<Option<SkipReason>> {
        if self.is_shutting_down() {
            return Ok(Some(SkipReason::ShuttingDown));
        }
        if !self.inner.observer.is_online() {
            return Ok(Some(SkipReason::Offline));
        }
        let leased = self.take_lease().await?;
        Ok((!leased).then_some(SkipReason::LeaseHeld))
    }

    /// Take or renew the queue lease.
    ///
    /// On takeover, claims left by other agents are released: only the
    /// lease holder replays entries, so those claims belong to agents that
    /// stopped mid-replay.
    async fn take_lease(&self) -> Result<bool> {
        let queue = &self.inner.queue;
        let agent_id = &self.inner.agent_id;
        match queue
            .try_acquire_lease(agent_id, self.inner.settings.lease_ttl())
            .await?
        {
            LeaseGrant::Denied => Ok(false),
            LeaseGrant::Renewed => Ok(true),
            LeaseGrant::Acquired => {
                let released = queue.release_claims(agent_id).await?;
                if released > 0 {
                    tracing::info!("Released {released} stale in-flight claims");
                }
                Ok(true)
            }
        }
    }

    /// Run one drain pass over the entries that are due, oldest first.
    ///
    /// Remote failures are absorbed into per-entry retry state; only local
    /// storage errors are returned.
    pub async fn sync_pending_operations(&self) -> Result<DrainReport> {
        if let Some(reason) = self.skip_reason().await? {
            tracing::debug!("Skipping sync pass: {reason:?}");
            return Ok(DrainReport::skipped(reason));
        }

        let _pass = ActivePass::enter(&self.inner.active_passes);
        let due = self.inner.queue.due().await?;
        let mut report = DrainReport::default();

        for operation in &due {
            if self.is_shutting_down() {
                tracing::debug!("Sync pass interrupted by shutdown");
                break;
            }
            report.record(self.sync_operation(operation).await?);
        }

        if report.attempted > 0 {
            tracing::info!(
                "Sync pass: {} synced, {} retrying, {} failed",
                report.synced,
                report.retried,
                report.failed
            );
        }
        Ok(report)
    }

    /// Run a drain pass immediately
    pub async fn force_sync(&self) -> Result<DrainReport> {
        self.sync_pending_operations().await
    }

    /// Replay one queue entry and record the outcome.
    ///
    /// The entry is claimed first, so a concurrent pass or retry never
    /// replays it at the same time.
    pub async fn sync_operation(&self, operation: &SyncOperation) -> Result<OperationOutcome> {
        let request = RemoteRequest::from_operation(operation)?;
        if !self
            .inner
            .queue
            .claim(&operation.id, &self.inner.agent_id)
            .await?
        {
            tracing::debug!("Operation {} already claimed or settled", operation.id);
            return Ok(OperationOutcome::Skipped);
        }

        let outcome = self.replay_claimed(operation, request).await;
        if outcome.is_err() {
            if let Err(error) = self.inner.queue.release(&operation.id).await {
                tracing::warn!("Failed to release claim on {}: {error}", operation.id);
            }
        }
        outcome
    }

    async fn replay_claimed(
        &self,
        operation: &SyncOperation,
        request: RemoteRequest,
    ) -> Result<OperationOutcome> {
        let queue = &self.inner.queue;
        // The snapshot may predate failures recorded by a concurrent retry
        let retry_count = queue
            .get(&operation.id)
            .await?
            .map_or(operation.retry_count, |current| current.retry_count);

        tracing::debug!(
            "Replaying {} {} {} (attempt {})",
            operation.operation,
            operation.table_name,
            operation.record_id,
            retry_count + 1
        );

        let error = match self.inner.remote.send(request).await {
            Ok(()) => {
                queue.mark_synced(&operation.id).await?;
                self.inner
                    .store
                    .settle_record(operation, SyncStatus::Synced)
                    .await?;
                return Ok(OperationOutcome::Synced);
            }
            Err(error) => error,
        };

        let new_retry_count = retry_count.saturating_add(1);
        match queue.mark_failed(&operation.id, new_retry_count).await? {
            OperationStatus::Pending => {
                let delay = queue.policy().backoff(new_retry_count);
                tracing::warn!(
                    "Sync of {} {} failed (attempt {new_retry_count}), retrying in {delay:?}: {error}",
                    operation.table_name,
                    operation.record_id
                );
                self.schedule_retry(operation.id, delay);
                Ok(OperationOutcome::Retrying {
                    retry_count: new_retry_count,
                    delay,
                })
            }
            OperationStatus::Failed => {
                let record_status = if error.is_conflict() {
                    SyncStatus::Conflict
                } else {
                    SyncStatus::Error
                };
                tracing::error!(
                    "Giving up on {} {} {} after {new_retry_count} attempts: {error}",
                    operation.operation,
                    operation.table_name,
                    operation.record_id
                );
                self.inner
                    .store
                    .settle_record(operation, record_status)
                    .await?;
                Ok(OperationOutcome::Failed { record_status })
            }
            // Settled by someone else while this call was in flight
            OperationStatus::Synced => Ok(OperationOutcome::Skipped),
        }
    }

    /// Re-attempt one entry after `delay`, independently of the periodic pass
    fn schedule_retry(&self, id: OperationId, delay: Duration) {
        let manager = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }

        self.inner.tasks.spawn(async move {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::debug!("Retry of {id} cancelled by shutdown");
                }
                () = tokio::time::sleep(delay) => manager.retry_operation(id).await,
            }
        });
    }

    async fn retry_operation(&self, id: OperationId) {
        match self.skip_reason().await {
            Ok(None) => {}
            Ok(Some(reason)) => {
                tracing::debug!("Retry of {id} deferred: {reason:?}");
                return;
            }
            Err(error) => {
                tracing::error!("Retry of {id} failed: {error}");
                return;
            }
        }

        let result = match self.inner.queue.get(&id).await {
            Ok(Some(operation)) if operation.status == OperationStatus::Pending => {
                self.sync_operation(&operation).await.map(|_| ())
            }
            Ok(_) => {
                tracing::debug!("Retry of {id} skipped: no longer pending");
                Ok(())
            }
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            tracing::error!("Retry of {id} failed: {error}");
        }
    }

    /// Current status projection
    pub async fn status(&self) -> Result<SyncStatusSnapshot> {
        let pending = self.inner.queue.pending().await?;
        let failed = self.inner.queue.count(OperationStatus::Failed).await?;
        Ok(SyncStatusSnapshot::project(
            self.inner.observer.is_online(),
            self.phase() == SyncPhase::Draining,
            &pending,
            failed,
        ))
    }

    /// Stop the driver and every scheduled retry, then give up the lease.
    ///
    /// Remote calls already in flight finish and record their outcome
    /// before this returns.
    pub async fn destroy(&self) {
        self.inner.shutdown.send_replace(true);

        let driver = self.inner.driver.lock().await.take();
        if let Some(handle) = driver {
            if let Err(error) = handle.await {
                tracing::warn!("Sync driver ended abnormally: {error}");
            }
        }

        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        if let Err(error) = self.inner.queue.release_lease(&self.inner.agent_id).await {
            tracing::warn!("Failed to release sync lease: {error}");
        }
        tracing::info!("Sync agent {} stopped", self.inner.agent_id);
    }
}
