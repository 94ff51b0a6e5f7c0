//! Process-wide upload registry.
//!
//! The registry is the synchronization point for record discovery: lookups
//! and the insert-or-reject decision happen under one lock, so two racing
//! creations (or a creation racing a reaper purge) resolve to a single
//! winner. Per-record body flow is *not* serialized here — that is the
//! record's own job.
//!
//! The registry stores an entry type chosen by the embedding layer (the
//! gateway keeps its response slot and handler task alongside the record),
//! abstracted through [`RegistryEntry`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use updraft_field::UploadToken;

use crate::config::TokenReusePolicy;
use crate::error::{ProtocolError, ProtocolResult, TerminateReason};
use crate::record::{Upload, UploadState, UploadStatus};

/// What the registry stores per token.
pub trait RegistryEntry: Clone + Send + Sync + 'static {
    fn record(&self) -> &Arc<Upload>;

    /// Tear the entry down. Implementations owning more than the record
    /// (handler tasks, response slots) extend this.
    fn evict(&self, reason: TerminateReason) {
        self.record().terminate(reason);
    }
}

impl RegistryEntry for Arc<Upload> {
    fn record(&self) -> &Arc<Upload> {
        self
    }
}

/// Snapshot row for introspection endpoints.
#[derive(Debug, Clone)]
pub struct UploadSnapshot {
    pub token: UploadToken,
    pub status: UploadStatus,
}

/// Outcome of one reaper sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub evicted: usize,
    pub retained: usize,
}

/// Concurrent token → upload map. Lookups take the read lock and run in
/// parallel; only creation, removal, and the reaper sweep write.
pub struct UploadRegistry<E> {
    entries: RwLock<HashMap<UploadToken, E>>,
    reuse_policy: TokenReusePolicy,
}

impl<E: RegistryEntry> UploadRegistry<E> {
    pub fn new(reuse_policy: TokenReusePolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            reuse_policy,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<UploadToken, E>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<UploadToken, E>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Atomically find the entry for `token` or insert a fresh one.
    ///
    /// Returns `(entry, created)`. A creation against a live token is
    /// resolved by the configured reuse policy: reject (409) or terminate
    /// the old upload and replace it.
    pub fn find_or_create(
        &self,
        token: &UploadToken,
        make: impl FnOnce() -> E,
    ) -> ProtocolResult<(E, bool)> {
        let mut entries = self.write();
        if let Some(existing) = entries.get(token) {
            match self.reuse_policy {
                TokenReusePolicy::Reject => return Err(ProtocolError::TokenInUse),
                TokenReusePolicy::Replace => {
                    info!(token = %token, "replacing upload under reuse policy");
                    existing.evict(TerminateReason::Replaced);
                }
            }
        }
        let entry = make();
        entries.insert(token.clone(), entry.clone());
        debug!(token = %token, uploads = entries.len(), "upload registered");
        Ok((entry, true))
    }

    pub fn find(&self, token: &UploadToken) -> Option<E> {
        self.read().get(token).cloned()
    }

    pub fn remove(&self, token: &UploadToken) -> Option<E> {
        let removed = self.write().remove(token);
        if removed.is_some() {
            debug!(token = %token, "upload deregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Current state of every registered upload.
    pub fn snapshot(&self) -> Vec<UploadSnapshot> {
        self.read()
            .values()
            .map(|entry| {
                let record = entry.record();
                UploadSnapshot {
                    token: record.token().clone(),
                    status: record.status(),
                }
            })
            .collect()
    }

    /// One pass of the idle policy: evict Idle records that have seen no
    /// byte movement for `idle_timeout`, and purge Complete/Terminated
    /// tombstones of the same age. Receiving records are left alone — the
    /// transfer timeout is enforced inline by the flows.
    pub fn sweep(&self, idle_timeout: Duration, now: Instant) -> SweepStats {
        let mut entries = self.write();
        let mut stats = SweepStats::default();
        entries.retain(|token, entry| {
            let (state, last_activity) = entry.record().activity();
            let expired = now.duration_since(last_activity) >= idle_timeout;
            let evict = expired
                && matches!(
                    state,
                    UploadState::Initial
                        | UploadState::Idle
                        | UploadState::Complete
                        | UploadState::Terminated
                );
            if evict {
                debug!(token = %token, state = %state, "reaping upload");
                entry.evict(TerminateReason::Evicted);
                stats.evicted += 1;
            } else {
                stats.retained += 1;
            }
            !evict
        });
        stats
    }
}

/// Handle to the background reaper task.
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the reaper to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

/// Spawn the periodic sweep loop.
pub fn spawn_reaper<E: RegistryEntry>(
    registry: Arc<UploadRegistry<E>>,
    idle_timeout: Duration,
    interval: Duration,
) -> ReaperHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = registry.sweep(idle_timeout, Instant::now());
                    if stats.evicted > 0 {
                        info!(
                            evicted = stats.evicted,
                            retained = stats.retained,
                            "reaper sweep"
                        );
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("reaper stopping");
                        break;
                    }
                }
            }
        }
    });
    ReaperHandle {
        shutdown_tx,
        handle,
    }
}
