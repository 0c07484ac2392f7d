//! Pass lifecycle: at most one pass at a time, newest trigger wins.
//!
//! A trigger cancels the running pass, waits for it to stop, then starts a
//! fresh one. Status is published on a `watch` channel; only the pass that
//! was not superseded publishes a terminal status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{PassOutcome, Reconciler};
use super::mapping::IdentityMapper;
use super::types::{SyncReport, SyncStats, SyncStatus};

struct ActivePass {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    done: watch::Receiver<bool>,
}

struct Inner {
    reconciler: Reconciler,
    mapper: Mutex<IdentityMapper>,
    status: watch::Sender<SyncStatus>,
    report: watch::Sender<Option<SyncReport>>,
    enabled: AtomicBool,
    signed_in: AtomicBool,
    current: Mutex<Option<ActivePass>>,
}

impl Inner {
    async fn run(&self, cancel: CancellationToken) {
        let outcome = {
            let mut mapper = self.mapper.lock().await;
            self.reconciler.run_pass(&mut mapper, &cancel).await
        };
        match outcome {
            PassOutcome::Finished(report) if !cancel.is_cancelled() => {
                self.status.send_replace(report.status.clone());
                self.report.send_replace(Some(report));
            }
            PassOutcome::Finished(_) | PassOutcome::Cancelled(_) => {
                debug!("superseded pass discarded its status");
            }
        }
    }

    /// A pass that died without finishing still owes a terminal status,
    /// unless it had been superseded.
    fn pass_died(&self, cancel: &CancellationToken, err: &JoinError) {
        warn!(error = %err, "sync pass died");
        if cancel.is_cancelled() {
            return;
        }
        let status = SyncStatus::Error(format!("sync pass failed: {err}"));
        self.status.send_replace(status.clone());
        self.report.send_replace(Some(SyncReport {
            status,
            stats: SyncStats::default(),
        }));
    }
}

/// Owns the reconciler and the identity mapper; cheap to clone.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<Inner>,
}

impl SyncService {
    pub fn new(reconciler: Reconciler, mapper: IdentityMapper, enabled: bool) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        let (report, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                reconciler,
                mapper: Mutex::new(mapper),
                status,
                report,
                enabled: AtomicBool::new(enabled),
                signed_in: AtomicBool::new(true),
                current: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Status and stats of the most recent pass that ran to completion.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.inner.report.borrow().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Start a pass, replacing any pass in flight. Returns `false` when
    /// syncing is disabled.
    pub async fn trigger(&self) -> bool {
        if !self.is_enabled() {
            debug!("sync disabled; trigger ignored");
            return false;
        }

        let mut current = self.inner.current.lock().await;
        if let Some(active) = current.take() {
            info!("cancelling in-flight sync pass");
            active.cancel.cancel();
            if let Err(e) = active.handle.await {
                warn!(error = %e, "replaced sync pass did not shut down cleanly");
            }
        }

        let cancel = CancellationToken::new();
        let (done_tx, done) = watch::channel(false);
        self.inner.status.send_replace(SyncStatus::Syncing);

        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            // The pass runs on its own task so a panic surfaces here as a JoinError.
            let pass = tokio::spawn({
                let inner = Arc::clone(&inner);
                let token = token.clone();
                async move { inner.run(token).await }
            });
            if let Err(e) = pass.await {
                inner.pass_died(&token, &e);
            }
            done_tx.send_replace(true);
        });

        *current = Some(ActivePass {
            cancel,
            handle,
            done,
        });
        true
    }

    /// Wait until the pass in flight (if any) has stopped.
    pub async fn wait_idle(&self) {
        let done = self
            .inner
            .current
            .lock()
            .await
            .as_ref()
            .map(|active| active.done.clone());
        if let Some(mut done) = done {
            // Err means the pass task died; either way it is over.
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Trigger a pass and wait for it. `None` when disabled or superseded.
    pub async fn sync_now(&self) -> Option<SyncReport> {
        if !self.trigger().await {
            return None;
        }
        self.wait_idle().await;
        if self.status().is_syncing() {
            None
        } else {
            self.last_report()
        }
    }

    pub async fn enable(&self) {
        self.inner.enabled.store(true, Ordering::SeqCst);
        info!("sync enabled");
        if self.inner.signed_in.load(Ordering::SeqCst) {
            self.trigger().await;
        }
    }

    pub async fn disable(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        info!("sync disabled");
        self.stop().await;
    }

    async fn stop(&self) {
        let active = self.inner.current.lock().await.take();
        if let Some(active) = active {
            active.cancel.cancel();
            if let Err(e) = active.handle.await {
                warn!(error = %e, "stopped sync pass did not shut down cleanly");
            }
        }
        self.inner.status.send_replace(SyncStatus::Idle);
    }

    /// React to sign-in changes: sync on sign-in, go idle on sign-out.
    pub fn follow_sign_in(&self, mut signed_in: watch::Receiver<bool>) -> JoinHandle<()> {
        let service = self.clone();
        let initial = *signed_in.borrow_and_update();
        service.inner.signed_in.store(initial, Ordering::SeqCst);
        tokio::spawn(async move {
            while signed_in.changed().await.is_ok() {
                let now_signed_in = *signed_in.borrow_and_update();
                service
                    .inner
                    .signed_in
                    .store(now_signed_in, Ordering::SeqCst);
                if now_signed_in {
                    info!("signed in; starting sync");
                    service.trigger().await;
                } else {
                    info!("signed out; stopping sync");
                    service.stop().await;
                }
            }
        })
    }
}
