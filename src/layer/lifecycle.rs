//! Install/activate lifecycle.
//!
//! ```text
//! Installing ──WarmUpFinished──▶ Waiting ──PreviousReleased──▶ Activating ──SweepFinished──▶ Activated
//!                                   └──────ForceActivate───────────┘
//! ```
//!
//! Install warms the app-shell partition (best effort). Activation deletes
//! every partition that is not one of the current generation's three names;
//! this cutover is the only eviction in the system.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::cache::partition::{PartitionKind, PartitionNames};
use crate::cache::store::{SharedStore, StoreError};
use crate::http::{is_storable, Destination, InterceptedRequest, RequestKey};
use crate::layer::prefetcher::PrefetchOrchestrator;
use crate::net::SharedFetcher;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Illegal lifecycle transition: {event:?} while {state:?}")]
    IllegalTransition {
        state: LifecycleState,
        event: LifecycleEvent,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    Waiting,
    Activating,
    Activated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Warm-up finished (successfully or not).
    WarmUpFinished,
    /// The previous version no longer serves any page.
    PreviousReleased,
    /// Control message: skip the waiting period.
    ForceActivate,
    /// Stale partitions have been swept.
    SweepFinished,
}

impl LifecycleState {
    /// Pure transition function.
    pub fn transition(self, event: LifecycleEvent) -> Result<LifecycleState, LifecycleError> {
        use LifecycleEvent::*;
        use LifecycleState::*;

        match (self, event) {
            (Installing, WarmUpFinished) => Ok(Waiting),
            (Waiting, PreviousReleased) | (Waiting, ForceActivate) => Ok(Activating),
            (Activating, SweepFinished) => Ok(Activated),
            (state, event) => Err(LifecycleError::IllegalTransition { state, event }),
        }
    }
}

/// Which existing partitions a sweep deletes and which it keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepPlan {
    pub delete: Vec<String>,
    pub keep: Vec<String>,
}

/// Split `existing` into current-generation partitions and stale ones.
pub fn plan_sweep(existing: &[String], names: &PartitionNames) -> SweepPlan {
    let (keep, delete) = existing
        .iter()
        .cloned()
        .partition(|name| names.is_current(name));
    SweepPlan { delete, keep }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub cached: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted: Vec<String>,
    pub kept: Vec<String>,
    pub failed: Vec<String>,
}

/// Drives install → activate for one version of the layer.
pub struct LifecycleController {
    state: watch::Sender<LifecycleState>,
    store: SharedStore,
    fetcher: SharedFetcher,
    prefetcher: Arc<PrefetchOrchestrator>,
    names: PartitionNames,
    warm_up: Vec<Url>,
    bulk_sprites: bool,
    tasks: TaskTracker,
    skip_waiting: AtomicBool,
    skip_notify: Notify,
}

impl LifecycleController {
    pub fn new(
        store: SharedStore,
        fetcher: SharedFetcher,
        prefetcher: Arc<PrefetchOrchestrator>,
        names: PartitionNames,
        warm_up: Vec<Url>,
        bulk_sprites: bool,
        tasks: TaskTracker,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Installing);
        Self {
            state,
            store,
            fetcher,
            prefetcher,
            names,
            warm_up,
            bulk_sprites,
            tasks,
            skip_waiting: AtomicBool::new(false),
            skip_notify: Notify::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn names(&self) -> &PartitionNames {
        &self.names
    }

    fn apply(&self, event: LifecycleEvent) -> Result<LifecycleState, LifecycleError> {
        let mut result = Ok(self.state());
        self.state.send_if_modified(|state| match state.transition(event) {
            Ok(next) => {
                debug!(from = ?*state, to = ?next, ?event, "Lifecycle transition");
                *state = next;
                result = Ok(next);
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result
    }

    /// Warm the app-shell partition, then move to `Waiting`.
    ///
    /// Failures are logged and counted; install always completes.
    pub async fn install(&self) -> Result<InstallReport, LifecycleError> {
        let current = self.state();
        if current != LifecycleState::Installing {
            return Err(LifecycleError::IllegalTransition {
                state: current,
                event: LifecycleEvent::WarmUpFinished,
            });
        }

        let partition = self.names.name(PartitionKind::AppShell);
        if let Err(e) = self.store.open(partition).await {
            warn!(partition, error = %e, "Failed to open app-shell partition");
        }

        let results = join_all(self.warm_up.iter().map(|url| self.warm_one(partition, url))).await;
        let mut report = InstallReport::default();
        for ok in results {
            if ok {
                report.cached += 1;
            } else {
                report.failed += 1;
            }
        }

        if self.bulk_sprites {
            let prefetcher = self.prefetcher.clone();
            self.tasks.spawn(async move {
                if let Err(e) = prefetcher.bulk_warm_up().await {
                    warn!(error = %e, "Bulk sprite prefetch aborted");
                }
            });
        }

        self.apply(LifecycleEvent::WarmUpFinished)?;
        info!(
            cached = report.cached,
            failed = report.failed,
            partition,
            "Install complete"
        );
        Ok(report)
    }

    async fn warm_one(&self, partition: &str, url: &Url) -> bool {
        let request = InterceptedRequest::get(url.clone(), Destination::Other);
        let key = RequestKey::get(url);
        match self.fetcher.fetch(&request).await {
            Ok(response) if is_storable(&key, &response) => {
                match self.store.put(partition, &key, &response).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(url = %url, error = %e, "Failed to store warm-up resource");
                        false
                    }
                }
            }
            Ok(response) => {
                warn!(url = %url, status = response.status, "Warm-up resource not cached");
                false
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Warm-up fetch failed");
                false
            }
        }
    }

    /// Force activation without waiting for the previous version.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
        self.skip_notify.notify_one();
    }

    pub fn is_skipping_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Resolve once the previous version is released or waiting is skipped.
    /// Returns the event that ended the wait.
    pub async fn wait_for_activation<F>(&self, released: F) -> LifecycleEvent
    where
        F: std::future::Future<Output = ()>,
    {
        if self.is_skipping_waiting() {
            return LifecycleEvent::ForceActivate;
        }
        tokio::select! {
            _ = self.skip_notify.notified() => LifecycleEvent::ForceActivate,
            _ = released => LifecycleEvent::PreviousReleased,
        }
    }

    /// Move to `Activating`, sweep stale partitions and finish as `Activated`.
    pub async fn activate(&self, event: LifecycleEvent) -> Result<SweepReport, LifecycleError> {
        self.apply(event)?;
        let report = self.sweep().await;
        self.apply(LifecycleEvent::SweepFinished)?;

        info!(
            deleted = report.deleted.len(),
            kept = report.kept.len(),
            failed = report.failed.len(),
            "Activation complete"
        );
        Ok(report)
    }

    /// Delete every partition outside the current generation. One failure
    /// does not stop the others.
    async fn sweep(&self) -> SweepReport {
        let existing = match self.store.partitions().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "Failed to list partitions, skipping sweep");
                return SweepReport::default();
            }
        };

        let plan = plan_sweep(&existing, &self.names);
        let results: Vec<(String, Result<bool, StoreError>)> =
            join_all(plan.delete.into_iter().map(|name| async move {
                let result = self.store.delete_partition(&name).await;
                (name, result)
            }))
            .await;

        let mut report = SweepReport {
            kept: plan.keep,
            ..Default::default()
        };
        for (name, result) in results {
            match result {
                Ok(_) => {
                    info!(partition = %name, "Deleted stale partition");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(partition = %name, error = %e, "Failed to delete stale partition");
                    report.failed.push(name);
                }
            }
        }
        report
    }
}
