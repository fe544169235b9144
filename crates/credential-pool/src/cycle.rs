//! The rotation cycle: one locked unit of dedup → refresh → swap → prune

use state_store::StateStore;
use tracing::info;

use crate::error::Result;
use crate::gc::{self, PruneReport};
use crate::key::RotationState;
use crate::pool;
use crate::refresh::{RefreshEngine, SyncReport};
use crate::sink::CredentialSink;

/// Counts from one full cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub merged: usize,
    pub sync: SyncReport,
    pub swapped: bool,
    pub prune: PruneReport,
}

/// Run one rotation cycle against the store.
///
/// The whole cycle is a single `StateStore::perform` unit: every
/// concurrent invoker sees either the state before this cycle or after
/// it, and the ordering dedup → refresh → swap → prune is fixed. Refresh
/// network calls run inside the locked unit; their timeouts bound how
/// long the lock is held.
pub async fn run_cycle(
    store: &StateStore<RotationState>,
    engine: &RefreshEngine,
    sink: &dyn CredentialSink,
) -> Result<CycleReport> {
    let now_ms = common::now_millis();
    let report = store
        .perform(|mut state: RotationState| async move {
            let merged = pool::deduplicate_keys(&mut state, now_ms);
            let sync = engine.sync_keys(&mut state, now_ms).await;
            let swapped = engine.swap_active_if_expiring(&mut state, sink, now_ms).await;
            let prune = gc::prune_dead_keys(&mut state, now_ms);
            (
                state,
                CycleReport {
                    merged,
                    sync,
                    swapped,
                    prune,
                },
            )
        })
        .await?;

    info!(
        merged = report.merged,
        refreshed = report.sync.refreshed,
        invalidated = report.sync.invalidated,
        refresh_failures = report.sync.failed,
        swapped = report.swapped,
        tombstoned = report.prune.tombstoned,
        deleted = report.prune.deleted,
        "rotation cycle complete"
    );
    Ok(report)
}
