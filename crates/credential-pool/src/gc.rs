//! Tombstone-then-delete pruning of dead keys
//!
//! Deletion is two-phase: an invalid key is first converted to a
//! tombstone, and only a tombstone past the retention TTL is physically
//! removed. The grace period keeps the key id resolvable while anyone is
//! still correlating rotation log entries against it. Account-level
//! authentication failures are recorded once per account and survive the
//! key forever.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::constants::TOMBSTONE_TTL_MS;
use crate::key::{KeyStatus, RotationEventKind, RotationState};

/// Counts from one prune pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub tombstoned: usize,
    pub deleted: usize,
    pub auth_failures: usize,
}

/// One GC pass: emit auth-failure audit entries, tombstone invalid keys,
/// delete expired tombstones.
///
/// The active key is never a candidate, even when invalid — the pool must
/// not drop to zero active credentials mid-cycle; a rotation replaces it
/// first.
pub fn prune_dead_keys(state: &mut RotationState, now_ms: u64) -> PruneReport {
    let mut report = PruneReport::default();
    let active = state.active_key_id.clone();

    let mut candidates: Vec<String> = state
        .keys
        .iter()
        .filter(|(id, key)| {
            key.status == KeyStatus::Invalid && active.as_deref() != Some(id.as_str())
        })
        .map(|(id, _)| id.clone())
        .collect();
    candidates.sort();

    // Audit pass: at most one auth-failure event per unique account, and
    // none while a usable sibling still covers that account.
    let mut seen: HashSet<String> = HashSet::new();
    for id in &candidates {
        let email = resolve_account_email(state, id);
        let dedupe_key = email.clone().unwrap_or_else(|| id.clone());
        if !seen.insert(dedupe_key) {
            continue;
        }

        let covered = email.as_deref().is_some_and(|account| {
            state
                .keys
                .iter()
                .any(|(sibling_id, sibling)| {
                    sibling_id != id
                        && sibling.is_usable()
                        && sibling.account_email.as_deref() == Some(account)
                })
        });
        if covered {
            continue;
        }

        warn!(key_id = %id, account_email = ?email, "account authentication failed");
        state.log_event(
            now_ms,
            RotationEventKind::AuthFailed,
            id.clone(),
            "account authentication failed",
            email,
        );
        report.auth_failures += 1;
    }

    // Conversion pass: invalid → tombstone. Log cleanup deliberately
    // waits for the TTL-deletion phase.
    for id in &candidates {
        let email = match state.keys.get_mut(id) {
            Some(key) => {
                key.status = KeyStatus::Tombstone;
                key.tombstoned_at = Some(now_ms);
                key.account_email.clone()
            }
            None => continue,
        };
        state.log_event(
            now_ms,
            RotationEventKind::KeyTombstoned,
            id.clone(),
            "invalid key tombstoned",
            email,
        );
        report.tombstoned += 1;
    }
    if report.tombstoned > 0 {
        metrics::counter!("rotation_keys_tombstoned_total").increment(report.tombstoned as u64);
    }

    // Deletion pass: tombstones strictly past the TTL. Their log entries
    // go with them, except the auth-failure audit records.
    let expired: Vec<String> = state
        .keys
        .iter()
        .filter(|(_, key)| {
            key.status == KeyStatus::Tombstone
                && key
                    .tombstoned_at
                    .is_some_and(|at| now_ms.saturating_sub(at) > TOMBSTONE_TTL_MS)
        })
        .map(|(id, _)| id.clone())
        .collect();

    for id in expired {
        state.keys.remove(&id);
        state
            .rotation_log
            .retain(|entry| entry.key_id != id || entry.event == RotationEventKind::AuthFailed);
        info!(key_id = %id, "tombstoned key deleted after retention");
        report.deleted += 1;
    }
    if report.deleted > 0 {
        metrics::counter!("rotation_keys_deleted_total").increment(report.deleted as u64);
    }

    report
}

/// Best-effort account identity for a dead key: its own email, a sibling
/// sharing its `account_uuid`, or the most recent rotation log entry that
/// referenced it.
fn resolve_account_email(state: &RotationState, id: &str) -> Option<String> {
    let key = state.keys.get(id)?;
    if let Some(email) = &key.account_email {
        return Some(email.clone());
    }
    if let Some(uuid) = &key.account_uuid {
        let sibling_email = state
            .keys
            .values()
            .filter(|k| k.id != id)
            .filter(|k| k.account_uuid.as_deref() == Some(uuid))
            .find_map(|k| k.account_email.clone());
        if sibling_email.is_some() {
            return sibling_email;
        }
    }
    // The log is newest-first, so the first hit is the most recent.
    state
        .rotation_log
        .iter()
        .find(|entry| entry.key_id == id && entry.account_email.is_some())
        .and_then(|entry| entry.account_email.clone())
}
