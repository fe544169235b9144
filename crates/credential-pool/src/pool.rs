//! Account-aware key selection and registry maintenance
//!
//! Several keys can exist for one underlying account (re-authenticated
//! sessions); without account-level grouping the rotation would "rotate"
//! between keys sharing one quota bucket. Selection therefore works on one
//! representative per account, and deduplication collapses same-account
//! keys while preserving the account-scoped usage truth.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::key::{CredentialKey, KeyStatus, RotationEventKind, RotationState};

/// Register a new key. Becomes the active key if none is set.
pub fn register_key(state: &mut RotationState, key: CredentialKey, now_ms: u64) {
    let id = key.id.clone();
    let email = key.account_email.clone();
    state.keys.insert(id.clone(), key);
    if state.active_key_id.is_none() {
        state.active_key_id = Some(id.clone());
        info!(key_id = %id, "registered key adopted as active");
    }
    state.log_event(now_ms, RotationEventKind::KeyRegistered, id, "key registered", email);
}

/// Store a usage snapshot for a key and stamp its health-check time.
pub fn record_health_check(
    state: &mut RotationState,
    id: &str,
    usage: HashMap<String, f64>,
    now_ms: u64,
) -> Result<()> {
    let key = state
        .keys
        .get_mut(id)
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    key.last_usage = usage;
    key.last_health_check = Some(now_ms);
    Ok(())
}

/// One representative per account: the freshest (highest expiry) key of
/// each `account_uuid` group. Keys without an `account_uuid` each form
/// their own singleton group — two uuid-less keys cannot be assumed to
/// share an account. Tombstones are not represented.
pub fn account_representatives(state: &RotationState) -> Vec<&CredentialKey> {
    let mut by_uuid: HashMap<&str, Vec<&CredentialKey>> = HashMap::new();
    let mut reps: Vec<&CredentialKey> = Vec::new();

    for key in state.keys.values() {
        if key.status == KeyStatus::Tombstone {
            continue;
        }
        match key.account_uuid.as_deref() {
            Some(uuid) => by_uuid.entry(uuid).or_default().push(key),
            None => reps.push(key),
        }
    }

    for group in by_uuid.into_values() {
        if let Some(rep) = group.into_iter().max_by_key(|k| {
            (k.expires_at_or_zero(), std::cmp::Reverse(k.id.as_str()))
        }) {
            reps.push(rep);
        }
    }
    reps
}

/// Pick the key the pool should present as active.
///
/// Representatives with any exhausted quota dimension are dropped, as are
/// invalid ones (the active pointer may never reference an invalid key);
/// among the rest, ones below the warning threshold are preferred when at
/// least one exists. Highest expiry wins.
pub fn select_active_key(state: &RotationState) -> Option<String> {
    let mut candidates: Vec<&CredentialKey> = account_representatives(state)
        .into_iter()
        .filter(|k| k.status != KeyStatus::Invalid)
        .filter(|k| !k.quota_exhausted())
        .collect();

    if candidates.iter().any(|k| !k.quota_strained()) {
        candidates.retain(|k| !k.quota_strained());
    }

    candidates
        .into_iter()
        .max_by_key(|k| (k.expires_at_or_zero(), std::cmp::Reverse(k.id.as_str())))
        .map(|k| k.id.clone())
}

/// Pick a standby for the pre-expiry swap: the best representative other
/// than the current active key whose expiry is safely beyond the buffer.
pub fn select_standby(state: &RotationState, now_ms: u64, buffer_ms: u64) -> Option<String> {
    let active = state.active_key_id.as_deref();
    let mut candidates: Vec<&CredentialKey> = account_representatives(state)
        .into_iter()
        .filter(|k| Some(k.id.as_str()) != active)
        .filter(|k| k.status != KeyStatus::Invalid)
        .filter(|k| k.expires_at_or_zero() > now_ms + buffer_ms)
        .filter(|k| !k.quota_exhausted())
        .collect();

    if candidates.iter().any(|k| !k.quota_strained()) {
        candidates.retain(|k| !k.quota_strained());
    }

    candidates
        .into_iter()
        .max_by_key(|k| (k.expires_at_or_zero(), std::cmp::Reverse(k.id.as_str())))
        .map(|k| k.id.clone())
}

/// Collapse duplicate keys per account.
///
/// For each `account_uuid` group with more than one live entry, the
/// highest-expiry entry survives. The usage snapshot is account-scoped
/// truth, so the survivor inherits `last_usage`/`last_health_check` from
/// whichever group member was most recently health-checked, regardless of
/// which one held the freshest token. `active_key_id` is retargeted if it
/// pointed at a deleted entry. Returns the number of duplicates removed.
pub fn deduplicate_keys(state: &mut RotationState, now_ms: u64) -> usize {
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for (id, key) in &state.keys {
        if key.status == KeyStatus::Tombstone {
            continue;
        }
        if let Some(uuid) = &key.account_uuid {
            groups.entry(uuid.clone()).or_default().push(id.clone());
        }
    }

    let mut removed_total = 0;
    for (uuid, ids) in groups {
        if ids.len() < 2 {
            continue;
        }

        let Some(survivor_id) = ids
            .iter()
            .max_by_key(|id| {
                let expires = state.keys.get(*id).map(|k| k.expires_at_or_zero()).unwrap_or(0);
                (expires, std::cmp::Reverse(id.as_str()))
            })
            .cloned()
        else {
            continue;
        };

        // Account-scoped usage truth: carried by the most recently
        // health-checked member, not necessarily the survivor.
        let freshest_checked = ids
            .iter()
            .filter_map(|id| {
                let key = state.keys.get(id)?;
                key.last_health_check.map(|at| (at, id.clone()))
            })
            .max_by_key(|(at, _)| *at)
            .map(|(_, id)| id);

        if let Some(source_id) = freshest_checked {
            if source_id != survivor_id {
                let carried = state
                    .keys
                    .get(&source_id)
                    .map(|k| (k.last_usage.clone(), k.last_health_check));
                if let (Some((usage, checked)), Some(survivor)) =
                    (carried, state.keys.get_mut(&survivor_id))
                {
                    survivor.last_usage = usage;
                    survivor.last_health_check = checked;
                }
            }
        }

        let mut removed_here = 0;
        for id in &ids {
            if *id == survivor_id {
                continue;
            }
            state.keys.remove(id);
            removed_here += 1;
            if state.active_key_id.as_deref() == Some(id.as_str()) {
                state.active_key_id = Some(survivor_id.clone());
                debug!(from = %id, to = %survivor_id, "active key retargeted to dedup survivor");
            }
        }
        removed_total += removed_here;

        let email = state
            .keys
            .get(&survivor_id)
            .and_then(|k| k.account_email.clone());
        state.log_event(
            now_ms,
            RotationEventKind::KeysMerged,
            survivor_id.clone(),
            format!("merged {removed_here} duplicate keys for account {uuid}"),
            email,
        );
        info!(survivor = %survivor_id, account_uuid = %uuid, merged = removed_here, "duplicate keys merged");
    }
    removed_total
}
