//! Credential key, rotation state, and the rotation log

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{USAGE_EXHAUSTED_PCT, USAGE_WARNING_PCT};

/// Lifecycle status of a credential key.
///
/// Transitions:
/// - active ⇄ expired (refresh outcome, either direction)
/// - active/expired → invalid (token endpoint reports `invalid_grant`)
/// - invalid → tombstone (GC pass; never the active key)
/// - tombstone → deleted (after the retention TTL)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Expired,
    Invalid,
    Tombstone,
}

impl KeyStatus {
    /// Status label for logging and the status report.
    pub fn label(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Expired => "expired",
            KeyStatus::Invalid => "invalid",
            KeyStatus::Tombstone => "tombstone",
        }
    }
}

/// One OAuth credential (access/refresh token pair) in the pool.
///
/// `expires_at` is an absolute unix millisecond timestamp; a key that has
/// never seen an expiry sorts as 0, least fresh. `account_uuid` groups
/// keys that belong to the same underlying account — re-authentication
/// produces multiple keys drawing on one quota bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialKey {
    pub id: String,
    pub status: KeyStatus,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,
    /// Most recent usage snapshot: quota dimension → percent consumed.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub last_usage: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tombstoned_at: Option<u64>,
}

impl CredentialKey {
    pub fn expires_at_or_zero(&self) -> u64 {
        self.expires_at.unwrap_or(0)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_or_zero() < now_ms
    }

    /// Not yet expired, but inside the lookahead buffer.
    pub fn is_approaching_expiry(&self, now_ms: u64, buffer_ms: u64) -> bool {
        !self.is_expired(now_ms) && self.expires_at_or_zero() < now_ms + buffer_ms
    }

    /// Any tracked quota dimension fully consumed.
    pub fn quota_exhausted(&self) -> bool {
        self.last_usage.values().any(|pct| *pct >= USAGE_EXHAUSTED_PCT)
    }

    /// Any tracked quota dimension at or past the warning threshold.
    pub fn quota_strained(&self) -> bool {
        self.last_usage.values().any(|pct| *pct >= USAGE_WARNING_PCT)
    }

    /// A key the consuming application could use right now.
    pub fn is_usable(&self) -> bool {
        matches!(self.status, KeyStatus::Active)
    }
}

/// Rotation log event kinds, serialized snake_case into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationEventKind {
    KeyRegistered,
    KeysMerged,
    KeyRefreshed,
    RefreshFailed,
    KeyInvalidated,
    KeyTombstoned,
    ActiveSwapped,
    /// Account-level authentication failure. These entries are audit
    /// records and outlive the key they reference.
    AuthFailed,
}

/// One rotation log entry. The log is newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationLogEntry {
    pub timestamp: u64,
    pub event: RotationEventKind,
    pub key_id: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,
}

/// Persisted rotation state: the key registry, the active pointer, and
/// the append-only rotation log.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RotationState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_key_id: Option<String>,
    #[serde(default)]
    pub keys: HashMap<String, CredentialKey>,
    #[serde(default)]
    pub rotation_log: Vec<RotationLogEntry>,
}

impl RotationState {
    /// The active key, or None when unset or dangling.
    pub fn active_key(&self) -> Option<&CredentialKey> {
        self.active_key_id
            .as_deref()
            .and_then(|id| self.keys.get(id))
    }

    /// Prepend an entry to the rotation log (newest first).
    pub fn log_event(
        &mut self,
        timestamp: u64,
        event: RotationEventKind,
        key_id: impl Into<String>,
        reason: impl Into<String>,
        account_email: Option<String>,
    ) {
        self.rotation_log.insert(
            0,
            RotationLogEntry {
                timestamp,
                event,
                key_id: key_id.into(),
                reason: reason.into(),
                account_email,
            },
        );
    }
}
