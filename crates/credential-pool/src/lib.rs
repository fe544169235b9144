//! Rotating credential pool for OAuth access/refresh token pairs
//!
//! Manages a registry of credential keys for one consuming application,
//! persisted through the locked state store and mutated only by short-lived
//! cycle runs. The pool groups keys by underlying account, keeps exactly
//! one usable active credential published, refreshes tokens before they
//! expire, and garbage-collects permanently revoked keys through a
//! tombstone grace period that preserves audit log correlation.
//!
//! Key lifecycle:
//! 1. A key is registered → status `active`, becomes the active key if
//!    none is set
//! 2. Refresh succeeds → `active`; refresh fails transiently → `expired`
//!    (retried next cycle)
//! 3. The token endpoint reports `invalid_grant` → `invalid`, permanent
//! 4. GC converts invalid non-active keys → `tombstone`
//! 5. Tombstones older than 24h are physically deleted; their log entries
//!    are removed except `auth_failed`, which persists indefinitely

pub mod constants;
pub mod cycle;
pub mod error;
pub mod gc;
pub mod key;
pub mod pool;
pub mod refresh;
pub mod sink;

#[cfg(test)]
pub(crate) mod testutil;

pub use cycle::{CycleReport, run_cycle};
pub use error::{Error, Result};
pub use gc::{PruneReport, prune_dead_keys};
pub use key::{CredentialKey, KeyStatus, RotationEventKind, RotationLogEntry, RotationState};
pub use pool::{
    account_representatives, deduplicate_keys, record_health_check, register_key,
    select_active_key, select_standby,
};
pub use refresh::{RefreshEngine, RefreshOutcome, SyncReport, TokenGrant};
pub use sink::{CredentialSink, FileSink};
