//! Exclusive lock files with stale-holder recovery
//!
//! A lock is a sibling file created with `create_new`, which is atomic on
//! every filesystem we care about: exactly one process wins the create. A
//! holder that crashes leaves its lock file behind, so acquisition treats
//! any lock older than [`STALE_AFTER`] as abandoned and force-removes it
//! before retrying. Contention with a live holder backs off exponentially
//! up to a fixed attempt count and then fails loudly.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A lock file older than this is presumed abandoned by a crashed holder.
pub(crate) const STALE_AFTER: Duration = Duration::from_secs(10);

/// Acquisition attempts before failing with `LockTimeout`.
pub(crate) const MAX_ATTEMPTS: u32 = 8;

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Held lock. Dropping it deletes the lock file, so release happens on
/// every exit path out of `perform`, including panics in the mutate closure.
#[derive(Debug)]
pub(crate) struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        debug!(path = %self.path.display(), "lock released");
    }
}

/// Acquire the lock at `path`, breaking stale locks and backing off on
/// live contention.
pub(crate) async fn acquire(path: &Path) -> Result<LockGuard> {
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(mut file) => {
                // Holder pid, for post-mortem inspection of abandoned locks.
                let _ = file.write_all(std::process::id().to_string().as_bytes()).await;
                debug!(path = %path.display(), attempt, "lock acquired");
                return Ok(LockGuard {
                    path: path.to_path_buf(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if lock_is_stale(path).await {
                    warn!(
                        path = %path.display(),
                        "breaking stale lock, holder presumed crashed"
                    );
                    let _ = tokio::fs::remove_file(path).await;
                    // Retry the create immediately; a racing breaker losing
                    // the next create_new just backs off like everyone else.
                    continue;
                }
                if attempt < MAX_ATTEMPTS {
                    debug!(path = %path.display(), attempt, backoff_ms = backoff.as_millis() as u64, "lock held, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "creating lock file {}: {e}",
                    path.display()
                )));
            }
        }
    }

    Err(Error::LockTimeout {
        path: path.display().to_string(),
        attempts: MAX_ATTEMPTS,
    })
}

/// Whether the lock file at `path` is older than the staleness threshold.
///
/// A lock that vanished between the failed create and this check is not
/// stale — the holder released it and the next create attempt will race
/// for it normally.
async fn lock_is_stale(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > STALE_AFTER)
        .unwrap_or(false)
}
