//! Generic locked read-modify-write persistence
//!
//! The store is parameterized over the state type; anything serde-round-
//! trippable with a sensible empty default works. `perform` takes the state
//! by value and the mutation returns the replacement state, so there is no
//! way to observe or publish a half-applied mutation.

use std::future::Future;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::lock;

/// A single canonical record file with locked mutation and atomic writes.
pub struct StateStore<T> {
    path: PathBuf,
    _state: PhantomData<fn() -> T>,
}

impl<T> StateStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Bind a store to its canonical path. Nothing is touched on disk
    /// until the first operation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _state: PhantomData,
        }
    }

    /// The canonical file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Locked read-modify-write.
    ///
    /// Acquires the exclusive lock, reads the current state (an absent file
    /// yields `T::default()`, a corrupt one fails loudly), runs `mutate`,
    /// writes the returned state to a uniquely named temp file in the same
    /// directory, renames it over the canonical path, and releases the
    /// lock. The lock is dropped on every exit path, including a panic
    /// inside `mutate`.
    ///
    /// `mutate` is async so callers can fold slow work (e.g. a token
    /// refresh pass) into the same serialized unit when read-then-act
    /// consistency demands it.
    pub async fn perform<R, F, Fut>(&self, mutate: F) -> Result<R>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = (T, R)>,
    {
        let _lock = lock::acquire(&self.lock_path()).await?;
        let state = self.read_state().await?;
        let (next, out) = mutate(state).await;
        self.write_atomic(&next).await?;
        Ok(out)
    }

    /// Lockless consistent read of the canonical file.
    ///
    /// Safe without the lock because writers replace the file with an
    /// atomic rename. Callers that act on what they read (rather than just
    /// report it) must use `perform` instead.
    pub async fn snapshot(&self) -> Result<T> {
        self.read_state().await
    }

    fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("state")
    }

    fn lock_path(&self) -> PathBuf {
        self.path
            .with_file_name(format!("{}.lock", self.file_name()))
    }

    async fn read_state(&self) -> Result<T> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| Error::Corrupt {
                path: self.path.display().to_string(),
                detail: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(Error::Io(format!(
                "reading state file {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Write `state` to a fresh temp file and rename it over the canonical
    /// path. A crash before the rename leaves inert litter: no reader opens
    /// temp files and the next writer picks a new unique name.
    async fn write_atomic(&self, state: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Serialize(format!("serializing state: {e}")))?;

        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::Io("state path has no parent directory".into()))?;

        let tmp_path = dir.join(format!(
            "{}.tmp.{}-{}",
            self.file_name(),
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ));

        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .map_err(|e| Error::Io(format!("writing temp state file: {e}")))?;

        // The stores hold tokens and approval codes.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp_path, perms)
                .await
                .map_err(|e| Error::Io(format!("setting state file permissions: {e}")))?;
        }

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| Error::Io(format!("renaming temp state file: {e}")))?;

        debug!(path = %self.path.display(), "state persisted");
        Ok(())
    }
}
