//! Credential materialization for the consuming application
//!
//! The consumer re-reads its credential file on every use rather than
//! capturing it at startup, which is what makes the active-key swap
//! restartless: publishing here is all it takes for the next request to
//! ride the new credential.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::key::CredentialKey;

/// Where the active credential gets published. Boxed-future methods keep
/// the trait dyn-compatible (`&dyn CredentialSink`).
pub trait CredentialSink: Send + Sync {
    fn publish<'a>(
        &'a self,
        key: &'a CredentialKey,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// On-disk shape the consuming application reads.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MaterializedCredential {
    #[serde(rename = "type")]
    pub credential_type: String,
    pub access: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    pub expires: u64,
}

/// File-backed sink: atomic temp-file + rename, 0600 permissions.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSink for FileSink {
    fn publish<'a>(
        &'a self,
        key: &'a CredentialKey,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let payload = MaterializedCredential {
                credential_type: "oauth".into(),
                access: key.access_token.clone(),
                refresh: key.refresh_token.clone(),
                expires: key.expires_at_or_zero(),
            };
            let json = serde_json::to_string_pretty(&payload)
                .map_err(|e| Error::Sink(format!("serializing credential: {e}")))?;

            let dir = self
                .path
                .parent()
                .ok_or_else(|| Error::Sink("credential path has no parent directory".into()))?;
            let tmp_path = dir.join(format!(
                ".credential.tmp.{}-{}",
                std::process::id(),
                uuid::Uuid::new_v4().simple()
            ));

            tokio::fs::write(&tmp_path, json.as_bytes())
                .await
                .map_err(|e| Error::Sink(format!("writing temp credential file: {e}")))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o600);
                tokio::fs::set_permissions(&tmp_path, perms)
                    .await
                    .map_err(|e| Error::Sink(format!("setting credential permissions: {e}")))?;
            }

            tokio::fs::rename(&tmp_path, &self.path)
                .await
                .map_err(|e| Error::Sink(format!("renaming temp credential file: {e}")))?;

            debug!(path = %self.path.display(), key_id = %key.id, "credential materialized");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::key;

    #[tokio::test]
    async fn publish_writes_consumer_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        let sink = FileSink::new(&path);

        let mut k = key("a");
        k.expires_at = Some(1_234_567);
        sink.publish(&k).await.unwrap();

        let written: MaterializedCredential =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.credential_type, "oauth");
        assert_eq!(written.access, "at_a");
        assert_eq!(written.refresh.as_deref(), Some("rt_a"));
        assert_eq!(written.expires, 1_234_567);
    }

    #[tokio::test]
    async fn publish_replaces_previous_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        let sink = FileSink::new(&path);

        sink.publish(&key("first")).await.unwrap();
        sink.publish(&key("second")).await.unwrap();

        let written: MaterializedCredential =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.access, "at_second");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn published_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        FileSink::new(&path).publish(&key("a")).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }
}
