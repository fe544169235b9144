//! The approval ledger: find-and-consume under one locked mutation

use std::path::PathBuf;

use common::Secret;
use serde_json::Value;
use state_store::StateStore;
use tracing::{debug, info};

use crate::canonical::args_hash;
use crate::error::Result;
use crate::record::{ApprovalRecord, ApprovalStatus, LedgerState};
use crate::seal;

/// Consumer-side handle on an approval ledger file.
///
/// Construct one per ledger path; every consuming process holds its own
/// handle and coordinates purely through the store's file lock.
pub struct ApprovalLedger {
    store: StateStore<LedgerState>,
    protection_secret: Option<Secret<String>>,
}

impl ApprovalLedger {
    pub fn new(path: impl Into<PathBuf>, protection_secret: Option<Secret<String>>) -> Self {
        Self {
            store: StateStore::new(path),
            protection_secret,
        }
    }

    /// Find and consume the approval for (server, tool, args).
    ///
    /// Matching and removal happen inside a single locked mutation, so of
    /// N processes racing the same code exactly one gets `Some(record)`;
    /// the rest see the record already gone. A non-match returns `None`
    /// and leaves the ledger byte-identical apart from the rewrite.
    ///
    /// Records sealed with an `approved_hmac` are only consumable when the
    /// tag verifies against this ledger's protection secret; a sealed
    /// record with no secret configured never matches (fail closed).
    pub async fn check_approval(
        &self,
        server: &str,
        tool: &str,
        args: &Value,
    ) -> Result<Option<ApprovalRecord>> {
        let hash = args_hash(args);
        let now_ms = common::now_millis();
        let wanted_server = server.to_string();
        let wanted_tool = tool.to_string();
        let secret = self
            .protection_secret
            .as_ref()
            .map(|s| s.expose().clone());

        let consumed = self
            .store
            .perform(move |mut state: LedgerState| async move {
                let matched = state
                    .approvals
                    .iter()
                    .find(|(_, record)| {
                        record.server == wanted_server
                            && record.tool == wanted_tool
                            && record.status == ApprovalStatus::Approved
                            && !record.is_expired(now_ms)
                            && record.args_hash == hash
                            && seal_accepts(secret.as_deref(), record)
                    })
                    .map(|(code, _)| code.clone());

                match matched {
                    Some(code) => {
                        let record = state.approvals.remove(&code);
                        (state, record)
                    }
                    None => (state, None),
                }
            })
            .await?;

        match &consumed {
            Some(record) => {
                info!(
                    code = %record.code,
                    server = %record.server,
                    tool = %record.tool,
                    "approval consumed"
                );
                metrics::counter!("approvals_consumed_total").increment(1);
            }
            None => debug!(server, tool, "no matching approval"),
        }
        Ok(consumed)
    }

    /// Lockless view of the ledger, for reporting.
    pub async fn snapshot(&self) -> Result<LedgerState> {
        Ok(self.store.snapshot().await?)
    }
}

fn seal_accepts(secret: Option<&str>, record: &ApprovalRecord) -> bool {
    match (&record.approved_hmac, secret) {
        // Unsealed record: the remaining criteria decide.
        (None, _) => true,
        // Sealed but this consumer has no secret: fail closed.
        (Some(_), None) => false,
        (Some(_), Some(secret)) => seal::verify_approved(secret, record),
    }
}
