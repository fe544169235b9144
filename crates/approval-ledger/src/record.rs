//! Approval record and ledger state types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an approval code.
///
/// The issuer creates records as `pending` and promotes them to `approved`
/// when the human confirms; only `approved` records are consumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
}

impl ApprovalStatus {
    /// Status label, as bound into the HMAC message.
    pub fn label(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
        }
    }
}

/// One issued approval code and the operation it gates.
///
/// `created_at`/`expires_at` are ISO-8601 renderings of the `_ms` fields;
/// the numeric fields are authoritative. The HMAC fields are present only
/// when the issuer runs with a protection secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub code: String,
    pub server: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub args_hash: String,
    pub phrase: String,
    pub status: ApprovalStatus,
    pub created_at: String,
    pub expires_at: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_hmac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_hmac: Option<String>,
}

impl ApprovalRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

/// On-disk ledger shape: records keyed by code, so at most one live record
/// per code holds structurally.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(default)]
    pub approvals: HashMap<String, ApprovalRecord>,
}
