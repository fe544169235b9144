//! HMAC sealing of approval records
//!
//! The issuer and this consumer share a protection secret; the tag binds
//! the code to the operation metadata and the expiry, so a record cannot
//! be retargeted or extended by editing the ledger file. Verification is
//! constant-time via `Mac::verify_slice`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::record::{ApprovalRecord, ApprovalStatus};

type HmacSha256 = Hmac<Sha256>;

/// Compute the tag for a record in the given status.
///
/// Shared with the issuer side: the `approved_hmac` field holds the tag
/// for `ApprovalStatus::Approved`, `pending_hmac` the one for `Pending`.
pub fn approval_hmac(
    secret: &str,
    code: &str,
    server: &str,
    tool: &str,
    args_hash: &str,
    status: ApprovalStatus,
    expires_at_ms: u64,
) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message(code, server, tool, args_hash, status, expires_at_ms).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a record's `approved_hmac` against the protection secret.
///
/// Returns false on a malformed (non-hex) tag as well as a wrong one.
/// Records without an `approved_hmac` are outside this function; the
/// ledger decides their policy.
pub(crate) fn verify_approved(secret: &str, record: &ApprovalRecord) -> bool {
    let Some(tag_hex) = record.approved_hmac.as_deref() else {
        return false;
    };
    let Ok(tag) = hex::decode(tag_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(
        message(
            &record.code,
            &record.server,
            &record.tool,
            &record.args_hash,
            ApprovalStatus::Approved,
            record.expires_at_ms,
        )
        .as_bytes(),
    );
    mac.verify_slice(&tag).is_ok()
}

fn message(
    code: &str,
    server: &str,
    tool: &str,
    args_hash: &str,
    status: ApprovalStatus,
    expires_at_ms: u64,
) -> String {
    format!(
        "{code}\n{server}\n{tool}\n{args_hash}\n{}\n{expires_at_ms}",
        status.label()
    )
}
