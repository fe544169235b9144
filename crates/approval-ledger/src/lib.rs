//! Exactly-once consumption of one-time approval codes
//!
//! An external issuer writes approval records into a ledger file; any
//! number of uncoordinated processes may later try to consume the same
//! code. Consumption runs as a single locked mutation: the matching record
//! is removed in the same atomic write that observed it, so of N racing
//! consumers exactly one gets the record and the rest see it already gone.
//!
//! Records are matched on (server, tool, canonical args hash), must be in
//! `approved` status and unexpired, and — when the issuer sealed them with
//! an HMAC — carry a tag that verifies against the shared protection
//! secret.

mod canonical;
mod error;
mod ledger;
mod record;
mod seal;

pub use canonical::{args_hash, canonical_json};
pub use error::{Error, Result};
pub use ledger::ApprovalLedger;
pub use record::{ApprovalRecord, ApprovalStatus, LedgerState};
pub use seal::approval_hmac;
