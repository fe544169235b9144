//! Rotation constants
//!
//! The OAuth client configuration matches the consuming CLI's public
//! client. These values are not secrets; the tokens in the rotation store
//! are.

use std::time::Duration;

/// Token endpoint for refresh-token grants
pub const TOKEN_ENDPOINT: &str = "https://console.anthropic.com/v1/oauth/token";

/// Public OAuth client ID presented with each grant
pub const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// Per-request timeout for token endpoint calls
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Lookahead buffer: a key expiring within this window is approaching
/// expiry, and an active key inside it triggers the standby swap
pub const EXPIRY_LOOKAHEAD_MS: u64 = 10 * 60 * 1000;

/// Tombstoned keys are retained this long before physical deletion, so
/// rotation log correlation survives a full day of investigation
pub const TOMBSTONE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Usage percentage at which a quota dimension counts as exhausted
pub const USAGE_EXHAUSTED_PCT: f64 = 100.0;

/// Usage percentage above which a key is avoided when an alternative exists
pub const USAGE_WARNING_PCT: f64 = 90.0;
