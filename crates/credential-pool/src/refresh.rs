//! Token refresh and the pre-expiry active-key swap
//!
//! Refresh outcomes are a three-way result, never a bare option: a
//! transient failure (retry next cycle), a permanent revocation (the
//! refresh token is dead, the key transitions to invalid and is never
//! retried), or a fresh grant. Collapsing these into a truthiness check
//! is exactly the bug class the tagged type exists to close.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::constants::{CLIENT_ID, EXPIRY_LOOKAHEAD_MS, REFRESH_TIMEOUT, TOKEN_ENDPOINT};
use crate::key::{CredentialKey, KeyStatus, RotationEventKind, RotationState};
use crate::pool;
use crate::sink::CredentialSink;

/// A successful refresh grant, with `expires_at` already absolute.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: u64,
}

/// Outcome of one refresh attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// New tokens were granted.
    Refreshed(TokenGrant),
    /// The token endpoint reported `invalid_grant`: the refresh token is
    /// revoked. Irreversible; never retried.
    PermanentlyRevoked,
    /// Anything retryable: transport errors, timeouts, non-OK statuses
    /// other than an invalid_grant 400, malformed response bodies.
    Transient,
}

/// Wire shape of a successful token response. `expires_in` is a seconds
/// delta from response time.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Counts from one `sync_keys` pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub refreshed: usize,
    pub invalidated: usize,
    pub failed: usize,
}

/// Performs refresh-token grants and drives the per-cycle refresh pass.
pub struct RefreshEngine {
    client: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    lookahead_ms: u64,
}

impl Default for RefreshEngine {
    fn default() -> Self {
        Self::with_endpoint(TOKEN_ENDPOINT)
    }
}

impl RefreshEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine against a non-default token endpoint (config override,
    /// tests).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_endpoint: endpoint.into(),
            client_id: CLIENT_ID.to_string(),
            lookahead_ms: EXPIRY_LOOKAHEAD_MS,
        }
    }

    /// Attempt a refresh-token grant for `key`.
    ///
    /// Keys without a refresh token and keys already invalid are not
    /// refreshable; both fold into `Transient` (nothing happened, nothing
    /// to retry differently).
    pub async fn refresh_expired_token(&self, key: &CredentialKey) -> RefreshOutcome {
        if key.status == KeyStatus::Invalid {
            return RefreshOutcome::Transient;
        }
        let Some(refresh_token) = key.refresh_token.as_deref() else {
            debug!(key_id = %key.id, "no refresh token, skipping refresh");
            return RefreshOutcome::Transient;
        };

        let response = self
            .client
            .post(&self.token_endpoint)
            .timeout(REFRESH_TIMEOUT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(key_id = %key.id, error = %e, "token refresh request failed (transient)");
                return RefreshOutcome::Transient;
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            let parsed: TokenErrorBody = serde_json::from_str(&body).unwrap_or_default();
            if parsed.error.as_deref() == Some("invalid_grant") {
                warn!(key_id = %key.id, "refresh token revoked by the endpoint");
                return RefreshOutcome::PermanentlyRevoked;
            }
            warn!(key_id = %key.id, %body, "token endpoint returned 400 (transient)");
            return RefreshOutcome::Transient;
        }
        if !status.is_success() {
            warn!(key_id = %key.id, %status, "token endpoint returned non-success (transient)");
            return RefreshOutcome::Transient;
        }

        match response.json::<TokenResponse>().await {
            Ok(token) => RefreshOutcome::Refreshed(TokenGrant {
                access_token: token.access_token,
                refresh_token: token.refresh_token,
                expires_at: common::now_millis() + token.expires_in * 1000,
            }),
            Err(e) => {
                warn!(key_id = %key.id, error = %e, "malformed token response (transient)");
                RefreshOutcome::Transient
            }
        }
    }

    /// One refresh pass over the registry.
    ///
    /// Candidates are keys that are neither invalid nor tombstoned and are
    /// either expired outright or approaching expiry while not being the
    /// active key (the active key's pre-expiry handling is the swap, not a
    /// standby refresh).
    pub async fn sync_keys(&self, state: &mut RotationState, now_ms: u64) -> SyncReport {
        let mut report = SyncReport::default();
        let active_id = state.active_key_id.clone();

        let mut ids: Vec<String> = state.keys.keys().cloned().collect();
        ids.sort();

        for id in ids {
            let Some(key) = state.keys.get(&id) else {
                continue;
            };
            if matches!(key.status, KeyStatus::Invalid | KeyStatus::Tombstone) {
                continue;
            }

            let expired = key.is_expired(now_ms);
            let approaching = key.is_approaching_expiry(now_ms, self.lookahead_ms)
                && active_id.as_deref() != Some(id.as_str());
            if !expired && !approaching {
                continue;
            }

            let email = key.account_email.clone();
            match self.refresh_expired_token(key).await {
                RefreshOutcome::Refreshed(grant) => {
                    if let Some(key) = state.keys.get_mut(&id) {
                        key.status = KeyStatus::Active;
                        key.access_token = grant.access_token;
                        key.refresh_token = Some(grant.refresh_token);
                        key.expires_at = Some(grant.expires_at);
                    }
                    let reason = if expired {
                        "token refreshed"
                    } else {
                        "proactive standby refresh"
                    };
                    state.log_event(now_ms, RotationEventKind::KeyRefreshed, &id, reason, email);
                    metrics::counter!("rotation_refresh_total", "outcome" => "refreshed")
                        .increment(1);
                    info!(key_id = %id, reason, "key refreshed");
                    report.refreshed += 1;
                }
                RefreshOutcome::PermanentlyRevoked => {
                    if let Some(key) = state.keys.get_mut(&id) {
                        key.status = KeyStatus::Invalid;
                    }
                    state.log_event(
                        now_ms,
                        RotationEventKind::KeyInvalidated,
                        &id,
                        "refresh token revoked",
                        email,
                    );
                    metrics::counter!("rotation_refresh_total", "outcome" => "revoked")
                        .increment(1);
                    warn!(key_id = %id, "key invalidated, refresh token revoked");
                    report.invalidated += 1;
                }
                RefreshOutcome::Transient => {
                    if let Some(key) = state.keys.get_mut(&id) {
                        key.status = KeyStatus::Expired;
                    }
                    state.log_event(
                        now_ms,
                        RotationEventKind::RefreshFailed,
                        &id,
                        "token refresh failed",
                        email,
                    );
                    metrics::counter!("rotation_refresh_total", "outcome" => "transient")
                        .increment(1);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Keep a usable active credential published without a consumer
    /// restart.
    ///
    /// If no active key is set (or the pointer dangles), elect one. If the
    /// active key's expiry falls inside the lookahead buffer, switch to a
    /// standby whose expiry is safely beyond it. Either way the credential
    /// is materialized to the sink *before* the pointer moves, so the
    /// consumer never reads a credential the state does not vouch for.
    /// No qualifying standby → no swap this cycle, which is a no-op, not
    /// an error.
    pub async fn swap_active_if_expiring(
        &self,
        state: &mut RotationState,
        sink: &dyn CredentialSink,
        now_ms: u64,
    ) -> bool {
        let replacement = match state.active_key() {
            None => {
                let Some(elected) = pool::select_active_key(state) else {
                    debug!("no active key and no electable candidate");
                    return false;
                };
                Some((elected, "active key elected"))
            }
            Some(active) if active.expires_at_or_zero() < now_ms + self.lookahead_ms => {
                let Some(standby) = pool::select_standby(state, now_ms, self.lookahead_ms) else {
                    debug!(
                        active = %active.id,
                        "active key approaching expiry, no standby beyond the buffer, no swap"
                    );
                    return false;
                };
                Some((standby, "pre-expiry active key swap"))
            }
            Some(_) => None,
        };

        let Some((new_id, reason)) = replacement else {
            return false;
        };
        let Some(new_key) = state.keys.get(&new_id) else {
            return false;
        };

        if let Err(e) = sink.publish(new_key).await {
            warn!(key_id = %new_id, error = %e, "credential materialization failed, swap deferred");
            return false;
        }

        let email = new_key.account_email.clone();
        state.active_key_id = Some(new_id.clone());
        state.log_event(now_ms, RotationEventKind::ActiveSwapped, &new_id, reason, email);
        metrics::counter!("rotation_swaps_total").increment(1);
        info!(key_id = %new_id, reason, "active key swapped");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as SinkResult;
    use crate::testutil::{key, key_for_account, state_with};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Sink that records published key ids instead of touching disk.
    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn ids(&self) -> Vec<String> {
            self.published.lock().unwrap().clone()
        }
    }

    impl CredentialSink for RecordingSink {
        fn publish<'a>(
            &'a self,
            key: &'a CredentialKey,
        ) -> Pin<Box<dyn Future<Output = SinkResult<()>> + Send + 'a>> {
            Box::pin(async move {
                if self.fail {
                    return Err(crate::error::Error::Sink("sink unavailable".into()));
                }
                self.published.lock().unwrap().push(key.id.clone());
                Ok(())
            })
        }
    }

    fn engine_against(server: &MockServer) -> RefreshEngine {
        RefreshEngine::with_endpoint(format!("{}/v1/oauth/token", server.uri()))
    }

    fn grant_body(suffix: &str, expires_in: u64) -> serde_json::Value {
        serde_json::json!({
            "access_token": format!("at_new_{suffix}"),
            "refresh_token": format!("rt_new_{suffix}"),
            "expires_in": expires_in,
        })
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_transient() {
        let server = MockServer::start().await;
        let engine = engine_against(&server);
        let mut k = key("a");
        k.refresh_token = None;

        assert!(matches!(
            engine.refresh_expired_token(&k).await,
            RefreshOutcome::Transient
        ));
        // Nothing was sent.
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_of_invalid_key_is_transient_without_request() {
        let server = MockServer::start().await;
        let engine = engine_against(&server);
        let mut k = key("a");
        k.status = KeyStatus::Invalid;

        assert!(matches!(
            engine.refresh_expired_token(&k).await,
            RefreshOutcome::Transient
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_success_returns_grant_with_absolute_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("rt_a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("a", 3600)))
            .mount(&server)
            .await;

        let engine = engine_against(&server);
        let before = common::now_millis();
        match engine.refresh_expired_token(&key("a")).await {
            RefreshOutcome::Refreshed(grant) => {
                assert_eq!(grant.access_token, "at_new_a");
                assert_eq!(grant.refresh_token, "rt_new_a");
                assert!(grant.expires_at >= before + 3_600_000);
            }
            other => panic!("expected Refreshed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_400_invalid_grant_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let engine = engine_against(&server);
        assert!(matches!(
            engine.refresh_expired_token(&key("a")).await,
            RefreshOutcome::PermanentlyRevoked
        ));
    }

    #[tokio::test]
    async fn refresh_400_other_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_request"})),
            )
            .mount(&server)
            .await;

        let engine = engine_against(&server);
        assert!(matches!(
            engine.refresh_expired_token(&key("a")).await,
            RefreshOutcome::Transient
        ));
    }

    #[tokio::test]
    async fn refresh_5xx_and_429_are_transient() {
        for status in [429u16, 500, 503] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let engine = engine_against(&server);
            assert!(
                matches!(
                    engine.refresh_expired_token(&key("a")).await,
                    RefreshOutcome::Transient
                ),
                "status {status} must be transient"
            );
        }
    }

    #[tokio::test]
    async fn refresh_malformed_success_body_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let engine = engine_against(&server);
        assert!(matches!(
            engine.refresh_expired_token(&key("a")).await,
            RefreshOutcome::Transient
        ));
    }

    #[tokio::test]
    async fn sync_refreshes_expired_key_and_reactivates_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("a", 3600)))
            .mount(&server)
            .await;

        let now = common::now_millis();
        let mut stale = key("a");
        stale.status = KeyStatus::Expired;
        stale.expires_at = Some(now - 1_000);
        let mut state = state_with(vec![stale]);

        let engine = engine_against(&server);
        let report = engine.sync_keys(&mut state, now).await;

        assert_eq!(report, SyncReport { refreshed: 1, invalidated: 0, failed: 0 });
        let k = state.keys.get("a").unwrap();
        assert_eq!(k.status, KeyStatus::Active);
        assert_eq!(k.access_token, "at_new_a");
        let entry = &state.rotation_log[0];
        assert_eq!(entry.event, RotationEventKind::KeyRefreshed);
        assert_eq!(entry.reason, "token refreshed");
    }

    #[tokio::test]
    async fn sync_proactively_refreshes_approaching_standby() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("b", 3600)))
            .mount(&server)
            .await;

        let now = common::now_millis();
        let active = key_for_account("a", "uuid-a", now + 60 * 60 * 1000);
        // Standby inside the 10-minute buffer but not expired.
        let standby = key_for_account("b", "uuid-b", now + 5 * 60 * 1000);
        let mut state = state_with(vec![active, standby]);
        state.active_key_id = Some("a".into());

        let engine = engine_against(&server);
        let report = engine.sync_keys(&mut state, now).await;

        assert_eq!(report.refreshed, 1);
        assert_eq!(state.rotation_log[0].reason, "proactive standby refresh");
        assert_eq!(state.rotation_log[0].key_id, "b");
    }

    #[tokio::test]
    async fn sync_does_not_proactively_refresh_the_active_key() {
        let server = MockServer::start().await;
        let now = common::now_millis();
        // Active key approaching expiry, but not expired: the swap handles
        // it, not a refresh.
        let active = key_for_account("a", "uuid-a", now + 5 * 60 * 1000);
        let mut state = state_with(vec![active]);
        state.active_key_id = Some("a".into());

        let engine = engine_against(&server);
        let report = engine.sync_keys(&mut state, now).await;

        assert_eq!(report, SyncReport::default());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_invalidates_on_invalid_grant_and_preserves_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let now = common::now_millis();
        let mut revoked = key("a");
        revoked.expires_at = Some(now - 1);
        let mut state = state_with(vec![revoked]);

        let engine = engine_against(&server);
        let report = engine.sync_keys(&mut state, now).await;

        assert_eq!(report.invalidated, 1);
        let k = state.keys.get("a").unwrap();
        assert_eq!(k.status, KeyStatus::Invalid);
        // Token fields untouched by a failed grant.
        assert_eq!(k.access_token, "at_a");
        assert_eq!(k.refresh_token.as_deref(), Some("rt_a"));
        assert_eq!(state.rotation_log[0].event, RotationEventKind::KeyInvalidated);

        // Invalid keys are never retried.
        let report = engine.sync_keys(&mut state, now).await;
        assert_eq!(report, SyncReport::default());
    }

    #[tokio::test]
    async fn sync_marks_transient_failure_expired_and_retries_next_pass() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let now = common::now_millis();
        let mut stale = key("a");
        stale.expires_at = Some(now - 1);
        let mut state = state_with(vec![stale]);

        let engine = engine_against(&server);
        let report = engine.sync_keys(&mut state, now).await;
        assert_eq!(report.failed, 1);
        assert_eq!(state.keys.get("a").unwrap().status, KeyStatus::Expired);

        // Still a candidate on the next pass.
        let report = engine.sync_keys(&mut state, now).await;
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn swap_moves_active_inside_buffer_to_standby_beyond_it() {
        let now = common::now_millis();
        let active = key_for_account("a", "uuid-a", now + 60_000);
        let standby = key_for_account("b", "uuid-b", now + 2 * 60 * 60 * 1000);
        let mut state = state_with(vec![active, standby]);
        state.active_key_id = Some("a".into());

        let engine = RefreshEngine::new();
        let sink = RecordingSink::default();
        let swapped = engine.swap_active_if_expiring(&mut state, &sink, now).await;

        assert!(swapped);
        assert_eq!(state.active_key_id.as_deref(), Some("b"));
        assert_eq!(sink.ids(), vec!["b"]);
        assert_eq!(state.rotation_log[0].event, RotationEventKind::ActiveSwapped);
        assert_eq!(state.rotation_log[0].reason, "pre-expiry active key swap");
    }

    #[tokio::test]
    async fn swap_is_a_noop_without_a_qualifying_standby() {
        let now = common::now_millis();
        let active = key_for_account("a", "uuid-a", now + 60_000);
        // Other key also inside the buffer: not a standby.
        let close = key_for_account("b", "uuid-b", now + 120_000);
        let mut state = state_with(vec![active, close]);
        state.active_key_id = Some("a".into());

        let engine = RefreshEngine::new();
        let sink = RecordingSink::default();
        let swapped = engine.swap_active_if_expiring(&mut state, &sink, now).await;

        assert!(!swapped);
        assert_eq!(state.active_key_id.as_deref(), Some("a"));
        assert!(sink.ids().is_empty());
    }

    #[tokio::test]
    async fn swap_is_a_noop_when_active_is_healthy() {
        let now = common::now_millis();
        let active = key_for_account("a", "uuid-a", now + 2 * 60 * 60 * 1000);
        let standby = key_for_account("b", "uuid-b", now + 3 * 60 * 60 * 1000);
        let mut state = state_with(vec![active, standby]);
        state.active_key_id = Some("a".into());

        let engine = RefreshEngine::new();
        let sink = RecordingSink::default();
        assert!(!engine.swap_active_if_expiring(&mut state, &sink, now).await);
        assert_eq!(state.active_key_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn swap_elects_an_active_key_when_none_is_set() {
        let now = common::now_millis();
        let lone = key_for_account("a", "uuid-a", now + 2 * 60 * 60 * 1000);
        let mut state = state_with(vec![lone]);

        let engine = RefreshEngine::new();
        let sink = RecordingSink::default();
        assert!(engine.swap_active_if_expiring(&mut state, &sink, now).await);
        assert_eq!(state.active_key_id.as_deref(), Some("a"));
        assert_eq!(state.rotation_log[0].reason, "active key elected");
    }

    #[tokio::test]
    async fn swap_deferred_when_sink_fails() {
        let now = common::now_millis();
        let active = key_for_account("a", "uuid-a", now + 60_000);
        let standby = key_for_account("b", "uuid-b", now + 2 * 60 * 60 * 1000);
        let mut state = state_with(vec![active, standby]);
        state.active_key_id = Some("a".into());

        let engine = RefreshEngine::new();
        let sink = RecordingSink::failing();
        assert!(!engine.swap_active_if_expiring(&mut state, &sink, now).await);
        // Pointer unchanged; next cycle retries.
        assert_eq!(state.active_key_id.as_deref(), Some("a"));
    }
}
