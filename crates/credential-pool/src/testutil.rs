//! Shared builders for pool tests

use std::collections::HashMap;

use crate::key::{CredentialKey, KeyStatus, RotationState};

pub(crate) fn key(id: &str) -> CredentialKey {
    CredentialKey {
        id: id.into(),
        status: KeyStatus::Active,
        access_token: format!("at_{id}"),
        refresh_token: Some(format!("rt_{id}")),
        expires_at: None,
        account_uuid: None,
        account_email: None,
        last_usage: HashMap::new(),
        last_health_check: None,
        tombstoned_at: None,
    }
}

pub(crate) fn key_for_account(id: &str, uuid: &str, expires_at: u64) -> CredentialKey {
    let mut k = key(id);
    k.account_uuid = Some(uuid.into());
    k.expires_at = Some(expires_at);
    k
}

pub(crate) fn state_with(keys: Vec<CredentialKey>) -> RotationState {
    let mut state = RotationState::default();
    for k in keys {
        state.keys.insert(k.id.clone(), k);
    }
    state
}
