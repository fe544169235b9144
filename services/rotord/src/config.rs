//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The approval protection secret is loaded from the
//! APPROVAL_PROTECTION_SECRET env var or protection_secret_file, never
//! stored in the TOML directly to avoid leaking secrets.

use std::path::{Path, PathBuf};

use common::Secret;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub rotation: RotationConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
}

/// State store location
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Directory holding rotation.json and approvals.json (plus their
    /// lock and temp siblings)
    pub state_dir: PathBuf,
}

/// Rotation cycle settings
#[derive(Debug, Deserialize)]
pub struct RotationConfig {
    /// Where the consuming application reads its active credential
    pub materialize_path: PathBuf,
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Token endpoint override; the built-in default is the production
    /// endpoint
    #[serde(default)]
    pub token_endpoint: Option<String>,
}

/// Approval ledger settings
#[derive(Debug, Default, Deserialize)]
pub struct ApprovalConfig {
    #[serde(skip)]
    pub protection_secret: Option<Secret<String>>,
    /// Path to a file containing the protection secret (alternative to
    /// the APPROVAL_PROTECTION_SECRET env var)
    #[serde(default)]
    pub protection_secret_file: Option<PathBuf>,
}

fn default_cycle_interval() -> u64 {
    300
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment
    /// variables.
    ///
    /// Protection secret resolution order:
    /// 1. APPROVAL_PROTECTION_SECRET env var
    /// 2. protection_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.rotation.cycle_interval_secs == 0 {
            return Err(common::Error::Config(
                "cycle_interval_secs must be greater than 0".into(),
            ));
        }

        if let Some(endpoint) = &config.rotation.token_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "token_endpoint must start with http:// or https://, got: {endpoint}"
                )));
            }
        }

        // Resolve protection secret: env var takes precedence over file
        if let Ok(secret) = std::env::var("APPROVAL_PROTECTION_SECRET") {
            if !secret.is_empty() {
                config.approval.protection_secret = Some(Secret::new(secret));
            }
        } else if let Some(ref secret_file) = config.approval.protection_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read protection_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.approval.protection_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or ROTORD_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("ROTORD_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("rotord.toml")
    }

    /// Canonical rotation store file.
    pub fn rotation_state_path(&self) -> PathBuf {
        self.store.state_dir.join("rotation.json")
    }

    /// Canonical approval ledger file.
    pub fn approvals_path(&self) -> PathBuf {
        self.store.state_dir.join("approvals.json")
    }
}
