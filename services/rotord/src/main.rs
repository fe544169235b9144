//! Credential rotation daemon and on-demand secret operations
//!
//! One binary, three entry points:
//! 1. Default: run the rotation cycle periodically (or once with --once)
//! 2. `check-approval`: consume an approval code for a (server, tool,
//!    args) operation, printing the record on success
//! 3. `status`: JSON summary of the pool
//!
//! Every invocation is an independent short-lived unit; concurrent runs
//! coordinate purely through the state store's file locks.

mod config;

use std::time::Duration;

use anyhow::{Context, Result};
use approval_ledger::ApprovalLedger;
use credential_pool::{FileSink, RefreshEngine, RotationState, run_cycle};
use state_store::StateStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let subcommand = args.first().filter(|a| !a.starts_with("--")).cloned();

    let config_path = Config::resolve_path(flag_value(&args, "--config"));
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        path = %config_path.display(),
        state_dir = %config.store.state_dir.display(),
        "configuration loaded"
    );

    match subcommand.as_deref() {
        None => run_cycles(&config, args.iter().any(|a| a == "--once")).await,
        Some("check-approval") => check_approval(&config, &args).await,
        Some("status") => status(&config).await,
        Some(other) => anyhow::bail!("unknown subcommand: {other}"),
    }
}

/// `--flag value` lookup in raw args.
fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// Run the rotation cycle once or on the configured interval.
async fn run_cycles(config: &Config, once: bool) -> Result<()> {
    let store: StateStore<RotationState> = StateStore::new(config.rotation_state_path());
    let engine = match &config.rotation.token_endpoint {
        Some(endpoint) => RefreshEngine::with_endpoint(endpoint.clone()),
        None => RefreshEngine::new(),
    };
    let sink = FileSink::new(&config.rotation.materialize_path);

    if once {
        run_cycle(&store, &engine, &sink)
            .await
            .context("rotation cycle failed")?;
        return Ok(());
    }

    info!(
        interval_secs = config.rotation.cycle_interval_secs,
        "starting rotation cycle loop"
    );
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.rotation.cycle_interval_secs));
    loop {
        ticker.tick().await;
        // A failed cycle (lock exhaustion, corrupt store) is surfaced but
        // does not kill the loop; the next tick retries.
        if let Err(e) = run_cycle(&store, &engine, &sink).await {
            error!(error = %e, "rotation cycle failed");
        }
    }
}

/// Consume an approval code for (server, tool, args).
///
/// Prints the consumed record as JSON and exits 0; exits 1 when no
/// matching approval exists.
async fn check_approval(config: &Config, args: &[String]) -> Result<()> {
    let server = flag_value(args, "--server").context("check-approval requires --server")?;
    let tool = flag_value(args, "--tool").context("check-approval requires --tool")?;
    let raw_args = flag_value(args, "--args").unwrap_or("{}");
    let tool_args: serde_json::Value =
        serde_json::from_str(raw_args).context("parsing --args as JSON")?;

    let ledger = ApprovalLedger::new(
        config.approvals_path(),
        config.approval.protection_secret.clone(),
    );

    match ledger.check_approval(server, tool, &tool_args).await? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        None => {
            info!(server, tool, "no matching approval");
            std::process::exit(1);
        }
    }
}

/// Print a JSON summary of the rotation pool.
async fn status(config: &Config) -> Result<()> {
    let store: StateStore<RotationState> = StateStore::new(config.rotation_state_path());
    let state = store.snapshot().await.context("reading rotation store")?;

    let mut by_status = std::collections::BTreeMap::new();
    for key in state.keys.values() {
        *by_status.entry(key.status.label()).or_insert(0usize) += 1;
    }

    let summary = serde_json::json!({
        "active_key_id": state.active_key_id,
        "keys_total": state.keys.len(),
        "keys_by_status": by_status,
        "rotation_log_entries": state.rotation_log.len(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
