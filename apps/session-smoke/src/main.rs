//! Drives a session synchronizer against the configured API and prints the
//! resolved snapshot.

mod config;
mod logging;

use std::sync::Arc;

use session_core::{SessionError, SessionSnapshot};
use session_platform::{
    BridgeCommunity, FileStore, StaticBridgeProbe, StaticHostBridge, TracingFramePort,
};
use session_switchx::{HttpProfileLookup, SessionDeps, SessionSynchronizer};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::SmokeConfig;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(config).await {
        eprintln!("Session smoke failed: {err}");
        std::process::exit(1);
    }
}

async fn run(config: SmokeConfig) -> Result<(), SessionError> {
    let lookup = HttpProfileLookup::new(config.lookup_config())?;

    let probe = Arc::new(StaticBridgeProbe::default());
    if let Some(auth) = config.bridge_auth.clone() {
        let community = config
            .bridge_community_id
            .clone()
            .map(|id| BridgeCommunity {
                id,
                name: String::new(),
            });
        probe.install(Some(Arc::new(StaticHostBridge::new(Some(auth), community))));
    }

    let deps = SessionDeps::new(
        Arc::new(FileStore::new(&config.data_dir)),
        probe,
        Arc::new(lookup),
    )
    .with_frame(Arc::new(TracingFramePort));
    let sync = SessionSynchronizer::start(config.sync_config(), deps)?;

    match timeout(config.settle_timeout(), sync.refresh()).await {
        Ok(Ok(bridge_credentials)) => {
            info!(bridge_credentials, phase = ?sync.phase(), "session resolved")
        }
        Ok(Err(err)) => warn!(code = %err.code, error = %err.message, "profile lookup failed"),
        Err(_) => warn!(
            timeout_ms = config.settle_timeout_ms,
            "profile lookup still running"
        ),
    }
    print_snapshot(&sync.snapshot());

    if config.clear_after {
        sync.clear();
        print_snapshot(&sync.snapshot());
    }
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    match serde_json::to_string_pretty(snapshot) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("Failed encoding snapshot: {err}"),
    }
}
