//! receipts-reconciler: Pending receipt reconciliation
//!
//! Persists receipts that were certified by the authority but never written
//! onto their donation. Shares the SQLite database with the issuing service.
//!
//! ## Usage
//! ```text
//! receipts-reconciler [--config <path>] [--once]
//! ```
//!
//! - `--once`: run a single pass and exit non-zero if anything is left over
//! - otherwise runs every `reconciler.interval_secs` until Ctrl+C
//!
//! ## Configuration
//! - RECEIPTS_CONFIG: Path to a YAML config file
//! - RECEIPTS_STORAGE__PATH: SQLite database file
//! - RECEIPTS_LOG: Log filter (default: info)

use tracing::{error, info, warn};

use carehome_receipts::config::Config;
use carehome_receipts::reconcile::spawn_reconciler;
use carehome_receipts::utils::bootstrap::{has_flag, init_tracing, parse_config_path, ReceiptsRuntime};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e.to_string()
    })?;

    let runtime = ReceiptsRuntime::from_config(config).await.map_err(|e| {
        error!("Failed to start: {}", e);
        e
    })?;

    if has_flag("--once") {
        let report = runtime.reconciler.reconcile_pending().await?;
        if !report.is_clean() {
            warn!(
                failed = report.failed,
                conflicts = report.conflicts,
                "Pending receipts remain after reconciliation"
            );
            std::process::exit(2);
        }
        return Ok(());
    }

    let interval = runtime.config.reconciler.interval();
    let handle = spawn_reconciler(runtime.reconciler.clone(), interval);

    info!("receipts-reconciler running, press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;

    handle.shutdown().await;
    info!("receipts-reconciler stopped");
    Ok(())
}
