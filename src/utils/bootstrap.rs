//! Bootstrap utilities for the receipts binaries.
//!
//! Tracing setup, config path resolution and wiring of the issuance stack.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::authority::{AuthorityTransport, CertificationClient, SessionManager};
use crate::config::{Config, LOG_ENV_VAR};
use crate::document::DocumentBuilder;
use crate::orchestration::{ReceiptIssuer, RetryPolicy};
use crate::reconcile::ReceiptReconciler;
use crate::service::DonationReceiptService;
use crate::storage::{DonationStore, PendingReceiptLog};

/// Initialize tracing with the `RECEIPTS_LOG` environment variable.
///
/// Defaults to "info" level if it is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Value of `--config <path>` or `--config=<path>` on the command line.
pub fn parse_config_path() -> Option<String> {
    config_path_from(std::env::args().skip(1))
}

fn config_path_from(args: impl IntoIterator<Item = String>) -> Option<String> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

/// Whether `flag` appears on the command line.
pub fn has_flag(flag: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == flag)
}

/// Fully wired issuance stack.
///
/// Issuer and reconciler share one lock registry, one session and one set of
/// stores.
pub struct ReceiptsRuntime {
    pub config: Config,
    pub service: DonationReceiptService,
    pub reconciler: Arc<ReceiptReconciler>,
}

impl ReceiptsRuntime {
    /// Wire the stack over the given stores and authority transport.
    pub fn assemble(
        config: Config,
        donations: Arc<dyn DonationStore>,
        pending: Arc<dyn PendingReceiptLog>,
        transport: Arc<dyn AuthorityTransport>,
    ) -> Self {
        let session = Arc::new(SessionManager::new(
            transport.clone(),
            config.authority.token_refresh_margin(),
        ));
        let client = CertificationClient::new(transport, session);
        let issuer = ReceiptIssuer::new(
            donations.clone(),
            pending.clone(),
            client,
            DocumentBuilder::new(&config.issuer),
        )
        .with_retry_policy(RetryPolicy::from_config(&config.authority));

        let reconciler = ReceiptReconciler::new(
            donations.clone(),
            pending.clone(),
            issuer.locks().clone(),
        )
        .with_max_attempts(config.reconciler.max_attempts);

        Self {
            service: DonationReceiptService::new(Arc::new(issuer), donations, pending),
            reconciler: Arc::new(reconciler),
            config,
        }
    }

    /// Open SQLite storage and connect the HTTP authority client.
    #[cfg(feature = "sqlite")]
    pub async fn from_config(
        config: Config,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let (donations, pending) = crate::storage::init_storage(&config.storage).await?;
        let transport: Arc<dyn AuthorityTransport> =
            Arc::new(crate::authority::HttpAuthority::new(&config.authority)?);

        tracing::info!(
            authority = %config.authority.base_url,
            issuer_tax_id = %config.issuer.tax_id,
            "Receipt issuance stack ready"
        );
        Ok(Self::assemble(config, donations, pending, transport))
    }
}
