//! Authority session cache.
//!
//! Holds at most one bearer token. A missing or near-expiry token is
//! refreshed by exactly one caller; concurrent callers wait on the same
//! mutex and reuse the result.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AuthorityError, AuthorityTransport, Result};

#[derive(Clone)]
struct CachedSession {
    token: String,
    /// Expiry minus the refresh margin.
    refresh_at: DateTime<Utc>,
}

/// Shares one authority session across all callers.
pub struct SessionManager {
    transport: Arc<dyn AuthorityTransport>,
    refresh_margin: Duration,
    current: Mutex<Option<CachedSession>>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn AuthorityTransport>, refresh_margin: Duration) -> Self {
        Self {
            transport,
            refresh_margin,
            current: Mutex::new(None),
        }
    }

    /// Return a valid bearer token, exchanging credentials if needed.
    ///
    /// Failures of the exchange surface as `AuthorityError::Authentication`.
    pub async fn token(&self) -> Result<String> {
        let mut current = self.current.lock().await;

        if let Some(session) = current.as_ref() {
            if Utc::now() < session.refresh_at {
                return Ok(session.token.clone());
            }
            debug!(refresh_at = %session.refresh_at, "Session token due for refresh");
        }

        // Lock stays held across the exchange so only one refresh is in flight.
        let granted = self
            .transport
            .authenticate()
            .await
            .map_err(AuthorityError::into_session_failure)?;

        let now = Utc::now();
        if granted.expires_at <= now {
            warn!(expires_at = %granted.expires_at, "Authority granted an already expired token");
            *current = None;
            return Err(AuthorityError::Authentication(
                "authority granted an expired token".to_string(),
            ));
        }

        let refresh_at = refresh_deadline(now, granted.expires_at, self.refresh_margin);
        info!(expires_at = %granted.expires_at, %refresh_at, "Authority session established");

        let token = granted.token.clone();
        *current = Some(CachedSession {
            token: granted.token,
            refresh_at,
        });
        Ok(token)
    }

    /// Drop the cached token if it is still `stale_token`.
    ///
    /// A token already replaced by another caller is left alone.
    pub async fn invalidate(&self, stale_token: &str) {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|s| s.token == stale_token) {
            debug!("Invalidating refused session token");
            *current = None;
        }
    }

    /// Whether a token is cached and not yet due for refresh.
    pub async fn has_valid_session(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| Utc::now() < s.refresh_at)
    }
}

/// Refresh point for a token valid until `expires_at`.
///
/// Validity shorter than twice the margin uses half the validity instead,
/// so short-lived tokens are still reused.
fn refresh_deadline(
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    margin: Duration,
) -> DateTime<Utc> {
    let validity = expires_at - now;
    let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
    if validity < margin * 2 {
        now + validity / 2
    } else {
        expires_at - margin
    }
}
