//! Certification authority configuration.

use std::time::Duration;

use serde::Deserialize;

/// Endpoint, credentials and call limits for the certification authority.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Base URL; operation paths are appended to it.
    pub base_url: String,
    /// Service-account identifier used for the token exchange.
    pub service_id: String,
    /// Service-account secret. Prefer `RECEIPTS__AUTHORITY__SECRET`.
    pub secret: String,
    /// Bound on every remote call, in seconds.
    pub timeout_secs: u64,
    /// Subtracted from the authority's stated token validity.
    pub token_refresh_margin_secs: u64,
    /// Re-attempts of a call after an authentication-class failure.
    pub max_auth_retries: usize,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: "https://certificador.example.invalid/api/v1".to_string(),
            service_id: String::new(),
            secret: String::new(),
            timeout_secs: 30,
            token_refresh_margin_secs: 3600,
            max_auth_retries: 1,
        }
    }
}

impl AuthorityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_credentials(
        mut self,
        service_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.service_id = service_id.into();
        self.secret = secret.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }
}

// Hand-written so the secret never reaches the logs.
impl std::fmt::Debug for AuthorityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityConfig")
            .field("base_url", &self.base_url)
            .field("service_id", &self.service_id)
            .field("secret", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("token_refresh_margin_secs", &self.token_refresh_margin_secs)
            .field("max_auth_retries", &self.max_auth_retries)
            .finish()
    }
}
