//! Certification authority integration.
//!
//! - `AuthorityTransport`: the four remote operations plus the credential
//!   exchange, one request/response each (`http` for the real endpoint,
//!   `mock` for tests)
//! - `SessionManager`: caches the bearer token, single refresh in flight
//! - `CertificationClient`: pairs each call with a session token
//!
//! None of these retry. Retrying is the orchestrator's decision.

pub mod client;
pub mod http;
pub mod mock;
pub mod session;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::CanonicalDocument;

pub use client::CertificationClient;
pub use http::HttpAuthority;
pub use session::SessionManager;

/// Result type for authority operations.
pub type Result<T> = std::result::Result<T, AuthorityError>;

/// Coarse classification of remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Credentials missing, refused or expired.
    Auth,
    Timeout,
    /// Business-rule rejection. Retrying cannot succeed.
    Rejected,
    Unavailable,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RemoteErrorKind::Auth => "auth",
            RemoteErrorKind::Timeout => "timeout",
            RemoteErrorKind::Rejected => "rejected",
            RemoteErrorKind::Unavailable => "unavailable",
        })
    }
}

/// Errors returned by the certification authority or on the way to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// Credential exchange failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The authority refused the bearer token of an operation.
    #[error("authority refused credentials: {0}")]
    Unauthorized(String),

    #[error("authority call timed out: {0}")]
    Timeout(String),

    /// The authority rejected the request on business grounds.
    #[error("rejected by authority: {0}")]
    Rejected(String),

    #[error("authority unavailable: {0}")]
    Unavailable(String),

    #[error("authority client misconfigured: {0}")]
    Configuration(String),
}

impl AuthorityError {
    pub fn kind(&self) -> RemoteErrorKind {
        match self {
            AuthorityError::Authentication(_) | AuthorityError::Unauthorized(_) => {
                RemoteErrorKind::Auth
            }
            AuthorityError::Timeout(_) => RemoteErrorKind::Timeout,
            AuthorityError::Rejected(_) => RemoteErrorKind::Rejected,
            AuthorityError::Unavailable(_) | AuthorityError::Configuration(_) => {
                RemoteErrorKind::Unavailable
            }
        }
    }

    /// Failures that a fresh session may cure.
    pub fn is_auth_failure(&self) -> bool {
        self.kind() == RemoteErrorKind::Auth
    }

    /// Reclassify a failure that happened while obtaining a session.
    ///
    /// A timed-out or unreachable token exchange is still a failed exchange,
    /// so it is reported (and retried) as an authentication failure.
    pub fn into_session_failure(self) -> Self {
        match self {
            AuthorityError::Timeout(msg) => {
                AuthorityError::Authentication(format!("token exchange timed out: {}", msg))
            }
            AuthorityError::Unavailable(msg) => {
                AuthorityError::Authentication(format!("token exchange failed: {}", msg))
            }
            AuthorityError::Rejected(msg) | AuthorityError::Unauthorized(msg) => {
                AuthorityError::Authentication(msg)
            }
            other => other,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AuthorityError::Authentication(m)
            | AuthorityError::Unauthorized(m)
            | AuthorityError::Timeout(m)
            | AuthorityError::Rejected(m)
            | AuthorityError::Unavailable(m)
            | AuthorityError::Configuration(m) => m,
        }
    }
}

/// Bearer token as granted by the authority.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    /// Expiry as stated by the authority.
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A canonical document in the signed form the authority returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDocument {
    pub request_id: Uuid,
    /// Opaque signed payload.
    pub signed_document: String,
}

/// Final identifiers of a certified receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertifiedReceipt {
    pub uuid: String,
    pub series: String,
    pub number: String,
    pub certified_at: DateTime<Utc>,
    /// Reference to the certified artifact.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidRequest {
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidResult {
    pub uuid: String,
    pub voided_at: DateTime<Utc>,
}

/// Certification state as reported by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationState {
    Certified,
    Voided,
    /// Reported while the authority is still processing a void.
    Pending,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptStatus {
    pub uuid: String,
    pub status: CertificationState,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One request/response exchange per operation with the authority.
///
/// Implementations must bound every call with a timeout and report it as
/// `AuthorityError::Timeout`. They must not retry.
#[async_trait]
pub trait AuthorityTransport: Send + Sync {
    /// Exchange the configured service-account credentials for a token.
    async fn authenticate(&self) -> Result<AuthToken>;

    async fn sign(&self, token: &str, document: &CanonicalDocument) -> Result<SignedDocument>;

    async fn certify(&self, token: &str, signed: &SignedDocument) -> Result<CertifiedReceipt>;

    async fn void(&self, token: &str, document_uuid: &str, request: &VoidRequest)
        -> Result<VoidResult>;

    async fn status(&self, token: &str, document_uuid: &str) -> Result<ReceiptStatus>;
}
