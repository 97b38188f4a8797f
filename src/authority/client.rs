//! Session-aware authority client.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    AuthorityError, AuthorityTransport, CertifiedReceipt, ReceiptStatus, Result, SessionManager,
    SignedDocument, VoidRequest, VoidResult,
};
use crate::document::CanonicalDocument;

/// Runs authority operations with a token from the shared session.
///
/// A refused token is dropped from the session so the next attempt
/// re-authenticates. The failure itself is returned unchanged.
#[derive(Clone)]
pub struct CertificationClient {
    transport: Arc<dyn AuthorityTransport>,
    session: Arc<SessionManager>,
}

impl CertificationClient {
    pub fn new(transport: Arc<dyn AuthorityTransport>, session: Arc<SessionManager>) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub async fn sign(&self, document: &CanonicalDocument) -> Result<SignedDocument> {
        let token = self.session.token().await?;
        debug!(request_id = %document.request_id, "Signing document");
        let result = self.transport.sign(&token, document).await;
        self.observe(&token, result).await
    }

    pub async fn certify(&self, signed: &SignedDocument) -> Result<CertifiedReceipt> {
        let token = self.session.token().await?;
        debug!(request_id = %signed.request_id, "Certifying document");
        let result = self.transport.certify(&token, signed).await;
        self.observe(&token, result).await
    }

    pub async fn void(&self, document_uuid: &str, request: &VoidRequest) -> Result<VoidResult> {
        let token = self.session.token().await?;
        let result = self.transport.void(&token, document_uuid, request).await;
        self.observe(&token, result).await
    }

    pub async fn status(&self, document_uuid: &str) -> Result<ReceiptStatus> {
        let token = self.session.token().await?;
        let result = self.transport.status(&token, document_uuid).await;
        self.observe(&token, result).await
    }

    async fn observe<T>(&self, token: &str, result: Result<T>) -> Result<T> {
        if let Err(AuthorityError::Unauthorized(msg)) = &result {
            warn!(error = %msg, "Authority refused session token");
            self.session.invalidate(token).await;
        }
        result
    }
}
