//! Mock certification authority for testing.
//!
//! Issues tokens and receipts in memory, counts every call, and can be
//! scripted to fail a given operation a number of times.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AuthToken, AuthorityError, AuthorityTransport, CertificationState, CertifiedReceipt,
    ReceiptStatus, Result, SignedDocument, VoidRequest, VoidResult,
};
use crate::document::CanonicalDocument;

/// Operation selector for scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Authenticate,
    Sign,
    Certify,
    Void,
    Status,
}

struct ScriptedFailure {
    error: AuthorityError,
    remaining: u32,
}

/// In-memory `AuthorityTransport`.
pub struct MockAuthority {
    latency: Duration,
    token_validity: chrono::Duration,
    authenticate_calls: AtomicU32,
    sign_calls: AtomicU32,
    certify_calls: AtomicU32,
    void_calls: AtomicU32,
    status_calls: AtomicU32,
    next_number: AtomicU32,
    valid_tokens: RwLock<HashSet<String>>,
    signed: RwLock<HashMap<Uuid, CanonicalDocument>>,
    receipts: RwLock<HashMap<String, CertificationState>>,
    failures: RwLock<HashMap<MockOperation, ScriptedFailure>>,
}

impl Default for MockAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthority {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            token_validity: chrono::Duration::hours(24),
            authenticate_calls: AtomicU32::new(0),
            sign_calls: AtomicU32::new(0),
            certify_calls: AtomicU32::new(0),
            void_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            next_number: AtomicU32::new(1),
            valid_tokens: RwLock::new(HashSet::new()),
            signed: RwLock::new(HashMap::new()),
            receipts: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
        }
    }

    /// Delay applied to every call before it is answered.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Validity of granted tokens. Negative values grant expired tokens.
    pub fn with_token_validity(mut self, validity: chrono::Duration) -> Self {
        self.token_validity = validity;
        self
    }

    /// Fail the next `times` calls of `operation` with `error`.
    pub async fn fail(&self, operation: MockOperation, error: AuthorityError, times: u32) {
        self.failures.write().await.insert(
            operation,
            ScriptedFailure {
                error,
                remaining: times,
            },
        );
    }

    pub async fn fail_authenticate(&self, error: AuthorityError, times: u32) {
        self.fail(MockOperation::Authenticate, error, times).await;
    }

    pub async fn fail_sign(&self, error: AuthorityError, times: u32) {
        self.fail(MockOperation::Sign, error, times).await;
    }

    pub async fn fail_certify(&self, error: AuthorityError, times: u32) {
        self.fail(MockOperation::Certify, error, times).await;
    }

    pub async fn fail_void(&self, error: AuthorityError, times: u32) {
        self.fail(MockOperation::Void, error, times).await;
    }

    pub async fn fail_status(&self, error: AuthorityError, times: u32) {
        self.fail(MockOperation::Status, error, times).await;
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// Refuse every token granted so far.
    pub async fn revoke_tokens(&self) {
        self.valid_tokens.write().await.clear();
    }

    pub fn authenticate_calls(&self) -> u32 {
        self.authenticate_calls.load(Ordering::SeqCst)
    }

    pub fn sign_calls(&self) -> u32 {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn certify_calls(&self) -> u32 {
        self.certify_calls.load(Ordering::SeqCst)
    }

    pub fn void_calls(&self) -> u32 {
        self.void_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Documents received for signing, by request id.
    pub async fn signed_documents(&self) -> Vec<CanonicalDocument> {
        self.signed.read().await.values().cloned().collect()
    }

    pub async fn certified_count(&self) -> usize {
        self.receipts.read().await.len()
    }

    async fn enter(&self, operation: MockOperation, counter: &AtomicU32) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut failures = self.failures.write().await;
        if let Some(script) = failures.get_mut(&operation) {
            if script.remaining > 0 {
                script.remaining -= 1;
                return Err(script.error.clone());
            }
        }
        Ok(())
    }

    async fn check_token(&self, token: &str) -> Result<()> {
        if self.valid_tokens.read().await.contains(token) {
            Ok(())
        } else {
            Err(AuthorityError::Unauthorized("HTTP 401 - token expired".to_string()))
        }
    }
}

#[async_trait]
impl AuthorityTransport for MockAuthority {
    async fn authenticate(&self) -> Result<AuthToken> {
        self.enter(MockOperation::Authenticate, &self.authenticate_calls)
            .await?;

        let token = format!("mock-token-{}", Uuid::new_v4().simple());
        self.valid_tokens.write().await.insert(token.clone());
        Ok(AuthToken {
            token,
            expires_at: Utc::now() + self.token_validity,
        })
    }

    async fn sign(&self, token: &str, document: &CanonicalDocument) -> Result<SignedDocument> {
        self.enter(MockOperation::Sign, &self.sign_calls).await?;
        self.check_token(token).await?;

        self.signed
            .write()
            .await
            .insert(document.request_id, document.clone());
        Ok(SignedDocument {
            request_id: document.request_id,
            signed_document: format!("signed:{}", document.request_id),
        })
    }

    async fn certify(&self, token: &str, signed: &SignedDocument) -> Result<CertifiedReceipt> {
        self.enter(MockOperation::Certify, &self.certify_calls)
            .await?;
        self.check_token(token).await?;

        if !self.signed.read().await.contains_key(&signed.request_id) {
            return Err(AuthorityError::Rejected(
                "HTTP 422 - unknown signing request".to_string(),
            ));
        }

        let uuid = Uuid::new_v4().to_string().to_uppercase();
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        self.receipts
            .write()
            .await
            .insert(uuid.clone(), CertificationState::Certified);

        Ok(CertifiedReceipt {
            series: uuid[..8].to_string(),
            number: number.to_string(),
            certified_at: Utc::now(),
            url: format!("https://mock-authority.invalid/documents/{}", uuid),
            uuid,
        })
    }

    async fn void(
        &self,
        token: &str,
        document_uuid: &str,
        _request: &VoidRequest,
    ) -> Result<VoidResult> {
        self.enter(MockOperation::Void, &self.void_calls).await?;
        self.check_token(token).await?;

        let mut receipts = self.receipts.write().await;
        match receipts.get_mut(document_uuid) {
            Some(state) if *state == CertificationState::Certified => {
                *state = CertificationState::Voided;
                Ok(VoidResult {
                    uuid: document_uuid.to_string(),
                    voided_at: Utc::now(),
                })
            }
            Some(_) => Err(AuthorityError::Rejected(
                "HTTP 409 - document already voided".to_string(),
            )),
            None => Err(AuthorityError::Rejected(
                "HTTP 404 - document not found".to_string(),
            )),
        }
    }

    async fn status(&self, token: &str, document_uuid: &str) -> Result<ReceiptStatus> {
        self.enter(MockOperation::Status, &self.status_calls).await?;
        self.check_token(token).await?;

        match self.receipts.read().await.get(document_uuid) {
            Some(state) => Ok(ReceiptStatus {
                uuid: document_uuid.to_string(),
                status: *state,
                updated_at: Some(Utc::now()),
            }),
            None => Err(AuthorityError::Rejected(
                "HTTP 404 - document not found".to_string(),
            )),
        }
    }
}
