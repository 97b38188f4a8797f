//! HTTP/JSON transport to the certification authority.
//!
//! Every request carries the configured timeout. Responses are classified
//! into `AuthorityError` kinds; nothing here retries.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    AuthToken, AuthorityError, AuthorityTransport, CertifiedReceipt, ReceiptStatus, Result,
    SignedDocument, VoidRequest, VoidResult,
};
use crate::config::AuthorityConfig;
use crate::document::CanonicalDocument;

/// Longest error body carried into an error message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Serialize)]
struct TokenRequest<'a> {
    service_id: &'a str,
    secret: &'a str,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    request_id: Uuid,
    document: &'a CanonicalDocument,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Which call a response belongs to; 401/403 map differently for the
/// credential exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Authenticate,
    Operation,
}

/// reqwest-backed `AuthorityTransport`.
pub struct HttpAuthority {
    client: Client,
    base_url: String,
    service_id: String,
    secret: String,
}

impl HttpAuthority {
    pub fn new(config: &AuthorityConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(AuthorityError::Configuration(
                "authority base_url not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AuthorityError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_id: config.service_id.clone(),
            secret: config.secret.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `{base}/documents/{document_uuid}/{action}`, with the id encoded as a
    /// single path segment.
    fn document_url(&self, document_uuid: &str, action: &str) -> Result<Url> {
        if matches!(document_uuid, "" | "." | "..") {
            return Err(AuthorityError::Rejected(format!(
                "invalid document uuid {:?}",
                document_uuid
            )));
        }

        let mut url = Url::parse(&self.url("/documents"))
            .map_err(|e| AuthorityError::Configuration(format!("invalid base_url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AuthorityError::Configuration("base_url cannot carry a path".to_string()))?
            .push(document_uuid)
            .push(action);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        call: Call,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(operation, &e))?;

        let status = response.status();
        if status.is_success() {
            debug!(operation, status = %status, "Authority call succeeded");
            return response.json::<T>().await.map_err(|e| {
                AuthorityError::Unavailable(format!("{}: undecodable response: {}", operation, e))
            });
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify_status(call, status, &body);
        if err.kind() == super::RemoteErrorKind::Rejected {
            error!(operation, status = %status, body = %truncate(&body), "Authority rejected request");
        } else {
            warn!(operation, status = %status, body = %truncate(&body), "Authority call failed");
        }
        Err(err)
    }
}

#[async_trait]
impl AuthorityTransport for HttpAuthority {
    async fn authenticate(&self) -> Result<AuthToken> {
        if self.service_id.is_empty() || self.secret.is_empty() {
            return Err(AuthorityError::Authentication(
                "service credentials not configured".to_string(),
            ));
        }

        let request = self.client.post(self.url("/auth/token")).json(&TokenRequest {
            service_id: &self.service_id,
            secret: &self.secret,
        });
        self.send(Call::Authenticate, "authenticate", request).await
    }

    async fn sign(&self, token: &str, document: &CanonicalDocument) -> Result<SignedDocument> {
        let request = self
            .client
            .post(self.url("/documents/sign"))
            .bearer_auth(token)
            .json(&SignRequest {
                request_id: document.request_id,
                document,
            });
        self.send(Call::Operation, "sign", request).await
    }

    async fn certify(&self, token: &str, signed: &SignedDocument) -> Result<CertifiedReceipt> {
        let request = self
            .client
            .post(self.url("/documents/certify"))
            .bearer_auth(token)
            .json(signed);
        self.send(Call::Operation, "certify", request).await
    }

    async fn void(
        &self,
        token: &str,
        document_uuid: &str,
        request: &VoidRequest,
    ) -> Result<VoidResult> {
        let request = self
            .client
            .post(self.document_url(document_uuid, "void")?)
            .bearer_auth(token)
            .json(request);
        self.send(Call::Operation, "void", request).await
    }

    async fn status(&self, token: &str, document_uuid: &str) -> Result<ReceiptStatus> {
        let request = self
            .client
            .get(self.document_url(document_uuid, "status")?)
            .bearer_auth(token);
        self.send(Call::Operation, "status", request).await
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

fn classify_transport_error(operation: &str, err: &reqwest::Error) -> AuthorityError {
    if err.is_timeout() {
        AuthorityError::Timeout(format!("{}: {}", operation, err))
    } else if err.is_builder() {
        AuthorityError::Configuration(format!("{}: {}", operation, err))
    } else {
        AuthorityError::Unavailable(format!("{}: {}", operation, err))
    }
}

/// Map a non-success status and its body to an error.
fn classify_status(call: Call, status: StatusCode, body: &str) -> AuthorityError {
    let detail = rejection_detail(status, body);
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => AuthorityError::Timeout(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => match call {
            Call::Authenticate => AuthorityError::Authentication(detail),
            Call::Operation => AuthorityError::Unauthorized(detail),
        },
        StatusCode::TOO_MANY_REQUESTS => AuthorityError::Unavailable(detail),
        s if s.is_server_error() => AuthorityError::Unavailable(detail),
        _ => AuthorityError::Rejected(detail),
    }
}

/// Prefer the authority's own `message`/`error` field over the raw body.
fn rejection_detail(status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .filter(|m| !m.trim().is_empty());

    match message {
        Some(m) => format!("HTTP {} - {}", status.as_u16(), truncate(&m)),
        None if body.trim().is_empty() => format!("HTTP {}", status.as_u16()),
        None => format!("HTTP {} - {}", status.as_u16(), truncate(body)),
    }
}
