//! Scoped delegation: exchanging a user's session token for a narrower,
//! audience-bound credential that one agent presents to another
//!
//! The exchange is a single call. There is no retry, no backoff and no local
//! caching of issued credentials; every failure becomes `DELEGATION_FAILED`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::redact::{redact_credentials, token_hint};
use crate::scope::ScopeSet;
use crate::token::{LocalIssuer, SESSION_AUDIENCE, TokenError};

/// Upper bound on a delegated credential's lifetime
pub const MAX_DELEGATION_TTL_SECS: u64 = 3_600;

/// A request to mint a narrower credential
#[derive(Clone)]
pub struct DelegationRequest {
    pub session_token: String,
    pub target_audience: String,
    pub requested_scopes: ScopeSet,
    /// Requested lifetime in seconds
    pub expiration_secs: Option<u64>,
}

impl std::fmt::Debug for DelegationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationRequest")
            .field("session_token", &"[REDACTED]")
            .field("target_audience", &self.target_audience)
            .field("requested_scopes", &self.requested_scopes)
            .field("expiration_secs", &self.expiration_secs)
            .finish()
    }
}

impl DelegationRequest {
    pub fn new(
        session_token: impl Into<String>,
        target_audience: impl Into<String>,
        requested_scopes: ScopeSet,
    ) -> Self {
        Self {
            session_token: session_token.into(),
            target_audience: target_audience.into(),
            requested_scopes,
            expiration_secs: None,
        }
    }

    pub fn with_expiration(mut self, secs: Option<u64>) -> Self {
        self.expiration_secs = secs;
        self
    }

    /// Reject requests that must never reach the credential provider
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut problems = Vec::new();
        if self.session_token.trim().is_empty() {
            problems.push("sessionToken: must be a non-empty bearer value".to_string());
        }
        if self.target_audience.trim().is_empty() {
            problems.push("targetAudience: is required".to_string());
        }
        if self.requested_scopes.is_empty() {
            problems.push("requestedScopes: at least one scope is required".to_string());
        }
        for unknown in self.requested_scopes.unknown() {
            problems.push(format!("requestedScopes: unknown scope '{}'", unknown));
        }
        if self.expiration_secs == Some(0) {
            problems.push("expirationTime: must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation_with("Invalid delegation request", problems))
        }
    }

    fn ttl(&self, default_secs: u64) -> Duration {
        let secs = self
            .expiration_secs
            .unwrap_or(default_secs)
            .min(MAX_DELEGATION_TTL_SECS);
        Duration::seconds(secs as i64)
    }
}

/// Wire shape of the exchange call
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeBody<'a> {
    session_jwt: &'a str,
    target_audience: &'a str,
    requested_scopes: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration_time: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    #[serde(
        default,
        alias = "accessToken",
        alias = "access_token",
        alias = "delegatedToken"
    )]
    token: Option<String>,
    #[serde(default, rename = "expiresIn", alias = "expires_in")]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// A scoped, audience-bound bearer credential
#[derive(Clone)]
pub struct DelegatedCredential {
    token: String,
    pub audience: String,
    pub scopes: ScopeSet,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for DelegatedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatedCredential")
            .field("token", &"[REDACTED]")
            .field("audience", &self.audience)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl DelegatedCredential {
    pub fn new(
        token: impl Into<String>,
        audience: impl Into<String>,
        scopes: ScopeSet,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            token: token.into(),
            audience: audience.into(),
            scopes,
            expires_at,
        }
    }

    /// The bearer value. Only ever sent to `audience`.
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Why an exchange produced no usable credential
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("credential provider unreachable: {0}")]
    Transport(String),

    #[error("credential provider rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("credential provider returned no usable token: {0}")]
    Malformed(String),

    #[error("session token rejected: {0}")]
    InvalidSession(#[from] TokenError),
}

/// Issues delegated credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn exchange(
        &self,
        request: &DelegationRequest,
    ) -> Result<DelegatedCredential, DelegationError>;
}

/// Credential provider backed by an external token-exchange endpoint
pub struct RemoteCredentialProvider {
    http: Client,
    endpoint: String,
    client_id: String,
    client_secret: Option<String>,
}

impl std::fmt::Debug for RemoteCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCredentialProvider")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

impl RemoteCredentialProvider {
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            http: Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            client_secret,
        }
    }
}

#[async_trait]
impl CredentialProvider for RemoteCredentialProvider {
    fn name(&self) -> &str {
        "remote"
    }

    async fn exchange(
        &self,
        request: &DelegationRequest,
    ) -> Result<DelegatedCredential, DelegationError> {
        let body = ExchangeBody {
            session_jwt: &request.session_token,
            target_audience: &request.target_audience,
            requested_scopes: request.requested_scopes.iter().collect(),
            expiration_time: request.expiration_secs,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.client_id, self.client_secret.as_deref())
            .json(&body)
            .send()
            .await
            .map_err(|e| DelegationError::Transport(redact_credentials(&e.to_string())))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DelegationError::Rejected {
                status: status.as_u16(),
                message: redact_credentials(&text),
            });
        }

        let parsed: ExchangeResponse = resp
            .json()
            .await
            .map_err(|e| DelegationError::Malformed(e.to_string()))?;

        let token = parsed
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| DelegationError::Malformed("response contains no token".into()))?;

        let scopes = parsed
            .scope
            .as_deref()
            .map(ScopeSet::parse)
            .unwrap_or_else(|| request.requested_scopes.clone());
        let expires_at = parsed
            .expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + Duration::seconds(secs.min(MAX_DELEGATION_TTL_SECS as i64)));

        Ok(DelegatedCredential::new(
            token,
            request.target_audience.clone(),
            scopes,
            expires_at,
        ))
    }
}

/// Credential provider that verifies local session tokens and mints
/// delegated tokens with the shared [`LocalIssuer`]
pub struct LocalCredentialProvider {
    issuer: Arc<LocalIssuer>,
    actor: String,
    default_ttl_secs: u64,
}

impl LocalCredentialProvider {
    pub fn new(issuer: Arc<LocalIssuer>, actor: impl Into<String>, default_ttl_secs: u64) -> Self {
        Self {
            issuer,
            actor: actor.into(),
            default_ttl_secs,
        }
    }
}

#[async_trait]
impl CredentialProvider for LocalCredentialProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn exchange(
        &self,
        request: &DelegationRequest,
    ) -> Result<DelegatedCredential, DelegationError> {
        let session = self
            .issuer
            .verify(&request.session_token, Some(SESSION_AUDIENCE))?;

        let ttl = request.ttl(self.default_ttl_secs);
        let token = self
            .issuer
            .mint(
                &session.sub,
                &request.target_audience,
                &request.requested_scopes,
                ttl,
                Some(&self.actor),
            )
            .map_err(|e| DelegationError::Malformed(e.to_string()))?;

        Ok(DelegatedCredential::new(
            token,
            request.target_audience.clone(),
            request.requested_scopes.clone(),
            Some(Utc::now() + ttl),
        ))
    }
}

/// Agent-side entry point for obtaining delegated credentials
#[derive(Clone)]
pub struct DelegationClient {
    provider: Arc<dyn CredentialProvider>,
    default_ttl_secs: Option<u64>,
}

impl DelegationClient {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            default_ttl_secs: None,
        }
    }

    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.default_ttl_secs = Some(secs);
        self
    }

    /// Exchange `session_token` for a credential bound to `target_audience`
    /// and `requested_scopes`. Exactly one provider call; any failure is
    /// `DELEGATION_FAILED`.
    pub async fn request_delegated_token(
        &self,
        session_token: &str,
        target_audience: &str,
        requested_scopes: ScopeSet,
    ) -> Result<DelegatedCredential, ApiError> {
        let request = DelegationRequest::new(session_token, target_audience, requested_scopes)
            .with_expiration(self.default_ttl_secs);
        request.validate()?;

        debug!(
            provider = self.provider.name(),
            audience = target_audience,
            scopes = %request.requested_scopes,
            session = %token_hint(session_token),
            "Requesting delegated token"
        );

        match self.provider.exchange(&request).await {
            Ok(credential) => {
                info!(
                    "Delegated token issued for {} with scopes {}",
                    credential.audience, credential.scopes
                );
                Ok(credential)
            }
            Err(e) => {
                warn!("Delegation to {} failed: {}", target_audience, e);
                Err(ApiError::DelegationFailed(e.to_string()))
            }
        }
    }
}
