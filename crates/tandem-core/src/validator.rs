//! Inbound token validation
//!
//! A [`TokenValidator`] turns a bearer string into a [`ValidatedToken`]: the
//! subject, audience and granted scopes that the gatekeeper trusts. Scopes
//! are only ever read from a validated token, never from caller input.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::redact::{redact_credentials, token_hint};
use crate::scope::ScopeSet;
use crate::token::{LocalIssuer, TokenError};

/// Result of successful validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedToken {
    pub subject: String,
    pub audience: Vec<String>,
    pub scopes: ScopeSet,
    pub expires_at: Option<DateTime<Utc>>,
    /// Agent acting on the subject's behalf, for delegated tokens
    pub actor: Option<String>,
}

/// Validates bearer tokens presented to an agent
#[async_trait]
pub trait TokenValidator: Send + Sync {
    fn name(&self) -> &str;
    async fn validate(&self, token: &str) -> Result<ValidatedToken, TokenError>;
}

/// Validates tokens minted by the [`LocalIssuer`]
pub struct LocalTokenValidator {
    issuer: Arc<LocalIssuer>,
    audience: Option<String>,
}

impl LocalTokenValidator {
    pub fn new(issuer: Arc<LocalIssuer>, audience: Option<String>) -> Self {
        Self { issuer, audience }
    }
}

#[async_trait]
impl TokenValidator for LocalTokenValidator {
    fn name(&self) -> &str {
        "local"
    }

    async fn validate(&self, token: &str) -> Result<ValidatedToken, TokenError> {
        let claims = self.issuer.verify(token, self.audience.as_deref())?;
        Ok(ValidatedToken {
            scopes: claims.scopes(),
            subject: claims.sub,
            audience: vec![claims.aud],
            expires_at: Utc.timestamp_opt(claims.exp, 0).single(),
            actor: claims.act.map(|a| a.sub),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<OneOrMany>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    act: Option<IntrospectedActor>,
}

#[derive(Debug, Deserialize)]
struct IntrospectedActor {
    sub: String,
}

/// Validates tokens against a remote introspection endpoint
pub struct RemoteTokenValidator {
    http: Client,
    endpoint: String,
    client_id: String,
    client_secret: Option<String>,
    audience: Option<String>,
}

impl std::fmt::Debug for RemoteTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTokenValidator")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("audience", &self.audience)
            .finish()
    }
}

impl RemoteTokenValidator {
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        audience: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            client_secret,
            audience,
        }
    }
}

#[async_trait]
impl TokenValidator for RemoteTokenValidator {
    fn name(&self) -> &str {
        "remote"
    }

    async fn validate(&self, token: &str) -> Result<ValidatedToken, TokenError> {
        debug!(token = %token_hint(token), "Introspecting token at {}", self.endpoint);

        let resp = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.client_id, self.client_secret.as_deref())
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| TokenError::Unavailable(redact_credentials(&e.to_string())))?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(TokenError::Inactive);
        }
        if !status.is_success() {
            return Err(TokenError::Unavailable(format!(
                "introspection returned HTTP {}",
                status
            )));
        }

        let body: IntrospectionResponse = resp
            .json()
            .await
            .map_err(|e| TokenError::Malformed(format!("introspection response: {}", e)))?;

        if !body.active {
            return Err(TokenError::Inactive);
        }

        let audience = body.aud.map(OneOrMany::into_vec).unwrap_or_default();
        if let Some(expected) = &self.audience
            && !audience.iter().any(|a| a == expected)
        {
            return Err(TokenError::WrongAudience);
        }

        let mut scopes = body.scope.as_deref().map(ScopeSet::parse).unwrap_or_default();
        for s in body.scopes.unwrap_or_default() {
            scopes.insert(s);
        }

        let expires_at = body.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single());
        if expires_at.is_some_and(|exp| exp <= Utc::now()) {
            return Err(TokenError::Expired);
        }

        Ok(ValidatedToken {
            subject: body.sub.unwrap_or_default(),
            audience,
            scopes,
            expires_at,
            actor: body.act.map(|a| a.sub),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{CALENDAR_AUDIENCE, CALENDAR_READ, CALENDAR_WRITE};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote(server: &MockServer, audience: Option<&str>) -> RemoteTokenValidator {
        RemoteTokenValidator::new(
            format!("{}/introspect", server.uri()),
            "project-1",
            Some("mgmt-key".to_string()),
            audience.map(String::from),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_local_validator_extracts_scopes() {
        let issuer = Arc::new(LocalIssuer::new("t", b"secret-secret-secret-secret-1234"));
        let token = issuer
            .mint(
                "user-1",
                CALENDAR_AUDIENCE,
                &ScopeSet::from_iter([CALENDAR_WRITE]),
                chrono::Duration::minutes(5),
                Some("agent-a-email"),
            )
            .unwrap();
        let validator = LocalTokenValidator::new(issuer, Some(CALENDAR_AUDIENCE.to_string()));
        let validated = validator.validate(&token).await.unwrap();
        assert!(validated.scopes.contains(CALENDAR_WRITE));
        assert_eq!(validated.actor.as_deref(), Some("agent-a-email"));
        assert_eq!(validated.audience, vec![CALENDAR_AUDIENCE.to_string()]);
    }

    #[tokio::test]
    async fn test_remote_active_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "sub": "user-7",
                "aud": [CALENDAR_AUDIENCE, "other"],
                "scope": "calendar.read",
                "scopes": ["calendar.write"],
            })))
            .mount(&server)
            .await;

        let validated = remote(&server, Some(CALENDAR_AUDIENCE))
            .validate("opaque")
            .await
            .unwrap();
        assert_eq!(validated.subject, "user-7");
        assert!(validated.scopes.contains(CALENDAR_READ));
        assert!(validated.scopes.contains(CALENDAR_WRITE));
    }

    #[tokio::test]
    async fn test_remote_inactive_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"active": false})))
            .mount(&server)
            .await;
        let result = remote(&server, None).validate("opaque").await;
        assert!(matches!(result, Err(TokenError::Inactive)));
    }

    #[tokio::test]
    async fn test_remote_audience_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "aud": "someone-else",
                "scope": "calendar.write",
            })))
            .mount(&server)
            .await;
        let result = remote(&server, Some(CALENDAR_AUDIENCE)).validate("opaque").await;
        assert!(matches!(result, Err(TokenError::WrongAudience)));
    }

    #[tokio::test]
    async fn test_remote_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let result = remote(&server, None).validate("opaque").await;
        assert!(matches!(result, Err(TokenError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_remote_connection_refused() {
        let validator = RemoteTokenValidator::new(
            "http://127.0.0.1:1/introspect",
            "p",
            None,
            None,
            Duration::from_secs(2),
        );
        assert!(matches!(
            validator.validate("x").await,
            Err(TokenError::Unavailable(_))
        ));
    }
}
