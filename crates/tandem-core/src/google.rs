//! Google OAuth access tokens shared by the Gmail and Calendar gateways

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::GoogleConfig;
use crate::error::{ProviderError, Service};

/// Refresh this long before the reported expiry
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Longest access-token lifetime honoured from a refresh reply
const MAX_TOKEN_LIFETIME_SECS: i64 = 86_400;

enum Grant {
    Static(String),
    Refresh {
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Supplies bearer tokens for Google APIs: either a fixed access token or the
/// refresh-token grant with an in-memory cached access token
pub struct GoogleTokenSource {
    http: Client,
    grant: Grant,
    cached: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for GoogleTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.grant {
            Grant::Static(_) => "static",
            Grant::Refresh { .. } => "refresh",
        };
        f.debug_struct("GoogleTokenSource")
            .field("grant", &kind)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl GoogleTokenSource {
    pub fn from_static(token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            grant: Grant::Static(token.into()),
            cached: RwLock::new(None),
        }
    }

    pub fn from_refresh_token(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            http: Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            grant: Grant::Refresh {
                token_url: token_url.into(),
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                refresh_token: refresh_token.into(),
            },
            cached: RwLock::new(None),
        }
    }

    /// Build from resolved config. `None` when no credentials are set, which
    /// puts both Google gateways in mock mode. A complete refresh grant takes
    /// precedence over a static access token.
    pub fn from_config(config: &GoogleConfig, timeout: std::time::Duration) -> Option<Self> {
        if let (Some(id), Some(secret), Some(refresh)) = (
            config.client_id.as_deref(),
            config.client_secret.as_deref(),
            config.refresh_token.as_deref(),
        ) {
            info!("Google credentials: refresh-token grant");
            return Some(Self::from_refresh_token(
                &config.token_url,
                id,
                secret,
                refresh,
                timeout,
            ));
        }
        config.access_token.as_deref().map(|token| {
            info!("Google credentials: static access token");
            Self::from_static(token)
        })
    }

    /// A currently valid access token. Failures are classified against
    /// `service` so the caller reports e.g. `CALENDAR_AUTH_EXPIRED`.
    pub async fn access_token(&self, service: Service) -> Result<String, ProviderError> {
        let (token_url, client_id, client_secret, refresh_token) = match &self.grant {
            Grant::Static(token) => return Ok(token.clone()),
            Grant::Refresh {
                token_url,
                client_id,
                client_secret,
                refresh_token,
            } => (token_url, client_id, client_secret, refresh_token),
        };

        if let Some(cached) = self.cached.read().await.as_ref()
            && cached.expires_at > Utc::now()
        {
            return Ok(cached.value.clone());
        }

        let mut slot = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(cached) = slot.as_ref()
            && cached.expires_at > Utc::now()
        {
            return Ok(cached.value.clone());
        }

        debug!("Refreshing Google access token");
        let resp = self
            .http
            .post(token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::transport(service, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::classify(
                service,
                Some(status.as_u16()),
                &format!("token refresh failed: {}", body),
            ));
        }

        let parsed: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::transport(service, e))?;

        let lifetime = parsed
            .expires_in
            .unwrap_or(3_600)
            .clamp(0, MAX_TOKEN_LIFETIME_SECS);
        let expires_at = Utc::now() + Duration::seconds((lifetime - EXPIRY_MARGIN_SECS).max(0));
        *slot = Some(CachedToken {
            value: parsed.access_token.clone(),
            expires_at,
        });
        Ok(parsed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn refresh_source(server: &MockServer) -> GoogleTokenSource {
        GoogleTokenSource::from_refresh_token(
            format!("{}/token", server.uri()),
            "client",
            "secret",
            "1//refresh",
            std::time::Duration::from_secs(5),
        )
    }

    #[test]
    fn test_from_config_without_credentials() {
        let config = GoogleConfig {
            access_token: None,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            ..GoogleConfig::default()
        };
        assert!(GoogleTokenSource::from_config(&config, std::time::Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn test_static_token() {
        let source = GoogleTokenSource::from_static("ya29.static");
        assert_eq!(source.access_token(Service::Gmail).await.unwrap(), "ya29.static");
        assert!(!format!("{:?}", source).contains("ya29"));
    }

    #[tokio::test]
    async fn test_refresh_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": 3599,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = refresh_source(&server);
        assert_eq!(source.access_token(Service::Calendar).await.unwrap(), "ya29.fresh");
        assert_eq!(source.access_token(Service::Gmail).await.unwrap(), "ya29.fresh");
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_is_clamped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.long",
                "expires_in": i64::MAX,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = refresh_source(&server);
        assert_eq!(source.access_token(Service::Gmail).await.unwrap(), "ya29.long");
        assert_eq!(source.access_token(Service::Gmail).await.unwrap(), "ya29.long");
    }

    #[tokio::test]
    async fn test_invalid_grant_is_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let err = refresh_source(&server)
            .access_token(Service::Calendar)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CALENDAR_AUTH_EXPIRED");
    }
}
