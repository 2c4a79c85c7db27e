//! Local credential issuer: HS256 tokens for running both agents without an
//! external auth service
//!
//! Session tokens and delegated tokens share one claim shape. A delegated
//! token carries the acting agent in `act`, the target audience in `aud` and
//! the granted scopes in the space-separated `scope` claim.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scope::ScopeSet;

/// Audience of end-user session tokens minted by the local issuer
pub const SESSION_AUDIENCE: &str = "tandem-session";

/// Party acting on behalf of the subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub sub: String,
}

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act: Option<Actor>,
}

impl Claims {
    pub fn scopes(&self) -> ScopeSet {
        ScopeSet::parse(&self.scope)
    }
}

/// Token validation and minting failures
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("token audience does not match")]
    WrongAudience,

    #[error("token is not active")]
    Inactive,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("failed to sign token: {0}")]
    Signing(String),

    #[error("token validation unavailable: {0}")]
    Unavailable(String),
}

/// Issues and verifies HS256 tokens with a shared secret
pub struct LocalIssuer {
    issuer: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for LocalIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIssuer")
            .field("issuer", &self.issuer)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl LocalIssuer {
    pub fn new(issuer: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            issuer: issuer.into(),
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Mint a token for `subject`, bound to `audience` and `scopes`.
    pub fn mint(
        &self,
        subject: &str,
        audience: &str,
        scopes: &ScopeSet,
        ttl: Duration,
        actor: Option<&str>,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            aud: audience.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            scope: scopes.to_claim(),
            act: actor.map(|sub| Actor {
                sub: sub.to_string(),
            }),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify signature, issuer and expiry. When `audience` is given the
    /// token's `aud` must equal it.
    pub fn verify(&self, token: &str, audience: Option<&str>) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.leeway = 5;
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidAudience => TokenError::WrongAudience,
                _ => TokenError::Malformed(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{CALENDAR_AUDIENCE, CALENDAR_WRITE};

    fn issuer() -> LocalIssuer {
        LocalIssuer::new("tandem-test", b"0123456789abcdef0123456789abcdef")
    }

    #[test]
    fn test_mint_and_verify() {
        let iss = issuer();
        let scopes = ScopeSet::from_iter([CALENDAR_WRITE]);
        let token = iss
            .mint("user-1", CALENDAR_AUDIENCE, &scopes, Duration::minutes(10), Some("agent-a-email"))
            .unwrap();
        let claims = iss.verify(&token, Some(CALENDAR_AUDIENCE)).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.scopes(), scopes);
        assert_eq!(claims.act.unwrap().sub, "agent-a-email");
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let iss = issuer();
        let token = iss
            .mint("user-1", SESSION_AUDIENCE, &ScopeSet::new(), Duration::minutes(10), None)
            .unwrap();
        assert!(matches!(
            iss.verify(&token, Some(CALENDAR_AUDIENCE)),
            Err(TokenError::WrongAudience)
        ));
        assert!(iss.verify(&token, None).is_ok());
    }

    #[test]
    fn test_expired_rejected() {
        let iss = issuer();
        let token = iss
            .mint("user-1", SESSION_AUDIENCE, &ScopeSet::new(), Duration::minutes(-10), None)
            .unwrap();
        assert!(matches!(iss.verify(&token, None), Err(TokenError::Expired)));
    }

    #[test]
    fn test_other_secret_rejected() {
        let token = issuer()
            .mint("user-1", SESSION_AUDIENCE, &ScopeSet::new(), Duration::minutes(10), None)
            .unwrap();
        let other = LocalIssuer::new("tandem-test", b"another-secret-another-secret-xx");
        assert!(matches!(other.verify(&token, None), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            issuer().verify("not-a-token", None),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", issuer());
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("0123456789abcdef"));
    }
}
