//! Request gatekeeping: bearer authentication middleware, per-route scope
//! extractors and envelope-aware body/query extractors.
//!
//! [`authenticate`] validates the bearer token once per request and attaches
//! the [`Authenticated`] identity. Handlers then name the scope they need in
//! their signature (`Scoped<CalendarWrite>`); extraction denies the request
//! with `INSUFFICIENT_SCOPE` before the handler body runs. Checks are
//! stateless: no session, no cache, no revocation list.

use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Query, Request, State};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::redact::token_hint;
use crate::scope::{CALENDAR_READ, CALENDAR_WRITE, ScopeDecision, check_scope};
use crate::token::TokenError;
use crate::validator::{TokenValidator, ValidatedToken};

/// Identity attached to a request after successful token validation
#[derive(Clone)]
pub struct Authenticated {
    /// Raw bearer value, needed when the agent exchanges it for a delegated token
    pub token: String,
    pub identity: ValidatedToken,
}

impl std::fmt::Debug for Authenticated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticated")
            .field("token", &"[REDACTED]")
            .field("identity", &self.identity)
            .finish()
    }
}

/// Extract the bearer value from an `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Unavailable(msg) => {
                ApiError::Internal(format!("Token validation unavailable: {}", msg))
            }
            other => ApiError::InvalidToken(other.to_string()),
        }
    }
}

/// State for the [`authenticate`] middleware
#[derive(Clone)]
pub struct Gatekeeper {
    validator: Arc<dyn TokenValidator>,
}

impl Gatekeeper {
    pub fn new(validator: Arc<dyn TokenValidator>) -> Self {
        Self { validator }
    }

    /// Validate a bearer value into an [`Authenticated`] identity
    pub async fn admit(&self, token: &str) -> Result<Authenticated, ApiError> {
        let identity = self.validator.validate(token).await?;
        debug!(
            validator = self.validator.name(),
            subject = %identity.subject,
            scopes = %identity.scopes,
            token = %token_hint(token),
            "Token validated"
        );
        Ok(Authenticated {
            token: token.to_string(),
            identity,
        })
    }
}

/// Middleware: reject requests without a valid bearer token; attach
/// [`Authenticated`] to the request otherwise.
pub async fn authenticate(
    State(gate): State<Gatekeeper>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or(ApiError::MissingToken)?
        .to_string();
    let authenticated = gate.admit(&token).await?;
    req.extensions_mut().insert(authenticated);
    Ok(next.run(req).await)
}

impl<S: Send + Sync> FromRequestParts<S> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Authenticated>()
            .cloned()
            .ok_or(ApiError::MissingToken)
    }
}

/// A scope a route requires
pub trait RequiredScope: Send + Sync + 'static {
    const SCOPE: &'static str;
}

/// Requires `calendar.read`
pub struct CalendarRead;

impl RequiredScope for CalendarRead {
    const SCOPE: &'static str = CALENDAR_READ;
}

/// Requires `calendar.write`
pub struct CalendarWrite;

impl RequiredScope for CalendarWrite {
    const SCOPE: &'static str = CALENDAR_WRITE;
}

/// Extractor that admits the request only if the validated token carries
/// `R::SCOPE`. The full grant set passes through unchanged.
pub struct Scoped<R: RequiredScope> {
    pub auth: Authenticated,
    _scope: PhantomData<R>,
}

impl<R: RequiredScope> Scoped<R> {
    pub fn check(auth: Authenticated) -> Result<Self, ApiError> {
        match check_scope(R::SCOPE, &auth.identity.scopes) {
            ScopeDecision::Allow => Ok(Self {
                auth,
                _scope: PhantomData,
            }),
            ScopeDecision::Deny => {
                warn!(
                    subject = %auth.identity.subject,
                    granted = %auth.identity.scopes,
                    "Denied: missing required scope {}",
                    R::SCOPE
                );
                Err(ApiError::InsufficientScope {
                    required: R::SCOPE.to_string(),
                })
            }
        }
    }
}

impl<R: RequiredScope, S: Send + Sync> FromRequestParts<S> for Scoped<R> {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Authenticated::from_request_parts(parts, state).await?;
        Self::check(auth)
    }
}

/// JSON body extractor whose failures render as `VALIDATION_ERROR`.
/// An empty body is read as `{}`.
pub struct ValidJson<T>(pub T);

impl<T: DeserializeOwned, S: Send + Sync> FromRequest<S> for ValidJson<T> {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::validation(format!("Unreadable request body: {}", e)))?;
        let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &bytes
        };
        serde_json::from_slice(raw)
            .map(ValidJson)
            .map_err(|e| ApiError::validation(format!("Invalid JSON body: {}", e)))
    }
}

/// Query-string extractor whose failures render as `VALIDATION_ERROR`
pub struct ValidQuery<T>(pub T);

impl<T: DeserializeOwned, S: Send + Sync> FromRequestParts<S> for ValidQuery<T> {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(v)| ValidQuery(v))
            .map_err(|e| ApiError::validation(format!("Invalid query string: {}", e.body_text())))
    }
}
