//! Error taxonomy shared by both agents
//!
//! [`ProviderError`] classifies failures of upstream APIs (Gmail, Google
//! Calendar, the LLM) from HTTP status and message substrings. [`ApiError`] is
//! the HTTP-facing taxonomy; it renders as the standard response envelope.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::envelope::Envelope;
use crate::redact::redact_credentials;

/// Upstream service a provider error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Gmail,
    Calendar,
    Ai,
}

impl Service {
    /// Prefix used for service-specific error codes (`GMAIL_AUTH_EXPIRED`)
    pub fn code_prefix(&self) -> &'static str {
        match self {
            Self::Gmail => "GMAIL",
            Self::Calendar => "CALENDAR",
            Self::Ai => "AI",
        }
    }

    /// Prefix used for not-found codes, named after the resource (`EVENT_NOT_FOUND`)
    pub fn resource_prefix(&self) -> &'static str {
        match self {
            Self::Gmail => "EMAIL",
            Self::Calendar => "EVENT",
            Self::Ai => "AI",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gmail => write!(f, "Gmail"),
            Self::Calendar => write!(f, "Google Calendar"),
            Self::Ai => write!(f, "AI provider"),
        }
    }
}

const AUTH_PATTERNS: &[&str] = &[
    "invalid_grant",
    "token has been expired or revoked",
    "invalid credentials",
    "invalid_token",
    "unauthenticated",
    "invalid authentication",
    "invalid x-api-key",
    "incorrect api key",
    "authentication_error",
    "login required",
];

const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "ratelimitexceeded",
    "rate_limit",
    "rate limit",
    "too many requests",
];

const PERMISSION_PATTERNS: &[&str] = &[
    "insufficient permission",
    "insufficientpermissions",
    "permission_denied",
    "permission denied",
    "permission_error",
    "forbidden",
    "access_denied",
];

const NOT_FOUND_PATTERNS: &[&str] = &["not found", "notfound", "not_found"];

/// A failure reported by (or while reaching) an upstream provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{service} credentials are not configured")]
    NotConfigured { service: Service },

    #[error("{service} authentication expired or was revoked: {message}")]
    AuthExpired { service: Service, message: String },

    #[error("{service} resource not found: {message}")]
    NotFound { service: Service, message: String },

    #[error("{service} permission denied: {message}")]
    Permissions { service: Service, message: String },

    #[error("{service} quota exceeded: {message}")]
    QuotaExceeded { service: Service, message: String },

    #[error("{service} request failed: {message}")]
    Upstream {
        service: Service,
        status: Option<u16>,
        message: String,
    },
}

fn matches_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

impl ProviderError {
    /// Classify an upstream failure. Message substrings are checked first,
    /// then the HTTP status; anything unmatched is [`ProviderError::Upstream`].
    pub fn classify(service: Service, status: Option<u16>, message: &str) -> Self {
        let message = redact_credentials(message);
        let lower = message.to_lowercase();

        if matches_any(&lower, AUTH_PATTERNS) {
            return Self::AuthExpired { service, message };
        }
        if matches_any(&lower, QUOTA_PATTERNS) {
            return Self::QuotaExceeded { service, message };
        }
        if matches_any(&lower, PERMISSION_PATTERNS) {
            return Self::Permissions { service, message };
        }
        if matches_any(&lower, NOT_FOUND_PATTERNS) {
            return Self::NotFound { service, message };
        }
        Self::by_status(service, status, message)
    }

    fn by_status(service: Service, status: Option<u16>, message: String) -> Self {
        match status {
            Some(401) => Self::AuthExpired { service, message },
            Some(403) => Self::Permissions { service, message },
            Some(404) | Some(410) => Self::NotFound { service, message },
            Some(429) => Self::QuotaExceeded { service, message },
            _ => Self::Upstream {
                service,
                status,
                message,
            },
        }
    }

    /// Classify a transport-level failure (connect, timeout, decode) by its
    /// status alone. The request URL carries user input, so it is dropped
    /// from the message and never pattern-matched.
    pub fn transport(service: Service, err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let message = redact_credentials(&err.without_url().to_string());
        Self::by_status(service, status, message)
    }

    pub fn service(&self) -> Service {
        match self {
            Self::NotConfigured { service }
            | Self::AuthExpired { service, .. }
            | Self::NotFound { service, .. }
            | Self::Permissions { service, .. }
            | Self::QuotaExceeded { service, .. }
            | Self::Upstream { service, .. } => *service,
        }
    }

    /// True for failures recognized as auth, permission, not-found or quota
    /// problems. These are never masked by mock data.
    pub fn is_typed(&self) -> bool {
        matches!(
            self,
            Self::AuthExpired { .. }
                | Self::NotFound { .. }
                | Self::Permissions { .. }
                | Self::QuotaExceeded { .. }
        )
    }

    pub fn code(&self) -> String {
        let service = self.service();
        match self {
            Self::AuthExpired { .. } => format!("{}_AUTH_EXPIRED", service.code_prefix()),
            Self::NotFound { .. } => format!("{}_NOT_FOUND", service.resource_prefix()),
            Self::Permissions { .. } => format!("{}_PERMISSIONS_ERROR", service.code_prefix()),
            Self::QuotaExceeded { .. } => format!("{}_QUOTA_EXCEEDED", service.code_prefix()),
            Self::NotConfigured { .. } | Self::Upstream { .. } => "INTERNAL_ERROR".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthExpired { .. } => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Permissions { .. } => StatusCode::FORBIDDEN,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotConfigured { .. } | Self::Upstream { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Errors returned from agent HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<String>,
    },

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Insufficient scope: '{required}' is required")]
    InsufficientScope { required: String },

    #[error("Delegation failed: {0}")]
    DelegationFailed(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Calendar agent returned {status}: {message}")]
    CalendarAgent {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Too many requests, retry later")]
    RateLimited,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn code(&self) -> String {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR".to_string(),
            Self::MissingToken => "MISSING_TOKEN".to_string(),
            Self::InvalidToken(_) => "INVALID_TOKEN".to_string(),
            Self::InsufficientScope { .. } => "INSUFFICIENT_SCOPE".to_string(),
            Self::DelegationFailed(_) => "DELEGATION_FAILED".to_string(),
            Self::Provider(e) => e.code(),
            Self::CalendarAgent { code, .. } => code.clone(),
            Self::RateLimited => "RATE_LIMITED".to_string(),
            Self::Internal(_) => "INTERNAL_ERROR".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::MissingToken | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope { .. } | Self::DelegationFailed(_) => StatusCode::FORBIDDEN,
            Self::Provider(e) => e.status(),
            Self::CalendarAgent { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { details, .. } if !details.is_empty() => {
                Some(serde_json::json!(details))
            }
            Self::InsufficientScope { required } => {
                Some(serde_json::json!({ "requiredScope": required }))
            }
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = %self.code(), "{}", self);
        } else {
            warn!(code = %self.code(), status = status.as_u16(), "{}", self);
        }
        let body = Envelope::<()>::failure(self.to_string(), self.code(), self.details());
        (status, Json(body)).into_response()
    }
}
