//! Response envelope: every agent response is wrapped in the same shape
//!
//! `{ success, data?, error?: { message, code, details? }, timestamp }`

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard envelope around response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub timestamp: DateTime<Utc>,
}

/// Error in an envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        message: impl Into<String>,
        code: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                message: message.into(),
                code: code.into(),
                details,
            }),
            timestamp: Utc::now(),
        }
    }
}

/// A successful payload with an explicit status code (200 unless changed)
#[derive(Debug)]
pub struct Reply<T> {
    pub status: StatusCode,
    pub data: T,
}

impl<T> Reply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            data,
        }
    }

    pub fn with_status(status: StatusCode, data: T) -> Self {
        Self { status, data }
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        (self.status, Json(Envelope::ok(self.data))).into_response()
    }
}
