// crates/tascade-server/src/error.rs
// ============================================================================
// Module: Server Error Mapping
// Description: Deterministic mapping from kernel errors to HTTP responses.
// Purpose: Surface stable domain codes with structured JSON bodies.
// Dependencies: axum, serde, serde_json, tascade-core
// ============================================================================

//! ## Overview
//! Every error leaving the server carries the stable domain code, a
//! human-readable message, an optional sub-code, and optional structured
//! details. Status codes are a pure function of the domain code; storage
//! faults surface as opaque 500s without leaking internals.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tascade_core::CoordinatorError;
use tascade_core::DomainError;
use tascade_core::ErrorCode;

// ============================================================================
// SECTION: Wire Body
// ============================================================================

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable domain code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional stable sub-code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_code: Option<String>,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

// ============================================================================
// SECTION: Api Error
// ============================================================================

/// Server-side error: an HTTP status plus the wire body.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code.
    pub status: StatusCode,
    /// Wire body.
    pub body: ErrorBody,
}

impl ApiError {
    /// Builds an `AUTH_DENIED` response.
    #[must_use]
    pub fn auth_denied(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            body: ErrorBody {
                code: ErrorCode::AuthDenied.as_str().to_string(),
                message: message.into(),
                sub_code: None,
                details: None,
            },
        }
    }

    /// Builds a malformed-request response without a domain code mapping.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                code: ErrorCode::InvariantViolation.as_str().to_string(),
                message: message.into(),
                sub_code: Some("MALFORMED_REQUEST".to_string()),
                details: None,
            },
        }
    }

    /// Builds an unknown-operation response.
    #[must_use]
    pub fn unknown_operation(name: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                code: ErrorCode::NotFound.as_str().to_string(),
                message: format!("unknown operation: {name}"),
                sub_code: None,
                details: None,
            },
        }
    }
}

/// Maps a domain code onto its deterministic HTTP status.
#[must_use]
pub const fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvariantViolation
        | ErrorCode::InvalidCapabilities
        | ErrorCode::InvalidTaskClass
        | ErrorCode::InvalidWorkSpec => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::DependencyCycle
        | ErrorCode::PlanStale
        | ErrorCode::ReservationConflict
        | ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::LeaseStale | ErrorCode::LeaseFenced => StatusCode::PRECONDITION_FAILED,
        ErrorCode::AmbiguousReference | ErrorCode::IdentifierParentRequired => {
            StatusCode::BAD_REQUEST
        }
        ErrorCode::AuthDenied => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        Self {
            status: status_for(error.code),
            body: ErrorBody {
                code: error.code.as_str().to_string(),
                message: error.message,
                sub_code: error.sub_code.map(ToString::to_string),
                details: error.details,
            },
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(error: CoordinatorError) -> Self {
        match error {
            CoordinatorError::Domain(domain) => domain.into(),
            CoordinatorError::Store(store) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: ErrorBody {
                    code: "STORAGE_ERROR".to_string(),
                    message: store.to_string(),
                    sub_code: None,
                    details: None,
                },
            },
            CoordinatorError::Hash(hash) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: ErrorBody {
                    code: "INTERNAL_ERROR".to_string(),
                    message: hash.to_string(),
                    sub_code: None,
                    details: None,
                },
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
