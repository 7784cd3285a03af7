//! Maps domain errors onto the HTTP status contract. Every error body
//! carries a stable machine code and a localized display message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use sacco_core::error::SaccoError;

use crate::locale::Locale;

/// Wire shape of every error the API returns.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    /// Translate a domain error. Internal failures keep their machine
    /// code but never leak detail into the display message.
    pub fn from_sacco(err: SaccoError, locale: Locale) -> Self {
        let status = status_for(&err);
        let code = err.error_code();
        if status.is_server_error() {
            error!(code, error = %err, "Request failed");
        } else {
            warn!(code, error = %err, "Request refused");
        }
        metrics::counter!("api.errors", "code" => code).increment(1);
        Self {
            status,
            body: ErrorBody {
                error: code.to_string(),
                message: locale.message(code).to_string(),
            },
        }
    }

    /// An API-surface error that has no domain counterpart, e.g. a
    /// missing bearer token.
    pub fn new(status: StatusCode, code: &'static str, locale: Locale) -> Self {
        metrics::counter!("api.errors", "code" => code).increment(1);
        Self {
            status,
            body: ErrorBody {
                error: code.to_string(),
                message: locale.message(code).to_string(),
            },
        }
    }

    pub fn unauthorized(code: &'static str, locale: Locale) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, locale)
    }

    pub fn forbidden(locale: Locale) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", locale)
    }
}

fn status_for(err: &SaccoError) -> StatusCode {
    match err {
        SaccoError::TenantNotFound(_) => StatusCode::NOT_FOUND,
        SaccoError::TenantInactive { .. } => StatusCode::FORBIDDEN,
        SaccoError::SubscriptionExpired { .. } => StatusCode::PAYMENT_REQUIRED,
        SaccoError::SessionInvalid(_) => StatusCode::UNAUTHORIZED,
        SaccoError::UnauthorizedContextSwitch(_) => StatusCode::FORBIDDEN,
        SaccoError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
