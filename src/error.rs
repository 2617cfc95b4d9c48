//! Service error type and its HTTP mapping

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use tracing::error;

use crate::auth::AuthError;
use crate::billing::{DenialReason, UPGRADE_URL};
use crate::object_store::StorageError;
use crate::store::StoreError;
use crate::stripe_client::StripeError;
use crate::synthesis::SynthesisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("User not found")]
    UserNotFound,

    #[error("{0}")]
    InsufficientCredits(DenialReason),

    #[error("Poster generation failed, please try again")]
    SynthesisFailed(#[source] SynthesisError),

    #[error("Failed to save poster, please try again")]
    StorageFailed(#[source] StorageError),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Webhook processing failed")]
    WebhookProcessingError(#[source] StoreError),

    #[error("Too many requests, try again in {} seconds", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("A request with this idempotency key is still in progress")]
    RequestInProgress,

    #[error("Poster not found")]
    PosterNotFound,

    #[error("Failed to create checkout session")]
    PaymentProvider(#[source] StripeError),

    #[error("Internal server error")]
    Database(#[from] StoreError),

    #[error("Internal server error")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) | Self::WebhookSignatureInvalid => StatusCode::BAD_REQUEST,
            Self::UserNotFound | Self::PosterNotFound => StatusCode::NOT_FOUND,
            Self::InsufficientCredits(_) => StatusCode::FORBIDDEN,
            Self::SynthesisFailed(_) | Self::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RequestInProgress => StatusCode::CONFLICT,
            Self::StorageFailed(_)
            | Self::WebhookProcessingError(_)
            | Self::Database(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code sent alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::InsufficientCredits(_) => "INSUFFICIENT_CREDITS",
            Self::SynthesisFailed(_) => "SYNTHESIS_FAILED",
            Self::StorageFailed(_) => "STORAGE_FAILED",
            Self::WebhookSignatureInvalid => "WEBHOOK_SIGNATURE_INVALID",
            Self::WebhookProcessingError(_) => "WEBHOOK_PROCESSING_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::RequestInProgress => "REQUEST_IN_PROGRESS",
            Self::PosterNotFound => "POSTER_NOT_FOUND",
            Self::PaymentProvider(_) => "PAYMENT_PROVIDER_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

impl From<AuthError> for Error {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Unavailable(message) => Self::Internal(message),
            _ => Self::Unauthenticated,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = ?self, "Request failed");
        }

        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        if matches!(self, Self::InsufficientCredits(_)) {
            body["upgradeUrl"] = json!(UPGRADE_URL);
        }

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
