use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::webhook::{construct_event, WebhookError, SIGNATURE_HEADER};
use crate::{AppState, Error, Result};

pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let Some(secret) = state.config.stripe_webhook_secret.as_deref() else {
        error!("STRIPE_WEBHOOK_SECRET is not set, rejecting webhook delivery");
        return Err(Error::WebhookSignatureInvalid);
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let event = construct_event(&body, signature, secret).map_err(|e| match e {
        WebhookError::MalformedPayload(e) => {
            warn!(error = %e, "Verified webhook delivery does not parse");
            Error::invalid(format!("Malformed event: {}", e))
        }
        other => {
            warn!(error = %other, "Rejected webhook delivery");
            Error::WebhookSignatureInvalid
        }
    })?;

    state
        .transitions
        .handle(&event.id, &event.event_type, &event.payment)
        .await
        .map_err(Error::WebhookProcessingError)?;

    Ok(Json(json!({ "received": true })))
}
