use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::error;

use super::{parse_json, AuthenticatedUser};
use crate::generation::{GenerationRequest, GenerationResult};
use crate::{AppState, Error, Result};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

pub async fn generate_poster(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(identity): AuthenticatedUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<GenerationResult>> {
    let request: GenerationRequest = parse_json(&body)?;
    let request_id = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    // Detached so a dropped connection cannot stop a generation between
    // storing the image and settling the debit
    let generator = state.generator.clone();
    let task = tokio::spawn(async move {
        generator
            .generate_for(&identity, &request, request_id.as_deref())
            .await
    });

    let result = task.await.map_err(|e| {
        error!(error = %e, "Generation task panicked");
        Error::Internal(format!("generation task failed: {}", e))
    })??;
    Ok(Json(result))
}
