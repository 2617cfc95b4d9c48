use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use super::AuthenticatedUser;
use crate::generation::Poster;
use crate::{AppState, Error, Result};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
}

/// Caller's completed posters, newest first
pub async fn list_posters(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Poster>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let posters = state
        .db
        .call(move |db| db.list_posters(&identity.uid, limit))
        .await?;
    Ok(Json(posters))
}

pub async fn get_poster(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(poster_id): Path<String>,
) -> Result<Json<Poster>> {
    state
        .db
        .call(move |db| db.get_poster(&identity.uid, &poster_id))
        .await?
        .map(Json)
        .ok_or(Error::PosterNotFound)
}

/// Delete a poster and its image. Credits are not refunded.
pub async fn delete_poster(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(poster_id): Path<String>,
) -> Result<StatusCode> {
    let user_id = identity.uid.clone();
    let poster = state
        .db
        .call(move |db| db.delete_poster(&user_id, &poster_id))
        .await?
        .ok_or(Error::PosterNotFound)?;

    if let Some(key) = &poster.storage_path {
        if let Err(e) = state.objects.delete(key).await {
            // The record is gone; the image is left for manual cleanup
            error!(poster_id = %poster.id, key = %key, error = %e, "Failed to delete poster image");
        }
    }

    info!(user_id = %identity.uid, poster_id = %poster.id, "Poster deleted");
    Ok(StatusCode::NO_CONTENT)
}
