use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{parse_json, AuthenticatedUser};
use crate::billing::{credits_remaining, CreditsRemaining, EntitlementRecord};
use crate::{AppState, Error, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    #[serde(flatten)]
    pub user: EntitlementRecord,
    pub credits_remaining: CreditsRemaining,
}

impl From<EntitlementRecord> for UserResponse {
    fn from(user: EntitlementRecord) -> Self {
        Self {
            credits_remaining: credits_remaining(&user),
            user,
        }
    }
}

/// Provision the caller's record on first sign in
pub async fn provision_me(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<(StatusCode, Json<UserResponse>)> {
    let (record, created) = state
        .db
        .call(move |db| db.create_user_if_absent(&identity.uid, identity.email, identity.name))
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(record.into())))
}

pub async fn get_me(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<Json<UserResponse>> {
    let record = state
        .db
        .call(move |db| db.get_user(&identity.uid))
        .await?
        .ok_or(Error::UserNotFound)?;
    Ok(Json(record.into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetAdminBody {
    is_admin: bool,
}

pub async fn set_admin(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<Json<UserResponse>> {
    let body: SetAdminBody = parse_json(&body)?;
    let record = {
        let user_id = user_id.clone();
        state
            .db
            .call(move |db| db.set_admin(&user_id, body.is_admin))
            .await?
            .ok_or(Error::UserNotFound)?
    };
    info!(user_id = %user_id, is_admin = body.is_admin, "Admin flag changed by operator");
    Ok(Json(record.into()))
}
