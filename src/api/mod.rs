//! HTTP surface

mod checkout;
mod generate;
mod posters;
mod users;
mod webhooks;

#[cfg(test)]
mod tests;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::auth::{bearer_token, Identity};
use crate::{AppState, Error, Result, VERSION};

pub fn routes(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/users/:id/admin", put(users::set_admin))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            validate_admin_token,
        ));

    let api = Router::new()
        .route("/generate", post(generate::generate_poster))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/checkout", post(checkout::create_checkout))
        .route("/users/me", get(users::get_me).post(users::provision_me))
        .route("/posters", get(posters::list_posters))
        .route(
            "/posters/:id",
            get(posters::get_poster).delete(posters::delete_poster),
        )
        .nest("/admin", admin);

    Router::new()
        .route("/", get(handle_root))
        .nest("/api", api)
        .nest_service("/media", ServeDir::new(&state.config.media_root))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_root() -> String {
    format!("postergen v{}", VERSION)
}

/// Caller identity from a verified bearer token
pub struct AuthenticatedUser(pub Identity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self> {
        let token = bearer_token(&parts.headers)?;
        let identity = state.verifier.verify(token).await?;
        Ok(Self(identity))
    }
}

/// Guard for operator endpoints: `Authorization: token <ADMIN_API_TOKEN>`
async fn validate_admin_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response> {
    let expected = state
        .config
        .admin_api_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or(Error::Unauthenticated)?;

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("token "))
        .ok_or(Error::Unauthenticated)?;

    if token != expected {
        tracing::warn!("Rejected admin request with a wrong token");
        return Err(Error::Unauthenticated);
    }

    Ok(next.run(req).await)
}

/// Parse a JSON body, reporting failures in the service's error shape
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::invalid(format!("Invalid request body: {}", e)))
}
