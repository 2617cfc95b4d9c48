use axum::{body::Bytes, extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use super::{parse_json, AuthenticatedUser};
use crate::billing::{BillingInterval, Plan};
use crate::stripe_client::CreateCheckoutSessionParams;
use crate::{AppState, Error, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CheckoutBody {
    plan_id: String,
    is_yearly: bool,
    user_id: Option<String>,
    email: Option<String>,
}

pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(identity): AuthenticatedUser,
    body: Bytes,
) -> Result<Json<Value>> {
    let body: CheckoutBody = parse_json(&body)?;

    let plan = body
        .plan_id
        .parse::<Plan>()
        .ok()
        .filter(|plan| plan.is_purchasable())
        .ok_or_else(|| Error::invalid("Invalid plan"))?;

    if body.user_id.as_deref().is_some_and(|id| id != identity.uid) {
        return Err(Error::invalid("userId does not match the signed in user"));
    }

    let stripe = state.stripe.as_ref().ok_or_else(|| {
        error!("Checkout requested but STRIPE_SECRET_KEY is not set");
        Error::Internal("payments are not configured".to_string())
    })?;

    let public_url = state.config.public_url();
    let params = CreateCheckoutSessionParams {
        plan,
        interval: BillingInterval::from_yearly(body.is_yearly),
        user_id: identity.uid.clone(),
        email: body.email.or(identity.email),
        success_url: format!(
            "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}",
            public_url
        ),
        cancel_url: format!("{}/pricing", public_url),
    };

    let session = stripe.create_checkout_session(&params).await.map_err(|e| {
        error!(user_id = %identity.uid, plan = %plan, error = %e, "Checkout session failed");
        Error::PaymentProvider(e)
    })?;

    info!(
        user_id = %identity.uid,
        plan = %plan,
        interval = params.interval.as_str(),
        session_id = %session.id,
        "Created checkout session"
    );
    Ok(Json(json!({ "url": session.url, "sessionId": session.id })))
}
