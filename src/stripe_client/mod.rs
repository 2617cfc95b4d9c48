//! Payment provider client for checkout sessions

#[cfg(test)]
mod fake_stripe_client;
mod real_stripe_client;

use async_trait::async_trait;

#[cfg(test)]
pub use fake_stripe_client::*;
pub use real_stripe_client::*;

use crate::billing::{BillingInterval, Plan};

#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    #[error("stripe returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("stripe request failed: {0}")]
    Request(stripe::StripeError),

    #[error("stripe session has no redirect url")]
    MissingUrl,
}

impl From<stripe::StripeError> for StripeError {
    fn from(error: stripe::StripeError) -> Self {
        match error {
            stripe::StripeError::Stripe(request) => Self::Api {
                status: request.http_status,
                message: request.message.unwrap_or_default(),
            },
            other => Self::Request(other),
        }
    }
}

/// Parameters for a subscription checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCheckoutSessionParams {
    pub plan: Plan,
    pub interval: BillingInterval,
    pub user_id: String,
    pub email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait StripeClient: Send + Sync {
    async fn create_checkout_session(
        &self,
        params: &CreateCheckoutSessionParams,
    ) -> Result<CheckoutSession, StripeError>;
}
