use async_trait::async_trait;
use std::sync::Arc;
use stripe::{
    CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval,
    CreateCheckoutSessionSubscriptionData, Currency, Metadata,
};

use super::{CheckoutSession, CreateCheckoutSessionParams, StripeClient, StripeError};
use crate::billing::BillingInterval;

pub struct RealStripeClient {
    client: Arc<stripe::Client>,
}

impl RealStripeClient {
    pub fn new(secret_key: String) -> Self {
        Self {
            client: Arc::new(stripe::Client::new(secret_key)),
        }
    }
}

impl From<BillingInterval> for CreateCheckoutSessionLineItemsPriceDataRecurringInterval {
    fn from(value: BillingInterval) -> Self {
        match value {
            BillingInterval::Monthly => Self::Month,
            BillingInterval::Yearly => Self::Year,
        }
    }
}

/// Session parameters for a subscription checkout.
///
/// `userId`, `planId` and `billing` go into both session and subscription
/// metadata so later subscription events can be attributed.
pub fn checkout_session_params(params: &CreateCheckoutSessionParams) -> CreateCheckoutSession<'_> {
    let metadata: Metadata = [
        ("userId", params.user_id.as_str()),
        ("planId", params.plan.as_str()),
        ("billing", params.interval.as_str()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect();

    let interval_name = match params.interval {
        BillingInterval::Monthly => "Monthly",
        BillingInterval::Yearly => "Yearly",
    };

    let mut session = CreateCheckoutSession::new();
    session.mode = Some(CheckoutSessionMode::Subscription);
    session.success_url = Some(&params.success_url);
    session.cancel_url = Some(&params.cancel_url);
    session.client_reference_id = Some(&params.user_id);
    session.customer_email = params.email.as_deref();
    session.metadata = Some(metadata.clone());
    session.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
        metadata: Some(metadata),
        ..Default::default()
    });
    session.line_items = Some(vec![CreateCheckoutSessionLineItems {
        quantity: Some(1),
        price_data: Some(CreateCheckoutSessionLineItemsPriceData {
            currency: Currency::USD,
            unit_amount: Some(i64::from(
                params.plan.price_cents(params.interval).unwrap_or_default(),
            )),
            recurring: Some(CreateCheckoutSessionLineItemsPriceDataRecurring {
                interval: params.interval.into(),
                interval_count: None,
            }),
            product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                name: format!("PosterGen {} Plan", params.plan.display_name()),
                description: Some(format!(
                    "{} subscription to PosterGen {} features",
                    interval_name,
                    params.plan.as_str()
                )),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }]);
    session
}

#[async_trait]
impl StripeClient for RealStripeClient {
    async fn create_checkout_session(
        &self,
        params: &CreateCheckoutSessionParams,
    ) -> Result<CheckoutSession, StripeError> {
        let session =
            stripe::CheckoutSession::create(&self.client, checkout_session_params(params)).await?;
        let url = session.url.ok_or(StripeError::MissingUrl)?;
        Ok(CheckoutSession {
            id: session.id.as_str().to_string(),
            url,
        })
    }
}
