//! Stripe webhook verification and the payment events the service reacts to

use std::collections::HashMap;
use stripe::{EventObject, EventType, Webhook};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("signature rejected: {0}")]
    Rejected(stripe::WebhookError),

    /// Signature verified, but the event does not parse
    #[error("malformed event payload: {0}")]
    MalformedPayload(stripe::WebhookError),
}

/// A verified delivery
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    /// Wire name, e.g. `checkout.session.completed`
    pub event_type: String,
    pub payment: PaymentEvent,
}

/// Verify `payload` against the signature header and parse it.
///
/// Tolerance and signature scheme are the provider library's.
pub fn construct_event(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
) -> Result<WebhookEvent, WebhookError> {
    let header = header.ok_or(WebhookError::MissingSignature)?;
    let payload = std::str::from_utf8(payload).map_err(|_| WebhookError::NotUtf8)?;
    let event = Webhook::construct_event(payload, header, secret).map_err(|e| match e {
        e @ stripe::WebhookError::BadParse(_) => WebhookError::MalformedPayload(e),
        e => WebhookError::Rejected(e),
    })?;
    Ok(event.into())
}

fn event_type_name(event_type: &EventType) -> String {
    serde_json::to_value(event_type)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", event_type))
}

impl From<stripe::Event> for WebhookEvent {
    fn from(event: stripe::Event) -> Self {
        let id = event.id.as_str().to_string();
        let event_type = event_type_name(&event.type_);

        let payment = match (event.type_, event.data.object) {
            (EventType::CheckoutSessionCompleted, EventObject::CheckoutSession(session)) => {
                PaymentEvent::CheckoutCompleted(session.into())
            }
            (EventType::CustomerSubscriptionUpdated, EventObject::Subscription(subscription)) => {
                PaymentEvent::SubscriptionUpdated(subscription.into())
            }
            (EventType::CustomerSubscriptionDeleted, EventObject::Subscription(subscription)) => {
                PaymentEvent::SubscriptionDeleted(subscription.into())
            }
            (EventType::InvoicePaymentSucceeded, EventObject::Invoice(invoice)) => {
                PaymentEvent::InvoicePaymentSucceeded(invoice.into())
            }
            (EventType::InvoicePaymentFailed, EventObject::Invoice(invoice)) => {
                PaymentEvent::InvoicePaymentFailed(invoice.into())
            }
            _ => PaymentEvent::Other,
        };

        Self {
            id,
            event_type,
            payment,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedCheckout {
    pub session_id: String,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl From<stripe::CheckoutSession> for CompletedCheckout {
    fn from(session: stripe::CheckoutSession) -> Self {
        Self {
            session_id: session.id.as_str().to_string(),
            customer_id: session
                .customer
                .as_ref()
                .map(|customer| customer.id().as_str().to_string()),
            subscription_id: session
                .subscription
                .as_ref()
                .map(|subscription| subscription.id().as_str().to_string()),
            metadata: session.metadata.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionState {
    pub subscription_id: String,
    pub customer_id: Option<String>,
    /// Provider status, e.g. `active` or `past_due`
    pub status: String,
    pub metadata: HashMap<String, String>,
}

impl From<stripe::Subscription> for SubscriptionState {
    fn from(subscription: stripe::Subscription) -> Self {
        Self {
            subscription_id: subscription.id.as_str().to_string(),
            customer_id: Some(subscription.customer.id().as_str().to_string()),
            status: subscription.status.as_str().to_string(),
            metadata: subscription.metadata,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceState {
    pub customer_id: Option<String>,
    /// `None` for one-off invoices
    pub subscription_id: Option<String>,
}

impl From<stripe::Invoice> for InvoiceState {
    fn from(invoice: stripe::Invoice) -> Self {
        Self {
            customer_id: invoice
                .customer
                .as_ref()
                .map(|customer| customer.id().as_str().to_string()),
            subscription_id: invoice
                .subscription
                .as_ref()
                .map(|subscription| subscription.id().as_str().to_string()),
        }
    }
}

/// Webhook events the service reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    CheckoutCompleted(CompletedCheckout),
    SubscriptionUpdated(SubscriptionState),
    SubscriptionDeleted(SubscriptionState),
    InvoicePaymentSucceeded(InvoiceState),
    InvoicePaymentFailed(InvoiceState),
    Other,
}
