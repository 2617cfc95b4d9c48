//! Plan transitions driven by verified payment events
//!
//! The handler here is the only writer of `plan` and plan-reset `credits`.
//! Every event is applied at most once, keyed by the provider's event id.

use std::sync::Arc;
use tracing::{info, warn};

use super::types::Plan;
use crate::store::{Database, EventOutcome, StoreError};
use crate::webhook::{InvoiceState, PaymentEvent, SubscriptionState};

/// Change applied to an entitlement record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanTransition {
    /// Paid plan purchased: set plan, reset credits, remember Stripe ids
    Activate {
        plan: Plan,
        customer_id: Option<String>,
        subscription_id: Option<String>,
    },
    /// Subscription moved to another plan
    ChangePlan { plan: Plan },
    /// Subscription ended: back to the free plan and its credits
    Downgrade,
    /// New billing period paid: reset credits for the current plan
    RenewPeriod,
    /// Renewal payment failed
    PaymentFailed,
}

impl PlanTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Activate { .. } => "activate",
            Self::ChangePlan { .. } => "change_plan",
            Self::Downgrade => "downgrade",
            Self::RenewPeriod => "renew_period",
            Self::PaymentFailed => "payment_failed",
        }
    }
}

/// Identifies the user and subscription an event belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionTarget {
    /// `userId` from checkout or subscription metadata
    pub user_id: Option<String>,
    /// Stripe customer, used when metadata is missing
    pub customer_id: Option<String>,
    /// Subscription the event concerns. Lifecycle transitions only apply
    /// when it is the one the record currently holds.
    pub subscription_id: Option<String>,
}

/// Map a payment event to the transition it implies.
///
/// Returns `None` for events that carry no entitlement change.
pub fn transition_for(event: &PaymentEvent) -> Option<(TransitionTarget, PlanTransition)> {
    match event {
        PaymentEvent::CheckoutCompleted(checkout) => {
            let user_id = checkout.metadata.get("userId")?;
            let plan = match checkout.metadata.get("planId")?.parse::<Plan>() {
                Ok(plan) if plan.is_purchasable() => plan,
                Ok(_) | Err(_) => {
                    warn!(session_id = %checkout.session_id, "Checkout completed with an unusable planId");
                    return None;
                }
            };
            Some((
                TransitionTarget {
                    user_id: Some(user_id.clone()),
                    customer_id: checkout.customer_id.clone(),
                    subscription_id: checkout.subscription_id.clone(),
                },
                PlanTransition::Activate {
                    plan,
                    customer_id: checkout.customer_id.clone(),
                    subscription_id: checkout.subscription_id.clone(),
                },
            ))
        }
        PaymentEvent::SubscriptionUpdated(subscription) => {
            let plan = subscription
                .metadata
                .get("planId")
                .and_then(|plan| plan.parse::<Plan>().ok());
            let transition = subscription_transition(&subscription.status, plan)?;
            Some((subscription_target(subscription), transition))
        }
        PaymentEvent::SubscriptionDeleted(subscription) => {
            Some((subscription_target(subscription), PlanTransition::Downgrade))
        }
        PaymentEvent::InvoicePaymentSucceeded(invoice) => {
            Some((invoice_target(invoice), PlanTransition::RenewPeriod))
        }
        PaymentEvent::InvoicePaymentFailed(invoice) => {
            Some((invoice_target(invoice), PlanTransition::PaymentFailed))
        }
        PaymentEvent::Other => None,
    }
}

/// Transition implied by a subscription's status
fn subscription_transition(status: &str, plan: Option<Plan>) -> Option<PlanTransition> {
    match status {
        "active" | "trialing" => plan
            .filter(|plan| plan.is_purchasable())
            .map(|plan| PlanTransition::ChangePlan { plan }),
        "past_due" | "unpaid" => Some(PlanTransition::PaymentFailed),
        "canceled" | "incomplete_expired" => Some(PlanTransition::Downgrade),
        _ => None,
    }
}

fn subscription_target(subscription: &SubscriptionState) -> TransitionTarget {
    TransitionTarget {
        user_id: subscription.metadata.get("userId").cloned(),
        customer_id: subscription.customer_id.clone(),
        subscription_id: Some(subscription.subscription_id.clone()),
    }
}

fn invoice_target(invoice: &InvoiceState) -> TransitionTarget {
    TransitionTarget {
        user_id: None,
        customer_id: invoice.customer_id.clone(),
        subscription_id: invoice.subscription_id.clone(),
    }
}

/// Applies verified payment events to entitlement records
pub struct PlanTransitionHandler {
    db: Arc<Database>,
}

impl PlanTransitionHandler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Apply one event. Safe to call again with the same `event_id`.
    pub async fn handle(
        &self,
        event_id: &str,
        event_type: &str,
        event: &PaymentEvent,
    ) -> Result<EventOutcome, StoreError> {
        let change = transition_for(event);
        let outcome = {
            let (event_id, event_type, change) =
                (event_id.to_string(), event_type.to_string(), change.clone());
            self.db
                .call(move |db| {
                    db.apply_payment_event(
                        &event_id,
                        &event_type,
                        change.as_ref().map(|(target, transition)| (target, transition)),
                    )
                })
                .await?
        };

        match (&outcome, &change) {
            (EventOutcome::Applied { user_id }, Some((_, transition))) => {
                info!(
                    event_id,
                    event_type,
                    user_id = %user_id,
                    transition = transition.name(),
                    "Applied plan transition"
                );
                if *transition == PlanTransition::PaymentFailed {
                    warn!(user_id = %user_id, event_id, "Payment failed, account marked past due");
                }
            }
            (EventOutcome::NotCurrent { user_id }, Some((target, transition))) => {
                info!(
                    event_id,
                    event_type,
                    user_id = %user_id,
                    subscription_id = ?target.subscription_id,
                    transition = transition.name(),
                    "Event is not for the current subscription, nothing changed"
                );
            }
            (EventOutcome::Duplicate, _) => {
                info!(event_id, event_type, "Payment event already processed");
            }
            (EventOutcome::UserNotFound, Some((target, _))) => {
                warn!(
                    event_id,
                    event_type,
                    user_id = ?target.user_id,
                    customer_id = ?target.customer_id,
                    "No user matches payment event"
                );
            }
            _ => {
                tracing::debug!(event_id, event_type, "Payment event carries no plan change");
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::CompletedCheckout;
    use std::collections::HashMap;

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn subscription(status: &str, pairs: &[(&str, &str)]) -> SubscriptionState {
        SubscriptionState {
            subscription_id: "sub_1".to_string(),
            customer_id: Some("cus_1".to_string()),
            status: status.to_string(),
            metadata: metadata(pairs),
        }
    }

    #[test]
    fn test_checkout_completed_activates_plan() {
        let event = PaymentEvent::CheckoutCompleted(CompletedCheckout {
            session_id: "cs_1".to_string(),
            customer_id: Some("cus_1".to_string()),
            subscription_id: Some("sub_1".to_string()),
            metadata: metadata(&[("userId", "uid-1"), ("planId", "pro")]),
        });

        let (target, transition) = transition_for(&event).unwrap();
        assert_eq!(target.user_id.as_deref(), Some("uid-1"));
        assert_eq!(target.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(
            transition,
            PlanTransition::Activate {
                plan: Plan::Pro,
                customer_id: Some("cus_1".to_string()),
                subscription_id: Some("sub_1".to_string()),
            }
        );
    }

    #[test]
    fn test_checkout_for_free_plan_is_ignored() {
        let event = PaymentEvent::CheckoutCompleted(CompletedCheckout {
            session_id: "cs_1".to_string(),
            metadata: metadata(&[("userId", "uid-1"), ("planId", "free")]),
            ..Default::default()
        });
        assert!(transition_for(&event).is_none());
    }

    #[test]
    fn test_subscription_status_mapping() {
        let cases = [
            ("active", PlanTransition::ChangePlan { plan: Plan::Business }),
            ("past_due", PlanTransition::PaymentFailed),
            ("unpaid", PlanTransition::PaymentFailed),
            ("canceled", PlanTransition::Downgrade),
            ("incomplete_expired", PlanTransition::Downgrade),
        ];
        for (status, expected) in cases {
            let event = PaymentEvent::SubscriptionUpdated(subscription(
                status,
                &[("userId", "uid-1"), ("planId", "business")],
            ));
            let (_, transition) = transition_for(&event).unwrap();
            assert_eq!(transition, expected, "status {}", status);
        }

        let incomplete = PaymentEvent::SubscriptionUpdated(subscription("incomplete", &[]));
        assert!(transition_for(&incomplete).is_none());
    }

    #[test]
    fn test_subscription_deleted_targets_its_subscription() {
        let event = PaymentEvent::SubscriptionDeleted(subscription("canceled", &[]));
        let (target, transition) = transition_for(&event).unwrap();
        assert_eq!(transition, PlanTransition::Downgrade);
        assert_eq!(target.user_id, None);
        assert_eq!(target.customer_id.as_deref(), Some("cus_1"));
        assert_eq!(target.subscription_id.as_deref(), Some("sub_1"));
    }

    #[test]
    fn test_invoice_targets_customer_and_subscription() {
        let event = PaymentEvent::InvoicePaymentFailed(InvoiceState {
            customer_id: Some("cus_1".to_string()),
            subscription_id: Some("sub_1".to_string()),
        });
        let (target, transition) = transition_for(&event).unwrap();
        assert_eq!(transition, PlanTransition::PaymentFailed);
        assert_eq!(
            target,
            TransitionTarget {
                user_id: None,
                customer_id: Some("cus_1".to_string()),
                subscription_id: Some("sub_1".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_handler_skips_events_for_replaced_subscription() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.create_user_if_absent("uid-1", None, None).unwrap();
        let handler = PlanTransitionHandler::new(db.clone());

        let checkout = |subscription_id: &str, plan: &str| {
            PaymentEvent::CheckoutCompleted(CompletedCheckout {
                session_id: "cs_1".to_string(),
                customer_id: Some("cus_1".to_string()),
                subscription_id: Some(subscription_id.to_string()),
                metadata: metadata(&[("userId", "uid-1"), ("planId", plan)]),
            })
        };
        handler
            .handle("evt_1", "checkout.session.completed", &checkout("sub_A", "pro"))
            .await
            .unwrap();
        handler
            .handle("evt_2", "checkout.session.completed", &checkout("sub_B", "business"))
            .await
            .unwrap();

        let mut old = subscription("canceled", &[]);
        old.subscription_id = "sub_A".to_string();
        let outcome = handler
            .handle("evt_3", "customer.subscription.deleted", &PaymentEvent::SubscriptionDeleted(old))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            EventOutcome::NotCurrent {
                user_id: "uid-1".to_string()
            }
        );

        let record = db.get_user("uid-1").unwrap().unwrap();
        assert_eq!(record.plan, Plan::Business);
        assert_eq!(record.stripe_subscription_id.as_deref(), Some("sub_B"));
    }
}
