//! Idempotent application of payment events

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::users::{query_user, query_user_by_customer};
use super::{now_millis, Database, StoreError};
use crate::billing::{BillingStatus, EntitlementRecord, Plan, PlanTransition, TransitionTarget};

/// What happened to a payment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Transition written for this user
    Applied { user_id: String },
    /// Event id seen before; nothing written
    Duplicate,
    /// Event carries no plan change
    Ignored,
    /// Event concerns a subscription the user does not currently hold;
    /// recorded, nothing changed
    NotCurrent { user_id: String },
    /// No user matches the event; recorded so it is not retried
    UserNotFound,
}

fn resolve_user(
    conn: &Connection,
    target: &TransitionTarget,
) -> Result<Option<EntitlementRecord>, StoreError> {
    if let Some(user_id) = target.user_id.as_deref() {
        if let Some(record) = query_user(conn, user_id)? {
            return Ok(Some(record));
        }
    }
    match target.customer_id.as_deref() {
        Some(customer_id) => query_user_by_customer(conn, customer_id),
        None => Ok(None),
    }
}

/// Whether `target` names the subscription `record` currently holds.
///
/// A user who has moved to a new subscription, or who has none, is not
/// affected by lifecycle events of another one.
fn is_current_subscription(record: &EntitlementRecord, target: &TransitionTarget) -> bool {
    match (&record.stripe_subscription_id, &target.subscription_id) {
        (Some(current), Some(event)) => current == event,
        _ => false,
    }
}

/// Write `transition` to `record`. Returns `false` when the event does not
/// apply to the record's current subscription.
fn apply_transition(
    conn: &Connection,
    record: &EntitlementRecord,
    target: &TransitionTarget,
    transition: &PlanTransition,
) -> Result<bool, StoreError> {
    if !matches!(transition, PlanTransition::Activate { .. })
        && !is_current_subscription(record, target)
    {
        return Ok(false);
    }

    let now = now_millis();
    match transition {
        PlanTransition::Activate {
            plan,
            customer_id,
            subscription_id,
        } => {
            conn.execute(
                "UPDATE users
                 SET plan = ?2,
                     credits = ?3,
                     billing_status = ?4,
                     stripe_customer_id = COALESCE(?5, stripe_customer_id),
                     stripe_subscription_id = COALESCE(?6, stripe_subscription_id),
                     updated_at = ?7
                 WHERE id = ?1",
                params![
                    record.user_id,
                    plan,
                    plan.quota().monthly_credits,
                    BillingStatus::Active,
                    customer_id,
                    subscription_id,
                    now,
                ],
            )?;
        }
        PlanTransition::ChangePlan { plan } => {
            if *plan == record.plan {
                return Ok(true);
            }
            conn.execute(
                "UPDATE users SET plan = ?2, credits = ?3, billing_status = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    record.user_id,
                    plan,
                    plan.quota().monthly_credits,
                    BillingStatus::Active,
                    now,
                ],
            )?;
        }
        PlanTransition::Downgrade => {
            conn.execute(
                "UPDATE users
                 SET plan = ?2,
                     credits = ?3,
                     billing_status = ?4,
                     stripe_subscription_id = NULL,
                     updated_at = ?5
                 WHERE id = ?1",
                params![
                    record.user_id,
                    Plan::Free,
                    Plan::Free.quota().monthly_credits,
                    BillingStatus::Active,
                    now,
                ],
            )?;
        }
        PlanTransition::RenewPeriod => {
            conn.execute(
                "UPDATE users SET credits = ?2, billing_status = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    record.user_id,
                    record.plan.quota().monthly_credits,
                    BillingStatus::Active,
                    now,
                ],
            )?;
        }
        PlanTransition::PaymentFailed => {
            conn.execute(
                "UPDATE users SET billing_status = ?2, updated_at = ?3 WHERE id = ?1",
                params![record.user_id, BillingStatus::PastDue, now],
            )?;
        }
    }
    Ok(true)
}

impl Database {
    /// Apply `change` for `event_id` exactly once.
    ///
    /// The dedup row and the entitlement update commit together, so a
    /// redelivered event either sees the row and does nothing or finds no
    /// trace of a partial earlier attempt.
    pub fn apply_payment_event(
        &self,
        event_id: &str,
        event_type: &str,
        change: Option<(&TransitionTarget, &PlanTransition)>,
    ) -> Result<EventOutcome, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let seen: Option<String> = tx
            .query_row(
                "SELECT event_id FROM processed_events WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;
        if seen.is_some() {
            return Ok(EventOutcome::Duplicate);
        }

        let outcome = match change {
            None => EventOutcome::Ignored,
            Some((target, transition)) => match resolve_user(&tx, target)? {
                Some(record) => {
                    if apply_transition(&tx, &record, target, transition)? {
                        EventOutcome::Applied {
                            user_id: record.user_id,
                        }
                    } else {
                        EventOutcome::NotCurrent {
                            user_id: record.user_id,
                        }
                    }
                }
                None => EventOutcome::UserNotFound,
            },
        };

        tx.execute(
            "INSERT INTO processed_events (event_id, event_type, processed_at) VALUES (?1, ?2, ?3)",
            params![event_id, event_type, now_millis()],
        )?;
        tx.commit()?;
        Ok(outcome)
    }

    #[cfg(test)]
    pub fn processed_event_count(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM processed_events", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    /// Raw SQL for tests that need the store to misbehave
    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        Ok(self.lock().execute_batch(sql)?)
    }
}
