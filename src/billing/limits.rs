//! Entitlement evaluation for generation requests
//!
//! Pure checks over an `EntitlementRecord` snapshot. Nothing here touches
//! storage; the store re-runs the same policy inside the debit transaction.

use super::types::{
    CreditsRemaining, Debit, Decision, DenialReason, EntitlementRecord, Gate, Operation,
};

/// Where the client should send users who ran out of credits
pub const UPGRADE_URL: &str = "/pricing";

/// Decide whether `record` may perform `op`.
///
/// Policy, in order: admins always pass without a debit, plans whose quota
/// gate is unlimited pass without a debit, metered plans pass with a debit
/// only while credits remain.
pub fn evaluate(record: &EntitlementRecord, op: Operation) -> Decision {
    match op {
        Operation::GeneratePoster => {
            if record.is_admin {
                return Decision::Allowed {
                    debit: Debit::CounterOnly,
                };
            }

            match record.plan.quota().gate {
                Gate::Unlimited => Decision::Allowed {
                    debit: Debit::CounterOnly,
                },
                Gate::Metered if record.credits > 0 => Decision::Allowed {
                    debit: Debit::Credit,
                },
                Gate::Metered => Decision::Denied {
                    reason: DenialReason::InsufficientCredits { plan: record.plan },
                },
            }
        }
    }
}

/// Credits indicator returned to the client
pub fn credits_remaining(record: &EntitlementRecord) -> CreditsRemaining {
    if record.is_admin || record.plan.quota().gate == Gate::Unlimited {
        CreditsRemaining::Unlimited
    } else {
        CreditsRemaining::Count(record.credits)
    }
}
