//! Plans, credits and entitlement policy
//!
//! This module handles:
//! - The plan quota table and entitlement record types
//! - Pure evaluation of whether a user may generate
//! - Plan transitions driven by verified payment events

mod limits;
mod transitions;
mod types;

pub use limits::{credits_remaining, evaluate, UPGRADE_URL};
pub use transitions::{transition_for, PlanTransition, PlanTransitionHandler, TransitionTarget};
#[allow(unused_imports)]
pub use types::{
    BillingInterval, BillingStatus, CreditsRemaining, Debit, Decision, DenialReason,
    EntitlementRecord, Gate, Operation, Plan, PlanQuota, UnknownPlan, SIGNUP_CREDITS,
};
