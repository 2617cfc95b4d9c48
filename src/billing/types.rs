//! Billing data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::str::FromStr;

/// Credits granted to every new account
pub const SIGNUP_CREDITS: u32 = 5;

/// Subscription plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Business,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Free, Plan::Pro, Plan::Business];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Business => "business",
        }
    }

    /// Quota row for this plan.
    ///
    /// This table is the single source of truth for generation gating: a
    /// plan is metered only if its row says so, never because it is "free".
    pub fn quota(&self) -> PlanQuota {
        match self {
            Self::Free => PlanQuota {
                monthly_credits: SIGNUP_CREDITS,
                gate: Gate::Metered,
            },
            // Advertised as 100 a month, not metered at the gate
            Self::Pro => PlanQuota {
                monthly_credits: 100,
                gate: Gate::Unlimited,
            },
            Self::Business => PlanQuota {
                monthly_credits: 0,
                gate: Gate::Unlimited,
            },
        }
    }

    /// Whether this plan can be bought through checkout
    pub fn is_purchasable(&self) -> bool {
        self.price_cents(BillingInterval::Monthly).is_some()
    }

    /// Price in USD cents for a billing interval
    pub fn price_cents(&self, interval: BillingInterval) -> Option<u32> {
        match (self, interval) {
            (Self::Free, _) => None,
            (Self::Pro, BillingInterval::Monthly) => Some(1200),
            (Self::Pro, BillingInterval::Yearly) => Some(9900),
            (Self::Business, BillingInterval::Monthly) => Some(4900),
            (Self::Business, BillingInterval::Yearly) => Some(39900),
        }
    }

    /// Product name shown on the checkout page
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Pro => "Pro",
            Self::Business => "Business",
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan: {0}")]
pub struct UnknownPlan(pub String);

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "business" => Ok(Self::Business),
            other => Err(UnknownPlan(other.to_string())),
        }
    }
}

/// How the generation gate treats a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    /// Each generation needs and consumes one credit
    Metered,
    /// No credit check, no debit
    Unlimited,
}

/// Per-plan numeric quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanQuota {
    /// Credits restored on every plan reset
    pub monthly_credits: u32,
    pub gate: Gate,
}

/// Billing interval for checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn from_yearly(is_yearly: bool) -> Self {
        if is_yearly {
            Self::Yearly
        } else {
            Self::Monthly
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

/// Payment standing of an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    #[default]
    Active,
    PastDue,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown billing status: {0}")]
pub struct UnknownBillingStatus(pub String);

impl FromStr for BillingStatus {
    type Err = UnknownBillingStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            other => Err(UnknownBillingStatus(other.to_string())),
        }
    }
}

/// Per-user plan, credit and admin state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementRecord {
    #[serde(rename = "id")]
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub plan: Plan,
    pub credits: u32,
    pub total_generations: u64,
    pub is_admin: bool,
    pub billing_status: BillingStatus,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntitlementRecord {
    /// Record for a freshly signed up user
    pub fn signup(user_id: &str, email: Option<String>, name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            email,
            name,
            plan: Plan::Free,
            credits: SIGNUP_CREDITS,
            total_generations: 0,
            is_admin: false,
            billing_status: BillingStatus::Active,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Operation the evaluator is asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GeneratePoster,
}

/// What a successful generation costs the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debit {
    /// Consume one credit and bump the generation counter
    Credit,
    /// Only bump the generation counter
    CounterOnly,
}

/// Result of an entitlement check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed { debit: Debit },
    Denied { reason: DenialReason },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn denial_reason(&self) -> Option<&DenialReason> {
        match self {
            Self::Denied { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Reason for denying a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    InsufficientCredits { plan: Plan },
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientCredits { plan } => write!(
                f,
                "You have used all credits on the {} plan. Upgrade your plan to keep generating posters.",
                plan.display_name()
            ),
        }
    }
}

/// Credits left after a generation, as reported to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditsRemaining {
    Count(u32),
    Unlimited,
}

impl Serialize for CreditsRemaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Count(count) => serializer.serialize_u32(*count),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl std::fmt::Display for CreditsRemaining {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{}", count),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}
