//! Event classification: raw platform events to entitlement operations.
//!
//! Classification is pure and total. Anything the business does not act on becomes
//! [`EntitlementOperation::Ignore`]; missing fields stay empty here and are
//! validated by the reconciler.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    entitlement::PlanType,
    subscription_event::{EventType, SubscriptionEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Activate,
    Renew,
    Terminate,
    ChangePlan,
    Transfer,
    Ignore,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Activate => "activate",
            OperationKind::Renew => "renew",
            OperationKind::Terminate => "terminate",
            OperationKind::ChangePlan => "change_plan",
            OperationKind::Transfer => "transfer",
            OperationKind::Ignore => "ignore",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point a user at a transaction, creating the premium record if needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementGrant {
    pub app_user_id: String,
    pub transaction_id: String,
    pub plan_type: PlanType,
    pub purchased_at_ms: i64,
    pub expiration_at_ms: i64,
}

/// Switch an existing transaction to another plan, extending (never shortening) it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanChange {
    pub app_user_id: String,
    pub transaction_id: String,
    pub plan_type: PlanType,
    pub expiration_at_ms: i64,
}

/// Move whatever transaction the source users hold to the destination users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementTransfer {
    pub transferred_from: Vec<String>,
    pub transferred_to: Vec<String>,
    pub plan_type: PlanType,
    pub purchased_at_ms: i64,
    pub expiration_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementOperation {
    Activate(EntitlementGrant),
    Renew(EntitlementGrant),
    Terminate(EntitlementGrant),
    ChangePlan(PlanChange),
    Transfer(EntitlementTransfer),
    Ignore { event_type: String },
}

impl EntitlementOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            EntitlementOperation::Activate(_) => OperationKind::Activate,
            EntitlementOperation::Renew(_) => OperationKind::Renew,
            EntitlementOperation::Terminate(_) => OperationKind::Terminate,
            EntitlementOperation::ChangePlan(_) => OperationKind::ChangePlan,
            EntitlementOperation::Transfer(_) => OperationKind::Transfer,
            EntitlementOperation::Ignore { .. } => OperationKind::Ignore,
        }
    }
}

/// Product the event is about: the new product for plan changes, else `product_id`.
pub fn canonical_product_id(event: &SubscriptionEvent) -> &str {
    match event.kind() {
        EventType::ProductChange => &event.new_product_id,
        _ => &event.product_id,
    }
}

pub fn classify(event: &SubscriptionEvent) -> EntitlementOperation {
    let plan_type = PlanType::from_product_id(canonical_product_id(event));
    let grant = || EntitlementGrant {
        app_user_id: event.app_user_id.clone(),
        transaction_id: event.transaction_id.clone(),
        plan_type: plan_type.clone(),
        purchased_at_ms: event.purchased_at,
        expiration_at_ms: event.expiration_at,
    };

    match event.kind() {
        EventType::InitialPurchase | EventType::NonRenewingPurchase => {
            EntitlementOperation::Activate(grant())
        }
        EventType::Renewal => EntitlementOperation::Renew(grant()),
        EventType::Cancellation | EventType::Expiration => {
            EntitlementOperation::Terminate(grant())
        }
        EventType::ProductChange => EntitlementOperation::ChangePlan(PlanChange {
            app_user_id: event.app_user_id.clone(),
            transaction_id: event.transaction_id.clone(),
            plan_type: plan_type.clone(),
            expiration_at_ms: event.expiration_at,
        }),
        EventType::Transfer => EntitlementOperation::Transfer(EntitlementTransfer {
            transferred_from: event.transferred_from.clone(),
            transferred_to: event.transferred_to.clone(),
            plan_type: plan_type.clone(),
            purchased_at_ms: event.purchased_at,
            expiration_at_ms: event.expiration_at,
        }),
        EventType::Other(event_type) => EntitlementOperation::Ignore { event_type },
    }
}

/// Epoch milliseconds as an instant.
pub fn instant_from_millis(ms: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| format!("timestamp out of range: {ms}"))
}

/// Epoch milliseconds as an expiry; zero or negative means non-expiring.
pub fn expiry_from_millis(ms: i64) -> Result<Option<DateTime<Utc>>, String> {
    if ms <= 0 {
        return Ok(None);
    }
    instant_from_millis(ms).map(Some)
}
