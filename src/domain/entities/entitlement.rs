use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Premium plan identifier: the platform product id with any offer variant
/// (`product:variant`) stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct PlanType(String);

impl PlanType {
    pub fn from_product_id(product_id: &str) -> Self {
        let base = product_id
            .split_once(':')
            .map(|(base, _)| base)
            .unwrap_or(product_id);
        PlanType(base.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Premium record keyed by the platform transaction id. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EntitlementRecord {
    pub transaction_id: String,
    pub plan_type: PlanType,
    pub activated_at: DateTime<Utc>,
    /// `None` means the entitlement never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl EntitlementRecord {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// What a user currently holds, as seen by downstream access checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementStatus {
    pub app_user_id: String,
    pub entitlement: EntitlementRecord,
}

impl EntitlementStatus {
    /// Cancellation and expiration notices still point the user at their
    /// transaction; the past expiry is what revokes access.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.entitlement.is_active_at(now)
    }
}

/// Later of two expiries where `None` is "never expires".
pub fn later_expiry(
    current: Option<DateTime<Utc>>,
    candidate: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, candidate) {
        (None, _) => None,
        (Some(current), None) => Some(current),
        (Some(current), Some(candidate)) => Some(current.max(candidate)),
    }
}
