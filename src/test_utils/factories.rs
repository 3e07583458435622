//! Test data factories for creating valid test fixtures.
//!
//! Each factory function creates a complete, valid object with sensible defaults.
//! Use the closure parameter to override specific fields as needed.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::entities::{
    entitlement::{EntitlementRecord, PlanType},
    event_log::NewEventLogEntry,
    subscription_event::{SubscriptionEvent, WebhookEnvelope},
};

/// Epoch milliseconds `days` from now (negative for the past).
pub fn days_from_now_ms(days: i64) -> i64 {
    (Utc::now() + Duration::days(days)).timestamp_millis()
}

pub fn test_datetime() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

/// An `INITIAL_PURCHASE` of `pro_1m` by `u1` on transaction `t1`, expiring in 30
/// days, with a fresh event id.
pub fn create_test_envelope(overrides: impl FnOnce(&mut WebhookEnvelope)) -> WebhookEnvelope {
    let event = SubscriptionEvent {
        id: None,
        event_type: "INITIAL_PURCHASE".to_string(),
        app_user_id: "u1".to_string(),
        original_app_user_id: "u1".to_string(),
        product_id: "pro_1m".to_string(),
        transaction_id: "t1".to_string(),
        original_transaction_id: "t1".to_string(),
        purchased_at: Utc::now().timestamp_millis(),
        expiration_at: days_from_now_ms(30),
        price: 9.99,
        currency: "USD".to_string(),
        price_in_purchased_currency: 9.99,
        takehome_percentage: 0.7,
        store: "APP_STORE".to_string(),
        environment: "SANDBOX".to_string(),
        ..Default::default()
    };
    let mut envelope = WebhookEnvelope::new(Some(format!("evt_{}", Uuid::new_v4())), event);
    overrides(&mut envelope);
    envelope.raw_event = serde_json::to_value(&envelope.event).unwrap();
    envelope
}

/// A `pro_1m` record activated at a fixed time, expiring 30 days from now.
pub fn create_test_record(
    transaction_id: &str,
    overrides: impl FnOnce(&mut EntitlementRecord),
) -> EntitlementRecord {
    let mut record = EntitlementRecord {
        transaction_id: transaction_id.to_string(),
        plan_type: PlanType::from_product_id("pro_1m"),
        activated_at: test_datetime(),
        expires_at: Some(Utc::now() + Duration::days(30)),
    };
    overrides(&mut record);
    record
}

pub fn create_test_log_entry(event_id: &str) -> NewEventLogEntry {
    let envelope = create_test_envelope(|e| e.id = Some(event_id.to_string()));
    NewEventLogEntry::from_envelope(&envelope, &envelope.event.product_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_defaults_are_valid() {
        let envelope = create_test_envelope(|_| {});
        assert!(envelope.has_event_id());
        assert_eq!(envelope.event.transaction_id, "t1");
        assert!(envelope.event.expiration_at > Utc::now().timestamp_millis());
        assert_eq!(envelope.raw_event["transaction_id"], "t1");
    }

    #[test]
    fn envelope_overrides_reach_raw_payload() {
        let envelope = create_test_envelope(|e| e.event.app_user_id = "u9".into());
        assert_eq!(envelope.raw_event["app_user_id"], "u9");
    }
}
