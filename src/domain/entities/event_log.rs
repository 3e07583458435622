use chrono::{DateTime, Utc};
use serde::Serialize;

use super::subscription_event::WebhookEnvelope;

/// Audit row written for every webhook call, keyed by event id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEventLogEntry {
    pub event_id: String,
    pub event_type: String,
    pub app_user_id: String,
    pub original_app_user_id: String,
    /// Canonical product id (the new product for plan changes).
    pub product_id: String,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub price: f64,
    pub currency: String,
    pub price_in_purchased_currency: f64,
    pub takehome_percentage: f64,
    pub purchased_at_ms: i64,
    pub expiration_at_ms: i64,
    pub store: String,
    pub environment: String,
    pub payload: serde_json::Value,
}

impl NewEventLogEntry {
    pub fn from_envelope(envelope: &WebhookEnvelope, product_id: &str) -> Self {
        let event = &envelope.event;
        Self {
            event_id: envelope.resolve_event_id().to_string(),
            event_type: event.event_type.clone(),
            app_user_id: event.app_user_id.clone(),
            original_app_user_id: event.original_app_user_id.clone(),
            product_id: product_id.to_string(),
            transaction_id: event.transaction_id.clone(),
            original_transaction_id: event.original_transaction_id.clone(),
            price: event.price,
            currency: event.currency.clone(),
            price_in_purchased_currency: event.price_in_purchased_currency,
            takehome_percentage: event.takehome_percentage,
            purchased_at_ms: event.purchased_at,
            expiration_at_ms: event.expiration_at,
            store: event.store.clone(),
            environment: event.environment.clone(),
            payload: envelope.raw_event.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLogEntry {
    pub entry: NewEventLogEntry,
    pub received_at: DateTime<Utc>,
}
