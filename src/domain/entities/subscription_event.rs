//! Inbound subscription platform webhook payloads.
//!
//! The platform posts `{ "id": ..., "event": { ... } }`. Every field inside `event`
//! is optional on the wire; missing values and explicit `null`s decode to empty
//! strings, zero and empty lists so classification never fails on shape alone.

use serde::{Deserialize, Deserializer, Serialize};

/// Event id used when neither the envelope nor the nested event carries one.
///
/// Every id-less event lands on this single key in the event log, so only the first
/// of them is ever recorded as new there. This mirrors how the platform integration
/// has always behaved and is almost certainly unintended.
pub const FALLBACK_EVENT_ID: &str = "tt";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Subscription lifecycle tag as sent by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    InitialPurchase,
    Renewal,
    Cancellation,
    Expiration,
    NonRenewingPurchase,
    ProductChange,
    Transfer,
    Other(String),
}

impl EventType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "INITIAL_PURCHASE" => EventType::InitialPurchase,
            "RENEWAL" => EventType::Renewal,
            "CANCELLATION" => EventType::Cancellation,
            "EXPIRATION" => EventType::Expiration,
            "NON_RENEWING_PURCHASE" => EventType::NonRenewingPurchase,
            "PRODUCT_CHANGE" => EventType::ProductChange,
            "TRANSFER" => EventType::Transfer,
            other => EventType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::InitialPurchase => "INITIAL_PURCHASE",
            EventType::Renewal => "RENEWAL",
            EventType::Cancellation => "CANCELLATION",
            EventType::Expiration => "EXPIRATION",
            EventType::NonRenewingPurchase => "NON_RENEWING_PURCHASE",
            EventType::ProductChange => "PRODUCT_CHANGE",
            EventType::Transfer => "TRANSFER",
            EventType::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The nested `event` object of a webhook call. Immutable once decoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionEvent {
    #[serde(deserialize_with = "null_as_default")]
    pub id: Option<String>,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub event_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub app_user_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub original_app_user_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub product_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub new_product_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub transaction_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub original_transaction_id: String,
    #[serde(rename = "purchased_at_ms", deserialize_with = "null_as_default")]
    pub purchased_at: i64,
    /// Zero means the purchase never expires.
    #[serde(rename = "expiration_at_ms", deserialize_with = "null_as_default")]
    pub expiration_at: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub transferred_from: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub transferred_to: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub price: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub currency: String,
    #[serde(deserialize_with = "null_as_default")]
    pub price_in_purchased_currency: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub takehome_percentage: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub store: String,
    #[serde(deserialize_with = "null_as_default")]
    pub environment: String,
}

impl SubscriptionEvent {
    pub fn kind(&self) -> EventType {
        EventType::from_tag(&self.event_type)
    }
}

/// A full webhook call: optional top-level id plus the nested event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: Option<String>,
    pub event: SubscriptionEvent,
    /// The nested event exactly as received, unknown fields included. Kept for audit.
    #[serde(skip)]
    pub raw_event: serde_json::Value,
}

impl WebhookEnvelope {
    /// Decode a webhook body. Fails only when the body is not JSON or has no
    /// `event` object.
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let raw_event = value
            .get("event")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let mut envelope: WebhookEnvelope = serde_json::from_value(value)?;
        envelope.raw_event = raw_event;
        Ok(envelope)
    }

    pub fn new(id: Option<String>, event: SubscriptionEvent) -> Self {
        let raw_event = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
        Self {
            id,
            event,
            raw_event,
        }
    }

    /// Top-level id, then the nested event's id, then [`FALLBACK_EVENT_ID`].
    /// Blank ids count as absent.
    pub fn resolve_event_id(&self) -> &str {
        fn present(id: &Option<String>) -> Option<&str> {
            id.as_deref().filter(|s| !s.trim().is_empty())
        }
        present(&self.id)
            .or_else(|| present(&self.event.id))
            .unwrap_or(FALLBACK_EVENT_ID)
    }

    pub fn has_event_id(&self) -> bool {
        self.resolve_event_id() != FALLBACK_EVENT_ID
    }
}
