//! Persistence contract for entitlements, user references and the event log.
//!
//! All writes go through an [`EntitlementTx`]. A transaction that is dropped without
//! [`EntitlementTx::commit`] must leave the store untouched, so a failed or cancelled
//! event never half-applies an entitlement move. Lookups report absence as `None`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    app_error::AppResult,
    domain::entities::{
        entitlement::{EntitlementRecord, EntitlementStatus, PlanType},
        event_log::{EventLogEntry, NewEventLogEntry},
    },
};

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Open a unit of work. Rows it writes stay locked until commit or drop.
    async fn begin(&self) -> AppResult<Box<dyn EntitlementTx>>;

    async fn get_entitlement(&self, transaction_id: &str) -> AppResult<Option<EntitlementRecord>>;

    /// The record the user currently references, if any.
    async fn get_user_entitlement(&self, app_user_id: &str)
    -> AppResult<Option<EntitlementStatus>>;

    /// Audit lookup of a logged webhook call, for support tooling and reconciliation
    /// checks run against the store.
    async fn get_event_log_entry(&self, event_id: &str) -> AppResult<Option<EventLogEntry>>;
}

#[async_trait]
pub trait EntitlementTx: Send {
    /// Conflict-tolerant insert into the event log. Returns `false` when the event id
    /// was already present.
    async fn record_event(&mut self, entry: &NewEventLogEntry) -> AppResult<bool>;

    /// Create the record unless one already exists for its transaction id; the first
    /// writer's fields win.
    async fn insert_entitlement_if_absent(&mut self, record: &EntitlementRecord) -> AppResult<()>;

    /// Set the plan type and move `expires_at` forward to `expires_at` when it is
    /// later. A stored `None` (never expires) is kept; a `None` argument leaves the
    /// expiry as is. Returns `false` when no record exists.
    async fn extend_entitlement(
        &mut self,
        transaction_id: &str,
        plan_type: &PlanType,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<bool>;

    /// Expiry of a still-valid record the user references other than
    /// `excluding_transaction_id`.
    async fn find_other_valid_expiry(
        &mut self,
        app_user_id: &str,
        excluding_transaction_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<DateTime<Utc>>>;

    /// Null out every user reference to the transaction. Returns how many were cleared.
    async fn clear_entitlement_refs(&mut self, transaction_id: &str) -> AppResult<u64>;

    /// Point the user at the transaction. Returns `false` when the user does not exist.
    async fn set_entitlement_ref(&mut self, app_user_id: &str, transaction_id: &str)
    -> AppResult<bool>;

    /// Read and clear the user's reference under a row lock.
    async fn take_entitlement_ref(&mut self, app_user_id: &str) -> AppResult<Option<String>>;

    async fn user_exists(&mut self, app_user_id: &str) -> AppResult<bool>;

    /// Repoint an account's identity key. Returns `false` when `from` does not exist.
    async fn rename_user(&mut self, from: &str, to: &str) -> AppResult<bool>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
