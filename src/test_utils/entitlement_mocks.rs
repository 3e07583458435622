//! In-memory implementation of the entitlement store port.
//!
//! Transactions work on a copy of the state and hold the store lock until they
//! commit or drop, which gives the same all-or-nothing and serialisation
//! behaviour the Postgres adapter gets from row locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::entitlement_store::{EntitlementStore, EntitlementTx},
    domain::entities::{
        entitlement::{EntitlementRecord, EntitlementStatus, PlanType, later_expiry},
        event_log::{EventLogEntry, NewEventLogEntry},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccountRow {
    pub id: Uuid,
    pub entitlement_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub users: BTreeMap<String, UserAccountRow>,
    pub entitlements: HashMap<String, EntitlementRecord>,
    pub event_log: HashMap<String, EventLogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InjectedFailure {
    Database,
    Conflict,
}

type FailurePoints = Arc<Mutex<HashMap<&'static str, InjectedFailure>>>;

fn check_failure(failures: &FailurePoints, point: &'static str) -> AppResult<()> {
    match failures.lock().unwrap().get(point) {
        Some(InjectedFailure::Database) => {
            Err(AppError::Database(format!("injected failure at {point}")))
        }
        Some(InjectedFailure::Conflict) => {
            Err(AppError::Conflict(format!("injected conflict at {point}")))
        }
        None => Ok(()),
    }
}

// ============================================================================
// InMemoryEntitlementStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryEntitlementStore {
    state: Arc<AsyncMutex<StoreState>>,
    failures: FailurePoints,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(app_user_ids: &[&str]) -> Self {
        let users = app_user_ids
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    UserAccountRow {
                        id: Uuid::new_v4(),
                        entitlement_ref: None,
                    },
                )
            })
            .collect();
        Self {
            state: Arc::new(AsyncMutex::new(StoreState {
                users,
                ..Default::default()
            })),
            failures: FailurePoints::default(),
        }
    }

    /// Insert a record and optionally point an existing user at it.
    pub async fn seed_entitlement(&self, holder: Option<&str>, record: EntitlementRecord) {
        let mut state = self.state.lock().await;
        if let Some(holder) = holder {
            if let Some(user) = state.users.get_mut(holder) {
                user.entitlement_ref = Some(record.transaction_id.clone());
            }
        }
        state
            .entitlements
            .insert(record.transaction_id.clone(), record);
    }

    /// Make every call to the named port method fail until cleared.
    pub fn fail_on(&self, point: &'static str) {
        self.failures
            .lock()
            .unwrap()
            .insert(point, InjectedFailure::Database);
    }

    /// Like [`Self::fail_on`], but the call loses a lock race instead.
    pub fn conflict_on(&self, point: &'static str) {
        self.failures
            .lock()
            .unwrap()
            .insert(point, InjectedFailure::Conflict);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub async fn snapshot(&self) -> StoreState {
        self.state.lock().await.clone()
    }

    pub async fn user_ref(&self, app_user_id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .users
            .get(app_user_id)
            .and_then(|u| u.entitlement_ref.clone())
    }

    pub async fn account_id(&self, app_user_id: &str) -> Option<Uuid> {
        self.state.lock().await.users.get(app_user_id).map(|u| u.id)
    }

    /// Users referencing the transaction, sorted.
    pub async fn holders_of(&self, transaction_id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .users
            .iter()
            .filter(|(_, u)| u.entitlement_ref.as_deref() == Some(transaction_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }

    pub async fn event_log_len(&self) -> usize {
        self.state.lock().await.event_log.len()
    }
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn begin(&self) -> AppResult<Box<dyn EntitlementTx>> {
        check_failure(&self.failures, "begin")?;
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryEntitlementTx {
            guard,
            working,
            failures: self.failures.clone(),
        }))
    }

    async fn get_entitlement(&self, transaction_id: &str) -> AppResult<Option<EntitlementRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .entitlements
            .get(transaction_id)
            .cloned())
    }

    async fn get_user_entitlement(
        &self,
        app_user_id: &str,
    ) -> AppResult<Option<EntitlementStatus>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .get(app_user_id)
            .and_then(|u| u.entitlement_ref.as_ref())
            .and_then(|transaction_id| state.entitlements.get(transaction_id))
            .map(|record| EntitlementStatus {
                app_user_id: app_user_id.to_string(),
                entitlement: record.clone(),
            }))
    }

    async fn get_event_log_entry(&self, event_id: &str) -> AppResult<Option<EventLogEntry>> {
        Ok(self.state.lock().await.event_log.get(event_id).cloned())
    }
}

// ============================================================================
// InMemoryEntitlementTx
// ============================================================================

pub struct InMemoryEntitlementTx {
    guard: OwnedMutexGuard<StoreState>,
    working: StoreState,
    failures: FailurePoints,
}

#[async_trait]
impl EntitlementTx for InMemoryEntitlementTx {
    async fn record_event(&mut self, entry: &NewEventLogEntry) -> AppResult<bool> {
        check_failure(&self.failures, "record_event")?;
        if self.working.event_log.contains_key(&entry.event_id) {
            return Ok(false);
        }
        self.working.event_log.insert(
            entry.event_id.clone(),
            EventLogEntry {
                entry: entry.clone(),
                received_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn insert_entitlement_if_absent(&mut self, record: &EntitlementRecord) -> AppResult<()> {
        check_failure(&self.failures, "insert_entitlement_if_absent")?;
        self.working
            .entitlements
            .entry(record.transaction_id.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn extend_entitlement(
        &mut self,
        transaction_id: &str,
        plan_type: &PlanType,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<bool> {
        check_failure(&self.failures, "extend_entitlement")?;
        let Some(record) = self.working.entitlements.get_mut(transaction_id) else {
            return Ok(false);
        };
        record.plan_type = plan_type.clone();
        record.expires_at = later_expiry(record.expires_at, expires_at);
        Ok(true)
    }

    async fn find_other_valid_expiry(
        &mut self,
        app_user_id: &str,
        excluding_transaction_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<DateTime<Utc>>> {
        check_failure(&self.failures, "find_other_valid_expiry")?;
        Ok(self
            .working
            .users
            .get(app_user_id)
            .and_then(|u| u.entitlement_ref.as_deref())
            .filter(|transaction_id| *transaction_id != excluding_transaction_id)
            .and_then(|transaction_id| self.working.entitlements.get(transaction_id))
            .and_then(|record| record.expires_at)
            .filter(|expires_at| *expires_at > now))
    }

    async fn clear_entitlement_refs(&mut self, transaction_id: &str) -> AppResult<u64> {
        check_failure(&self.failures, "clear_entitlement_refs")?;
        let mut cleared = 0;
        for user in self.working.users.values_mut() {
            if user.entitlement_ref.as_deref() == Some(transaction_id) {
                user.entitlement_ref = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn set_entitlement_ref(
        &mut self,
        app_user_id: &str,
        transaction_id: &str,
    ) -> AppResult<bool> {
        check_failure(&self.failures, "set_entitlement_ref")?;
        match self.working.users.get_mut(app_user_id) {
            Some(user) => {
                user.entitlement_ref = Some(transaction_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn take_entitlement_ref(&mut self, app_user_id: &str) -> AppResult<Option<String>> {
        check_failure(&self.failures, "take_entitlement_ref")?;
        Ok(self
            .working
            .users
            .get_mut(app_user_id)
            .and_then(|u| u.entitlement_ref.take()))
    }

    async fn user_exists(&mut self, app_user_id: &str) -> AppResult<bool> {
        check_failure(&self.failures, "user_exists")?;
        Ok(self.working.users.contains_key(app_user_id))
    }

    async fn rename_user(&mut self, from: &str, to: &str) -> AppResult<bool> {
        check_failure(&self.failures, "rename_user")?;
        if self.working.users.contains_key(to) {
            return Err(AppError::Conflict(format!("account {to} already exists")));
        }
        match self.working.users.remove(from) {
            Some(user) => {
                self.working.users.insert(to.to_string(), user);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        check_failure(&self.failures, "commit")?;
        let InMemoryEntitlementTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_record;

    #[tokio::test]
    async fn dropped_transaction_leaves_state_untouched() {
        let store = InMemoryEntitlementStore::with_users(&["u1"]);
        let before = store.snapshot().await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_entitlement_if_absent(&create_test_record("t1", |_| {}))
                .await
                .unwrap();
            tx.set_entitlement_ref("u1", "t1").await.unwrap();
        }

        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = InMemoryEntitlementStore::with_users(&["u1"]);

        let mut tx = store.begin().await.unwrap();
        tx.insert_entitlement_if_absent(&create_test_record("t1", |_| {}))
            .await
            .unwrap();
        assert!(tx.set_entitlement_ref("u1", "t1").await.unwrap());
        assert!(!tx.set_entitlement_ref("nobody", "t1").await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.user_ref("u1").await, Some("t1".to_string()));
    }

    #[tokio::test]
    async fn record_event_is_conflict_tolerant() {
        let store = InMemoryEntitlementStore::new();
        let entry = crate::test_utils::create_test_log_entry("evt_1");

        let mut tx = store.begin().await.unwrap();
        assert!(tx.record_event(&entry).await.unwrap());
        assert!(!tx.record_event(&entry).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.event_log_len().await, 1);
    }
}
