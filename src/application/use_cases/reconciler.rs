//! Applies subscription platform events to the entitlement store.
//!
//! Delivery is at-least-once and unordered. Each event is handled inside one store
//! transaction covering the event-log insert and every entitlement write, so a
//! failure anywhere leaves nothing behind and the platform's redelivery starts clean.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use crate::{
    app_error::{AppError, AppResult},
    application::ports::entitlement_store::{EntitlementStore, EntitlementTx},
    domain::entities::{
        entitlement::{EntitlementRecord, EntitlementStatus, PlanType},
        entitlement_operation::{
            EntitlementGrant, EntitlementOperation, EntitlementTransfer, OperationKind,
            PlanChange, canonical_product_id, classify, expiry_from_millis, instant_from_millis,
        },
        event_log::NewEventLogEntry,
        subscription_event::WebhookEnvelope,
    },
};

/// Extension granted when a plan change reports an expiry that already passed and
/// the user holds nothing else that is still valid.
const PLAN_CHANGE_GRACE_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(OperationKind),
    /// Event id already in the log; nothing was written.
    Duplicate,
    /// Event kind the business does not act on; only the log entry was written.
    Ignored,
}

#[derive(Clone)]
pub struct EntitlementReconciler {
    store: Arc<dyn EntitlementStore>,
}

impl EntitlementReconciler {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    #[instrument(
        skip_all,
        fields(event_id = %envelope.resolve_event_id(), event_type = %envelope.event.event_type)
    )]
    pub async fn apply(&self, envelope: &WebhookEnvelope) -> AppResult<ApplyOutcome> {
        let operation = classify(&envelope.event);
        check_required_fields(&operation)?;

        let entry = NewEventLogEntry::from_envelope(envelope, canonical_product_id(&envelope.event));

        let mut tx = self.store.begin().await?;

        if !tx.record_event(&entry).await? {
            if envelope.has_event_id() {
                info!(operation = %operation.kind(), "Event already processed, skipping");
                return Ok(ApplyOutcome::Duplicate);
            }
            // Id-less events all share the fallback log key. Their writes are
            // idempotent, so apply them rather than drop them.
            warn!(
                operation = %operation.kind(),
                "Event has no id and collides on the fallback log key, applying anyway"
            );
        }

        let outcome = match &operation {
            EntitlementOperation::Activate(grant)
            | EntitlementOperation::Renew(grant)
            | EntitlementOperation::Terminate(grant) => {
                apply_grant(tx.as_mut(), grant).await?;
                ApplyOutcome::Applied(operation.kind())
            }
            EntitlementOperation::ChangePlan(change) => {
                apply_plan_change(tx.as_mut(), change, Utc::now()).await?;
                ApplyOutcome::Applied(operation.kind())
            }
            EntitlementOperation::Transfer(transfer) => {
                apply_transfer(tx.as_mut(), transfer).await?;
                ApplyOutcome::Applied(operation.kind())
            }
            EntitlementOperation::Ignore { event_type } => {
                info!(event_type = %event_type, "Event type not handled, acknowledging");
                ApplyOutcome::Ignored
            }
        };

        tx.commit().await?;

        info!(operation = %operation.kind(), "Event applied");
        Ok(outcome)
    }

    /// Access-check entry point for code embedding this crate: what the user holds
    /// right now. Pair with [`EntitlementStatus::is_active`].
    #[instrument(skip(self))]
    pub async fn current_entitlement(
        &self,
        app_user_id: &str,
    ) -> AppResult<Option<EntitlementStatus>> {
        self.store.get_user_entitlement(app_user_id).await
    }
}

fn check_required_fields(operation: &EntitlementOperation) -> AppResult<()> {
    let require = |value: &str, field: &str| {
        if value.trim().is_empty() {
            Err(AppError::InvalidInput(format!("event is missing {field}")))
        } else {
            Ok(())
        }
    };

    match operation {
        EntitlementOperation::Activate(grant)
        | EntitlementOperation::Renew(grant)
        | EntitlementOperation::Terminate(grant) => {
            require(&grant.app_user_id, "app_user_id")?;
            require(&grant.transaction_id, "transaction_id")?;
            instant_from_millis(grant.purchased_at_ms).map_err(AppError::InvalidInput)?;
            expiry_from_millis(grant.expiration_at_ms).map_err(AppError::InvalidInput)?;
        }
        EntitlementOperation::ChangePlan(change) => {
            require(&change.app_user_id, "app_user_id")?;
            require(&change.transaction_id, "transaction_id")?;
            expiry_from_millis(change.expiration_at_ms).map_err(AppError::InvalidInput)?;
        }
        EntitlementOperation::Transfer(transfer) => {
            if transfer.transferred_to.iter().all(|id| id.trim().is_empty()) {
                return Err(AppError::InvalidInput(
                    "transfer event is missing transferred_to".into(),
                ));
            }
            instant_from_millis(transfer.purchased_at_ms).map_err(AppError::InvalidInput)?;
            expiry_from_millis(transfer.expiration_at_ms).map_err(AppError::InvalidInput)?;
        }
        EntitlementOperation::Ignore { .. } => {}
    }
    Ok(())
}

async fn apply_grant(tx: &mut dyn EntitlementTx, grant: &EntitlementGrant) -> AppResult<()> {
    upsert_entitlement(
        tx,
        &grant.app_user_id,
        &grant.transaction_id,
        &grant.plan_type,
        instant_from_millis(grant.purchased_at_ms).map_err(AppError::InvalidInput)?,
        expiry_from_millis(grant.expiration_at_ms).map_err(AppError::InvalidInput)?,
    )
    .await
}

/// Create the record if new, then make `app_user_id` its only holder.
async fn upsert_entitlement(
    tx: &mut dyn EntitlementTx,
    app_user_id: &str,
    transaction_id: &str,
    plan_type: &PlanType,
    activated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
) -> AppResult<()> {
    tx.insert_entitlement_if_absent(&EntitlementRecord {
        transaction_id: transaction_id.to_string(),
        plan_type: plan_type.clone(),
        activated_at,
        expires_at,
    })
    .await?;

    move_reference(tx, app_user_id, transaction_id).await
}

async fn move_reference(
    tx: &mut dyn EntitlementTx,
    app_user_id: &str,
    transaction_id: &str,
) -> AppResult<()> {
    let cleared = tx.clear_entitlement_refs(transaction_id).await?;
    if !tx.set_entitlement_ref(app_user_id, transaction_id).await? {
        warn!(
            app_user_id,
            transaction_id,
            cleared,
            "No account for user, entitlement is recorded without a holder"
        );
    }
    Ok(())
}

async fn apply_plan_change(
    tx: &mut dyn EntitlementTx,
    change: &PlanChange,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let mut expires_at = expiry_from_millis(change.expiration_at_ms).map_err(AppError::InvalidInput)?;

    if let Some(reported) = expires_at {
        if reported <= now {
            let fallback = tx
                .find_other_valid_expiry(&change.app_user_id, &change.transaction_id, now)
                .await?
                .unwrap_or_else(|| now + Duration::hours(PLAN_CHANGE_GRACE_HOURS));
            expires_at = Some(fallback);
        }
    }

    let extended = tx
        .extend_entitlement(&change.transaction_id, &change.plan_type, expires_at)
        .await?;
    if !extended {
        // Plan change arrived before the purchase it modifies.
        tx.insert_entitlement_if_absent(&EntitlementRecord {
            transaction_id: change.transaction_id.clone(),
            plan_type: change.plan_type.clone(),
            activated_at: now,
            expires_at,
        })
        .await?;
    }

    move_reference(tx, &change.app_user_id, &change.transaction_id).await
}

async fn apply_transfer(
    tx: &mut dyn EntitlementTx,
    transfer: &EntitlementTransfer,
) -> AppResult<()> {
    let mut moved_transaction_id = None;
    for source in &transfer.transferred_from {
        if let Some(transaction_id) = tx.take_entitlement_ref(source).await? {
            moved_transaction_id = Some(transaction_id);
        }
    }

    let moved_transaction_id = moved_transaction_id.ok_or_else(|| {
        AppError::NotFound(format!(
            "no transaction to transfer from {:?}",
            transfer.transferred_from
        ))
    })?;

    let activated_at = instant_from_millis(transfer.purchased_at_ms).map_err(AppError::InvalidInput)?;
    let expires_at = expiry_from_millis(transfer.expiration_at_ms).map_err(AppError::InvalidInput)?;

    for destination in transfer.transferred_to.iter().filter(|id| !id.trim().is_empty()) {
        if !tx.user_exists(destination).await? {
            // Destination has no account yet: the source account takes over the new
            // identity instead of a second account being created.
            if let Some(source) = transfer.transferred_from.first() {
                let merged = tx.rename_user(source, destination).await?;
                info!(
                    source = %source,
                    destination = %destination,
                    merged,
                    "Repointed source account to transfer destination"
                );
            }
        }

        upsert_entitlement(
            tx,
            destination,
            &moved_transaction_id,
            &transfer.plan_type,
            activated_at,
            expires_at,
        )
        .await?;
    }

    Ok(())
}
