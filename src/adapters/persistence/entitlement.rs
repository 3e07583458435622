use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::ports::entitlement_store::{EntitlementStore, EntitlementTx},
    domain::entities::{
        entitlement::{EntitlementRecord, EntitlementStatus, PlanType},
        event_log::{EventLogEntry, NewEventLogEntry},
    },
};

const ENTITLEMENT_COLS: &str = "transaction_id, plan_type, activated_at, expires_at";

const EVENT_LOG_COLS: &str = r#"
    event_id, event_type, app_user_id, original_app_user_id, product_id,
    transaction_id, original_transaction_id, price, currency,
    price_in_purchased_currency, takehome_percentage, purchased_at_ms,
    expiration_at_ms, store, environment, payload, received_at
"#;

fn row_to_log_entry(row: sqlx::postgres::PgRow) -> AppResult<EventLogEntry> {
    Ok(EventLogEntry {
        entry: NewEventLogEntry {
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            app_user_id: row.try_get("app_user_id")?,
            original_app_user_id: row.try_get("original_app_user_id")?,
            product_id: row.try_get("product_id")?,
            transaction_id: row.try_get("transaction_id")?,
            original_transaction_id: row.try_get("original_transaction_id")?,
            price: row.try_get("price")?,
            currency: row.try_get("currency")?,
            price_in_purchased_currency: row.try_get("price_in_purchased_currency")?,
            takehome_percentage: row.try_get("takehome_percentage")?,
            purchased_at_ms: row.try_get("purchased_at_ms")?,
            expiration_at_ms: row.try_get("expiration_at_ms")?,
            store: row.try_get("store")?,
            environment: row.try_get("environment")?,
            payload: row.try_get("payload")?,
        },
        received_at: row.try_get("received_at")?,
    })
}

#[async_trait]
impl EntitlementStore for PostgresPersistence {
    async fn begin(&self) -> AppResult<Box<dyn EntitlementTx>> {
        let tx = self.pool.begin().await.map_err(AppError::from)?;
        Ok(Box::new(PgEntitlementTx { tx }))
    }

    async fn get_entitlement(&self, transaction_id: &str) -> AppResult<Option<EntitlementRecord>> {
        let record = sqlx::query_as::<_, EntitlementRecord>(&format!(
            "SELECT {} FROM entitlements WHERE transaction_id = $1",
            ENTITLEMENT_COLS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(record)
    }

    async fn get_user_entitlement(
        &self,
        app_user_id: &str,
    ) -> AppResult<Option<EntitlementStatus>> {
        let record = sqlx::query_as::<_, EntitlementRecord>(
            r#"
            SELECT e.transaction_id, e.plan_type, e.activated_at, e.expires_at
            FROM user_accounts u
            JOIN entitlements e ON e.transaction_id = u.entitlement_id
            WHERE u.app_user_id = $1
            "#,
        )
        .bind(app_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;

        Ok(record.map(|entitlement| EntitlementStatus {
            app_user_id: app_user_id.to_string(),
            entitlement,
        }))
    }

    async fn get_event_log_entry(&self, event_id: &str) -> AppResult<Option<EventLogEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscription_event_log WHERE event_id = $1",
            EVENT_LOG_COLS
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;

        row.map(row_to_log_entry).transpose()
    }
}

/// One Postgres transaction. Dropping it without commit rolls back.
pub struct PgEntitlementTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl EntitlementTx for PgEntitlementTx {
    async fn record_event(&mut self, entry: &NewEventLogEntry) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscription_event_log (
                event_id, event_type, app_user_id, original_app_user_id, product_id,
                transaction_id, original_transaction_id, price, currency,
                price_in_purchased_currency, takehome_percentage, purchased_at_ms,
                expiration_at_ms, store, environment, payload
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&entry.event_id)
        .bind(&entry.event_type)
        .bind(&entry.app_user_id)
        .bind(&entry.original_app_user_id)
        .bind(&entry.product_id)
        .bind(&entry.transaction_id)
        .bind(&entry.original_transaction_id)
        .bind(entry.price)
        .bind(&entry.currency)
        .bind(entry.price_in_purchased_currency)
        .bind(entry.takehome_percentage)
        .bind(entry.purchased_at_ms)
        .bind(entry.expiration_at_ms)
        .bind(&entry.store)
        .bind(&entry.environment)
        .bind(&entry.payload)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_entitlement_if_absent(&mut self, record: &EntitlementRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entitlements (transaction_id, plan_type, activated_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(&record.transaction_id)
        .bind(&record.plan_type)
        .bind(record.activated_at)
        .bind(record.expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn extend_entitlement(
        &mut self,
        transaction_id: &str,
        plan_type: &PlanType,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<bool> {
        // GREATEST ignores NULL arguments, so a NULL new expiry keeps the stored one.
        let result = sqlx::query(
            r#"
            UPDATE entitlements
            SET plan_type = $2,
                expires_at = CASE
                    WHEN expires_at IS NULL THEN NULL
                    ELSE GREATEST(expires_at, $3)
                END,
                updated_at = NOW()
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .bind(plan_type)
        .bind(expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_other_valid_expiry(
        &mut self,
        app_user_id: &str,
        excluding_transaction_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let expires_at: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            r#"
            SELECT e.expires_at
            FROM user_accounts u
            JOIN entitlements e ON e.transaction_id = u.entitlement_id
            WHERE u.app_user_id = $1
              AND e.transaction_id <> $2
              AND e.expires_at > $3
            "#,
        )
        .bind(app_user_id)
        .bind(excluding_transaction_id)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(expires_at.flatten())
    }

    async fn clear_entitlement_refs(&mut self, transaction_id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE user_accounts
            SET entitlement_id = NULL, updated_at = NOW()
            WHERE entitlement_id = $1
            "#,
        )
        .bind(transaction_id)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(result.rows_affected())
    }

    async fn set_entitlement_ref(
        &mut self,
        app_user_id: &str,
        transaction_id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_accounts
            SET entitlement_id = $2, updated_at = NOW()
            WHERE app_user_id = $1
            "#,
        )
        .bind(app_user_id)
        .bind(transaction_id)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn take_entitlement_ref(&mut self, app_user_id: &str) -> AppResult<Option<String>> {
        let current: Option<Option<String>> = sqlx::query_scalar(
            "SELECT entitlement_id FROM user_accounts WHERE app_user_id = $1 FOR UPDATE",
        )
        .bind(app_user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        let Some(transaction_id) = current.flatten() else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE user_accounts
            SET entitlement_id = NULL, updated_at = NOW()
            WHERE app_user_id = $1
            "#,
        )
        .bind(app_user_id)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(Some(transaction_id))
    }

    async fn user_exists(&mut self, app_user_id: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_accounts WHERE app_user_id = $1)",
        )
        .bind(app_user_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(exists)
    }

    async fn rename_user(&mut self, from: &str, to: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_accounts
            SET app_user_id = $1, updated_at = NOW()
            WHERE app_user_id = $2
            "#,
        )
        .bind(to)
        .bind(from)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await.map_err(AppError::from)
    }
}
