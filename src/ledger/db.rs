//! PostgreSQL payment store
//!
//! All status updates are atomic CAS operations keyed on the current status.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::error::LedgerError;
use super::state::{SubscriptionStatus, TransactionStatus};
use super::store::PaymentStore;
use super::types::{PaymentMethod, Profile, Subscription, TranId, Transaction};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS billing_profiles_tb (
    id            UUID PRIMARY KEY,
    email         TEXT NOT NULL,
    first_name    TEXT NOT NULL DEFAULT '',
    last_name     TEXT NOT NULL DEFAULT '',
    phone         TEXT NOT NULL DEFAULT '',
    session_token TEXT,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_billing_profiles_email ON billing_profiles_tb (lower(email));
CREATE INDEX IF NOT EXISTS idx_billing_profiles_session ON billing_profiles_tb (session_token);

CREATE TABLE IF NOT EXISTS subscriptions_tb (
    id                    UUID PRIMARY KEY,
    profile_id            UUID NOT NULL,
    tier                  TEXT NOT NULL,
    status                TEXT NOT NULL,
    renewal_date          TIMESTAMPTZ,
    auto_renew            BOOLEAN NOT NULL DEFAULT FALSE,
    payment_token_id      UUID,
    renewal_claimed_until TIMESTAMPTZ,
    created_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at            TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_subscriptions_renewal ON subscriptions_tb (status, renewal_date);

CREATE TABLE IF NOT EXISTS payment_transactions_tb (
    tran_id         TEXT PRIMARY KEY,
    lookup_key      TEXT NOT NULL,
    profile_id      UUID NOT NULL,
    subscription_id UUID,
    amount          NUMERIC(18, 2) NOT NULL,
    currency        TEXT NOT NULL,
    status          TEXT NOT NULL,
    kind            TEXT NOT NULL,
    payment_option  TEXT NOT NULL DEFAULT '',
    tier            TEXT,
    metadata        JSONB NOT NULL DEFAULT '{}'::jsonb,
    note            TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_payment_transactions_lookup ON payment_transactions_tb (lookup_key);

CREATE TABLE IF NOT EXISTS payment_methods_tb (
    id          UUID PRIMARY KEY,
    profile_id  UUID NOT NULL,
    token       TEXT NOT NULL,
    method_type TEXT NOT NULL,
    masked_pan  TEXT,
    is_default  BOOLEAN NOT NULL DEFAULT FALSE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_payment_methods_default
    ON payment_methods_tb (profile_id) WHERE is_default;
"#;

const SUBSCRIPTION_COLUMNS: &str = "id, profile_id, tier, status, renewal_date, auto_renew, \
     payment_token_id, renewal_claimed_until, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "tran_id, lookup_key, profile_id, subscription_id, amount, \
     currency, status, kind, payment_option, tier, metadata, note, created_at, updated_at";

/// PostgreSQL-backed [`PaymentStore`]
#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the billing tables exist
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        tracing::info!("PostgreSQL connection pool established");

        let store = Self::new(pool);
        store.bootstrap_schema().await?;
        Ok(store)
    }

    pub async fn bootstrap_schema(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_subscription(
        &self,
        clause: &str,
        bind: Uuid,
    ) -> Result<Option<Subscription>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM subscriptions_tb WHERE {} ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS, clause
        );
        let row = sqlx::query(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn fetch_transaction(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM payment_transactions_tb WHERE {} = $1 LIMIT 1",
            TRANSACTION_COLUMNS, column
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_transaction).transpose()
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(
    row: &PgRow,
    column: &str,
) -> Result<T, LedgerError> {
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(LedgerError::CorruptRow)
}

fn row_to_profile(row: &PgRow) -> Result<Profile, LedgerError> {
    Ok(Profile {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone: row.try_get("phone")?,
        session_token: row.try_get("session_token")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_subscription(row: &PgRow) -> Result<Subscription, LedgerError> {
    Ok(Subscription {
        id: row.try_get("id")?,
        profile_id: row.try_get("profile_id")?,
        tier: parse_column(row, "tier")?,
        status: parse_column::<SubscriptionStatus>(row, "status")?,
        renewal_date: row.try_get("renewal_date")?,
        auto_renew: row.try_get("auto_renew")?,
        payment_token_id: row.try_get("payment_token_id")?,
        renewal_claimed_until: row.try_get("renewal_claimed_until")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transaction(row: &PgRow) -> Result<Transaction, LedgerError> {
    let tran_id: String = row.try_get("tran_id")?;
    let tier: Option<String> = row.try_get("tier")?;
    let tier = tier
        .map(|t| t.parse())
        .transpose()
        .map_err(LedgerError::CorruptRow)?;

    Ok(Transaction {
        tran_id: TranId::from(tran_id),
        lookup_key: row.try_get("lookup_key")?,
        profile_id: row.try_get("profile_id")?,
        subscription_id: row.try_get("subscription_id")?,
        amount: row.try_get("amount")?,
        currency: parse_column(row, "currency")?,
        status: parse_column::<TransactionStatus>(row, "status")?,
        kind: parse_column(row, "kind")?,
        payment_option: row.try_get("payment_option")?,
        tier,
        metadata: row.try_get("metadata")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_payment_method(row: &PgRow) -> Result<PaymentMethod, LedgerError> {
    Ok(PaymentMethod {
        id: row.try_get("id")?,
        profile_id: row.try_get("profile_id")?,
        token: row.try_get("token")?,
        method_type: row.try_get("method_type")?,
        masked_pan: row.try_get("masked_pan")?,
        is_default: row.try_get("is_default")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn health_check(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, LedgerError> {
        let row = sqlx::query("SELECT * FROM billing_profiles_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, LedgerError> {
        let row = sqlx::query(
            "SELECT * FROM billing_profiles_tb WHERE lower(email) = lower($1) \
             ORDER BY created_at LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn find_profile_by_session(
        &self,
        session: &str,
    ) -> Result<Option<Profile>, LedgerError> {
        let row = sqlx::query("SELECT * FROM billing_profiles_tb WHERE session_token = $1 LIMIT 1")
            .bind(session)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO billing_profiles_tb
                (id, email, first_name, last_name, phone, session_token, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(profile.id)
        .bind(&profile.email)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.phone)
        .bind(&profile.session_token)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_profile(&self, profile: &Profile) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE billing_profiles_tb
            SET email = $2, first_name = $3, last_name = $4, phone = $5, session_token = $6
            WHERE id = $1
            "#,
        )
        .bind(profile.id)
        .bind(&profile.email)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.phone)
        .bind(&profile.session_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::ProfileNotFound(profile.id.to_string()));
        }
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, LedgerError> {
        self.fetch_subscription("id = $1", id).await
    }

    async fn subscription_for_profile(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<Subscription>, LedgerError> {
        self.fetch_subscription("profile_id = $1", profile_id).await
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions_tb
                (id, profile_id, tier, status, renewal_date, auto_renew,
                 payment_token_id, renewal_claimed_until, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.profile_id)
        .bind(subscription.tier.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.renewal_date)
        .bind(subscription.auto_renew)
        .bind(subscription.payment_token_id)
        .bind(subscription.renewal_claimed_until)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions_tb
            SET tier = $2, status = $3, renewal_date = $4, auto_renew = $5,
                payment_token_id = $6, renewal_claimed_until = $7, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.tier.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.renewal_date)
        .bind(subscription.auto_renew)
        .bind(subscription.payment_token_id)
        .bind(subscription.renewal_claimed_until)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::SubscriptionNotFound(
                subscription.id.to_string(),
            ));
        }
        Ok(())
    }

    async fn due_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Subscription>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM subscriptions_tb \
             WHERE status = $1 AND auto_renew AND renewal_date <= $2 \
             ORDER BY renewal_date ASC LIMIT $3",
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(SubscriptionStatus::Active.as_str())
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_subscription).collect()
    }

    async fn claim_renewal(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions_tb
            SET renewal_claimed_until = $3, updated_at = NOW()
            WHERE id = $1
              AND status = $4
              AND auto_renew
              AND renewal_date <= $2
              AND (renewal_claimed_until IS NULL OR renewal_claimed_until <= $2)
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(lease_until)
        .bind(SubscriptionStatus::Active.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_renewal_claim(&self, id: Uuid) -> Result<(), LedgerError> {
        sqlx::query("UPDATE subscriptions_tb SET renewal_claimed_until = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_transactions_tb
                (tran_id, lookup_key, profile_id, subscription_id, amount, currency, status,
                 kind, payment_option, tier, metadata, note, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (tran_id) DO NOTHING
            "#,
        )
        .bind(tx.tran_id.as_str())
        .bind(&tx.lookup_key)
        .bind(tx.profile_id)
        .bind(tx.subscription_id)
        .bind(tx.amount)
        .bind(tx.currency.as_str())
        .bind(tx.status.as_str())
        .bind(tx.kind.as_str())
        .bind(&tx.payment_option)
        .bind(tx.tier.map(|t| t.as_str()))
        .bind(&tx.metadata)
        .bind(&tx.note)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::DuplicateTransaction(tx.tran_id.to_string()));
        }
        Ok(())
    }

    async fn get_transaction(&self, tran_id: &TranId) -> Result<Option<Transaction>, LedgerError> {
        self.fetch_transaction("tran_id", tran_id.as_str()).await
    }

    async fn find_transaction_by_lookup_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.fetch_transaction("lookup_key", key).await
    }

    async fn transition_transaction(
        &self,
        tran_id: &TranId,
        from: TransactionStatus,
        to: TransactionStatus,
        patch: Option<serde_json::Value>,
        note: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_transactions_tb
            SET status = $1,
                metadata = metadata || COALESCE($2, '{}'::jsonb),
                note = COALESCE($3, note),
                updated_at = NOW()
            WHERE tran_id = $4 AND status = $5
            "#,
        )
        .bind(to.as_str())
        .bind(patch)
        .bind(note)
        .bind(tran_id.as_str())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn note_transaction(
        &self,
        tran_id: &TranId,
        note: &str,
        patch: Option<serde_json::Value>,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_transactions_tb
            SET note = $1,
                metadata = metadata || COALESCE($2, '{}'::jsonb),
                updated_at = NOW()
            WHERE tran_id = $3 AND status = $4
            "#,
        )
        .bind(note)
        .bind(patch)
        .bind(tran_id.as_str())
        .bind(TransactionStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get_transaction(tran_id).await? {
            Some(_) => Ok(false),
            None => Err(LedgerError::TransactionNotFound(tran_id.to_string())),
        }
    }

    async fn insert_payment_method(&self, method: &PaymentMethod) -> Result<(), LedgerError> {
        let mut db_tx = self.pool.begin().await?;

        if method.is_default {
            sqlx::query(
                "UPDATE payment_methods_tb SET is_default = FALSE \
                 WHERE profile_id = $1 AND is_default",
            )
            .bind(method.profile_id)
            .execute(&mut *db_tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO payment_methods_tb
                (id, profile_id, token, method_type, masked_pan, is_default, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(method.id)
        .bind(method.profile_id)
        .bind(&method.token)
        .bind(&method.method_type)
        .bind(&method.masked_pan)
        .bind(method.is_default)
        .bind(method.created_at)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(())
    }

    async fn default_payment_method(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<PaymentMethod>, LedgerError> {
        let row = sqlx::query(
            "SELECT * FROM payment_methods_tb WHERE profile_id = $1 AND is_default \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_payment_method).transpose()
    }

    async fn get_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>, LedgerError> {
        let row = sqlx::query("SELECT * FROM payment_methods_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_payment_method).transpose()
    }
}
