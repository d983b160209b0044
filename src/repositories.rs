use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{payments::Payment, referrals::Referral};

pub mod memory;
pub mod payments;
pub mod referrals;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Duplicate {field}: {value}")]
    Duplicate { field: &'static str, value: String },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl RepositoryError {
    /// Turns a unique index violation into `Duplicate`, anything else stays a
    /// database error.
    pub fn from_insert(err: sqlx::Error, field: &'static str, value: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                RepositoryError::Duplicate {
                    field,
                    value: value.to_string(),
                }
            }
            _ => RepositoryError::Database(err),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait ReferralRepository: Send + Sync {
    async fn insert(&self, referral: Referral) -> RepositoryResult<Referral>;

    /// Inserts, or replaces every mutable column of an existing row.
    async fn upsert(&self, referral: Referral) -> RepositoryResult<Referral>;

    async fn find_by_id(&self, referral_id: &str) -> RepositoryResult<Option<Referral>>;

    /// Returns `None` when no row with that id exists.
    async fn update(&self, referral: Referral) -> RepositoryResult<Option<Referral>>;

    async fn delete(&self, referral_id: &str) -> RepositoryResult<Option<Referral>>;

    /// Direct children, oldest registration first.
    async fn find_children(&self, referrer_id: &str) -> RepositoryResult<Vec<Referral>>;

    /// Referrals without a referrer, or whose referrer is not stored.
    async fn find_roots(&self) -> RepositoryResult<Vec<Referral>>;

    /// Case-insensitive substring match on id, nicknames and name.
    async fn search(&self, term: &str, limit: i64) -> RepositoryResult<Vec<Referral>>;

    async fn count(&self) -> RepositoryResult<i64>;

    /// Ids of referrers that gained a child registered in `[since, until]`.
    async fn recently_active_parents(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RepositoryResult<HashSet<String>>;

    /// Stored referrals that gained a child registered in `[since, until]`.
    async fn count_active(&self, since: DateTime<Utc>, until: DateTime<Utc>)
        -> RepositoryResult<i64>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: Payment) -> RepositoryResult<Payment>;

    async fn find_by_user(&self, user_id: &str) -> RepositoryResult<Vec<Payment>>;

    async fn delete_by_user(&self, user_id: &str) -> RepositoryResult<u64>;
}

#[derive(Clone)]
pub struct Repositories {
    pub referrals: Arc<dyn ReferralRepository>,
    pub payments: Arc<dyn PaymentRepository>,
}

impl Repositories {
    pub fn postgres(conn: PgPool) -> Self {
        Self {
            referrals: Arc::new(referrals::PgReferralRepository::new(conn.clone())),
            payments: Arc::new(payments::PgPaymentRepository::new(conn)),
        }
    }

    pub fn memory() -> Self {
        let store = Arc::new(memory::MemoryStore::new());

        Self {
            referrals: store.clone(),
            payments: store,
        }
    }
}

pub async fn run_migrations(conn: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(conn).await
}
