use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{PaymentRepository, RepositoryError, RepositoryResult};
use crate::models::payments::Payment;

const COLUMNS: &str = r#"id, user_id, payment_date, amount, currency, payment_method,
    status, transaction_id, subscription_id, created_at, updated_at"#;

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: String,
    payment_date: DateTime<Utc>,
    amount: f64,
    currency: String,
    payment_method: Option<String>,
    status: String,
    transaction_id: Option<String>,
    subscription_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = RepositoryError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(RepositoryError::CorruptRow)?;

        Ok(Payment {
            id: row.id,
            user_id: row.user_id,
            payment_date: row.payment_date,
            amount: row.amount,
            currency: row.currency,
            payment_method: row.payment_method,
            status,
            transaction_id: row.transaction_id,
            subscription_id: row.subscription_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgPaymentRepository {
    conn: PgPool,
}

impl PgPaymentRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert(&self, payment: Payment) -> RepositoryResult<Payment> {
        let query = format!(
            r#"INSERT INTO payments ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {COLUMNS}"#
        );
        let transaction_id = payment.transaction_id.clone().unwrap_or_default();

        let row = sqlx::query_as::<_, PaymentRow>(&query)
            .bind(payment.id)
            .bind(&payment.user_id)
            .bind(payment.payment_date)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(&payment.payment_method)
            .bind(payment.status.as_str())
            .bind(&payment.transaction_id)
            .bind(&payment.subscription_id)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .fetch_one(&self.conn)
            .await
            .map_err(|e| RepositoryError::from_insert(e, "transaction_id", &transaction_id))?;

        row.try_into()
    }

    async fn find_by_user(&self, user_id: &str) -> RepositoryResult<Vec<Payment>> {
        let query =
            format!("SELECT {COLUMNS} FROM payments WHERE user_id = $1 ORDER BY payment_date");

        let rows = sqlx::query_as::<_, PaymentRow>(&query)
            .bind(user_id)
            .fetch_all(&self.conn)
            .await?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn delete_by_user(&self, user_id: &str) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM payments WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.conn)
            .await?;

        Ok(result.rows_affected())
    }
}
