use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{ReferralRepository, RepositoryError, RepositoryResult};
use crate::{models::referrals::Referral, utils::escape_like};

const COLUMNS: &str = r#"referral_id, referrer_id, reg_date, referral_nickname,
    referrer_nickname, referral_name, referral_link_url, personal_channel_link,
    utm, channel_activity, created_at, updated_at"#;

#[derive(Clone)]
pub struct PgReferralRepository {
    conn: PgPool,
}

impl PgReferralRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ReferralRepository for PgReferralRepository {
    async fn insert(&self, referral: Referral) -> RepositoryResult<Referral> {
        let query = format!(
            r#"INSERT INTO referrals ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {COLUMNS}"#
        );

        sqlx::query_as::<_, Referral>(&query)
            .bind(&referral.referral_id)
            .bind(&referral.referrer_id)
            .bind(referral.reg_date)
            .bind(&referral.referral_nickname)
            .bind(&referral.referrer_nickname)
            .bind(&referral.referral_name)
            .bind(&referral.referral_link_url)
            .bind(&referral.personal_channel_link)
            .bind(&referral.utm)
            .bind(&referral.channel_activity)
            .bind(referral.created_at)
            .bind(referral.updated_at)
            .fetch_one(&self.conn)
            .await
            .map_err(|e| RepositoryError::from_insert(e, "referral_id", &referral.referral_id))
    }

    async fn upsert(&self, referral: Referral) -> RepositoryResult<Referral> {
        let query = format!(
            r#"INSERT INTO referrals ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (referral_id) DO UPDATE SET
                referrer_id = EXCLUDED.referrer_id,
                reg_date = EXCLUDED.reg_date,
                referral_nickname = EXCLUDED.referral_nickname,
                referrer_nickname = EXCLUDED.referrer_nickname,
                referral_name = EXCLUDED.referral_name,
                referral_link_url = EXCLUDED.referral_link_url,
                personal_channel_link = EXCLUDED.personal_channel_link,
                utm = EXCLUDED.utm,
                channel_activity = EXCLUDED.channel_activity,
                updated_at = EXCLUDED.updated_at
            RETURNING {COLUMNS}"#
        );

        let referral = sqlx::query_as::<_, Referral>(&query)
            .bind(&referral.referral_id)
            .bind(&referral.referrer_id)
            .bind(referral.reg_date)
            .bind(&referral.referral_nickname)
            .bind(&referral.referrer_nickname)
            .bind(&referral.referral_name)
            .bind(&referral.referral_link_url)
            .bind(&referral.personal_channel_link)
            .bind(&referral.utm)
            .bind(&referral.channel_activity)
            .bind(referral.created_at)
            .bind(referral.updated_at)
            .fetch_one(&self.conn)
            .await?;

        Ok(referral)
    }

    async fn find_by_id(&self, referral_id: &str) -> RepositoryResult<Option<Referral>> {
        let query = format!("SELECT {COLUMNS} FROM referrals WHERE referral_id = $1");

        let referral = sqlx::query_as::<_, Referral>(&query)
            .bind(referral_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(referral)
    }

    async fn update(&self, referral: Referral) -> RepositoryResult<Option<Referral>> {
        let query = format!(
            r#"UPDATE referrals SET
                referrer_id = $2,
                reg_date = $3,
                referral_nickname = $4,
                referrer_nickname = $5,
                referral_name = $6,
                referral_link_url = $7,
                personal_channel_link = $8,
                utm = $9,
                channel_activity = $10,
                updated_at = $11
            WHERE referral_id = $1
            RETURNING {COLUMNS}"#
        );

        let referral = sqlx::query_as::<_, Referral>(&query)
            .bind(&referral.referral_id)
            .bind(&referral.referrer_id)
            .bind(referral.reg_date)
            .bind(&referral.referral_nickname)
            .bind(&referral.referrer_nickname)
            .bind(&referral.referral_name)
            .bind(&referral.referral_link_url)
            .bind(&referral.personal_channel_link)
            .bind(&referral.utm)
            .bind(&referral.channel_activity)
            .bind(referral.updated_at)
            .fetch_optional(&self.conn)
            .await?;

        Ok(referral)
    }

    async fn delete(&self, referral_id: &str) -> RepositoryResult<Option<Referral>> {
        let query = format!("DELETE FROM referrals WHERE referral_id = $1 RETURNING {COLUMNS}");

        let referral = sqlx::query_as::<_, Referral>(&query)
            .bind(referral_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(referral)
    }

    async fn find_children(&self, referrer_id: &str) -> RepositoryResult<Vec<Referral>> {
        let query = format!(
            "SELECT {COLUMNS} FROM referrals WHERE referrer_id = $1 ORDER BY reg_date, referral_id"
        );

        let children = sqlx::query_as::<_, Referral>(&query)
            .bind(referrer_id)
            .fetch_all(&self.conn)
            .await?;

        Ok(children)
    }

    async fn find_roots(&self) -> RepositoryResult<Vec<Referral>> {
        let query = format!(
            r#"SELECT {COLUMNS} FROM referrals r
            WHERE r.referrer_id IS NULL
               OR NOT EXISTS (SELECT 1 FROM referrals p WHERE p.referral_id = r.referrer_id)
            ORDER BY r.reg_date, r.referral_id"#
        );

        let roots = sqlx::query_as::<_, Referral>(&query)
            .fetch_all(&self.conn)
            .await?;

        Ok(roots)
    }

    async fn search(&self, term: &str, limit: i64) -> RepositoryResult<Vec<Referral>> {
        let query = format!(
            r#"SELECT {COLUMNS} FROM referrals
            WHERE referral_id ILIKE $1
               OR referral_nickname ILIKE $1
               OR referrer_nickname ILIKE $1
               OR referral_name ILIKE $1
            ORDER BY reg_date DESC, referral_id
            LIMIT $2"#
        );
        let pattern = format!("%{}%", escape_like(term));

        let referrals = sqlx::query_as::<_, Referral>(&query)
            .bind(pattern)
            .bind(limit)
            .fetch_all(&self.conn)
            .await?;

        Ok(referrals)
    }

    async fn count(&self) -> RepositoryResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM referrals")
            .fetch_one(&self.conn)
            .await?;

        Ok(count)
    }

    async fn recently_active_parents(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RepositoryResult<HashSet<String>> {
        let parents: Vec<String> = sqlx::query_scalar(
            r#"SELECT DISTINCT referrer_id FROM referrals
            WHERE referrer_id IS NOT NULL AND reg_date >= $1 AND reg_date <= $2"#,
        )
        .bind(since)
        .bind(until)
        .fetch_all(&self.conn)
        .await?;

        Ok(parents.into_iter().collect())
    }

    async fn count_active(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(1) FROM referrals r
            WHERE EXISTS (
                SELECT 1 FROM referrals c
                WHERE c.referrer_id = r.referral_id AND c.reg_date >= $1 AND c.reg_date <= $2
            )"#,
        )
        .bind(since)
        .bind(until)
        .fetch_one(&self.conn)
        .await?;

        Ok(count)
    }
}
