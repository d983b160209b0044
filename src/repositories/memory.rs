use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{PaymentRepository, ReferralRepository, RepositoryError, RepositoryResult};
use crate::models::{payments::Payment, referrals::Referral};

/// Process-local backend with the same uniqueness rules as the Postgres
/// schema. Used by `storage.backend = "memory"` and by the tests.
#[derive(Default)]
pub struct MemoryStore {
    referrals: RwLock<HashMap<String, Referral>>,
    payments: RwLock<Vec<Payment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_registration(referrals: &mut [Referral]) {
    referrals.sort_by(|a, b| {
        a.reg_date
            .cmp(&b.reg_date)
            .then_with(|| a.referral_id.cmp(&b.referral_id))
    });
}

fn within(date: DateTime<Utc>, since: DateTime<Utc>, until: DateTime<Utc>) -> bool {
    date >= since && date <= until
}

#[async_trait]
impl ReferralRepository for MemoryStore {
    async fn insert(&self, referral: Referral) -> RepositoryResult<Referral> {
        let mut referrals = self.referrals.write().await;

        if referrals.contains_key(&referral.referral_id) {
            return Err(RepositoryError::Duplicate {
                field: "referral_id",
                value: referral.referral_id,
            });
        }

        referrals.insert(referral.referral_id.clone(), referral.clone());
        Ok(referral)
    }

    async fn upsert(&self, mut referral: Referral) -> RepositoryResult<Referral> {
        let mut referrals = self.referrals.write().await;

        if let Some(existing) = referrals.get(&referral.referral_id) {
            referral.created_at = existing.created_at;
        }

        referrals.insert(referral.referral_id.clone(), referral.clone());
        Ok(referral)
    }

    async fn find_by_id(&self, referral_id: &str) -> RepositoryResult<Option<Referral>> {
        Ok(self.referrals.read().await.get(referral_id).cloned())
    }

    async fn update(&self, referral: Referral) -> RepositoryResult<Option<Referral>> {
        let mut referrals = self.referrals.write().await;

        match referrals.get_mut(&referral.referral_id) {
            Some(stored) => {
                let created_at = stored.created_at;
                *stored = Referral {
                    created_at,
                    ..referral
                };
                Ok(Some(stored.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, referral_id: &str) -> RepositoryResult<Option<Referral>> {
        Ok(self.referrals.write().await.remove(referral_id))
    }

    async fn find_children(&self, referrer_id: &str) -> RepositoryResult<Vec<Referral>> {
        let mut children: Vec<Referral> = self
            .referrals
            .read()
            .await
            .values()
            .filter(|r| r.referrer_id.as_deref() == Some(referrer_id))
            .cloned()
            .collect();

        by_registration(&mut children);
        Ok(children)
    }

    async fn find_roots(&self) -> RepositoryResult<Vec<Referral>> {
        let referrals = self.referrals.read().await;

        let mut roots: Vec<Referral> = referrals
            .values()
            .filter(|r| match &r.referrer_id {
                None => true,
                Some(parent) => !referrals.contains_key(parent),
            })
            .cloned()
            .collect();

        by_registration(&mut roots);
        Ok(roots)
    }

    async fn search(&self, term: &str, limit: i64) -> RepositoryResult<Vec<Referral>> {
        let needle = term.to_lowercase();
        let hit = |value: Option<&str>| {
            value
                .map(|v| v.to_lowercase().contains(&needle))
                .unwrap_or(false)
        };

        let mut found: Vec<Referral> = self
            .referrals
            .read()
            .await
            .values()
            .filter(|r| {
                hit(Some(&r.referral_id))
                    || hit(r.referral_nickname.as_deref())
                    || hit(r.referrer_nickname.as_deref())
                    || hit(r.referral_name.as_deref())
            })
            .cloned()
            .collect();

        found.sort_by(|a, b| {
            b.reg_date
                .cmp(&a.reg_date)
                .then_with(|| a.referral_id.cmp(&b.referral_id))
        });
        found.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(found)
    }

    async fn count(&self) -> RepositoryResult<i64> {
        Ok(self.referrals.read().await.len() as i64)
    }

    async fn recently_active_parents(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RepositoryResult<HashSet<String>> {
        Ok(self
            .referrals
            .read()
            .await
            .values()
            .filter(|r| within(r.reg_date, since, until))
            .filter_map(|r| r.referrer_id.clone())
            .collect())
    }

    async fn count_active(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let parents = self.recently_active_parents(since, until).await?;
        let referrals = self.referrals.read().await;

        Ok(parents
            .iter()
            .filter(|id| referrals.contains_key(id.as_str()))
            .count() as i64)
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert(&self, payment: Payment) -> RepositoryResult<Payment> {
        let mut payments = self.payments.write().await;

        if let Some(transaction_id) = &payment.transaction_id {
            if payments
                .iter()
                .any(|p| p.transaction_id.as_ref() == Some(transaction_id))
            {
                return Err(RepositoryError::Duplicate {
                    field: "transaction_id",
                    value: transaction_id.clone(),
                });
            }
        }

        payments.push(payment.clone());
        Ok(payment)
    }

    async fn find_by_user(&self, user_id: &str) -> RepositoryResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .payments
            .read()
            .await
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();

        payments.sort_by_key(|p| p.payment_date);
        Ok(payments)
    }

    async fn delete_by_user(&self, user_id: &str) -> RepositoryResult<u64> {
        let mut payments = self.payments.write().await;
        let before = payments.len();
        payments.retain(|p| p.user_id != user_id);

        Ok((before - payments.len()) as u64)
    }
}
