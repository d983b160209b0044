use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;

use super::tree::{self, ActivityWindow};
use super::{RequestHandler, Service, ServiceError};
use crate::models::{
    referrals::{NewReferral, Referral, ReferralPatch},
    tree::{ActivityStats, ReferralNode},
    ValidationError,
};
use crate::repositories::{PaymentRepository, ReferralRepository};

const SERVICE_NAME: &str = "ReferralService";

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

pub enum ReferralRequest {
    Create {
        referral: NewReferral,
        response: Reply<Referral>,
    },
    Upsert {
        referral: NewReferral,
        response: Reply<Referral>,
    },
    Get {
        id: String,
        response: Reply<Referral>,
    },
    Update {
        id: String,
        patch: ReferralPatch,
        response: Reply<Referral>,
    },
    Delete {
        id: String,
        response: Reply<Referral>,
    },
    Tree {
        id: String,
        response: Reply<Vec<ReferralNode>>,
    },
    Forest {
        response: Reply<Vec<ReferralNode>>,
    },
    Search {
        term: String,
        limit: i64,
        response: Reply<Vec<Referral>>,
    },
    ActivityStats {
        response: Reply<ActivityStats>,
    },
    UserActivityStats {
        id: String,
        response: Reply<ActivityStats>,
    },
}

#[derive(Clone)]
pub struct ReferralRequestHandler {
    referrals: Arc<dyn ReferralRepository>,
    payments: Arc<dyn PaymentRepository>,
    max_depth: usize,
    window: ActivityWindow,
}

impl ReferralRequestHandler {
    pub fn new(
        referrals: Arc<dyn ReferralRepository>,
        payments: Arc<dyn PaymentRepository>,
        max_depth: usize,
        window: ActivityWindow,
    ) -> Self {
        Self {
            referrals,
            payments,
            max_depth,
            window,
        }
    }

    fn repository_error(e: crate::repositories::RepositoryError) -> ServiceError {
        ServiceError::repository(SERVICE_NAME, e)
    }

    async fn create_referral(&self, new: NewReferral) -> Result<Referral, ServiceError> {
        let referral = new.into_referral(Utc::now())?;

        let referral = self
            .referrals
            .insert(referral)
            .await
            .map_err(Self::repository_error)?;

        log::info!(
            "Created referral {} (referrer: {}).",
            referral.referral_id,
            referral.referrer_id.as_deref().unwrap_or("-")
        );
        Ok(referral)
    }

    /// Creates the referral, or merges the fields present in `new` into the
    /// stored one.
    async fn upsert_referral(&self, new: NewReferral) -> Result<Referral, ServiceError> {
        let now = Utc::now();
        let referral_id = new
            .referral_id
            .clone()
            .ok_or(ValidationError::MissingReferralId)?;

        let existing = self
            .referrals
            .find_by_id(&referral_id)
            .await
            .map_err(Self::repository_error)?;

        let referral = match existing {
            Some(mut stored) => {
                new.into_patch().apply(&mut stored, now)?;
                stored
            }
            None => new.into_referral(now)?,
        };

        self.referrals
            .upsert(referral)
            .await
            .map_err(Self::repository_error)
    }

    async fn get_referral(&self, id: &str) -> Result<Referral, ServiceError> {
        self.referrals
            .find_by_id(id)
            .await
            .map_err(Self::repository_error)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    async fn update_referral(
        &self,
        id: &str,
        patch: ReferralPatch,
    ) -> Result<Referral, ServiceError> {
        let mut referral = self.get_referral(id).await?;
        patch.apply(&mut referral, Utc::now())?;

        self.referrals
            .update(referral)
            .await
            .map_err(Self::repository_error)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// Payments go first so a failure never leaves payments pointing at a
    /// deleted referral.
    async fn delete_referral(&self, id: &str) -> Result<Referral, ServiceError> {
        self.get_referral(id).await?;

        let removed_payments = self
            .payments
            .delete_by_user(id)
            .await
            .map_err(Self::repository_error)?;

        let referral = self
            .referrals
            .delete(id)
            .await
            .map_err(Self::repository_error)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;

        log::info!(
            "Deleted referral {} and {} payment(s).",
            id,
            removed_payments
        );
        Ok(referral)
    }

    async fn active_referrers(&self) -> Result<std::collections::HashSet<String>, ServiceError> {
        let (since, until) = self.window.bounds(Utc::now());

        self.referrals
            .recently_active_parents(since, until)
            .await
            .map_err(Self::repository_error)
    }

    async fn referral_tree(&self, id: &str) -> Result<Vec<ReferralNode>, ServiceError> {
        self.get_referral(id).await?;
        let active = self.active_referrers().await?;

        tree::build_tree(self.referrals.as_ref(), id, self.max_depth, &active)
            .await
            .map_err(Self::repository_error)
    }

    async fn referral_forest(&self) -> Result<Vec<ReferralNode>, ServiceError> {
        let active = self.active_referrers().await?;

        tree::build_forest(self.referrals.as_ref(), self.max_depth, &active)
            .await
            .map_err(Self::repository_error)
    }

    async fn search_referrals(&self, term: &str, limit: i64) -> Result<Vec<Referral>, ServiceError> {
        self.referrals
            .search(term, limit)
            .await
            .map_err(Self::repository_error)
    }

    async fn activity_stats(&self) -> Result<ActivityStats, ServiceError> {
        let (since, until) = self.window.bounds(Utc::now());

        let total = self
            .referrals
            .count()
            .await
            .map_err(Self::repository_error)?;
        let active = self
            .referrals
            .count_active(since, until)
            .await
            .map_err(Self::repository_error)?;

        let total = usize::try_from(total).unwrap_or_default();
        let active = usize::try_from(active).unwrap_or_default().min(total);

        Ok(ActivityStats {
            total,
            active,
            inactive: total - active,
            window_days: self.window.len_days(),
        })
    }

    async fn user_activity_stats(&self, id: &str) -> Result<ActivityStats, ServiceError> {
        let tree = self.referral_tree(id).await?;

        Ok(tree::activity_of(tree::summarize(&tree), self.window))
    }
}

#[async_trait]
impl RequestHandler<ReferralRequest> for ReferralRequestHandler {
    async fn handle_request(&self, request: ReferralRequest) {
        match request {
            ReferralRequest::Create { referral, response } => {
                let result = self.create_referral(referral).await;
                let _ = response.send(result);
            }
            ReferralRequest::Upsert { referral, response } => {
                let result = self.upsert_referral(referral).await;
                let _ = response.send(result);
            }
            ReferralRequest::Get { id, response } => {
                let result = self.get_referral(&id).await;
                let _ = response.send(result);
            }
            ReferralRequest::Update {
                id,
                patch,
                response,
            } => {
                let result = self.update_referral(&id, patch).await;
                let _ = response.send(result);
            }
            ReferralRequest::Delete { id, response } => {
                let result = self.delete_referral(&id).await;
                let _ = response.send(result);
            }
            ReferralRequest::Tree { id, response } => {
                let result = self.referral_tree(&id).await;
                let _ = response.send(result);
            }
            ReferralRequest::Forest { response } => {
                let result = self.referral_forest().await;
                let _ = response.send(result);
            }
            ReferralRequest::Search {
                term,
                limit,
                response,
            } => {
                let result = self.search_referrals(&term, limit).await;
                let _ = response.send(result);
            }
            ReferralRequest::ActivityStats { response } => {
                let result = self.activity_stats().await;
                let _ = response.send(result);
            }
            ReferralRequest::UserActivityStats { id, response } => {
                let result = self.user_activity_stats(&id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct ReferralService;

impl ReferralService {
    pub fn new() -> Self {
        ReferralService {}
    }
}

#[async_trait]
impl Service<ReferralRequest, ReferralRequestHandler> for ReferralService {}
