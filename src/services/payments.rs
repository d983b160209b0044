use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::payments::{NewPayment, Payment};
use crate::repositories::{PaymentRepository, ReferralRepository};

const SERVICE_NAME: &str = "PaymentService";

pub enum PaymentRequest {
    Create {
        payment: NewPayment,
        response: oneshot::Sender<Result<Payment, ServiceError>>,
    },
    ListByUser {
        user_id: String,
        response: oneshot::Sender<Result<Vec<Payment>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct PaymentRequestHandler {
    referrals: Arc<dyn ReferralRepository>,
    payments: Arc<dyn PaymentRepository>,
}

impl PaymentRequestHandler {
    pub fn new(
        referrals: Arc<dyn ReferralRepository>,
        payments: Arc<dyn PaymentRepository>,
    ) -> Self {
        Self {
            referrals,
            payments,
        }
    }

    async fn create_payment(&self, new: NewPayment) -> Result<Payment, ServiceError> {
        let payment = new.into_payment(Utc::now())?;

        let payer = self
            .referrals
            .find_by_id(&payment.user_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE_NAME, e))?;
        if payer.is_none() {
            return Err(ServiceError::ReferrerNotFound(payment.user_id));
        }

        let payment = self
            .payments
            .insert(payment)
            .await
            .map_err(|e| ServiceError::repository(SERVICE_NAME, e))?;

        log::info!(
            "Recorded {} {} payment for {} ({}).",
            payment.amount,
            payment.currency,
            payment.user_id,
            payment.status
        );
        Ok(payment)
    }

    async fn payments_by_user(&self, user_id: &str) -> Result<Vec<Payment>, ServiceError> {
        self.payments
            .find_by_user(user_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE_NAME, e))
    }
}

#[async_trait]
impl RequestHandler<PaymentRequest> for PaymentRequestHandler {
    async fn handle_request(&self, request: PaymentRequest) {
        match request {
            PaymentRequest::Create { payment, response } => {
                let payment = self.create_payment(payment).await;
                let _ = response.send(payment);
            }
            PaymentRequest::ListByUser { user_id, response } => {
                let payments = self.payments_by_user(&user_id).await;
                let _ = response.send(payments);
            }
        }
    }
}

pub struct PaymentService;

impl PaymentService {
    pub fn new() -> Self {
        PaymentService {}
    }
}

#[async_trait]
impl Service<PaymentRequest, PaymentRequestHandler> for PaymentService {}
