use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::ValidationError;
use crate::repositories::{Repositories, RepositoryError};
use crate::settings::Settings;

pub mod http;
pub mod payments;
pub mod referrals;
pub mod tree;

const CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Referral not found: {0}")]
    NotFound(String),
    #[error("Referral with referral_id \"{0}\" not found. Payment cannot be created.")]
    ReferrerNotFound(String),
    #[error("Duplicate {field}: {value}")]
    Duplicate { field: &'static str, value: String },
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl ServiceError {
    pub fn repository(service: &str, error: RepositoryError) -> Self {
        match error {
            RepositoryError::Duplicate { field, value } => ServiceError::Duplicate { field, value },
            other => ServiceError::Repository(service.to_string(), other.to_string()),
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Senders for every running service; the HTTP layer only talks to these.
#[derive(Clone)]
pub struct ServiceChannels {
    pub referrals: mpsc::Sender<referrals::ReferralRequest>,
    pub payments: mpsc::Sender<payments::PaymentRequest>,
}

pub fn spawn_services(repositories: Repositories, settings: &Settings) -> ServiceChannels {
    let (referral_tx, mut referral_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (payment_tx, mut payment_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut referral_service = referrals::ReferralService::new();
    let mut payment_service = payments::PaymentService::new();

    log::info!("Starting referral service.");
    let referral_handler = referrals::ReferralRequestHandler::new(
        repositories.referrals.clone(),
        repositories.payments.clone(),
        settings.tree.max_depth,
        tree::ActivityWindow::days(settings.tree.activity_window_days),
    );
    tokio::spawn(async move {
        referral_service
            .run(referral_handler, &mut referral_rx)
            .await;
    });

    log::info!("Starting payment service.");
    let payment_handler =
        payments::PaymentRequestHandler::new(repositories.referrals, repositories.payments);
    tokio::spawn(async move {
        payment_service.run(payment_handler, &mut payment_rx).await;
    });

    ServiceChannels {
        referrals: referral_tx,
        payments: payment_tx,
    }
}

pub async fn start_services(
    repositories: Repositories,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let channels = spawn_services(repositories, &settings);

    log::info!("Starting HTTP server.");
    http::start_http_server(channels, settings).await?;

    Ok(())
}
