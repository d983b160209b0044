use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRequest, Request},
    http::{header::CONTENT_TYPE, HeaderMap},
    middleware,
    routing::{get, post},
    Form, Router,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use super::{ServiceChannels, ServiceError};
use crate::settings::Settings;

pub mod auth;
pub mod error;
pub mod monitor;
pub mod payments;
pub mod rate_limit;
pub mod referrals;

use auth::ApiKeys;
use error::AppError;
use monitor::RequestMonitor;
use rate_limit::RateLimiter;

const COMPONENT: &str = "HttpServer";

#[derive(Clone)]
pub struct AppState {
    pub channels: ServiceChannels,
    pub keys: ApiKeys,
    pub monitor: Arc<RequestMonitor>,
    pub api_limiter: Arc<RateLimiter>,
    pub web_limiter: Arc<RateLimiter>,
    pub allowed_ips: Arc<Vec<IpAddr>>,
    pub static_dir: String,
}

impl AppState {
    pub fn new(channels: ServiceChannels, settings: &Settings) -> Self {
        let limits = &settings.rate_limit;

        let allowed_ips = settings
            .auth
            .allowed_ips
            .iter()
            .filter_map(|ip| match ip.trim().parse::<IpAddr>() {
                Ok(ip) => Some(ip.to_canonical()),
                Err(e) => {
                    log::warn!("Ignoring allowed IP {:?}: {}", ip, e);
                    None
                }
            })
            .collect();

        let keys = ApiKeys::from_settings(&settings.auth);
        if !keys.is_configured() {
            log::warn!("No API keys configured, every /api request will fail.");
        }

        Self {
            channels,
            keys,
            monitor: Arc::new(RequestMonitor::new()),
            api_limiter: Arc::new(RateLimiter::new(
                limits.api_max_requests,
                limits.api_window_secs,
                "Too many API requests, please try again later.",
            )),
            web_limiter: Arc::new(RateLimiter::new(
                limits.web_max_requests,
                limits.web_window_secs,
                "Too many requests, please try again later.",
            )),
            allowed_ips: Arc::new(allowed_ips),
            static_dir: settings.server.static_dir.clone(),
        }
    }

    pub fn start_background_tasks(&self) {
        self.api_limiter.start_sweep_task();
        self.web_limiter.start_sweep_task();
        self.monitor.start_cleanup_task();
    }
}

pub fn client_addr(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical())
}

pub fn client_ip(request: &Request) -> String {
    client_addr(request)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Sends a request to a service and waits for its reply.
pub async fn request<R, T>(
    channel: &mpsc::Sender<R>,
    build: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, AppError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel.send(build(response_tx)).await.map_err(|e| {
        ServiceError::Communication(COMPONENT.to_string(), format!("Failed to process request: {e}"))
    })?;

    let result = response_rx.await.map_err(|e| {
        ServiceError::Communication(COMPONENT.to_string(), format!("Failed to receive response: {e}"))
    })?;

    Ok(result?)
}

/// Request body decoded from JSON or from an urlencoded form, depending on
/// `Content-Type`. Must carry at least one field.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        if is_form(request.headers()) {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(request, state)
                .await
                .map_err(|e| AppError::MalformedPayload(e.body_text()))?;

            return parse_form(pairs).map(Payload);
        }

        let body = Bytes::from_request(request, state)
            .await
            .map_err(|e| AppError::MalformedPayload(e.body_text()))?;

        parse_body(&body).map(Payload)
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::EmptyBody);
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| AppError::MalformedPayload(e.to_string()))?;

    match value {
        Value::Object(fields) => decode_fields(fields),
        _ => Err(AppError::MalformedPayload(
            "expected a JSON object".to_string(),
        )),
    }
}

/// Form values all arrive as text; the model deserializers accept that.
pub fn parse_form<T: DeserializeOwned>(pairs: Vec<(String, String)>) -> Result<T, AppError> {
    let fields = pairs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    decode_fields(fields)
}

fn decode_fields<T: DeserializeOwned>(fields: Map<String, Value>) -> Result<T, AppError> {
    if fields.is_empty() {
        return Err(AppError::EmptyBody);
    }

    serde_json::from_value(Value::Object(fields)).map_err(|e| AppError::InvalidField(e.to_string()))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/referrals", post(referrals::create_referral))
        .route("/api/referrals/upsert", post(referrals::upsert_referral))
        .route("/api/referrals/search", get(referrals::search_referrals))
        .route("/api/referrals/tree", get(referrals::get_forest))
        .route(
            "/api/referrals/activity-stats",
            get(referrals::get_activity_stats),
        )
        .route(
            "/api/referrals/{id}",
            get(referrals::get_referral)
                .put(referrals::update_referral)
                .delete(referrals::delete_referral),
        )
        .route("/api/referrals/{id}/tree", get(referrals::get_tree))
        .route(
            "/api/referrals/{id}/activity-stats",
            get(referrals::get_user_activity_stats),
        )
        .route("/api/payments", post(payments::create_payment))
        .route(
            "/api/payments/user/{user_id}",
            get(payments::get_user_payments),
        )
        .route("/api/monitor/stats", get(monitor::get_stats))
        .route_layer(middleware::from_fn_with_state(
            state.keys.clone(),
            auth::require_api_key,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.api_limiter.clone(),
            rate_limit::limit,
        ));

    let web: Router = Router::new()
        .fallback_service(ServeDir::new(&state.static_dir))
        .layer(middleware::from_fn_with_state(
            state.web_limiter.clone(),
            rate_limit::limit,
        ));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(api)
        .fallback_service(web)
        .layer(middleware::from_fn_with_state(
            state.monitor.clone(),
            monitor::record,
        ))
        .layer(middleware::from_fn_with_state(
            state.allowed_ips.clone(),
            auth::ip_allowlist,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), anyhow::Error> {
    state.start_background_tasks();
    let app = router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

pub async fn start_http_server(
    channels: ServiceChannels,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let state = AppState::new(channels, &settings);

    let listener = TcpListener::bind(&settings.server.listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    serve(listener, state).await
}
