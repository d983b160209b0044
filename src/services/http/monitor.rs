use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Timelike, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;

use super::{client_ip, AppState};

const CLEANUP_INTERVAL_SECS: u64 = 5 * 60;
const IP_RETENTION_MINUTES: i64 = 60;
const TOP_N: usize = 10;
const BUSY_IP_REQUESTS: u64 = 100;
const SLOW_REQUEST_MS: u64 = 5_000;
const FALLBACK_ROUTE: &str = "<fallback>";

#[derive(Default)]
struct EndpointCounters {
    count: u64,
    total_time_ms: u64,
    errors: u64,
}

struct IpCounters {
    count: u64,
    last_seen: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct EndpointStats {
    pub endpoint: String,
    pub count: u64,
    pub avg_time_ms: u64,
    pub errors: u64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct IpStats {
    pub ip: String,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MonitorStats {
    pub total: u64,
    pub errors: u64,
    pub avg_response_time_ms: u64,
    pub top_endpoints: Vec<EndpointStats>,
    pub top_ips: Vec<IpStats>,
    /// `(hour of day UTC, requests)`, ordered by hour.
    pub hourly_distribution: Vec<(u32, u64)>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LoadPrediction {
    pub current_load: u64,
    pub predicted_next_hour: u64,
    pub peak_hour: u32,
    pub peak_requests: u64,
    pub recommendation: &'static str,
}

/// In-process request statistics. Nothing here is persisted.
#[derive(Default)]
pub struct RequestMonitor {
    total: AtomicU64,
    errors: AtomicU64,
    total_time_ms: AtomicU64,
    by_endpoint: DashMap<String, EndpointCounters>,
    by_ip: DashMap<String, IpCounters>,
    by_hour: DashMap<u32, u64>,
}

impl RequestMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, endpoint: &str, ip: &str, status: u16, elapsed_ms: u64) {
        self.record_at(endpoint, ip, status, elapsed_ms, Utc::now())
    }

    pub fn record_at(
        &self,
        endpoint: &str,
        ip: &str,
        status: u16,
        elapsed_ms: u64,
        now: DateTime<Utc>,
    ) {
        let failed = status >= 400;

        self.total.fetch_add(1, Ordering::Relaxed);
        self.total_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut counters = self.by_endpoint.entry(endpoint.to_string()).or_default();
            counters.count += 1;
            counters.total_time_ms += elapsed_ms;
            if failed {
                counters.errors += 1;
            }
        }

        let ip_count = {
            let mut counters = self.by_ip.entry(ip.to_string()).or_insert(IpCounters {
                count: 0,
                last_seen: now,
            });
            counters.count += 1;
            counters.last_seen = now;
            counters.count
        };

        *self.by_hour.entry(now.hour()).or_insert(0) += 1;

        if ip_count > BUSY_IP_REQUESTS {
            log::warn!("High activity from IP {}: {} requests", ip, ip_count);
        }
        if elapsed_ms > SLOW_REQUEST_MS {
            log::warn!("Slow request: {} took {}ms", endpoint, elapsed_ms);
        }
        if failed && endpoint.contains("/api/") {
            log::warn!("API error: {} returned {}", endpoint, status);
        }
    }

    /// Forgets clients idle for more than an hour.
    pub fn cleanup_at(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(IP_RETENTION_MINUTES);
        self.by_ip.retain(|_, counters| counters.last_seen >= cutoff);
    }

    pub fn stats(&self) -> MonitorStats {
        let total = self.total.load(Ordering::Relaxed);

        let mut top_endpoints: Vec<EndpointStats> = self
            .by_endpoint
            .iter()
            .map(|entry| EndpointStats {
                endpoint: entry.key().clone(),
                count: entry.count,
                avg_time_ms: entry.total_time_ms / entry.count.max(1),
                errors: entry.errors,
            })
            .collect();
        top_endpoints.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.endpoint.cmp(&b.endpoint)));
        top_endpoints.truncate(TOP_N);

        let mut top_ips: Vec<IpStats> = self
            .by_ip
            .iter()
            .map(|entry| IpStats {
                ip: entry.key().clone(),
                count: entry.count,
                last_seen: entry.last_seen,
            })
            .collect();
        top_ips.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip.cmp(&b.ip)));
        top_ips.truncate(TOP_N);

        let mut hourly_distribution: Vec<(u32, u64)> = self
            .by_hour
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        hourly_distribution.sort_unstable();

        MonitorStats {
            total,
            errors: self.errors.load(Ordering::Relaxed),
            avg_response_time_ms: self.total_time_ms.load(Ordering::Relaxed) / total.max(1),
            top_endpoints,
            top_ips,
            hourly_distribution,
        }
    }

    pub fn prediction_at(&self, stats: &MonitorStats, now: DateTime<Utc>) -> LoadPrediction {
        let current_hour = now.hour();
        let current_load = stats
            .hourly_distribution
            .iter()
            .find(|(hour, _)| *hour == current_hour)
            .map(|(_, count)| *count)
            .unwrap_or(0);

        let (peak_hour, peak_requests) = stats
            .hourly_distribution
            .iter()
            .fold((0, 0), |peak, &(hour, count)| {
                if count > peak.1 {
                    (hour, count)
                } else {
                    peak
                }
            });

        LoadPrediction {
            current_load,
            predicted_next_hour: (current_load as f64 * 1.1).round() as u64,
            peak_hour,
            peak_requests,
            recommendation: recommendation(stats),
        }
    }

    pub fn start_cleanup_task(self: &Arc<Self>) {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));

            loop {
                interval.tick().await;
                monitor.cleanup_at(Utc::now());
            }
        });
    }
}

fn recommendation(stats: &MonitorStats) -> &'static str {
    if stats.avg_response_time_ms > 2_000 {
        return "High response time. Consider database optimization or caching.";
    }
    if stats.total > 0 && stats.errors as f64 / stats.total as f64 > 0.05 {
        return "High error rate. Check the logs and system stability.";
    }
    if stats.top_ips.first().map(|ip| ip.count > 500).unwrap_or(false) {
        return "Suspicious activity from a single IP. Consider blocking it.";
    }
    "System is stable."
}

/// Route template for matched requests. Everything else shares one label so
/// arbitrary paths cannot grow the endpoint table.
fn endpoint_label(request: &Request) -> String {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(MatchedPath::as_str)
        .unwrap_or(FALLBACK_ROUTE);

    format!("{} {}", request.method(), route)
}

pub async fn record(
    State(monitor): State<Arc<RequestMonitor>>,
    request: Request,
    next: Next,
) -> Response {
    let started = std::time::Instant::now();
    let endpoint = endpoint_label(&request);
    let ip = client_ip(&request);

    let response = next.run(request).await;

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    monitor.record(&endpoint, &ip, response.status().as_u16(), elapsed_ms);

    response
}

pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let stats = state.monitor.stats();
    let prediction = state.monitor.prediction_at(&stats, now);

    Json(json!({
        "status": true,
        "data": {
            "stats": stats,
            "prediction": prediction,
            "timestamp": now.to_rfc3339(),
        }
    }))
}
