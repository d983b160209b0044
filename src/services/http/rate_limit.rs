use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use super::{client_ip, error::AppError};

const SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Clone, Copy, Debug)]
struct Window {
    count: u32,
    first_request: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    /// Only set once the caller is blocked.
    pub reset_at: Option<DateTime<Utc>>,
}

/// Fixed-window request counter keyed by client IP.
pub struct RateLimiter {
    requests: DashMap<String, Window>,
    max_requests: u32,
    window: Duration,
    message: String,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: u64, message: &str) -> Self {
        Self {
            requests: DashMap::new(),
            max_requests,
            window: Duration::seconds(i64::try_from(window_secs).unwrap_or(i64::MAX / 1000)),
            message: message.to_string(),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn check(&self, ip: &str) -> Decision {
        self.check_at(ip, Utc::now())
    }

    pub fn check_at(&self, ip: &str, now: DateTime<Utc>) -> Decision {
        let mut entry = self.requests.entry(ip.to_string()).or_insert(Window {
            count: 0,
            first_request: now,
        });

        if now - entry.first_request > self.window {
            *entry = Window {
                count: 0,
                first_request: now,
            };
        }

        entry.count = entry.count.saturating_add(1);

        if entry.count > self.max_requests {
            Decision {
                allowed: false,
                remaining: 0,
                reset_at: Some(entry.first_request + self.window),
            }
        } else {
            Decision {
                allowed: true,
                remaining: self.max_requests - entry.count,
                reset_at: None,
            }
        }
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) {
        self.requests
            .retain(|_, window| now - window.first_request <= self.window);
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }

    pub fn start_sweep_task(self: &Arc<Self>) {
        let limiter = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));

            loop {
                interval.tick().await;
                limiter.sweep_at(Utc::now());
                log::debug!(
                    "Rate limiter sweep done, {} client(s) tracked.",
                    limiter.tracked_clients()
                );
            }
        });
    }
}

fn set_headers(headers: &mut HeaderMap, limit: u32, decision: &Decision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    if let Some(reset_at) = decision.reset_at {
        if let Ok(value) = HeaderValue::from_str(&reset_at.to_rfc3339()) {
            headers.insert("x-ratelimit-reset", value);
        }
    }
}

pub async fn limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    let decision = limiter.check(&ip);

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        log::warn!("Rate limit exceeded for IP: {}", ip);
        let retry_after = decision
            .reset_at
            .map(|reset_at| (reset_at - Utc::now()).num_seconds().max(0) as u64)
            .unwrap_or_default();

        AppError::RateLimited {
            message: limiter.message.clone(),
            retry_after,
        }
        .into_response()
    };

    set_headers(response.headers_mut(), limiter.max_requests(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit_until_window_expires() {
        let limiter = RateLimiter::new(3, 60, "slow down");
        let start = Utc::now();

        let remaining: Vec<u32> = (0..3)
            .map(|_| limiter.check_at("10.0.0.1", start).remaining)
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let blocked = limiter.check_at("10.0.0.1", start + Duration::seconds(10));
        assert!(!blocked.allowed);
        assert_eq!(blocked.reset_at, Some(start + Duration::seconds(60)));

        let after = limiter.check_at("10.0.0.1", start + Duration::seconds(61));
        assert!(after.allowed);
        assert_eq!(after.remaining, 2);
    }

    #[test]
    fn clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, 60, "slow down");
        let now = Utc::now();

        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
    }

    #[test]
    fn sweep_drops_expired_windows() {
        let limiter = RateLimiter::new(5, 60, "slow down");
        let now = Utc::now();

        limiter.check_at("old", now - Duration::seconds(120));
        limiter.check_at("fresh", now);
        limiter.sweep_at(now);

        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn headers_reflect_decision() {
        let mut headers = HeaderMap::new();
        let decision = Decision {
            allowed: false,
            remaining: 0,
            reset_at: Some(Utc::now()),
        };
        set_headers(&mut headers, 50, &decision);

        assert_eq!(headers["x-ratelimit-limit"], "50");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert!(headers.contains_key("x-ratelimit-reset"));
    }
}
