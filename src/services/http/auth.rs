use std::{net::IpAddr, sync::Arc};

use axum::{
    extract::{Query, Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{client_addr, error::AppError};
use crate::settings::Auth;

pub const API_KEY_HEADER: &str = "x-api-key";

const MISSING_KEY_HINT: &str = "Add x-api-key header or api_key query parameter";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessLevel {
    FullAccess,
    ReadOnly,
}

/// Keys are kept as SHA-256 digests only.
#[derive(Clone, Default)]
pub struct ApiKeys {
    secret: Option<[u8; 32]>,
    readonly: Option<[u8; 32]>,
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

fn configured(key: Option<&str>) -> Option<[u8; 32]> {
    key.map(str::trim).filter(|key| !key.is_empty()).map(digest)
}

impl ApiKeys {
    pub fn new(secret: Option<&str>, readonly: Option<&str>) -> Self {
        Self {
            secret: configured(secret),
            readonly: configured(readonly),
        }
    }

    pub fn from_settings(auth: &Auth) -> Self {
        Self::new(auth.api_secret_key.as_deref(), auth.api_readonly_key.as_deref())
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some() || self.readonly.is_some()
    }

    pub fn authorize(&self, key: Option<&str>, write: bool) -> Result<AccessLevel, AppError> {
        let key = match key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => key,
            None => {
                return Err(AppError::Unauthorized {
                    message: "API key required",
                    hint: Some(MISSING_KEY_HINT),
                })
            }
        };

        if !self.is_configured() {
            return Err(AppError::Misconfigured("API keys are not configured on the server"));
        }

        let presented = digest(key);
        if self.secret == Some(presented) {
            return Ok(AccessLevel::FullAccess);
        }
        if self.readonly == Some(presented) {
            if write {
                return Err(AppError::Unauthorized {
                    message: "Valid API_SECRET_KEY required for write operations",
                    hint: None,
                });
            }
            return Ok(AccessLevel::ReadOnly);
        }

        Err(AppError::Unauthorized {
            message: "Invalid API key",
            hint: None,
        })
    }
}

#[derive(Deserialize)]
struct KeyQuery {
    api_key: Option<String>,
}

fn presented_key(request: &Request) -> Option<String> {
    let header = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    header.or_else(|| {
        Query::<KeyQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(query)| query.api_key)
    })
}

fn is_write(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

pub async fn require_api_key(
    State(keys): State<ApiKeys>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = presented_key(&request);
    let write = is_write(request.method());

    let level = keys.authorize(key.as_deref(), write).map_err(|e| {
        log::warn!("Rejected {} {}: {}", request.method(), request.uri().path(), e);
        e
    })?;

    request.extensions_mut().insert(level);
    Ok(next.run(request).await)
}

/// An empty list lets every client through.
pub async fn ip_allowlist(
    State(allowed): State<Arc<Vec<IpAddr>>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if allowed.is_empty() {
        return Ok(next.run(request).await);
    }

    match client_addr(&request) {
        Some(ip) if allowed.contains(&ip) => Ok(next.run(request).await),
        ip => {
            log::warn!("Access denied for IP: {:?}", ip);
            Err(AppError::Forbidden)
        }
    }
}
