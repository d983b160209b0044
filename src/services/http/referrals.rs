use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{error::AppError, request, AppState, Payload};
use crate::models::referrals::{NewReferral, ReferralPatch};
use crate::services::{referrals::ReferralRequest, tree::summarize};

const DEFAULT_SEARCH_LIMIT: i64 = 50;
const MAX_SEARCH_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
    /// Kept as text so a bad value falls back to the default.
    limit: Option<String>,
}

impl SearchParams {
    fn limit(&self) -> i64 {
        self.limit
            .as_deref()
            .and_then(|limit| limit.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT)
    }
}

pub async fn create_referral(
    State(state): State<AppState>,
    Payload(referral): Payload<NewReferral>,
) -> Result<impl IntoResponse, AppError> {
    let referral = request(&state.channels.referrals, |response| {
        ReferralRequest::Create { referral, response }
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Referral created successfully",
            "data": referral,
        })),
    ))
}

pub async fn upsert_referral(
    State(state): State<AppState>,
    Payload(referral): Payload<NewReferral>,
) -> Result<impl IntoResponse, AppError> {
    let referral = request(&state.channels.referrals, |response| {
        ReferralRequest::Upsert { referral, response }
    })
    .await?;

    Ok(Json(json!({
        "message": "Referral saved successfully",
        "data": referral,
    })))
}

pub async fn get_referral(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let referral = request(&state.channels.referrals, |response| ReferralRequest::Get {
        id,
        response,
    })
    .await?;

    Ok(Json(json!({ "status": true, "data": referral })))
}

pub async fn update_referral(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Payload(patch): Payload<ReferralPatch>,
) -> Result<impl IntoResponse, AppError> {
    if patch.is_empty() {
        return Err(AppError::EmptyBody);
    }

    let referral = request(&state.channels.referrals, |response| {
        ReferralRequest::Update {
            id,
            patch,
            response,
        }
    })
    .await?;

    Ok(Json(json!({
        "message": "Referral updated successfully",
        "data": referral,
    })))
}

pub async fn delete_referral(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let referral = request(&state.channels.referrals, |response| {
        ReferralRequest::Delete { id, response }
    })
    .await?;

    Ok(Json(json!({
        "message": "Referral deleted successfully",
        "data": referral,
    })))
}

pub async fn search_referrals(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, AppError> {
    let term = params.q.trim().to_string();
    let limit = params.limit();

    let results = if term.is_empty() {
        Vec::new()
    } else {
        request(&state.channels.referrals, |response| {
            ReferralRequest::Search {
                term,
                limit,
                response,
            }
        })
        .await?
    };

    Ok(Json(json!({
        "status": true,
        "data": results,
        "meta": { "count": results.len() },
    })))
}

pub async fn get_forest(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let started = Instant::now();

    let forest = request(&state.channels.referrals, |response| {
        ReferralRequest::Forest { response }
    })
    .await?;

    let summary = summarize(&forest);
    let execution_time_ms = started.elapsed().as_millis() as u64;
    log::debug!(
        "Built referral forest: {} root(s), {} node(s) in {}ms.",
        forest.len(),
        summary.total,
        execution_time_ms
    );

    Ok(Json(json!({
        "status": true,
        "data": forest,
        "meta": {
            "count": forest.len(),
            "total": summary.total,
            "levels": summary.levels,
            "execution_time_ms": execution_time_ms,
        },
    })))
}

pub async fn get_tree(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let started = Instant::now();

    let tree = request(&state.channels.referrals, |response| ReferralRequest::Tree {
        id: id.clone(),
        response,
    })
    .await?;

    let summary = summarize(&tree);

    Ok(Json(json!({
        "status": true,
        "data": tree,
        "meta": {
            "referral_id": id,
            "count": tree.len(),
            "total": summary.total,
            "levels": summary.levels,
            "execution_time_ms": started.elapsed().as_millis() as u64,
        },
    })))
}

pub async fn get_activity_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let stats = request(&state.channels.referrals, |response| {
        ReferralRequest::ActivityStats { response }
    })
    .await?;

    Ok(Json(json!({ "status": true, "data": stats })))
}

pub async fn get_user_activity_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let stats = request(&state.channels.referrals, |response| {
        ReferralRequest::UserActivityStats { id, response }
    })
    .await?;

    Ok(Json(json!({ "status": true, "data": stats })))
}
