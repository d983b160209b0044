use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{error::AppError, request, AppState, Payload};
use crate::models::payments::NewPayment;
use crate::services::payments::PaymentRequest;

pub async fn create_payment(
    State(state): State<AppState>,
    Payload(payment): Payload<NewPayment>,
) -> Result<impl IntoResponse, AppError> {
    let payment = request(&state.channels.payments, |response| {
        PaymentRequest::Create { payment, response }
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Payment created successfully",
            "data": payment,
        })),
    ))
}

pub async fn get_user_payments(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let payments = request(&state.channels.payments, |response| {
        PaymentRequest::ListByUser { user_id, response }
    })
    .await?;

    Ok(Json(json!({ "status": true, "data": payments })))
}
