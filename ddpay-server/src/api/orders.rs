use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use ddpay_sdk::objects::CreateOrderRequest;
use serde::Deserialize;

use super::ApiError;
use crate::state::AppState;

/// `POST /order/create-transaction`: allocate a pending order.
///
/// Responds `201` with the amount the payer must send and where.
pub(super) async fn create_transaction(
    state: State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.engine.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[derive(Debug, Deserialize)]
pub(super) struct StatusQuery {
    #[serde(default)]
    order: String,
}

/// `GET /pay/status?order=<trade id>`: poll an order.
pub(super) async fn order_status(
    state: State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let trade_id = query.order.trim();
    if trade_id.is_empty() {
        return Err(ApiError::MissingParameter("order"));
    }
    let order = state.engine.get_order_status(trade_id).await?;
    Ok(Json(order.to_status_response()))
}
