//! HTTP handlers.
//!
//! # Endpoints
//!
//! - `POST /order/create-transaction` – allocate a pending order
//! - `GET  /pay/status?order=`        – poll an order by trade id
//! - `GET  /watchers`                 – scan counters of running chain watchers

mod orders;
mod watchers;

use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use ddpay_core::orders::OrderError;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/order/create-transaction", post(orders::create_transaction))
        .route("/pay/status", get(orders::order_status))
        .route("/watchers", get(watchers::list_watchers))
}

/// Errors returned by API handlers.
#[derive(Debug)]
enum ApiError {
    /// The order engine rejected or failed the request.
    Order(OrderError),
    /// A required query parameter was empty.
    MissingParameter(&'static str),
}

impl From<OrderError> for ApiError {
    fn from(e: OrderError) -> Self {
        ApiError::Order(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::MissingParameter(name) => {
                (StatusCode::BAD_REQUEST, format!("missing parameter: {name}")).into_response()
            }
            ApiError::Order(OrderError::NotFound) => {
                (StatusCode::NOT_FOUND, "order not found").into_response()
            }
            ApiError::Order(e @ (OrderError::InvalidRequest(_) | OrderError::UnsupportedChain(_))) => {
                (StatusCode::BAD_REQUEST, e.to_string()).into_response()
            }
            ApiError::Order(e @ OrderError::DuplicateOrder(_)) => {
                (StatusCode::CONFLICT, e.to_string()).into_response()
            }
            ApiError::Order(e) => {
                tracing::error!(error = %e, "Order API internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use ddpay_core::config::{ChainConfig, OrderConfig, RetryPolicy, ScanStrategy};
    use ddpay_core::orders::OrderEngine;
    use ddpay_core::processors::WatcherRegistry;
    use ddpay_core::events::LoggingHook;
    use ddpay_core::store::MemoryStore;
    use ddpay_core::wallet::{MemoryWalletRepository, MerchantWalletDirectory, WalletDeriver};
    use ddpay_sdk::objects::{Chain, OrderResult, OrderStatusResponse, PaymentStatus};
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use tower::ServiceExt;
    use url::Url;

    const MNEMONIC: &str = "test test test test test test test test test test test junk";

    fn bsc() -> ChainConfig {
        ChainConfig {
            chain: Chain::Bsc,
            rpc_url: Url::parse("http://127.0.0.1:8545").unwrap(),
            token_contract: "0x55d398326f99059fF775485246999027B3197955"
                .parse::<Address>()
                .unwrap(),
            token_decimals: 18,
            confirmations: 20,
            poll_delay: Duration::from_secs(2),
            workers: 2,
            rpc_timeout: Duration::from_secs(5),
            strategy: ScanStrategy::FullBlock,
            retry: RetryPolicy::default(),
        }
    }

    fn app() -> Router {
        let store = Arc::new(MemoryStore::new());
        let deriver = WalletDeriver::init_global(MNEMONIC).unwrap();
        let directory =
            MerchantWalletDirectory::new(Arc::new(MemoryWalletRepository::new()), deriver);
        let config = OrderConfig::new(Url::parse("https://pay.example.com/pay").unwrap());
        let engine = OrderEngine::new(store.clone(), directory, [bsc()], config);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry = WatcherRegistry::with_rpc_sources(
            [bsc()],
            store,
            Arc::new(LoggingHook),
            Duration::from_secs(3600),
            shutdown_rx,
        );
        router().with_state(AppState::new(Arc::new(engine), Arc::new(registry)))
    }

    fn create_request(body: &str) -> Request<Body> {
        Request::post("/order/create-transaction")
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_create_then_poll_status() {
        let app = app();

        let response = app
            .clone()
            .oneshot(create_request(
                r#"{"pid": 42, "trade_type": "bsc", "order_id": "A1", "amount": "10.00"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: OrderResult = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(created.trade_id, "bsc_42_A1");
        assert_eq!(created.actual_amount, Decimal::new(1001, 2));
        assert_eq!(created.payment_url, "https://pay.example.com/pay/A1");

        let response = app
            .oneshot(
                Request::get("/pay/status?order=bsc_42_A1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status: OrderStatusResponse =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(status.merchant_id, 42);
        assert_eq!(status.status, PaymentStatus::Pending);
        assert_eq!(status.address, created.address);
    }

    #[tokio::test]
    async fn test_status_errors() {
        let app = app();

        let response = app
            .clone()
            .oneshot(
                Request::get("/pay/status?order=bsc_42_missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_bytes(response).await, b"order not found");

        let response = app
            .oneshot(Request::get("/pay/status?order=").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_rejections() {
        let app = app();

        let response = app
            .clone()
            .oneshot(create_request(
                r#"{"pid": 42, "trade_type": "pol", "order_id": "A1", "amount": "10.00"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(create_request(
                r#"{"pid": 42, "trade_type": "bsc", "order_id": "A1", "amount": "0"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(create_request(
                r#"{"pid": 3000000000, "trade_type": "bsc", "order_id": "A1", "amount": "1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = r#"{"pid": 7, "trade_type": "bsc", "order_id": "D1", "amount": "1"}"#;
        let response = app.clone().oneshot(create_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = app.oneshot(create_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_watchers_empty_until_started() {
        let response = app()
            .oneshot(Request::get("/watchers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"[]");
    }
}
