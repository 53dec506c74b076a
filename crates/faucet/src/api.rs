//! HTTP API for faucet service

use crate::error::{FaucetError, FaucetResult};
use crate::service::{AddressStatus, DripAccepted, DripRequest, FaucetService, FaucetStats};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the HTTP router. Handlers need `ConnectInfo<SocketAddr>`, so serve
/// with `into_make_service_with_connect_info`.
pub fn router(service: Arc<FaucetService>) -> Router {
    let config = service.config();
    let cors_enabled = config.cors_enabled;
    let metrics_enabled = config.metrics_enabled;

    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/faucet/drip", post(drip_handler))
        .route("/api/faucet/status/:address", get(status_handler))
        .route("/api/faucet/tokens", get(tokens_handler))
        .route("/api/faucet/stats", get(stats_handler));

    if metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    let mut app = app.with_state(service).layer(TraceLayer::new_for_http());

    if cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
        info!("CORS enabled");
    }

    app
}

/// Drip handler
pub async fn drip_handler(
    State(service): State<Arc<FaucetService>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: Result<Json<DripRequest>, JsonRejection>,
) -> FaucetResult<Json<DripAccepted>> {
    let Json(request) = payload.map_err(|e| FaucetError::InvalidRequest(e.body_text()))?;

    match service.request_drip(request, &addr.ip().to_string()).await {
        Ok(accepted) => Ok(Json(accepted)),
        Err(e) => {
            if e.is_infrastructure() {
                error!("Drip request from {} failed: {:?}", addr, e);
            }
            Err(e)
        }
    }
}

/// Per-token cooldown status for an address
pub async fn status_handler(
    State(service): State<Arc<FaucetService>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(address): Path<String>,
) -> FaucetResult<Json<AddressStatus>> {
    let status = service.status(&address, &addr.ip().to_string()).await?;
    Ok(Json(status))
}

pub async fn tokens_handler(State(service): State<Arc<FaucetService>>) -> FaucetResult<impl IntoResponse> {
    let tokens = service.tokens().await?;
    Ok(Json(serde_json::json!({ "tokens": tokens })))
}

pub async fn stats_handler(State(service): State<Arc<FaucetService>>) -> FaucetResult<Json<FaucetStats>> {
    Ok(Json(service.stats()?))
}

/// Health check handler
pub async fn health_handler(State(service): State<Arc<FaucetService>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "wallet": service.faucet_address().to_string(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn metrics_handler(State(service): State<Arc<FaucetService>>) -> FaucetResult<impl IntoResponse> {
    let body = service.metrics().gather()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// Root handler with info
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Drip Faucet",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Multi-token testnet faucet",
        "endpoints": {
            "POST /api/faucet/drip": "Request tokens",
            "GET /api/faucet/status/:address": "Cooldown status per token",
            "GET /api/faucet/tokens": "Dispensable tokens and balances",
            "GET /api/faucet/stats": "Distribution statistics",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}
