//! Router tests over the full HTTP surface.

mod common;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    drip_faucet::api::router(h.service.clone())
        .layer(MockConnectInfo(SocketAddr::from(([192, 0, 2, 10], 40000))))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_drip(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/faucet/drip")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn usdc_body() -> Value {
    json!({
        "address": RECIPIENT,
        "tokenId": "usdc",
        "captchaToken": CAPTCHA_PASS,
        "fingerprint": "fp-42"
    })
}

#[tokio::test]
async fn test_drip_then_denied() {
    let h = harness(MockNode::new(), test_config());
    let app = app(&h);

    let (status, body) = send(&app, post_drip(usdc_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["amount"], "100");
    assert_eq!(body["token"], "USDC");
    assert_eq!(body["txHash"], "");
    assert!(body["dripId"].as_u64().unwrap() > 0);

    let (status, body) = send(&app, post_drip(usdc_body())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RATE_LIMITED");
    assert!(body["message"].as_str().unwrap().starts_with("Wallet cooldown"));
    assert!(body["retryAfter"].as_u64().unwrap() > 86_000);
}

#[tokio::test]
async fn test_validation_errors() {
    let h = harness(MockNode::new(), test_config());
    let app = app(&h);

    let mut body = usdc_body();
    body["address"] = json!("not-an-address");
    let (status, body) = send(&app, post_drip(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ADDRESS");

    let mut body = usdc_body();
    body["tokenId"] = json!("shib");
    let (status, body) = send(&app, post_drip(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_TOKEN");

    let mut body = usdc_body();
    body["captchaToken"] = json!("");
    let (status, body) = send(&app, post_drip(body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "CAPTCHA_FAILED");

    let request = Request::builder()
        .method("POST")
        .uri("/api/faucet/drip")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"address\":"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_status_reflects_drip() {
    let h = harness(MockNode::new(), test_config());
    let app = app(&h);
    send(&app, post_drip(usdc_body())).await;

    let (status, body) = send(&app, get(&format!("/api/faucet/status/{}", RECIPIENT))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ipRateLimit"]["used"], 1);
    assert_eq!(body["ipRateLimit"]["limit"], 3);
    assert_eq!(body["ipRateLimit"]["canRequest"], true);

    let drips = body["drips"].as_array().unwrap();
    let usdc = drips.iter().find(|d| d["tokenId"] == "usdc").unwrap();
    assert_eq!(usdc["tokenSymbol"], "USDC");
    assert_eq!(usdc["canRequest"], false);
    assert_eq!(usdc["lastDrip"]["amount"], "100");
    let eth = drips.iter().find(|d| d["tokenId"] == "eth").unwrap();
    assert_eq!(eth["canRequest"], true);
    assert!(eth["lastDrip"].is_null());

    let (status, _) = send(&app, get("/api/faucet/status/0xnope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tokens_stats_health_metrics() {
    let h = harness(MockNode::new(), test_config());
    let app = app(&h);

    let (status, body) = send(&app, get("/api/faucet/tokens")).await;
    assert_eq!(status, StatusCode::OK);
    let tokens = body["tokens"].as_array().unwrap();
    assert_eq!(tokens.len(), 5);
    let eth = tokens.iter().find(|t| t["id"] == "eth").unwrap();
    assert_eq!(eth["symbol"], "ETH");
    assert_eq!(eth["dripAmount"], "0.5");
    assert_eq!(eth["totalDrips"], 0);
    assert_eq!(eth["balance"], "2.500000");

    let (status, body) = send(&app, get("/api/faucet/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalDrips"], 0);
    assert_eq!(body["totalUsers"], 0);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["wallet"], DEV_ADDRESS);

    send(&app, post_drip(usdc_body())).await;
    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("faucet_drip_requests_total 1"));
}
