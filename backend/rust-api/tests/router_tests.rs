//! Router wiring tests driven through `tower::ServiceExt::oneshot`, limited
//! to routes that never reach storage so no live MongoDB is required.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt;

use aeroprep_api::{config::Config, create_router, services::AppState};

async fn test_app() -> Router {
    let config = Config {
        mongo_uri: "mongodb://localhost:27017".to_string(),
        mongo_database: "aeroprep_router_test".to_string(),
        jwt_secret: "router-test-secret".to_string(),
        listen_addr: "127.0.0.1:0".to_string(),
    };
    // Client construction is lazy; nothing here opens a connection.
    let client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .unwrap();
    create_router(Arc::new(AppState::new(config, client)))
}

#[tokio::test]
async fn module_types_listing_is_public() {
    let app = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/modules/types")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    let values: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["value"].as_str().unwrap())
        .collect();
    assert_eq!(values, vec!["mcq", "lsa", "story", "opi", "atc"]);
    assert_eq!(json[0]["label"], "Listening Multiple Choice");
}

#[tokio::test]
async fn progress_routes_reject_requests_without_bearer_token() {
    let app = test_app().await;

    for (method, uri) in [
        ("GET", "/api/v1/progress"),
        ("POST", "/api/v1/progress"),
        ("GET", "/api/v1/progress/stats"),
        ("GET", "/api/v1/progress/modules/mcq"),
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "{} {}",
            method,
            uri
        );
    }
}

#[tokio::test]
async fn progress_routes_reject_malformed_bearer_token() {
    let app = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/progress")
                .header("authorization", "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn metrics_endpoint_requires_basic_auth() {
    let app = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
