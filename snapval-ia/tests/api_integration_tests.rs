//! HTTP API integration tests for snapval-ia
//!
//! Drives the axum router end to end with stubbed experts and a scripted
//! marketplace gateway. No network access and no real credentials.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine as _;
use helpers::{
    build_analyzer, clothing_adapters, listing, png_bytes, DownGateway, FixedGateway,
};
use http_body_util::BodyExt;
use snapval_common::events::EventBus;
use snapval_ia::market::MarketplaceGateway;
use snapval_ia::{build_router, AppState};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// State with stubbed experts and a 12-listing gateway whose images all
/// resolve from memory.
fn test_app_state() -> AppState {
    let mut images = HashMap::new();
    let mut listings = Vec::new();
    for i in 0..12u32 {
        let url = format!("https://img.example/{i}");
        images.insert(url.clone(), png_bytes([200, (i * 18) as u8, 40]));
        listings.push(listing(&format!("l{i}"), Some(40.0 + i as f64), &url));
    }

    let event_bus = Arc::new(EventBus::new(32));
    let analyzer = Arc::new(build_analyzer(
        clothing_adapters(),
        images,
        Arc::clone(&event_bus),
    ));
    let gateway: Arc<dyn MarketplaceGateway> = Arc::new(FixedGateway(listings));
    AppState::new(analyzer, gateway, event_bus)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint_reports_module_identity() {
    let app = build_router(test_app_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "snapval-ia");
    assert!(json["uptime_seconds"].is_number());
    assert!(json["build"]["git_hash"].is_string());
    assert!(json["build"]["profile"].is_string());
    assert!(json.get("last_error").is_none());
}

#[tokio::test]
async fn test_analyze_returns_identified_and_priced_result() {
    let app = build_router(test_app_state());

    let request = post_json(
        "/analyze",
        serde_json::json!({
            "image_base64": b64(&png_bytes([200, 40, 40])),
            "intelligent_crop": false,
        }),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    assert_eq!(json["identified_attributes"]["brand"], "Ralph Lauren");
    assert_eq!(json["identified_attributes"]["category"], "clothing");
    assert_eq!(json["search_success"], true);
    assert!(!json["market_query_used"].as_str().unwrap().is_empty());
    assert_eq!(json["visually_ranked_comps"].as_array().unwrap().len(), 12);
    assert_eq!(json["price_analysis"]["sample_size"], 12);
    assert_eq!(json["price_analysis"]["confidence_label"], "Medium");
    assert_eq!(json["analysis_summary"]["stage"], "Complete");
}

#[tokio::test]
async fn test_analyze_honors_listing_limit_override() {
    let app = build_router(test_app_state());

    let request = post_json(
        "/analyze",
        serde_json::json!({
            "image_base64": b64(&png_bytes([200, 40, 40])),
            "intelligent_crop": false,
            "limit": 5,
        }),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["visually_ranked_comps"].as_array().unwrap().len(), 5);
    assert_eq!(json["price_analysis"]["sample_size"], 5);
}

#[tokio::test]
async fn test_analyze_crop_flag_defaults_to_enabled() {
    // No vision key and no detector endpoint in the test state, so the
    // default-enabled crop degrades to pass-through rather than failing.
    let app = build_router(test_app_state());

    let request = post_json(
        "/analyze",
        serde_json::json!({ "image_base64": b64(&png_bytes([90, 90, 90])) }),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["analysis_summary"]["crop_source"], "none");
    assert_eq!(json["analysis_summary"]["stage"], "Complete");
}

#[tokio::test]
async fn test_analyze_rejects_undecodable_base64() {
    let app = build_router(test_app_state());

    let request = post_json(
        "/analyze",
        serde_json::json!({ "image_base64": "!!! not base64 !!!" }),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_analyze_rejects_non_image_payload() {
    let app = build_router(test_app_state());

    let request = post_json(
        "/analyze",
        serde_json::json!({ "image_base64": b64(b"%PDF-1.4 definitely a document") }),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_failed_analysis_surfaces_in_health() {
    let app = build_router(test_app_state());

    let bad = post_json("/analyze", serde_json::json!({ "image_base64": "" }));
    let response = app.clone().oneshot(bad).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = json_body(response).await;
    assert!(json["last_error"]
        .as_str()
        .unwrap()
        .contains("invalid input image"));
}

#[tokio::test]
async fn test_analyze_degrades_when_marketplace_is_down() {
    let event_bus = Arc::new(EventBus::new(32));
    let analyzer = Arc::new(build_analyzer(
        clothing_adapters(),
        HashMap::new(),
        Arc::clone(&event_bus),
    ));
    let gateway: Arc<dyn MarketplaceGateway> = Arc::new(DownGateway);
    let app = build_router(AppState::new(analyzer, gateway, event_bus));

    let request = post_json(
        "/analyze",
        serde_json::json!({
            "image_base64": b64(&png_bytes([90, 90, 90])),
            "intelligent_crop": false,
        }),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["search_success"], false);
    assert!(json["visually_ranked_comps"].as_array().unwrap().is_empty());
    assert_eq!(json["price_analysis"]["sample_size"], 0);
    assert_eq!(json["price_analysis"]["suggested_price"], 0.0);
    assert_eq!(json["price_analysis"]["confidence_label"], "Low");
    assert_eq!(json["analysis_summary"]["stage"], "Complete");
    assert!(json["analysis_summary"]["search_error"]
        .as_str()
        .unwrap()
        .contains("unreachable"));
}

#[tokio::test]
async fn test_crop_endpoint_returns_passthrough_preview() {
    let app = build_router(test_app_state());
    let input = png_bytes([10, 120, 200]);

    let request = post_json("/crop", serde_json::json!({ "image_base64": b64(&input) }));
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["service"], "none");
    assert!(json["bounding_box"].is_null());

    let returned = base64::engine::general_purpose::STANDARD
        .decode(json["cropped_image"].as_str().unwrap())
        .unwrap();
    assert_eq!(returned, input);
}

#[tokio::test]
async fn test_crop_endpoint_rejects_empty_payload() {
    let app = build_router(test_app_state());

    let request = post_json("/crop", serde_json::json!({ "image_base64": "" }));
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_event_stream_answers_with_sse_content_type() {
    let app = build_router(test_app_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = build_router(test_app_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/definitely-not-a-route")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
