//! End-to-end tests for the intercepting proxy routes.

mod common;

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use common::{url, Harness, ScriptedFetcher};
use offline_cache::layer::control::control_channel;
use offline_cache::server::proxy::{build_router, AppState};

fn app(h: Harness) -> (Router, Harness) {
    let (control, rx) = control_channel(8);
    tokio::spawn(h.layer.control.clone().run(rx));

    let state = Arc::new(AppState {
        layer: h.layer.clone(),
        control,
        upstream: url("/"),
        max_body_bytes: 1024,
        start_time: Instant::now(),
    });
    (build_router(state), h)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_control_endpoint_returns_json_reply() {
    let (router, _h) = app(Harness::new(ScriptedFetcher::new()));

    let response = router
        .oneshot(
            Request::post("/__offline/control")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"type":"GET_CACHE_SIZE"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({ "size": "0 entries", "entries": 0 })
    );
}

#[tokio::test]
async fn test_unknown_control_message_rejected() {
    let (router, _h) = app(Harness::new(ScriptedFetcher::new()));

    let response = router
        .oneshot(
            Request::post("/__offline/control")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"type":"CLEAR_EVERYTHING"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_offline_image_is_empty_404() {
    let (router, _h) = app(Harness::new(ScriptedFetcher::new()));

    let response = router
        .oneshot(
            Request::get("/sprites/25.png")
                .header("sec-fetch-dest", "image")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_cached_image_replayed_with_headers() {
    let sprite = url("/sprites/25.png");
    let (router, h) = app(Harness::new(
        ScriptedFetcher::new().respond(&sprite, 200, b"png".to_vec()),
    ));

    let request = || {
        Request::get("/sprites/25.png")
            .header("sec-fetch-dest", "image")
            .body(Body::empty())
            .unwrap()
    };
    let first = router.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    h.fetcher.set_offline(true);
    let second = router.oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        second.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );
    let body = to_bytes(second.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"png");
    assert_eq!(h.fetcher.calls_for(&sprite), 1);
}

#[tokio::test]
async fn test_uncached_navigation_offline_is_503() {
    let (router, _h) = app(Harness::new(ScriptedFetcher::new()));

    let response = router
        .oneshot(
            Request::get("/runs/12")
                .header("sec-fetch-mode", "navigate")
                .header("sec-fetch-dest", "document")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let (router, _h) = app(Harness::new(ScriptedFetcher::new()));

    let response = router
        .oneshot(
            Request::post("/api/runs")
                .body(Body::from(vec![b'x'; 4096]))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_health_reports_state_and_partitions() {
    let root = url("/");
    let h = Harness::new(ScriptedFetcher::new().respond(&root, 200, b"<html>".to_vec()));
    h.layer.lifecycle.install().await.unwrap();
    let (router, _h) = app(h);

    let response = router
        .oneshot(Request::get("/__offline/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["state"], "waiting");
    assert_eq!(json["partitions"][0]["name"], "tracker-shell-v1");
    assert_eq!(json["partitions"][0]["entries"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_counters() {
    let (router, _h) = app(Harness::new(ScriptedFetcher::new()));

    let warm = router
        .clone()
        .oneshot(
            Request::get("/img/a.png")
                .header("sec-fetch-dest", "image")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(warm.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(Request::get("/__offline/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains(r#"outcome="network_error""#));
}

#[tokio::test]
async fn test_scheme_relative_path_stays_on_upstream() {
    let (router, h) = app(Harness::new(ScriptedFetcher::new()));

    let response = router
        .oneshot(
            Request::get("//evil.example/steal.png")
                .header("sec-fetch-dest", "image")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let calls = h.fetcher.calls();
    assert_eq!(calls.len(), 1);
    for call in calls {
        let target = reqwest::Url::parse(&call).unwrap();
        assert_eq!(target.host_str(), Some("tracker.example"), "{call}");
    }
}
