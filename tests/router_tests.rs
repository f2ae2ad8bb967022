//! Integration tests for request routing and caching strategies.

mod common;

use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;

use common::{url, Harness, ScriptedFetcher};
use offline_cache::cache::partition::PartitionKind;
use offline_cache::http::{Destination, InterceptedRequest, RequestKey, StoredResponse};

fn image(path: &str) -> InterceptedRequest {
    InterceptedRequest::get(url(path), Destination::Image)
}

#[tokio::test]
async fn test_cached_image_served_without_network() {
    let sprite = url("/sprites/25.png");
    let h = Harness::new(ScriptedFetcher::new().respond(&sprite, 200, b"png-bytes".to_vec()));

    let first = h.layer.router.handle(image("/sprites/25.png")).await.unwrap();
    assert_eq!(first.status, 200);

    h.fetcher.set_offline(true);
    let second = h.layer.router.handle(image("/sprites/25.png")).await.unwrap();

    assert_eq!(second, first);
    assert_eq!(h.fetcher.calls_for(&sprite), 1);
    assert_eq!(
        h.store.entry_count(&h.partition(PartitionKind::Sprite)).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_generic_image_goes_to_image_partition() {
    let badge = url("/img/badge.png");
    let h = Harness::new(ScriptedFetcher::new().respond(&badge, 200, b"badge".to_vec()));

    h.layer.router.handle(image("/img/badge.png")).await.unwrap();

    let key = RequestKey::get(&badge);
    assert!(h.store.contains(&h.partition(PartitionKind::Image), &key).await.unwrap());
    assert!(!h.store.contains(&h.partition(PartitionKind::Sprite), &key).await.unwrap());
}

#[tokio::test]
async fn test_image_network_failure_yields_empty_404() {
    let h = Harness::new(ScriptedFetcher::new());

    let response = h.layer.router.handle(image("/sprites/404.png")).await.unwrap();

    assert_eq!(response.status, 404);
    assert!(response.body.is_empty());
    assert_eq!(h.store.total_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn test_non_200_image_returned_uncached() {
    let missing = url("/sprites/9999.png");
    let h = Harness::new(ScriptedFetcher::new().respond(&missing, 500, b"oops".to_vec()));

    let response = h.layer.router.handle(image("/sprites/9999.png")).await.unwrap();

    assert_eq!(response.status, 500);
    assert_eq!(h.store.total_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn test_non_get_requests_never_written() {
    let api = url("/api/runs");
    let sprite = url("/sprites/1.png");
    let h = Harness::new(
        ScriptedFetcher::new()
            .respond(&api, 200, b"{}".to_vec())
            .respond(&sprite, 200, b"png".to_vec()),
    );

    let mut post = InterceptedRequest::get(api.clone(), Destination::Other);
    post.method = Method::POST;
    post.body = Bytes::from_static(b"{\"name\":\"run\"}");
    let response = h.layer.router.handle(post).await.unwrap();
    assert_eq!(response.status, 200);

    let mut put_image = image("/sprites/1.png");
    put_image.method = Method::PUT;
    let response = h.layer.router.handle(put_image).await.unwrap();
    assert_eq!(response.status, 200);

    assert_eq!(h.store.total_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_misses_leave_one_entry() {
    let sprite = url("/sprites/6.png");
    let h = Harness::new(
        ScriptedFetcher::new()
            .respond(&sprite, 200, b"charizard".to_vec())
            .with_delay(Duration::from_millis(20)),
    );

    let (a, b) = tokio::join!(
        h.layer.router.handle(image("/sprites/6.png")),
        h.layer.router.handle(image("/sprites/6.png")),
    );

    assert_eq!(a.unwrap().status, 200);
    assert_eq!(b.unwrap().status, 200);
    assert_eq!(h.fetcher.calls_for(&sprite), 2);
    assert_eq!(
        h.store.entry_count(&h.partition(PartitionKind::Sprite)).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_unrecognized_discovery_payload_passes_through() {
    let discovery = url("/api/sprite-variants?id=1");
    let h = Harness::new(ScriptedFetcher::new().respond(&discovery, 200, br#"{"foo":1}"#.to_vec()));

    let request = InterceptedRequest::get(discovery.clone(), Destination::Other);
    let response = h.layer.router.handle(request).await.unwrap();
    h.settle().await;

    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], br#"{"foo":1}"#);
    assert_eq!(h.fetcher.calls(), vec![discovery.to_string()]);
    assert_eq!(h.store.total_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn test_non_json_discovery_body_is_no_op() {
    let discovery = url("/api/sprite-variants");
    let h = Harness::new(ScriptedFetcher::new().respond(&discovery, 200, b"<html>".to_vec()));

    let request = InterceptedRequest::get(discovery.clone(), Destination::Other);
    let response = h.layer.router.handle(request).await.unwrap();
    h.settle().await;

    assert_eq!(&response.body[..], b"<html>");
    assert_eq!(h.fetcher.calls().len(), 1);
}

#[tokio::test]
async fn test_discovery_schedules_variant_prefetch() {
    let discovery = url("/api/sprite-variants");
    let payload = br#"{"cacheKey":"3.1","variants":["","-mega"]}"#;
    let h = Harness::new(
        ScriptedFetcher::new()
            .respond(&discovery, 200, payload.to_vec())
            .respond(&url("/sprites/3.1.png"), 200, b"a".to_vec())
            .respond(&url("/sprites/3.1-mega.png"), 200, b"b".to_vec()),
    );

    let request = InterceptedRequest::get(discovery, Destination::Other);
    let response = h.layer.router.handle(request).await.unwrap();
    assert_eq!(&response.body[..], payload);

    h.settle().await;
    let sprites = h.partition(PartitionKind::Sprite);
    assert_eq!(h.store.entry_count(&sprites).await.unwrap(), 2);
    assert!(h
        .store
        .contains(&sprites, &RequestKey::get(&url("/sprites/3.1-mega.png")))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_discovery_response_not_held_by_prefetch() {
    let discovery = url("/api/sprite-variants");
    let payload = br#"{"cacheKey":"4","variants":["","-shiny"]}"#;
    let plain = url("/sprites/4.png");
    let shiny = url("/sprites/4-shiny.png");
    let slow = Duration::from_millis(500);
    let h = Harness::new(
        ScriptedFetcher::new()
            .respond(&discovery, 200, payload.to_vec())
            .respond(&plain, 200, b"a".to_vec())
            .respond(&shiny, 200, b"b".to_vec())
            .slow(&plain, slow)
            .slow(&shiny, slow),
    );

    let request = InterceptedRequest::get(discovery, Destination::Other);
    let response = tokio::time::timeout(Duration::from_millis(250), h.layer.router.handle(request))
        .await
        .expect("discovery response waited on the prefetch")
        .unwrap();
    assert_eq!(&response.body[..], payload);

    let sprites = h.partition(PartitionKind::Sprite);
    assert_eq!(h.store.entry_count(&sprites).await.unwrap(), 0);

    h.settle().await;
    assert_eq!(h.store.entry_count(&sprites).await.unwrap(), 2);
}

#[tokio::test]
async fn test_discovery_error_status_skips_prefetch() {
    let discovery = url("/api/sprite-variants");
    let payload = br#"{"cacheKey":"3","variants":[""]}"#;
    let h = Harness::new(ScriptedFetcher::new().respond(&discovery, 503, payload.to_vec()));

    let request = InterceptedRequest::get(discovery, Destination::Other);
    let response = h.layer.router.handle(request).await.unwrap();
    h.settle().await;

    assert_eq!(response.status, 503);
    assert_eq!(h.fetcher.calls().len(), 1);
}

#[tokio::test]
async fn test_navigation_falls_back_to_cache() {
    let root = url("/");
    let h = Harness::new(ScriptedFetcher::new());
    let shell = StoredResponse::new(200, vec![], "<html>shell</html>");
    h.store
        .put(&h.partition(PartitionKind::AppShell), &RequestKey::get(&root), &shell)
        .await
        .unwrap();

    let nav = InterceptedRequest::get(root, Destination::Document);
    let response = h.layer.router.handle(nav).await;
    assert_eq!(response, Some(shell));

    let uncached = InterceptedRequest::get(url("/runs/7"), Destination::Document);
    assert_eq!(h.layer.router.handle(uncached).await, None);
}

#[tokio::test]
async fn test_navigation_prefers_network() {
    let root = url("/");
    let h = Harness::new(ScriptedFetcher::new().respond(&root, 200, b"fresh".to_vec()));
    h.store
        .put(
            &h.partition(PartitionKind::AppShell),
            &RequestKey::get(&root),
            &StoredResponse::new(200, vec![], "stale"),
        )
        .await
        .unwrap();

    let response = h
        .layer
        .router
        .handle(InterceptedRequest::get(root, Destination::Document))
        .await
        .unwrap();
    assert_eq!(&response.body[..], b"fresh");
}

#[tokio::test]
async fn test_passthrough_caches_same_origin_and_allowed_images() {
    let data = url("/data/moves.json");
    let allowed = reqwest::Url::parse("https://raw.githubusercontent.com/s/25.png").unwrap();
    let foreign = reqwest::Url::parse("https://elsewhere.example/data.json").unwrap();
    let h = Harness::new(
        ScriptedFetcher::new()
            .respond(&data, 200, b"[]".to_vec())
            .respond(&allowed, 200, b"png".to_vec())
            .respond(&foreign, 200, b"{}".to_vec()),
    );

    for target in [&data, &allowed, &foreign] {
        let request = InterceptedRequest::get(target.clone(), Destination::Other);
        assert_eq!(h.layer.router.handle(request).await.unwrap().status, 200);
    }

    let images = h.partition(PartitionKind::Image);
    assert!(h.store.contains(&images, &RequestKey::get(&data)).await.unwrap());
    assert!(h.store.contains(&images, &RequestKey::get(&allowed)).await.unwrap());
    assert!(!h.store.contains(&images, &RequestKey::get(&foreign)).await.unwrap());

    h.fetcher.set_offline(true);
    let offline = InterceptedRequest::get(data, Destination::Other);
    let cached = h.layer.router.handle(offline).await.unwrap();
    assert_eq!(&cached.body[..], b"[]");

    let gone = InterceptedRequest::get(foreign, Destination::Other);
    assert_eq!(h.layer.router.handle(gone).await, None);
}
