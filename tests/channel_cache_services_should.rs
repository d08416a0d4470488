mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use futures::future::join_all;
use tokio::time::Instant;

use hls_relay::database::channel::RuleTag;
use hls_relay::server::services::channel_cache_services::{
    ChannelCacheService, ChannelCacheServiceTrait, RefreshError,
};
use hls_relay::server::services::fetch_services::{
    DynFetchGateway, FetchKind, FetchedBody, MockFetchGatewayTrait,
};
use hls_relay::server::utils::extraction_utils::PlaylistExtractor;

use common::{CDN_DOMAIN, ORIGIN_TEMPLATE, PLAYLIST_URL, StubGateway, cache_over, page_with};

const TTL: Duration = Duration::from_secs(300);

#[tokio::test(start_paused = true)]
async fn test_get_after_refresh_returns_stored_entry() {
    let gateway = Arc::new(StubGateway::serving(page_with(PLAYLIST_URL)));
    let cache = cache_over(gateway.clone(), TTL);

    assert!(cache.get("abc").is_none());

    let refreshed = cache.refresh("abc").await.expect("refresh should succeed");
    let cached = cache.get("abc").expect("entry should be cached");

    assert_eq!(cached, refreshed);
    assert_eq!(cached.channel_id(), "abc");
    assert_eq!(cached.playlist_url().as_str(), PLAYLIST_URL);
    assert_eq!(cached.base_location().as_str(), "https://cdn.example.com/live/");
    assert_eq!(cached.rule(), RuleTag::DeliveryCdn);
    assert_eq!(gateway.page_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_ttl() {
    let gateway = Arc::new(StubGateway::serving(page_with(PLAYLIST_URL)));
    let cache = cache_over(gateway, TTL);

    cache.refresh("abc").await.unwrap();

    tokio::time::advance(TTL - Duration::from_secs(1)).await;
    assert!(cache.get("abc").is_some());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cache.get("abc").is_none());
    assert_eq!(cache.snapshot().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_refreshes_share_one_extraction() {
    let gateway = Arc::new(
        StubGateway::serving(page_with(PLAYLIST_URL)).with_delay(Duration::from_millis(200)),
    );
    let cache = cache_over(gateway.clone(), TTL);

    let results = join_all((0..16).map(|_| cache.refresh("abc"))).await;

    assert_eq!(gateway.page_calls(), 1);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(cache.snapshot().in_flight, 0);

    // once it has landed a new refresh really does go out again
    cache.refresh("abc").await.unwrap();
    assert_eq!(gateway.page_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_refreshes_share_one_extraction() {
    let gateway = Arc::new(
        StubGateway::serving(page_with(PLAYLIST_URL)).with_delay(Duration::from_millis(200)),
    );
    let cache = cache_over(gateway.clone(), TTL);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_refresh("abc").await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(gateway.page_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_different_channels_refresh_in_parallel() {
    let gateway = Arc::new(
        StubGateway::serving(page_with(PLAYLIST_URL)).with_delay(Duration::from_millis(500)),
    );
    let cache = cache_over(gateway.clone(), TTL);

    let started = Instant::now();
    let (a, b) = tokio::join!(cache.refresh("abc"), cache.refresh("xyz"));

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(gateway.page_calls(), 2);
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_existing_entry() {
    let gateway = Arc::new(StubGateway::serving(page_with(PLAYLIST_URL)));
    let cache = cache_over(gateway.clone(), TTL);

    let original = cache.refresh("abc").await.unwrap();

    gateway.set_page(None);
    let failed = cache.refresh("abc").await;
    assert!(matches!(failed, Err(RefreshError::Fetch(_))));
    assert_eq!(cache.get("abc"), Some(original.clone()));

    gateway.set_page(Some("<html>offline</html>".to_string()));
    let not_found = cache.refresh("abc").await;
    assert_eq!(
        not_found,
        Err(RefreshError::NotFound {
            channel: "abc".to_string()
        })
    );
    assert_eq!(cache.get("abc"), Some(original));
}

#[tokio::test(start_paused = true)]
async fn test_get_or_refresh_only_extracts_on_miss() {
    let gateway = Arc::new(StubGateway::serving(page_with(PLAYLIST_URL)));
    let cache = cache_over(gateway.clone(), TTL);

    cache.get_or_refresh("abc").await.unwrap();
    cache.get_or_refresh("abc").await.unwrap();
    assert_eq!(gateway.page_calls(), 1);

    tokio::time::advance(TTL).await;
    cache.get_or_refresh("abc").await.unwrap();
    assert_eq!(gateway.page_calls(), 2);
}

#[tokio::test]
async fn test_fetches_origin_page_for_channel() {
    let mut gateway = MockFetchGatewayTrait::new();
    gateway
        .expect_fetch()
        .withf(|url, kind| {
            url.as_str() == "https://origin.example.com/embed.php?stream=espn"
                && *kind == FetchKind::Page
        })
        .times(1)
        .returning(|_, _| {
            Ok(FetchedBody {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: page_with("https://edge.cdn.example.com/hls/espn.m3u8").into_bytes(),
            })
        });

    let cache = ChannelCacheService::new(
        Arc::new(gateway) as DynFetchGateway,
        PlaylistExtractor::new(CDN_DOMAIN),
        ORIGIN_TEMPLATE,
        TTL,
    );

    let entry = cache.refresh("espn").await.unwrap();

    assert_eq!(
        entry.playlist_url().as_str(),
        "https://edge.cdn.example.com/hls/espn.m3u8"
    );
    assert_eq!(
        entry.base_location().as_str(),
        "https://edge.cdn.example.com/hls/"
    );
}

#[tokio::test]
async fn test_bad_origin_template_is_reported() {
    let gateway = Arc::new(StubGateway::serving(page_with(PLAYLIST_URL)));
    let cache = ChannelCacheService::new(
        gateway.clone() as DynFetchGateway,
        PlaylistExtractor::new(CDN_DOMAIN),
        "not a url {channel}",
        TTL,
    );

    assert!(matches!(
        cache.refresh("abc").await,
        Err(RefreshError::InvalidOrigin(_))
    ));
    assert_eq!(gateway.page_calls(), 0);
}
