// shared stubs for the service and router tests, not every test file uses all of it
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use futures::StreamExt;
use parking_lot::Mutex;
use url::Url;

use hls_relay::config::AppConfig;
use hls_relay::database::ChannelFile;
use hls_relay::server::services::RelayServices;
use hls_relay::server::services::channel_cache_services::{
    ChannelCacheService, DynChannelCacheService,
};
use hls_relay::server::services::channel_services::{ChannelService, DynChannelService};
use hls_relay::server::services::fetch_services::{
    DynFetchGateway, FetchError, FetchGatewayTrait, FetchKind, FetchedBody, FetchedStream,
};
use hls_relay::server::utils::extraction_utils::PlaylistExtractor;
use hls_relay::server::utils::reference_utils::ReferenceSigner;

pub const ORIGIN_TEMPLATE: &str = "https://origin.example.com/embed.php?stream={channel}";
pub const CDN_DOMAIN: &str = "cdn.example.com";
pub const PLAYLIST_URL: &str = "https://cdn.example.com/live/abc.m3u8?token=T1";
pub const REFERENCE_SECRET: &str = "test-reference-secret";

/// same key the services built by `services_over` sign with
pub fn test_signer() -> ReferenceSigner {
    ReferenceSigner::new(REFERENCE_SECRET)
}

pub fn test_config() -> AppConfig {
    AppConfig {
        reference_secret: Some(REFERENCE_SECRET.to_string()),
        ..AppConfig::default()
    }
}

pub fn page_with(url: &str) -> String {
    format!("<html><script>var x=\"{}\";</script></html>", url)
}

pub fn status_error(url: &Url, status: u16) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status,
    }
}

/// origin stand in that counts calls and can be switched to failing mid test
pub struct StubGateway {
    page_calls: AtomicUsize,
    playlist_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    delay: Duration,
    page: Mutex<Option<String>>,
    playlist: Mutex<Option<String>>,
    media: Mutex<Option<(String, Vec<u8>)>>,
    redirect: Mutex<Option<Url>>,
}

impl StubGateway {
    pub fn serving(page: impl Into<String>) -> Self {
        Self {
            page_calls: AtomicUsize::new(0),
            playlist_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            page: Mutex::new(Some(page.into())),
            playlist: Mutex::new(None),
            media: Mutex::new(None),
            redirect: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_playlist(self, playlist: impl Into<String>) -> Self {
        *self.playlist.lock() = Some(playlist.into());
        self
    }

    pub fn with_media(self, content_type: &str, body: &[u8]) -> Self {
        *self.media.lock() = Some((content_type.to_string(), body.to_vec()));
        self
    }

    /// streamed responses claim they ended up here, like a cdn redirect would
    pub fn with_redirect(self, location: &str) -> Self {
        *self.redirect.lock() = Some(Url::parse(location).unwrap());
        self
    }

    /// None makes page fetches fail with a 503
    pub fn set_page(&self, page: Option<String>) {
        *self.page.lock() = page;
    }

    /// None makes playlist fetches fail with a 503
    pub fn set_playlist(&self, playlist: Option<String>) {
        *self.playlist.lock() = playlist;
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn playlist_calls(&self) -> usize {
        self.playlist_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchGatewayTrait for StubGateway {
    async fn fetch(&self, url: &Url, kind: FetchKind) -> Result<FetchedBody, FetchError> {
        let source = match kind {
            FetchKind::Page => {
                self.page_calls.fetch_add(1, Ordering::SeqCst);
                &self.page
            }
            FetchKind::Playlist => {
                self.playlist_calls.fetch_add(1, Ordering::SeqCst);
                &self.playlist
            }
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let body = source.lock().clone().ok_or_else(|| status_error(url, 503))?;

        Ok(FetchedBody {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into_bytes(),
        })
    }

    async fn stream(&self, url: &Url) -> Result<FetchedStream, FetchError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        let (content_type, body) = self.media.lock().clone().ok_or_else(|| status_error(url, 404))?;

        let mut headers = HeaderMap::new();
        if !content_type.is_empty() {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_str(&content_type).unwrap(),
            );
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        headers.insert(header::SET_COOKIE, HeaderValue::from_static("sid=secret"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

        // two chunks so the body really goes out as a stream
        let middle = body.len() / 2;
        let chunks: Vec<Result<Bytes, FetchError>> = vec![
            Ok(Bytes::copy_from_slice(&body[..middle])),
            Ok(Bytes::copy_from_slice(&body[middle..])),
        ];

        let final_url = self.redirect.lock().clone().unwrap_or_else(|| url.clone());

        Ok(FetchedStream {
            url: final_url,
            status: StatusCode::OK,
            headers,
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

pub fn cache_over(gateway: Arc<StubGateway>, ttl: Duration) -> Arc<ChannelCacheService> {
    Arc::new(ChannelCacheService::new(
        gateway as DynFetchGateway,
        PlaylistExtractor::new(CDN_DOMAIN),
        ORIGIN_TEMPLATE,
        ttl,
    ))
}

static NEXT_FILE: AtomicUsize = AtomicUsize::new(0);

/// fresh path in the temp dir, every test gets its own channel file
pub fn temp_channel_file() -> ChannelFile {
    ChannelFile::new(std::env::temp_dir().join(format!(
        "hls-relay-test-{}-{}.txt",
        std::process::id(),
        NEXT_FILE.fetch_add(1, Ordering::SeqCst)
    )))
}

pub fn channels_of(ids: &[&str]) -> DynChannelService {
    let file = temp_channel_file();
    Arc::new(ChannelService::new(
        file,
        ids.iter().map(|id| id.to_string()).collect(),
    )) as DynChannelService
}

pub fn services_over(gateway: Arc<StubGateway>, ids: &[&str]) -> RelayServices {
    services_with_config(gateway, ids, test_config())
}

pub fn services_with_config(
    gateway: Arc<StubGateway>,
    ids: &[&str],
    config: AppConfig,
) -> RelayServices {
    let cache = cache_over(gateway.clone(), Duration::from_secs(300)) as DynChannelCacheService;
    RelayServices::from_parts(
        Arc::new(config),
        gateway as DynFetchGateway,
        cache,
        channels_of(ids),
    )
}
