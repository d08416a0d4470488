use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use mockall::automock;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::AppConfig,
    database::channel::{CandidateUrl, ChannelEntry},
    server::{
        services::fetch_services::{DynFetchGateway, FetchError, FetchKind},
        utils::extraction_utils::PlaylistExtractor,
    },
};

pub type DynChannelCacheService = Arc<dyn ChannelCacheServiceTrait + Send + Sync>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// the page loaded fine but nothing in it looked like the live playlist
    #[error("no playlist link found for channel {channel}")]
    NotFound { channel: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("invalid origin page url: {0}")]
    InvalidOrigin(String),
}

impl RefreshError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Fetch(e) => e.kind(),
            Self::InvalidOrigin(_) => "invalid_origin",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSnapshot {
    pub entries: usize,
    pub fresh: usize,
    pub in_flight: usize,
}

#[automock]
#[async_trait]
pub trait ChannelCacheServiceTrait {
    /// the entry if it's still inside its ttl, expired entries count as missing
    fn get(&self, channel_id: &str) -> Option<ChannelEntry>;

    /// fetch the origin page and re-extract. Concurrent calls for one channel share a single
    /// extraction, a failure leaves whatever was cached before alone
    async fn refresh(&self, channel_id: &str) -> Result<ChannelEntry, RefreshError>;

    async fn get_or_refresh(&self, channel_id: &str) -> Result<ChannelEntry, RefreshError>;

    fn snapshot(&self) -> CacheSnapshot;
}

type SharedRefresh = Shared<BoxFuture<'static, Result<ChannelEntry, RefreshError>>>;

struct CacheInner {
    gateway: DynFetchGateway,
    extractor: PlaylistExtractor,
    origin_page_template: String,
    ttl: Duration,
    entries: RwLock<HashMap<String, ChannelEntry>>,
    // one pending extraction per channel, whoever shows up while it runs just awaits a clone
    inflight: Mutex<HashMap<String, SharedRefresh>>,
}

pub struct ChannelCacheService {
    inner: Arc<CacheInner>,
}

impl ChannelCacheService {
    pub fn new(
        gateway: DynFetchGateway,
        extractor: PlaylistExtractor,
        origin_page_template: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                gateway,
                extractor,
                origin_page_template: origin_page_template.into(),
                ttl,
                entries: RwLock::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn from_config(config: &AppConfig, gateway: DynFetchGateway) -> Self {
        Self::new(
            gateway,
            PlaylistExtractor::new(&config.delivery_cdn_domain),
            config.origin_page_template.clone(),
            config.cache_ttl(),
        )
    }
}

impl CacheInner {
    fn origin_url(&self, channel_id: &str) -> Result<Url, RefreshError> {
        let raw = self
            .origin_page_template
            .replace("{channel}", &urlencoding::encode(channel_id));
        Url::parse(&raw).map_err(|e| RefreshError::InvalidOrigin(format!("{}: {}", raw, e)))
    }

    async fn extract(&self, channel_id: &str) -> Result<CandidateUrl, RefreshError> {
        let origin = self.origin_url(channel_id)?;
        info!("extracting m3u8 for channel {} from {}", channel_id, origin);

        let page = self.gateway.fetch(&origin, FetchKind::Page).await?;
        let body = page.text_lossy();

        self.extractor
            .extract(&body)
            .ok_or_else(|| RefreshError::NotFound {
                channel: channel_id.to_string(),
            })
    }

    /// stores the result (if any) and clears the in-flight slot, the entry goes in as a whole
    fn complete(
        &self,
        channel_id: &str,
        result: Result<CandidateUrl, RefreshError>,
    ) -> Result<ChannelEntry, RefreshError> {
        let outcome = match result {
            Ok(candidate) => {
                let entry = ChannelEntry::new(channel_id, candidate, Instant::now() + self.ttl);
                self.entries
                    .write()
                    .insert(channel_id.to_string(), entry.clone());

                info!(
                    "channel {} -> {} (rule {}, ttl {}s)",
                    channel_id,
                    entry.playlist_url(),
                    entry.rule(),
                    self.ttl.as_secs()
                );
                counter!("relay_channel_refresh_total", "outcome" => "success").increment(1);
                Ok(entry)
            }
            Err(e) => {
                warn!("refresh failed for channel {}: {}", channel_id, e);
                counter!("relay_channel_refresh_total", "outcome" => e.kind()).increment(1);
                Err(e)
            }
        };

        self.inflight.lock().remove(channel_id);
        outcome
    }
}

#[async_trait]
impl ChannelCacheServiceTrait for ChannelCacheService {
    fn get(&self, channel_id: &str) -> Option<ChannelEntry> {
        let now = Instant::now();

        {
            let entries = self.inner.entries.read();
            match entries.get(channel_id) {
                Some(entry) if entry.is_fresh(now) => {
                    counter!("relay_cache_lookups_total", "result" => "hit").increment(1);
                    return Some(entry.clone());
                }
                None => {
                    counter!("relay_cache_lookups_total", "result" => "miss").increment(1);
                    return None;
                }
                Some(_) => {}
            }
        }

        // expired, but a refresh could have landed between the two locks so look again
        let mut entries = self.inner.entries.write();
        match entries.get(channel_id) {
            Some(entry) if entry.is_fresh(now) => Some(entry.clone()),
            Some(_) => {
                debug!("evicting expired entry for channel {}", channel_id);
                entries.remove(channel_id);
                counter!("relay_cache_lookups_total", "result" => "expired").increment(1);
                None
            }
            None => None,
        }
    }

    async fn refresh(&self, channel_id: &str) -> Result<ChannelEntry, RefreshError> {
        let pending = {
            let mut inflight = self.inner.inflight.lock();

            match inflight.get(channel_id) {
                Some(existing) => {
                    debug!("joining in-flight refresh for channel {}", channel_id);
                    existing.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let key = channel_id.to_string();

                    // the future clears its own slot when done, so a waiter giving up halfway
                    // can't leave a finished refresh stuck in the map
                    let refresh = async move {
                        let result = inner.extract(&key).await;
                        inner.complete(&key, result)
                    }
                    .boxed()
                    .shared();

                    inflight.insert(channel_id.to_string(), refresh.clone());
                    refresh
                }
            }
        };

        pending.await
    }

    async fn get_or_refresh(&self, channel_id: &str) -> Result<ChannelEntry, RefreshError> {
        if let Some(entry) = self.get(channel_id) {
            return Ok(entry);
        }

        debug!("cache miss for channel {}, refreshing", channel_id);
        self.refresh(channel_id).await
    }

    fn snapshot(&self) -> CacheSnapshot {
        let now = Instant::now();
        let entries = self.inner.entries.read();

        CacheSnapshot {
            entries: entries.len(),
            fresh: entries.values().filter(|e| e.is_fresh(now)).count(),
            in_flight: self.inner.inflight.lock().len(),
        }
    }
}
