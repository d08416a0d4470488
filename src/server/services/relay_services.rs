use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use crate::config::AppConfig;
use crate::server::utils::reference_utils::ReferenceSigner;

use super::{
    channel_cache_services::{ChannelCacheService, DynChannelCacheService},
    channel_services::{ChannelService, DynChannelService},
    fetch_services::{DynFetchGateway, FetchGateway},
    playlist_services::PlaylistService,
    refresh_services::ChannelRefresher,
};

/// everything the routes need, cloned into every request through an Extension
#[derive(Clone)]
pub struct RelayServices {
    pub fetch: DynFetchGateway,
    pub cache: DynChannelCacheService,
    pub channels: DynChannelService,
    pub playlists: Arc<PlaylistService>,
    /// signs the links playlists hand out and checks them when they come back
    pub signer: ReferenceSigner,
    pub metrics: Option<PrometheusHandle>,
    pub config: Arc<AppConfig>,
}

impl RelayServices {
    pub async fn new(config: Arc<AppConfig>) -> Self {
        info!("starting relay services...");

        let fetch = Arc::new(FetchGateway::new(&config)) as DynFetchGateway;
        let channels = Arc::new(ChannelService::load(&config).await) as DynChannelService;

        info!("fetch gateway and channel list ok, starting cache...");
        let cache =
            Arc::new(ChannelCacheService::from_config(&config, fetch.clone())) as DynChannelCacheService;

        Self::from_parts(config, fetch, cache, channels)
    }

    /// wiring without any io, lets tests swap in mocks for any piece
    pub fn from_parts(
        config: Arc<AppConfig>,
        fetch: DynFetchGateway,
        cache: DynChannelCacheService,
        channels: DynChannelService,
    ) -> Self {
        let signer = ReferenceSigner::from_config(&config);
        let playlists = Arc::new(PlaylistService::new(
            cache.clone(),
            fetch.clone(),
            signer.clone(),
        ));

        Self {
            fetch,
            cache,
            channels,
            playlists,
            signer,
            metrics: None,
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<PrometheusHandle>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn refresher(&self) -> ChannelRefresher {
        ChannelRefresher::new(
            self.cache.clone(),
            self.channels.clone(),
            self.config.refresh_interval(),
            self.config.refresh_concurrency,
        )
    }
}
