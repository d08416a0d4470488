use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    channel_cache_services::DynChannelCacheService, channel_services::DynChannelService,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
}

/// keeps every configured channel warm so players rarely wait on an extraction. Only talks to
/// the cache through its trait, same as a request would
pub struct ChannelRefresher {
    cache: DynChannelCacheService,
    channels: DynChannelService,
    interval: Duration,
    concurrency: usize,
}

impl ChannelRefresher {
    pub fn new(
        cache: DynChannelCacheService,
        channels: DynChannelService,
        interval: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            cache,
            channels,
            // tokio panics on a zero period
            interval: interval.max(Duration::from_secs(1)),
            concurrency: concurrency.max(1),
        }
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    /// first pass runs right away, then every `interval` until the token is cancelled
    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // a slow pass shouldn't be followed by a burst of catch up passes
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "background refresh every {}s ({} at a time)",
            self.interval.as_secs(),
            self.concurrency
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        summary = self.refresh_all() => {
                            if summary.failed > 0 {
                                warn!(
                                    "background refresh: {} ok, {} failed",
                                    summary.refreshed, summary.failed
                                );
                            } else {
                                debug!("background refresh: {} ok", summary.refreshed);
                            }
                        }
                    }
                }
            }
        }

        info!("background refresh stopped");
    }

    /// refreshes every configured channel, one failing never stops the others and never touches
    /// the entry that channel already has
    pub async fn refresh_all(&self) -> RefreshSummary {
        let channels = self.channels.channels();
        let mut summary = RefreshSummary::default();

        if channels.is_empty() {
            return summary;
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for channel in channels {
            let cache = self.cache.clone();
            let sem = semaphore.clone();
            join_set.spawn(async move {
                // never closed, acquire can't fail
                let _permit = sem.acquire().await.ok();
                let result = cache.refresh(&channel).await;
                (channel, result)
            });
        }

        while let Some(completed) = join_set.join_next().await {
            match completed {
                Ok((_, Ok(_))) => summary.refreshed += 1,
                Ok((channel, Err(e))) => {
                    debug!("background refresh of {} failed: {}", channel, e);
                    summary.failed += 1;
                }
                Err(e) => {
                    error!("refresh task panicked: {}", e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
