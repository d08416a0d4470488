use futures::StreamExt;
use tracing::{debug, warn};
use url::Url;

use crate::server::{
    error::{AppResult, Error},
    services::{
        channel_cache_services::DynChannelCacheService,
        fetch_services::{DynFetchGateway, FetchKind, FetchedStream},
    },
    utils::{reference_utils::ReferenceSigner, rewrite_utils::ManifestRewriter},
};

// variant playlists are a few kb, anything this big isn't a playlist
const MAX_NESTED_PLAYLIST_BYTES: usize = 8 * 1024 * 1024;

/// fetches playlists and runs them through the rewriter
pub struct PlaylistService {
    cache: DynChannelCacheService,
    gateway: DynFetchGateway,
    rewriter: ManifestRewriter,
}

impl PlaylistService {
    pub fn new(
        cache: DynChannelCacheService,
        gateway: DynFetchGateway,
        signer: ReferenceSigner,
    ) -> Self {
        Self {
            cache,
            gateway,
            rewriter: ManifestRewriter::new(signer),
        }
    }

    /// cached (or freshly extracted) link -> fetch -> rewrite. A failed fetch here leaves the
    /// cache alone, one bad response from the cdn shouldn't throw away a good link
    pub async fn channel_playlist(&self, channel_id: &str) -> AppResult<String> {
        let entry = self.cache.get_or_refresh(channel_id).await?;

        let fetched = self
            .gateway
            .fetch(entry.playlist_url(), FetchKind::Playlist)
            .await
            .map_err(|e| {
                warn!(
                    "playlist fetch failed for channel {}, keeping cached link: {}",
                    channel_id, e
                );
                Error::from(e)
            })?;

        let text = fetched.into_text(entry.playlist_url())?;
        ensure_playlist(&text, entry.playlist_url())?;

        Ok(self.rewriter.rewrite(
            &text,
            entry.base_location(),
            channel_id,
        ))
    }

    /// a sub-playlist that came through the segment route. Its links are relative to where it
    /// ended up after redirects, not to the channel's playlist
    pub async fn nested_playlist(
        &self,
        channel_id: &str,
        mut upstream: FetchedStream,
    ) -> AppResult<String> {
        let source_url = upstream.url.clone();

        let mut body = Vec::new();
        while let Some(chunk) = upstream.body.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > MAX_NESTED_PLAYLIST_BYTES {
                return Err(Error::BadGateway(format!(
                    "{} is too large to be a playlist",
                    source_url
                )));
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8(body).map_err(|_| {
            Error::BadGateway(format!("{} returned a playlist that isn't utf-8", source_url))
        })?;
        ensure_playlist(&text, &source_url)?;

        debug!("rewriting nested playlist {}", source_url);
        Ok(self.rewriter.rewrite_nested(&text, &source_url, channel_id))
    }
}

/// a 200 with an html error page in it still isn't a playlist
fn ensure_playlist(text: &str, source_url: &Url) -> AppResult<()> {
    if text.trim_start_matches('\u{feff}').trim_start().starts_with("#EXTM3U") {
        Ok(())
    } else {
        Err(Error::BadGateway(format!(
            "{} did not return an m3u8 playlist",
            source_url
        )))
    }
}
