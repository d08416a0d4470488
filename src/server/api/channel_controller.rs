use axum::{
    Extension, Json, Router,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use tracing::{debug, info};

use crate::server::{
    dtos::channel_dto::{UploadChannelsRequest, UploadChannelsResponse},
    error::{AppResult, Error},
    extractors::KnownChannel,
    services::RelayServices,
    utils::response_utils::{MPEGURL_CONTENT_TYPE, build_m3u8_response},
};

const LANDING_PAGE: &str = include_str!("../static/index.html");

pub struct ChannelController;

impl ChannelController {
    pub fn app() -> Router {
        Router::new()
            .route("/", get(Self::landing_page))
            .route("/playlist", get(Self::master_playlist))
            .route("/playlist.m3u8", get(Self::master_playlist))
            // "{channel}" also swallows a trailing ".m3u8", KnownChannel strips it
            .route("/stream/{channel}", get(Self::channel_playlist))
            .route("/channel/{channel}", get(Self::channel_playlist))
            .route("/upload_channels", post(Self::upload_channels))
    }

    async fn landing_page() -> Html<&'static str> {
        Html(LANDING_PAGE)
    }

    async fn channel_playlist(
        KnownChannel(channel_id, services): KnownChannel,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        debug!("playlist requested for {}", channel_id);
        metrics::counter!("relay_playlist_requests_total").increment(1);

        let playlist = services.playlists.channel_playlist(&channel_id).await?;
        build_m3u8_response(&playlist, &headers)
    }

    async fn master_playlist(
        Extension(services): Extension<RelayServices>,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        let channels = services.channels.channels();
        if channels.is_empty() {
            return Err(Error::NotFound("no channels configured".to_string()));
        }

        let base_url = Self::public_base_url(&headers)?;
        let body = Self::render_master_playlist(&channels, &base_url);

        Ok((
            StatusCode::OK,
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(MPEGURL_CONTENT_TYPE),
                ),
                (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            ],
            body,
        )
            .into_response())
    }

    async fn upload_channels(
        Extension(services): Extension<RelayServices>,
        Json(request): Json<UploadChannelsRequest>,
    ) -> AppResult<Json<UploadChannelsResponse>> {
        let channels = services.channels.replace(&request.channels).await?;
        info!("channel list uploaded, {} channels", channels.len());

        Ok(Json(UploadChannelsResponse::success(channels)))
    }

    /// one `#EXTINF` + url pair per channel, urls point back at this server
    pub fn render_master_playlist(channels: &[String], base_url: &str) -> String {
        let mut playlist = String::from("#EXTM3U\n");
        for channel in channels {
            playlist.push_str(&format!("#EXTINF:-1,{}\n", channel.to_uppercase()));
            playlist.push_str(&format!("{}/stream/{}.m3u8\n", base_url, channel));
        }
        playlist
    }

    /// scheme and host the client used to reach us, proxies in front set x-forwarded-proto
    fn public_base_url(headers: &HeaderMap) -> AppResult<String> {
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get(header::HOST))
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::BadRequest("missing host header".to_string()))?;

        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|s| matches!(*s, "http" | "https"))
            .unwrap_or("http");

        Ok(format!("{}://{}", scheme, host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_playlist_lists_every_channel() {
        let playlist = ChannelController::render_master_playlist(
            &["espn".to_string(), "fox1".to_string()],
            "http://relay.local:8080",
        );

        assert_eq!(
            playlist,
            "#EXTM3U\n\
             #EXTINF:-1,ESPN\n\
             http://relay.local:8080/stream/espn.m3u8\n\
             #EXTINF:-1,FOX1\n\
             http://relay.local:8080/stream/fox1.m3u8\n"
        );
    }

    #[test]
    fn base_url_honours_forwarded_proto() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("relay.example.com"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));

        assert_eq!(
            ChannelController::public_base_url(&headers).unwrap(),
            "https://relay.example.com"
        );
    }

    #[test]
    fn base_url_needs_a_host() {
        assert!(ChannelController::public_base_url(&HeaderMap::new()).is_err());
    }
}
