use axum::{
    Router,
    body::Body,
    extract::Query,
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::server::{
    error::{AppResult, Error},
    extractors::KnownChannel,
    services::fetch_services::FetchedStream,
    utils::{reference_utils::ProxyReference, response_utils::build_m3u8_response},
};

const DEFAULT_SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

// never forwarded from the origin, these describe the origin's connection not ours
const HOP_BY_HOP_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "trailers",
    "upgrade",
];

#[derive(Deserialize)]
struct SegmentQuery {
    #[serde(rename = "ref")]
    reference: Option<String>,
}

pub struct ProxyController;

impl ProxyController {
    pub fn app() -> Router {
        // preflight OPTIONS is answered by the cors layer before it gets here
        Router::new().route("/segment/{channel}", get(Self::proxy_segment))
    }

    async fn proxy_segment(
        KnownChannel(channel_id, services): KnownChannel,
        Query(params): Query<SegmentQuery>,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        let reference = params
            .reference
            .map(ProxyReference::from_encoded)
            .ok_or_else(|| Error::BadRequest("missing ref parameter".to_string()))?;
        let target_url = reference.to_url(&channel_id, &services.signer).map_err(|e| {
            warn!("rejected ref for channel {}: {}", channel_id, e);
            Error::from(e)
        })?;

        debug!("proxying {} for channel {}", target_url, channel_id);
        metrics::counter!("relay_segment_requests_total").increment(1);

        // no retries, the player asks again on its own
        let upstream = services.fetch.stream(&target_url).await.map_err(|e| {
            warn!("segment fetch for channel {} failed: {}", channel_id, e);
            metrics::counter!("relay_segment_failures_total", "kind" => e.kind()).increment(1);
            Error::from(e)
        })?;

        if Self::is_playlist(&upstream) {
            let playlist = services
                .playlists
                .nested_playlist(&channel_id, upstream)
                .await?;
            return build_m3u8_response(&playlist, &headers);
        }

        Ok(Self::stream_response(upstream))
    }

    /// variant playlists come through here too and need their links rewritten
    fn is_playlist(upstream: &FetchedStream) -> bool {
        upstream
            .content_type()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("mpegurl"))
            || upstream.url.path().to_ascii_lowercase().ends_with(".m3u8")
    }

    /// segment bytes go out as they arrive, nothing is buffered
    fn stream_response(upstream: FetchedStream) -> Response {
        let FetchedStream {
            status,
            headers: upstream_headers,
            body,
            ..
        } = upstream;

        let mut response_headers = Self::forwarded_headers(&upstream_headers);
        if !response_headers.contains_key(header::CONTENT_TYPE) {
            response_headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(DEFAULT_SEGMENT_CONTENT_TYPE),
            );
        }

        (status, response_headers, Body::from_stream(body)).into_response()
    }

    /// origin headers minus hop-by-hop, length (the body is re-chunked), cookies and the
    /// origin's own cors policy, ours comes from the cors layer
    pub fn forwarded_headers(upstream: &HeaderMap) -> HeaderMap {
        let mut forwarded = HeaderMap::new();

        for (name, value) in upstream {
            if Self::is_stripped(name) {
                continue;
            }
            forwarded.append(name.clone(), value.clone());
        }

        forwarded
    }

    fn is_stripped(name: &HeaderName) -> bool {
        let name = name.as_str();
        HOP_BY_HOP_HEADERS.contains(&name)
            || name.starts_with("proxy-")
            || name.starts_with("access-control-")
            || name == header::CONTENT_LENGTH.as_str()
            || name == header::SET_COOKIE.as_str()
    }
}
