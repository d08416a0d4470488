use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use futures::{StreamExt, stream::BoxStream};
use mockall::automock;
use reqwest::{
    StatusCode,
    header::{self, HeaderMap},
};
use tracing::{debug, error};
use url::Url;

use crate::config::AppConfig;

// whatever a current desktop chrome sends, the origin's bot check looks at this first
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

// brotli isn't listed because there's nothing here to decode it with
const BUFFERED_ACCEPT_ENCODING: &str = "gzip, deflate, zstd";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("could not decode body from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl FetchError {
    /// short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Status { .. } => "status",
            Self::Network { .. } => "network",
            Self::Decode { .. } => "decode",
        }
    }

    fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// which header profile a buffered fetch goes out with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// the origin's html player page, sent like a top level navigation
    Page,
    /// the live m3u8 itself, sent like the player's xhr
    Playlist,
}

#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// already decompressed
    pub body: Vec<u8>,
}

impl FetchedBody {
    /// html pages get decoded lossily, a stray latin-1 byte shouldn't hide the link
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// playlists have to be real utf-8 or they're treated like a failed fetch
    pub fn into_text(self, url: &Url) -> Result<String, FetchError> {
        String::from_utf8(self.body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// upstream response whose body hasn't been read yet. Dropping `body` drops the upstream
/// connection, so a client going away stops the origin download too
pub struct FetchedStream {
    /// where the body actually came from, after any redirects
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, FetchError>>,
}

impl FetchedStream {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

pub type DynFetchGateway = Arc<dyn FetchGatewayTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait FetchGatewayTrait {
    /// buffered GET for pages and playlists, non 2xx is an error
    async fn fetch(&self, url: &Url, kind: FetchKind) -> Result<FetchedBody, FetchError>;

    /// streaming GET for segments and keys, bytes are passed on untouched
    async fn stream(&self, url: &Url) -> Result<FetchedStream, FetchError>;
}

pub struct FetchGateway {
    http: reqwest::Client,
    page_timeout: Duration,
    segment_timeout: Duration,
    referer: Option<String>,
}

impl FetchGateway {
    pub fn new(config: &AppConfig) -> Self {
        // one pooled client for everything, keep-alive to the cdn matters a lot for segments
        let http = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(32)
            .build()
            .unwrap_or_else(|e| {
                error!("failed to build http client, using defaults: {}", e);
                reqwest::Client::new()
            });

        Self {
            http,
            page_timeout: config.page_timeout(),
            segment_timeout: config.segment_timeout(),
            referer: config.origin_referer.clone(),
        }
    }

    fn apply_page_headers(request_builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request_builder
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
            )
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9,es;q=0.8")
            .header(header::ACCEPT_ENCODING, BUFFERED_ACCEPT_ENCODING)
            .header(header::DNT, "1")
            .header(header::UPGRADE_INSECURE_REQUESTS, "1")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Sec-Fetch-Site", "none")
            .header("Sec-Fetch-User", "?1")
            .header(header::CACHE_CONTROL, "max-age=0")
    }

    fn apply_media_headers(
        &self,
        mut request_builder: reqwest::RequestBuilder,
        accept_encoding: &'static str,
    ) -> reqwest::RequestBuilder {
        request_builder = request_builder
            .header(header::ACCEPT, "*/*")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(header::ACCEPT_ENCODING, accept_encoding)
            .header("Sec-Fetch-Dest", "empty")
            .header("Sec-Fetch-Mode", "cors")
            .header("Sec-Fetch-Site", "cross-site");

        if let Some(referer) = &self.referer {
            request_builder = request_builder
                .header(header::REFERER, referer.as_str())
                .header(header::ORIGIN, referer.trim_end_matches('/'));
        }

        request_builder
    }

    fn decompress(url: &Url, encoding: Option<&str>, bytes: &[u8]) -> Result<Vec<u8>, FetchError> {
        let decode_error = |reason: String| FetchError::Decode {
            url: url.to_string(),
            reason,
        };

        match encoding {
            Some("zstd") => {
                debug!("Decompressing zstd-encoded response");
                zstd::decode_all(bytes).map_err(|e| decode_error(e.to_string()))
            }
            Some("gzip") | Some("x-gzip") => {
                debug!("Decompressing gzip-encoded response");
                let mut decoder = flate2::read::GzDecoder::new(bytes);
                let mut decomp = Vec::new();
                decoder
                    .read_to_end(&mut decomp)
                    .map_err(|e| decode_error(e.to_string()))?;
                Ok(decomp)
            }
            Some("deflate") => {
                // "deflate" is supposed to be zlib wrapped but plenty of servers send it raw
                let mut decomp = Vec::new();
                let zlib = flate2::read::ZlibDecoder::new(bytes).read_to_end(&mut decomp);
                if zlib.is_ok() {
                    return Ok(decomp);
                }

                decomp.clear();
                flate2::read::DeflateDecoder::new(bytes)
                    .read_to_end(&mut decomp)
                    .map_err(|e| decode_error(e.to_string()))?;
                Ok(decomp)
            }
            _ => Ok(bytes.to_vec()),
        }
    }
}

#[async_trait]
impl FetchGatewayTrait for FetchGateway {
    async fn fetch(&self, url: &Url, kind: FetchKind) -> Result<FetchedBody, FetchError> {
        let request_builder = self
            .http
            .get(url.as_str())
            .timeout(self.page_timeout);
        let request_builder = match kind {
            FetchKind::Page => Self::apply_page_headers(request_builder),
            FetchKind::Playlist => {
                self.apply_media_headers(request_builder, BUFFERED_ACCEPT_ENCODING)
            }
        };

        debug!("Fetching {:?}: {}", kind, url);

        let response = request_builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            // often a cloudflare page, not worth logging the body
            error!("{} returned {}", url, status);
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut headers = response.headers().clone();
        let content_encoding = headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_ascii_lowercase());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let body = Self::decompress(url, content_encoding.as_deref(), &bytes)?;
        debug!(
            "Read {} bytes ({} decompressed) from {}",
            bytes.len(),
            body.len(),
            url
        );

        // the body isn't encoded anymore, don't let the headers claim otherwise
        headers.remove(header::CONTENT_ENCODING);
        headers.remove(header::CONTENT_LENGTH);

        Ok(FetchedBody {
            status,
            headers,
            body,
        })
    }

    async fn stream(&self, url: &Url) -> Result<FetchedStream, FetchError> {
        // identity so segment bytes go to the client exactly as the origin has them
        let request_builder = self.apply_media_headers(
            self.http.get(url.as_str()).timeout(self.segment_timeout),
            "identity",
        );

        debug!("Streaming {}", url);

        let response = request_builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            error!("{} returned {}", url, status);
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        if &final_url != url {
            debug!("{} redirected to {}", url, final_url);
        }

        let headers = response.headers().clone();
        let stream_url = url.clone();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| FetchError::from_reqwest(&stream_url, e)))
            .boxed();

        Ok(FetchedStream {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{Compression, write::GzEncoder};

    use super::*;

    fn url() -> Url {
        Url::parse("https://cdn.example.com/live/abc.m3u8").unwrap()
    }

    #[test]
    fn decompresses_gzip_bodies() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"#EXTM3U\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let body = FetchGateway::decompress(&url(), Some("gzip"), &compressed).unwrap();
        assert_eq!(body, b"#EXTM3U\n");
    }

    #[test]
    fn decompresses_zstd_bodies() {
        let compressed = zstd::encode_all(&b"#EXTM3U\n"[..], 3).unwrap();
        let body = FetchGateway::decompress(&url(), Some("zstd"), &compressed).unwrap();
        assert_eq!(body, b"#EXTM3U\n");
    }

    #[test]
    fn corrupt_gzip_is_a_decode_error() {
        let err = FetchGateway::decompress(&url(), Some("gzip"), b"not gzip").unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn non_utf8_playlist_is_rejected() {
        let fetched = FetchedBody {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: vec![0xff, 0xfe, 0x00],
        };
        assert!(matches!(
            fetched.into_text(&url()),
            Err(FetchError::Decode { .. })
        ));
    }
}
