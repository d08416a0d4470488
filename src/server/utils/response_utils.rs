use std::io::Write;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use flate2::{Compression, write::GzEncoder};
use tracing::{debug, error};

use crate::server::error::{AppResult, Error};

pub const MPEGURL_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// compression we're willing to put on a playlist response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Zstd,
    Gzip,
    None,
}

impl ContentEncoding {
    /// apple's player sends "gzip, deflate" or "identity" and it has to be respected
    pub fn from_accept_encoding(accept_encoding: Option<&str>) -> Self {
        let Some(value) = accept_encoding else {
            return Self::None;
        };

        let offered: Vec<&str> = value
            .split(',')
            .filter_map(|part| {
                let mut pieces = part.split(';');
                let coding = pieces.next()?.trim();
                // "gzip;q=0" means no gzip
                let refused = pieces.any(|p| {
                    p.trim()
                        .strip_prefix("q=")
                        .and_then(|q| q.trim().parse::<f32>().ok())
                        .is_some_and(|q| q <= 0.0)
                });
                (!refused).then_some(coding)
            })
            .collect();

        if offered.iter().any(|c| c.eq_ignore_ascii_case("zstd")) {
            Self::Zstd
        } else if offered.iter().any(|c| c.eq_ignore_ascii_case("gzip")) {
            Self::Gzip
        } else {
            Self::None
        }
    }

    pub fn as_header_value(&self) -> Option<&'static str> {
        match self {
            Self::Zstd => Some("zstd"),
            Self::Gzip => Some("gzip"),
            Self::None => None,
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        match self {
            Self::Zstd => zstd::encode_all(data, 3),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::None => Ok(data.to_vec()),
        }
    }
}

/// playlist response with the headers players expect, compressed when the client allows it
pub fn build_m3u8_response(playlist: &str, request_headers: &HeaderMap) -> AppResult<Response> {
    let encoding = ContentEncoding::from_accept_encoding(
        request_headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok()),
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(MPEGURL_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::VARY, HeaderValue::from_static("accept-encoding"));

    let body = match encoding.as_header_value() {
        Some(value) => {
            let compressed = encoding.compress(playlist.as_bytes()).map_err(|e| {
                error!("failed to compress playlist with {:?}: {}", encoding, e);
                Error::InternalServerErrorWithContext("failed to compress response".to_string())
            })?;
            debug!(
                "compressed playlist with {:?} from {} to {} bytes",
                encoding,
                playlist.len(),
                compressed.len()
            );
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(value));
            compressed
        }
        None => playlist.as_bytes().to_vec(),
    };

    // players stop polling when this is missing
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

    Ok((StatusCode::OK, headers, body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_encoding_from_accept_header() {
        assert_eq!(
            ContentEncoding::from_accept_encoding(Some("gzip, deflate, br, zstd")),
            ContentEncoding::Zstd
        );
        assert_eq!(
            ContentEncoding::from_accept_encoding(Some("gzip, deflate")),
            ContentEncoding::Gzip
        );
        assert_eq!(
            ContentEncoding::from_accept_encoding(Some("identity")),
            ContentEncoding::None
        );
        assert_eq!(
            ContentEncoding::from_accept_encoding(Some("gzip;q=0, deflate")),
            ContentEncoding::None
        );
        assert_eq!(ContentEncoding::from_accept_encoding(None), ContentEncoding::None);
    }

    #[test]
    fn gzip_output_decodes_back() {
        use std::io::Read;

        let compressed = ContentEncoding::Gzip.compress(b"#EXTM3U\n").unwrap();
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "#EXTM3U\n");
    }

    #[test]
    fn uncompressed_playlist_has_length() {
        let response = build_m3u8_response("#EXTM3U\n", &HeaderMap::new()).unwrap();
        let headers = response.headers();

        assert_eq!(headers[header::CONTENT_TYPE], MPEGURL_CONTENT_TYPE);
        assert_eq!(headers[header::CONTENT_LENGTH], "8");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
    }
}
