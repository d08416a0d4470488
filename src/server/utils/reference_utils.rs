use std::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;
use url::Url;

use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

/// where rewritten segment, key and sub-playlist links point to
pub const SEGMENT_ROUTE_PREFIX: &str = "/proxy/segment";

// not part of the url safe base64 alphabet, so the split is unambiguous
const SIGNATURE_SEPARATOR: char = '.';

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("missing ref parameter")]
    Missing,

    #[error("invalid reference encoding")]
    Encoding,

    #[error("reference is not signed")]
    Unsigned,

    #[error("reference signature does not match")]
    BadSignature,

    #[error("reference is not a valid url: {0}")]
    InvalidUrl(String),

    #[error("only http and https references can be proxied")]
    UnsupportedScheme,
}

/// signs the links the rewriter hands out so the segment route only fetches urls that came out of
/// a playlist we served
#[derive(Clone)]
pub struct ReferenceSigner {
    secret: Arc<[u8]>,
}

impl ReferenceSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    /// key that only lives as long as this process
    pub fn random() -> Self {
        let secret: [u8; 32] = rand::random();
        Self::new(secret)
    }

    pub fn from_config(config: &AppConfig) -> Self {
        match config
            .reference_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
        {
            Some(secret) => Self::new(secret),
            None => {
                warn!("no reference secret configured, proxied links won't survive a restart");
                Self::random()
            }
        }
    }

    /// sig is based on: channel_id + url, so a link handed out for one channel can't be replayed
    /// against another
    fn mac(&self, channel_id: &str, url: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(channel_id.as_bytes());
        mac.update(b"\n");
        mac.update(url.as_bytes());
        mac
    }

    pub fn sign(&self, channel_id: &str, url: &str) -> ProxyReference {
        let signature = hex::encode(self.mac(channel_id, url).finalize().into_bytes());

        ProxyReference(format!(
            "{}{}{}",
            URL_SAFE_NO_PAD.encode(url.as_bytes()),
            SIGNATURE_SEPARATOR,
            signature
        ))
    }

    fn verify(&self, channel_id: &str, url: &str, signature: &str) -> bool {
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };

        // verify_slice compares in constant time
        self.mac(channel_id, url).verify_slice(&signature).is_ok()
    }
}

/// origin url hidden inside a rewritten playlist, `{base64 url}.{hex hmac}`. Both halves are
/// query safe so the value never needs escaping, and the url half decodes back to the exact
/// string the playlist had
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyReference(String);

impl ProxyReference {
    /// wraps a value that came back in a `ref=` query param, nothing is checked until decode
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> (&str, Option<&str>) {
        match self.0.trim().split_once(SIGNATURE_SEPARATOR) {
            Some((payload, signature)) => (payload, Some(signature)),
            None => (self.0.trim(), None),
        }
    }

    /// the original url string, byte for byte. Padded input is accepted too since some clients
    /// pad base64 on their own
    pub fn decode(&self) -> Result<String, ReferenceError> {
        let payload = self.split().0.trim_end_matches('=');
        if payload.is_empty() {
            return Err(ReferenceError::Missing);
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| ReferenceError::Encoding)?;

        String::from_utf8(bytes).map_err(|_| ReferenceError::Encoding)
    }

    /// decode, check the signature for this channel and make sure it's something we're actually
    /// willing to fetch
    pub fn to_url(&self, channel_id: &str, signer: &ReferenceSigner) -> Result<Url, ReferenceError> {
        let raw = self.decode()?;

        let signature = self.split().1.ok_or(ReferenceError::Unsigned)?;
        if !signer.verify(channel_id, &raw, signature) {
            return Err(ReferenceError::BadSignature);
        }

        let url = Url::parse(&raw).map_err(|e| ReferenceError::InvalidUrl(e.to_string()))?;

        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Ok(url),
            _ => Err(ReferenceError::UnsupportedScheme),
        }
    }

    /// `/proxy/segment/{channel}?ref={reference}`
    pub fn proxy_path(&self, channel_id: &str) -> String {
        format!(
            "{}/{}?ref={}",
            SEGMENT_ROUTE_PREFIX,
            urlencoding::encode(channel_id),
            self.0
        )
    }
}

impl fmt::Display for ProxyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
