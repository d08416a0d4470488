use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error};
use url::Url;

use crate::database::channel::base_location_of;
use crate::server::utils::reference_utils::ReferenceSigner;

// the URI attribute has to start an attribute, otherwise KEYFORMATURI-ish names would match too
static URI_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[:,])\s*URI="([^"]*)""#).expect("Static regex should parse")
});

/// tags whose next uri line is the thing they describe
const SEGMENT_MARKERS: [&str; 2] = ["#EXTINF", "#EXT-X-STREAM-INF"];

/// tags that carry their resource inside a quoted URI attribute
const URI_DIRECTIVES: [&str; 8] = [
    "#EXT-X-KEY",
    "#EXT-X-SESSION-KEY",
    "#EXT-X-MAP",
    "#EXT-X-MEDIA",
    "#EXT-X-I-FRAME-STREAM-INF",
    // low latency parts and hints
    "#EXT-X-PART",
    "#EXT-X-PRELOAD-HINT",
    "#EXT-X-RENDITION-REPORT",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    SegmentMarker,
    UriDirective,
    /// any other tag or comment
    Directive,
    Reference,
}

pub fn classify(line: &str) -> LineKind {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if !trimmed.starts_with('#') {
        return LineKind::Reference;
    }

    let tag = trimmed.split(':').next().unwrap_or(trimmed);
    if SEGMENT_MARKERS.contains(&tag) {
        LineKind::SegmentMarker
    } else if URI_DIRECTIVES.contains(&tag) {
        LineKind::UriDirective
    } else {
        LineKind::Directive
    }
}

pub struct ManifestRewriter {
    signer: ReferenceSigner,
}

impl ManifestRewriter {
    pub fn new(signer: ReferenceSigner) -> Self {
        Self { signer }
    }

    /// points every segment, key and sub-playlist in the document at the proxy. Line count and
    /// order never change, only reference values do. Never fails, anything it can't make sense
    /// of goes out exactly as it came in
    pub fn rewrite(&self, document: &str, base_location: &Url, channel_id: &str) -> String {
        let normalized = normalize_line_endings(document);

        let mut expecting_reference = false;
        let mut rewritten = 0usize;

        let lines: Vec<Cow<str>> = normalized
            .split('\n')
            .map(|line| match classify(line) {
                LineKind::SegmentMarker => {
                    expecting_reference = true;
                    Cow::Borrowed(line)
                }
                LineKind::Reference if expecting_reference => {
                    expecting_reference = false;
                    match self.proxy_path(line.trim(), base_location, channel_id) {
                        Some(path) => {
                            rewritten += 1;
                            Cow::Owned(path)
                        }
                        None => Cow::Borrowed(line),
                    }
                }
                LineKind::UriDirective => {
                    match self.rewrite_uri_attribute(line, base_location, channel_id) {
                        Some(replaced) => {
                            rewritten += 1;
                            Cow::Owned(replaced)
                        }
                        None => Cow::Borrowed(line),
                    }
                }
                // blank lines and other tags don't reset the flag, only a reference does
                LineKind::Blank | LineKind::Directive | LineKind::Reference => Cow::Borrowed(line),
            })
            .collect();

        debug!(
            "rewrote {} of {} lines for channel {}",
            rewritten,
            lines.len(),
            channel_id
        );

        lines.join("\n")
    }

    /// for playlists fetched through the segment route, relative links resolve against wherever
    /// that playlist itself lives
    pub fn rewrite_nested(&self, document: &str, source_url: &Url, channel_id: &str) -> String {
        self.rewrite(document, &base_location_of(source_url), channel_id)
    }

    fn proxy_path(&self, reference: &str, base_location: &Url, channel_id: &str) -> Option<String> {
        let resolved = resolve_reference(reference, base_location)?;
        Some(self.signer.sign(channel_id, &resolved).proxy_path(channel_id))
    }

    /// swaps only the quoted URI value, METHOD/IV/KEYFORMAT and friends stay put
    fn rewrite_uri_attribute(
        &self,
        line: &str,
        base_location: &Url,
        channel_id: &str,
    ) -> Option<String> {
        let captures = URI_ATTRIBUTE.captures(line)?;
        let value = captures.get(1)?;
        let path = self.proxy_path(value.as_str(), base_location, channel_id)?;

        let mut replaced = String::with_capacity(line.len() + path.len());
        replaced.push_str(&line[..value.start()]);
        replaced.push_str(&path);
        replaced.push_str(&line[value.end()..]);
        Some(replaced)
    }
}

/// absolute http(s) links are kept exactly as written, the url parser only vets them. Relative
/// ones are joined onto the base. Anything else (skd://, data:, garbage) isn't ours to proxy
pub fn resolve_reference(reference: &str, base_location: &Url) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }

    match Url::parse(reference) {
        Ok(absolute) => match absolute.scheme() {
            "http" | "https" if absolute.host_str().is_some() => Some(reference.to_string()),
            _ => None,
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => match base_location.join(reference) {
            Ok(joined) => match joined.scheme() {
                "http" | "https" => Some(joined.into()),
                _ => None,
            },
            Err(e) => {
                error!("Failed to resolve: {} - {}", reference, e);
                None
            }
        },
        Err(e) => {
            error!("Failed to parse reference: {} - {}", reference, e);
            None
        }
    }
}

/// \r\n and lone \r both become \n
pub fn normalize_line_endings(document: &str) -> Cow<'_, str> {
    if document.contains('\r') {
        Cow::Owned(document.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(document)
    }
}
