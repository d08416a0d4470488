use std::fmt;

use serde::Serialize;
use tokio::time::Instant;
use url::Url;

/// the extraction rules, in the order they're tried. The first rule that finds anything wins,
/// so the most specific patterns go first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleTag {
    /// link on the delivery cdn with its access token attached
    DeliveryCdn,
    /// any m3u8 link carrying a token= query param
    Tokenized,
    /// player config like `source: "..."`, `file: "..."`, `src: "..."`
    PlayerSource,
    /// `var x = "..."` style assignment in inline js
    ScriptAssignment,
    /// any quoted absolute m3u8 link
    QuotedString,
    /// last resort, any absolute m3u8 link in free text
    BareUrl,
}

impl RuleTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeliveryCdn => "delivery-cdn",
            Self::Tokenized => "tokenized",
            Self::PlayerSource => "player-source",
            Self::ScriptAssignment => "script-assignment",
            Self::QuotedString => "quoted-string",
            Self::BareUrl => "bare-url",
        }
    }
}

impl fmt::Display for RuleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// what the extractor believes is the live playlist, plus which rule found it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUrl {
    pub url: Url,
    pub rule: RuleTag,
    /// true when it was only found after unescaping the page's script blocks
    pub from_script: bool,
}

/// the proxy's current belief about one channel. Only the channel cache builds these and they're
/// handed out as clones, so a refresh can never be seen half applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    channel_id: String,
    playlist_url: Url,
    base_location: Url,
    rule: RuleTag,
    expires_at: Instant,
}

impl ChannelEntry {
    /// base location is always derived here so it can't drift from the playlist url
    pub fn new(channel_id: impl Into<String>, candidate: CandidateUrl, expires_at: Instant) -> Self {
        let base_location = base_location_of(&candidate.url);
        Self {
            channel_id: channel_id.into(),
            playlist_url: candidate.url,
            base_location,
            rule: candidate.rule,
            expires_at,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn playlist_url(&self) -> &Url {
        &self.playlist_url
    }

    pub fn base_location(&self) -> &Url {
        &self.base_location
    }

    pub fn rule(&self) -> RuleTag {
        self.rule
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// scheme + host + directory of the url, query and fragment dropped.
/// `https://cdn.example.com/live/abc.m3u8?token=T1` -> `https://cdn.example.com/live/`
pub fn base_location_of(url: &Url) -> Url {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);

    // cannot-be-a-base urls (data:, mailto:) have no segments to pop, they just stay as is
    if let Ok(mut segments) = base.path_segments_mut() {
        segments.pop().push("");
    }

    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_location_drops_file_and_query() {
        let url = Url::parse("https://cdn.example.com/live/abc.m3u8?token=T1").unwrap();
        assert_eq!(
            base_location_of(&url).as_str(),
            "https://cdn.example.com/live/"
        );
    }

    #[test]
    fn base_location_keeps_port_and_nested_dirs() {
        let url = Url::parse("http://edge.example.net:8443/a/b/c/mono.m3u8").unwrap();
        assert_eq!(
            base_location_of(&url).as_str(),
            "http://edge.example.net:8443/a/b/c/"
        );
    }

    #[test]
    fn base_location_of_root_file() {
        let url = Url::parse("https://cdn.example.com/index.m3u8").unwrap();
        assert_eq!(base_location_of(&url).as_str(), "https://cdn.example.com/");
    }
}
