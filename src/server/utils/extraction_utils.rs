// finds the live m3u8 link inside the origin's player page. The origin changes its markup every
// so often so none of this is a real parser, it's a list of regexes tried in order and the first
// one that hits wins. New heuristics go in `build_rules`, not in new control flow
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::database::channel::{CandidateUrl, RuleTag};

static SCRIPT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script").expect("Static selector should parse"));

// \uXXXX and \xXX escapes, these show up when the link sits in a json blob inside a script
static JS_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\u([0-9a-fA-F]{4})|\\x([0-9a-fA-F]{2})").expect("Static regex should parse")
});

// characters that can show up in a url inside html/js without ending it
const URL_CHAR: &str = r#"[^\s"'<>\\]"#;

pub struct ExtractionRule {
    pub tag: RuleTag,
    pattern: Regex,
    // capture group holding the url, 0 for the whole match
    group: usize,
}

impl ExtractionRule {
    fn new(tag: RuleTag, pattern: &str, group: usize) -> Self {
        Self {
            tag,
            pattern: Regex::new(pattern).expect("Extraction rule should compile"),
            group,
        }
    }
}

pub struct PlaylistExtractor {
    cdn_domain: String,
    rules: Vec<ExtractionRule>,
}

impl PlaylistExtractor {
    pub fn new(cdn_domain: &str) -> Self {
        let cdn_domain = cdn_domain.trim().trim_start_matches('.').to_lowercase();
        let rules = Self::build_rules(&cdn_domain);
        Self { cdn_domain, rules }
    }

    fn build_rules(cdn_domain: &str) -> Vec<ExtractionRule> {
        let mut rules = Vec::new();

        // an empty domain would match every host, just leave the rule out
        if !cdn_domain.is_empty() {
            rules.push(ExtractionRule::new(
                RuleTag::DeliveryCdn,
                &format!(
                    r"(?i)https?://(?:[a-z0-9-]+\.)*{}(?::\d+)?/{u}*?\.m3u8(?:\?{u}*)?",
                    regex::escape(cdn_domain),
                    u = URL_CHAR
                ),
                0,
            ));
        }

        rules.push(ExtractionRule::new(
            RuleTag::Tokenized,
            &format!(
                r"(?i)https?://{u}+?\.m3u8\?{u}*?\btoken={u}+",
                u = URL_CHAR
            ),
            0,
        ));
        rules.push(ExtractionRule::new(
            RuleTag::PlayerSource,
            r#"(?i)\b(?:source|file|src)\s*[:=]\s*["'](https?://[^"'\s]+?\.m3u8[^"'\s]*)["']"#,
            1,
        ));
        rules.push(ExtractionRule::new(
            RuleTag::ScriptAssignment,
            r#"(?i)\b(?:var|let|const)\s+[\w$]+\s*=\s*["'](https?://[^"'\s]+?\.m3u8[^"'\s]*)["']"#,
            1,
        ));
        rules.push(ExtractionRule::new(
            RuleTag::QuotedString,
            r#"(?i)["'](https?://[^"'\s]+?\.m3u8(?:\?[^"'\s]*)?)["']"#,
            1,
        ));
        rules.push(ExtractionRule::new(
            RuleTag::BareUrl,
            &format!(r"(?i)https?://{u}+?\.m3u8(?:\?{u}*)?", u = URL_CHAR),
            0,
        ));

        rules
    }

    /// rule tags in the order they're tried
    pub fn rule_order(&self) -> Vec<RuleTag> {
        self.rules.iter().map(|r| r.tag).collect()
    }

    /// the page first, then the unescaped text of its script blocks. Not finding anything is
    /// normal and just means the origin has nothing live right now
    pub fn extract(&self, page: &str) -> Option<CandidateUrl> {
        if let Some(found) = self.scan(page, false) {
            return Some(found);
        }

        let scripts = Self::script_text(page);
        if scripts.is_empty() {
            return None;
        }

        self.scan(&unescape_js(&scripts), true)
    }

    fn scan(&self, text: &str, from_script: bool) -> Option<CandidateUrl> {
        for rule in &self.rules {
            let matches: Vec<Url> = rule
                .pattern
                .captures_iter(text)
                .filter_map(|caps| caps.get(rule.group))
                .filter_map(|m| parse_candidate(m.as_str()))
                .collect();

            // cdn links beat everything else the same rule found, otherwise document order
            let chosen = matches
                .iter()
                .find(|url| self.is_cdn_host(url))
                .or_else(|| matches.first());

            if let Some(url) = chosen {
                debug!(
                    "rule {} matched {} candidate(s), picked {}",
                    rule.tag,
                    matches.len(),
                    url
                );
                return Some(CandidateUrl {
                    url: url.clone(),
                    rule: rule.tag,
                    from_script,
                });
            }
        }

        None
    }

    pub fn is_cdn_host(&self, url: &Url) -> bool {
        if self.cdn_domain.is_empty() {
            return false;
        }

        match url.host_str() {
            Some(host) => {
                host == self.cdn_domain
                    || host
                        .strip_suffix(self.cdn_domain.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }
            None => false,
        }
    }

    /// every script block joined together. html5ever never errors on bad markup so a broken page
    /// just gives us whatever it could recover
    fn script_text(page: &str) -> String {
        let document = Html::parse_document(page);
        document
            .select(&SCRIPT_SELECTOR)
            .map(|script| script.text().collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn parse_candidate(raw: &str) -> Option<Url> {
    let cleaned = raw.replace("&amp;", "&");
    let url = Url::parse(&cleaned).ok()?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url),
        _ => None,
    }
}

/// undo the js string escapes that hide links, `https:\/\/a.b\/x.m3u8?a=1&token=2`
pub fn unescape_js(text: &str) -> String {
    let text = text.replace("\\/", "/");

    JS_ESCAPE
        .replace_all(&text, |caps: &regex::Captures| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .and_then(|hex| u32::from_str_radix(hex.as_str(), 16).ok())
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescapes_slashes_and_hex_escapes() {
        assert_eq!(
            unescape_js(r"https:\/\/a.b\/x.m3u8?a=1&token=2\x26b=3"),
            "https://a.b/x.m3u8?a=1&token=2&b=3"
        );
    }

    #[test]
    fn cdn_host_requires_label_boundary() {
        let extractor = PlaylistExtractor::new("cdn.example.com");
        let own = Url::parse("https://edge1.cdn.example.com/a.m3u8").unwrap();
        let exact = Url::parse("https://cdn.example.com/a.m3u8").unwrap();
        let lookalike = Url::parse("https://evilcdn.example.com/a.m3u8").unwrap();

        assert!(extractor.is_cdn_host(&own));
        assert!(extractor.is_cdn_host(&exact));
        assert!(!extractor.is_cdn_host(&lookalike));
    }

    #[test]
    fn empty_domain_skips_cdn_rule() {
        let extractor = PlaylistExtractor::new("");
        assert_eq!(extractor.rule_order().first(), Some(&RuleTag::Tokenized));
    }
}
