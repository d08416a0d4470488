use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::{config::AppConfig, database::ChannelFile};

const MAX_CHANNEL_ID_LEN: usize = 64;

pub type DynChannelService = Arc<dyn ChannelServiceTrait + Send + Sync>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid channel id: {0}")]
    Invalid(String),

    #[error("failed to persist channel list: {0}")]
    Persist(String),
}

#[automock]
#[async_trait]
pub trait ChannelServiceTrait {
    /// configured channels in the order they were given
    fn channels(&self) -> Vec<String>;

    fn is_configured(&self, channel_id: &str) -> bool;

    /// newline seperated list, replaces everything and gets written to the channel file
    async fn replace(&self, raw: &str) -> Result<Vec<String>, ChannelError>;
}

/// letters, digits, dot, dash and underscore. Ids end up in urls and in the origin page query so
/// nothing else is let through
pub fn is_valid_channel_id(channel_id: &str) -> bool {
    !channel_id.is_empty()
        && channel_id.len() <= MAX_CHANNEL_ID_LEN
        && channel_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

pub struct ChannelService {
    channels: RwLock<Vec<String>>,
    file: ChannelFile,
}

impl ChannelService {
    pub fn new(file: ChannelFile, channels: Vec<String>) -> Self {
        Self {
            channels: RwLock::new(Self::dedup_valid(channels)),
            file,
        }
    }

    /// configured list first, then whatever was uploaded last time
    pub async fn load(config: &AppConfig) -> Self {
        let file = ChannelFile::new(&config.channels_file);

        let mut channels = config.channels.clone();
        match file.load().await {
            Ok(stored) => channels.extend(stored),
            Err(e) => warn!("ignoring channel file: {:?}", e),
        }

        let service = Self::new(file, channels);
        info!("{} channels configured", service.channels.read().len());
        service
    }

    /// trims, drops blanks and duplicates, rejects anything that isn't a valid id
    pub fn parse_list(raw: &str) -> Result<Vec<String>, ChannelError> {
        let mut seen = HashSet::new();
        let mut channels = Vec::new();

        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !is_valid_channel_id(line) {
                return Err(ChannelError::Invalid(line.to_string()));
            }
            if seen.insert(line.to_string()) {
                channels.push(line.to_string());
            }
        }

        Ok(channels)
    }

    // startup is lenient, a bad line in the file shouldn't take the rest down with it
    fn dedup_valid(channels: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        channels
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .filter(|c| {
                let valid = is_valid_channel_id(c);
                if !valid {
                    warn!("skipping invalid channel id {:?}", c);
                }
                valid
            })
            .filter(|c| seen.insert(c.clone()))
            .collect()
    }
}

#[async_trait]
impl ChannelServiceTrait for ChannelService {
    fn channels(&self) -> Vec<String> {
        self.channels.read().clone()
    }

    fn is_configured(&self, channel_id: &str) -> bool {
        self.channels.read().iter().any(|c| c == channel_id)
    }

    async fn replace(&self, raw: &str) -> Result<Vec<String>, ChannelError> {
        let channels = Self::parse_list(raw)?;

        // file first, memory only changes once it's actually saved
        self.file
            .save(&channels)
            .await
            .map_err(|e| ChannelError::Persist(format!("{:#}", e)))?;

        *self.channels.write() = channels.clone();
        info!("channel list replaced, {} channels", channels.len());
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_channel_ids() {
        assert!(is_valid_channel_id("espn"));
        assert!(is_valid_channel_id("fox_1.hd-2"));
        assert!(!is_valid_channel_id(""));
        assert!(!is_valid_channel_id("a b"));
        assert!(!is_valid_channel_id("../etc"));
        assert!(!is_valid_channel_id(&"a".repeat(65)));
    }

    #[test]
    fn startup_list_skips_invalid_and_duplicates() {
        let service = ChannelService::new(
            ChannelFile::new("unused.txt"),
            vec![
                "espn".to_string(),
                " fox1 ".to_string(),
                "bad id".to_string(),
                "espn".to_string(),
                String::new(),
            ],
        );
        assert_eq!(service.channels(), vec!["espn", "fox1"]);
    }
}
