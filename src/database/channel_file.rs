use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info};

/// plain text channel list, one id per line. The only thing that outlives the process
#[derive(Debug, Clone)]
pub struct ChannelFile {
    path: PathBuf,
}

impl ChannelFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// a missing file just means nothing was uploaded yet
    pub async fn load(&self) -> anyhow::Result<Vec<String>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no channel file at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read channel file {}", self.path.display())
                });
            }
        };

        let channels: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        info!(
            "loaded {} channels from {}",
            channels.len(),
            self.path.display()
        );
        Ok(channels)
    }

    pub async fn save(&self, channels: &[String]) -> anyhow::Result<()> {
        let mut text = channels.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }

        tokio::fs::write(&self.path, text)
            .await
            .with_context(|| format!("Failed to write channel file {}", self.path.display()))?;

        info!(
            "saved {} channels to {}",
            channels.len(),
            self.path.display()
        );
        Ok(())
    }
}
