use serde::{Deserialize, Serialize};

/// newline separated ids, same shape the landing page form posts
#[derive(Debug, Deserialize)]
pub struct UploadChannelsRequest {
    #[serde(default)]
    pub channels: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadChannelsResponse {
    pub status: String,
    pub channels: Vec<String>,
}

impl UploadChannelsResponse {
    pub fn success(channels: Vec<String>) -> Self {
        Self {
            status: "success".to_string(),
            channels,
        }
    }
}
