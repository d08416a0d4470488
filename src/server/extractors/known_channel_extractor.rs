use axum::Extension;
use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use tracing::debug;

use crate::server::error::Error;
use crate::server::services::RelayServices;

/// a channel id out of the path that's known to be configured, along with the services. Any
/// route with a `{channel}` segment can take this instead of checking by hand
pub struct KnownChannel(pub String, pub RelayServices);

impl<S> FromRequestParts<S> for KnownChannel
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(services): Extension<RelayServices> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|err| Error::InternalServerErrorWithContext(err.to_string()))?;

        let Path(raw): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(|err| Error::BadRequest(err.to_string()))?;

        // "/stream/espn.m3u8" and "/stream/espn" are the same channel
        let channel_id = raw.strip_suffix(".m3u8").unwrap_or(&raw).to_string();

        if !services.channels.is_configured(&channel_id) {
            debug!("request for unconfigured channel {:?}", channel_id);
            return Err(Error::NotFound(format!(
                "channel {} is not configured",
                channel_id
            )));
        }

        Ok(KnownChannel(channel_id, services))
    }
}
