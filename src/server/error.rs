use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::server::{
    services::{
        channel_cache_services::RefreshError, channel_services::ChannelError,
        fetch_services::FetchError,
    },
    utils::reference_utils::ReferenceError,
};

pub type AppResult<T> = Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    /// permanent, the channel isn't configured
    #[error("{0}")]
    NotFound(String),

    /// transient, origin or extraction failed so the player can retry
    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    InternalServerErrorWithContext(String),

    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::InternalServerErrorWithContext(_) | Self::AnyhowError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // don't hand internals to the client, they're in the logs
        let message = match &self {
            Self::AnyhowError(e) => {
                error!("unhandled error: {:?}", e);
                "internal server error".to_string()
            }
            Self::InternalServerErrorWithContext(context) => {
                error!("internal error: {}", context);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        Self::BadGateway(err.to_string())
    }
}

impl From<RefreshError> for Error {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::NotFound { channel } => {
                Self::BadGateway(format!("channel {} temporarily unavailable", channel))
            }
            RefreshError::Fetch(e) => Self::BadGateway(e.to_string()),
            RefreshError::InvalidOrigin(reason) => Self::InternalServerErrorWithContext(reason),
        }
    }
}

impl From<ReferenceError> for Error {
    fn from(err: ReferenceError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Invalid(id) => Self::BadRequest(format!("invalid channel id: {}", id)),
            ChannelError::Persist(reason) => Self::InternalServerErrorWithContext(reason),
        }
    }
}
