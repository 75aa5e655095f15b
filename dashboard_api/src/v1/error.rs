use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dispatch_core::error::ResourceUpdateError;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    #[serde(serialize_with = "serialize_status")]
    pub status_code: StatusCode,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    ResourceUpdate(#[from] ResourceUpdateError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(what) => {
                ErrorMessage::from((StatusCode::NOT_FOUND, format!("{what} not found")))
                    .into_response()
            }
            ApiError::BadRequest(message) => {
                ErrorMessage::from((StatusCode::BAD_REQUEST, message)).into_response()
            }
            ApiError::ResourceUpdate(e) => match e {
                ResourceUpdateError::UnknownFacility(_) | ResourceUpdateError::UnknownUnit { .. } => {
                    ErrorMessage::from((StatusCode::NOT_FOUND, e.to_string())).into_response()
                }
                ResourceUpdateError::OutOfRange { .. } => {
                    ErrorMessage::from((StatusCode::BAD_REQUEST, e.to_string())).into_response()
                }
                ResourceUpdateError::Persist(e) => {
                    warn!(error = ?e, "failed to persist operator change");
                    ErrorMessage::from((StatusCode::INTERNAL_SERVER_ERROR, "")).into_response()
                }
            },
        }
    }
}

fn serialize_status<S>(value: &StatusCode, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u16(value.as_u16())
}

impl From<(StatusCode, String)> for ErrorMessage {
    fn from((status_code, message): (StatusCode, String)) -> Self {
        Self {
            status_code,
            message,
        }
    }
}

impl From<(StatusCode, &str)> for ErrorMessage {
    fn from((status_code, message): (StatusCode, &str)) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ErrorMessage {
    fn into_response(self) -> Response {
        (self.status_code, Json(self)).into_response()
    }
}
