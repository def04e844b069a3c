use crate::{
    frames::DecodeError, model_service::InferenceError, storage::StorageError,
    video::SummaryError,
};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::BytesRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No {0} uploaded")]
    MissingField(&'static str),
    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Invalid multipart request: {0}")]
    MultipartRejection(#[from] MultipartRejection),
    #[error("Invalid request body: {0}")]
    Body(#[from] BytesRejection),
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("{0}")]
    EmptyVideo(#[from] SummaryError),
    #[error("Prediction error: {0}")]
    Inference(#[from] InferenceError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MultipartRejection(rejection) => rejection.status(),
            ApiError::Body(rejection) => rejection.status(),
            ApiError::Multipart(err) => err.status(),
            ApiError::MissingField(_) | ApiError::Decode(_)
            | ApiError::EmptyVideo(_) => StatusCode::BAD_REQUEST,
            ApiError::Inference(_) | ApiError::Storage(_) | ApiError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Rejected request: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            ApiError::MissingField("file").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(DecodeError::EmptyInput).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SummaryError::NoFrames).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(InferenceError::Run("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(StorageError::Upload("denied".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_field_message() {
        assert_eq!(ApiError::MissingField("file").to_string(), "No file uploaded");
    }
}
