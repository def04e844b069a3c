mod error;
mod health;
mod metrics;
mod predict_image;
mod predict_video;
mod predict_webcam;

pub use error::ApiError;

use crate::server::SharedState;
use axum::{
    extract::Multipart,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use std::collections::HashMap;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(health::index))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/predict-image", post(predict_image::predict_image))
        .route("/predict-video", post(predict_video::predict_video))
        .route("/predict-webcam", post(predict_webcam::predict_webcam))
}

/// The uploaded file part plus the named text fields that came with it.
/// Parts nobody asked for are skipped unread.
#[derive(Default)]
struct Upload {
    file: Option<Bytes>,
    file_name: Option<String>,
    fields: HashMap<String, String>,
}

impl Upload {
    async fn read(
        mut multipart: Multipart,
        file_field: &str,
        text_fields: &[&str],
    ) -> Result<Self, ApiError> {
        let mut upload = Upload::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == file_field {
                upload.file_name = field.file_name().map(str::to_string);
                upload.file = Some(field.bytes().await?);
            } else if text_fields.contains(&name.as_str()) {
                let value = field.text().await?;
                upload.fields.insert(name, value);
            } else {
                tracing::debug!("Ignoring multipart field `{}`", name);
            }
        }
        Ok(upload)
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}
