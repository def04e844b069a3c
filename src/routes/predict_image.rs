use super::{ApiError, Upload};
use crate::{frames::decode_image, scorer::PredictionResult, server::SharedState};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::Json,
};
use std::time::Instant;
use tracing::instrument;

const ROUTE: &str = "/predict-image";

#[instrument(skip(state, multipart))]
pub async fn predict_image(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let start = Instant::now();
    state.metrics.record_request(ROUTE);

    let upload = Upload::read(multipart?, "file", &[]).await?;
    let image_data = upload.file.ok_or(ApiError::MissingField("file"))?;

    let scorer = state.scorer.clone();
    let prediction = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let frame = decode_image(&image_data)?;
        Ok(scorer.score(&frame)?)
    })
    .await??;
    state.metrics.record_frames_scored(1, ROUTE);

    tracing::debug!("Predicted {:?}", prediction.labels);
    state.alerts.dispatch_image(&prediction);

    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, ROUTE);
    Ok(Json(prediction))
}
