use super::{ApiError, Upload};
use crate::{
    dispatch::Location,
    frames::decode_live_frame,
    scorer::PredictionResult,
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::header,
    response::Json,
};
use std::time::Instant;
use tracing::instrument;

const ROUTE: &str = "/predict-webcam";

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart"))
}

/// Accepts either a raw encoded frame as the body, or a multipart form with a
/// `frame` part and optional `latitude` / `longitude` fields.
#[instrument(skip(state, request))]
pub async fn predict_webcam(
    State(state): State<SharedState>,
    request: Request,
) -> Result<Json<PredictionResult>, ApiError> {
    let start = Instant::now();
    state.metrics.record_request(ROUTE);

    let (frame_data, location) = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &state).await?;
        let upload = Upload::read(multipart, "frame", &["latitude", "longitude"]).await?;
        let location = Location::parse(upload.field("latitude"), upload.field("longitude"));
        let frame_data = upload.file.ok_or(ApiError::MissingField("frame"))?;
        (frame_data, location)
    } else {
        (Bytes::from_request(request, &state).await?, None)
    };

    let scorer = state.scorer.clone();
    let prediction = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let frame = decode_live_frame(&frame_data)?;
        Ok(scorer.score(&frame)?)
    })
    .await??;
    state.metrics.record_frames_scored(1, ROUTE);

    state
        .alerts
        .dispatch_live(&prediction, location, Instant::now());

    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, ROUTE);
    Ok(Json(prediction))
}
