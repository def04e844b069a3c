use super::{ApiError, Upload};
use crate::{
    alert::AlertPolicy,
    frames::{DecodeError, Frame, VideoFrames},
    scorer::LabelScorer,
    server::SharedState,
    video::{VideoAggregator, VideoSummary},
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::Json,
};
use std::{path::Path, time::Instant};
use tracing::instrument;

const ROUTE: &str = "/predict-video";
const DEFAULT_SUFFIX: &str = ".mp4";

/// Keeps the container extension of the upload so the decoder can probe it.
fn staging_suffix(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| DEFAULT_SUFFIX.to_string())
}

/// Scores every frame until the stream ends. A frame that fails to read ends
/// the stream early; the frames before it are still summarised.
fn summarise<I>(
    frames: I,
    scorer: &LabelScorer,
    policy: &AlertPolicy,
) -> Result<VideoSummary, ApiError>
where
    I: IntoIterator<Item = Result<Frame, DecodeError>>,
{
    let mut aggregator = VideoAggregator::new(policy);

    for frame in frames {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    "Stopping after {} frames: {}",
                    aggregator.total_frames(),
                    e
                );
                break;
            }
        };
        let prediction = scorer.score(&frame)?;
        aggregator.observe(&prediction);
    }

    Ok(aggregator.finish()?)
}

#[instrument(skip(state, multipart))]
pub async fn predict_video(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VideoSummary>, ApiError> {
    let start = Instant::now();
    state.metrics.record_request(ROUTE);

    let upload = Upload::read(multipart?, "file", &[]).await?;
    let suffix = staging_suffix(upload.file_name.as_deref());
    let video_data = upload.file.ok_or(ApiError::MissingField("file"))?;

    let staged = state.storage.stage(video_data, &suffix).await?;

    let scorer = state.scorer.clone();
    let alerts = state.alerts.clone();
    let summary = tokio::task::spawn_blocking(move || -> Result<VideoSummary, ApiError> {
        let frames = VideoFrames::open(staged.path())?;
        summarise(frames, &scorer, alerts.policy())
    })
    .await??;
    state
        .metrics
        .record_frames_scored(summary.total_frames as u64, ROUTE);

    tracing::info!(
        "Analysed {} frames, alert-worthy labels: {:?}",
        summary.total_frames,
        summary.alerts
    );
    state.alerts.dispatch_video(&summary);

    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, ROUTE);
    Ok(Json(summary))
}
