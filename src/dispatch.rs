use crate::{
    alert::AlertPolicy,
    notifier::Notifier,
    scorer::{PredictionResult, ScoredLabel},
    telemetry::Metrics,
    video::VideoSummary,
};
use std::{collections::HashSet, sync::Arc, time::Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Parses optional form values; anything missing or non-numeric yields `None`.
    pub fn parse(latitude: Option<&str>, longitude: Option<&str>) -> Option<Self> {
        let (latitude, longitude) = (latitude?, longitude?);
        match (latitude.trim().parse(), longitude.trim().parse()) {
            (Ok(latitude), Ok(longitude)) => Some(Self {
                latitude,
                longitude,
            }),
            _ => {
                tracing::warn!(
                    "Location error: could not parse latitude `{}` / longitude `{}`",
                    latitude,
                    longitude
                );
                None
            }
        }
    }
}

enum Message {
    Text(String),
    Location(Location),
}

pub fn label_alert_message(scored: &ScoredLabel) -> String {
    format!(
        "ALERT: {} detected with confidence {:.2}. Immediate action required.",
        scored.label.to_uppercase(),
        scored.confidence
    )
}

pub fn video_alert_message(summary: &VideoSummary) -> String {
    let shares = summary
        .summary
        .iter()
        .map(|share| format!("{}: {:.2}%", share.label, share.percentage * 100.0))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "ALERT: The video analysis detected the following: {}.\nTotal Frames Analyzed: {}.\nSummary: {}",
        summary.alerts.join(", ").to_uppercase(),
        summary.total_frames,
        shares
    )
}

/// Turns predictions into notifier calls.
///
/// Sends run on a spawned task; their outcome is only logged and counted, it
/// never reaches the request that triggered them.
pub struct AlertDispatcher {
    policy: Arc<AlertPolicy>,
    channel: Option<(Arc<dyn Notifier>, String)>,
    metrics: Arc<Metrics>,
}

impl AlertDispatcher {
    pub fn new(
        policy: Arc<AlertPolicy>,
        channel: Option<(Arc<dyn Notifier>, String)>,
        metrics: Arc<Metrics>,
    ) -> Self {
        if channel.is_none() {
            tracing::warn!("Notifier credentials not configured, alerts will only be logged");
        }
        Self {
            policy,
            channel,
            metrics,
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// One alert per distinct alert-worthy label of a one-shot image request.
    pub fn dispatch_image(&self, prediction: &PredictionResult) -> Option<JoinHandle<()>> {
        let mut seen = HashSet::new();
        let messages: Vec<Message> = prediction
            .iter()
            .filter(|scored| self.policy.is_alert_worthy(&scored.label))
            .filter(|scored| seen.insert(scored.label.as_str()))
            .map(|scored| Message::Text(label_alert_message(scored)))
            .collect();

        self.send("image", messages)
    }

    /// Cooldown-gated alerts for the live feed, each followed by the location
    /// when one was supplied.
    pub fn dispatch_live(
        &self,
        prediction: &PredictionResult,
        location: Option<Location>,
        now: Instant,
    ) -> Option<JoinHandle<()>> {
        if self.channel.is_none() {
            return None;
        }

        let mut messages = Vec::new();
        for scored in prediction.iter() {
            if self.policy.should_alert(&scored.label, now) {
                messages.push(Message::Text(label_alert_message(scored)));
                if let Some(location) = location {
                    messages.push(Message::Location(location));
                }
            }
        }

        self.send("webcam", messages)
    }

    /// A single alert describing the whole video.
    pub fn dispatch_video(&self, summary: &VideoSummary) -> Option<JoinHandle<()>> {
        if summary.alerts.is_empty() {
            return None;
        }
        self.send("video", vec![Message::Text(video_alert_message(summary))])
    }

    fn send(&self, kind: &'static str, messages: Vec<Message>) -> Option<JoinHandle<()>> {
        if messages.is_empty() {
            return None;
        }
        let Some((notifier, chat_id)) = self.channel.clone() else {
            tracing::info!(
                "Skipping {} {} alert(s): notifier not configured",
                messages.len(),
                kind
            );
            return None;
        };
        let metrics = self.metrics.clone();

        Some(tokio::spawn(async move {
            for message in messages {
                let result = match &message {
                    Message::Text(text) => notifier.send_text(&chat_id, text).await,
                    Message::Location(location) => {
                        notifier
                            .send_location(&chat_id, location.latitude, location.longitude)
                            .await
                    }
                };
                match result {
                    Ok(status) => {
                        tracing::info!("Sent {} alert (status {})", kind, status);
                        metrics.record_alert_sent(kind);
                    }
                    Err(e) => {
                        tracing::error!("Failed to send {} alert: {}", kind, e);
                        metrics.record_alert_failure(kind);
                    }
                }
            }
        }))
    }
}
