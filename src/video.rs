use crate::{alert::AlertPolicy, scorer::PredictionResult};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SummaryError {
    #[error("Video contains no decodable frames")]
    NoFrames,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelShare {
    pub label: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoSummary {
    pub summary: Vec<LabelShare>,
    pub total_frames: usize,
    /// Distinct alert-worthy labels, in first-seen order.
    #[serde(skip)]
    pub alerts: Vec<String>,
}

#[cfg(test)]
impl VideoSummary {
    pub fn share_of(&self, label: &str) -> Option<f64> {
        self.summary
            .iter()
            .find(|share| share.label == label)
            .map(|share| share.percentage)
    }
}

/// Folds per-frame predictions into per-label frame shares.
///
/// Shares are independent: a frame carrying several labels counts once for each.
pub struct VideoAggregator<'a> {
    policy: &'a AlertPolicy,
    counts: HashMap<String, usize>,
    order: Vec<String>,
    alerts: Vec<String>,
    total_frames: usize,
}

impl<'a> VideoAggregator<'a> {
    pub fn new(policy: &'a AlertPolicy) -> Self {
        Self {
            policy,
            counts: HashMap::new(),
            order: Vec::new(),
            alerts: Vec::new(),
            total_frames: 0,
        }
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn observe(&mut self, prediction: &PredictionResult) {
        self.total_frames += 1;

        for scored in prediction.iter() {
            match self.counts.get_mut(&scored.label) {
                Some(count) => *count += 1,
                None => {
                    self.counts.insert(scored.label.clone(), 1);
                    self.order.push(scored.label.clone());
                    if self.policy.is_alert_worthy(&scored.label) {
                        self.alerts.push(scored.label.clone());
                    }
                }
            }
        }
    }

    pub fn finish(self) -> Result<VideoSummary, SummaryError> {
        if self.total_frames == 0 {
            return Err(SummaryError::NoFrames);
        }

        let total = self.total_frames as f64;
        let summary = self
            .order
            .into_iter()
            .map(|label| {
                let count = self.counts.get(&label).copied().unwrap_or(0);
                LabelShare {
                    label,
                    percentage: count as f64 / total,
                }
            })
            .collect();

        Ok(VideoSummary {
            summary,
            total_frames: self.total_frames,
            alerts: self.alerts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ScoredLabel;
    use std::time::Duration;

    fn prediction(labels: &[(&str, f32)]) -> PredictionResult {
        PredictionResult {
            labels: labels
                .iter()
                .map(|(label, confidence)| ScoredLabel {
                    label: label.to_string(),
                    confidence: *confidence,
                })
                .collect(),
        }
    }

    fn policy() -> AlertPolicy {
        AlertPolicy::new(["Unknown", "road"], Duration::from_secs(60))
    }

    #[test]
    fn test_fire_in_three_of_ten_frames() {
        let policy = policy();
        let mut aggregator = VideoAggregator::new(&policy);

        for i in 0..10 {
            if i % 3 == 0 && i < 9 {
                aggregator.observe(&prediction(&[("fire", 0.9)]));
            } else {
                aggregator.observe(&PredictionResult::fallback("Unknown"));
            }
        }

        let summary = aggregator.finish().unwrap();
        assert_eq!(summary.total_frames, 10);
        assert!((summary.share_of("fire").unwrap() - 0.3).abs() < 1e-9);
        assert!((summary.share_of("Unknown").unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(summary.alerts, vec!["fire".to_string()]);
    }

    #[test]
    fn test_labels_are_not_mutually_exclusive() {
        let policy = policy();
        let mut aggregator = VideoAggregator::new(&policy);

        for _ in 0..4 {
            aggregator.observe(&prediction(&[("fire", 0.8), ("violence", 0.6), ("road", 0.5)]));
        }

        let summary = aggregator.finish().unwrap();
        assert_eq!(summary.share_of("fire"), Some(1.0));
        assert_eq!(summary.share_of("violence"), Some(1.0));
        assert_eq!(summary.share_of("road"), Some(1.0));
        assert_eq!(summary.alerts, vec!["fire".to_string(), "violence".to_string()]);
    }

    #[test]
    fn test_summary_keeps_first_seen_order() {
        let policy = policy();
        let mut aggregator = VideoAggregator::new(&policy);

        aggregator.observe(&prediction(&[("road", 0.5)]));
        aggregator.observe(&prediction(&[("accident", 0.7), ("road", 0.4)]));

        let summary = aggregator.finish().unwrap();
        let labels: Vec<_> = summary.summary.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["road", "accident"]);
        assert_eq!(summary.share_of("accident"), Some(0.5));
    }

    #[test]
    fn test_empty_video_is_an_error() {
        let policy = policy();
        let aggregator = VideoAggregator::new(&policy);

        assert_eq!(aggregator.finish(), Err(SummaryError::NoFrames));
    }

    #[test]
    fn test_summary_serialization_omits_alerts() {
        let policy = policy();
        let mut aggregator = VideoAggregator::new(&policy);
        aggregator.observe(&prediction(&[("fire", 0.9)]));

        let json = serde_json::to_value(aggregator.finish().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "summary": [{"label": "fire", "percentage": 1.0}],
                "total_frames": 1
            })
        );
    }
}
