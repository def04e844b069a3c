use crate::{
    config::LabelsConfig,
    frames::Frame,
    model_service::{EmbeddingModel, InferenceError},
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredLabel {
    pub label: String,
    pub confidence: f32,
}

/// Labels above threshold for one frame, sorted by descending confidence.
/// Never empty: falls back to the default label with confidence 0.0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub labels: Vec<ScoredLabel>,
}

impl PredictionResult {
    pub fn fallback(default_label: &str) -> Self {
        Self {
            labels: vec![ScoredLabel {
                label: default_label.to_string(),
                confidence: 0.0,
            }],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredLabel> {
        self.labels.iter()
    }
}

fn l2_normalize(mut vector: Vec<f32>) -> Result<Vec<f32>, InferenceError> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(InferenceError::Output(format!(
            "embedding cannot be normalised (norm {})",
            norm
        )));
    }
    vector.iter_mut().for_each(|v| *v /= norm);
    Ok(vector)
}

/// Keeps the labels whose similarity reaches `threshold` and orders them.
///
/// Confidence is the absolute cosine similarity clamped to [0, 1]. The sort is
/// stable, so ties keep catalog order.
pub fn rank_labels(
    labels: &[String],
    similarities: &[f32],
    threshold: f32,
    default_label: &str,
) -> Result<PredictionResult, InferenceError> {
    if labels.len() != similarities.len() {
        return Err(InferenceError::Output(format!(
            "{} similarities for {} labels",
            similarities.len(),
            labels.len()
        )));
    }

    let mut scored = Vec::new();
    for (label, similarity) in labels.iter().zip(similarities) {
        if !similarity.is_finite() {
            return Err(InferenceError::Output(format!(
                "non-finite similarity for label `{}`",
                label
            )));
        }
        let confidence = similarity.abs().clamp(0.0, 1.0);
        if confidence >= threshold {
            scored.push(ScoredLabel {
                label: label.clone(),
                confidence,
            });
        }
    }

    if scored.is_empty() {
        return Ok(PredictionResult::fallback(default_label));
    }

    scored.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(PredictionResult { labels: scored })
}

/// Zero-shot scorer over a fixed label catalog.
///
/// Text embeddings are computed once in [`LabelScorer::new`]; changing the
/// catalog means building a new scorer.
pub struct LabelScorer {
    model: Arc<dyn EmbeddingModel>,
    labels: Vec<String>,
    default_label: String,
    text_embeddings: Vec<Vec<f32>>,
    threshold: f32,
}

impl LabelScorer {
    pub fn new(
        model: Arc<dyn EmbeddingModel>,
        labels_config: &LabelsConfig,
        threshold: f32,
    ) -> Result<Self, InferenceError> {
        let prompts: Vec<String> = labels_config
            .labels
            .iter()
            .map(|label| labels_config.prompt_for(label))
            .collect();

        let raw_embeddings = model.embed_texts(&prompts)?;
        if raw_embeddings.len() != prompts.len() {
            return Err(InferenceError::Output(format!(
                "model returned {} text embeddings for {} labels",
                raw_embeddings.len(),
                prompts.len()
            )));
        }

        let text_embeddings = raw_embeddings
            .into_iter()
            .map(l2_normalize)
            .collect::<Result<Vec<_>, _>>()?;

        let dim = text_embeddings.first().map(Vec::len).unwrap_or(0);
        if text_embeddings.iter().any(|e| e.len() != dim) {
            return Err(InferenceError::Output(
                "text embeddings have mismatched dimensions".into(),
            ));
        }

        tracing::info!(
            "Cached {} label embeddings of dimension {}",
            text_embeddings.len(),
            dim
        );

        Ok(Self {
            model,
            labels: labels_config.labels.clone(),
            default_label: labels_config.default_label.clone(),
            text_embeddings,
            threshold,
        })
    }

    pub fn catalog(&self) -> &[String] {
        &self.labels
    }

    pub fn default_label(&self) -> &str {
        &self.default_label
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn score(&self, frame: &Frame) -> Result<PredictionResult, InferenceError> {
        let image_embedding = l2_normalize(self.model.embed_image(frame)?)?;

        let similarities = self
            .text_embeddings
            .iter()
            .map(|text| {
                if text.len() != image_embedding.len() {
                    return Err(InferenceError::Output(format!(
                        "image embedding dimension {} does not match text dimension {}",
                        image_embedding.len(),
                        text.len()
                    )));
                }
                Ok(text.iter().zip(&image_embedding).map(|(t, i)| t * i).sum())
            })
            .collect::<Result<Vec<f32>, _>>()?;

        rank_labels(
            &self.labels,
            &similarities,
            self.threshold,
            &self.default_label,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Embeds frames as `[mean brightness, 1 - mean brightness]` and prompts by
    /// looking them up in a fixed table.
    pub(crate) struct MockModel {
        pub prompts: Vec<(String, Vec<f32>)>,
    }

    impl MockModel {
        pub(crate) fn new(prompts: &[(&str, [f32; 2])]) -> Self {
            Self {
                prompts: prompts
                    .iter()
                    .map(|(p, v)| (p.to_string(), v.to_vec()))
                    .collect(),
            }
        }
    }

    impl EmbeddingModel for MockModel {
        fn embed_image(&self, frame: &Frame) -> Result<Vec<f32>, InferenceError> {
            let total: f32 = frame.pixels().flat_map(|p| p.0).map(|v| v as f32).sum();
            let mean = total / (frame.width() * frame.height() * 3).max(1) as f32 / 255.;
            Ok(vec![mean, 1.0 - mean])
        }

        fn embed_texts(&self, prompts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
            prompts
                .iter()
                .map(|prompt| {
                    self.prompts
                        .iter()
                        .find(|(p, _)| p == prompt)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| InferenceError::Input(format!("unknown prompt {}", prompt)))
                })
                .collect()
        }
    }

    pub(crate) fn labels_config(labels: &[&str]) -> LabelsConfig {
        LabelsConfig {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            default_label: "Unknown".into(),
            safe_labels: vec!["Unknown".into(), "road".into()],
            prompt_template: "a photo of {label}".into(),
        }
    }

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rank_labels_filters_and_sorts() {
        let result = rank_labels(
            &labels(&["fire", "violence", "road"]),
            &[0.3, 0.8, 0.1],
            0.25,
            "Unknown",
        )
        .unwrap();

        let names: Vec<_> = result.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(names, vec!["violence", "fire"]);
        assert!(result
            .labels
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_rank_labels_falls_back_to_default() {
        let result = rank_labels(&labels(&["fire"]), &[0.1], 0.9, "Unknown").unwrap();

        assert_eq!(result, PredictionResult::fallback("Unknown"));
        assert_eq!(result.labels[0].confidence, 0.0);
    }

    #[test]
    fn test_rank_labels_uses_absolute_similarity_and_clamps() {
        let result = rank_labels(
            &labels(&["fire", "violence"]),
            &[-0.6, 1.2],
            0.5,
            "Unknown",
        )
        .unwrap();

        assert_eq!(result.labels[0].label, "violence");
        assert_eq!(result.labels[0].confidence, 1.0);
        assert_eq!(result.labels[1].label, "fire");
        assert!((result.labels[1].confidence - 0.6).abs() < 1e-6);
        assert!(result
            .iter()
            .all(|s| (0.0..=1.0).contains(&s.confidence)));
    }

    #[test]
    fn test_rank_labels_keeps_catalog_order_on_ties() {
        let result = rank_labels(
            &labels(&["fire", "violence", "accident"]),
            &[0.5, 0.7, 0.5],
            0.4,
            "Unknown",
        )
        .unwrap();

        let names: Vec<_> = result.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(names, vec!["violence", "fire", "accident"]);
    }

    #[test]
    fn test_rank_labels_rejects_nan() {
        let result = rank_labels(&labels(&["fire"]), &[f32::NAN], 0.1, "Unknown");
        assert!(matches!(result, Err(InferenceError::Output(_))));
    }

    #[test]
    fn test_scorer_black_frame_is_not_fire() {
        let model = MockModel::new(&[("a photo of fire", [1.0, 0.0])]);
        let scorer = LabelScorer::new(Arc::new(model), &labels_config(&["fire"]), 0.9).unwrap();

        let frame = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));
        let result = scorer.score(&frame).unwrap();

        assert_eq!(result, PredictionResult::fallback("Unknown"));
    }

    #[test]
    fn test_scorer_matches_bright_frame() {
        let model = MockModel::new(&[
            ("a photo of fire", [1.0, 0.0]),
            ("a photo of road", [0.0, 1.0]),
        ]);
        let scorer =
            LabelScorer::new(Arc::new(model), &labels_config(&["fire", "road"]), 0.9).unwrap();

        let frame = RgbImage::from_pixel(16, 16, Rgb([255, 255, 255]));
        let result = scorer.score(&frame).unwrap();

        assert_eq!(result.labels.len(), 1);
        assert_eq!(result.labels[0].label, "fire");
        assert!((result.labels[0].confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_scorer_rejects_zero_text_embedding() {
        let model = MockModel::new(&[("a photo of fire", [0.0, 0.0])]);
        let result = LabelScorer::new(Arc::new(model), &labels_config(&["fire"]), 0.5);

        assert!(matches!(result, Err(InferenceError::Output(_))));
    }

    #[test]
    fn test_scorer_surfaces_model_failures() {
        let model = MockModel::new(&[]);
        let result = LabelScorer::new(Arc::new(model), &labels_config(&["fire"]), 0.5);

        assert!(matches!(result, Err(InferenceError::Input(_))));
    }
}
