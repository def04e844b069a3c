use crate::frames::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Failed to prepare model input: {0}")]
    Input(String),
    #[error("Inference failed: {0}")]
    Run(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
}

impl From<ort::Error> for InferenceError {
    fn from(err: ort::Error) -> Self {
        InferenceError::Run(err.to_string())
    }
}

/// Projects frames and text prompts into a shared embedding space.
///
/// Implementations block the calling thread; async callers go through
/// `spawn_blocking`.
pub trait EmbeddingModel: Send + Sync + 'static {
    fn embed_image(&self, frame: &Frame) -> Result<Vec<f32>, InferenceError>;

    fn embed_texts(&self, prompts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError>;
}
