use crate::{
    config::{Device, ModelConfig},
    frames::Frame,
    model_service::{EmbeddingModel, InferenceError},
};
use image::imageops::{self, FilterType};
use ndarray::{Array2, Array4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};
use tokenizers::Tokenizer;

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];
const MAX_TEXT_TOKENS: usize = 77;
const PAD_TOKEN_ID: i64 = 0;

/// Resizes the shortest side to `size` with bicubic filtering, centre-crops a
/// `size` x `size` square and normalises with the CLIP statistics (NCHW).
fn transform_frame(frame: &Frame, size: u32) -> Result<Array4<f32>, InferenceError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 || size == 0 {
        return Err(InferenceError::Input(format!(
            "cannot resize {}x{} frame to {}",
            width, height, size
        )));
    }

    let scale = size as f32 / width.min(height) as f32;
    let resized_width = ((width as f32 * scale).round() as u32).max(size);
    let resized_height = ((height as f32 * scale).round() as u32).max(size);
    let resized = imageops::resize(frame, resized_width, resized_height, FilterType::CatmullRom);

    let left = (resized_width - size) / 2;
    let top = (resized_height - size) / 2;
    let cropped = imageops::crop_imm(&resized, left, top, size, size).to_image();

    let side = size as usize;
    let mut input = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in cropped.enumerate_pixels() {
        for channel in 0..3 {
            let value = pixel.0[channel] as f32 / 255.;
            input[[0, channel, y as usize, x as usize]] =
                (value - CLIP_MEAN[channel]) / CLIP_STD[channel];
        }
    }

    Ok(input)
}

fn split_rows(
    shape: &[i64],
    data: &[f32],
    expected_rows: usize,
) -> Result<Vec<Vec<f32>>, InferenceError> {
    let (rows, dim) = match shape {
        [rows, dim] => (*rows as usize, *dim as usize),
        other => {
            return Err(InferenceError::Output(format!(
                "expected a [batch, dim] embedding, got shape {:?}",
                other
            )))
        }
    };
    if rows != expected_rows || dim == 0 || data.len() != rows * dim {
        return Err(InferenceError::Output(format!(
            "expected {} embeddings, got shape {:?} with {} values",
            expected_rows,
            shape,
            data.len()
        )));
    }
    Ok(data.chunks(dim).map(|row| row.to_vec()).collect())
}

struct SessionPool {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
}

impl SessionPool {
    fn new(path: &Path, device: Device, num_instances: usize) -> Result<Self, InferenceError> {
        let sessions = (0..num_instances)
            .map(|_| build_session(path, device).map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
        })
    }

    fn acquire(&self) -> Result<MutexGuard<'_, Session>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        tracing::debug!("Handling request with session {}", index);
        self.sessions[index]
            .lock()
            .map_err(|e| InferenceError::Run(format!("session mutex poisoned: {}", e)))
    }
}

fn load_error(path: &Path, err: impl std::fmt::Display) -> InferenceError {
    InferenceError::Load(format!("{:?}: {}", path, err))
}

fn build_session(path: &Path, device: Device) -> Result<Session, InferenceError> {
    let builder = Session::builder()
        .map_err(|e| load_error(path, e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| load_error(path, e))?;

    let builder = match device {
        Device::Cpu => builder,
        #[cfg(feature = "cuda")]
        Device::Cuda => builder
            .with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default().build()
            ])
            .map_err(|e| load_error(path, e))?,
        #[cfg(not(feature = "cuda"))]
        Device::Cuda => {
            tracing::warn!("Built without the `cuda` feature, running {:?} on CPU", path);
            builder
        }
    };

    builder.commit_from_file(path).map_err(|e| load_error(path, e))
}

/// CLIP image and text towers exported to ONNX, each served from a small pool
/// of sessions.
pub struct OrtClipModel {
    visual: SessionPool,
    textual: SessionPool,
    tokenizer: Tokenizer,
    image_size: u32,
    image_output: String,
    text_output: String,
}

impl OrtClipModel {
    pub fn new(model_config: &ModelConfig) -> Result<Self, InferenceError> {
        let num_instances = model_config.num_instances.max(1);
        let visual = SessionPool::new(
            &model_config.get_visual_path(),
            model_config.device,
            num_instances,
        )?;
        let textual = SessionPool::new(&model_config.get_textual_path(), model_config.device, 1)?;
        let tokenizer = Tokenizer::from_file(model_config.get_tokenizer_path())
            .map_err(|e| InferenceError::Load(format!("tokenizer: {}", e)))?;

        tracing::info!(
            "Loaded {} with {} visual sessions on {:?}",
            model_config.model_id,
            num_instances,
            model_config.device
        );

        Ok(Self {
            visual,
            textual,
            tokenizer,
            image_size: model_config.image_size,
            image_output: model_config.image_output.clone(),
            text_output: model_config.text_output.clone(),
        })
    }

    fn tokenize(&self, prompts: &[String]) -> Result<(Array2<i64>, Array2<i64>), InferenceError> {
        let encodings = self
            .tokenizer
            .encode_batch(prompts.to_vec(), true)
            .map_err(|e| InferenceError::Input(format!("tokenization failed: {}", e)))?;

        let seq_len = encodings
            .iter()
            .map(|enc| enc.get_ids().len().min(MAX_TEXT_TOKENS))
            .max()
            .unwrap_or(0);
        if seq_len == 0 {
            return Err(InferenceError::Input("no tokens produced".into()));
        }

        let mut input_ids = Array2::from_elem((encodings.len(), seq_len), PAD_TOKEN_ID);
        let mut attention_mask = Array2::<i64>::zeros((encodings.len(), seq_len));
        for (row, encoding) in encodings.iter().enumerate() {
            for (col, id) in encoding.get_ids().iter().take(seq_len).enumerate() {
                input_ids[[row, col]] = *id as i64;
                attention_mask[[row, col]] = 1;
            }
        }

        Ok((input_ids, attention_mask))
    }
}

impl EmbeddingModel for OrtClipModel {
    fn embed_image(&self, frame: &Frame) -> Result<Vec<f32>, InferenceError> {
        let input = transform_frame(frame, self.image_size)?;
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| InferenceError::Input(format!("failed to build tensor: {}", e)))?;

        let mut session = self.visual.acquire()?;
        let outputs = session.run(ort::inputs![tensor_ref])?;
        let (shape, data) = outputs[self.image_output.as_str()].try_extract_tensor::<f32>()?;

        let mut rows = split_rows(shape, data, 1)?;
        Ok(rows.remove(0))
    }

    fn embed_texts(&self, prompts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }
        let (input_ids, attention_mask) = self.tokenize(prompts)?;
        let ids_ref = TensorRef::from_array_view(input_ids.view())
            .map_err(|e| InferenceError::Input(format!("failed to build tensor: {}", e)))?;
        let mask_ref = TensorRef::from_array_view(attention_mask.view())
            .map_err(|e| InferenceError::Input(format!("failed to build tensor: {}", e)))?;

        let mut session = self.textual.acquire()?;
        let outputs = session.run(ort::inputs![
            "input_ids" => ids_ref,
            "attention_mask" => mask_ref
        ])?;
        let (shape, data) = outputs[self.text_output.as_str()].try_extract_tensor::<f32>()?;

        split_rows(shape, data, prompts.len())
    }
}
