use image::RgbImage;
use std::{io::Cursor, path::Path};
use thiserror::Error;

/// A decoded RGB frame, height x width x 3.
pub type Frame = RgbImage;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("No data received")]
    EmptyInput,
    #[error("Failed to decode image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("Failed to read image data: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to open video: {0}")]
    OpenVideo(String),
    #[error("Failed to read video frame: {0}")]
    ReadFrame(String),
}

/// Decodes an uploaded image of any format the `image` crate can sniff.
pub fn decode_image(bytes: &[u8]) -> Result<Frame, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let reader = image::ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let image = reader.decode()?;

    Ok(image.to_rgb8())
}

/// Decodes a single encoded frame posted by a live feed.
pub fn decode_live_frame(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let frame = decode_image(bytes)?;
    if frame.width() == 0 || frame.height() == 0 {
        return Err(DecodeError::EmptyInput);
    }
    Ok(frame)
}

/// Sequential, non-restartable frame reader over a video file.
///
/// Reading stops at the first frame the decoder cannot deliver; the error is
/// yielded once and the iterator is exhausted afterwards.
pub struct VideoFrames {
    #[cfg(feature = "video")]
    capture: opencv::videoio::VideoCapture,
    finished: bool,
}

#[cfg(feature = "video")]
impl VideoFrames {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        use opencv::{prelude::*, videoio};

        let path_str = path
            .to_str()
            .ok_or_else(|| DecodeError::OpenVideo(format!("non UTF-8 path {:?}", path)))?;
        let capture = videoio::VideoCapture::from_file(path_str, videoio::CAP_ANY)
            .map_err(|e| DecodeError::OpenVideo(e.to_string()))?;
        let opened = capture
            .is_opened()
            .map_err(|e| DecodeError::OpenVideo(e.to_string()))?;
        if !opened {
            return Err(DecodeError::OpenVideo(format!(
                "container at {:?} could not be opened",
                path
            )));
        }

        Ok(Self {
            capture,
            finished: false,
        })
    }

    fn read_next(&mut self) -> Result<Option<Frame>, DecodeError> {
        use opencv::{core::Mat, imgproc, prelude::*};

        let mut bgr = Mat::default();
        let grabbed = self
            .capture
            .read(&mut bgr)
            .map_err(|e| DecodeError::ReadFrame(e.to_string()))?;
        if !grabbed || bgr.empty() {
            return Ok(None);
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB)
            .map_err(|e| DecodeError::ReadFrame(e.to_string()))?;

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb
            .data_bytes()
            .map_err(|e| DecodeError::ReadFrame(e.to_string()))?
            .to_vec();

        RgbImage::from_raw(width, height, data)
            .map(Some)
            .ok_or_else(|| DecodeError::ReadFrame("frame buffer size mismatch".into()))
    }
}

#[cfg(not(feature = "video"))]
impl VideoFrames {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        Err(DecodeError::OpenVideo(format!(
            "{:?}: built without the `video` feature",
            path
        )))
    }

    fn read_next(&mut self) -> Result<Option<Frame>, DecodeError> {
        Ok(None)
    }
}

impl Iterator for VideoFrames {
    type Item = Result<Frame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
