//! Image → embedding, with the single-face rule applied.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected in image")]
    NoFace,
    #[error("multiple faces detected ({0}); please ensure only one face is visible")]
    MultipleFaces(usize),
    #[error("could not decode image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl ExtractError {
    /// Whether the failure is caused by the submitted image rather than the pipeline.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExtractError::NoFace | ExtractError::MultipleFaces(_) | ExtractError::InvalidImage(_)
        )
    }
}

/// Face detection and embedding, the seam between callers and the models.
pub trait FaceEncoder: Send {
    /// Detect all faces, sorted by descending confidence.
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ExtractError>;

    /// Embed one already-detected face.
    fn embed_face(&mut self, image: &GrayImage, face: &BoundingBox) -> Result<Embedding, ExtractError>;

    /// Embed the single face in `image`; zero or several faces are errors.
    fn encode(&mut self, image: &GrayImage) -> Result<Embedding, ExtractError> {
        let faces = self.detect(image)?;
        match faces.as_slice() {
            [] => Err(ExtractError::NoFace),
            [face] => self.embed_face(image, face),
            many => Err(ExtractError::MultipleFaces(many.len())),
        }
    }
}

/// SCRFD + ArcFace pipeline.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    /// Load both models from `model_dir`. Fails if either file is missing.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractError> {
        let det_path = model_dir.join(DETECTOR_MODEL_FILE);
        let rec_path = model_dir.join(RECOGNIZER_MODEL_FILE);

        let detector = FaceDetector::load(&det_path.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&rec_path.to_string_lossy())?;
        tracing::info!(model_dir = %model_dir.display(), "face models loaded");

        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ExtractError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed_face(&mut self, image: &GrayImage, face: &BoundingBox) -> Result<Embedding, ExtractError> {
        Ok(self.recognizer.extract(image, face)?)
    }
}

/// Decode an uploaded image (PNG, JPEG, ...) to 8-bit grayscale.
///
/// Colour uploads are reduced to luma, the same input the camera loop
/// produces, so HTTP and camera enrollments share one embedding space.
/// ArcFace then sees the luma replicated across its three channels, which
/// costs some accuracy on colour photos.
pub fn decode_image(bytes: &[u8]) -> Result<GrayImage, ExtractError> {
    Ok(image::load_from_memory(bytes)?.to_luma8())
}
