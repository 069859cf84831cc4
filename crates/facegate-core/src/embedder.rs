//! Frame → face embeddings.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detects faces in a frame and embeds each one.
///
/// A frame without faces yields an empty vector, not an error.
pub trait FaceEmbedder {
    fn embed(&mut self, frame: &RgbImage) -> Result<Vec<DetectedFace>, EmbedError>;
}

/// SCRFD + ArcFace pipeline.
pub struct OnnxFaceEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEmbedder {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EmbedError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn embed(&mut self, frame: &RgbImage) -> Result<Vec<DetectedFace>, EmbedError> {
        let boxes = self.detector.detect(frame)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            match self.recognizer.extract(frame, &bbox) {
                Ok(embedding) => faces.push(DetectedFace { bbox, embedding }),
                Err(err @ (RecognizerError::NoLandmarks | RecognizerError::DegenerateLandmarks)) => {
                    tracing::debug!(confidence = bbox.confidence, %err, "skipping unalignable face");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(faces)
    }
}
