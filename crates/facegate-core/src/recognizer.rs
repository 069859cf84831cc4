//! ArcFace face recognizer via ONNX Runtime.
//!
//! Aligned 112×112 RGB crops in, L2-normalized 512-d embeddings out.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
pub const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer model not found: {0}")]
    ModelNotFound(String),
    #[error("expected a 512-dim embedding, got {0}")]
    WrongDimension(usize),
    #[error("face has no landmarks; alignment needs all five")]
    NoLandmarks,
    #[error("face landmarks are degenerate")]
    DegenerateLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Align the face and compute its embedding.
    pub fn extract(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let crop = aligned_crop(frame, face)?;
        let input = to_tensor(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>()?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::WrongDimension(raw.len()));
        }
        Ok(Embedding::new(l2_normalize(raw)))
    }
}

fn aligned_crop(frame: &RgbImage, face: &BoundingBox) -> Result<RgbImage, RecognizerError> {
    let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
    alignment::align_face(frame, landmarks).ok_or(RecognizerError::DegenerateLandmarks)
}

fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let side = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

/// Widen to f64 and scale to unit length. A zero vector is returned as-is.
fn l2_normalize(raw: &[f32]) -> Vec<f64> {
    let values: Vec<f64> = raw.iter().map(|&v| v as f64).collect();
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|v| v / norm).collect()
    } else {
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_to_tensor_shape_and_channels() {
        let crop = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([0, 255, 128]));
        let t = to_tensor(&crop);
        assert_eq!(t.shape(), &[1, 3, 112, 112]);
        assert!((t[[0, 0, 5, 5]] + 1.0).abs() < 1e-6);
        assert!((t[[0, 1, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((t[[0, 2, 5, 5]] - 0.5 / 127.5).abs() < 1e-6);
    }

    fn face(landmarks: Option<[(f32, f32); 5]>) -> BoundingBox {
        BoundingBox { x: 0.0, y: 0.0, width: 100.0, height: 100.0, confidence: 0.9, landmarks }
    }

    #[test]
    fn test_aligned_crop_rejects_missing_landmarks() {
        let frame = RgbImage::new(200, 200);
        assert!(matches!(aligned_crop(&frame, &face(None)), Err(RecognizerError::NoLandmarks)));
    }

    #[test]
    fn test_aligned_crop_rejects_degenerate_landmarks() {
        let frame = RgbImage::new(200, 200);
        let collapsed = face(Some([(50.0, 50.0); 5]));
        assert!(matches!(
            aligned_crop(&frame, &collapsed),
            Err(RecognizerError::DegenerateLandmarks)
        ));
    }

    #[test]
    fn test_aligned_crop_size() {
        let frame = RgbImage::from_pixel(200, 200, Rgb([10, 20, 30]));
        let spread = face(Some([
            (70.0, 80.0),
            (130.0, 80.0),
            (100.0, 110.0),
            (75.0, 140.0),
            (125.0, 140.0),
        ]));
        let crop = aligned_crop(&frame, &spread).unwrap();
        assert_eq!(crop.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert_eq!(v, vec![0.6, 0.8]);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
