//! SCRFD face detector via ONNX Runtime.
//!
//! The frame is resized into the top-left corner of a 640×640 canvas,
//! decoded per stride (8/16/32, two anchors per cell) and filtered by NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected detector output: {0}")]
    BadOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Raw per-stride output slices, borrowed from the session outputs.
#[derive(Default)]
struct StrideOutputs<'a> {
    scores: Option<&'a [f32]>,
    boxes: Option<&'a [f32]>,
    landmarks: Option<&'a [f32]>,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = session.outputs().len(),
            "loaded SCRFD model"
        );

        Ok(Self { session })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, scale) = preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut per_stride: [StrideOutputs<'_>; 3] = Default::default();
        for i in 0..outputs.len() {
            let (shape, data) = outputs[i].try_extract_tensor::<f32>()?;
            let channels = shape.last().copied().unwrap_or(1).max(1) as usize;
            let rows = data.len() / channels;
            let Some(slot) = STRIDES.iter().position(|&s| anchor_count(s) == rows) else {
                return Err(DetectorError::BadOutput(format!(
                    "output {i} has {rows} rows, matching no stride"
                )));
            };
            let entry = &mut per_stride[slot];
            match channels {
                1 => entry.scores = Some(data),
                4 => entry.boxes = Some(data),
                10 => entry.landmarks = Some(data),
                other => {
                    return Err(DetectorError::BadOutput(format!(
                        "output {i} has {other} channels"
                    )))
                }
            }
        }

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let out = &per_stride[slot];
            let (Some(scores), Some(boxes)) = (out.scores, out.boxes) else {
                return Err(DetectorError::BadOutput(format!(
                    "missing scores or boxes for stride {stride}"
                )));
            };
            candidates.extend(decode_stride(stride, scores, boxes, out.landmarks, scale));
        }

        let faces = nms(candidates, NMS_THRESHOLD);
        tracing::trace!(faces = faces.len(), "detection done");
        Ok(faces)
    }
}

fn anchor_count(stride: usize) -> usize {
    let cells = INPUT_SIZE as usize / stride;
    cells * cells * ANCHORS_PER_CELL
}

/// Resize into the top-left of the input canvas; returns the tensor and the
/// frame-to-canvas scale.
fn preprocess(frame: &RgbImage) -> (Array4<f32>, f32) {
    let scale = (INPUT_SIZE as f32 / frame.width() as f32)
        .min(INPUT_SIZE as f32 / frame.height() as f32);
    let new_w = ((frame.width() as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((frame.height() as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let side = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    // The padded region stays at zero, which is the normalized mean.
    (tensor, scale)
}

fn decode_stride(
    stride: usize,
    scores: &[f32],
    boxes: &[f32],
    landmarks: Option<&[f32]>,
    scale: f32,
) -> Vec<BoundingBox> {
    let cells = INPUT_SIZE as usize / stride;
    let step = stride as f32;
    let mut out = Vec::new();

    for (idx, &score) in scores.iter().enumerate().take(anchor_count(stride)) {
        if score < SCORE_THRESHOLD {
            continue;
        }
        let Some(d) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let cell = idx / ANCHORS_PER_CELL;
        let ax = (cell % cells) as f32 * step;
        let ay = (cell / cells) as f32 * step;

        let x1 = (ax - d[0] * step) / scale;
        let y1 = (ay - d[1] * step) / scale;
        let x2 = (ax + d[2] * step) / scale;
        let y2 = (ay + d[3] * step) / scale;

        let points = landmarks
            .and_then(|kps| kps.get(idx * 10..idx * 10 + 10))
            .map(|k| {
                std::array::from_fn(|p| {
                    ((ax + k[p * 2] * step) / scale, (ay + k[p * 2 + 1] * step) / scale)
                })
            });

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks: points,
        });
    }
    out
}

/// Greedy non-maximum suppression; output sorted by confidence.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
