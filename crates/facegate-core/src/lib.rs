//! facegate-core — face detection, embedding and gallery matching.
//!
//! SCRFD finds faces, ArcFace embeds aligned crops, and a [`Matcher`]
//! decides identity against a gallery of registered faces. Capture sessions
//! drive the pipeline over a [`FrameSource`].

pub mod alignment;
pub mod capture;
pub mod detector;
pub mod embedder;
pub mod matcher;
pub mod recognizer;
pub mod source;
pub mod types;

use std::path::PathBuf;

pub use capture::{CancelToken, CaptureError, CaptureSession, CaptureState, Recognition, Verified};
pub use embedder::{EmbedError, FaceEmbedder, OnnxFaceEmbedder};
pub use matcher::{BestMatchMatcher, FirstMatchMatcher, MatchPolicy, Matcher, DEFAULT_TOLERANCE};
pub use source::{FrameSource, ImageDirSource, SourceError};
pub use types::{BoundingBox, DetectedFace, Embedding, FaceRecord, Identity};

/// Default directory for the ONNX face models: `$XDG_DATA_HOME/facegate/models`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// `$XDG_DATA_HOME/facegate`, falling back to `~/.local/share/facegate`.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}
