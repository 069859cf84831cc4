//! Frame sources.

use image::RgbImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame directory not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A stream of RGB frames.
///
/// `Ok(None)` means the stream has ended or the device went away; callers
/// treat it as the end of the session.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError>;
}

/// Still images from a directory, in file-name order.
pub struct ImageDirSource {
    pending: VecDeque<PathBuf>,
}

impl ImageDirSource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        if !dir.is_dir() {
            return Err(SourceError::NotFound(dir.display().to_string()));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        paths.sort();

        tracing::info!(dir = %dir.display(), frames = paths.len(), "opened frame directory");
        Ok(Self { pending: paths.into() })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        while let Some(path) = self.pending.pop_front() {
            match image::open(&path) {
                Ok(img) => return Ok(Some(img.to_rgb8())),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable frame");
                }
            }
        }
        Ok(None)
    }
}

/// In-memory frames, mostly for tests and replay.
impl FrameSource for VecDeque<RgbImage> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        Ok(self.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_image_dir_source_order_and_filtering() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(4, 4, Rgb([10, 0, 0])).save(dir.path().join("b.png")).unwrap();
        RgbImage::from_pixel(4, 4, Rgb([20, 0, 0])).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();
        std::fs::write(dir.path().join("c.png"), "corrupt").unwrap();

        let mut source = ImageDirSource::open(dir.path()).unwrap();
        assert_eq!(source.remaining(), 3);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.get_pixel(0, 0)[0], 20);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.get_pixel(0, 0)[0], 10);
        // c.png is unreadable and skipped.
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_image_dir_source_missing_dir() {
        let err = ImageDirSource::open(Path::new("/nonexistent/frames")).err().unwrap();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn test_vecdeque_source() {
        let mut frames: VecDeque<RgbImage> = VecDeque::from(vec![RgbImage::new(1, 1)]);
        assert!(frames.next_frame().unwrap().is_some());
        assert!(frames.next_frame().unwrap().is_none());
    }
}
